/// Errors of the SSE codec and connection.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The response body could not be read.
    #[error("failed to read the event stream: {0}")]
    Body(#[source] reqwest::Error),
    /// The bytes are not valid UTF-8 or not a valid event.
    #[error("invalid event payload")]
    InvalidPayload,
    /// An event does not hold a valid chunk.
    #[error("invalid chunk: {0}")]
    Json(#[from] serde_json::Error),
    /// The request failed or returned an error status.
    #[error("request failed: {0}")]
    Http(#[source] reqwest::Error),
    /// The server did not answer with an event stream.
    #[error("unexpected content type: {0:?}")]
    UnexpectedContentType(Option<String>),
}
