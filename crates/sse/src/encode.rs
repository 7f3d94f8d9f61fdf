use std::fmt::Display;

use bytes::Bytes;
use chatloop_model::{ChunkError, StreamChunk};
use futures_util::{Stream, StreamExt};
use reqwest::header::{
    CACHE_CONTROL, CONNECTION, CONTENT_TYPE, HeaderMap, HeaderValue,
};
use tokio_util::sync::CancellationToken;

/// The event that terminates every encoded stream.
pub const DONE_EVENT: &str = "data: [DONE]\n\n";

/// Encodes one chunk as a `data:` event.
pub fn encode_chunk(chunk: &StreamChunk) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(chunk)?;
    Ok(format!("data: {json}\n\n"))
}

/// Encodes a chat stream as server-sent events.
///
/// Every chunk becomes one event and the stream always ends with
/// [`DONE_EVENT`]. An `Err` item is sent as a final `error` chunk
/// carrying the id and model of the last chunk, unless `signal` has been
/// cancelled, in which case the stream just ends. Once `signal` is
/// cancelled no further chunk is forwarded.
pub fn encode_stream<S, E>(
    stream: S,
    signal: CancellationToken,
) -> impl Stream<Item = Bytes> + Send
where
    S: Stream<Item = Result<StreamChunk, E>> + Send,
    E: Display + Send,
{
    async_stream::stream! {
        let mut stream = std::pin::pin!(stream);
        let mut last: Option<(String, String)> = None;
        loop {
            if signal.is_cancelled() {
                debug!("sse stream aborted");
                break;
            }
            let Some(item) = stream.next().await else {
                break;
            };
            let failure = match item {
                Ok(chunk) => match encode_chunk(&chunk) {
                    Ok(event) => {
                        last = Some((chunk.id, chunk.model));
                        yield Bytes::from(event);
                        continue;
                    }
                    Err(err) => err.to_string(),
                },
                Err(err) => err.to_string(),
            };
            if signal.is_cancelled() {
                break;
            }
            error!("chat stream failed: {failure}");
            let (id, model) = last.take().unwrap_or_default();
            let chunk = StreamChunk::error(id, model, ChunkError::new(failure));
            if let Ok(event) = encode_chunk(&chunk) {
                yield Bytes::from(event);
            }
            break;
        }
        yield Bytes::from_static(DONE_EVENT.as_bytes());
    }
}

/// Returns the response headers of an event stream: `text/event-stream`,
/// `no-cache` and `keep-alive`, overridden by `overrides`.
pub fn sse_headers(overrides: HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

    let mut name = None;
    for (key, value) in overrides {
        // The first value of a name replaces the default, the others are
        // appended to it.
        if let Some(key) = key {
            headers.insert(key.clone(), value);
            name = Some(key);
        } else if let Some(name) = &name {
            headers.append(name.clone(), value);
        }
    }
    headers
}
