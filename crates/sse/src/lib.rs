//! Server-sent events framing of the chunk protocol.
//!
//! A chat stream is sent to HTTP callers as one `data: <json>` event per
//! [`StreamChunk`], terminated by a `data: [DONE]` event. This crate
//! encodes streams into that framing, decodes it incrementally, and
//! provides [`SseConnection`], a [`ChatAdapter`] that talks to a remote
//! engine over it.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod config;
mod encode;
mod error;
mod io;

use std::sync::Arc;

use chatloop_model::{
    ChatAdapter, ChatStreamOptions, ChunkError, ChunkStream, StreamChunk,
};
use mime::Mime;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde_json::{Map, Value};

pub use config::{SseConnectionConfig, SseConnectionConfigBuilder};
pub use encode::{DONE_EVENT, encode_chunk, encode_stream, sse_headers};
pub use error::Error;
use io::Chunks;
pub use io::{EventReader, SseDecoder};

/// The payload of the event that ends a chunk stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// A [`ChatAdapter`] that streams turns from a remote SSE endpoint.
///
/// Each turn is one `POST` of `{"messages": [..], "data": ..}`, where
/// `data` holds the provider options and the configured body extras are
/// merged on top. The decoded chunks are forwarded as they arrive.
/// Transport and decoding failures end the turn with one `error` chunk.
#[derive(Clone, Debug)]
pub struct SseConnection {
    client: Client,
    config: Arc<SseConnectionConfig>,
}

impl SseConnection {
    /// Creates a connection with the given configuration.
    #[inline]
    pub fn new(config: SseConnectionConfig) -> Self {
        Self {
            client: Client::new(),
            config: Arc::new(config),
        }
    }
}

impl ChatAdapter for SseConnection {
    fn name(&self) -> &str {
        "sse"
    }

    fn chat_stream(&self, options: ChatStreamOptions) -> ChunkStream {
        let client = self.client.clone();
        let config = Arc::clone(&self.config);

        Box::pin(async_stream::stream! {
            let signal = options.signal.clone();
            if signal.is_cancelled() {
                return;
            }
            let connecting = connect(&client, &config, &options);
            let response = match signal.run_until_cancelled(connecting).await {
                Some(Ok(response)) => response,
                Some(Err(err)) => {
                    yield failure("", &options.model, &err);
                    return;
                }
                None => return,
            };

            let mut reader = EventReader::new(Chunks::from_response(response));
            let mut last_id = String::new();
            loop {
                let reading = reader.next_chunk();
                let Some(next) = signal.run_until_cancelled(reading).await
                else {
                    debug!("sse connection aborted");
                    return;
                };
                match next {
                    Ok(Some(chunk)) => {
                        trace!("sse chunk: {}", chunk.kind.type_name());
                        last_id.clone_from(&chunk.id);
                        yield chunk;
                    }
                    Ok(None) => return,
                    Err(err) => {
                        yield failure(&last_id, &options.model, &err);
                        return;
                    }
                }
            }
        })
    }
}

async fn connect(
    client: &Client,
    config: &SseConnectionConfig,
    options: &ChatStreamOptions,
) -> Result<Response, Error> {
    let body = request_body(config, options)?;
    let mut request = client
        .post(&config.url)
        .header(ACCEPT, "text/event-stream")
        .json(&body);
    for (name, value) in &config.headers {
        request = request.header(name, value);
    }
    debug!("connecting to {}", config.url);

    let response = request
        .send()
        .await
        .and_then(Response::error_for_status)
        .map_err(Error::Http)?;

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let is_event_stream = content_type
        .and_then(|v| v.parse().ok())
        .is_some_and(|m: Mime| {
            m.type_() == mime::TEXT && m.subtype() == mime::EVENT_STREAM
        });
    if !is_event_stream {
        return Err(Error::UnexpectedContentType(
            content_type.map(str::to_owned),
        ));
    }
    Ok(response)
}

fn request_body(
    config: &SseConnectionConfig,
    options: &ChatStreamOptions,
) -> Result<Value, Error> {
    let mut body = Map::new();
    body.insert(
        "messages".to_owned(),
        serde_json::to_value(&options.messages)?,
    );
    if !options.provider_options.is_null() {
        body.insert("data".to_owned(), options.provider_options.clone());
    }
    body.extend(config.body_extra.clone());
    Ok(Value::Object(body))
}

fn failure(id: &str, model: &str, err: &Error) -> StreamChunk {
    error!("sse connection failed: {err}");
    let mut error = ChunkError::new(err.to_string());
    if let Error::Http(source) = err {
        if let Some(status) = source.status() {
            error = error.with_code(status.as_u16().to_string());
        }
    }
    StreamChunk::error(id, model, error)
}
