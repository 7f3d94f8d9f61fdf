use std::pin::Pin;
use std::sync::Arc;

use futures_util::Stream;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{ModelMessage, StreamChunk, ToolDescriptor};

/// A boxed stream of chunks returned by [`ChatAdapter::chat_stream`].
pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// The input of one model turn.
#[derive(Clone, Debug)]
pub struct ChatStreamOptions {
    /// The model to sample from.
    pub model: String,
    /// The full conversation history, system prompts included.
    pub messages: Vec<ModelMessage>,
    /// Tools the model may call.
    pub tools: Vec<ToolDescriptor>,
    /// Opaque, adapter-specific options.
    pub provider_options: Value,
    /// Cancelled when the caller aborts the conversation.
    pub signal: CancellationToken,
}

impl ChatStreamOptions {
    /// Creates options with no tools and empty provider options.
    pub fn new<M: Into<String>>(model: M, messages: Vec<ModelMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: vec![],
            provider_options: Value::Null,
            signal: CancellationToken::new(),
        }
    }
}

/// A type that talks to one model provider and translates its native
/// output into [`StreamChunk`]s.
///
/// Implementations must:
///
/// - emit chunks in the order the provider produced them;
/// - terminate each turn with exactly one `done` or `error` chunk;
/// - end the stream promptly once `signal` is cancelled.
///
/// Once created, an adapter should behave like a stateless object. It can
/// still have internal state, but callers should not rely on it.
pub trait ChatAdapter: Send + Sync {
    /// Returns the adapter name, used in logs and recordings.
    fn name(&self) -> &str;

    /// Starts one model turn.
    fn chat_stream(&self, options: ChatStreamOptions) -> ChunkStream;
}

impl<A: ChatAdapter + ?Sized> ChatAdapter for Arc<A> {
    #[inline]
    fn name(&self) -> &str {
        (**self).name()
    }

    #[inline]
    fn chat_stream(&self, options: ChatStreamOptions) -> ChunkStream {
        (**self).chat_stream(options)
    }
}
