use chatloop_model::{FinishReason, StreamChunk, ToolCall};
use futures_util::Stream;
use serde::{Deserialize, Serialize};

/// The current recording format version.
pub const RECORDING_VERSION: &str = "1.0";

/// The outcome of processing one stream.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorResult {
    /// All text of the stream, across segments.
    pub content: String,
    /// The reasoning text, if there was any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    /// The completed tool calls in order of first appearance, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// The last finish reason seen.
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

/// One captured chunk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordedChunk {
    /// The chunk as received.
    pub chunk: StreamChunk,
    /// When it was received, in Unix milliseconds.
    pub timestamp: i64,
    /// Its position in the stream.
    pub index: usize,
}

/// An ordered capture of every chunk of a stream.
///
/// Feeding the chunks to a fresh processor reproduces
/// [`ChunkRecording::result`] exactly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecording {
    /// The format version, always `"1.0"`.
    pub version: String,
    /// When the recording started, in Unix milliseconds.
    pub timestamp: i64,
    /// The model that produced the chunks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// The adapter that produced the chunks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// The captured chunks.
    pub chunks: Vec<RecordedChunk>,
    /// The result computed when the recording was made.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ProcessorResult>,
}

impl ChunkRecording {
    /// Creates an empty recording starting now.
    pub fn new() -> Self {
        Self {
            version: RECORDING_VERSION.to_owned(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            model: None,
            provider: None,
            chunks: vec![],
            result: None,
        }
    }

    /// Creates a recording of the given chunks, stamping them with their
    /// own timestamps.
    pub fn from_chunks<I: IntoIterator<Item = StreamChunk>>(chunks: I) -> Self {
        let mut recording = Self::new();
        for chunk in chunks {
            recording.push(chunk);
        }
        recording
    }

    /// Sets the provider name.
    #[inline]
    pub fn with_provider<S: Into<String>>(mut self, provider: S) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Appends a chunk, stamped with its own timestamp.
    #[inline]
    pub fn push(&mut self, chunk: StreamChunk) {
        let timestamp = chunk.timestamp;
        self.push_at(chunk, timestamp);
    }

    /// Appends a chunk received at `timestamp`.
    pub fn push_at(&mut self, chunk: StreamChunk, timestamp: i64) {
        if self.model.is_none() && !chunk.model.is_empty() {
            self.model = Some(chunk.model.clone());
        }
        let index = self.chunks.len();
        self.chunks.push(RecordedChunk {
            chunk,
            timestamp,
            index,
        });
    }

    /// Iterates over the chunks in order.
    pub fn iter_chunks(&self) -> impl Iterator<Item = &StreamChunk> {
        self.chunks.iter().map(|recorded| &recorded.chunk)
    }
}

impl Default for ChunkRecording {
    fn default() -> Self {
        Self::new()
    }
}

/// Turns a recording back into a chunk stream.
pub fn replay_stream(
    recording: &ChunkRecording,
) -> impl Stream<Item = StreamChunk> + Send + 'static {
    let chunks: Vec<_> = recording.iter_chunks().cloned().collect();
    futures_util::stream::iter(chunks)
}
