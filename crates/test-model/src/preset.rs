use chatloop_model::{ChunkError, FinishReason, ToolCall};
use serde::{Deserialize, Serialize};

/// The events in a preset response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PresetEvent {
    /// A text delta.
    #[serde(rename = "content")]
    Content(String),
    /// A reasoning delta.
    #[serde(rename = "thinking")]
    Thinking(String),
    /// A tool call fragment. A fragment with an empty id continues the
    /// previous call.
    #[serde(rename = "tool_call")]
    ToolCall(ToolCall),
    /// A result of a tool executed on the provider side.
    #[serde(rename = "tool_result")]
    ToolResult {
        /// The call this result answers.
        tool_call_id: String,
        /// The result encoded as text.
        content: String,
    },
    /// An explicit `done` chunk. Without one, a `done` chunk is appended
    /// automatically.
    #[serde(rename = "done")]
    Done(FinishReason),
    /// An `error` chunk, which ends the response.
    #[serde(rename = "error")]
    Error(ChunkError),
}

/// The preset response for one assistant turn.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetResponse {
    /// Events in this response.
    pub events: Vec<PresetEvent>,
    /// If set, the first `failures` requests for this turn only yield an
    /// error chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failures: Option<u64>,
}

impl PresetResponse {
    /// Creates a `PresetResponse` with the specified events.
    #[inline]
    pub fn with_events(events: impl Into<Vec<PresetEvent>>) -> Self {
        Self {
            events: events.into(),
            failures: None,
        }
    }

    /// Creates a response streaming `text` word by word.
    pub fn text<S: AsRef<str>>(text: S) -> Self {
        let events = text
            .as_ref()
            .split_inclusive(' ')
            .map(|word| PresetEvent::Content(word.to_owned()))
            .collect::<Vec<_>>();
        Self::with_events(events)
    }

    /// Sets the number of failed attempts before a successful response.
    #[inline]
    pub fn with_failures(mut self, failures: u64) -> Self {
        self.failures = Some(failures);
        self
    }

    /// Returns `true` if the response contains a tool call.
    pub fn has_tool_calls(&self) -> bool {
        self.events
            .iter()
            .any(|event| matches!(event, PresetEvent::ToolCall(_)))
    }
}
