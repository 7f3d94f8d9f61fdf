//! Lifecycle events of a [`ChatEngine`](crate::ChatEngine) run.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chatloop_model::{FinishReason, Usage};
use serde_json::Value;
use tokio::sync::mpsc;

/// Something that happened while a chat was running.
///
/// Events describe the run for observers such as devtools or metrics.
/// They are sent alongside the chunk stream, never instead of it.
#[derive(Clone, Debug, PartialEq)]
pub enum ChatEvent {
    /// The run has started.
    ChatStarted {
        /// The id of the run.
        request_id: String,
        /// The requested model.
        model: String,
        /// The number of messages supplied by the caller.
        message_count: usize,
        /// Whether any tool is offered.
        has_tools: bool,
    },
    /// The chunk stream has started.
    StreamStarted {
        /// The id of the chunk stream.
        stream_id: String,
        /// The requested model.
        model: String,
        /// The adapter name.
        provider: String,
    },
    /// A content chunk was forwarded.
    StreamChunkContent {
        /// The id of the chunk stream.
        stream_id: String,
        /// The id of the assistant turn.
        message_id: Option<String>,
        /// The text so far.
        content: String,
        /// The new text.
        delta: String,
    },
    /// A tool call chunk was forwarded.
    StreamChunkToolCall {
        /// The id of the chunk stream.
        stream_id: String,
        /// The id of the assistant turn.
        message_id: Option<String>,
        /// The call id, empty for continuation fragments.
        tool_call_id: String,
        /// The tool name, empty for continuation fragments.
        tool_name: String,
        /// The provider index of the call.
        index: usize,
        /// The arguments fragment.
        arguments: String,
    },
    /// A tool result chunk was forwarded.
    StreamChunkToolResult {
        /// The id of the chunk stream.
        stream_id: String,
        /// The id of the assistant turn.
        message_id: Option<String>,
        /// The call the result answers.
        tool_call_id: String,
        /// The encoded result.
        result: String,
    },
    /// A done chunk was forwarded.
    StreamChunkDone {
        /// The id of the chunk stream.
        stream_id: String,
        /// The id of the assistant turn.
        message_id: Option<String>,
        /// The reported finish reason.
        finish_reason: Option<FinishReason>,
        /// The reported usage.
        usage: Option<Usage>,
    },
    /// An error chunk was forwarded.
    StreamChunkError {
        /// The id of the chunk stream.
        stream_id: String,
        /// The id of the assistant turn.
        message_id: Option<String>,
        /// The error message.
        error: String,
    },
    /// A batch of tool calls is about to be resolved.
    ChatIteration {
        /// The id of the run.
        request_id: String,
        /// The 1-based iteration number.
        iteration_number: usize,
        /// The history length.
        message_count: usize,
        /// The number of calls in the batch.
        tool_call_count: usize,
    },
    /// A tool call is waiting for approval.
    StreamApprovalRequested {
        /// The id of the chunk stream.
        stream_id: String,
        /// The id of the assistant turn.
        message_id: Option<String>,
        /// The waiting call.
        tool_call_id: String,
        /// The tool name.
        tool_name: String,
        /// The parsed arguments.
        input: Value,
        /// The id the decision must be recorded under.
        approval_id: String,
    },
    /// A client tool is ready to run.
    StreamToolInputAvailable {
        /// The id of the chunk stream.
        stream_id: String,
        /// The call to execute.
        tool_call_id: String,
        /// The tool name.
        tool_name: String,
        /// The parsed arguments.
        input: Value,
    },
    /// A tool call got its result.
    ToolCallCompleted {
        /// The id of the chunk stream.
        stream_id: String,
        /// The call id.
        tool_call_id: String,
        /// The tool name.
        tool_name: String,
        /// The output.
        result: Value,
        /// How long the tool ran.
        duration: Duration,
    },
    /// The run has finished normally.
    StreamEnded {
        /// The id of the chunk stream.
        stream_id: String,
        /// The number of chunks received from the adapter.
        total_chunks: usize,
        /// The wall time of the run.
        duration: Duration,
    },
}

impl ChatEvent {
    /// Returns the name of the event, such as `stream:chunk:content`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ChatStarted { .. } => "chat:started",
            Self::StreamStarted { .. } => "stream:started",
            Self::StreamChunkContent { .. } => "stream:chunk:content",
            Self::StreamChunkToolCall { .. } => "stream:chunk:tool-call",
            Self::StreamChunkToolResult { .. } => "stream:chunk:tool-result",
            Self::StreamChunkDone { .. } => "stream:chunk:done",
            Self::StreamChunkError { .. } => "stream:chunk:error",
            Self::ChatIteration { .. } => "chat:iteration",
            Self::StreamApprovalRequested { .. } => {
                "stream:approval-requested"
            }
            Self::StreamToolInputAvailable { .. } => {
                "stream:tool-input-available"
            }
            Self::ToolCallCompleted { .. } => "tool:call-completed",
            Self::StreamEnded { .. } => "stream:ended",
        }
    }
}

/// Receives [`ChatEvent`]s.
///
/// Events are delivered synchronously from the task polling the chat
/// stream. Implementations should return quickly.
pub trait ChatEventSink: Send + Sync {
    /// Handles one event.
    fn on_event(&self, event: ChatEvent);
}

impl<F> ChatEventSink for F
where
    F: Fn(ChatEvent) + Send + Sync,
{
    #[inline]
    fn on_event(&self, event: ChatEvent) {
        self(event)
    }
}

impl ChatEventSink for mpsc::UnboundedSender<ChatEvent> {
    #[inline]
    fn on_event(&self, event: ChatEvent) {
        // The receiver may have gone away, which is fine.
        self.send(event).ok();
    }
}

/// Discards every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopEventSink;

impl ChatEventSink for NoopEventSink {
    #[inline]
    fn on_event(&self, _event: ChatEvent) {}
}

/// Logs every event with `tracing`. This is the default sink.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEventSink;

impl ChatEventSink for TracingEventSink {
    fn on_event(&self, event: ChatEvent) {
        match &event {
            ChatEvent::StreamChunkContent { .. }
            | ChatEvent::StreamChunkToolCall { .. } => {
                trace!("chat event: {}", event.name());
            }
            ChatEvent::StreamChunkError { error, .. } => {
                debug!("chat event: {}: {error}", event.name());
            }
            _ => debug!("chat event: {}", event.name()),
        }
    }
}

/// Keeps every event in memory.
///
/// Clones share the same buffer, so a clone can be handed to the engine
/// while the original is used to inspect the events.
#[derive(Clone, Debug, Default)]
pub struct RecordingEventSink {
    events: Arc<Mutex<Vec<ChatEvent>>>,
}

impl RecordingEventSink {
    /// Creates an empty sink.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the events received so far.
    pub fn events(&self) -> Vec<ChatEvent> {
        self.lock().clone()
    }

    /// Returns the names of the events received so far.
    pub fn names(&self) -> Vec<&'static str> {
        self.lock().iter().map(ChatEvent::name).collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ChatEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ChatEventSink for RecordingEventSink {
    #[inline]
    fn on_event(&self, event: ChatEvent) {
        self.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sinks() {
        let recording = RecordingEventSink::new();
        let sink: Arc<dyn ChatEventSink> = Arc::new(recording.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let event = ChatEvent::StreamEnded {
            stream_id: "stream-1".to_owned(),
            total_chunks: 3,
            duration: Duration::from_millis(10),
        };
        sink.on_event(event.clone());
        tx.on_event(event.clone());
        NoopEventSink.on_event(event.clone());

        assert_eq!(recording.names(), ["stream:ended"]);
        assert_eq!(rx.try_recv().unwrap(), event);
    }
}
