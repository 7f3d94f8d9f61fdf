use std::sync::Arc;

use chatloop_model::ChunkError;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{MessageList, ToolCallState, UIMessage};

/// A change observed by a [`StreamProcessor`](crate::StreamProcessor).
#[derive(Clone, Debug)]
pub enum ProcessorEvent {
    /// The message list was replaced.
    MessagesChanged(MessageList),
    /// A new assistant message was started.
    StreamStarted {
        /// The id of the new message.
        message_id: String,
    },
    /// The stream was finalized.
    StreamEnded(Arc<UIMessage>),
    /// The adapter reported an error.
    Error(ChunkError),
    /// A client tool is ready to run.
    ToolInputAvailable {
        /// The call to execute.
        tool_call_id: String,
        /// The tool name.
        tool_name: String,
        /// The parsed arguments.
        input: Value,
    },
    /// A tool call needs approval.
    ApprovalRequested {
        /// The call waiting for approval.
        tool_call_id: String,
        /// The tool name.
        tool_name: String,
        /// The parsed arguments.
        input: Value,
        /// The id to answer with.
        approval_id: String,
    },
    /// The current text segment changed.
    TextUpdated {
        /// The message being streamed.
        message_id: String,
        /// The whole segment text.
        content: String,
    },
    /// A tool call changed its state or arguments.
    ToolCallStateChanged {
        /// The message holding the call.
        message_id: String,
        /// The call id.
        tool_call_id: String,
        /// The new state.
        state: ToolCallState,
        /// All arguments received so far.
        arguments: String,
    },
    /// The thinking text changed.
    ThinkingUpdated {
        /// The message being streamed.
        message_id: String,
        /// The whole thinking text.
        content: String,
    },
}

impl ProcessorEvent {
    /// Returns a short name of the event, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MessagesChanged(_) => "messages changed",
            Self::StreamStarted { .. } => "stream started",
            Self::StreamEnded(_) => "stream ended",
            Self::Error(_) => "error",
            Self::ToolInputAvailable { .. } => "tool input available",
            Self::ApprovalRequested { .. } => "approval requested",
            Self::TextUpdated { .. } => "text updated",
            Self::ToolCallStateChanged { .. } => "tool call state changed",
            Self::ThinkingUpdated { .. } => "thinking updated",
        }
    }
}

/// Receives [`ProcessorEvent`]s.
///
/// Events are delivered synchronously, in the order the changes happen.
/// Implementations should return quickly.
pub trait ProcessorEventSink: Send + Sync {
    /// Handles one event.
    fn on_event(&self, event: ProcessorEvent);
}

impl<F> ProcessorEventSink for F
where
    F: Fn(ProcessorEvent) + Send + Sync,
{
    #[inline]
    fn on_event(&self, event: ProcessorEvent) {
        self(event)
    }
}

impl ProcessorEventSink for mpsc::UnboundedSender<ProcessorEvent> {
    #[inline]
    fn on_event(&self, event: ProcessorEvent) {
        // The receiver may have gone away, which is fine.
        self.send(event).ok();
    }
}

/// Discards every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopProcessorSink;

impl ProcessorEventSink for NoopProcessorSink {
    #[inline]
    fn on_event(&self, _event: ProcessorEvent) {}
}

/// Logs every event with `tracing`. This is the default sink.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingProcessorSink;

impl ProcessorEventSink for TracingProcessorSink {
    fn on_event(&self, event: ProcessorEvent) {
        match &event {
            ProcessorEvent::Error(err) => {
                debug!("processor event: {}: {err}", event.name());
            }
            ProcessorEvent::MessagesChanged(messages) => {
                let count = messages.len();
                trace!("processor event: {} ({count})", event.name());
            }
            _ => trace!("processor event: {}", event.name()),
        }
    }
}
