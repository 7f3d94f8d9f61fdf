use chatloop_model::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The canonical unit of a transcript.
///
/// A message is never mutated once it is shared. Updates build a new
/// message and replace the old one in the list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UIMessage {
    /// The unique message id.
    pub id: String,
    /// Who wrote the message.
    pub role: Role,
    /// The ordered content of the message.
    pub parts: Vec<MessagePart>,
    /// When the message was created.
    pub created_at: DateTime<Utc>,
}

impl UIMessage {
    /// Creates an empty message with a fresh id.
    pub fn new(role: Role) -> Self {
        Self {
            id: crate::generate_id("msg"),
            role,
            parts: vec![],
            created_at: Utc::now(),
        }
    }

    /// Creates a message holding one text part.
    pub fn text<S: Into<String>>(role: Role, content: S) -> Self {
        let mut msg = Self::new(role);
        msg.parts.push(MessagePart::Text {
            content: content.into(),
        });
        msg
    }

    /// Overrides the id.
    #[inline]
    pub fn with_id<S: Into<String>>(mut self, id: S) -> Self {
        self.id = id.into();
        self
    }

    /// Iterates over the tool call parts.
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallPart> {
        self.parts.iter().filter_map(|part| match part {
            MessagePart::ToolCall(call) => Some(call),
            _ => None,
        })
    }

    /// Finds a tool call part by its id.
    pub fn tool_call(&self, id: &str) -> Option<&ToolCallPart> {
        self.tool_calls().find(|call| call.id == id)
    }

    /// Iterates over the text parts.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|part| match part {
            MessagePart::Text { content } => Some(content.as_str()),
            _ => None,
        })
    }
}

/// A piece of a [`UIMessage`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    /// A text segment.
    Text {
        /// The segment text.
        content: String,
    },
    /// Reasoning text.
    Thinking {
        /// The reasoning so far.
        content: String,
    },
    /// A tool call made by the assistant.
    ToolCall(ToolCallPart),
    /// The result of a tool call.
    ToolResult(ToolResultPart),
}

/// The lifecycle of a tool call.
///
/// The variants are ordered, and a part never moves to an earlier state.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum ToolCallState {
    /// The call has started but no arguments arrived yet.
    AwaitingInput,
    /// Arguments are arriving.
    InputStreaming,
    /// All arguments have been received.
    InputComplete,
    /// Waiting for a human decision.
    ApprovalRequested,
    /// The decision has been recorded.
    ApprovalResponded,
}

/// The approval gate of a tool call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolApproval {
    /// The approval id.
    pub id: String,
    /// Whether the call needs approval.
    pub needs_approval: bool,
    /// The decision, once made.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,
}

/// A tool call inside a transcript.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallPart {
    /// The tool call id, unique across the transcript.
    pub id: String,
    /// The tool name.
    pub name: String,
    /// The raw JSON arguments, possibly incomplete.
    pub arguments: String,
    /// Where the call is in its lifecycle.
    pub state: ToolCallState,
    /// The best-effort parse of `arguments`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_arguments: Option<Value>,
    /// The tool output, once known. Errors are stored as `{"error": ..}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// The approval gate, if the call has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ToolApproval>,
}

impl ToolCallPart {
    /// Creates a part with no output and no approval.
    pub fn new<ID, N, A>(
        id: ID,
        name: N,
        arguments: A,
        state: ToolCallState,
    ) -> Self
    where
        ID: Into<String>,
        N: Into<String>,
        A: Into<String>,
    {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
            state,
            parsed_arguments: None,
            output: None,
            approval: None,
        }
    }

    /// Returns `true` if nothing is pending for this call: either the
    /// approval is answered, or an output exists with no approval gate.
    pub fn is_terminal(&self) -> bool {
        self.state == ToolCallState::ApprovalResponded
            || (self.output.is_some() && self.approval.is_none())
    }
}

/// The state of a tool result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolResultState {
    /// Reserved for results that stream.
    Streaming,
    /// The result is final.
    Complete,
    /// The tool failed.
    Error,
}

/// The result of a tool call inside a transcript.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultPart {
    /// The call this result answers.
    pub tool_call_id: String,
    /// The result encoded as text.
    pub content: String,
    /// The result state.
    pub state: ToolResultState,
    /// The error message, if the tool failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_part_wire_shape() {
        let mut call = ToolCallPart::new(
            "call_1",
            "get_weather",
            "{}",
            ToolCallState::ApprovalRequested,
        );
        call.approval = Some(ToolApproval {
            id: "approval_call_1".to_owned(),
            needs_approval: true,
            approved: None,
        });
        assert_eq!(
            serde_json::to_value(MessagePart::ToolCall(call)).unwrap(),
            json!({
                "type": "tool-call",
                "id": "call_1",
                "name": "get_weather",
                "arguments": "{}",
                "state": "approval-requested",
                "approval": { "id": "approval_call_1", "needsApproval": true }
            })
        );
        assert_eq!(
            serde_json::to_value(MessagePart::Text { content: "hi".into() })
                .unwrap(),
            json!({ "type": "text", "content": "hi" })
        );
    }

    #[test]
    fn test_state_order() {
        assert!(ToolCallState::AwaitingInput < ToolCallState::InputStreaming);
        assert!(
            ToolCallState::InputComplete < ToolCallState::ApprovalRequested
        );
        assert_eq!(
            ToolCallState::InputComplete.max(ToolCallState::InputStreaming),
            ToolCallState::InputComplete
        );
    }
}
