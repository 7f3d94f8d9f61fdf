use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ChunkError, Role, ToolCall};

/// The reason why a model turn has finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The model has finished generating text.
    Stop,
    /// The model needs to call tools.
    ToolCalls,
    /// The output hit the token limit.
    Length,
    /// The output was filtered by the provider.
    ContentFilter,
}

impl FinishReason {
    /// Returns the wire name of the reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::ToolCalls => "tool_calls",
            Self::Length => "length",
            Self::ContentFilter => "content_filter",
        }
    }
}

/// Token accounting reported with the final chunk of a turn.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    /// Tokens in the prompt.
    pub prompt_tokens: u64,
    /// Tokens in the completion.
    pub completion_tokens: u64,
    /// The sum of both.
    pub total_tokens: u64,
}

/// The approval gate attached to an `approval-requested` chunk.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalInfo {
    /// The approval id, distinct from the tool call id.
    pub id: String,
    /// Always `true` on requests.
    pub needs_approval: bool,
}

/// One unit of the streaming protocol between an adapter and its consumers.
///
/// Every chunk carries the id of the response it belongs to, the model
/// name and a millisecond timestamp. The payload lives in [`ChunkKind`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// The response id, shared by all chunks of one turn.
    pub id: String,
    /// The model that produced the chunk.
    pub model: String,
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
    /// The payload.
    #[serde(flatten)]
    pub kind: ChunkKind,
}

/// The payload of a [`StreamChunk`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChunkKind {
    /// Assistant text.
    ///
    /// Providers may report the increment in `delta`, the full text so
    /// far in `content`, or both.
    #[serde(rename = "content")]
    Content {
        /// The new text since the previous chunk.
        #[serde(default)]
        delta: String,
        /// The full text so far, as the provider sees it.
        #[serde(default)]
        content: String,
        /// The author, usually the assistant.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<Role>,
    },
    /// A (possibly partial) tool call.
    #[serde(rename = "tool_call")]
    ToolCall {
        /// The call fragment. Continuations may only carry arguments.
        #[serde(rename = "toolCall")]
        tool_call: ToolCall,
        /// The provider-local position of the call within the turn.
        #[serde(default)]
        index: usize,
    },
    /// The result of a tool executed on the server side.
    #[serde(rename = "tool_result")]
    ToolResult {
        /// The call this result answers.
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        /// The result encoded as text.
        content: String,
    },
    /// Reasoning text.
    #[serde(rename = "thinking")]
    Thinking {
        /// The new text since the previous chunk.
        #[serde(default)]
        delta: String,
        /// The full reasoning text so far.
        #[serde(default)]
        content: String,
    },
    /// The end of a turn.
    #[serde(rename = "done")]
    Done {
        /// Why the turn has finished.
        #[serde(rename = "finishReason", default)]
        finish_reason: Option<FinishReason>,
        /// Token accounting, if the provider reports it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
    /// An adapter failure. Terminates the turn.
    #[serde(rename = "error")]
    Error {
        /// The error details.
        error: ChunkError,
    },
    /// A tool call is waiting for a human decision.
    #[serde(rename = "approval-requested")]
    ApprovalRequested {
        /// The call waiting for approval.
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        /// The name of the tool.
        #[serde(rename = "toolName")]
        tool_name: String,
        /// The parsed arguments.
        input: Value,
        /// The approval gate.
        approval: ApprovalInfo,
    },
    /// A client tool call is ready to be executed by the caller.
    #[serde(rename = "tool-input-available")]
    ToolInputAvailable {
        /// The call to execute.
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        /// The name of the tool.
        #[serde(rename = "toolName")]
        tool_name: String,
        /// The parsed arguments.
        input: Value,
    },
}

impl ChunkKind {
    /// Returns the wire tag of the payload.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Content { .. } => "content",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Thinking { .. } => "thinking",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
            Self::ApprovalRequested { .. } => "approval-requested",
            Self::ToolInputAvailable { .. } => "tool-input-available",
        }
    }
}

impl StreamChunk {
    /// Creates a chunk stamped with the current time.
    #[inline]
    pub fn new<ID, M>(id: ID, model: M, kind: ChunkKind) -> Self
    where
        ID: Into<String>,
        M: Into<String>,
    {
        Self {
            id: id.into(),
            model: model.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            kind,
        }
    }

    /// Overrides the timestamp.
    #[inline]
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Creates a content chunk.
    pub fn content<ID, M, D, C>(id: ID, model: M, delta: D, content: C) -> Self
    where
        ID: Into<String>,
        M: Into<String>,
        D: Into<String>,
        C: Into<String>,
    {
        Self::new(
            id,
            model,
            ChunkKind::Content {
                delta: delta.into(),
                content: content.into(),
                role: Some(Role::Assistant),
            },
        )
    }

    /// Creates a tool call chunk.
    pub fn tool_call<ID, M>(
        id: ID,
        model: M,
        tool_call: ToolCall,
        index: usize,
    ) -> Self
    where
        ID: Into<String>,
        M: Into<String>,
    {
        Self::new(id, model, ChunkKind::ToolCall { tool_call, index })
    }

    /// Creates a done chunk.
    pub fn done<ID, M>(
        id: ID,
        model: M,
        finish_reason: Option<FinishReason>,
    ) -> Self
    where
        ID: Into<String>,
        M: Into<String>,
    {
        Self::new(
            id,
            model,
            ChunkKind::Done {
                finish_reason,
                usage: None,
            },
        )
    }

    /// Creates an error chunk.
    pub fn error<ID, M>(id: ID, model: M, error: ChunkError) -> Self
    where
        ID: Into<String>,
        M: Into<String>,
    {
        Self::new(id, model, ChunkKind::Error { error })
    }

    /// Returns the finish reason if this is a `done` chunk.
    #[inline]
    pub fn finish_reason(&self) -> Option<FinishReason> {
        match &self.kind {
            ChunkKind::Done { finish_reason, .. } => *finish_reason,
            _ => None,
        }
    }

    /// Returns `true` if this chunk ends a turn.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, ChunkKind::Done { .. } | ChunkKind::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_chunk_wire_shape() {
        let chunk = StreamChunk::content("r1", "m", "lo", "Hello")
            .with_timestamp(7);
        assert_eq!(
            serde_json::to_value(&chunk).unwrap(),
            json!({
                "id": "r1",
                "model": "m",
                "timestamp": 7,
                "type": "content",
                "delta": "lo",
                "content": "Hello",
                "role": "assistant"
            })
        );

        let chunk =
            StreamChunk::done("r1", "m", Some(FinishReason::ToolCalls))
                .with_timestamp(8);
        assert_eq!(
            serde_json::to_value(&chunk).unwrap(),
            json!({
                "id": "r1",
                "model": "m",
                "timestamp": 8,
                "type": "done",
                "finishReason": "tool_calls"
            })
        );
    }

    #[test]
    fn test_parse_approval_chunk() {
        let chunk: StreamChunk = serde_json::from_value(json!({
            "id": "r1",
            "model": "m",
            "timestamp": 1,
            "type": "approval-requested",
            "toolCallId": "call_1",
            "toolName": "delete_file",
            "input": { "path": "/tmp/x" },
            "approval": { "id": "approval_call_1", "needsApproval": true }
        }))
        .unwrap();
        let ChunkKind::ApprovalRequested { approval, input, .. } = &chunk.kind
        else {
            panic!("unexpected chunk: {chunk:?}");
        };
        assert_eq!(approval.id, "approval_call_1");
        assert_eq!(input["path"], "/tmp/x");
        assert_eq!(chunk.kind.type_name(), "approval-requested");
        assert!(!chunk.is_terminal());
    }

    #[test]
    fn test_parse_sparse_fragments() {
        // Continuation fragments and null finish reasons are common.
        let chunk: StreamChunk = serde_json::from_value(json!({
            "id": "r1",
            "model": "m",
            "timestamp": 1,
            "type": "tool_call",
            "toolCall": { "function": { "arguments": "\"NYC\"}" } },
            "index": 1
        }))
        .unwrap();
        assert!(matches!(chunk.kind, ChunkKind::ToolCall { index: 1, .. }));

        let chunk: StreamChunk = serde_json::from_value(json!({
            "id": "r1",
            "model": "m",
            "timestamp": 1,
            "type": "done",
            "finishReason": null
        }))
        .unwrap();
        assert!(chunk.is_terminal());
        assert_eq!(chunk.finish_reason(), None);
    }
}
