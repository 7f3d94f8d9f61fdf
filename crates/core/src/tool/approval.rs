use std::collections::HashMap;
use std::sync::Arc;

use chatloop_stream::{ToolCallState, UIMessage};
use serde_json::Value;

/// Returns the approval id the engine assigns to a tool call.
#[inline]
pub fn approval_id_for(tool_call_id: &str) -> String {
    format!("approval_{tool_call_id}")
}

/// A tool call waiting for a human decision.
#[derive(Clone, Debug, PartialEq)]
pub struct ApprovalRequest {
    /// The call waiting for approval.
    pub tool_call_id: String,
    /// The tool name.
    pub tool_name: String,
    /// The parsed arguments.
    pub input: Value,
    /// The id the decision must be recorded under.
    pub approval_id: String,
}

/// A tool call the caller has to execute.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientToolRequest {
    /// The call to execute.
    pub tool_call_id: String,
    /// The tool name.
    pub tool_name: String,
    /// The parsed arguments.
    pub input: Value,
}

/// Decisions and results supplied by the caller between two engine runs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClientState {
    /// Approval decisions, keyed by approval id.
    pub approvals: HashMap<String, bool>,
    /// Client tool outputs, keyed by tool call id.
    pub client_results: HashMap<String, Value>,
}

impl ClientState {
    /// Creates an empty state.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an approval decision.
    #[inline]
    pub fn with_approval<S: Into<String>>(
        mut self,
        approval_id: S,
        approved: bool,
    ) -> Self {
        self.approvals.insert(approval_id.into(), approved);
        self
    }

    /// Records the output of a client tool.
    #[inline]
    pub fn with_client_result<S: Into<String>>(
        mut self,
        tool_call_id: S,
        output: Value,
    ) -> Self {
        self.client_results.insert(tool_call_id.into(), output);
        self
    }

    /// Collects the decisions and outputs stored in a transcript.
    ///
    /// Answered approvals are taken from calls in the approval-responded
    /// state. Outputs are taken from every call that has one, unless its
    /// approval was declined.
    pub fn from_ui_messages(messages: &[Arc<UIMessage>]) -> Self {
        let mut state = Self::new();
        let calls = messages.iter().flat_map(|msg| msg.tool_calls());
        for call in calls {
            let decision = call.approval.as_ref().and_then(|approval| {
                approval.approved.map(|approved| (&approval.id, approved))
            });
            if call.state == ToolCallState::ApprovalResponded {
                if let Some((id, approved)) = decision {
                    state.approvals.insert(id.clone(), approved);
                }
            }

            let declined = matches!(decision, Some((_, false)));
            if let (Some(output), false) = (&call.output, declined) {
                state
                    .client_results
                    .insert(call.id.clone(), output.clone());
            }
        }
        state
    }
}
