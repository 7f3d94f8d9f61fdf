use std::time::{Duration, Instant};

use chatloop_model::ToolCall;
use serde_json::{Value, json};
use tracing::Instrument;

use super::{
    ApprovalRequest, ClientState, ClientToolRequest, Error, ToolSet,
    approval_id_for,
};
use crate::ChatError;

/// Whether a tool call produced an output or failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ToolOutputState {
    /// The tool produced an output.
    OutputAvailable,
    /// The tool failed, was unknown, or was declined.
    OutputError,
}

/// The resolved outcome of one tool call.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCallResult {
    /// The call this result answers.
    pub tool_call_id: String,
    /// The tool name.
    pub tool_name: String,
    /// The output, `{"error": reason}` on failure.
    pub result: Value,
    /// Whether the call succeeded.
    pub state: ToolOutputState,
    /// How long the tool ran, zero if the engine didn't run it.
    pub duration: Duration,
}

impl ToolCallResult {
    fn output(call: &ToolCall, result: Value) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.name().to_owned(),
            result,
            state: ToolOutputState::OutputAvailable,
            duration: Duration::ZERO,
        }
    }

    fn error<S: AsRef<str>>(call: &ToolCall, reason: S) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.name().to_owned(),
            result: json!({ "error": reason.as_ref() }),
            state: ToolOutputState::OutputError,
            duration: Duration::ZERO,
        }
    }

    /// Returns `true` if the call failed.
    #[inline]
    pub fn is_error(&self) -> bool {
        self.state == ToolOutputState::OutputError
    }

    /// Returns the result the way it is sent back to the model: strings
    /// verbatim, anything else as JSON.
    pub fn content(&self) -> String {
        match &self.result {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// The outcome of a batch of tool calls.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ToolExecutionResult {
    /// Calls that are resolved, in call order.
    pub results: Vec<ToolCallResult>,
    /// Calls waiting for a human decision.
    pub needs_approval: Vec<ApprovalRequest>,
    /// Calls the caller has to execute.
    pub needs_client_execution: Vec<ClientToolRequest>,
}

impl ToolExecutionResult {
    /// Returns `true` if any call is still waiting on the caller.
    #[inline]
    pub fn is_waiting(&self) -> bool {
        !self.needs_approval.is_empty()
            || !self.needs_client_execution.is_empty()
    }
}

fn parse_arguments(call: &ToolCall) -> Result<Value, ChatError> {
    let raw = call.arguments().trim();
    let raw = if raw.is_empty() { "{}" } else { raw };
    serde_json::from_str(raw).map_err(|source| {
        ChatError::InvalidToolArguments {
            tool_call_id: call.id.clone(),
            tool_name: call.name().to_owned(),
            arguments: call.arguments().to_owned(),
            source,
        }
    })
}

/// Resolves a batch of tool calls.
///
/// Every call is classified by whether its tool runs on the server and
/// whether it needs approval. Server tools that are allowed to run are
/// executed in call order. Calls that need a decision or a client result
/// the caller has not supplied yet are returned as requests instead.
///
/// Unknown tools and failed executions become error results. Arguments
/// that are not valid JSON fail the whole batch.
pub async fn execute_tool_calls(
    tool_calls: &[ToolCall],
    tools: &ToolSet,
    client_state: &ClientState,
) -> Result<ToolExecutionResult, ChatError> {
    let mut outcome = ToolExecutionResult::default();

    async {
        for call in tool_calls {
            let Some(tool) = tools.get(call.name()) else {
                warn!("tool not found: {}", call.name());
                let reason = format!("Unknown tool: {}", call.name());
                outcome.results.push(ToolCallResult::error(call, reason));
                continue;
            };
            let input = parse_arguments(call)?;

            if tool.definition.needs_approval {
                let approval_id = approval_id_for(&call.id);
                match client_state.approvals.get(&approval_id) {
                    None => {
                        debug!("tool call ({}) needs approval", call.id);
                        outcome.needs_approval.push(ApprovalRequest {
                            tool_call_id: call.id.clone(),
                            tool_name: call.name().to_owned(),
                            input,
                            approval_id,
                        });
                        continue;
                    }
                    Some(false) => {
                        debug!("tool call ({}) declined", call.id);
                        let err = Error::user_declined();
                        let result = ToolCallResult::error(call, err.reason());
                        outcome.results.push(result);
                        continue;
                    }
                    Some(true) => {}
                }
            }

            let Some(handler) = tool.handler() else {
                match client_state.client_results.get(&call.id) {
                    Some(output) => {
                        let result = output.clone();
                        let result = ToolCallResult::output(call, result);
                        outcome.results.push(result);
                    }
                    None => {
                        debug!("tool call ({}) runs on the client", call.id);
                        outcome.needs_client_execution.push(ClientToolRequest {
                            tool_call_id: call.id.clone(),
                            tool_name: call.name().to_owned(),
                            input,
                        });
                    }
                }
                continue;
            };

            trace!("executing a tool ({}) with args: {input:?}", call.id);
            let span = debug_span!("tool execute", tool = call.name());
            let started_at = Instant::now();
            let output = handler.execute(input).instrument(span).await;
            let mut result = match output {
                Ok(output) => ToolCallResult::output(call, output),
                Err(err) => {
                    debug!("tool call ({}) failed: {err}", call.id);
                    ToolCallResult::error(call, err.reason())
                }
            };
            result.duration = started_at.elapsed();
            outcome.results.push(result);
        }
        Ok::<_, ChatError>(())
    }
    .instrument(debug_span!("tool executor"))
    .await?;

    Ok(outcome)
}
