//! Pure, copy-on-write updates of a message list.
//!
//! Every function returns a new list. Untouched messages are shared with
//! the input by reference count, and the touched message is rebuilt, so a
//! previously handed out list is never observed changing.

use std::sync::Arc;

use serde_json::Value;

use crate::{
    MessagePart, ToolApproval, ToolCallPart, ToolCallState, ToolResultPart,
    ToolResultState, UIMessage,
};

/// An immutable snapshot of a transcript.
pub type MessageList = Arc<[Arc<UIMessage>]>;

/// The streamed fields of a tool call part.
#[derive(Clone, Debug)]
pub struct ToolCallUpdate<'a> {
    /// The tool call id.
    pub id: &'a str,
    /// The tool name.
    pub name: &'a str,
    /// All arguments received so far.
    pub arguments: &'a str,
    /// The requested state.
    pub state: ToolCallState,
    /// The latest parse of `arguments`.
    pub parsed_arguments: Option<Value>,
}

fn map_message<F>(
    messages: &[Arc<UIMessage>],
    message_id: &str,
    f: F,
) -> MessageList
where
    F: FnOnce(&mut UIMessage),
{
    let mut f = Some(f);
    messages
        .iter()
        .map(|msg| {
            if msg.id != message_id {
                return Arc::clone(msg);
            }
            let Some(f) = f.take() else {
                return Arc::clone(msg);
            };
            let mut msg = UIMessage::clone(msg);
            f(&mut msg);
            Arc::new(msg)
        })
        .collect()
}

fn tool_call_mut<'a>(
    msg: &'a mut UIMessage,
    pred: impl Fn(&ToolCallPart) -> bool,
) -> Option<&'a mut ToolCallPart> {
    msg.parts.iter_mut().find_map(|part| match part {
        MessagePart::ToolCall(call) if pred(call) => Some(call),
        _ => None,
    })
}

/// Replaces the trailing text part, or appends one if the last part is
/// not text (a new segment after a tool call).
pub fn update_text_part(
    messages: &[Arc<UIMessage>],
    message_id: &str,
    content: &str,
) -> MessageList {
    map_message(messages, message_id, |msg| {
        let part = MessagePart::Text {
            content: content.to_owned(),
        };
        match msg.parts.last_mut() {
            Some(last) if matches!(last, MessagePart::Text { .. }) => {
                *last = part;
            }
            _ => msg.parts.push(part),
        }
    })
}

/// Replaces the thinking part, or appends one.
pub fn update_thinking_part(
    messages: &[Arc<UIMessage>],
    message_id: &str,
    content: &str,
) -> MessageList {
    map_message(messages, message_id, |msg| {
        let part = MessagePart::Thinking {
            content: content.to_owned(),
        };
        let existing = msg
            .parts
            .iter_mut()
            .find(|part| matches!(part, MessagePart::Thinking { .. }));
        match existing {
            Some(existing) => *existing = part,
            None => msg.parts.push(part),
        }
    })
}

/// Creates or replaces a tool call part, found by id.
///
/// Output and approval of an existing part are kept, and the state never
/// moves backwards.
pub fn update_tool_call_part(
    messages: &[Arc<UIMessage>],
    message_id: &str,
    update: ToolCallUpdate<'_>,
) -> MessageList {
    map_message(messages, message_id, |msg| {
        if let Some(call) = tool_call_mut(msg, |call| call.id == update.id) {
            call.name = update.name.to_owned();
            call.arguments = update.arguments.to_owned();
            call.state = call.state.max(update.state);
            call.parsed_arguments = update.parsed_arguments;
            return;
        }
        let mut call = ToolCallPart::new(
            update.id,
            update.name,
            update.arguments,
            update.state,
        );
        call.parsed_arguments = update.parsed_arguments;
        msg.parts.push(MessagePart::ToolCall(call));
    })
}

/// Advances the state of a tool call part.
pub fn update_tool_call_state(
    messages: &[Arc<UIMessage>],
    message_id: &str,
    tool_call_id: &str,
    state: ToolCallState,
) -> MessageList {
    map_message(messages, message_id, |msg| {
        if let Some(call) = tool_call_mut(msg, |call| call.id == tool_call_id) {
            call.state = call.state.max(state);
        }
    })
}

/// Creates or replaces the tool result part for a call.
pub fn update_tool_result_part(
    messages: &[Arc<UIMessage>],
    message_id: &str,
    tool_call_id: &str,
    content: &str,
    state: ToolResultState,
    error: Option<&str>,
) -> MessageList {
    map_message(messages, message_id, |msg| {
        let part = ToolResultPart {
            tool_call_id: tool_call_id.to_owned(),
            content: content.to_owned(),
            state,
            error: error.map(ToOwned::to_owned),
        };
        let existing = msg.parts.iter_mut().find(|part| match part {
            MessagePart::ToolResult(result) => {
                result.tool_call_id == tool_call_id
            }
            _ => false,
        });
        match existing {
            Some(existing) => *existing = MessagePart::ToolResult(part),
            None => msg.parts.push(MessagePart::ToolResult(part)),
        }
    })
}

/// Attaches an approval request to a tool call part.
pub fn update_tool_call_approval(
    messages: &[Arc<UIMessage>],
    message_id: &str,
    tool_call_id: &str,
    approval_id: &str,
) -> MessageList {
    map_message(messages, message_id, |msg| {
        if let Some(call) = tool_call_mut(msg, |call| call.id == tool_call_id) {
            call.state = call.state.max(ToolCallState::ApprovalRequested);
            call.approval = Some(ToolApproval {
                id: approval_id.to_owned(),
                needs_approval: true,
                approved: None,
            });
        }
    })
}

/// Stores the output of a tool call part.
///
/// An `error` replaces the output with `{"error": error}`. Without an
/// explicit `state` the part is advanced to input-complete.
pub fn update_tool_call_with_output(
    messages: &[Arc<UIMessage>],
    message_id: &str,
    tool_call_id: &str,
    output: Value,
    state: Option<ToolCallState>,
    error: Option<&str>,
) -> MessageList {
    map_message(messages, message_id, |msg| {
        if let Some(call) = tool_call_mut(msg, |call| call.id == tool_call_id) {
            call.output = Some(match error {
                Some(error) => serde_json::json!({ "error": error }),
                None => output,
            });
            let state = state.unwrap_or(ToolCallState::InputComplete);
            call.state = call.state.max(state);
        }
    })
}

/// Records an approval decision on the part holding `approval_id`.
pub fn update_tool_call_approval_response(
    messages: &[Arc<UIMessage>],
    message_id: &str,
    approval_id: &str,
    approved: bool,
) -> MessageList {
    map_message(messages, message_id, |msg| {
        let call = tool_call_mut(msg, |call| {
            call.approval.as_ref().is_some_and(|a| a.id == approval_id)
        });
        if let Some(call) = call {
            if let Some(approval) = &mut call.approval {
                approval.approved = Some(approved);
            }
            call.state = ToolCallState::ApprovalResponded;
        }
    })
}

#[cfg(test)]
mod tests {
    use chatloop_model::Role;
    use serde_json::json;

    use super::*;

    fn list(msgs: Vec<UIMessage>) -> MessageList {
        msgs.into_iter().map(Arc::new).collect()
    }

    fn single_call(messages: &MessageList) -> &ToolCallPart {
        messages[0].tool_calls().next().unwrap()
    }

    #[test]
    fn test_copy_on_write() {
        let before = list(vec![
            UIMessage::new(Role::Assistant).with_id("a"),
            UIMessage::text(Role::User, "hi").with_id("u"),
        ]);
        let after = update_text_part(&before, "a", "Hello");

        assert!(before[0].parts.is_empty());
        assert_eq!(after[0].texts().collect::<Vec<_>>(), ["Hello"]);
        assert!(Arc::ptr_eq(&before[1], &after[1]));
        assert!(!Arc::ptr_eq(&before[0], &after[0]));
    }

    #[test]
    fn test_text_segments() {
        let messages = list(vec![UIMessage::new(Role::Assistant).with_id("a")]);
        let messages = update_text_part(&messages, "a", "Hel");
        let messages = update_text_part(&messages, "a", "Hello");
        let messages = update_tool_call_part(
            &messages,
            "a",
            ToolCallUpdate {
                id: "c1",
                name: "search",
                arguments: "",
                state: ToolCallState::AwaitingInput,
                parsed_arguments: None,
            },
        );
        let messages = update_text_part(&messages, "a", "Done");
        assert_eq!(messages[0].texts().collect::<Vec<_>>(), ["Hello", "Done"]);
        assert_eq!(messages[0].parts.len(), 3);
    }

    #[test]
    fn test_tool_call_never_regresses() {
        let mut msg = UIMessage::new(Role::Assistant).with_id("a");
        msg.parts.push(MessagePart::ToolCall(ToolCallPart::new(
            "c1",
            "search",
            "{}",
            ToolCallState::InputComplete,
        )));
        let messages = list(vec![msg]);
        let messages =
            update_tool_call_approval(&messages, "a", "c1", "approval_c1");
        let messages = update_tool_call_part(
            &messages,
            "a",
            ToolCallUpdate {
                id: "c1",
                name: "search",
                arguments: "{}",
                state: ToolCallState::InputComplete,
                parsed_arguments: Some(json!({})),
            },
        );
        let call = single_call(&messages);
        assert_eq!(call.state, ToolCallState::ApprovalRequested);
        assert!(call.approval.is_some());

        let messages = update_tool_call_approval_response(
            &messages,
            "a",
            "approval_c1",
            false,
        );
        let messages = update_tool_call_with_output(
            &messages,
            "a",
            "c1",
            Value::Null,
            None,
            Some("User declined tool execution"),
        );
        let call = single_call(&messages);
        assert_eq!(call.state, ToolCallState::ApprovalResponded);
        assert_eq!(call.approval.as_ref().unwrap().approved, Some(false));
        assert_eq!(
            call.output,
            Some(json!({ "error": "User declined tool execution" }))
        );
        assert!(call.is_terminal());
    }

    #[test]
    fn test_tool_result_unique_per_call() {
        let messages = list(vec![UIMessage::new(Role::Assistant).with_id("a")]);
        let messages = update_tool_result_part(
            &messages,
            "a",
            "c1",
            "partial",
            ToolResultState::Streaming,
            None,
        );
        let messages = update_tool_result_part(
            &messages,
            "a",
            "c1",
            "70",
            ToolResultState::Complete,
            None,
        );
        assert_eq!(messages[0].parts.len(), 1);
        let MessagePart::ToolResult(result) = &messages[0].parts[0] else {
            panic!("unexpected part: {:?}", messages[0].parts[0]);
        };
        assert_eq!(result.content, "70");
        assert_eq!(result.state, ToolResultState::Complete);
    }
}
