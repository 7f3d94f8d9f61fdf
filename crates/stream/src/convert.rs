//! Conversion between transcript messages and provider messages.

use std::collections::HashSet;

use chatloop_model::{ModelMessage, Role, ToolCall};
use serde_json::Value;

use crate::{
    MessagePart, ToolCallPart, ToolCallState, ToolResultPart, ToolResultState,
    UIMessage,
};

/// Encodes a tool output the way it is sent back to the model: strings
/// verbatim, anything else as JSON.
pub(crate) fn output_content(output: &Value) -> String {
    match output {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Decodes tool message content back into an output value.
pub(crate) fn parse_output(content: &str) -> Value {
    serde_json::from_str(content)
        .unwrap_or_else(|_| Value::String(content.to_owned()))
}

/// Converts one transcript message into the provider messages it stands
/// for.
///
/// Text parts are joined, thinking is dropped. For an assistant message,
/// its tool calls become `toolCalls` and each answered call is followed
/// by a `tool` message, taken from its result part or, failing that, from
/// the output stored on the call.
pub fn ui_message_to_model_messages(msg: &UIMessage) -> Vec<ModelMessage> {
    let text: String = msg.texts().collect();

    match msg.role {
        Role::System => vec![ModelMessage::system(text)],
        Role::User => vec![ModelMessage::user(text)],
        Role::Tool => msg
            .parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::ToolResult(result) => {
                    Some(ModelMessage::tool_result(
                        &result.tool_call_id,
                        &result.content,
                    ))
                }
                _ => None,
            })
            .collect(),
        Role::Assistant => {
            let tool_calls: Vec<ToolCall> = msg
                .tool_calls()
                .map(|call| {
                    ToolCall::function(&call.id, &call.name, &call.arguments)
                })
                .collect();
            if tool_calls.is_empty() {
                return vec![ModelMessage::assistant(text)];
            }

            let mut out = vec![ModelMessage::assistant_tool_calls(
                Some(text),
                tool_calls,
            )];
            let mut answered = HashSet::new();
            for part in &msg.parts {
                if let MessagePart::ToolResult(result) = part {
                    if answered.insert(result.tool_call_id.as_str()) {
                        out.push(ModelMessage::tool_result(
                            &result.tool_call_id,
                            &result.content,
                        ));
                    }
                }
            }
            for call in msg.tool_calls() {
                let Some(output) = &call.output else {
                    continue;
                };
                if answered.insert(call.id.as_str()) {
                    out.push(ModelMessage::tool_result(
                        &call.id,
                        output_content(output),
                    ));
                }
            }
            out
        }
    }
}

/// Converts a whole transcript into provider messages.
pub fn ui_messages_to_model_messages<'a, I>(messages: I) -> Vec<ModelMessage>
where
    I: IntoIterator<Item = &'a UIMessage>,
{
    messages
        .into_iter()
        .flat_map(ui_message_to_model_messages)
        .collect()
}

/// Rebuilds a transcript from provider messages.
///
/// `tool` messages are folded into the assistant message that made the
/// call, as a result part plus the output of the call part. A result
/// whose call can't be found becomes a standalone `tool` message.
pub fn model_messages_to_ui_messages(
    messages: &[ModelMessage],
) -> Vec<UIMessage> {
    let mut out: Vec<UIMessage> = vec![];
    for msg in messages {
        match msg.role {
            Role::Tool => {
                let tool_call_id = msg.tool_call_id.clone().unwrap_or_default();
                let content = msg.content.clone().unwrap_or_default();
                let result = MessagePart::ToolResult(ToolResultPart {
                    tool_call_id: tool_call_id.clone(),
                    content: content.clone(),
                    state: ToolResultState::Complete,
                    error: None,
                });
                let owner = out.iter_mut().rev().find(|ui| {
                    ui.role == Role::Assistant
                        && ui.tool_call(&tool_call_id).is_some()
                });
                match owner {
                    Some(owner) => {
                        for part in &mut owner.parts {
                            if let MessagePart::ToolCall(call) = part {
                                if call.id == tool_call_id {
                                    call.output = Some(parse_output(&content));
                                }
                            }
                        }
                        owner.parts.push(result);
                    }
                    None => {
                        let mut ui = UIMessage::new(Role::Tool);
                        ui.parts.push(result);
                        out.push(ui);
                    }
                }
            }
            role => {
                let mut ui = UIMessage::new(role);
                let content = msg.content.as_deref().unwrap_or_default();
                if !content.is_empty() {
                    ui.parts.push(MessagePart::Text {
                        content: content.to_owned(),
                    });
                }
                for call in msg.tool_calls() {
                    let mut part = ToolCallPart::new(
                        &call.id,
                        call.name(),
                        call.arguments(),
                        ToolCallState::InputComplete,
                    );
                    part.parsed_arguments =
                        crate::parse_partial_json(call.arguments());
                    ui.parts.push(MessagePart::ToolCall(part));
                }
                out.push(ui);
            }
        }
    }
    out
}
