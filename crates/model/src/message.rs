use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The author of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The system instructions.
    System,
    /// The human side of the conversation.
    User,
    /// The model.
    Assistant,
    /// A tool call result.
    Tool,
}

/// A complete message, in the form sent to and received from a provider.
///
/// Messages are immutable once appended to the history. Use the
/// constructors to build them instead of filling the fields by hand.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMessage {
    /// Who wrote the message.
    pub role: Role,
    /// The text content, `None` for assistant messages that only carry
    /// tool calls.
    pub content: Option<String>,
    /// Tool calls requested by the assistant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// The tool call this message answers, only for [`Role::Tool`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// An optional participant name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ModelMessage {
    #[inline]
    fn with_role(role: Role, content: Option<String>) -> Self {
        Self {
            role,
            content,
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    /// Creates a system message.
    #[inline]
    pub fn system<S: Into<String>>(content: S) -> Self {
        Self::with_role(Role::System, Some(content.into()))
    }

    /// Creates a user message.
    #[inline]
    pub fn user<S: Into<String>>(content: S) -> Self {
        Self::with_role(Role::User, Some(content.into()))
    }

    /// Creates an assistant text message.
    #[inline]
    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self::with_role(Role::Assistant, Some(content.into()))
    }

    /// Creates an assistant message that requests tool calls.
    ///
    /// An empty `content` is stored as `None`.
    pub fn assistant_tool_calls(
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        let content = content.filter(|c| !c.is_empty());
        let mut msg = Self::with_role(Role::Assistant, content);
        msg.tool_calls = Some(tool_calls);
        msg
    }

    /// Creates a tool result message answering the given tool call.
    #[inline]
    pub fn tool_result<ID: Into<String>, S: Into<String>>(
        tool_call_id: ID,
        content: S,
    ) -> Self {
        let mut msg = Self::with_role(Role::Tool, Some(content.into()));
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    /// Sets the participant name.
    #[inline]
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Returns the tool calls of this message, empty if there are none.
    #[inline]
    pub fn tool_calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or_default()
    }
}

/// The kind of a tool call. Only function calls exist for now.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallType {
    /// A function call.
    #[default]
    Function,
}

/// The function part of a tool call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Name of the function to call. Continuation fragments of a streamed
    /// call may leave it empty.
    #[serde(default)]
    pub name: String,
    /// JSON-encoded arguments, possibly incomplete while streaming.
    #[serde(default)]
    pub arguments: String,
}

/// Describes a tool call request from the model.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolCall {
    /// The unique identifier for the tool call request. Continuation
    /// fragments of a streamed call may leave it empty.
    #[serde(default)]
    pub id: String,
    /// The kind of the call.
    #[serde(rename = "type", default)]
    pub kind: ToolCallType,
    /// The function to call.
    pub function: FunctionCall,
}

impl ToolCall {
    /// Creates a function tool call.
    #[inline]
    pub fn function<ID, N, A>(id: ID, name: N, arguments: A) -> Self
    where
        ID: Into<String>,
        N: Into<String>,
        A: Into<String>,
    {
        Self {
            id: id.into(),
            kind: ToolCallType::Function,
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    /// Returns the function name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Returns the raw JSON arguments.
    #[inline]
    pub fn arguments(&self) -> &str {
        &self.function.arguments
    }
}

/// Describes a tool that can be used by the model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Name of the tool.
    pub name: String,
    /// Description of the tool.
    pub description: String,
    /// Parameters definition of the tool.
    ///
    /// For most model providers, the parameters should typically be
    /// defined by a [JSON schema](https://json-schema.org/).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    /// The schema of the tool's output, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}
