//! Tool call supports.
//!
//! A tool is registered in a [`ToolSet`] on one of three sides:
//!
//! - a *server* tool carries an implementation and is executed by the
//!   engine;
//! - a *client* tool has no implementation, its result must be supplied
//!   by the caller;
//! - a bare *definition* is offered to the model and treated like a client
//!   tool when called.
//!
//! Any of them can be gated behind the approval protocol with
//! [`ToolDefinition::with_needs_approval`].

mod approval;
mod error;
mod executor;
mod object;

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;

use chatloop_model::ToolDescriptor;
use schemars::{JsonSchema, schema_for};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

pub use approval::{
    ApprovalRequest, ClientState, ClientToolRequest, approval_id_for,
};
pub use error::{Error, ErrorKind};
pub use executor::{
    ToolCallResult, ToolExecutionResult, ToolOutputState, execute_tool_calls,
};
use object::{AnyTool, FnTool, ToolObject};

/// The result of a tool call.
pub type ToolResult = Result<Value, Error>;

/// A tool that can be executed by the engine.
///
/// Implementations of this trait should be stateless. Context the tool
/// needs, such as a working directory, should be an immutable part of the
/// tool, set during initialization and copied when executing.
pub trait Tool: Send + Sync + 'static {
    /// The type of input that the tool accepts.
    type Input: DeserializeOwned;

    /// Returns the name of the tool.
    fn name(&self) -> &str;

    /// Returns the description of the tool.
    fn description(&self) -> &str;

    /// Returns the input schema of the tool.
    fn input_schema(&self) -> &Value;

    /// Returns `true` if every call must be approved first.
    fn needs_approval(&self) -> bool {
        false
    }

    /// Executes the tool with the given input.
    ///
    /// This method must return a future that is fully independent of
    /// `self`.
    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static;
}

/// The declaration of a tool, as the model sees it.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolDefinition {
    /// The tool name, unique in a [`ToolSet`].
    pub name: String,
    /// What the tool does.
    pub description: String,
    /// The JSON schema of the input.
    pub input_schema: Option<Value>,
    /// The JSON schema of the output.
    pub output_schema: Option<Value>,
    /// Whether calls need approval.
    pub needs_approval: bool,
    /// Free-form metadata, never sent to the model.
    pub metadata: Map<String, Value>,
}

impl ToolDefinition {
    /// Creates a definition with no schema.
    pub fn new<N, D>(name: N, description: D) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: None,
            output_schema: None,
            needs_approval: false,
            metadata: Map::new(),
        }
    }

    /// Sets the input schema.
    #[inline]
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// Sets the input schema generated from `T`.
    #[inline]
    pub fn with_input_schema_for<T: JsonSchema>(self) -> Self {
        self.with_input_schema(schema_for!(T).to_value())
    }

    /// Sets the output schema.
    #[inline]
    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Gates the tool behind approvals.
    #[inline]
    pub fn with_needs_approval(mut self, needs_approval: bool) -> Self {
        self.needs_approval = needs_approval;
        self
    }

    /// Adds a metadata entry.
    #[inline]
    pub fn with_metadata<K>(mut self, key: K, value: Value) -> Self
    where
        K: Into<String>,
    {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Returns the descriptor sent to the model.
    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
            output_schema: self.output_schema.clone(),
        }
    }

    /// Attaches a server-side implementation.
    ///
    /// The arguments are decoded into `I` first, a decoding failure is
    /// reported to the model as an [`ErrorKind::InvalidInput`] error.
    pub fn server<I, F, Fut>(self, f: F) -> RegisteredTool
    where
        I: DeserializeOwned + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult> + Send + 'static,
    {
        RegisteredTool {
            definition: self,
            side: ToolSide::Server(ServerHandler::new(FnTool::new(f))),
        }
    }

    /// Marks the tool as executed by the client.
    #[inline]
    pub fn client(self) -> RegisteredTool {
        RegisteredTool {
            definition: self,
            side: ToolSide::Client,
        }
    }
}

/// The server-side implementation of a tool.
#[derive(Clone)]
pub struct ServerHandler {
    inner: Arc<dyn ToolObject>,
}

impl ServerHandler {
    #[inline]
    fn new<T: ToolObject>(tool: T) -> Self {
        Self {
            inner: Arc::new(tool),
        }
    }

    /// Runs the implementation with raw JSON arguments.
    #[inline]
    pub async fn execute(&self, arguments: Value) -> ToolResult {
        self.inner.execute(arguments).await
    }
}

impl Debug for ServerHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandler").finish_non_exhaustive()
    }
}

/// Where a tool runs.
#[derive(Clone, Debug)]
pub enum ToolSide {
    /// Declared only, handled like a client tool when called.
    Definition,
    /// Executed by the caller.
    Client,
    /// Executed by the engine.
    Server(ServerHandler),
}

/// A tool definition with its side.
#[derive(Clone, Debug)]
pub struct RegisteredTool {
    /// The declaration.
    pub definition: ToolDefinition,
    /// Where the tool runs.
    pub side: ToolSide,
}

impl RegisteredTool {
    /// Wraps a typed [`Tool`] as a server tool.
    pub fn from_tool<T: Tool>(tool: T) -> Self {
        let definition = ToolDefinition::new(tool.name(), tool.description())
            .with_input_schema(tool.input_schema().clone())
            .with_needs_approval(tool.needs_approval());
        Self {
            definition,
            side: ToolSide::Server(ServerHandler::new(AnyTool(tool))),
        }
    }

    /// Returns the tool name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Returns the implementation, if the tool runs on the server.
    #[inline]
    pub fn handler(&self) -> Option<&ServerHandler> {
        match &self.side {
            ToolSide::Server(handler) => Some(handler),
            _ => None,
        }
    }
}

impl From<ToolDefinition> for RegisteredTool {
    #[inline]
    fn from(definition: ToolDefinition) -> Self {
        Self {
            definition,
            side: ToolSide::Definition,
        }
    }
}

/// The registry of tools offered to the model.
///
/// Tools keep their registration order. Registering a name twice replaces
/// the earlier tool in place.
#[derive(Clone, Debug, Default)]
pub struct ToolSet {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolSet {
    /// Creates an empty set.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool.
    pub fn add<T: Into<RegisteredTool>>(&mut self, tool: T) {
        let tool = tool.into();
        match self.index.get(tool.name()) {
            Some(&pos) => {
                warn!("tool {} registered twice", tool.name());
                self.tools[pos] = tool;
            }
            None => {
                self.index.insert(tool.name().to_owned(), self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    /// Registers a tool, builder style.
    #[inline]
    pub fn with<T: Into<RegisteredTool>>(mut self, tool: T) -> Self {
        self.add(tool);
        self
    }

    /// Registers a typed [`Tool`].
    #[inline]
    pub fn add_tool<T: Tool>(&mut self, tool: T) {
        self.add(RegisteredTool::from_tool(tool));
    }

    /// Finds a tool by name.
    #[inline]
    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.index.get(name).map(|&pos| &self.tools[pos])
    }

    /// Returns the descriptors sent to the model.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .map(|tool| tool.definition.descriptor())
            .collect()
    }

    /// Returns the number of tools.
    #[inline]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` if there are no tools.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Iterates over the tools in registration order.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredTool> {
        self.tools.iter()
    }
}

impl<T: Into<RegisteredTool>> FromIterator<T> for ToolSet {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::new();
        for tool in iter {
            set.add(tool);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use schemars::JsonSchema;
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct Location {
        /// The city to look up.
        city: String,
    }

    struct Echo {
        schema: Value,
    }

    impl Tool for Echo {
        type Input = Value;

        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes the input."
        }

        fn input_schema(&self) -> &Value {
            &self.schema
        }

        fn needs_approval(&self) -> bool {
            true
        }

        fn execute(
            &self,
            input: Self::Input,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            std::future::ready(Ok(input))
        }
    }

    #[test]
    fn test_schema_for() {
        let definition = ToolDefinition::new("get_weather", "Weather.")
            .with_input_schema_for::<Location>()
            .with_metadata("unit", json!("fahrenheit"));
        assert_eq!(definition.metadata["unit"], "fahrenheit");
        let schema = definition.descriptor().input_schema.unwrap();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["city"]["type"], "string");
        assert_eq!(schema["required"], json!(["city"]));
    }

    #[test]
    fn test_sides() {
        let tools = ToolSet::new()
            .with(ToolDefinition::new("show_map", "Shows a map."))
            .with(ToolDefinition::new("pick_file", "Picks a file.").client())
            .with(ToolDefinition::new("now", "Current time.").server(
                |_: Value| async { Ok::<_, Error>(json!("12:00")) },
            ));

        assert_eq!(tools.len(), 3);
        assert!(matches!(
            tools.get("show_map").unwrap().side,
            ToolSide::Definition
        ));
        let pick_file = tools.get("pick_file").unwrap();
        assert!(matches!(pick_file.side, ToolSide::Client));
        assert!(tools.get("now").unwrap().handler().is_some());
        let names: Vec<_> =
            tools.descriptors().into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["show_map", "pick_file", "now"]);
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut tools: ToolSet = [
            ToolDefinition::new("a", "first"),
            ToolDefinition::new("b", "second"),
        ]
        .into_iter()
        .collect();
        tools.add(ToolDefinition::new("a", "replaced"));

        assert_eq!(tools.len(), 2);
        let first = tools.iter().next().unwrap();
        assert_eq!(first.definition.description, "replaced");
    }

    #[tokio::test]
    async fn test_typed_tool() {
        let mut tools = ToolSet::new();
        tools.add_tool(Echo {
            schema: json!({ "type": "object" }),
        });

        let tool = tools.get("echo").unwrap();
        assert!(tool.definition.needs_approval);
        let output = tool.handler().unwrap().execute(json!({ "x": 1 })).await;
        assert_eq!(output, Ok(json!({ "x": 1 })));
    }
}
