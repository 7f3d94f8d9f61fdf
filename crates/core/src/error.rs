/// An error that ends a chat stream.
///
/// Failures that the conversation can recover from, such as an unknown
/// tool or a tool returning an error, are not reported this way. They
/// become error results and are sent back to the model.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// The model produced arguments that are not valid JSON.
    #[error(
        "failed to parse arguments of tool call {tool_call_id} ({tool_name}) \
         as JSON: {arguments}"
    )]
    InvalidToolArguments {
        /// The tool call id.
        tool_call_id: String,
        /// The tool name.
        tool_name: String,
        /// The raw arguments.
        arguments: String,
        /// The parse failure.
        #[source]
        source: serde_json::Error,
    },
}
