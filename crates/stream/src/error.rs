/// The error type for transcript operations of a
/// [`StreamProcessor`](crate::StreamProcessor).
///
/// A failed operation leaves the message list untouched.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// No message holds a tool call with this id.
    #[error("no tool call with id `{0}` in the transcript")]
    ToolCallNotFound(String),
    /// No tool call carries an approval with this id.
    #[error("no tool call awaiting approval `{0}`")]
    ApprovalNotFound(String),
}
