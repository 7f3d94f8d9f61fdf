//! The agent loop: model turns, tool execution, approvals and loop
//! strategies.
//!
//! A [`ChatEngine`] streams one model turn through a
//! [`ChatAdapter`](chatloop_model::ChatAdapter), resolves the tool calls
//! the model made with the tools of a [`ToolSet`](tool::ToolSet), and
//! calls the model again with the results, until its
//! [`AgentLoopStrategy`](strategy::AgentLoopStrategy) decides to stop.
//!
//! ```ignore
//! let options = ChatOptions::builder("gpt-4o")
//!     .with_messages(vec![ModelMessage::user("what's the temperature?")])
//!     .with_tools(tools)
//!     .build();
//! let mut stream = chat(adapter, options);
//! while let Some(chunk) = stream.next().await {
//!     processor.process_chunk(&chunk?);
//! }
//! ```

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod engine;
mod error;
pub mod events;
mod options;
pub mod strategy;
pub mod tool;
mod tool_call_manager;

pub use engine::{ChatEngine, ChatStream, chat};
pub use error::ChatError;
pub use options::{ChatOptions, ChatOptionsBuilder};
pub use tool_call_manager::ToolCallManager;
