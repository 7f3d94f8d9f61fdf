//! Incremental reconstruction of a conversation transcript from a chunk
//! stream.
//!
//! The [`StreamProcessor`] consumes [`StreamChunk`]s produced by an adapter
//! and keeps an immutable, copy-on-write list of [`UIMessage`]s in sync
//! with them. Text is split into segments around tool calls, tool calls are
//! tracked through their lifecycle, and every chunk can optionally be
//! recorded into a [`ChunkRecording`] for deterministic replay.
//!
//! [`StreamChunk`]: chatloop_model::StreamChunk

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod convert;
mod error;
mod events;
pub mod json;
mod message;
mod processor;
mod recording;
pub mod strategy;
pub mod updaters;

pub use convert::{
    model_messages_to_ui_messages, ui_message_to_model_messages,
    ui_messages_to_model_messages,
};
pub use error::StreamError;
pub use events::{
    NoopProcessorSink, ProcessorEvent, ProcessorEventSink,
    TracingProcessorSink,
};
pub use json::{JsonParser, PartialJsonParser, parse_partial_json};
pub use message::*;
pub use processor::{
    ProcessorState, StreamProcessor, StreamProcessorBuilder, ToolCallEntry,
};
pub use recording::{
    ChunkRecording, ProcessorResult, RECORDING_VERSION, RecordedChunk,
    replay_stream,
};
pub use updaters::MessageList;
pub use strategy::ChunkStrategy;

/// Generates a unique id with the given prefix, such as
/// `msg-1700000000000-3f2a9c1d`.
pub fn generate_id(prefix: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}-{millis}-{}", &random[..8])
}
