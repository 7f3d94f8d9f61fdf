//! The wire protocol shared by chat adapters and the agent loop.
//!
//! This crate establishes a unified chunk protocol for model adapters to
//! stream their output, so that the engine and the stream processor can
//! work with any provider without knowing its native wire format.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to. Translating to and
//! from a specific vendor's format is the job of the adapter crates.

#![deny(missing_docs)]

mod adapter;
mod chunk;
mod error;
mod message;

pub use adapter::*;
pub use chunk::*;
pub use error::*;
pub use message::*;
