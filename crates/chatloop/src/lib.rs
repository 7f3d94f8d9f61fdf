//! An agent loop engine and a streaming transcript processor, assembled.
//!
//! The crate re-exports the whole stack and includes a CLI tool for
//! inspecting chunk recordings and talking to remote engines over SSE.

#![deny(missing_docs)]

mod render;

pub use render::{LiveText, TranscriptRenderer};

/// Re-exports of [`chatloop_model`] crate.
pub mod model {
    pub use chatloop_model::*;
}

/// Re-exports of [`chatloop_stream`] crate.
pub mod stream {
    pub use chatloop_stream::*;
}

/// Re-exports of [`chatloop_core`] crate.
pub mod core {
    pub use chatloop_core::*;
}

/// Re-exports of [`chatloop_sse`] crate.
pub mod sse {
    pub use chatloop_sse::*;
}
