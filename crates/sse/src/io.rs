mod chunks;
mod decoder;

pub(crate) use chunks::Chunks;
pub use decoder::{EventReader, SseDecoder};
