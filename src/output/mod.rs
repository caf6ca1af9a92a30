//! Output module: chunk files on disk and the JSON-Lines handoff reader.

mod handoff;
mod writer;

pub use handoff::{read_handoff, HandoffBatch, HandoffRecord};
pub use writer::{write_atomic, OutputManager};
