//! Segmentation strategies that turn cleaned text into chunks.

mod base;
mod hybrid;
mod semantic;
mod sliding_window;

pub use base::{
    abbreviation_patterns, reconstruct, Chunker, Span, TextIndex, TiktokenCounter, TokenCounter,
};
pub use hybrid::HybridChunker;
pub use semantic::SemanticChunker;
pub use sliding_window::SlidingWindowChunker;
