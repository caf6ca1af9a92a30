//! Legal Chunker Library
//!
//! A resumable, CPU-aware pipeline that turns long legal PDFs into bounded,
//! overlapping, retrieval-ready chunks. Supports sliding-window, paragraph
//! and sentence/token segmentation.

pub mod batch;
pub mod chunkers;
pub mod error;
pub mod jobs;
pub mod monitor;
pub mod output;
pub mod processing;
pub mod router;
pub mod types;

pub use batch::{run_batch, run_batch_with, CancelFlag, ParallelExecutor, RunReport, RunStatus};
pub use chunkers::{Chunker, HybridChunker, SemanticChunker, SlidingWindowChunker};
pub use error::{ConfigurationError, ExtractionError, OutputWriteError, PipelineError, ProgressError};
pub use router::ChunkingRouter;
pub use types::{Chunk, ChunkMetadata, Document, JobConfig, Strategy};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::batch::*;
    pub use crate::chunkers::{Chunker, HybridChunker, SemanticChunker, SlidingWindowChunker};
    pub use crate::error::*;
    pub use crate::jobs::{DocumentStatus, ProgressTracker};
    pub use crate::router::ChunkingRouter;
    pub use crate::types::*;
}

/// Default minimum chunk size in characters
pub const DEFAULT_MIN_CHUNK_SIZE: usize = 3000;

/// Default maximum chunk size in characters
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 5000;

/// Default overlap between sliding windows in characters
pub const DEFAULT_OVERLAP: usize = 1500;

/// Default token floor per hybrid chunk
pub const DEFAULT_MIN_TOKENS: usize = 128;

/// Default token ceiling per hybrid chunk
pub const DEFAULT_MAX_TOKENS: usize = 512;

/// Default tokens of sentence overlap between hybrid chunks
pub const DEFAULT_OVERLAP_TOKENS: usize = 50;

/// Default CPU utilization ceiling (percent)
pub const DEFAULT_CPU_LIMIT: f32 = 85.0;

/// Default pages extracted together
pub const DEFAULT_MAX_PAGES_PER_BATCH: usize = 16;

/// Default per-page extraction timeout in seconds
pub const DEFAULT_TIMEOUT_PER_PAGE_SECS: f64 = 30.0;
