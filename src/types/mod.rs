//! Core types for the chunking pipeline.

mod chunk;
mod config;
mod document;

pub use chunk::{chunk_id, Chunk, ChunkMetadata};
pub use config::{
    default_abbreviations, CleanerConfig, JobConfig, OutputFormat, PatternRule, Strategy, ENV_PREFIX,
};
pub use document::{document_id, CleanedText, CleaningStats, Document, PageWarning, RawText};
