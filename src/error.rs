//! Error taxonomy for the chunking pipeline.
//!
//! Configuration errors are fatal to a run and are raised before any worker
//! starts. Extraction and output errors are scoped to a single document and
//! are recorded by the progress tracker while the batch continues.

use std::path::PathBuf;

use thiserror::Error;

/// A document could not be turned into raw text.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The PDF requires a password.
    #[error("document is password-protected")]
    PasswordProtected,

    /// The PDF has no pages at all.
    #[error("document has no pages")]
    NoPages,

    /// The PDF could not be parsed.
    #[error("unreadable or corrupt PDF: {0}")]
    Corrupt(String),

    /// Every page timed out or failed to extract.
    #[error("all {pages} pages failed to extract")]
    AllPagesFailed { pages: usize },

    /// The file itself could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The job configuration is invalid.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("invalid chunk size bounds: min_chunk_size ({min}) > max_chunk_size ({max})")]
    InvalidBounds { min: usize, max: usize },

    #[error("overlap ({overlap}) must be smaller than max_chunk_size ({max})")]
    InvalidOverlap { overlap: usize, max: usize },

    #[error("invalid token bounds: {0}")]
    InvalidTokenBounds(String),

    #[error("invalid regex in {field}: {pattern:?}: {source}")]
    InvalidPattern {
        field: &'static str,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to load configuration: {0}")]
    Load(String),
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        ConfigurationError::Load(err.to_string())
    }
}

/// Chunk output could not be written.
#[derive(Debug, Error)]
pub enum OutputWriteError {
    #[error("cannot write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize chunks: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write CSV: {0}")]
    Csv(String),
}

/// The progress store could not be read or updated.
#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("progress store {} is not accessible: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("progress store {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("progress tracker has shut down")]
    Closed,
}

/// Any error surfaced by the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    OutputWrite(#[from] OutputWriteError),

    #[error(transparent)]
    Progress(#[from] ProgressError),

    /// A worker task panicked or was aborted.
    #[error("worker failed: {0}")]
    Worker(String),
}

impl PipelineError {
    /// Name of the error kind as shown in run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Extraction(_) => "ExtractionError",
            PipelineError::Configuration(_) => "ConfigurationError",
            PipelineError::OutputWrite(_) => "OutputWriteError",
            PipelineError::Progress(_) => "ProgressError",
            PipelineError::Worker(_) => "WorkerError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        let err: PipelineError = ExtractionError::PasswordProtected.into();
        assert_eq!(err.kind(), "ExtractionError");

        let err: PipelineError = ConfigurationError::InvalidBounds { min: 6000, max: 3000 }.into();
        assert_eq!(err.kind(), "ConfigurationError");
    }

    #[test]
    fn test_messages() {
        let err = ExtractionError::AllPagesFailed { pages: 4 };
        assert_eq!(err.to_string(), "all 4 pages failed to extract");

        let err = ConfigurationError::InvalidBounds { min: 6000, max: 3000 };
        assert!(err.to_string().contains("6000"));
    }
}
