//! Reader for JSON-Lines chunk handoff files.
//!
//! The entity-extraction stage downstream consumes `{document_id}.jsonl`
//! files line by line. Each line carries at least `text`, `chunk_id` and
//! `source_doc_path`; everything else is kept in `extra`.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One chunk as seen by the downstream extraction stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffRecord {
    pub text: String,
    pub chunk_id: String,
    pub source_doc_path: String,

    /// Remaining chunk fields (offsets, metadata, ...)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Parsed content of a handoff file.
#[derive(Debug, Default)]
pub struct HandoffBatch {
    pub records: Vec<HandoffRecord>,

    /// 1-based line numbers that failed to parse
    pub malformed: Vec<usize>,
}

/// Read a handoff file, skipping blank lines and collecting malformed ones.
pub fn read_handoff(path: impl AsRef<Path>) -> Result<HandoffBatch> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("failed to open handoff file {}", path.display()))?;

    let mut batch = HandoffBatch::default();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<HandoffRecord>(&line) {
            Ok(record) => batch.records.push(record),
            Err(e) => {
                warn!(path = %path.display(), line = i + 1, error = %e, "Skipping malformed handoff line");
                batch.malformed.push(i + 1);
            }
        }
    }

    Ok(batch)
}
