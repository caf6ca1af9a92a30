//! Chunk type definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Document, Strategy};

/// A bounded segment of a document's cleaned text.
///
/// Chunks are the unit of output. Offsets are character offsets into the
/// cleaned text of the source document, so each chunk can be traced back
/// to its position and to the pages it spans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique identifier: `{document_id}_chunk_{index:04}`
    pub id: String,

    /// ID of the document this chunk was cut from
    pub document_id: String,

    /// Order of this chunk within its document (0-indexed)
    pub index: usize,

    /// Starting character offset in the cleaned text
    pub start: usize,

    /// Ending character offset (exclusive) in the cleaned text
    pub end: usize,

    /// The chunk text
    pub text: String,

    /// Number of tokens (hybrid strategy only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_count: Option<usize>,

    /// Additional metadata about this chunk
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Create a new chunk for a document.
    pub fn new(document: &Document, index: usize, start: usize, end: usize, text: String) -> Self {
        Self {
            id: chunk_id(&document.id, index),
            document_id: document.id.clone(),
            index,
            start,
            end,
            text,
            token_count: None,
            metadata: ChunkMetadata::for_document(document),
        }
    }

    /// Set the token count.
    pub fn with_tokens(mut self, tokens: Option<usize>) -> Self {
        self.token_count = tokens;
        self
    }

    /// Create a chunk with metadata.
    pub fn with_metadata(mut self, metadata: ChunkMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Length of the chunk in characters.
    pub fn char_count(&self) -> usize {
        self.end - self.start
    }

    /// Whether this chunk shares text with the previous one.
    pub fn overlaps_previous(&self) -> bool {
        self.metadata.overlap > 0
    }

    /// Check if the chunk is empty.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Build the stable chunk id for a document ordinal.
pub fn chunk_id(document_id: &str, index: usize) -> String {
    format!("{document_id}_chunk_{index:04}")
}

/// Metadata associated with a chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Path of the source PDF
    pub source_path: String,

    /// Strategy that produced the chunk
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,

    /// Language of the document
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// First and last page (1-based) the chunk spans
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<(usize, usize)>,

    /// Characters shared with the previous chunk
    pub overlap: usize,

    /// When this chunk was created
    pub created_at: DateTime<Utc>,

    /// Additional arbitrary metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

impl ChunkMetadata {
    /// Create metadata for a chunk of the given document.
    pub fn for_document(document: &Document) -> Self {
        Self {
            source_path: document.path_str(),
            language: document.language.clone(),
            created_at: Utc::now(),
            ..Default::default()
        }
    }

    /// Set the producing strategy.
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Set the page range.
    pub fn with_pages(mut self, pages: Option<(usize, usize)>) -> Self {
        self.pages = pages;
        self
    }

    /// Set the overlap with the previous chunk.
    pub fn with_overlap(mut self, overlap: usize) -> Self {
        self.overlap = overlap;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_chunk_id_scheme() {
        let doc = Document::from_path(Path::new("/in"), Path::new("/in/ruling.pdf"), Some("it"));
        let chunk = Chunk::new(&doc, 7, 100, 160, "x".repeat(60));
        assert_eq!(chunk.id, "ruling_chunk_0007");
        assert_eq!(chunk.document_id, "ruling");
        assert_eq!(chunk.char_count(), 60);
        assert_eq!(chunk.metadata.language.as_deref(), Some("it"));
        assert!(!chunk.overlaps_previous());
    }
}
