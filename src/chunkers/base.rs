//! Base trait and shared helpers for all chunkers.

use anyhow::Result;
use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

use crate::types::{Chunk, ChunkMetadata, CleanedText, Document, Strategy};

/// A half-open character range `[start, end)` of the cleaned text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// The core trait that all chunkers must implement.
///
/// A chunker cuts cleaned text into spans. Spans must be in source order,
/// non-empty, with non-decreasing starts, and together must cover the text
/// without gaps (they may overlap). The provided [`Chunker::chunk`] turns
/// spans into [`Chunk`]s.
pub trait Chunker: Send + Sync {
    /// Get the name of this chunker.
    fn name(&self) -> &'static str;

    /// The strategy this chunker implements.
    fn strategy(&self) -> Strategy;

    /// Get the description of this chunker.
    fn description(&self) -> &'static str {
        "A text chunker"
    }

    /// Cut the text into spans.
    fn split(&self, text: &TextIndex<'_>) -> Vec<Span>;

    /// Token count reported for a chunk, if this chunker counts tokens.
    fn count_tokens(&self, text: &str) -> Option<usize> {
        let _ = text;
        None
    }

    /// Chunk a document's cleaned text.
    fn chunk(&self, document: &Document, cleaned: &CleanedText) -> Vec<Chunk> {
        if cleaned.text.is_empty() {
            return vec![];
        }

        let index = TextIndex::new(&cleaned.text);
        let spans = self.split(&index);

        let mut chunks = Vec::with_capacity(spans.len());
        let mut previous_end: usize = 0;

        for span in spans.into_iter().filter(|s| !s.is_empty()) {
            let text = index.slice(span.start, span.end);
            let overlap = if chunks.is_empty() {
                0
            } else {
                previous_end.saturating_sub(span.start)
            };

            let metadata = ChunkMetadata::for_document(document)
                .with_strategy(self.strategy())
                .with_pages(cleaned.page_range(span.start, span.end))
                .with_overlap(overlap);

            let chunk = Chunk::new(document, chunks.len(), span.start, span.end, text.to_string())
                .with_tokens(self.count_tokens(text))
                .with_metadata(metadata);

            previous_end = span.end;
            chunks.push(chunk);
        }

        chunks
    }
}

/// Character-indexed view of a text.
///
/// Chunk offsets are characters, but slicing needs byte offsets; the index
/// keeps both, plus the grapheme cluster boundaries a cut must respect.
pub struct TextIndex<'a> {
    text: &'a str,
    chars: Vec<char>,
    /// Byte offset of every char, plus the text length
    bytes: Vec<usize>,
    /// `grapheme[i]` is true when char offset `i` starts a grapheme cluster
    grapheme: Vec<bool>,
}

impl<'a> TextIndex<'a> {
    pub fn new(text: &'a str) -> Self {
        let mut chars = Vec::with_capacity(text.len());
        let mut bytes = Vec::with_capacity(text.len() + 1);
        for (offset, c) in text.char_indices() {
            bytes.push(offset);
            chars.push(c);
        }
        bytes.push(text.len());

        let mut grapheme = vec![false; chars.len() + 1];
        grapheme[chars.len()] = true;
        for (byte, _) in text.grapheme_indices(true) {
            if let Ok(i) = bytes.binary_search(&byte) {
                grapheme[i] = true;
            }
        }

        Self {
            text,
            chars,
            bytes,
            grapheme,
        }
    }

    pub fn as_str(&self) -> &'a str {
        self.text
    }

    /// Length in characters.
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn char_at(&self, offset: usize) -> Option<char> {
        self.chars.get(offset).copied()
    }

    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    /// Text of the char range `[start, end)`.
    pub fn slice(&self, start: usize, end: usize) -> &'a str {
        let end = end.min(self.len());
        let start = start.min(end);
        &self.text[self.bytes[start]..self.bytes[end]]
    }

    /// Char offset of a byte offset that lies on a char boundary.
    pub fn char_offset(&self, byte: usize) -> usize {
        match self.bytes.binary_search(&byte) {
            Ok(i) => i,
            Err(i) => i,
        }
    }

    /// Whether a cut at `offset` would not split a grapheme cluster.
    pub fn is_grapheme_boundary(&self, offset: usize) -> bool {
        self.grapheme.get(offset).copied().unwrap_or(true)
    }

    /// Char ranges of every match of the given patterns, sorted by start.
    pub fn protected_ranges(&self, patterns: &[Regex]) -> Vec<Span> {
        let mut ranges: Vec<Span> = patterns
            .iter()
            .flat_map(|re| re.find_iter(self.text))
            .map(|m| Span::new(self.char_offset(m.start()), self.char_offset(m.end())))
            .filter(|s| s.len() > 1)
            .collect();
        ranges.sort_by_key(|s| (s.start, s.end));
        ranges
    }

    /// First offset at or after `offset` (capped at `limit`) that cuts neither
    /// a grapheme cluster nor a protected range.
    pub fn next_safe_boundary(&self, offset: usize, limit: usize, protected: &[Span]) -> usize {
        let mut pos = offset.min(limit);
        loop {
            if pos >= limit {
                return limit;
            }
            if let Some(range) = containing_range(protected, pos) {
                pos = range.end;
                continue;
            }
            if !self.is_grapheme_boundary(pos) {
                pos += 1;
                continue;
            }
            return pos;
        }
    }
}

/// The protected range strictly containing `pos`, if any.
fn containing_range(protected: &[Span], pos: usize) -> Option<Span> {
    // Ranges are sorted by start; only those starting before `pos` can contain it.
    let candidates = protected.partition_point(|r| r.start < pos);
    protected[..candidates]
        .iter()
        .rev()
        .find(|r| r.end > pos)
        .copied()
}

/// Regexes matching each abbreviation as a whole word, case-insensitively.
pub fn abbreviation_patterns(abbreviations: &[String]) -> Vec<Regex> {
    abbreviations
        .iter()
        .filter(|a| !a.trim().is_empty())
        .filter_map(|a| {
            let escaped = a
                .split_whitespace()
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(r"\s+");
            Regex::new(&format!(r"(?i)(?:^|\b){escaped}")).ok()
        })
        .collect()
}

/// Rebuild the cleaned text from chunks by dropping each overlap.
pub fn reconstruct(chunks: &[Chunk]) -> String {
    let mut text = String::new();
    let mut covered: usize = 0;
    for chunk in chunks {
        let skip = covered.saturating_sub(chunk.start);
        text.extend(chunk.text.chars().skip(skip));
        covered = covered.max(chunk.end);
    }
    text
}

/// Token counter trait for counting tokens in text.
pub trait TokenCounter: Send + Sync {
    /// Count the number of tokens in the given text.
    fn count_tokens(&self, text: &str) -> usize;
}

/// Default token counter using tiktoken (cl100k_base encoding).
pub struct TiktokenCounter {
    bpe: tiktoken_rs::CoreBPE,
}

impl TiktokenCounter {
    /// Create a new token counter with the cl100k_base encoding.
    pub fn new() -> Result<Self> {
        Self::with_encoding("cl100k_base")
    }

    /// Create a token counter with a specific encoding.
    pub fn with_encoding(encoding_name: &str) -> Result<Self> {
        let bpe = match encoding_name {
            "cl100k_base" => tiktoken_rs::cl100k_base()?,
            "p50k_base" => tiktoken_rs::p50k_base()?,
            "r50k_base" => tiktoken_rs::r50k_base()?,
            other => anyhow::bail!("unknown tiktoken encoding {other:?}"),
        };
        Ok(Self { bpe })
    }
}

impl TokenCounter for TiktokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;

    use super::TokenCounter;
    use crate::types::Document;

    /// Counts whitespace-separated words.
    pub struct WordCounter;

    impl TokenCounter for WordCounter {
        fn count_tokens(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }
    }

    pub fn test_document() -> Document {
        Document::from_path(Path::new("/in"), Path::new("/in/test-doc.pdf"), Some("it"))
    }

    /// Deterministic ASCII filler without abbreviations.
    pub fn filler(len: usize) -> String {
        "lorem ipsum dolor sit amet consectetur adipiscing elit "
            .chars()
            .cycle()
            .take(len)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_index_multibyte() {
        let index = TextIndex::new("città è qui");
        assert_eq!(index.len(), 11);
        assert_eq!(index.slice(0, 5), "città");
        assert_eq!(index.slice(6, 7), "è");
        assert_eq!(index.char_offset("città".len()), 5);
    }

    #[test]
    fn test_grapheme_boundaries() {
        // "e" followed by a combining acute accent is one grapheme, two chars
        let index = TextIndex::new("ae\u{301}b");
        assert!(index.is_grapheme_boundary(1));
        assert!(!index.is_grapheme_boundary(2));
        assert!(index.is_grapheme_boundary(3));
        assert_eq!(index.next_safe_boundary(2, 4, &[]), 3);
    }

    #[test]
    fn test_protected_abbreviation_pushes_forward() {
        let text = "see art. 5 of the code";
        let index = TextIndex::new(text);
        let protected = index.protected_ranges(&abbreviation_patterns(&["art.".to_string()]));
        assert_eq!(protected, vec![Span::new(4, 8)]);
        assert_eq!(index.next_safe_boundary(6, index.len(), &protected), 8);
        assert_eq!(index.next_safe_boundary(4, index.len(), &protected), 4);
    }

    #[test]
    fn test_abbreviation_needs_word_start() {
        let patterns = abbreviation_patterns(&["art.".to_string()]);
        let index = TextIndex::new("la parte. Poi");
        assert!(index.protected_ranges(&patterns).is_empty());
    }

    struct FixedSpans(Vec<Span>);

    impl Chunker for FixedSpans {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn strategy(&self) -> Strategy {
            Strategy::SlidingWindow
        }

        fn split(&self, _text: &TextIndex<'_>) -> Vec<Span> {
            self.0.clone()
        }
    }

    #[test]
    fn test_chunk_records_overlap_with_previous() {
        let chunker = FixedSpans(vec![Span::new(0, 6), Span::new(4, 9), Span::new(9, 12)]);
        let cleaned = CleanedText::from_text("abcdefghijkl");
        let chunks = chunker.chunk(&test_support::test_document(), &cleaned);

        let overlaps: Vec<usize> = chunks.iter().map(|c| c.metadata.overlap).collect();
        assert_eq!(overlaps, vec![0, 2, 0]);
        assert_eq!(reconstruct(&chunks), "abcdefghijkl");
    }

    #[test]
    fn test_reconstruct_drops_overlap() {
        let doc = test_support::test_document();
        let a = Chunk::new(&doc, 0, 0, 6, "abcdef".to_string());
        let b = Chunk::new(&doc, 1, 4, 9, "efghi".to_string());
        assert_eq!(reconstruct(&[a, b]), "abcdefghi");
    }
}
