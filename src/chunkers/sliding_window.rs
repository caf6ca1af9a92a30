//! Sliding-window chunker with fixed-size character windows.

use regex::Regex;

use super::base::{abbreviation_patterns, Chunker, Span, TextIndex};
use crate::error::ConfigurationError;
use crate::types::{JobConfig, Strategy};

/// Character-window chunker that advances by `window - overlap`.
///
/// Boundaries are pushed forward (never backward) when they would cut a
/// grapheme cluster or a protected pattern, so a chunk may end up slightly
/// larger than the window but never truncates a token.
pub struct SlidingWindowChunker {
    window: usize,
    overlap: usize,
    protected: Vec<Regex>,
}

impl SlidingWindowChunker {
    /// Create a chunker with the given window and overlap in characters.
    pub fn new(window: usize, overlap: usize) -> Self {
        Self {
            window: window.max(1),
            overlap: overlap.min(window.saturating_sub(1)),
            protected: Vec::new(),
        }
    }

    /// Create a chunker from the job configuration.
    pub fn from_config(config: &JobConfig) -> Result<Self, ConfigurationError> {
        let mut protected = abbreviation_patterns(&config.abbreviations);
        protected.extend(config.compile_do_not_split()?);
        Ok(Self::new(config.max_chunk_size, config.overlap).with_protected(protected))
    }

    /// Set the patterns no boundary may cut.
    pub fn with_protected(mut self, protected: Vec<Regex>) -> Self {
        self.protected = protected;
        self
    }
}

impl Chunker for SlidingWindowChunker {
    fn name(&self) -> &'static str {
        "sliding_window"
    }

    fn strategy(&self) -> Strategy {
        Strategy::SlidingWindow
    }

    fn description(&self) -> &'static str {
        "Fixed-size character windows with overlap, pushed forward to safe boundaries"
    }

    fn split(&self, text: &TextIndex<'_>) -> Vec<Span> {
        let protected = text.protected_ranges(&self.protected);
        window_spans(text, Span::new(0, text.len()), self.window, self.overlap, &protected)
    }
}

/// Cut `range` into overlapping windows.
///
/// Every window but the last is at least `window` characters long; the last
/// ends exactly at `range.end`. Consecutive windows satisfy
/// `prev.end - overlap <= next.start <= prev.end`.
pub(crate) fn window_spans(
    text: &TextIndex<'_>,
    range: Span,
    window: usize,
    overlap: usize,
    protected: &[Span],
) -> Vec<Span> {
    let mut spans = Vec::new();
    if range.is_empty() {
        return spans;
    }

    let overlap = overlap.min(window.saturating_sub(1));
    let mut start = range.start;

    while start < range.end {
        let nominal_end = start + window;
        if nominal_end >= range.end {
            spans.push(Span::new(start, range.end));
            break;
        }

        let end = text.next_safe_boundary(nominal_end, range.end, protected);
        spans.push(Span::new(start, end));
        if end >= range.end {
            break;
        }

        // `end` is itself a safe boundary, so the next start lands in
        // [end - overlap, end] even when `end` was pushed forward.
        start = text.next_safe_boundary(end - overlap, end, protected);
    }

    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunkers::base::reconstruct;
    use crate::chunkers::base::test_support::{filler, test_document};
    use crate::types::CleanedText;

    #[test]
    fn test_empty_content() {
        let chunker = SlidingWindowChunker::new(100, 10);
        let chunks = chunker.chunk(&test_document(), &CleanedText::from_text(""));
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_small_content() {
        let chunker = SlidingWindowChunker::new(100, 10);
        let chunks = chunker.chunk(&test_document(), &CleanedText::from_text("Hello, world!"));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!((chunks[0].start, chunks[0].end), (0, 13));
    }

    #[test]
    fn test_nine_thousand_chars_three_windows() {
        let chunker = SlidingWindowChunker::new(5000, 1500);
        let cleaned = CleanedText::from_text(filler(9000));
        let chunks = chunker.chunk(&test_document(), &cleaned);

        let ranges: Vec<(usize, usize)> = chunks.iter().map(|c| (c.start, c.end)).collect();
        assert_eq!(ranges, vec![(0, 5000), (3500, 8500), (7000, 9000)]);
        assert_eq!(chunks[2].char_count(), 2000);
        assert!(chunks[1].overlaps_previous());
        assert_eq!(chunks[1].metadata.overlap, 1500);
        assert_eq!(reconstruct(&chunks), cleaned.text);
    }

    #[test]
    fn test_non_final_windows_exact_and_overlap_identical() {
        let chunker = SlidingWindowChunker::new(5000, 1500);
        let cleaned = CleanedText::from_text(filler(23_456));
        let chunks = chunker.chunk(&test_document(), &cleaned);

        assert!(chunks.len() > 3);
        for pair in chunks.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            assert_eq!(prev.char_count(), 5000);
            let tail: String = prev.text.chars().skip(5000 - 1500).collect();
            let head: String = next.text.chars().take(1500).collect();
            assert_eq!(tail, head);
        }
        assert_eq!(reconstruct(&chunks), cleaned.text);
    }

    #[test]
    fn test_boundary_pushed_past_protected_abbreviation() {
        // Window of 10 would end inside "art." (chars 9..13)
        let text = "abcd see art. 5 and more text follows here";
        let chunker = SlidingWindowChunker::new(10, 2)
            .with_protected(abbreviation_patterns(&["art.".to_string()]));
        let chunks = chunker.chunk(&test_document(), &CleanedText::from_text(text));

        assert_eq!(chunks[0].text, "abcd see art.");
        for pair in chunks.windows(2) {
            assert!(pair[1].start >= pair[0].end - 2);
            assert!(pair[1].start <= pair[0].end);
        }
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_multibyte_grapheme_never_split() {
        let text = "e\u{301}".repeat(40);
        let chunker = SlidingWindowChunker::new(7, 2);
        let chunks = chunker.chunk(&test_document(), &CleanedText::from_text(text.clone()));

        for chunk in &chunks {
            assert!(chunk.start % 2 == 0 && chunk.end % 2 == 0);
            assert!(!chunk.text.starts_with('\u{301}'));
        }
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_offsets_monotonic() {
        let chunker = SlidingWindowChunker::new(50, 20);
        let chunks = chunker.chunk(&test_document(), &CleanedText::from_text(filler(1234)));
        for pair in chunks.windows(2) {
            assert!(pair[0].start <= pair[1].start);
            assert_eq!(pair[0].index + 1, pair[1].index);
        }
    }
}
