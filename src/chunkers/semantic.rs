//! Paragraph-based chunker.

use regex::Regex;

use super::base::{abbreviation_patterns, Chunker, Span, TextIndex};
use super::sliding_window::window_spans;
use crate::error::ConfigurationError;
use crate::types::{JobConfig, Strategy};

/// Characters that end a paragraph when followed by a line starting with a capital.
const STRONG_PUNCTUATION: [char; 5] = ['.', '!', '?', ':', ';'];

/// Semantic chunker that accumulates whole paragraphs.
///
/// Paragraphs are added to the current chunk until the next one would push it
/// past `max_size`. A paragraph that is too large on its own is cut with the
/// sliding-window rule. An undersized final chunk is folded into its
/// predecessor (see [`SemanticChunker::settle_tail`]).
pub struct SemanticChunker {
    min_size: usize,
    max_size: usize,
    overlap: usize,
    protected: Vec<Regex>,
}

impl SemanticChunker {
    pub fn new(min_size: usize, max_size: usize, overlap: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            min_size: min_size.min(max_size),
            max_size,
            overlap: overlap.min(max_size.saturating_sub(1)),
            protected: Vec::new(),
        }
    }

    /// Create a chunker from the job configuration.
    pub fn from_config(config: &JobConfig) -> Result<Self, ConfigurationError> {
        let mut protected = abbreviation_patterns(&config.abbreviations);
        protected.extend(config.compile_do_not_split()?);
        Ok(
            Self::new(config.min_chunk_size, config.max_chunk_size, config.overlap)
                .with_protected(protected),
        )
    }

    /// Patterns a force-split boundary may not cut.
    pub fn with_protected(mut self, protected: Vec<Regex>) -> Self {
        self.protected = protected;
        self
    }

    /// Fold an undersized last span into the one before it.
    ///
    /// Merges when the result fits `max_size`. Otherwise the combined region
    /// is cut again at the whitespace nearest its midpoint where the first
    /// part stays within `max_size` and the last lands in
    /// `[min_size, max_size]`. Failing both, it merges anyway.
    fn settle_tail(&self, text: &TextIndex<'_>, spans: &mut Vec<Span>) {
        if spans.len() < 2 {
            return;
        }
        let last = spans[spans.len() - 1];
        if last.len() >= self.min_size {
            return;
        }

        let prev = spans[spans.len() - 2];
        let merged = Span::new(prev.start, last.end);
        spans.truncate(spans.len() - 2);

        if merged.len() <= self.max_size {
            spans.push(merged);
            return;
        }

        match self.rebalance_point(text, merged) {
            Some(cut) => {
                spans.push(Span::new(merged.start, cut));
                spans.push(Span::new(cut, merged.end));
            }
            None => spans.push(merged),
        }
    }

    fn rebalance_point(&self, text: &TextIndex<'_>, span: Span) -> Option<usize> {
        let head_fits = |len: usize| len > 0 && len <= self.max_size;
        let tail_fits = |len: usize| len >= self.min_size && len <= self.max_size;
        let mid = span.start + span.len() / 2;

        for distance in 0..=span.len() / 2 {
            for cut in [mid.checked_sub(distance), Some(mid + distance)].into_iter().flatten() {
                if cut <= span.start || cut >= span.end {
                    continue;
                }
                let after_space = text.char_at(cut - 1).is_some_and(char::is_whitespace);
                if after_space
                    && text.is_grapheme_boundary(cut)
                    && head_fits(cut - span.start)
                    && tail_fits(span.end - cut)
                {
                    return Some(cut);
                }
            }
        }
        None
    }
}

impl Chunker for SemanticChunker {
    fn name(&self) -> &'static str {
        "semantic"
    }

    fn strategy(&self) -> Strategy {
        Strategy::Semantic
    }

    fn description(&self) -> &'static str {
        "Accumulates whole paragraphs up to the size limit"
    }

    fn split(&self, text: &TextIndex<'_>) -> Vec<Span> {
        let protected = text.protected_ranges(&self.protected);
        let mut spans = Vec::new();
        let mut current: Option<Span> = None;

        for paragraph in paragraph_spans(text) {
            if paragraph.len() > self.max_size {
                if let Some(done) = current.take() {
                    spans.push(done);
                }
                let mut pieces =
                    window_spans(text, paragraph, self.max_size, self.overlap, &protected);
                // The remainder keeps accumulating following paragraphs
                current = pieces.pop();
                spans.extend(pieces);
                continue;
            }

            current = match current {
                Some(open) if paragraph.end - open.start <= self.max_size => {
                    Some(Span::new(open.start, paragraph.end))
                }
                Some(open) => {
                    spans.push(open);
                    Some(paragraph)
                }
                None => Some(paragraph),
            };
        }

        if let Some(done) = current {
            spans.push(done);
        }

        self.settle_tail(text, &mut spans);
        spans
    }
}

/// Split text into paragraphs that cover it without gaps.
///
/// A paragraph ends after a blank line, or after a single line break when the
/// line ends in strong punctuation and the next one starts with a capital.
/// The separating whitespace belongs to the paragraph it ends.
pub(crate) fn paragraph_spans(text: &TextIndex<'_>) -> Vec<Span> {
    let chars = text.chars();
    let mut spans = Vec::new();
    let mut start = 0;
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '\n' {
            i += 1;
            continue;
        }

        let mut j = i;
        let mut newlines = 0;
        while j < chars.len() && chars[j].is_whitespace() {
            if chars[j] == '\n' {
                newlines += 1;
            }
            j += 1;
        }

        let boundary = j < chars.len()
            && (newlines >= 2 || {
                let ends_strong = chars[start..i]
                    .iter()
                    .rev()
                    .find(|c| !c.is_whitespace())
                    .is_some_and(|c| STRONG_PUNCTUATION.contains(c));
                ends_strong && chars[j].is_uppercase()
            });

        if boundary && j > start {
            spans.push(Span::new(start, j));
            start = j;
        }
        i = j;
    }

    if start < chars.len() {
        spans.push(Span::new(start, chars.len()));
    }
    spans
}
