//! Hybrid chunker: sentences accumulated up to a token budget.

use std::sync::Arc;

use regex::Regex;

use super::base::{abbreviation_patterns, Chunker, Span, TextIndex, TiktokenCounter, TokenCounter};
use super::semantic::paragraph_spans;
use crate::error::ConfigurationError;
use crate::types::{JobConfig, Strategy};

/// Characters that may follow a sentence terminator before the break.
const CLOSERS: [char; 7] = ['"', '\'', ')', ']', '»', '”', '’'];

/// A sentence span and whether it closes its paragraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Sentence {
    pub span: Span,
    pub ends_paragraph: bool,
}

/// Sentence-based chunker that packs sentences up to `max_tokens`.
///
/// The sentence detector ignores periods that belong to a configured
/// abbreviation, so "op. cit." or "ex art." never end a sentence. The last
/// `overlap_tokens` worth of sentences of each chunk open the next one.
pub struct HybridChunker {
    min_tokens: usize,
    max_tokens: usize,
    overlap_tokens: usize,
    abbreviations: Vec<Regex>,
    counter: Arc<dyn TokenCounter>,
}

impl HybridChunker {
    /// Create a hybrid chunker with an explicit token counter.
    pub fn with_counter(
        min_tokens: usize,
        max_tokens: usize,
        overlap_tokens: usize,
        counter: Arc<dyn TokenCounter>,
    ) -> Self {
        let max_tokens = max_tokens.max(1);
        Self {
            min_tokens: min_tokens.min(max_tokens),
            max_tokens,
            overlap_tokens: overlap_tokens.min(max_tokens - 1),
            abbreviations: Vec::new(),
            counter,
        }
    }

    /// Create a chunker from the job configuration, counting with tiktoken.
    pub fn from_config(config: &JobConfig) -> Result<Self, ConfigurationError> {
        let counter = TiktokenCounter::new().map_err(|e| ConfigurationError::InvalidValue {
            field: "strategy",
            reason: format!("tokenizer unavailable: {e}"),
        })?;

        Ok(Self::with_counter(
            config.min_tokens_per_chunk,
            config.max_tokens_per_chunk,
            config.overlap_tokens,
            Arc::new(counter),
        )
        .with_abbreviations(abbreviation_patterns(&config.abbreviations)))
    }

    pub fn with_abbreviations(mut self, abbreviations: Vec<Regex>) -> Self {
        self.abbreviations = abbreviations;
        self
    }

    /// Sentences of the text, covering it without gaps.
    pub(crate) fn sentences(&self, text: &TextIndex<'_>) -> Vec<Sentence> {
        let abbreviations = text.protected_ranges(&self.abbreviations);
        let chars = text.chars();
        let mut sentences = Vec::new();

        for paragraph in paragraph_spans(text) {
            let mut start = paragraph.start;
            let mut i = paragraph.start;

            while i < paragraph.end {
                let c = chars[i];
                if !matches!(c, '.' | '!' | '?') {
                    i += 1;
                    continue;
                }

                let mut j = i + 1;
                while j < paragraph.end && CLOSERS.contains(&chars[j]) {
                    j += 1;
                }
                let at_break = j == paragraph.end || chars[j].is_whitespace();
                if !at_break || (c == '.' && inside(&abbreviations, i)) {
                    i = j;
                    continue;
                }

                while j < paragraph.end && chars[j].is_whitespace() {
                    j += 1;
                }
                if j < paragraph.end {
                    sentences.push(Sentence {
                        span: Span::new(start, j),
                        ends_paragraph: false,
                    });
                    start = j;
                }
                i = j;
            }

            if start < paragraph.end {
                sentences.push(Sentence {
                    span: Span::new(start, paragraph.end),
                    ends_paragraph: true,
                });
            }
        }

        sentences
    }
}

/// Whether `pos` falls within one of the sorted ranges.
fn inside(ranges: &[Span], pos: usize) -> bool {
    let candidates = ranges.partition_point(|r| r.start <= pos);
    ranges[..candidates].iter().any(|r| r.end > pos)
}

impl Chunker for HybridChunker {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    fn strategy(&self) -> Strategy {
        Strategy::Hybrid
    }

    fn description(&self) -> &'static str {
        "Abbreviation-aware sentences packed up to a token budget with sentence overlap"
    }

    fn count_tokens(&self, text: &str) -> Option<usize> {
        Some(self.counter.count_tokens(text))
    }

    fn split(&self, text: &TextIndex<'_>) -> Vec<Span> {
        let sentences = self.sentences(text);
        let n = sentences.len();
        if n == 0 {
            return vec![];
        }

        let tokens: Vec<usize> = sentences
            .iter()
            .map(|s| self.counter.count_tokens(text.slice(s.span.start, s.span.end)))
            .collect();

        let mut spans = Vec::new();
        let mut start = 0;
        // First sentence not yet emitted in any chunk
        let mut fresh = 0;

        loop {
            let mut total = 0;
            let mut end = start;

            while end < n {
                if end > fresh && total + tokens[end] > self.max_tokens {
                    break;
                }
                total += tokens[end];
                end += 1;
                // Past the floor, a paragraph end closes the chunk
                if end > fresh && total >= self.min_tokens && sentences[end - 1].ends_paragraph {
                    break;
                }
            }

            spans.push(Span::new(
                sentences[start].span.start,
                sentences[end - 1].span.end,
            ));
            if end >= n {
                break;
            }

            // Trailing sentences repeated at the head of the next chunk; never
            // the first one, so every chunk starts later than the last.
            let mut next = end;
            let mut carried = 0;
            while next - 1 > start && carried + tokens[next - 1] <= self.overlap_tokens {
                next -= 1;
                carried += tokens[next];
            }
            while next < end && carried + tokens[end] > self.max_tokens {
                carried -= tokens[next];
                next += 1;
            }

            start = next;
            fresh = end;
        }

        spans
    }
}
