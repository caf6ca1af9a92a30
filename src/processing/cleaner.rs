//! Text normalization between extraction and segmentation.
//!
//! Cleaning is best-effort and never fails. Each page is normalized on its
//! own (whitespace, recurring headers and footers, page numbers, paragraph
//! reflow, punctuation, custom patterns) and the pages are then joined,
//! recording where each one starts in the cleaned text.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::ConfigurationError;
use crate::types::{CleanedText, CleanerConfig, CleaningStats, RawText};

lazy_static! {
    static ref PAGE_NUMBER: Regex = Regex::new(r"^[-–—\s]*\d+[-–—\s]*$").unwrap();
    static ref SPACE_BEFORE_PUNCT: Regex = Regex::new(r"[ \t]+([.,;:!?])").unwrap();
    static ref NO_SPACE_AFTER_PUNCT: Regex = Regex::new(r"([,;:!?])(\p{L})").unwrap();
    static ref NO_SPACE_AFTER_PERIOD: Regex = Regex::new(r"(\p{Ll}{2,})\.(\p{Lu})").unwrap();
}

const STRONG_PUNCTUATION: [char; 5] = ['.', '!', '?', ':', ';'];

/// Where a candidate header or footer line sits on its page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Edge {
    Top(usize),
    Bottom(usize),
}

/// Normalizes raw page text.
pub struct Cleaner {
    config: CleanerConfig,
    custom: Vec<(Regex, String)>,
}

impl Cleaner {
    /// Create a cleaner, compiling its custom patterns.
    pub fn new(config: &CleanerConfig) -> Result<Self, ConfigurationError> {
        Ok(Self {
            custom: config.compile_patterns()?,
            config: config.clone(),
        })
    }

    /// Clean a document's raw text.
    pub fn clean(&self, raw: &RawText) -> CleanedText {
        let mut stats = CleaningStats::default();

        let mut pages: Vec<Vec<String>> = raw.pages().map(normalize_lines).collect();
        stats.headers_stripped = self.strip_headers_footers(&mut pages);

        let mut page_texts = Vec::with_capacity(pages.len());
        for lines in pages {
            let lines: Vec<String> = lines
                .into_iter()
                .filter(|line| {
                    let is_number = !line.is_empty() && PAGE_NUMBER.is_match(line);
                    if is_number {
                        stats.page_numbers_removed += 1;
                    }
                    !is_number
                })
                .collect();

            let text = normalize_punctuation(&self.reflow(&lines));
            page_texts.push(self.apply_custom(text, &mut stats));
        }

        let (text, page_starts) = self.join_pages(&page_texts);

        let raw_len = raw.as_str().chars().count();
        let cleaned_len = text.chars().count();
        stats.chars_removed = raw_len.saturating_sub(cleaned_len);

        if text.trim().is_empty() && raw.has_text() {
            warn!(
                source = %raw.source_path.display(),
                "Cleaning removed all text; keeping the raw text unmodified"
            );
            return degraded(raw);
        }

        debug!(
            source = %raw.source_path.display(),
            chars = cleaned_len,
            removed = stats.chars_removed,
            headers = stats.headers_stripped,
            page_numbers = stats.page_numbers_removed,
            "Cleaned text"
        );

        CleanedText {
            text,
            page_starts,
            stats,
            degraded: false,
        }
    }

    /// Blank out lines recurring verbatim at the same top or bottom position
    /// on enough pages. Returns the number of lines removed.
    fn strip_headers_footers(&self, pages: &mut [Vec<String>]) -> usize {
        let threshold = self.config.header_footer_min_pages;
        if pages.len() < threshold {
            return 0;
        }

        let candidates: Vec<Vec<(Edge, usize)>> = pages
            .iter()
            .map(|lines| edge_lines(lines, self.config.header_scan_lines))
            .collect();

        let mut counts: HashMap<(Edge, &str), usize> = HashMap::new();
        for (lines, edges) in pages.iter().zip(&candidates) {
            for &(edge, idx) in edges {
                *counts.entry((edge, lines[idx].as_str())).or_default() += 1;
            }
        }

        let recurring: Vec<Vec<usize>> = pages
            .iter()
            .zip(&candidates)
            .map(|(lines, edges)| {
                edges
                    .iter()
                    .filter(|(edge, idx)| {
                        counts
                            .get(&(*edge, lines[*idx].as_str()))
                            .is_some_and(|&n| n >= threshold)
                    })
                    .map(|&(_, idx)| idx)
                    .collect()
            })
            .collect();

        let mut stripped = 0;
        for (lines, indexes) in pages.iter_mut().zip(recurring) {
            for idx in indexes {
                if !lines[idx].is_empty() {
                    lines[idx].clear();
                    stripped += 1;
                }
            }
        }
        stripped
    }

    /// Join wrapped lines into paragraphs separated by a blank line.
    fn reflow(&self, lines: &[String]) -> String {
        let mut paragraphs: Vec<String> = Vec::new();
        let mut current = String::new();

        for line in lines {
            if line.is_empty() {
                if !current.is_empty() {
                    paragraphs.push(std::mem::take(&mut current));
                }
                continue;
            }
            if current.is_empty() {
                current.push_str(line);
                continue;
            }

            if ends_strong(&current) && starts_upper(line) {
                paragraphs.push(std::mem::take(&mut current));
                current.push_str(line);
            } else if self.config.dehyphenate && is_hyphenated(&current, line) {
                current.pop();
                current.push_str(line);
            } else {
                current.push(' ');
                current.push_str(line);
            }
        }

        if !current.is_empty() {
            paragraphs.push(current);
        }
        paragraphs.join("\n\n")
    }

    fn apply_custom(&self, mut text: String, stats: &mut CleaningStats) -> String {
        for (pattern, replacement) in &self.custom {
            let matches = pattern.find_iter(&text).count();
            if matches > 0 {
                text = pattern.replace_all(&text, replacement.as_str()).into_owned();
                stats.pattern_replacements += matches;
            }
        }
        text
    }

    /// Concatenate page texts, returning the text and each page's char offset.
    fn join_pages(&self, pages: &[String]) -> (String, Vec<usize>) {
        let mut text = String::new();
        let mut len = 0;
        let mut page_starts = Vec::with_capacity(pages.len());

        for page in pages {
            let page = page.trim();
            if page.is_empty() {
                page_starts.push(len);
                continue;
            }

            if !text.is_empty() {
                if ends_strong(&text) && starts_upper(page) {
                    text.push_str("\n\n");
                    len += 2;
                } else if self.config.dehyphenate && is_hyphenated(&text, page) {
                    text.pop();
                    len -= 1;
                } else {
                    text.push(' ');
                    len += 1;
                }
            }

            page_starts.push(len);
            text.push_str(page);
            len += page.chars().count();
        }

        (text, page_starts)
    }
}

/// Split a page into lines with line endings normalized and runs of
/// whitespace collapsed. Blank lines become empty strings.
fn normalize_lines(page: &str) -> Vec<String> {
    page.replace("\r\n", "\n")
        .replace('\r', "\n")
        .split('\n')
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect()
}

/// Indexes of the first and last `scan` non-blank lines, tagged by position.
fn edge_lines(lines: &[String], scan: usize) -> Vec<(Edge, usize)> {
    let non_blank: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| !l.is_empty())
        .map(|(i, _)| i)
        .collect();

    let mut edges: Vec<(Edge, usize)> = non_blank
        .iter()
        .take(scan)
        .enumerate()
        .map(|(pos, &idx)| (Edge::Top(pos), idx))
        .collect();

    let bottom: Vec<(Edge, usize)> = non_blank
        .iter()
        .rev()
        .take(scan)
        .enumerate()
        .filter(|&(_, idx)| !edges.iter().any(|&(_, top)| top == *idx))
        .map(|(pos, &idx)| (Edge::Bottom(pos), idx))
        .collect();
    edges.extend(bottom);
    edges
}

fn normalize_punctuation(text: &str) -> String {
    let text = SPACE_BEFORE_PUNCT.replace_all(text, "$1");
    let text = NO_SPACE_AFTER_PUNCT.replace_all(&text, "$1 $2");
    NO_SPACE_AFTER_PERIOD.replace_all(&text, "$1. $2").into_owned()
}

fn ends_strong(text: &str) -> bool {
    text.trim_end()
        .chars()
        .last()
        .is_some_and(|c| STRONG_PUNCTUATION.contains(&c))
}

fn starts_upper(text: &str) -> bool {
    text.chars().next().is_some_and(char::is_uppercase)
}

/// `juris-` followed by `diction`: a word broken across a line.
fn is_hyphenated(current: &str, next: &str) -> bool {
    let mut tail = current.chars().rev();
    tail.next() == Some('-')
        && tail.next().is_some_and(char::is_alphabetic)
        && next.chars().next().is_some_and(char::is_lowercase)
}

/// The raw text, unmodified, flagged as degraded.
fn degraded(raw: &RawText) -> CleanedText {
    let mut page_starts = Vec::with_capacity(raw.page_count());
    let mut offset = 0;
    for page in raw.pages() {
        page_starts.push(offset);
        offset += page.chars().count();
    }

    CleanedText {
        text: raw.as_str().to_string(),
        page_starts,
        stats: CleaningStats::default(),
        degraded: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PatternRule;
    use pretty_assertions::assert_eq;

    fn cleaner() -> Cleaner {
        Cleaner::new(&CleanerConfig::default()).unwrap()
    }

    #[test]
    fn test_headers_footers_and_page_numbers_removed() {
        let pages: Vec<String> = (1..=3)
            .map(|n| format!("TRIBUNALE DI MILANO\nSezione civile\nTesto della pagina {n}.\n- {n} -"))
            .collect();
        let raw = RawText::from_pages("s.pdf", &pages);
        let cleaned = cleaner().clean(&raw);

        assert!(!cleaned.text.contains("TRIBUNALE"));
        assert!(!cleaned.text.contains("Sezione civile"));
        assert_eq!(cleaned.stats.headers_stripped, 6);
        assert_eq!(cleaned.stats.page_numbers_removed, 3);
        assert_eq!(
            cleaned.text,
            "Testo della pagina 1.\n\nTesto della pagina 2.\n\nTesto della pagina 3."
        );
    }

    #[test]
    fn test_header_below_threshold_kept() {
        let raw = RawText::from_pages("s.pdf", &["INTESTAZIONE\nuno", "INTESTAZIONE\ndue"]);
        let cleaned = cleaner().clean(&raw);
        assert!(cleaned.text.contains("INTESTAZIONE"));
        assert_eq!(cleaned.stats.headers_stripped, 0);
    }

    #[test]
    fn test_reflow_and_paragraph_boundaries() {
        let raw = RawText::from_pages(
            "s.pdf",
            &["La riga che\ncontinua qui.\nNuovo paragrafo   con  spazi\r\n\r\nterzo"],
        );
        let cleaned = cleaner().clean(&raw);
        assert_eq!(
            cleaned.text,
            "La riga che continua qui.\n\nNuovo paragrafo con spazi\n\nterzo"
        );
    }

    #[test]
    fn test_dehyphenation() {
        let raw = RawText::from_pages("s.pdf", &["La giuris-\ndizione del tribunale"]);
        assert_eq!(cleaner().clean(&raw).text, "La giurisdizione del tribunale");

        let config = CleanerConfig {
            dehyphenate: false,
            ..Default::default()
        };
        let cleaned = Cleaner::new(&config).unwrap().clean(&raw);
        assert_eq!(cleaned.text, "La giuris- dizione del tribunale");
    }

    #[test]
    fn test_punctuation_spacing() {
        let raw = RawText::from_pages("s.pdf", &["parola , altra ;fine della frase.Poi ancora"]);
        assert_eq!(
            cleaner().clean(&raw).text,
            "parola, altra; fine della frase. Poi ancora"
        );
    }

    #[test]
    fn test_abbreviation_with_capital_untouched() {
        let raw = RawText::from_pages("s.pdf", &["la S.p.A. ricorrente"]);
        assert_eq!(cleaner().clean(&raw).text, "la S.p.A. ricorrente");
    }

    #[test]
    fn test_custom_patterns_applied_in_order() {
        let config = CleanerConfig {
            custom_patterns: vec![
                PatternRule::new(r"\[\d+\]", ""),
                PatternRule::new(r"foo", "bar"),
                PatternRule::new(r"bar", "baz"),
                PatternRule::new(r" {2,}", " "),
            ],
            ..Default::default()
        };
        let raw = RawText::from_pages("s.pdf", &["testo [12] foo qui"]);
        let cleaned = Cleaner::new(&config).unwrap().clean(&raw);
        assert_eq!(cleaned.text, "testo baz qui");
        assert_eq!(cleaned.stats.pattern_replacements, 4);
    }

    #[test]
    fn test_page_starts_recorded() {
        let raw = RawText::from_pages("s.pdf", &["Prima pagina.", "", "Seconda pagina", "continua"]);
        let cleaned = cleaner().clean(&raw);
        assert_eq!(cleaned.text, "Prima pagina.\n\nSeconda pagina continua");
        assert_eq!(cleaned.page_starts, vec![0, 13, 15, 30]);
        assert_eq!(cleaned.page_range(0, 5), Some((1, 1)));
        assert_eq!(cleaned.page_range(15, 38), Some((3, 4)));
    }

    #[test]
    fn test_hyphen_across_pages() {
        let raw = RawText::from_pages("s.pdf", &["la compe-", "tenza del giudice"]);
        let cleaned = cleaner().clean(&raw);
        assert_eq!(cleaned.text, "la competenza del giudice");
        assert_eq!(cleaned.page_starts, vec![0, 8]);
    }

    #[test]
    fn test_degrades_when_everything_removed() {
        let config = CleanerConfig {
            custom_patterns: vec![PatternRule::new(r"(?s).+", "")],
            ..Default::default()
        };
        let raw = RawText::from_pages("s.pdf", &["qualcosa", "altro"]);
        let cleaned = Cleaner::new(&config).unwrap().clean(&raw);
        assert!(cleaned.degraded);
        assert_eq!(cleaned.text, "qualcosaaltro");
        assert_eq!(cleaned.page_starts, vec![0, 8]);
    }

    #[test]
    fn test_blank_input_is_not_degraded() {
        let raw = RawText::from_pages("s.pdf", &["   ", "\n\n"]);
        let cleaned = cleaner().clean(&raw);
        assert!(!cleaned.degraded);
        assert!(cleaned.is_blank());
    }
}
