//! Document and intermediate text types.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A source PDF discovered by a batch run.
///
/// Identity is the source path; `id` is the stable name derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier derived from the path
    pub id: String,

    /// Path of the source file
    pub path: PathBuf,

    /// Language tag of the document
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Document {
    /// Create a document, deriving its id from the path relative to `root`.
    pub fn from_path(root: &Path, path: &Path, language: Option<&str>) -> Self {
        Self {
            id: document_id(root, path),
            path: path.to_path_buf(),
            language: language.map(String::from),
        }
    }

    /// Path as a display string.
    pub fn path_str(&self) -> String {
        self.path.display().to_string()
    }
}

/// Separator between path components, and before the hash suffix.
const ID_SEPARATOR: &str = "__";

/// Derive a filesystem-safe document id from a path relative to `root`.
///
/// A top-level `name.pdf` whose name is already safe keeps `name` as its id.
/// Any other path gets a readable form followed by `__` and a short hash of
/// the relative path. Plain ids never contain `__`, so the two kinds cannot
/// meet and distinct paths get distinct ids.
pub fn document_id(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let stem = relative.with_extension("");

    let joined = stem
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(ID_SEPARATOR);

    let id: String = joined
        .chars()
        .map(|c| if is_id_char(c) { c } else { '_' })
        .collect();

    let plain = stem.components().count() == 1
        && relative.extension().is_some_and(|e| e == "pdf")
        && !id.is_empty()
        && id == joined
        && !id.contains(ID_SEPARATOR);
    if plain {
        return id;
    }

    let digest = Sha256::digest(relative.as_os_str().as_encoded_bytes());
    let hash = format!("{digest:x}");
    let readable = if id.is_empty() { "document" } else { id.as_str() };
    format!("{readable}{ID_SEPARATOR}{}", &hash[..8])
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// A page that contributed no text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageWarning {
    /// Extraction exceeded the per-page timeout
    Timeout { page: usize, after_ms: u64 },
    /// The PDF library could not read the page
    Unreadable { page: usize, reason: String },
}

impl PageWarning {
    pub fn timeout(page: usize, after: Duration) -> Self {
        PageWarning::Timeout {
            page,
            after_ms: after.as_millis() as u64,
        }
    }

    /// 1-based page number.
    pub fn page(&self) -> usize {
        match self {
            PageWarning::Timeout { page, .. } | PageWarning::Unreadable { page, .. } => *page,
        }
    }
}

impl fmt::Display for PageWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageWarning::Timeout { page, after_ms } => {
                write!(f, "page {page} timed out after {after_ms}ms")
            }
            PageWarning::Unreadable { page, reason } => write!(f, "page {page} unreadable: {reason}"),
        }
    }
}

/// Concatenated page text of one document.
#[derive(Debug, Clone)]
pub struct RawText {
    /// Source file
    pub source_path: PathBuf,

    /// Page texts, concatenated
    text: String,

    /// Byte offset of each page in `text`
    page_offsets: Vec<usize>,

    /// Pages that yielded no text
    pub warnings: Vec<PageWarning>,

    /// When extraction finished
    pub extracted_at: DateTime<Utc>,
}

impl RawText {
    /// Start an empty raw text for a document.
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            text: String::new(),
            page_offsets: Vec::new(),
            warnings: Vec::new(),
            extracted_at: Utc::now(),
        }
    }

    /// Build from a list of page texts.
    pub fn from_pages<S: AsRef<str>>(source_path: impl Into<PathBuf>, pages: &[S]) -> Self {
        let mut raw = Self::new(source_path);
        for page in pages {
            raw.push_page(page.as_ref());
        }
        raw.finish();
        raw
    }

    /// Append the next page.
    pub fn push_page(&mut self, page: &str) {
        self.page_offsets.push(self.text.len());
        self.text.push_str(page);
    }

    /// Append an empty page with the reason it is empty.
    pub fn push_failed_page(&mut self, warning: PageWarning) {
        self.page_offsets.push(self.text.len());
        self.warnings.push(warning);
    }

    /// Stamp the extraction time.
    pub fn finish(&mut self) {
        self.extracted_at = Utc::now();
    }

    pub fn page_count(&self) -> usize {
        self.page_offsets.len()
    }

    /// Text of one page (0-based).
    pub fn page(&self, index: usize) -> Option<&str> {
        let start = *self.page_offsets.get(index)?;
        let end = self
            .page_offsets
            .get(index + 1)
            .copied()
            .unwrap_or(self.text.len());
        Some(&self.text[start..end])
    }

    /// Iterate page texts in order.
    pub fn pages(&self) -> impl Iterator<Item = &str> + '_ {
        (0..self.page_count()).filter_map(move |i| self.page(i))
    }

    /// All page text.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Whether any page has non-whitespace text.
    pub fn has_text(&self) -> bool {
        self.text.chars().any(|c| !c.is_whitespace())
    }
}

/// Statistics gathered while cleaning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleaningStats {
    pub chars_removed: usize,
    pub headers_stripped: usize,
    pub page_numbers_removed: usize,
    pub pattern_replacements: usize,
}

/// Normalized text ready for segmentation.
#[derive(Debug, Clone)]
pub struct CleanedText {
    /// The normalized text
    pub text: String,

    /// Char offset at which each page starts in `text`
    pub page_starts: Vec<usize>,

    /// What the cleaner removed
    pub stats: CleaningStats,

    /// Cleaning failed and `text` is the unmodified input
    pub degraded: bool,
}

impl CleanedText {
    /// Wrap already-clean text as a single page.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            page_starts: vec![0],
            stats: CleaningStats::default(),
            degraded: false,
        }
    }

    /// Length in characters.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// 1-based, inclusive page range covered by the char span `[start, end)`.
    pub fn page_range(&self, start: usize, end: usize) -> Option<(usize, usize)> {
        if self.page_starts.is_empty() {
            return None;
        }
        let page_of = |offset: usize| self.page_starts.partition_point(|&s| s <= offset).max(1);
        let last = end.saturating_sub(1).max(start);
        Some((page_of(start), page_of(last)))
    }
}
