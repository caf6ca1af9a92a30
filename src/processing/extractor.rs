//! PDF text extraction in bounded page batches.
//!
//! The PDF library sits behind [`PdfOpener`] and [`PdfSource`]. Pages are
//! read on the blocking pool, a batch at a time, each page under its own
//! timeout. A page that times out or cannot be read contributes no text and
//! is recorded as a [`PageWarning`]; the document only fails when every page
//! does.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::error::ExtractionError;
use crate::types::{JobConfig, PageWarning, RawText};

/// Opens a PDF file.
pub trait PdfOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Arc<dyn PdfSource>, ExtractionError>;
}

/// An opened PDF whose pages can be read independently.
pub trait PdfSource: Send + Sync {
    fn page_count(&self) -> usize;

    /// Text of a 1-based page.
    fn page_text(&self, page: usize) -> Result<String, String>;
}

/// [`PdfOpener`] backed by `lopdf`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfOpener;

impl PdfOpener for LopdfOpener {
    fn open(&self, path: &Path) -> Result<Arc<dyn PdfSource>, ExtractionError> {
        let bytes = std::fs::read(path).map_err(|source| ExtractionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Arc::new(LopdfSource::from_bytes(&bytes)?))
    }
}

/// A PDF loaded with `lopdf`.
pub struct LopdfSource {
    document: lopdf::Document,
    /// Page numbers as stored in the page tree
    pages: Vec<u32>,
}

impl LopdfSource {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ExtractionError> {
        let document = lopdf::Document::load_mem(bytes).map_err(|e| {
            let message = e.to_string();
            let lower = message.to_lowercase();
            if ["encrypt", "decrypt", "password"].iter().any(|k| lower.contains(k)) {
                ExtractionError::PasswordProtected
            } else {
                ExtractionError::Corrupt(message)
            }
        })?;

        if document.is_encrypted() {
            return Err(ExtractionError::PasswordProtected);
        }

        let pages = document.get_pages().keys().copied().collect();
        Ok(Self { document, pages })
    }
}

impl PdfSource for LopdfSource {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_text(&self, page: usize) -> Result<String, String> {
        let number = page
            .checked_sub(1)
            .and_then(|i| self.pages.get(i))
            .ok_or_else(|| format!("page {page} out of range"))?;
        self.document
            .extract_text(&[*number])
            .map_err(|e| e.to_string())
    }
}

/// Reads a document's pages into [`RawText`].
pub struct Extractor {
    opener: Arc<dyn PdfOpener>,
    max_pages_per_batch: usize,
    timeout_per_page: Duration,
}

impl Extractor {
    pub fn new(opener: Arc<dyn PdfOpener>, max_pages_per_batch: usize, timeout_per_page: Duration) -> Self {
        Self {
            opener,
            max_pages_per_batch: max_pages_per_batch.max(1),
            timeout_per_page,
        }
    }

    /// Create an extractor from the job configuration.
    pub fn from_config(opener: Arc<dyn PdfOpener>, config: &JobConfig) -> Self {
        Self::new(opener, config.max_pages_per_batch, config.page_timeout())
    }

    /// Extract all pages of the PDF at `path`.
    pub async fn extract(&self, path: &Path) -> Result<RawText, ExtractionError> {
        let source = self.open(path).await?;
        let page_count = source.page_count();
        if page_count == 0 {
            return Err(ExtractionError::NoPages);
        }

        let mut raw = RawText::new(path);
        let pages: Vec<usize> = (1..=page_count).collect();

        for (batch, numbers) in pages.chunks(self.max_pages_per_batch).enumerate() {
            debug!(
                path = %path.display(),
                batch,
                first_page = numbers[0],
                pages = numbers.len(),
                "Reading page batch"
            );

            let reads = numbers.iter().map(|&page| self.read_page(Arc::clone(&source), page));
            for (page, result) in numbers.iter().zip(join_all(reads).await) {
                match result {
                    Ok(text) => raw.push_page(&text),
                    Err(warning) => {
                        warn!(path = %path.display(), page, "{warning}");
                        raw.push_failed_page(warning);
                    }
                }
            }
        }

        if raw.warnings.len() == page_count {
            return Err(ExtractionError::AllPagesFailed { pages: page_count });
        }

        raw.finish();
        Ok(raw)
    }

    async fn open(&self, path: &Path) -> Result<Arc<dyn PdfSource>, ExtractionError> {
        let opener = Arc::clone(&self.opener);
        let owned: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || opener.open(&owned))
            .await
            .map_err(|e| ExtractionError::Corrupt(format!("PDF loader failed: {e}")))?
    }

    async fn read_page(&self, source: Arc<dyn PdfSource>, page: usize) -> Result<String, PageWarning> {
        // A blocking read cannot be interrupted; after a timeout it finishes
        // in the background and its result is discarded.
        let read = tokio::task::spawn_blocking(move || source.page_text(page));
        match tokio::time::timeout(self.timeout_per_page, read).await {
            Ok(Ok(Ok(text))) => Ok(text),
            Ok(Ok(Err(reason))) => Err(PageWarning::Unreadable { page, reason }),
            Ok(Err(join)) => Err(PageWarning::Unreadable {
                page,
                reason: join.to_string(),
            }),
            Err(_) => Err(PageWarning::timeout(page, self.timeout_per_page)),
        }
    }
}
