//! Per-document pipeline: extract, clean, segment, write.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, info_span, Instrument, Span};

use crate::chunkers::Chunker;
use crate::error::PipelineError;
use crate::output::OutputManager;
use crate::processing::{Cleaner, Extractor};
use crate::types::Document;

/// Result of running one document through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentOutcome {
    /// Chunks were produced and written.
    Completed {
        chunks: usize,
        /// Pages that yielded no text
        page_warnings: usize,
    },
    /// The document produced no text; nothing was written.
    Empty,
}

/// Runs one document from source file to written output.
#[async_trait]
pub trait DocumentProcessor: Send + Sync {
    async fn process(&self, document: &Document) -> Result<DocumentOutcome, PipelineError>;
}

/// The PDF pipeline: Extractor → Cleaner → Chunker → OutputManager.
pub struct PdfPipeline {
    extractor: Extractor,
    cleaner: Arc<Cleaner>,
    chunker: Arc<dyn Chunker>,
    output: Arc<OutputManager>,
}

impl PdfPipeline {
    pub fn new(
        extractor: Extractor,
        cleaner: Cleaner,
        chunker: Arc<dyn Chunker>,
        output: OutputManager,
    ) -> Self {
        Self {
            extractor,
            cleaner: Arc::new(cleaner),
            chunker,
            output: Arc::new(output),
        }
    }

    async fn run(&self, document: &Document) -> Result<DocumentOutcome, PipelineError> {
        let raw = self.extractor.extract(&document.path).await?;
        let page_warnings = raw.warnings.len();
        debug!(pages = raw.page_count(), page_warnings, "Extracted text");

        // Cleaning, chunking and writing are CPU and disk bound
        let cleaner = Arc::clone(&self.cleaner);
        let chunker = Arc::clone(&self.chunker);
        let output = Arc::clone(&self.output);
        let document = document.clone();
        let span = Span::current();

        tokio::task::spawn_blocking(move || -> Result<DocumentOutcome, PipelineError> {
            let _entered = span.enter();

            let cleaned = cleaner.clean(&raw);
            if cleaned.is_blank() {
                info!("Document produced no text, skipping");
                return Ok(DocumentOutcome::Empty);
            }

            let chunks = chunker.chunk(&document, &cleaned);
            if chunks.is_empty() {
                return Ok(DocumentOutcome::Empty);
            }

            let files = output.write(&document, &chunks)?;
            info!(
                chunks = chunks.len(),
                chars = cleaned.char_len(),
                files = files.len(),
                strategy = chunker.name(),
                "Document chunked"
            );

            Ok(DocumentOutcome::Completed {
                chunks: chunks.len(),
                page_warnings,
            })
        })
        .await
        .map_err(|e| PipelineError::Worker(e.to_string()))?
    }
}

#[async_trait]
impl DocumentProcessor for PdfPipeline {
    async fn process(&self, document: &Document) -> Result<DocumentOutcome, PipelineError> {
        let span = info_span!("document", document_id = %document.id);
        self.run(document).instrument(span).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;

    use crate::chunkers::SlidingWindowChunker;
    use crate::error::ExtractionError;
    use crate::processing::{PdfOpener, PdfSource};
    use crate::types::{CleanerConfig, OutputFormat};

    struct TextPdf(Vec<String>);

    impl PdfSource for TextPdf {
        fn page_count(&self) -> usize {
            self.0.len()
        }

        fn page_text(&self, page: usize) -> Result<String, String> {
            Ok(self.0[page - 1].clone())
        }
    }

    /// Serves one scripted PDF per file stem; `locked` stems are encrypted.
    struct ScriptedOpener;

    impl PdfOpener for ScriptedOpener {
        fn open(&self, path: &Path) -> Result<Arc<dyn PdfSource>, ExtractionError> {
            match path.file_stem().and_then(|s| s.to_str()) {
                Some("locked") => Err(ExtractionError::PasswordProtected),
                Some("blank") => Ok(Arc::new(TextPdf(vec!["   ".into()]))),
                _ => Ok(Arc::new(TextPdf(vec![
                    "Prima pagina del ricorso.".into(),
                    "Seconda pagina.".into(),
                ]))),
            }
        }
    }

    fn pipeline(out: &Path) -> PdfPipeline {
        PdfPipeline::new(
            Extractor::new(Arc::new(ScriptedOpener), 16, Duration::from_secs(5)),
            Cleaner::new(&CleanerConfig::default()).unwrap(),
            Arc::new(SlidingWindowChunker::new(20, 5)),
            OutputManager::new(out, vec![OutputFormat::CombinedJson]).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_document_completed() {
        let dir = tempfile::tempdir().unwrap();
        let doc = Document::from_path(Path::new("/in"), Path::new("/in/ricorso.pdf"), None);
        let outcome = pipeline(dir.path()).process(&doc).await.unwrap();

        assert!(matches!(outcome, DocumentOutcome::Completed { chunks, page_warnings: 0 } if chunks > 1));
        assert!(dir.path().join("ricorso.json").exists());
    }

    #[tokio::test]
    async fn test_blank_document_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let doc = Document::from_path(Path::new("/in"), Path::new("/in/blank.pdf"), None);
        let outcome = pipeline(dir.path()).process(&doc).await.unwrap();

        assert_eq!(outcome, DocumentOutcome::Empty);
        assert!(!dir.path().join("blank.json").exists());
    }

    #[tokio::test]
    async fn test_extraction_error_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let doc = Document::from_path(Path::new("/in"), Path::new("/in/locked.pdf"), None);
        let err = pipeline(dir.path()).process(&doc).await.unwrap_err();
        assert_eq!(err.kind(), "ExtractionError");
    }
}
