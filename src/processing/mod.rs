//! Processing stages ahead of segmentation.
//!
//! This module provides:
//! - Discovery of source PDFs in the input directory
//! - Page-batched text extraction with per-page timeouts
//! - Text cleaning (headers/footers, page numbers, reflow, punctuation)

pub mod cleaner;
pub mod discovery;
pub mod extractor;

pub use cleaner::Cleaner;
pub use discovery::{discover_documents, is_pdf};
pub use extractor::{Extractor, LopdfOpener, LopdfSource, PdfOpener, PdfSource};
