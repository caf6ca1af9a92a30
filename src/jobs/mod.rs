//! Job processing module: the per-document pipeline and the progress store.

mod processor;
mod store;

pub use processor::{DocumentOutcome, DocumentProcessor, PdfPipeline};
pub use store::{DocumentStatus, ProgressRecord, ProgressTracker};
