//! Parallel Executor: runs a batch of documents through the pipeline.
//!
//! Documents are dispatched in input order onto spawned tokio tasks, with
//! at most `workers` in flight. Before each dispatch the executor waits for
//! a free slot and for the CPU signal to clear. A document's failure is
//! recorded and the batch moves on; only setup errors abort a run.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::jobs::{DocumentOutcome, DocumentProcessor, DocumentStatus, PdfPipeline, ProgressTracker};
use crate::monitor::{CpuMonitor, CpuSignal};
use crate::output::OutputManager;
use crate::processing::{discover_documents, Cleaner, Extractor, LopdfOpener, PdfOpener};
use crate::router::ChunkingRouter;
use crate::types::{Document, JobConfig};

/// Run-level cancellation, shared between the caller and the executor.
#[derive(Debug, Clone)]
pub struct CancelFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelFlag {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Stop dispatching new documents. In-flight documents still finish.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// A document that failed, as listed in the run report.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentFailure {
    pub document_id: String,
    pub path: PathBuf,
    /// Error kind, e.g. `ExtractionError`
    pub kind: String,
    pub error: String,
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// No document needed processing
    NothingToDo,
    /// Every processed document succeeded
    Succeeded,
    /// Some documents failed, some did not
    PartialSuccess,
    /// Every processed document failed
    AllFailed,
}

/// Per-run summary.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Documents discovered
    pub total: usize,
    /// Documents dispatched and finished
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Skipped because a previous run completed them
    pub skipped_done: usize,
    /// Processed but produced no text
    pub skipped_empty: usize,
    /// Left undispatched by cancellation
    pub not_dispatched: usize,
    pub cancelled: bool,
    pub total_chunks: usize,
    pub failures: Vec<DocumentFailure>,
}

impl RunReport {
    fn new(run_id: Uuid, total: usize) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            started_at: now,
            finished_at: now,
            total,
            processed: 0,
            succeeded: 0,
            failed: 0,
            skipped_done: 0,
            skipped_empty: 0,
            not_dispatched: 0,
            cancelled: false,
            total_chunks: 0,
            failures: Vec::new(),
        }
    }

    pub fn status(&self) -> RunStatus {
        if self.processed == 0 {
            RunStatus::NothingToDo
        } else if self.failed == 0 {
            RunStatus::Succeeded
        } else if self.failed == self.processed {
            RunStatus::AllFailed
        } else {
            RunStatus::PartialSuccess
        }
    }

    /// Process exit code: 1 when every processed document failed.
    pub fn exit_code(&self) -> i32 {
        match self.status() {
            RunStatus::AllFailed => 1,
            _ => 0,
        }
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

type Finished = (Document, Result<Result<DocumentOutcome, PipelineError>, JoinError>);

/// Bounded, CPU-aware worker pool over a batch of documents.
pub struct ParallelExecutor {
    processor: Arc<dyn DocumentProcessor>,
    tracker: ProgressTracker,
    signal: CpuSignal,
    workers: usize,
    force: bool,
    cancel: CancelFlag,
}

impl ParallelExecutor {
    pub fn new(
        processor: Arc<dyn DocumentProcessor>,
        tracker: ProgressTracker,
        signal: CpuSignal,
        workers: usize,
    ) -> Self {
        Self {
            processor,
            tracker,
            signal,
            workers: workers.max(1),
            force: false,
            cancel: CancelFlag::new(),
        }
    }

    /// Reprocess documents already marked done.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Process every document not yet done and report the outcome.
    pub async fn run(&self, documents: Vec<Document>) -> RunReport {
        let mut report = RunReport::new(self.tracker.run_id(), documents.len());
        let mut in_flight: FuturesUnordered<BoxFuture<'static, Finished>> = FuturesUnordered::new();
        let mut signal = self.signal.clone();
        let mut queue = documents.into_iter();

        info!(
            run_id = %report.run_id,
            documents = report.total,
            workers = self.workers,
            force = self.force,
            "Starting batch"
        );

        'dispatch: while let Some(document) = queue.next() {
            if !self.force {
                match self.tracker.is_done(&document.id).await {
                    Ok(true) => {
                        debug!(document_id = %document.id, "Already done, skipping");
                        report.skipped_done += 1;
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(document_id = %document.id, error = %e, "Progress lookup failed, processing anyway");
                    }
                }
            }

            loop {
                if self.cancel.is_cancelled() {
                    report.cancelled = true;
                    report.not_dispatched = 1 + queue.len();
                    warn!(not_dispatched = report.not_dispatched, "Run cancelled, draining in-flight documents");
                    break 'dispatch;
                }

                if in_flight.len() >= self.workers {
                    tokio::select! {
                        _ = self.cancel.cancelled() => {}
                        Some(done) = in_flight.next() => self.settle(done, &mut report).await,
                    }
                    continue;
                }

                // With nothing in flight a saturated machine still gets one document
                if in_flight.is_empty() || signal.allows_work() {
                    break;
                }

                debug!(utilization = signal.current().utilization, "Dispatch paused by CPU monitor");
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    Some(done) = in_flight.next() => self.settle(done, &mut report).await,
                    _ = signal.wait_for_capacity() => {}
                }
            }

            in_flight.push(self.spawn(document));
        }

        while let Some(done) = in_flight.next().await {
            self.settle(done, &mut report).await;
        }

        report.finished_at = Utc::now();
        info!(
            run_id = %report.run_id,
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped_done = report.skipped_done,
            skipped_empty = report.skipped_empty,
            not_dispatched = report.not_dispatched,
            chunks = report.total_chunks,
            "Batch complete"
        );
        report
    }

    fn spawn(&self, document: Document) -> BoxFuture<'static, Finished> {
        let processor = Arc::clone(&self.processor);
        let task_document = document.clone();
        let handle = tokio::spawn(async move { processor.process(&task_document).await });
        async move { (document, handle.await) }.boxed()
    }

    async fn settle(&self, (document, result): Finished, report: &mut RunReport) {
        let result = result.unwrap_or_else(|e| Err(PipelineError::Worker(e.to_string())));
        report.processed += 1;

        let (status, error) = match result {
            Ok(DocumentOutcome::Completed { chunks, page_warnings }) => {
                report.succeeded += 1;
                report.total_chunks += chunks;
                if page_warnings > 0 {
                    warn!(document_id = %document.id, page_warnings, "Document completed with empty pages");
                }
                (DocumentStatus::Done, None)
            }
            Ok(DocumentOutcome::Empty) => {
                report.skipped_empty += 1;
                (DocumentStatus::Skipped, None)
            }
            Err(e) => {
                error!(document_id = %document.id, kind = e.kind(), error = %e, "Document failed");
                report.failed += 1;
                report.failures.push(DocumentFailure {
                    document_id: document.id.clone(),
                    path: document.path.clone(),
                    kind: e.kind().to_string(),
                    error: e.to_string(),
                });
                (DocumentStatus::Failed, Some(e.to_string()))
            }
        };

        if let Err(e) = self.tracker.record(&document, status, error).await {
            error!(document_id = %document.id, error = %e, "Failed to record progress");
        }

        info!(
            document_id = %document.id,
            status = ?status,
            done = report.processed,
            total = report.total,
            "Document settled"
        );
    }
}

/// Run a batch over `config.input_dir` with the lopdf extractor.
pub async fn run_batch(config: &JobConfig, cancel: CancelFlag) -> Result<RunReport, PipelineError> {
    run_batch_with(config, Arc::new(LopdfOpener), cancel).await
}

/// Run a batch with a caller-supplied PDF backend.
///
/// Every setup step (config validation, output directory, progress store)
/// fails before any document is dispatched.
pub async fn run_batch_with(
    config: &JobConfig,
    opener: Arc<dyn PdfOpener>,
    cancel: CancelFlag,
) -> Result<RunReport, PipelineError> {
    config.validate()?;

    let router = ChunkingRouter::new(config)?;
    let cleaner = Cleaner::new(&config.cleaner)?;
    let output = OutputManager::from_config(config)?;
    let tracker = ProgressTracker::open(config.progress_path()).await?;

    let documents = discover_documents(&config.input_dir, config.language.as_deref())?;
    info!(
        input_dir = %config.input_dir.display(),
        output_dir = %output.dir().display(),
        formats = ?output.formats(),
        documents = documents.len(),
        strategy = %router.strategy(),
        "Discovered documents"
    );

    let mut monitor = CpuMonitor::from_config(config);
    let pipeline = PdfPipeline::new(
        Extractor::from_config(opener, config),
        cleaner,
        router.chunker(),
        output,
    );

    let executor = ParallelExecutor::new(
        Arc::new(pipeline),
        tracker.clone(),
        monitor.signal(),
        config.resolved_workers(),
    )
    .with_force(config.force)
    .with_cancel(cancel);

    let report = executor.run(documents).await;

    monitor.stop().await;
    tracker.close().await?;
    Ok(report)
}
