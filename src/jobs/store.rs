//! Durable per-document progress store.
//!
//! A single actor task owns the store file. [`ProgressTracker`] handles are
//! cheap clones that send it commands, so workers never race on the file:
//! every update is applied and persisted (temp file + rename) before the
//! next one is looked at.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ProgressError;
use crate::types::Document;

const STORE_VERSION: u32 = 1;
const COMMAND_BUFFER: usize = 256;

/// Processing state of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Chunks written
    Done,
    /// Failed at some pipeline stage; retried by the next run
    Failed,
    /// Produced no text, nothing written
    Skipped,
}

impl DocumentStatus {
    /// Whether a later run leaves the document alone.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Skipped)
    }
}

/// Persisted outcome of one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub document_id: String,
    pub source_path: String,
    pub status: DocumentStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Runs after the first failure that attempted this document again
    #[serde(default)]
    pub retry_count: u32,
    /// Run that wrote this record
    pub run_id: Uuid,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    records: BTreeMap<String, ProgressRecord>,
}

enum Command {
    Record {
        document_id: String,
        source_path: String,
        status: DocumentStatus,
        error: Option<String>,
        reply: oneshot::Sender<Result<bool, ProgressError>>,
    },
    Get {
        document_id: String,
        reply: oneshot::Sender<Option<ProgressRecord>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the progress store actor.
#[derive(Clone)]
pub struct ProgressTracker {
    tx: mpsc::Sender<Command>,
    run_id: Uuid,
}

impl ProgressTracker {
    /// Load (or create) the store at `path` and start its actor.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, ProgressError> {
        let path = path.into();
        let load_path = path.clone();
        let store = tokio::task::spawn_blocking(move || load(&load_path))
            .await
            .map_err(|_| ProgressError::Closed)??;

        let run_id = Uuid::new_v4();
        info!(
            path = %path.display(),
            records = store.records.len(),
            run_id = %run_id,
            "Opened progress store"
        );

        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let actor = StoreActor {
            path,
            store,
            run_id,
        };
        let _task: JoinHandle<()> = tokio::spawn(actor.run(rx));

        Ok(Self { tx, run_id })
    }

    /// Identifier of the run this tracker records for.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Record a document outcome and persist it.
    ///
    /// Returns `false` when the record was already in that state for this
    /// run, in which case nothing is written.
    pub async fn record(
        &self,
        document: &Document,
        status: DocumentStatus,
        error: Option<String>,
    ) -> Result<bool, ProgressError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Record {
            document_id: document.id.clone(),
            source_path: document.path_str(),
            status,
            error,
            reply,
        })
        .await?;
        rx.await.map_err(|_| ProgressError::Closed)?
    }

    /// Get the stored record of a document.
    pub async fn get(&self, document_id: &str) -> Result<Option<ProgressRecord>, ProgressError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Get {
            document_id: document_id.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ProgressError::Closed)
    }

    /// Whether a previous run settled the document for good: chunks
    /// written, or no text to chunk.
    pub async fn is_done(&self, document_id: &str) -> Result<bool, ProgressError> {
        Ok(self
            .get(document_id)
            .await?
            .is_some_and(|r| r.status.is_terminal()))
    }

    /// Stop the actor once every queued update has been persisted.
    pub async fn close(&self) -> Result<(), ProgressError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Shutdown { reply }).await?;
        rx.await.map_err(|_| ProgressError::Closed)
    }

    async fn send(&self, command: Command) -> Result<(), ProgressError> {
        self.tx.send(command).await.map_err(|_| ProgressError::Closed)
    }
}

struct StoreActor {
    path: PathBuf,
    store: StoreFile,
    run_id: Uuid,
}

impl StoreActor {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Record {
                    document_id,
                    source_path,
                    status,
                    error,
                    reply,
                } => {
                    let result = self.apply(document_id, source_path, status, error).await;
                    let _ = reply.send(result);
                }
                Command::Get { document_id, reply } => {
                    let _ = reply.send(self.store.records.get(&document_id).cloned());
                }
                Command::Shutdown { reply } => {
                    debug!(path = %self.path.display(), "Progress store closed");
                    let _ = reply.send(());
                    break;
                }
            }
        }
    }

    async fn apply(
        &mut self,
        document_id: String,
        source_path: String,
        status: DocumentStatus,
        error: Option<String>,
    ) -> Result<bool, ProgressError> {
        let previous = self.store.records.get(&document_id);

        if let Some(prev) = previous {
            if prev.run_id == self.run_id && prev.status == status && prev.error == error {
                return Ok(false);
            }
        }

        let retry_count = match previous {
            Some(prev) if prev.status == DocumentStatus::Failed && prev.run_id != self.run_id => {
                prev.retry_count + 1
            }
            Some(prev) => prev.retry_count,
            None => 0,
        };

        let replaced = self.store.records.insert(
            document_id.clone(),
            ProgressRecord {
                document_id: document_id.clone(),
                source_path,
                status,
                timestamp: Utc::now(),
                error,
                retry_count,
                run_id: self.run_id,
            },
        );

        // Memory only keeps what reached disk
        if let Err(e) = self.persist().await {
            match replaced {
                Some(old) => self.store.records.insert(document_id, old),
                None => self.store.records.remove(&document_id),
            };
            return Err(e);
        }
        Ok(true)
    }

    async fn persist(&self) -> Result<(), ProgressError> {
        let bytes = serde_json::to_vec_pretty(&self.store).map_err(|e| ProgressError::Io {
            path: self.path.clone(),
            source: e.into(),
        })?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_store(&path, &bytes))
            .await
            .map_err(|_| ProgressError::Closed)?
    }
}

fn load(path: &Path) -> Result<StoreFile, ProgressError> {
    let io_err = |source: std::io::Error| ProgressError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| ProgressError::Corrupt {
            path: path.to_path_buf(),
            source,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreFile {
            version: STORE_VERSION,
            records: BTreeMap::new(),
        }),
        Err(e) => Err(io_err(e)),
    }
}

/// Rewrite the whole store through a temp file in the same directory.
fn write_store(path: &Path, bytes: &[u8]) -> Result<(), ProgressError> {
    let io_err = |source: std::io::Error| ProgressError::Io {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(bytes).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}
