//! On-disk chunk output.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::OutputWriteError;
use crate::types::{Chunk, Document, JobConfig, OutputFormat};

/// Combined per-document JSON payload.
#[derive(Debug, Serialize)]
struct CombinedDocument<'a> {
    document_id: &'a str,
    source_path: String,
    chunk_count: usize,
    chunks: &'a [Chunk],
}

/// One JSON-Lines entry: the chunk plus the handoff fields.
#[derive(Debug, Serialize)]
struct ChunkLine<'a> {
    #[serde(flatten)]
    chunk: &'a Chunk,
    chunk_id: &'a str,
    source_doc_path: &'a str,
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    chunk_id: &'a str,
    document_id: &'a str,
    index: usize,
    start: usize,
    end: usize,
    char_count: usize,
}

/// Writes chunk sequences in the configured formats.
///
/// Every file goes through a temp file in the destination directory and is
/// renamed into place, so a reader never sees a partial file.
#[derive(Debug, Clone)]
pub struct OutputManager {
    dir: PathBuf,
    formats: Vec<OutputFormat>,
}

impl OutputManager {
    /// Create the output directory and check that it is writable.
    pub fn new(
        dir: impl Into<PathBuf>,
        formats: Vec<OutputFormat>,
    ) -> Result<Self, OutputWriteError> {
        let dir = dir.into();
        let io_err = |source: std::io::Error| OutputWriteError::Io {
            path: dir.clone(),
            source,
        };

        std::fs::create_dir_all(&dir).map_err(io_err)?;
        NamedTempFile::new_in(&dir).map_err(io_err)?;

        Ok(Self { dir, formats })
    }

    pub fn from_config(config: &JobConfig) -> Result<Self, OutputWriteError> {
        Self::new(&config.output_dir, config.output_formats.clone())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn formats(&self) -> &[OutputFormat] {
        &self.formats
    }

    /// Write all configured formats for one document. Returns the files written.
    pub fn write(
        &self,
        document: &Document,
        chunks: &[Chunk],
    ) -> Result<Vec<PathBuf>, OutputWriteError> {
        let mut written = Vec::new();

        for format in &self.formats {
            match format {
                OutputFormat::CombinedJson => {
                    let path = self.dir.join(format!("{}.json", document.id));
                    let payload = CombinedDocument {
                        document_id: &document.id,
                        source_path: document.path_str(),
                        chunk_count: chunks.len(),
                        chunks,
                    };
                    write_atomic(&path, &serde_json::to_vec_pretty(&payload)?)?;
                    written.push(path);
                }
                OutputFormat::PerChunkJson => {
                    written.extend(self.write_per_chunk(document, chunks)?);
                }
                OutputFormat::JsonLines => {
                    let path = self.dir.join(format!("{}.jsonl", document.id));
                    let source = document.path_str();
                    let mut buf = Vec::new();
                    for chunk in chunks {
                        let line = ChunkLine {
                            chunk,
                            chunk_id: &chunk.id,
                            source_doc_path: &source,
                        };
                        serde_json::to_writer(&mut buf, &line)?;
                        buf.push(b'\n');
                    }
                    write_atomic(&path, &buf)?;
                    written.push(path);
                }
                OutputFormat::Csv => {
                    let path = self.dir.join(format!("{}.csv", document.id));
                    write_atomic(&path, &csv_bytes(chunks)?)?;
                    written.push(path);
                }
            }
        }

        debug!(
            document_id = %document.id,
            files = written.len(),
            "Wrote chunk output"
        );
        Ok(written)
    }

    fn write_per_chunk(
        &self,
        document: &Document,
        chunks: &[Chunk],
    ) -> Result<Vec<PathBuf>, OutputWriteError> {
        let dir = self.dir.join(format!("{}_chunks", document.id));
        std::fs::create_dir_all(&dir).map_err(|source| OutputWriteError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut written = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let path = dir.join(format!("{}.json", chunk.id));
            write_atomic(&path, &serde_json::to_vec_pretty(chunk)?)?;
            written.push(path);
        }

        remove_stale(&dir, &written);
        Ok(written)
    }
}

/// Drop chunk files left by an earlier run that produced more chunks.
fn remove_stale(dir: &Path, keep: &[PathBuf]) {
    let keep: HashSet<&Path> = keep.iter().map(PathBuf::as_path).collect();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let is_json = path.extension().is_some_and(|ext| ext == "json");
        if is_json && !keep.contains(path.as_path()) {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "Failed to remove stale chunk file");
            }
        }
    }
}

fn csv_bytes(chunks: &[Chunk]) -> Result<Vec<u8>, OutputWriteError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for chunk in chunks {
        writer
            .serialize(CsvRow {
                chunk_id: &chunk.id,
                document_id: &chunk.document_id,
                index: chunk.index,
                start: chunk.start,
                end: chunk.end,
                char_count: chunk.char_count(),
            })
            .map_err(|e| OutputWriteError::Csv(e.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|e| OutputWriteError::Csv(e.to_string()))
}

/// Write `bytes` to `path` via a synced temp file and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), OutputWriteError> {
    let io_err = |source: std::io::Error| OutputWriteError::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(bytes).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChunkMetadata, Strategy};

    fn document() -> Document {
        Document::from_path(Path::new("/in"), Path::new("/in/sentenza.pdf"), Some("it"))
    }

    fn chunks(doc: &Document, n: usize) -> Vec<Chunk> {
        (0..n)
            .map(|i| {
                Chunk::new(doc, i, i * 10, i * 10 + 10, format!("chunk {i:>4}"))
                    .with_metadata(ChunkMetadata::for_document(doc).with_strategy(Strategy::SlidingWindow))
            })
            .collect()
    }

    #[test]
    fn test_all_formats_written() {
        let dir = tempfile::tempdir().unwrap();
        let manager = OutputManager::new(
            dir.path(),
            vec![
                OutputFormat::CombinedJson,
                OutputFormat::PerChunkJson,
                OutputFormat::JsonLines,
                OutputFormat::Csv,
            ],
        )
        .unwrap();
        let doc = document();

        let files = manager.write(&doc, &chunks(&doc, 3)).unwrap();
        assert_eq!(files.len(), 6);

        let combined: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("sentenza.json")).unwrap()).unwrap();
        assert_eq!(combined["document_id"], "sentenza");
        assert_eq!(combined["chunks"].as_array().unwrap().len(), 3);
        assert_eq!(combined["chunks"][1]["id"], "sentenza_chunk_0001");
        assert_eq!(combined["chunks"][1]["start"], 10);

        assert!(dir
            .path()
            .join("sentenza_chunks")
            .join("sentenza_chunk_0002.json")
            .exists());

        let jsonl = std::fs::read_to_string(dir.path().join("sentenza.jsonl")).unwrap();
        let lines: Vec<serde_json::Value> = jsonl
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["chunk_id"], "sentenza_chunk_0000");
        assert_eq!(lines[0]["source_doc_path"], "/in/sentenza.pdf");
        assert_eq!(lines[0]["text"], "chunk    0");

        let csv = std::fs::read_to_string(dir.path().join("sentenza.csv")).unwrap();
        let mut rows = csv.lines();
        assert_eq!(rows.next(), Some("chunk_id,document_id,index,start,end,char_count"));
        assert_eq!(rows.next(), Some("sentenza_chunk_0000,sentenza,0,0,10,10"));
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let manager = OutputManager::new(dir.path(), vec![OutputFormat::CombinedJson]).unwrap();
        let doc = document();
        manager.write(&doc, &chunks(&doc, 2)).unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["sentenza.json".to_string()]);
    }

    #[test]
    fn test_rewrite_drops_stale_chunk_files() {
        let dir = tempfile::tempdir().unwrap();
        let manager = OutputManager::new(dir.path(), vec![OutputFormat::PerChunkJson]).unwrap();
        let doc = document();

        manager.write(&doc, &chunks(&doc, 4)).unwrap();
        manager.write(&doc, &chunks(&doc, 2)).unwrap();

        let count = std::fs::read_dir(dir.path().join("sentenza_chunks")).unwrap().count();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_unwritable_destination_fails_setup() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();

        let err = OutputManager::new(file.join("out"), vec![OutputFormat::Csv]).unwrap_err();
        assert!(matches!(err, OutputWriteError::Io { .. }));
    }
}
