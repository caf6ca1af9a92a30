//! Discovery of source PDFs under the input directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::error::ConfigurationError;
use crate::types::Document;

/// Find every PDF below `input_dir`, sorted by path.
///
/// Hidden files and directories are skipped. A missing or unreadable input
/// directory is a setup error; unreadable entries below it are logged and
/// skipped.
pub fn discover_documents(
    input_dir: &Path,
    language: Option<&str>,
) -> Result<Vec<Document>, ConfigurationError> {
    if !input_dir.is_dir() {
        return Err(ConfigurationError::InvalidValue {
            field: "input_dir",
            reason: format!("{} is not a directory", input_dir.display()),
        });
    }

    let mut documents = Vec::new();
    for entry in WalkDir::new(input_dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
    {
        match entry {
            Ok(entry) if entry.file_type().is_file() && is_pdf(entry.path()) => {
                documents.push(Document::from_path(input_dir, entry.path(), language));
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Skipping unreadable entry"),
        }
    }

    documents.sort_by(|a, b| a.path.cmp(&b.path));

    let mut seen: HashMap<&str, &PathBuf> = HashMap::with_capacity(documents.len());
    for document in &documents {
        if let Some(first) = seen.insert(&document.id, &document.path) {
            return Err(ConfigurationError::InvalidValue {
                field: "input_dir",
                reason: format!(
                    "{} and {} share the document id {}",
                    first.display(),
                    document.path.display(),
                    document.id
                ),
            });
        }
    }

    debug!(dir = %input_dir.display(), count = documents.len(), "Discovered documents");
    Ok(documents)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}

/// Whether the path has a `.pdf` extension, ignoring case.
pub fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_discovers_pdfs_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("appello")).unwrap();
        fs::create_dir_all(root.join(".cache")).unwrap();
        fs::write(root.join("b.pdf"), b"%PDF").unwrap();
        fs::write(root.join("a.PDF"), b"%PDF").unwrap();
        fs::write(root.join("notes.txt"), b"x").unwrap();
        fs::write(root.join(".hidden.pdf"), b"%PDF").unwrap();
        fs::write(root.join(".cache/c.pdf"), b"%PDF").unwrap();
        fs::write(root.join("appello/sent 1.pdf"), b"%PDF").unwrap();

        let docs = discover_documents(root, Some("it")).unwrap();
        let names: Vec<&str> = docs
            .iter()
            .map(|d| d.path.strip_prefix(root).unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.PDF", "appello/sent 1.pdf", "b.pdf"]);
        assert!(docs[0].id.starts_with("a__"));
        assert!(docs[1].id.starts_with("appello__sent_1__"));
        assert_eq!(docs[2].id, "b");
        assert!(docs.iter().all(|d| d.language.as_deref() == Some("it")));
    }

    #[test]
    fn test_missing_input_dir_is_setup_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = discover_documents(&dir.path().join("missing"), None);
        assert!(matches!(
            result,
            Err(ConfigurationError::InvalidValue { field: "input_dir", .. })
        ));
    }
}
