use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

/// Recursively collect the files under `root` whose name ends in `.{extension}`
///
/// Paths are `root` joined with the relative components, in file-name order
/// within each directory. A missing or unreadable root yields no documents.
#[inline]
pub fn scan_documents(root: &Path, extension: &str) -> Vec<PathBuf> {
    let suffix = format!(".{extension}");
    let mut documents = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                warn!(
                    "Documents directory {} is not readable: {}",
                    root.display(),
                    e
                );
                break;
            }
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };

        let is_document = entry.path().is_file()
            && entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.ends_with(&suffix));
        if is_document {
            documents.push(entry.into_path());
        }
    }

    debug!(
        "Found {} *.{} documents under {}",
        documents.len(),
        extension,
        root.display()
    );
    documents
}

/// Identifier of a document, shared by the diff and the stored `source` field
#[inline]
pub fn document_id(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
