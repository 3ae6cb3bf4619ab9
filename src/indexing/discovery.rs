use crate::core::error::{Error, Result};
use crate::indexing::extractor::{Extractor, EXCLUDED_DIRS};
use ignore::WalkBuilder;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Discover all indexable files under a directory
pub fn discover_files(root: &Path, extractor: &dyn Extractor) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        return Err(Error::Config(format!(
            "Directory does not exist: {}",
            root.display()
        )));
    }

    if !root.is_dir() {
        return Err(Error::Config(format!(
            "Path is not a directory: {}",
            root.display()
        )));
    }

    let mut files = Vec::new();

    // No ignore files: watcher events go through `is_indexable` alone
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .filter_entry(|entry| {
            let excluded_dir = entry.depth() > 0
                && entry.file_type().map(|t| t.is_dir()).unwrap_or(false)
                && entry
                    .file_name()
                    .to_str()
                    .map(|name| EXCLUDED_DIRS.contains(&name))
                    .unwrap_or(false);
            !excluded_dir
        })
        .build();

    for result in walker {
        match result {
            Ok(entry) => {
                let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
                if is_file && extractor.is_indexable(entry.path()) {
                    files.push(entry.path().to_path_buf());
                }
            }
            Err(err) => {
                // Some files might be inaccessible
                tracing::warn!("Failed to access file: {}", err);
            }
        }
    }

    Ok(files)
}

/// Discover indexable files under every root. Missing roots are skipped with a warning.
pub fn discover_all(roots: &[PathBuf], extractor: &dyn Extractor) -> BTreeSet<PathBuf> {
    let mut files = BTreeSet::new();
    for root in roots {
        match discover_files(root, extractor) {
            Ok(found) => files.extend(found),
            Err(e) => tracing::warn!("Skipping root {}: {}", root.display(), e),
        }
    }
    files
}

/// Stored path key for a file
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
