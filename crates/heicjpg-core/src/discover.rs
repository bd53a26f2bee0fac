use std::cmp::Ordering;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

/// A source file found under a scanned directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Directory containing the file
    pub directory: PathBuf,
    /// Just the filename, not necessarily UTF-8
    pub file_name: OsString,
}

impl FileEntry {
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }
}

/// Check whether `name` matches the glob `*.<extension>`, ignoring case.
pub fn has_extension(name: &str, extension: &str) -> bool {
    let name = name.to_lowercase();
    let suffix = format!(".{}", extension.trim_start_matches('.').to_lowercase());
    name.ends_with(&suffix)
}

/// Files sort before directories so every directory's own files come before
/// anything found below it.
fn tree_order(a: &DirEntry, b: &DirEntry) -> Ordering {
    a.file_type()
        .is_dir()
        .cmp(&b.file_type().is_dir())
        .then_with(|| a.file_name().cmp(b.file_name()))
}

/// Enumerate source files under `root`.
///
/// Returns an empty list (and logs a warning) when `root` is not a directory.
/// Unreadable subdirectories are skipped.
pub fn find_sources(root: &Path, recursive: bool, extension: &str) -> Vec<FileEntry> {
    if !root.is_dir() {
        tracing::warn!("{} is not a directory, nothing to scan", root.display());
        return Vec::new();
    }

    let max_depth = if recursive { usize::MAX } else { 1 };
    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(max_depth)
        .sort_by(tree_order);

    let mut entries = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!("Skipping unreadable entry: {}", err);
                continue;
            }
        };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name() else {
            continue;
        };
        if !has_extension(&file_name.to_string_lossy(), extension) {
            continue;
        }
        let directory = path.parent().unwrap_or(root).to_path_buf();
        entries.push(FileEntry {
            directory,
            file_name: file_name.to_os_string(),
        });
    }

    tracing::debug!("Found {} source file(s) in {}", entries.len(), root.display());
    entries
}
