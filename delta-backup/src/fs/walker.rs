//! Directory traversal producing file indexes.
//!
//! A scan visits every regular file under a root and records its size and
//! modification time keyed by a forward-slash relative path, so indexes
//! taken on different platforms compare equal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use super::metadata::{modified_time, truncate_mtime};
use crate::utils::errors::{BackupError, Result};

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Follow symbolic links into directories
    pub follow_links: bool,

    /// Entries whose file name contains one of these are skipped (with their subtree)
    pub exclude_patterns: Vec<String>,
}

/// One file as seen by a scan or recorded in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    #[serde(rename = "path")]
    pub relative_path: String,
    pub size: u64,
    #[serde(rename = "modified")]
    pub modified_time: DateTime<Utc>,
}

impl FileEntry {
    pub fn new(relative_path: impl Into<String>, size: u64, modified_time: DateTime<Utc>) -> Self {
        Self {
            relative_path: relative_path.into(),
            size,
            modified_time: truncate_mtime(modified_time),
        }
    }

    /// Same size and same mtime at scanner precision.
    pub fn is_same_state(&self, other: &FileEntry) -> bool {
        self.size == other.size
            && truncate_mtime(self.modified_time) == truncate_mtime(other.modified_time)
    }
}

/// Complete state of a directory tree, keyed by relative path.
pub type FileIndex = BTreeMap<String, FileEntry>;

/// Total size of all entries in an index.
pub fn total_size(index: &FileIndex) -> u64 {
    index.values().map(|e| e.size).sum()
}

/// Scan `root` into a [`FileIndex`].
///
/// An unreadable root is a [`BackupError::ScanError`]; a single unreadable
/// entry below it is logged and skipped.
pub fn scan(root: &Path, options: &WalkOptions) -> Result<FileIndex> {
    let mut index = FileIndex::new();
    walk_directory(root, options, |entry| {
        index.insert(entry.relative_path.clone(), entry);
    })?;
    Ok(index)
}

/// Walk `root` and hand every discovered file to `callback`, in path order.
pub fn walk_directory<F>(root: &Path, options: &WalkOptions, mut callback: F) -> Result<()>
where
    F: FnMut(FileEntry),
{
    let root_meta = std::fs::metadata(root).map_err(|e| scan_error(root, e))?;
    if !root_meta.is_dir() {
        return Err(scan_error(
            root,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a directory"),
        ));
    }
    // Surface permission problems on the root itself rather than as an empty scan
    std::fs::read_dir(root).map_err(|e| scan_error(root, e))?;

    let walker = WalkDir::new(root)
        .follow_links(options.follow_links)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !should_exclude(e, &options.exclude_patterns));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                let io = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("walk failed at root"));
                return Err(scan_error(root, io));
            }
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                continue;
            }
        };

        if entry.file_type().is_dir() {
            continue;
        }

        match file_entry(&entry, root) {
            Ok(Some(file)) => callback(file),
            Ok(None) => {}
            Err(e) => warn!("Skipping unreadable file {}: {}", entry.path().display(), e),
        }
    }

    Ok(())
}

/// Calculate total size of all files in a directory
pub fn calculate_total_size(root: &Path, options: &WalkOptions) -> Result<u64> {
    let mut total = 0u64;
    walk_directory(root, options, |file| total += file.size)?;
    Ok(total)
}

/// Forward-slash relative path of `path` below `root`.
///
/// Returns `None` for paths outside `root` or with non UTF-8 components.
pub fn relative_key(path: &Path, root: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Turn a forward-slash relative key back into a path under `root`.
pub fn resolve_key(root: &Path, key: &str) -> PathBuf {
    key.split('/')
        .filter(|part| !part.is_empty())
        .fold(root.to_path_buf(), |path, part| path.join(part))
}

/// Build a FileEntry from a walk entry.
/// Symlinks are resolved to their target; links to directories and broken
/// links are skipped.
fn file_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Option<FileEntry>> {
    let metadata = if entry.path_is_symlink() {
        match std::fs::metadata(entry.path()) {
            Ok(resolved) if resolved.is_file() => resolved,
            Ok(_) => return Ok(None),
            Err(e) => {
                debug!("Skipping broken symlink {}: {}", entry.path().display(), e);
                return Ok(None);
            }
        }
    } else {
        entry.metadata().map_err(std::io::Error::from)?
    };

    if !metadata.is_file() {
        return Ok(None);
    }

    let Some(relative_path) = relative_key(entry.path(), root) else {
        warn!("Skipping path with non UTF-8 name: {}", entry.path().display());
        return Ok(None);
    };

    Ok(Some(FileEntry::new(
        relative_path,
        metadata.len(),
        modified_time(&metadata)?,
    )))
}

/// Check if a directory entry should be excluded based on patterns
fn should_exclude(entry: &DirEntry, patterns: &[String]) -> bool {
    let file_name = entry.file_name().to_string_lossy();
    patterns.iter().any(|pattern| file_name.contains(pattern.as_str()))
}

fn scan_error(path: &Path, source: std::io::Error) -> BackupError {
    BackupError::ScanError {
        path: path.to_path_buf(),
        source,
    }
}
