//! Browsing and restoring the backup payload.
//!
//! Restore is a plain copy of whatever is selected; it does not consult the
//! manifest and never modifies the payload.

use serde::Serialize;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::executor::is_partial_copy;
use crate::fs::metadata::preserve_metadata;
use crate::fs::walker::{relative_key, resolve_key};
use crate::utils::errors::{BackupError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Directory,
    File,
}

/// One entry of the hierarchical payload listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupNode {
    pub name: String,
    /// Forward-slash path relative to the payload root
    pub relative_path: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// File size, or the sum of all files below a directory
    pub size: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<BackupNode>,
}

impl BackupNode {
    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub files_restored: usize,
    pub bytes_restored: u64,
}

/// Tree of everything below `backup_root`, directories first then by name
/// ignoring case. A missing payload lists as empty.
pub fn list_backup_contents(backup_root: &Path) -> Result<Vec<BackupNode>> {
    if !backup_root.exists() {
        return Ok(Vec::new());
    }
    let root = backup_root.canonicalize()?;
    list_directory(&root, &root)
}

fn list_directory(root: &Path, dir: &Path) -> Result<Vec<BackupNode>> {
    let mut nodes = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        // Leftovers of interrupted copies are not part of the backup
        let name = entry.file_name().to_string_lossy().into_owned();
        if file_type.is_file() && is_partial_copy(&name) {
            continue;
        }
        let Some(relative_path) = relative_key(&path, root) else {
            continue;
        };

        let node = if file_type.is_dir() {
            let children = list_directory(root, &path)?;
            BackupNode {
                name,
                relative_path,
                kind: NodeKind::Directory,
                size: children.iter().map(|c| c.size).sum(),
                children,
            }
        } else if file_type.is_file() {
            BackupNode {
                name,
                relative_path,
                kind: NodeKind::File,
                size: entry.metadata()?.len(),
                children: Vec::new(),
            }
        } else {
            continue;
        };
        nodes.push(node);
    }

    nodes.sort_by(|a, b| {
        b.is_dir()
            .cmp(&a.is_dir())
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
    Ok(nodes)
}

/// Copy each selected file or subtree from `backup_root` to `destination`,
/// keeping its relative path. Stops at the first failure.
pub fn restore_selection<S: AsRef<str>>(
    backup_root: &Path,
    selected: &[S],
    destination: &Path,
) -> Result<RestoreReport> {
    if selected.is_empty() {
        return Err(BackupError::RestoreFailed("nothing selected".to_string()));
    }
    let root = backup_root.canonicalize().map_err(|e| {
        BackupError::RestoreFailed(format!("backup {} not readable: {}", backup_root.display(), e))
    })?;
    fs::create_dir_all(destination).map_err(|e| {
        BackupError::RestoreFailed(format!("cannot create {}: {}", destination.display(), e))
    })?;

    let mut report = RestoreReport::default();
    for key in selected {
        let key = key.as_ref();
        let source = assert_within_root(&root, key)?;
        restore_item(&root, &source, destination, &mut report)
            .map_err(|e| BackupError::RestoreFailed(format!("{key}: {e}")))?;
    }

    info!(
        "Restored {} files ({} bytes) to {}",
        report.files_restored,
        report.bytes_restored,
        destination.display()
    );
    Ok(report)
}

/// Resolve `key` below `root`, rejecting anything that lands outside it.
fn assert_within_root(root: &Path, key: &str) -> Result<PathBuf> {
    let resolved = resolve_key(root, key.trim_start_matches('/'))
        .canonicalize()
        .map_err(|_| BackupError::RestoreFailed(format!("{key}: not found in backup")))?;
    if resolved == root || !resolved.starts_with(root) {
        return Err(BackupError::RestoreFailed(format!("{key}: outside the backup")));
    }
    Ok(resolved)
}

fn restore_item(
    root: &Path,
    source: &Path,
    destination: &Path,
    report: &mut RestoreReport,
) -> io::Result<()> {
    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy();
        if !entry.file_type().is_file() || is_partial_copy(&name) {
            continue;
        }
        let key = relative_key(entry.path(), root).ok_or_else(|| {
            io::Error::other(format!("unexpected path {}", entry.path().display()))
        })?;
        let target = resolve_key(destination, &key);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut reader = File::open(entry.path())?;
        let metadata = reader.metadata()?;
        let mut writer = File::create(&target)?;
        let bytes = io::copy(&mut reader, &mut writer)?;
        preserve_metadata(&metadata, &writer)?;

        debug!("Restored {}", key);
        report.files_restored += 1;
        report.bytes_restored += bytes;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn payload() -> io::Result<TempDir> {
        let dir = TempDir::new()?;
        fs::create_dir_all(dir.path().join("Photos/2024"))?;
        fs::create_dir_all(dir.path().join("docs"))?;
        fs::write(dir.path().join("b.txt"), b"bb")?;
        fs::write(dir.path().join("A.txt"), b"a")?;
        fs::write(dir.path().join("docs/report.pdf"), b"report")?;
        fs::write(dir.path().join("Photos/2024/img.jpg"), b"jpegdata")?;
        Ok(dir)
    }

    #[test]
    fn test_listing_orders_directories_first() -> Result<()> {
        let dir = payload()?;
        let nodes = list_backup_contents(dir.path())?;

        let names: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["docs", "Photos", "A.txt", "b.txt"]);

        let photos = &nodes[1];
        assert_eq!(photos.size, 8);
        assert_eq!(photos.children[0].relative_path, "Photos/2024");
        assert_eq!(photos.children[0].children[0].relative_path, "Photos/2024/img.jpg");
        Ok(())
    }

    #[test]
    fn test_listing_hides_only_copy_leftovers() -> Result<()> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join(".partial_a1B2c3.partial"), b"half")?;
        fs::write(dir.path().join(".partial_draft.txt"), b"real")?;

        let nodes = list_backup_contents(dir.path())?;
        let names: Vec<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec![".partial_draft.txt"]);

        let dest = TempDir::new()?;
        let report = restore_selection(dir.path(), &[".partial_draft.txt"], dest.path())?;
        assert_eq!(report.files_restored, 1);
        Ok(())
    }

    #[test]
    fn test_missing_payload_lists_empty() -> Result<()> {
        let dir = TempDir::new()?;
        assert!(list_backup_contents(&dir.path().join("backup_data"))?.is_empty());
        Ok(())
    }

    #[test]
    fn test_restore_keeps_relative_paths() -> Result<()> {
        let backup = payload()?;
        let dest = TempDir::new()?;

        let report = restore_selection(backup.path(), &["Photos", "A.txt"], dest.path())?;

        assert_eq!(report.files_restored, 2);
        assert_eq!(report.bytes_restored, 9);
        assert_eq!(fs::read(dest.path().join("Photos/2024/img.jpg"))?, b"jpegdata");
        assert_eq!(fs::read(dest.path().join("A.txt"))?, b"a");
        assert!(!dest.path().join("docs").exists());
        Ok(())
    }

    #[test]
    fn test_restore_rejects_escaping_paths() -> Result<()> {
        let backup = payload()?;
        let dest = TempDir::new()?;

        let err = restore_selection(backup.path(), &["../"], dest.path()).unwrap_err();
        assert!(matches!(err, BackupError::RestoreFailed(_)));

        let err = restore_selection(backup.path(), &["docs/../.."], dest.path()).unwrap_err();
        assert!(matches!(err, BackupError::RestoreFailed(_)));
        Ok(())
    }

    #[test]
    fn test_restore_missing_item_fails() -> Result<()> {
        let backup = payload()?;
        let dest = TempDir::new()?;

        let err =
            restore_selection(backup.path(), &["A.txt", "nope.txt"], dest.path()).unwrap_err();
        assert!(err.to_string().contains("nope.txt"));
        Ok(())
    }
}
