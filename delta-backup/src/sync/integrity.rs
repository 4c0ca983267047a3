//! Cross-checks a manifest against the payload actually on the target.
//!
//! Guards against a payload that was deleted or swapped between runs; a stale
//! manifest would otherwise make the engine skip files that no longer exist.

use std::path::Path;
use tracing::{info, warn};

use crate::fs::walker::{scan, FileIndex, WalkOptions};
use crate::utils::errors::{BackupError, Result};

/// Fail with [`BackupError::IntegrityViolation`] if any path recorded in
/// `manifest_files` is missing below `backup_root`.
///
/// An empty manifest is trivially valid. A missing `backup_root` counts as an
/// empty payload.
pub fn verify(manifest_files: &FileIndex, backup_root: &Path, options: &WalkOptions) -> Result<()> {
    if manifest_files.is_empty() {
        return Ok(());
    }

    let actual = if backup_root.exists() {
        scan(backup_root, options)?
    } else {
        warn!("Backup payload {} does not exist", backup_root.display());
        FileIndex::new()
    };

    let missing: Vec<String> = manifest_files
        .keys()
        .filter(|path| !actual.contains_key(*path))
        .cloned()
        .collect();

    if missing.is_empty() {
        info!(
            "Integrity check passed: {} recorded files present",
            manifest_files.len()
        );
        return Ok(());
    }

    Err(BackupError::IntegrityViolation {
        expected: manifest_files.len(),
        actual: actual.len(),
        missing,
    })
}
