//! Error types for the backup engine.
//!
//! Pass-fatal errors abort a backup pass and end up as a `Failed` history
//! record. Per-file errors (`FileCopyFailed`, `FileDeleteFailed`) are collected
//! by the engine and only summarized.

use std::path::PathBuf;
use thiserror::Error;

use crate::transfer::progress::format_bytes;

/// Number of missing paths shown in an integrity violation message.
pub const INTEGRITY_DISPLAY_LIMIT: usize = 5;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Target location unavailable: {} (is the device connected?)", .0.display())]
    TargetUnavailable(PathBuf),

    #[error(
        "Insufficient space on target: need {} (incl. buffer), {} available",
        format_bytes(*.required),
        format_bytes(*.available)
    )]
    InsufficientSpace { required: u64, available: u64 },

    #[error("Backup cancelled by user: {0}")]
    UserCancelled(String),

    #[error(
        "Backup incomplete: expected {expected} files, found {actual}; missing {}: {}",
        .missing.len(),
        summarize(.missing, INTEGRITY_DISPLAY_LIMIT)
    )]
    IntegrityViolation {
        expected: usize,
        actual: usize,
        missing: Vec<String>,
    },

    #[error("Copy failed: {path} - {reason}")]
    FileCopyFailed { path: String, reason: String },

    #[error("Delete failed: {path} - {reason}")]
    FileDeleteFailed { path: String, reason: String },

    #[error("Failed to persist manifest {}: {reason}", .path.display())]
    ManifestPersistFailed { path: PathBuf, reason: String },

    #[error("Failed to scan {}: {source}", .path.display())]
    ScanError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Restore failed: {0}")]
    RestoreFailed(String),

    #[error(
        "A backup pass is already running for {} -> {}",
        .source_path.display(),
        .target_path.display()
    )]
    PassInProgress {
        source_path: PathBuf,
        target_path: PathBuf,
    },

    #[error("Backup aborted before {phase}")]
    Aborted { phase: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BackupError {
    /// Per-file errors are collected by the engine; everything else ends the pass.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            BackupError::FileCopyFailed { .. } | BackupError::FileDeleteFailed { .. }
        )
    }
}

/// Join the first `limit` items and append a remainder count.
pub fn summarize<T: std::fmt::Display>(items: &[T], limit: usize) -> String {
    let shown: Vec<String> = items.iter().take(limit).map(|i| i.to_string()).collect();
    let mut out = shown.join("; ");
    if items.len() > limit {
        out.push_str(&format!(" ... and {} more", items.len() - limit));
    }
    out
}

pub type Result<T> = std::result::Result<T, BackupError>;
