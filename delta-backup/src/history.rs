//! Backup history log.
//!
//! Newest-first list of pass outcomes, capped and rewritten in full on every
//! append. Losing history is harmless, so loads fall back to an empty log and
//! saves are best effort.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::executor::manifest::write_json_atomic;

/// Default number of records kept.
pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassStatus {
    InProgress,
    Success,
    SuccessWithErrors,
    Failed,
}

impl std::fmt::Display for PassStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            PassStatus::InProgress => "in progress",
            PassStatus::Success => "success",
            PassStatus::SuccessWithErrors => "success with errors",
            PassStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Outcome of one backup pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub timestamp: DateTime<Utc>,
    pub status: PassStatus,
    pub changed_files: usize,
    pub added_files: usize,
    pub modified_files: usize,
    pub deleted_files: usize,
    #[serde(default)]
    pub error: String,
}

impl HistoryRecord {
    /// A record for a pass that just started.
    pub fn begin() -> Self {
        Self {
            timestamp: Utc::now(),
            status: PassStatus::InProgress,
            changed_files: 0,
            added_files: 0,
            modified_files: 0,
            deleted_files: 0,
            error: String::new(),
        }
    }

    /// Finalize with counts; status depends on whether `error_summary` is empty.
    pub fn complete(
        mut self,
        added: usize,
        modified: usize,
        deleted: usize,
        error_summary: String,
    ) -> Self {
        self.added_files = added;
        self.modified_files = modified;
        self.deleted_files = deleted;
        self.changed_files = added + modified + deleted;
        self.status = if error_summary.is_empty() {
            PassStatus::Success
        } else {
            PassStatus::SuccessWithErrors
        };
        self.error = error_summary;
        self
    }

    /// Finalize as aborted by a fatal error.
    pub fn fail(mut self, error: impl std::fmt::Display) -> Self {
        self.status = PassStatus::Failed;
        self.error = error.to_string();
        self
    }

    /// One-line status for display.
    pub fn summary_line(&self) -> String {
        let mut line = format!(
            "{} | +{} ~{} -{} | {}",
            self.timestamp.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
            self.added_files,
            self.modified_files,
            self.deleted_files,
            self.status
        );
        if !self.error.is_empty() {
            line.push_str(" | ");
            line.push_str(&self.error);
        }
        line
    }
}

/// Capped, newest-first history persisted as one JSON array.
#[derive(Debug)]
pub struct HistoryLog {
    path: PathBuf,
    capacity: usize,
    records: Vec<HistoryRecord>,
}

impl HistoryLog {
    /// Load the log at `path`; missing or corrupt files give an empty log.
    pub fn load(path: impl Into<PathBuf>, capacity: usize) -> Self {
        let path = path.into();
        let mut records = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str::<Vec<HistoryRecord>>(&content).unwrap_or_else(|e| {
                warn!("Failed to parse history {}: {}", path.display(), e);
                Vec::new()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!("Failed to read history {}: {}", path.display(), e);
                Vec::new()
            }
        };
        records.truncate(capacity);

        Self {
            path,
            capacity,
            records,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert at the front, evict beyond capacity, persist best effort.
    pub fn append(&mut self, record: HistoryRecord) {
        self.records.insert(0, record);
        self.records.truncate(self.capacity);

        if let Err(e) = self.save() {
            warn!("Failed to save history {}: {}", self.path.display(), e);
        }
    }

    /// Up to `n` records, newest first.
    pub fn recent(&self, n: usize) -> &[HistoryRecord] {
        &self.records[..n.min(self.records.len())]
    }

    fn save(&self) -> io::Result<()> {
        write_json_atomic(&self.path, &self.records)?;
        debug!("Saved {} history records", self.records.len());
        Ok(())
    }
}
