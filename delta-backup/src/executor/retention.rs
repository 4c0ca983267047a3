//! Retention sweep over the backup payload.
//!
//! Housekeeping that runs outside a backup pass: payload files whose mtime is
//! older than the retention window are removed. Every per-file failure is
//! ignored.

use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::fs::metadata::modified_time;

/// Default retention window.
pub const DEFAULT_MAX_AGE_DAYS: i64 = 365;

/// What a sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed_files: usize,
    pub removed_bytes: u64,
    pub skipped_files: usize,
}

/// Remove payload files last modified before `now - max_age`.
///
/// A missing `backup_root` is a no-op.
/// A window reaching before the earliest representable time expires nothing.
pub fn sweep_expired(backup_root: &Path, max_age: Duration) -> SweepReport {
    match Utc::now().checked_sub_signed(max_age) {
        Some(cutoff) => sweep_older_than(backup_root, cutoff),
        None => {
            debug!("Retention window of {} days expires nothing", max_age.num_days());
            SweepReport::default()
        }
    }
}

/// Remove payload files last modified before `cutoff`.
pub fn sweep_older_than(backup_root: &Path, cutoff: DateTime<Utc>) -> SweepReport {
    let mut report = SweepReport::default();
    if !backup_root.is_dir() {
        return report;
    }

    for entry in WalkDir::new(backup_root).contents_first(true).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            report.skipped_files += 1;
            continue;
        };
        let Ok(modified) = modified_time(&metadata) else {
            report.skipped_files += 1;
            continue;
        };
        if modified >= cutoff {
            continue;
        }

        match fs::remove_file(entry.path()) {
            Ok(()) => {
                report.removed_files += 1;
                report.removed_bytes += metadata.len();
                debug!("Removed expired backup file {}", entry.path().display());
            }
            Err(e) => {
                report.skipped_files += 1;
                debug!("Could not remove {}: {}", entry.path().display(), e);
            }
        }
    }

    if report.removed_files > 0 {
        info!(
            "Retention sweep removed {} files ({} bytes) older than {}",
            report.removed_files,
            report.removed_bytes,
            cutoff.format("%Y-%m-%d")
        );
    }
    report
}
