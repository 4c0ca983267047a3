//! Copy-phase progress accounting.
//!
//! The engine copies sequentially and feeds every finished file into a
//! [`CopyProgress`], which logs throughput at a bounded rate.

use std::time::{Duration, Instant};
use tracing::info;

/// Minimum spacing between progress log lines.
const LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Progress of the copy phase of one pass
#[derive(Debug)]
pub struct CopyProgress {
    start_time: Instant,
    last_log: Instant,
    total_files: usize,
    total_bytes: u64,
    files_done: usize,
    bytes_done: u64,
    failed: usize,
}

impl CopyProgress {
    pub fn new(total_files: usize, total_bytes: u64) -> Self {
        let now = Instant::now();
        Self {
            start_time: now,
            last_log: now,
            total_files,
            total_bytes,
            files_done: 0,
            bytes_done: 0,
            failed: 0,
        }
    }

    /// Record a finished copy of `bytes`.
    pub fn file_copied(&mut self, bytes: u64) {
        self.files_done += 1;
        self.bytes_done += bytes;
        self.maybe_log();
    }

    /// Record a copy that failed.
    pub fn file_failed(&mut self) {
        self.files_done += 1;
        self.failed += 1;
        self.maybe_log();
    }

    pub fn files_done(&self) -> usize {
        self.files_done
    }

    pub fn bytes_done(&self) -> u64 {
        self.bytes_done
    }

    pub fn percent_complete(&self) -> f64 {
        if self.total_bytes > 0 {
            (self.bytes_done as f64 / self.total_bytes as f64 * 100.0).min(100.0)
        } else if self.total_files > 0 {
            self.files_done as f64 / self.total_files as f64 * 100.0
        } else {
            100.0
        }
    }

    /// Average speed since start
    pub fn average_speed(&self) -> u64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (self.bytes_done as f64 / elapsed) as u64
        } else {
            0
        }
    }

    /// Log the final figures for the phase.
    pub fn finish(&self) {
        info!(
            "Copied {}/{} files ({} of {}, {} failed) in {} at {}",
            self.files_done - self.failed,
            self.total_files,
            format_bytes(self.bytes_done),
            format_bytes(self.total_bytes),
            self.failed,
            format_duration(self.start_time.elapsed().as_secs()),
            format_speed(self.average_speed())
        );
    }

    fn maybe_log(&mut self) {
        if self.last_log.elapsed() < LOG_INTERVAL {
            return;
        }
        self.last_log = Instant::now();
        info!(
            "Copy progress: {}/{} files, {:.1}% ({})",
            self.files_done,
            self.total_files,
            self.percent_complete(),
            format_speed(self.average_speed())
        );
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
