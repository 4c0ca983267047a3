//! Tracking of in-flight backup passes.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::utils::errors::{BackupError, Result};

type PassKey = (PathBuf, PathBuf);

/// Admits at most one running pass per (source, target) pair
#[derive(Clone, Default)]
pub struct PassTracker {
    running: Arc<Mutex<HashSet<PassKey>>>,
}

impl PassTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pass; the returned guard releases it when dropped.
    pub fn begin(&self, source: &Path, target: &Path) -> Result<PassGuard> {
        let key = (source.to_path_buf(), target.to_path_buf());
        if !self.lock().insert(key.clone()) {
            return Err(BackupError::PassInProgress {
                source_path: key.0,
                target_path: key.1,
            });
        }
        Ok(PassGuard {
            tracker: self.clone(),
            key,
        })
    }

    pub fn is_running(&self, source: &Path, target: &Path) -> bool {
        self.lock()
            .contains(&(source.to_path_buf(), target.to_path_buf()))
    }

    /// Get count of running passes
    pub fn running_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<PassKey>> {
        // A panicking pass leaves the set itself consistent
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Registration of one running pass
pub struct PassGuard {
    tracker: PassTracker,
    key: PassKey,
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        self.tracker.lock().remove(&self.key);
    }
}
