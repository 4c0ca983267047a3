//! Operations exposed to front ends.
//!
//! [`BackupService`] ties the engine, the history log and the pass tracker
//! together. Every operation is synchronous; async callers run them on a
//! blocking worker.

pub mod job_tracker;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::executor::retention::{sweep_expired, SweepReport};
use crate::executor::{BackupEngine, BackupJob, Confirmation, PassOutcome};
use crate::history::{HistoryLog, HistoryRecord};
use crate::restore::{self, BackupNode, RestoreReport};
use crate::utils::errors::Result;
use job_tracker::PassTracker;

/// Shared backup service
#[derive(Clone)]
pub struct BackupService {
    engine: Arc<BackupEngine>,
    history: Arc<Mutex<HistoryLog>>,
    tracker: PassTracker,
    max_age: chrono::Duration,
}

impl BackupService {
    pub fn new(engine: BackupEngine, history: HistoryLog, max_age: chrono::Duration) -> Self {
        Self {
            engine: Arc::new(engine),
            history: Arc::new(Mutex::new(history)),
            tracker: PassTracker::new(),
            max_age,
        }
    }

    /// Service wired from a loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            BackupEngine::new(config.engine_options()),
            HistoryLog::load(config.history.path.clone(), config.history.capacity),
            config.retention.max_age(),
        )
    }

    pub fn engine(&self) -> &BackupEngine {
        &self.engine
    }

    pub fn tracker(&self) -> &PassTracker {
        &self.tracker
    }

    /// Run one backup pass and append its record to the history.
    ///
    /// Fails only when a pass for the same pair is already running; every
    /// other outcome is reported through the returned [`PassOutcome`].
    pub fn run_backup<F>(&self, source: &Path, target: &Path, confirm: F) -> Result<PassOutcome>
    where
        F: FnMut(&Confirmation) -> bool,
    {
        self.run_backup_with_cancel(source, target, confirm, &CancellationToken::new())
    }

    pub fn run_backup_with_cancel<F>(
        &self,
        source: &Path,
        target: &Path,
        confirm: F,
        cancel: &CancellationToken,
    ) -> Result<PassOutcome>
    where
        F: FnMut(&Confirmation) -> bool,
    {
        let _guard = self.tracker.begin(&pass_key(source), &pass_key(target))?;

        let outcome = self.engine.run(&BackupJob::new(source, target), confirm, cancel);
        self.history().append(outcome.record.clone());
        Ok(outcome)
    }

    /// Up to `limit` most recent records, newest first.
    pub fn list_history(&self, limit: usize) -> Vec<HistoryRecord> {
        self.history().recent(limit).to_vec()
    }

    /// Hierarchical listing of the payload stored under `target`.
    pub fn list_backup_contents(&self, target: &Path) -> Result<Vec<BackupNode>> {
        restore::list_backup_contents(&self.engine.payload_root(target))
    }

    /// Copy selected payload paths under `target` to `destination`.
    pub fn restore_selection<S: AsRef<str>>(
        &self,
        target: &Path,
        selected: &[S],
        destination: &Path,
    ) -> Result<RestoreReport> {
        restore::restore_selection(&self.engine.payload_root(target), selected, destination)
    }

    /// Remove payload files older than the configured retention age.
    pub fn sweep(&self, target: &Path) -> SweepReport {
        let payload = self.engine.payload_root(target);
        info!("Running retention sweep over {}", payload.display());
        sweep_expired(&payload, self.max_age)
    }

    fn history(&self) -> MutexGuard<'_, HistoryLog> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Same pair spelled differently must map to the same key.
fn pass_key(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::EngineOptions;
    use crate::fs::space::FixedSpace;
    use crate::history::{PassStatus, DEFAULT_CAPACITY};
    use crate::utils::errors::BackupError;
    use std::fs;
    use tempfile::TempDir;

    fn service(dir: &Path) -> BackupService {
        BackupService::new(
            BackupEngine::with_space_probe(EngineOptions::default(), FixedSpace(u64::MAX)),
            HistoryLog::load(dir.join("history.json"), DEFAULT_CAPACITY),
            chrono::Duration::days(365),
        )
    }

    #[test]
    fn test_run_backup_records_history() -> Result<()> {
        let dir = TempDir::new()?;
        let (source, target) = (dir.path().join("src"), dir.path().join("dst"));
        fs::create_dir_all(&source)?;
        fs::create_dir_all(&target)?;
        fs::write(source.join("a.txt"), b"a")?;
        let service = service(dir.path());

        service.run_backup(&source, &target, |_: &Confirmation| false)?;
        service.run_backup(&dir.path().join("missing"), &target, |_: &Confirmation| false)?;

        let history = service.list_history(5);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, PassStatus::Failed);
        assert_eq!(history[1].status, PassStatus::Success);
        assert_eq!(history[1].added_files, 1);

        let listing = service.list_backup_contents(&target)?;
        assert_eq!(listing[0].relative_path, "a.txt");
        Ok(())
    }

    #[test]
    fn test_concurrent_pass_is_rejected_without_record() -> Result<()> {
        let dir = TempDir::new()?;
        let (source, target) = (dir.path().join("src"), dir.path().join("dst"));
        fs::create_dir_all(&source)?;
        fs::create_dir_all(&target)?;
        let service = service(dir.path());

        let _running = service.tracker().begin(&pass_key(&source), &pass_key(&target))?;
        let err = service
            .run_backup(&source, &target, |_: &Confirmation| true)
            .unwrap_err();

        assert!(matches!(err, BackupError::PassInProgress { .. }));
        assert!(service.list_history(5).is_empty());
        Ok(())
    }
}
