//! End-to-end backup passes against temporary source and target folders.

use delta_backup::executor::manifest::Manifest;
use delta_backup::fs::FixedSpace;
use delta_backup::history::DEFAULT_CAPACITY;
use delta_backup::{
    BackupEngine, BackupError, BackupJob, BackupService, Confirmation, EngineOptions, HistoryLog,
    PassStatus,
};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct Fixture {
    dir: TempDir,
    source: PathBuf,
    target: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source");
        let target = dir.path().join("target");
        fs::create_dir_all(&source).unwrap();
        fs::create_dir_all(&target).unwrap();
        Self { dir, source, target }
    }

    fn service(&self, free_space: u64) -> BackupService {
        BackupService::new(
            BackupEngine::with_space_probe(EngineOptions::default(), FixedSpace(free_space)),
            HistoryLog::load(self.dir.path().join("history.json"), DEFAULT_CAPACITY),
            chrono::Duration::days(365),
        )
    }

    fn write(&self, name: &str, content: &str, age: Duration) {
        let path = self.source.join(name);
        fs::write(&path, content).unwrap();
        set_mtime(&path, SystemTime::now() - age);
    }

    fn manifest(&self) -> Manifest {
        Manifest::load(self.target.join(".backup_manifest"))
    }

    fn payload(&self, name: &str) -> PathBuf {
        self.target.join("backup_data").join(name)
    }
}

fn set_mtime(path: &Path, time: SystemTime) {
    File::options().write(true).open(path).unwrap().set_modified(time).unwrap();
}

fn refuse(_: &Confirmation) -> bool {
    false
}

const HOUR: Duration = Duration::from_secs(3600);

#[test]
fn test_three_pass_scenario() {
    let fx = Fixture::new();
    let service = fx.service(u64::MAX);

    // First pass copies everything
    fx.write("file1.txt", "v1", 2 * HOUR);
    let first = service.run_backup(&fx.source, &fx.target, refuse).unwrap();
    let report = first.result.unwrap();
    assert_eq!(report.changes.added.keys().collect::<Vec<_>>(), vec!["file1.txt"]);
    assert_eq!(fx.manifest().file_count(), 1);
    assert_eq!(fs::read_to_string(fx.payload("file1.txt")).unwrap(), "v1");

    // Same size, newer mtime: modified
    fx.write("file1.txt", "v2", HOUR);
    fx.write("new.txt", "x", HOUR);
    let second = service.run_backup(&fx.source, &fx.target, refuse).unwrap();
    let report = second.result.unwrap();
    assert_eq!(report.changes.added.keys().collect::<Vec<_>>(), vec!["new.txt"]);
    assert_eq!(report.changes.modified.keys().collect::<Vec<_>>(), vec!["file1.txt"]);
    assert!(report.changes.deleted.is_empty());
    assert_eq!(fs::read_to_string(fx.payload("file1.txt")).unwrap(), "v2");
    assert_eq!(fs::read_to_string(fx.payload("new.txt")).unwrap(), "x");
    assert_eq!(fx.manifest().file_count(), 2);

    // Deletion is mirrored
    fs::remove_file(fx.source.join("file1.txt")).unwrap();
    let third = service.run_backup(&fx.source, &fx.target, refuse).unwrap();
    let report = third.result.unwrap();
    assert_eq!(report.changes.deleted.keys().collect::<Vec<_>>(), vec!["file1.txt"]);
    assert!(!fx.payload("file1.txt").exists());
    assert_eq!(fx.manifest().file_count(), 1);

    let history = service.list_history(5);
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|r| r.status == PassStatus::Success));
    assert_eq!(history[0].deleted_files, 1);
    assert_eq!(history[1].changed_files, 2);
}

#[test]
fn test_second_pass_without_changes_is_empty() {
    let fx = Fixture::new();
    let service = fx.service(u64::MAX);
    fx.write("a.txt", "alpha", HOUR);
    fs::create_dir(fx.source.join("sub")).unwrap();
    fx.write("sub/b.txt", "beta", HOUR);

    service.run_backup(&fx.source, &fx.target, refuse).unwrap().result.unwrap();
    let before = fx.manifest();

    let outcome = service.run_backup(&fx.source, &fx.target, refuse).unwrap();
    let report = outcome.result.unwrap();

    assert!(report.changes.is_empty());
    let after = fx.manifest();
    assert_eq!(after.file_count(), before.file_count());
    assert_eq!(after.total_size(), before.total_size());
    assert_eq!(outcome.record.changed_files, 0);
}

#[test]
fn test_insufficient_space_fails_before_copying() {
    let fx = Fixture::new();
    fx.write("big.bin", &"x".repeat(800), HOUR);
    // 800 bytes need 1000 with the buffer
    let service = fx.service(999);

    let outcome = service.run_backup(&fx.source, &fx.target, refuse).unwrap();

    assert!(matches!(
        outcome.result,
        Err(BackupError::InsufficientSpace { available: 999, .. })
    ));
    assert_eq!(outcome.record.status, PassStatus::Failed);
    assert!(!fx.payload("big.bin").exists());
    assert_eq!(service.list_history(1)[0].status, PassStatus::Failed);

    let roomy = fx.service(1001);
    assert!(roomy.run_backup(&fx.source, &fx.target, refuse).unwrap().result.is_ok());
}

#[test]
fn test_refused_source_change_is_user_cancelled() {
    let fx = Fixture::new();
    let service = fx.service(u64::MAX);
    fx.write("a.txt", "a", HOUR);
    service.run_backup(&fx.source, &fx.target, refuse).unwrap().result.unwrap();

    let other = fx.dir.path().join("other");
    fs::create_dir(&other).unwrap();
    fs::write(other.join("b.txt"), "b").unwrap();

    let outcome = service.run_backup(&other, &fx.target, refuse).unwrap();

    assert!(matches!(outcome.result, Err(BackupError::UserCancelled(_))));
    assert!(fx.payload("a.txt").exists());
    assert!(!fx.payload("b.txt").exists());
    assert_eq!(fx.manifest().file_count(), 1);
}

#[test]
fn test_missing_payload_file_triggers_full_backup() {
    let fx = Fixture::new();
    let service = fx.service(u64::MAX);
    fx.write("a.txt", "a", HOUR);
    fx.write("b.txt", "b", HOUR);
    service.run_backup(&fx.source, &fx.target, refuse).unwrap().result.unwrap();

    fs::remove_file(fx.payload("b.txt")).unwrap();

    let mut prompts = Vec::new();
    let outcome = service
        .run_backup(&fx.source, &fx.target, |q: &Confirmation| {
            prompts.push(q.to_string());
            true
        })
        .unwrap();
    let report = outcome.result.unwrap();

    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("b.txt"));
    assert!(report.full_backup);
    assert_eq!(report.changes.added.len(), 2);
    assert!(fx.payload("b.txt").exists());
}

#[test]
fn test_unplugged_target_is_unavailable() {
    let fx = Fixture::new();
    let service = fx.service(u64::MAX);
    fx.write("a.txt", "a", HOUR);

    let outcome = service
        .run_backup(&fx.source, &fx.dir.path().join("unplugged"), refuse)
        .unwrap();

    assert!(matches!(outcome.result, Err(BackupError::TargetUnavailable(_))));
    assert_eq!(outcome.record.status, PassStatus::Failed);
    assert!(!outcome.record.error.is_empty());
}

#[test]
fn test_cancelled_pass_records_failure() {
    let fx = Fixture::new();
    let engine = BackupEngine::with_space_probe(EngineOptions::default(), FixedSpace(u64::MAX));
    fx.write("a.txt", "a", HOUR);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = engine.run(&BackupJob::new(&fx.source, &fx.target), refuse, &cancel);

    assert!(matches!(outcome.result, Err(BackupError::Aborted { .. })));
    assert_eq!(outcome.record.status, PassStatus::Failed);
    assert!(fx.manifest().is_empty());
}

#[test]
fn test_restore_after_backup() {
    let fx = Fixture::new();
    let service = fx.service(u64::MAX);
    fs::create_dir_all(fx.source.join("docs/2024")).unwrap();
    fx.write("docs/2024/report.txt", "quarterly", HOUR);
    fx.write("notes.txt", "n", HOUR);
    service.run_backup(&fx.source, &fx.target, refuse).unwrap().result.unwrap();

    let listing = service.list_backup_contents(&fx.target).unwrap();
    assert_eq!(listing[0].name, "docs");
    assert_eq!(listing[1].name, "notes.txt");

    let dest = fx.dir.path().join("restored");
    let report = service.restore_selection(&fx.target, &["docs"], &dest).unwrap();

    assert_eq!(report.files_restored, 1);
    assert_eq!(fs::read_to_string(dest.join("docs/2024/report.txt")).unwrap(), "quarterly");
    assert!(!dest.join("notes.txt").exists());
}
