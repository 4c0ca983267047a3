//! Backup pass executor - orchestrates one delta backup.
//!
//! A pass walks through these phases:
//!
//! `Idle -> PreflightChecking -> SourceChangeCheck -> IntegrityChecking ->
//! Scanning -> Diffing -> Copying -> Deleting -> Verifying -> Persisting ->
//! Done | Failed`
//!
//! Preflight problems, a refused confirmation and manifest persistence
//! failures end the pass. Per-file copy and delete failures are collected and
//! summarized; the rest of the pass carries on. File operations are strictly
//! sequential.

pub mod manifest;
pub mod retention;

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::fs::metadata::preserve_metadata;
use crate::fs::space::{required_space, SpaceProbe, VolumeSpace};
use crate::fs::walker::{calculate_total_size, resolve_key, scan, FileIndex, WalkOptions};
use crate::history::HistoryRecord;
use crate::sync::delta::{diff, ChangeSet};
use crate::sync::integrity;
use crate::transfer::progress::CopyProgress;
use crate::utils::errors::{summarize, BackupError, Result};
use manifest::Manifest;

/// Number of per-file errors spelled out in a history record.
pub const ERROR_SUMMARY_LIMIT: usize = 3;

/// Prefix and suffix of in-flight copies inside the payload.
pub const PARTIAL_PREFIX: &str = ".partial_";
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Whether `file_name` is a leftover of an interrupted copy.
pub fn is_partial_copy(file_name: &str) -> bool {
    file_name.starts_with(PARTIAL_PREFIX) && file_name.ends_with(PARTIAL_SUFFIX)
}

/// Engine settings that are fixed for the lifetime of an engine.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Payload directory below the target root
    pub payload_dir: String,

    /// Manifest file name at the target root
    pub manifest_file: String,

    /// Fraction of free space the source may occupy (0.8 = 20% buffer)
    pub space_buffer_ratio: f64,

    pub walk: WalkOptions,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            payload_dir: "backup_data".to_string(),
            manifest_file: ".backup_manifest".to_string(),
            space_buffer_ratio: 0.8,
            walk: WalkOptions::default(),
        }
    }
}

/// States of a backup pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassPhase {
    Idle,
    PreflightChecking,
    SourceChangeCheck,
    IntegrityChecking,
    Scanning,
    Diffing,
    Copying,
    Deleting,
    Verifying,
    Persisting,
    Done,
    Failed,
}

impl std::fmt::Display for PassPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PassPhase::Idle => "idle",
            PassPhase::PreflightChecking => "preflight",
            PassPhase::SourceChangeCheck => "source check",
            PassPhase::IntegrityChecking => "integrity check",
            PassPhase::Scanning => "scanning",
            PassPhase::Diffing => "diffing",
            PassPhase::Copying => "copying",
            PassPhase::Deleting => "deleting",
            PassPhase::Verifying => "verifying",
            PassPhase::Persisting => "persisting",
            PassPhase::Done => "done",
            PassPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Decision points where the caller has to approve a full re-backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// The manifest belongs to a different source folder.
    SourceChanged { previous: String, current: String },
    /// Files recorded in the manifest are missing from the payload.
    IntegrityFailed { message: String },
}

impl std::fmt::Display for Confirmation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Confirmation::SourceChanged { previous, current } => write!(
                f,
                "Source folder changed:\n  old: {previous}\n  new: {current}\n\
                 A full backup will run and the previous backup record will be cleared."
            ),
            Confirmation::IntegrityFailed { message } => write!(
                f,
                "{message}\nThe backup may have been damaged or deleted. Run a full backup?"
            ),
        }
    }
}

/// One backup request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupJob {
    pub source: PathBuf,
    pub target: PathBuf,
}

impl BackupJob {
    pub fn new(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// What a completed pass did.
#[derive(Debug)]
pub struct BackupReport {
    pub changes: ChangeSet,
    /// Collected per-file failures
    pub errors: Vec<BackupError>,
    /// Baseline was discarded after a confirmation
    pub full_backup: bool,
    pub file_count: usize,
    pub total_size: u64,
    pub bytes_copied: u64,
}

impl BackupReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn error_summary(&self) -> String {
        summarize(&self.errors, ERROR_SUMMARY_LIMIT)
    }

    /// Finalize `record` with this pass's counts.
    pub fn finish_record(&self, record: HistoryRecord) -> HistoryRecord {
        record.complete(
            self.changes.added.len(),
            self.changes.modified.len(),
            self.changes.deleted.len(),
            self.error_summary(),
        )
    }
}

/// Result of [`BackupEngine::run`]: always exactly one finalized record.
#[derive(Debug)]
pub struct PassOutcome {
    pub record: HistoryRecord,
    pub result: Result<BackupReport>,
}

/// Main backup engine
pub struct BackupEngine {
    options: EngineOptions,
    space: Box<dyn SpaceProbe>,
}

impl BackupEngine {
    /// Engine that checks free space on the real target volume.
    pub fn new(options: EngineOptions) -> Self {
        Self::with_space_probe(options, VolumeSpace)
    }

    pub fn with_space_probe(options: EngineOptions, probe: impl SpaceProbe + 'static) -> Self {
        Self {
            options,
            space: Box::new(probe),
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Payload directory for a target root.
    pub fn payload_root(&self, target: &Path) -> PathBuf {
        target.join(&self.options.payload_dir)
    }

    /// Manifest location for a target root.
    pub fn manifest_path(&self, target: &Path) -> PathBuf {
        target.join(&self.options.manifest_file)
    }

    /// Run one pass and finalize its history record.
    ///
    /// `confirm` is called synchronously at each decision point and returns
    /// whether to proceed. `cancel` is honoured at file-group boundaries only.
    pub fn run<F>(&self, job: &BackupJob, confirm: F, cancel: &CancellationToken) -> PassOutcome
    where
        F: FnMut(&Confirmation) -> bool,
    {
        let record = HistoryRecord::begin();
        let mut phase = PassPhase::Idle;

        info!(
            "Starting backup pass: {} -> {}",
            job.source.display(),
            job.target.display()
        );

        let result = self.execute(job, confirm, cancel, &mut phase);
        let record = match &result {
            Ok(report) => {
                transition(&mut phase, PassPhase::Done);
                info!(
                    "Backup pass complete: {} added, {} modified, {} deleted, {} errors",
                    report.changes.added.len(),
                    report.changes.modified.len(),
                    report.changes.deleted.len(),
                    report.errors.len()
                );
                report.finish_record(record)
            }
            Err(e) => {
                error!("Backup pass failed during {}: {}", phase, e);
                transition(&mut phase, PassPhase::Failed);
                record.fail(e)
            }
        };

        PassOutcome { record, result }
    }

    fn execute<F>(
        &self,
        job: &BackupJob,
        mut confirm: F,
        cancel: &CancellationToken,
        phase: &mut PassPhase,
    ) -> Result<BackupReport>
    where
        F: FnMut(&Confirmation) -> bool,
    {
        let walk = &self.options.walk;

        // Preflight: device present and room for the whole source plus buffer
        transition(phase, PassPhase::PreflightChecking);
        if !job.target.is_dir() {
            return Err(BackupError::TargetUnavailable(job.target.clone()));
        }
        let target = fs::canonicalize(&job.target)
            .map_err(|_| BackupError::TargetUnavailable(job.target.clone()))?;
        let source = fs::canonicalize(&job.source).map_err(|e| BackupError::ScanError {
            path: job.source.clone(),
            source: e,
        })?;

        let source_bytes = calculate_total_size(&source, walk)?;
        let required = required_space(source_bytes, self.options.space_buffer_ratio);
        let available = self.space.available_space(&target)?;
        if required > available as f64 {
            return Err(BackupError::InsufficientSpace {
                required: required.ceil() as u64,
                available,
            });
        }
        checkpoint(cancel, PassPhase::SourceChangeCheck)?;

        let payload = self.payload_root(&target);
        let mut manifest = Manifest::load(self.manifest_path(&target));
        let source_key = source.to_string_lossy().into_owned();
        let target_key = target.to_string_lossy().into_owned();
        let mut full_backup = false;

        transition(phase, PassPhase::SourceChangeCheck);
        let recorded_source = manifest.source_path().to_string();
        if !recorded_source.is_empty() && recorded_source != source_key {
            let question = Confirmation::SourceChanged {
                previous: recorded_source,
                current: source_key.clone(),
            };
            warn!("Source folder changed since last backup");
            if !confirm(&question) {
                return Err(BackupError::UserCancelled("source folder changed".to_string()));
            }
            manifest.reset()?;
            full_backup = true;
        } else if !manifest.is_empty() {
            transition(phase, PassPhase::IntegrityChecking);
            match integrity::verify(&manifest.files_as_index(), &payload, walk) {
                Ok(()) => {}
                Err(violation @ BackupError::IntegrityViolation { .. }) => {
                    warn!("{}", violation);
                    let question = Confirmation::IntegrityFailed {
                        message: violation.to_string(),
                    };
                    if !confirm(&question) {
                        return Err(BackupError::UserCancelled(
                            "backup integrity check failed".to_string(),
                        ));
                    }
                    manifest.reset()?;
                    full_backup = true;
                }
                Err(other) => return Err(other),
            }
        }

        transition(phase, PassPhase::Scanning);
        let current = scan(&source, walk)?;
        info!("Scanned {} files in {}", current.len(), source.display());

        transition(phase, PassPhase::Diffing);
        let baseline = if full_backup {
            FileIndex::new()
        } else {
            manifest.files_as_index()
        };
        let changes = diff(&baseline, &current);
        info!(
            "Changes: {} added, {} modified, {} deleted",
            changes.added.len(),
            changes.modified.len(),
            changes.deleted.len()
        );

        checkpoint(cancel, PassPhase::Copying)?;
        transition(phase, PassPhase::Copying);
        fs::create_dir_all(&payload)?;

        let mut errors = Vec::new();
        let mut failed: BTreeSet<String> = BTreeSet::new();
        let mut cleared: BTreeSet<String> = BTreeSet::new();
        let copy_bytes: u64 = changes.to_copy().map(|e| e.size).sum();
        let copy_files = changes.added.len() + changes.modified.len();
        let mut progress = CopyProgress::new(copy_files, copy_bytes);

        for entry in changes.to_copy() {
            let src = resolve_key(&source, &entry.relative_path);
            let dst = resolve_key(&payload, &entry.relative_path);
            let key = &entry.relative_path;
            let copied = clear_type_changes(&payload, key, &changes.deleted, &mut cleared)
                .and_then(|()| copy_file(&src, &dst));
            match copied {
                Ok(bytes) => {
                    debug!("Copied {} ({} bytes)", entry.relative_path, bytes);
                    progress.file_copied(bytes);
                }
                Err(e) => {
                    warn!("Failed to copy {}: {}", entry.relative_path, e);
                    progress.file_failed();
                    failed.insert(entry.relative_path.clone());
                    errors.push(BackupError::FileCopyFailed {
                        path: entry.relative_path.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        progress.finish();

        checkpoint(cancel, PassPhase::Deleting)?;
        transition(phase, PassPhase::Deleting);
        errors.extend(delete_removed(&payload, &changes.deleted, &cleared));

        // From here on the payload already reflects the new state, so the
        // manifest is written regardless of cancellation.
        transition(phase, PassPhase::Verifying);
        let to_verify: Vec<String> = changes
            .added
            .keys()
            .filter(|p| !failed.contains(*p))
            .cloned()
            .collect();
        for path in to_verify {
            let (src, dst) = (resolve_key(&source, &path), resolve_key(&payload, &path));
            if let Some(reason) = size_mismatch(&src, &dst) {
                warn!("Verification failed for {}: {}", path, reason);
                failed.insert(path.clone());
                errors.push(BackupError::FileCopyFailed { path, reason });
            }
        }

        transition(phase, PassPhase::Persisting);
        // Failed copies stay out of the manifest so the next pass retries them
        let recorded: FileIndex = current
            .into_iter()
            .filter(|(path, _)| !failed.contains(path))
            .collect();
        manifest.update(&source_key, &target_key, &recorded)?;

        Ok(BackupReport {
            changes,
            errors,
            full_backup,
            file_count: manifest.file_count(),
            total_size: manifest.total_size(),
            bytes_copied: progress.bytes_done(),
        })
    }
}

fn transition(phase: &mut PassPhase, next: PassPhase) {
    debug!("Backup phase: {} -> {}", phase, next);
    *phase = next;
}

/// Abort before `next` if the caller asked to cancel.
fn checkpoint(cancel: &CancellationToken, next: PassPhase) -> Result<()> {
    if cancel.is_cancelled() {
        info!("Cancellation requested, stopping before {}", next);
        return Err(BackupError::Aborted {
            phase: next.to_string(),
        });
    }
    Ok(())
}

/// Copy one file into the payload via a sibling temp file and rename, so the
/// destination is either the old or the complete new version.
fn copy_file(src: &Path, dst: &Path) -> io::Result<u64> {
    let parent = dst
        .parent()
        .ok_or_else(|| io::Error::other("destination has no parent directory"))?;
    fs::create_dir_all(parent)?;

    let mut reader = File::open(src)?;
    let source_meta = reader.metadata()?;

    let mut temp = tempfile::Builder::new()
        .prefix(PARTIAL_PREFIX)
        .suffix(PARTIAL_SUFFIX)
        .tempfile_in(parent)?;
    let copied = io::copy(&mut reader, temp.as_file_mut())?;
    temp.as_file().sync_all()?;
    preserve_metadata(&source_meta, temp.as_file())?;
    temp.persist(dst).map_err(|e| e.error)?;

    if let Some(reason) = size_mismatch(src, dst) {
        return Err(io::Error::other(reason));
    }
    Ok(copied)
}

/// Compare sizes of a source file and its copy; `None` when equal or when
/// either side has vanished.
fn size_mismatch(src: &Path, dst: &Path) -> Option<String> {
    let (Ok(src_meta), Ok(dst_meta)) = (fs::metadata(src), fs::metadata(dst)) else {
        return None;
    };
    (src_meta.len() != dst_meta.len()).then(|| {
        format!(
            "size mismatch: source {} bytes, backup {} bytes",
            src_meta.len(),
            dst_meta.len()
        )
    })
}

/// Make room for `key` when a file turned into a directory or the other way
/// round. Only payload entries listed in `deleted` are removed; they are
/// recorded in `cleared`.
fn clear_type_changes(
    payload: &Path,
    key: &str,
    deleted: &FileIndex,
    cleared: &mut BTreeSet<String>,
) -> io::Result<()> {
    // File replaced by a directory: `a` is in the way of `a/b.txt`
    let mut prefix = String::new();
    for part in key.split('/').take(key.split('/').count().saturating_sub(1)) {
        if !prefix.is_empty() {
            prefix.push('/');
        }
        prefix.push_str(part);
        if deleted.contains_key(&prefix) && resolve_key(payload, &prefix).is_file() {
            debug!("Removing {} to make room for {}", prefix, key);
            fs::remove_file(resolve_key(payload, &prefix))?;
            cleared.insert(prefix.clone());
        }
    }

    // Directory replaced by a file: `a/b.txt` keeps `a` from being a file
    let nested = format!("{key}/");
    for path in deleted.range(nested.clone()..).map(|(p, _)| p) {
        if !path.starts_with(&nested) {
            break;
        }
        delete_file(payload, path)?;
        cleared.insert(path.clone());
    }
    Ok(())
}

/// Delete every path in `deleted` but not in `cleared` from the payload,
/// collecting failures.
fn delete_removed(
    payload: &Path,
    deleted: &FileIndex,
    cleared: &BTreeSet<String>,
) -> Vec<BackupError> {
    let mut errors = Vec::new();
    for path in deleted.keys().filter(|p| !cleared.contains(*p)) {
        match delete_file(payload, path) {
            Ok(()) => debug!("Deleted {}", path),
            Err(e) => {
                warn!("Failed to delete {}: {}", path, e);
                errors.push(BackupError::FileDeleteFailed {
                    path: path.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }
    errors
}

/// Remove a payload file; an already missing file is fine. Empty parent
/// directories are pruned up to the payload root.
fn delete_file(payload: &Path, key: &str) -> io::Result<()> {
    let path = resolve_key(payload, key);
    match fs::remove_file(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    }

    let mut dir = path.parent();
    while let Some(current) = dir {
        if current == payload || !current.starts_with(payload) {
            break;
        }
        if fs::remove_dir(current).is_err() {
            break;
        }
        dir = current.parent();
    }
    Ok(())
}
