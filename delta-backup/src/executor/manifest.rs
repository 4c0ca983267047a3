//! Manifest of the last successful backup.
//!
//! The manifest lives at the target root (`.backup_manifest` by default) and
//! records every file of the last pass with its size and mtime, so the next
//! pass can diff against it and only copy what changed.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::fs::walker::{total_size, FileEntry, FileIndex};
use crate::utils::errors::{BackupError, Result};

const TEMP_PREFIX: &str = ".manifest_";
const TEMP_SUFFIX: &str = ".tmp";

/// On-disk manifest layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestData {
    pub last_backup_time: Option<DateTime<Utc>>,
    #[serde(rename = "sourceFolder")]
    pub source_path: String,
    #[serde(rename = "targetFolder")]
    pub target_path: String,
    #[serde(rename = "filesCount")]
    pub file_count: usize,
    pub total_size: u64,
    #[serde(rename = "filesList")]
    pub files: Vec<FileEntry>,
}

impl ManifestData {
    fn from_index(source_path: &str, target_path: &str, files: &FileIndex) -> Self {
        Self {
            last_backup_time: Some(Utc::now()),
            source_path: source_path.to_string(),
            target_path: target_path.to_string(),
            file_count: files.len(),
            total_size: total_size(files),
            files: files.values().cloned().collect(),
        }
    }

    /// `filesCount` and `totalSize` agree with the list, and paths are unique.
    fn is_consistent(&self) -> bool {
        let unique: std::collections::BTreeSet<&str> =
            self.files.iter().map(|f| f.relative_path.as_str()).collect();
        self.file_count == self.files.len()
            && unique.len() == self.files.len()
            && self.total_size == self.files.iter().map(|f| f.size).sum::<u64>()
    }
}

/// The persisted manifest for one target location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    path: PathBuf,
    data: ManifestData,
}

impl Manifest {
    /// Load the manifest at `path`.
    ///
    /// Never fails: a missing, unreadable, corrupt or inconsistent file yields
    /// the empty default and is logged.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<ManifestData>(&content) {
                Ok(data) if data.is_consistent() => data,
                Ok(_) => {
                    warn!(
                        "Manifest {} has inconsistent totals, starting from an empty manifest",
                        path.display()
                    );
                    ManifestData::default()
                }
                Err(e) => {
                    warn!("Failed to parse manifest {}: {}", path.display(), e);
                    ManifestData::default()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No manifest at {}, starting fresh", path.display());
                ManifestData::default()
            }
            Err(e) => {
                warn!("Failed to read manifest {}: {}", path.display(), e);
                ManifestData::default()
            }
        };

        Self { path, data }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn data(&self) -> &ManifestData {
        &self.data
    }

    pub fn last_backup_time(&self) -> Option<DateTime<Utc>> {
        self.data.last_backup_time
    }

    pub fn source_path(&self) -> &str {
        &self.data.source_path
    }

    pub fn target_path(&self) -> &str {
        &self.data.target_path
    }

    pub fn file_count(&self) -> usize {
        self.data.file_count
    }

    pub fn total_size(&self) -> u64 {
        self.data.total_size
    }

    pub fn is_empty(&self) -> bool {
        self.data.files.is_empty()
    }

    /// Persist atomically: temp file in the same directory, flush, read back
    /// and re-parse, then rename over the destination.
    pub fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.data).map_err(|e| BackupError::ManifestPersistFailed {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        debug!(
            "Saved manifest {} ({} files, {} bytes)",
            self.path.display(),
            self.data.file_count,
            self.data.total_size
        );
        Ok(())
    }

    /// Replace the whole manifest with a new listing and save it.
    ///
    /// In-memory state only changes once the file is durably written.
    pub fn update(
        &mut self,
        source_path: &str,
        target_path: &str,
        files: &FileIndex,
    ) -> Result<()> {
        let next = Self {
            path: self.path.clone(),
            data: ManifestData::from_index(source_path, target_path, files),
        };
        next.save()?;
        *self = next;
        info!(
            "Manifest updated: {} files, {} bytes",
            self.data.file_count, self.data.total_size
        );
        Ok(())
    }

    /// Clear to the empty default and save.
    pub fn reset(&mut self) -> Result<()> {
        let next = Self {
            path: self.path.clone(),
            data: ManifestData::default(),
        };
        next.save()?;
        *self = next;
        info!("Manifest {} reset", self.path.display());
        Ok(())
    }

    /// Recorded files in the form the change detector compares.
    pub fn files_as_index(&self) -> FileIndex {
        self.data
            .files
            .iter()
            .map(|f| (f.relative_path.clone(), f.clone()))
            .collect()
    }
}

/// Serialize `value` as pretty JSON to `dest` without ever exposing a partial file.
pub fn write_json_atomic<T>(dest: &Path, value: &T) -> io::Result<()>
where
    T: Serialize + DeserializeOwned,
{
    write_atomic(
        dest,
        |file| {
            serde_json::to_writer_pretty(&mut *file, value)?;
            file.write_all(b"\n")
        },
        |written| {
            let content = fs::read_to_string(written)?;
            serde_json::from_str::<T>(&content)?;
            Ok(())
        },
    )
}

/// Temp-file-then-rename writer.
///
/// `write` fills the temp file, `validate` inspects it after it has been
/// flushed to disk. Any error removes the temp file and leaves `dest` untouched.
fn write_atomic<W, V>(dest: &Path, write: W, validate: V) -> io::Result<()>
where
    W: FnOnce(&mut File) -> io::Result<()>,
    V: FnOnce(&Path) -> io::Result<()>,
{
    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(TEMP_SUFFIX)
        .tempfile_in(dir)?;

    write(temp.as_file_mut())?;
    temp.as_file_mut().flush()?;
    temp.as_file().sync_all()?;

    validate(temp.path())?;

    temp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}
