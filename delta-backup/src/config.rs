//! Configuration management for delta-backup.
//!
//! Loads configuration from a TOML file. Every section and key is optional.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::executor::retention::DEFAULT_MAX_AGE_DAYS;
use crate::executor::EngineOptions;
use crate::fs::walker::WalkOptions;
use crate::history::DEFAULT_CAPACITY;
use crate::utils::errors::{BackupError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backup: BackupConfig,
    pub retention: RetentionConfig,
    pub history: HistoryConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Payload directory name below the target root
    pub payload_dir: String,

    /// Manifest file name at the target root
    pub manifest_file: String,

    /// Fraction of free space the source may fill (0.8 keeps a 20% buffer)
    pub space_buffer_ratio: f64,

    /// Follow symbolic links into directories while scanning
    pub follow_links: bool,

    /// Skip entries whose name contains any of these
    pub exclude_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Payload files older than this many days are swept
    pub max_age_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub path: PathBuf,

    /// Maximum number of records kept
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        let engine = EngineOptions::default();
        Self {
            payload_dir: engine.payload_dir,
            manifest_file: engine.manifest_file,
            space_buffer_ratio: engine.space_buffer_ratio,
            follow_links: false,
            exclude_patterns: Vec::new(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_days: DEFAULT_MAX_AGE_DAYS,
        }
    }
}

impl RetentionConfig {
    /// Retention window; saturates instead of overflowing for huge values.
    pub fn max_age(&self) -> chrono::Duration {
        chrono::Duration::try_days(self.max_age_days).unwrap_or(chrono::Duration::MAX)
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: default_history_path(),
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn default_history_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".delta-backup")
        .join("history.json")
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| BackupError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let ratio = self.backup.space_buffer_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(BackupError::Config(format!(
                "space_buffer_ratio must be in (0, 1], got {ratio}"
            )));
        }
        if self.history.capacity == 0 {
            return Err(BackupError::Config("history capacity must be greater than 0".into()));
        }
        if self.retention.max_age_days <= 0 {
            return Err(BackupError::Config("max_age_days must be positive".into()));
        }
        Ok(())
    }

    /// Engine settings from the `[backup]` section.
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            payload_dir: self.backup.payload_dir.clone(),
            manifest_file: self.backup.manifest_file.clone(),
            space_buffer_ratio: self.backup.space_buffer_ratio,
            walk: WalkOptions {
                follow_links: self.backup.follow_links,
                exclude_patterns: self.backup.exclude_patterns.clone(),
            },
        }
    }
}
