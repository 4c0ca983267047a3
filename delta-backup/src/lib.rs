//! Delta Backup Library
//!
//! Incremental folder backup to an external target: only files whose size or
//! modification time changed since the last pass are copied, deletions are
//! mirrored, and the state of the last pass is kept in a manifest next to the
//! payload.

pub mod api;
pub mod config;
pub mod daemon;
pub mod executor;
pub mod fs;
pub mod history;
pub mod restore;
pub mod sync;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use api::BackupService;
pub use config::Config;
pub use executor::{BackupEngine, BackupJob, BackupReport, Confirmation, EngineOptions, PassOutcome};
pub use history::{HistoryLog, HistoryRecord, PassStatus};
pub use utils::errors::BackupError;
pub type Result<T> = std::result::Result<T, BackupError>;
