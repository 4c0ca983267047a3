//! File metadata handling for backup operations.
//!
//! Modification times are kept at whole-second precision everywhere: the
//! scanner truncates, the manifest stores truncated values, and copies carry
//! the source mtime over to the payload.

use chrono::{DateTime, SubsecRound, Utc};
use std::fs::{File, Metadata};
use std::time::SystemTime;

/// Truncate a timestamp to the precision used for change detection.
pub fn truncate_mtime(time: DateTime<Utc>) -> DateTime<Utc> {
    time.trunc_subsecs(0)
}

/// Modification time of `metadata`, truncated to whole seconds.
pub fn modified_time(metadata: &Metadata) -> std::io::Result<DateTime<Utc>> {
    let modified: DateTime<Utc> = metadata.modified()?.into();
    Ok(truncate_mtime(modified))
}

/// Copy permissions and modification time from `source` onto the open `dest`.
///
/// Ownership is not carried over; the payload is written as the invoking user.
pub fn preserve_metadata(source: &Metadata, dest: &File) -> std::io::Result<()> {
    let modified: SystemTime = source.modified()?;
    dest.set_modified(modified)?;
    dest.set_permissions(source.permissions())?;
    Ok(())
}
