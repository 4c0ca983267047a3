//! File system access: scanning, metadata and volume space.

pub mod metadata;
pub mod space;
pub mod walker;

pub use space::{FixedSpace, SpaceProbe, VolumeSpace};
pub use walker::{scan, FileEntry, FileIndex, WalkOptions};
