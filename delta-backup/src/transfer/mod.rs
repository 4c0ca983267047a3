//! Copy progress tracking.

pub mod progress;
