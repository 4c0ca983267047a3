//! Delta computation and payload verification.

pub mod delta;
pub mod integrity;

pub use delta::{diff, ChangeSet};
