//! Free-space probing for the target volume.

use std::path::Path;

/// Reports the space available to the current user on the volume holding a path.
pub trait SpaceProbe: Send + Sync {
    fn available_space(&self, path: &Path) -> std::io::Result<u64>;
}

/// Queries the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct VolumeSpace;

impl SpaceProbe for VolumeSpace {
    fn available_space(&self, path: &Path) -> std::io::Result<u64> {
        fs4::available_space(path)
    }
}

/// Always reports the same figure. Used for dry runs and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedSpace(pub u64);

impl SpaceProbe for FixedSpace {
    fn available_space(&self, _path: &Path) -> std::io::Result<u64> {
        Ok(self.0)
    }
}

/// Bytes that must be free to back up `source_bytes` keeping `buffer_ratio` headroom.
///
/// With the default ratio of 0.8 this is `source_bytes / 0.8`, i.e. a 20% buffer.
pub fn required_space(source_bytes: u64, buffer_ratio: f64) -> f64 {
    source_bytes as f64 / buffer_ratio
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_space_adds_buffer() {
        assert_eq!(required_space(0, 0.8), 0.0);
        assert!((required_space(800, 0.8) - 1000.0).abs() < 1e-6);
        assert!((required_space(1000, 1.0) - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn test_volume_space_reports_something() -> std::io::Result<()> {
        let dir = tempfile::TempDir::new()?;
        let available = VolumeSpace.available_space(dir.path())?;
        assert!(available > 0);
        Ok(())
    }
}
