//! WAL configuration.

use std::path::{Path, PathBuf};

use basalt_common::constants::{
    DEFAULT_WAL_BUFFER_BYTES, DEFAULT_WAL_SEGMENT_SIZE, MAX_WAL_RECORD_SIZE, WAL_FILE_HEADER_SIZE,
};

use crate::error::{WalError, WalResult};
use crate::segment::segment_file_name;

/// Configuration for the write-ahead log.
///
/// # Example
///
/// ```rust
/// use basalt_wal::config::WalConfig;
///
/// let config = WalConfig::new("/tmp/db-wal")
///     .with_segment_size(4 * 1024 * 1024)
///     .with_buffer_bytes(64 * 1024)
///     .with_max_record_size(1024 * 1024);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Directory where segment files live.
    pub dir: PathBuf,

    /// Size of each segment file in bytes; a record whose on-disk
    /// footprint would cross this boundary triggers rotation.
    pub segment_size: usize,

    /// Size of the in-memory append buffer.
    pub buffer_bytes: usize,

    /// Upper bound on a single record; replay treats larger length
    /// prefixes as corruption.
    pub max_record_size: usize,
}

impl WalConfig {
    /// Creates a configuration with defaults for the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            segment_size: DEFAULT_WAL_SEGMENT_SIZE,
            buffer_bytes: DEFAULT_WAL_BUFFER_BYTES,
            max_record_size: MAX_WAL_RECORD_SIZE,
        }
    }

    /// Sets the segment size.
    #[must_use]
    pub fn with_segment_size(mut self, size: usize) -> Self {
        self.segment_size = size;
        self
    }

    /// Sets the append buffer size.
    #[must_use]
    pub fn with_buffer_bytes(mut self, size: usize) -> Self {
        self.buffer_bytes = size;
        self
    }

    /// Sets the maximum record size.
    #[must_use]
    pub fn with_max_record_size(mut self, size: usize) -> Self {
        self.max_record_size = size;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> WalResult<()> {
        if self.segment_size <= WAL_FILE_HEADER_SIZE {
            return Err(WalError::config(
                "segment size must exceed the segment file header",
            ));
        }
        if self.buffer_bytes == 0 {
            return Err(WalError::config("append buffer must be non-empty"));
        }
        if self.max_record_size + 4 > self.segment_size - WAL_FILE_HEADER_SIZE {
            return Err(WalError::config(
                "max record size must fit inside a single segment",
            ));
        }
        Ok(())
    }

    /// Returns the path of the segment with the given number.
    #[must_use]
    pub fn segment_path(&self, segment_number: u64) -> PathBuf {
        self.dir.join(segment_file_name(segment_number))
    }

    /// Returns true if the directory contains at least one segment file.
    #[must_use]
    pub fn has_segments(dir: &Path) -> bool {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return false;
        };
        entries
            .filter_map(Result::ok)
            .any(|e| crate::segment::parse_segment_number(&e.path()).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = WalConfig::new("/tmp/wal");
        assert_eq!(config.segment_size, DEFAULT_WAL_SEGMENT_SIZE);
        assert_eq!(config.buffer_bytes, DEFAULT_WAL_BUFFER_BYTES);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(WalConfig::new("/tmp/wal")
            .with_segment_size(64)
            .validate()
            .is_err());
        assert!(WalConfig::new("/tmp/wal")
            .with_buffer_bytes(0)
            .validate()
            .is_err());
        assert!(WalConfig::new("/tmp/wal")
            .with_segment_size(1024)
            .with_max_record_size(1024)
            .validate()
            .is_err());
    }

    #[test]
    fn test_segment_path() {
        let config = WalConfig::new("/data/wal");
        assert_eq!(
            config.segment_path(7),
            PathBuf::from("/data/wal/000000000000000000000007.log")
        );
    }

    #[test]
    fn test_has_segments() {
        let tmp = TempDir::new().unwrap();
        assert!(!WalConfig::has_segments(tmp.path()));

        std::fs::write(tmp.path().join("notes.txt"), b"x").unwrap();
        assert!(!WalConfig::has_segments(tmp.path()));

        std::fs::write(tmp.path().join(segment_file_name(0)), b"x").unwrap();
        assert!(WalConfig::has_segments(tmp.path()));
    }
}
