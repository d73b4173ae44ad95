//! WAL error types.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use basalt_common::error::{Component, EngineError};
use basalt_common::types::Lsn;

/// Result type for WAL operations.
pub type WalResult<T> = Result<T, WalError>;

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// I/O error during WAL operations.
    #[error("WAL I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: io::Error,
    },

    /// A segment file carries the wrong magic number.
    #[error("invalid WAL segment magic in {path}: expected {expected:#010x}, found {found:#010x}")]
    InvalidMagic {
        /// The offending segment file.
        path: PathBuf,
        /// Expected magic number.
        expected: u32,
        /// Magic number found on disk.
        found: u32,
    },

    /// A segment file carries an unsupported format version.
    #[error("unsupported WAL version in {path}: expected {expected}, found {found}")]
    UnsupportedVersion {
        /// The offending segment file.
        path: PathBuf,
        /// Expected version.
        expected: u32,
        /// Version found on disk.
        found: u32,
    },

    /// A record's stored checksum disagrees with the recomputed one.
    #[error("WAL record checksum mismatch at LSN {lsn}: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// LSN of the corrupt record.
        lsn: Lsn,
        /// Checksum stored with the record.
        stored: u32,
        /// Checksum recomputed from the bytes.
        computed: u32,
    },

    /// A record exceeds the maximum permitted size.
    #[error("WAL record too large: {size} bytes exceeds maximum {max}")]
    RecordTooLarge {
        /// Serialized record size.
        size: usize,
        /// Maximum permitted size.
        max: usize,
    },

    /// An unknown record kind tag was read.
    #[error("unknown WAL record kind: {code}")]
    UnknownRecordKind {
        /// The unrecognized tag byte.
        code: u8,
    },

    /// A record could not be decoded.
    #[error("failed to decode WAL record: {reason}")]
    Decode {
        /// Why decoding failed.
        reason: String,
    },

    /// The log manager has been closed.
    #[error("WAL is closed")]
    Closed,

    /// Configuration rejected.
    #[error("WAL configuration error: {reason}")]
    Config {
        /// Why the configuration was rejected.
        reason: String,
    },
}

impl WalError {
    /// Creates a checksum mismatch error.
    #[must_use]
    pub fn checksum_mismatch(lsn: Lsn, stored: u32, computed: u32) -> Self {
        Self::ChecksumMismatch {
            lsn,
            stored,
            computed,
        }
    }

    /// Creates a decode error.
    #[must_use]
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Returns true if this error indicates on-disk corruption; replay
    /// treats it as a truncation point rather than a failure.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::ChecksumMismatch { .. }
                | Self::InvalidMagic { .. }
                | Self::UnknownRecordKind { .. }
                | Self::Decode { .. }
        )
    }
}

impl From<WalError> for EngineError {
    fn from(err: WalError) -> Self {
        match err {
            WalError::Io { source } => EngineError::io(Component::Wal, source),
            WalError::ChecksumMismatch {
                lsn,
                stored,
                computed,
            } => EngineError::ChecksumMismatch {
                lsn,
                stored,
                computed,
            },
            WalError::Closed => EngineError::Closed {
                component: Component::Wal,
            },
            WalError::Config { reason } => EngineError::invalid_argument(reason),
            other => EngineError::corrupted(
                Component::Wal,
                basalt_common::types::PageId::INVALID,
                other.to_string(),
            ),
        }
    }
}
