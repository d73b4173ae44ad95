//! Unified error types for BasaltDB.
//!
//! Every error carries its kind, the component it originated in, and —
//! where it applies — the offending page id or LSN.

use std::fmt;
use std::io;
use thiserror::Error;

use crate::types::{Lsn, PageId, TxnId};

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// The component an error originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    /// Paged disk manager.
    Disk,
    /// Buffer pool.
    BufferPool,
    /// B+ tree index.
    Tree,
    /// Write-ahead log.
    Wal,
    /// Transaction manager / MVCC.
    Txn,
    /// Recovery coordinator.
    Recovery,
    /// Database engine boundary.
    Engine,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disk => "disk",
            Self::BufferPool => "buffer-pool",
            Self::Tree => "btree",
            Self::Wal => "wal",
            Self::Txn => "txn",
            Self::Recovery => "recovery",
            Self::Engine => "engine",
        };
        write!(f, "{name}")
    }
}

/// Coarse error classification, stable for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller error: absent key, inverted range, bad configuration,
    /// negative LSN. Persistent state is untouched.
    InvalidArgument,
    /// Operation on a closed handle.
    Closed,
    /// Failure of an underlying read, write, or sync; includes short reads.
    Io,
    /// Checksum mismatch, bad node tag, impossible lengths.
    Corrupted,
    /// Unrecoverable within this handle; the database must be reopened.
    Fatal,
}

/// The unified error type for BasaltDB.
///
/// # Example
///
/// ```rust
/// use basalt_common::error::{EngineError, ErrorKind};
///
/// let err = EngineError::invalid_argument("range lower bound must be below upper bound");
/// assert_eq!(err.kind(), ErrorKind::InvalidArgument);
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid argument at the public boundary.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// What was wrong with the argument.
        message: String,
    },

    /// Operation attempted on a closed handle.
    #[error("{component} is closed")]
    Closed {
        /// The closed component.
        component: Component,
    },

    /// I/O failure in an underlying read, write, or sync.
    #[error("{component} I/O error: {source}")]
    Io {
        /// Originating component.
        component: Component,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// A page read returned fewer bytes than a full page.
    #[error("short read of page {page_id}: got {got} of {expected} bytes")]
    ShortRead {
        /// Page being read.
        page_id: PageId,
        /// Bytes expected (the page size).
        expected: usize,
        /// Bytes actually read.
        got: usize,
    },

    /// A page id outside the bounds of the database file.
    #[error("page {page_id} out of bounds ({num_pages} pages)")]
    PageOutOfBounds {
        /// Offending page id.
        page_id: PageId,
        /// Current number of pages in the file.
        num_pages: u32,
    },

    /// A decoded node disagrees with its page kind, or a length field is
    /// impossible.
    #[error("{component} corrupted at page {page_id}: {message}")]
    Corrupted {
        /// Originating component.
        component: Component,
        /// Offending page (INVALID when not page-scoped).
        page_id: PageId,
        /// Description of the corruption.
        message: String,
    },

    /// Stored checksum disagrees with the recomputed one.
    #[error("checksum mismatch at LSN {lsn}: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// LSN of the bad record.
        lsn: Lsn,
        /// Checksum stored in the record.
        stored: u32,
        /// Checksum recomputed from the bytes.
        computed: u32,
    },

    /// Eviction found every frame pinned.
    #[error("buffer pool exhausted: all {frames} frames are pinned")]
    AllFramesPinned {
        /// Pool capacity.
        frames: usize,
    },

    /// A key or value exceeds the size an entry may occupy in a leaf.
    #[error("entry too large: {size} bytes exceeds maximum {max}")]
    EntryTooLarge {
        /// Encoded entry size.
        size: usize,
        /// Maximum permitted size.
        max: usize,
    },

    /// An operation referenced a transaction the manager does not know,
    /// or one that has already ended.
    #[error("transaction {txn_id} is not running")]
    TxnNotRunning {
        /// Offending transaction.
        txn_id: TxnId,
    },

    /// Recovery could not make progress.
    #[error("recovery failed at LSN {lsn}: {message}")]
    RecoveryFailed {
        /// LSN recovery was processing.
        lsn: Lsn,
        /// What went wrong.
        message: String,
    },
}

impl EngineError {
    /// Returns the kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } | Self::EntryTooLarge { .. } | Self::TxnNotRunning { .. } => {
                ErrorKind::InvalidArgument
            }
            Self::Closed { .. } => ErrorKind::Closed,
            Self::Io { .. } | Self::ShortRead { .. } => ErrorKind::Io,
            Self::PageOutOfBounds { .. } => ErrorKind::InvalidArgument,
            Self::Corrupted { .. } | Self::ChecksumMismatch { .. } => ErrorKind::Corrupted,
            Self::AllFramesPinned { .. } | Self::RecoveryFailed { .. } => ErrorKind::Fatal,
        }
    }

    /// Creates an invalid-argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an I/O error tagged with its component.
    #[must_use]
    pub fn io(component: Component, source: io::Error) -> Self {
        Self::Io { component, source }
    }

    /// Creates a corruption error.
    #[must_use]
    pub fn corrupted(component: Component, page_id: PageId, message: impl Into<String>) -> Self {
        Self::Corrupted {
            component,
            page_id,
            message: message.into(),
        }
    }

    /// Returns true if the error makes the handle unusable.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Fatal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            EngineError::invalid_argument("bad").kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            EngineError::Closed {
                component: Component::Engine
            }
            .kind(),
            ErrorKind::Closed
        );
        assert_eq!(
            EngineError::AllFramesPinned { frames: 8 }.kind(),
            ErrorKind::Fatal
        );
        assert_eq!(
            EngineError::ChecksumMismatch {
                lsn: Lsn::new(7),
                stored: 1,
                computed: 2
            }
            .kind(),
            ErrorKind::Corrupted
        );
    }

    #[test]
    fn test_error_display() {
        let err = EngineError::ShortRead {
            page_id: PageId::new(3),
            expected: 4096,
            got: 100,
        };
        assert_eq!(err.to_string(), "short read of page 3: got 100 of 4096 bytes");
    }

    #[test]
    fn test_io_error_tagging() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let err = EngineError::io(Component::Disk, io_err);
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("disk"));
    }

    #[test]
    fn test_fatal() {
        assert!(EngineError::AllFramesPinned { frames: 1 }.is_fatal());
        assert!(!EngineError::invalid_argument("x").is_fatal());
    }
}
