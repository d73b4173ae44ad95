//! # basalt-wal
//!
//! Write-ahead logging for BasaltDB.
//!
//! This crate implements the append-only segmented log:
//! - Binary log records with CRC32 checksums and per-transaction undo chains
//! - A monotonic LSN generator
//! - Buffered appends with force-on-commit durability
//! - Segment rotation and full replay for recovery

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod lsn;
pub mod manager;
pub mod record;
pub mod segment;

pub use config::WalConfig;
pub use error::{WalError, WalResult};
pub use lsn::LsnGenerator;
pub use manager::{LogManager, WalStats};
pub use record::{LogRecord, RecordKind};
