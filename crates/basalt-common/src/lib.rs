//! # basalt-common
//!
//! Common types, errors, and configuration for BasaltDB.
//!
//! This crate provides the foundational pieces shared by every BasaltDB
//! component:
//!
//! - **Types**: core identifiers (`PageId`, `TxnId`, `Lsn`) and the
//!   byte-backed `Key`/`Value` wrappers
//! - **Errors**: the unified [`EngineError`] with its error-kind taxonomy
//! - **Config**: engine configuration with validation
//! - **Constants**: on-disk format and system-wide limits

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

pub use config::EngineConfig;
pub use error::{Component, EngineError, EngineResult, ErrorKind};
pub use types::{Key, Lsn, PageId, TxnId, Value};
