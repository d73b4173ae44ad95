//! # basalt-engine
//!
//! The BasaltDB database engine.
//!
//! This crate assembles the storage, WAL, and transaction layers into
//! the public [`Database`] handle:
//!
//! - Transactional key/value operations with snapshot isolation
//! - Write-ahead logging with force-on-commit durability
//! - Three-phase crash recovery (Analysis, Redo, Undo) at open
//!
//! ```rust,no_run
//! use basalt_engine::Database;
//! use basalt_common::types::{Key, Value};
//!
//! let db = Database::open("/tmp/demo.db", 64).unwrap();
//! let txn = db.begin().unwrap();
//! db.insert(&txn, Key::from("answer"), Value::from("42")).unwrap();
//! db.commit(&txn).unwrap();
//! db.close().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod db;
pub mod recovery;

pub use db::{Database, DbStats};
pub use recovery::{RecoveryCoordinator, RecoveryReport};
