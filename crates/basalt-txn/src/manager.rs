//! Transaction lifecycle and state table.
//!
//! # Transaction States
//!
//! ```text
//! ┌───────┐   begin()   ┌─────────┐
//! │ Start │────────────▶│ Running │
//! └───────┘             └─────────┘
//!                            │
//!                  ┌─────────┴─────────┐
//!              commit()             abort()
//!                  │                   │
//!                  ▼                   ▼
//!           ┌───────────┐       ┌──────────┐
//!           │ Committed │       │ Aborted  │
//!           └───────────┘       └──────────┘
//! ```
//!
//! Transitions are one-shot and final.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use basalt_common::error::{EngineError, EngineResult};
use basalt_common::types::{Lsn, TxnId};

/// The state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// The transaction can perform operations.
    Running,
    /// The transaction committed; its writes are durable.
    Committed,
    /// The transaction rolled back; its writes are discarded.
    Aborted,
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Committed => write!(f, "Committed"),
            Self::Aborted => write!(f, "Aborted"),
        }
    }
}

/// A transaction handle.
///
/// The handle is a cheap copyable token; mutable bookkeeping (state,
/// last LSN) lives in the [`TxnManager`]'s table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    /// The transaction's id.
    pub id: TxnId,
    /// The LSN horizon observed at `begin()`; the snapshot this
    /// transaction reads at.
    pub start_lsn: Lsn,
}

#[derive(Debug)]
struct TxnEntry {
    state: TxnState,
    last_lsn: Lsn,
    start_lsn: Lsn,
}

/// Transaction statistics.
#[derive(Debug, Default)]
pub struct TxnStats {
    /// Transactions begun.
    pub begun: AtomicU64,
    /// Transactions committed.
    pub committed: AtomicU64,
    /// Transactions aborted.
    pub aborted: AtomicU64,
}

/// Allocates transaction ids and tracks every transaction's state and
/// last LSN.
///
/// # Example
///
/// ```rust
/// use basalt_txn::{TxnManager, TxnState};
/// use basalt_common::types::Lsn;
///
/// let manager = TxnManager::new();
/// let txn = manager.begin(Lsn::ZERO);
/// assert_eq!(manager.state_of(txn.id), Some(TxnState::Running));
/// manager.mark_committed(txn.id).unwrap();
/// assert_eq!(manager.state_of(txn.id), Some(TxnState::Committed));
/// ```
#[derive(Debug)]
pub struct TxnManager {
    next_txn_id: AtomicU32,
    table: Mutex<HashMap<TxnId, TxnEntry>>,
    stats: TxnStats,
}

impl TxnManager {
    /// Creates a manager whose first transaction id is 1.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(TxnId::FIRST)
    }

    /// Creates a manager resuming from a specific id, used after
    /// recovery so new transactions never collide with replayed ones.
    #[must_use]
    pub fn starting_at(first: TxnId) -> Self {
        Self {
            next_txn_id: AtomicU32::new(first.as_u32().max(TxnId::FIRST.as_u32())),
            table: Mutex::new(HashMap::new()),
            stats: TxnStats::default(),
        }
    }

    /// Begins a transaction, recording `current_lsn` as its snapshot
    /// horizon.
    pub fn begin(&self, current_lsn: Lsn) -> Transaction {
        let id = TxnId::new(self.next_txn_id.fetch_add(1, Ordering::SeqCst));
        self.table.lock().insert(
            id,
            TxnEntry {
                state: TxnState::Running,
                last_lsn: Lsn::INVALID,
                start_lsn: current_lsn,
            },
        );
        self.stats.begun.fetch_add(1, Ordering::Relaxed);
        debug!(txn = %id, start_lsn = %current_lsn, "began transaction");
        Transaction {
            id,
            start_lsn: current_lsn,
        }
    }

    /// Returns a transaction's state, if it is known.
    #[must_use]
    pub fn state_of(&self, txn_id: TxnId) -> Option<TxnState> {
        self.table.lock().get(&txn_id).map(|e| e.state)
    }

    /// Returns true if the transaction is in the `Running` state.
    #[must_use]
    pub fn is_running(&self, txn_id: TxnId) -> bool {
        self.state_of(txn_id) == Some(TxnState::Running)
    }

    /// Returns true if the transaction committed.
    #[must_use]
    pub fn is_committed(&self, txn_id: TxnId) -> bool {
        self.state_of(txn_id) == Some(TxnState::Committed)
    }

    /// The last LSN written by the transaction, `Lsn::INVALID` if none.
    #[must_use]
    pub fn last_lsn(&self, txn_id: TxnId) -> Lsn {
        self.table
            .lock()
            .get(&txn_id)
            .map_or(Lsn::INVALID, |e| e.last_lsn)
    }

    /// Records the newest LSN written by a running transaction.
    pub fn set_last_lsn(&self, txn_id: TxnId, lsn: Lsn) -> EngineResult<()> {
        let mut table = self.table.lock();
        let entry = Self::running_entry(&mut table, txn_id)?;
        entry.last_lsn = lsn;
        Ok(())
    }

    /// Finalizes a running transaction as committed.
    pub fn mark_committed(&self, txn_id: TxnId) -> EngineResult<()> {
        let mut table = self.table.lock();
        Self::running_entry(&mut table, txn_id)?.state = TxnState::Committed;
        drop(table);
        self.stats.committed.fetch_add(1, Ordering::Relaxed);
        debug!(txn = %txn_id, "committed transaction");
        Ok(())
    }

    /// Finalizes a running transaction as aborted.
    pub fn mark_aborted(&self, txn_id: TxnId) -> EngineResult<()> {
        let mut table = self.table.lock();
        Self::running_entry(&mut table, txn_id)?.state = TxnState::Aborted;
        drop(table);
        self.stats.aborted.fetch_add(1, Ordering::Relaxed);
        debug!(txn = %txn_id, "aborted transaction");
        Ok(())
    }

    /// The smallest snapshot horizon among running transactions; `None`
    /// when nothing is running. Version pruning must not drop committed
    /// versions still visible at this horizon.
    #[must_use]
    pub fn oldest_running_snapshot(&self) -> Option<Lsn> {
        self.table
            .lock()
            .values()
            .filter(|e| e.state == TxnState::Running)
            .map(|e| e.start_lsn)
            .min()
    }

    /// Number of transactions currently running.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.table
            .lock()
            .values()
            .filter(|e| e.state == TxnState::Running)
            .count()
    }

    /// Returns the transaction statistics.
    #[must_use]
    pub fn stats(&self) -> &TxnStats {
        &self.stats
    }

    fn running_entry<'t>(
        table: &'t mut HashMap<TxnId, TxnEntry>,
        txn_id: TxnId,
    ) -> EngineResult<&'t mut TxnEntry> {
        match table.get_mut(&txn_id) {
            Some(entry) if entry.state == TxnState::Running => Ok(entry),
            _ => Err(EngineError::TxnNotRunning { txn_id }),
        }
    }
}

impl Default for TxnManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_allocates_monotonic_ids() {
        let manager = TxnManager::new();
        let t1 = manager.begin(Lsn::ZERO);
        let t2 = manager.begin(Lsn::new(5));
        assert_eq!(t1.id, TxnId::new(1));
        assert_eq!(t2.id, TxnId::new(2));
        assert_eq!(t2.start_lsn, Lsn::new(5));
        assert_eq!(manager.running_count(), 2);
    }

    #[test]
    fn test_one_shot_transitions() {
        let manager = TxnManager::new();
        let txn = manager.begin(Lsn::ZERO);

        manager.mark_committed(txn.id).unwrap();
        assert!(manager.is_committed(txn.id));

        // Committed is final: neither transition applies again.
        assert!(manager.mark_committed(txn.id).is_err());
        assert!(manager.mark_aborted(txn.id).is_err());
    }

    #[test]
    fn test_abort() {
        let manager = TxnManager::new();
        let txn = manager.begin(Lsn::ZERO);
        manager.mark_aborted(txn.id).unwrap();
        assert_eq!(manager.state_of(txn.id), Some(TxnState::Aborted));
        assert!(!manager.is_running(txn.id));
    }

    #[test]
    fn test_last_lsn_tracking() {
        let manager = TxnManager::new();
        let txn = manager.begin(Lsn::ZERO);
        assert_eq!(manager.last_lsn(txn.id), Lsn::INVALID);

        manager.set_last_lsn(txn.id, Lsn::new(9)).unwrap();
        assert_eq!(manager.last_lsn(txn.id), Lsn::new(9));

        manager.mark_committed(txn.id).unwrap();
        assert!(manager.set_last_lsn(txn.id, Lsn::new(10)).is_err());
    }

    #[test]
    fn test_starting_at() {
        let manager = TxnManager::starting_at(TxnId::new(40));
        assert_eq!(manager.begin(Lsn::ZERO).id, TxnId::new(40));

        // An invalid starting id clamps to the first valid one.
        let manager = TxnManager::starting_at(TxnId::INVALID);
        assert_eq!(manager.begin(Lsn::ZERO).id, TxnId::FIRST);
    }

    #[test]
    fn test_unknown_txn() {
        let manager = TxnManager::new();
        assert_eq!(manager.state_of(TxnId::new(42)), None);
        assert!(manager.mark_committed(TxnId::new(42)).is_err());
    }
}
