//! Per-key version chains for snapshot isolation.
//!
//! Every write appends a version tagged with the transaction that
//! created it. Readers scan a key's chain newest-first and return the
//! first version their snapshot may see:
//!
//! ```text
//! key "user:1"
//! ┌──────────────────────────────────────────┐
//! │ created_by: 7   value: "carol"   (newest)│
//! │ created_by: 4   value: "bob"             │
//! │ created_by: 1   value: "alice"  (oldest) │
//! └──────────────────────────────────────────┘
//! ```
//!
//! A version is visible to transaction `T` when it was created by `T`
//! itself, or by a committed transaction whose id lies below `T`'s
//! snapshot horizon. Versions by running or aborted transactions are
//! skipped. The chains are in-memory only; the persisted form of a key
//! is the winning committed version written into the B+ tree.

use std::collections::HashMap;

use parking_lot::Mutex;

use basalt_common::types::{Key, Lsn, TxnId, Value};

use crate::manager::TxnState;

/// One entry in a version chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    /// Transaction that created the version.
    pub created_by: TxnId,
    /// The written value; `None` is a tombstone.
    pub value: Option<Value>,
    /// LSN of the log record describing this write.
    pub lsn: Lsn,
}

/// In-memory store of version chains, one per written key.
///
/// A single mutex guards all chains; the visibility algorithm tolerates
/// either that or per-key locking.
#[derive(Debug, Default)]
pub struct VersionStore {
    chains: Mutex<HashMap<Key, Vec<Version>>>,
}

impl VersionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a version for `key`.
    pub fn record_write(&self, key: Key, created_by: TxnId, value: Option<Value>, lsn: Lsn) {
        self.chains
            .lock()
            .entry(key)
            .or_default()
            .push(Version {
                created_by,
                value,
                lsn,
            });
    }

    /// Resolves the newest version of `key` visible to the reader.
    ///
    /// Returns `None` when the key has no chain (the caller falls
    /// through to the persisted tree), `Some(None)` for a visible
    /// tombstone, and `Some(Some(value))` for a visible value.
    pub fn visible(
        &self,
        key: &[u8],
        reader: TxnId,
        start_lsn: Lsn,
        state_of: impl Fn(TxnId) -> Option<TxnState>,
    ) -> Option<Option<Value>> {
        let chains = self.chains.lock();
        resolve_chain(chains.get(key)?, reader, start_lsn, &state_of)
    }

    /// Resolves every key in `[lo, hi)` that has a visible chain version,
    /// sorted ascending. Range scans overlay these onto the persisted
    /// tree entries.
    pub fn visible_in_range(
        &self,
        lo: &[u8],
        hi: &[u8],
        reader: TxnId,
        start_lsn: Lsn,
        state_of: impl Fn(TxnId) -> Option<TxnState>,
    ) -> Vec<(Key, Option<Value>)> {
        let chains = self.chains.lock();
        let mut out: Vec<(Key, Option<Value>)> = chains
            .iter()
            .filter(|(key, _)| key.as_bytes() >= lo && key.as_bytes() < hi)
            .filter_map(|(key, chain)| {
                resolve_chain(chain, reader, start_lsn, &state_of).map(|v| (key.clone(), v))
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// The winning (newest) version written by `txn_id`, per key.
    ///
    /// Commit persists exactly these into the tree.
    #[must_use]
    pub fn winning_versions(&self, txn_id: TxnId) -> Vec<(Key, Version)> {
        let chains = self.chains.lock();
        let mut winners = Vec::new();
        for (key, chain) in chains.iter() {
            if let Some(version) = chain.iter().rev().find(|v| v.created_by == txn_id) {
                winners.push((key.clone(), version.clone()));
            }
        }
        winners
    }

    /// Removes every version created by `txn_id` (abort path).
    pub fn discard_txn(&self, txn_id: TxnId) {
        let mut chains = self.chains.lock();
        chains.retain(|_, chain| {
            chain.retain(|v| v.created_by != txn_id);
            !chain.is_empty()
        });
    }

    /// Drops chain entries no longer visible to anyone.
    ///
    /// `horizon` is the oldest running snapshot (`i64::MAX` when nothing
    /// runs). Kept per chain: every running transaction's versions,
    /// every committed version at or above the horizon, and the newest
    /// committed version below it — the one any old snapshot resolves
    /// to. Aborted versions are always dropped.
    pub fn prune(&self, horizon: Lsn, state_of: impl Fn(TxnId) -> Option<TxnState>) {
        let mut chains = self.chains.lock();
        chains.retain(|_, chain| {
            let mut kept_below_horizon = false;
            let mut keep = Vec::with_capacity(chain.len());
            for version in chain.iter().rev() {
                match state_of(version.created_by) {
                    Some(TxnState::Running) => keep.push(version.clone()),
                    Some(TxnState::Committed) => {
                        let below = i64::from(version.created_by.as_u32()) < horizon.as_i64();
                        if !below {
                            keep.push(version.clone());
                        } else if !kept_below_horizon {
                            kept_below_horizon = true;
                            keep.push(version.clone());
                        }
                    }
                    _ => {}
                }
            }
            keep.reverse();
            *chain = keep;
            !chain.is_empty()
        });
    }

    /// Number of keys with a live chain.
    #[must_use]
    pub fn chain_count(&self) -> usize {
        self.chains.lock().len()
    }

    /// Total number of versions across all chains.
    #[must_use]
    pub fn version_count(&self) -> usize {
        self.chains.lock().values().map(Vec::len).sum()
    }
}

/// Newest version of a chain visible to the reader: its own writes, or
/// a committed writer whose id lies below the reader's snapshot horizon.
fn resolve_chain<F>(
    chain: &[Version],
    reader: TxnId,
    start_lsn: Lsn,
    state_of: &F,
) -> Option<Option<Value>>
where
    F: Fn(TxnId) -> Option<TxnState>,
{
    for version in chain.iter().rev() {
        if version.created_by == reader {
            return Some(version.value.clone());
        }
        if state_of(version.created_by) == Some(TxnState::Committed)
            && i64::from(version.created_by.as_u32()) < start_lsn.as_i64()
        {
            return Some(version.value.clone());
        }
    }
    None
}
