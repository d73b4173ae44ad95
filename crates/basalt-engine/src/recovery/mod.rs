//! ARIES-style crash recovery.
//!
//! Recovery runs once at open, before any user transaction, whenever
//! the WAL directory holds a segment:
//!
//! 1. **Analysis** scans the log forward, building the transaction
//!    table (losers and their last LSN), the dirty page table (earliest
//!    dirtying LSN per page), and the committed set.
//! 2. **Redo** replays committed changes forward from the earliest
//!    dirtying LSN, skipping records whose target page already carries a
//!    covering `page_lsn`.
//! 3. **Undo** walks each loser's `prev_lsn` chain backward, reversing
//!    its changes, logging a compensation record per reversal, and
//!    closing the transaction with an abort record so a later recovery
//!    does not see it again.
//!
//! Redo and Undo apply entries through the same tree code as the
//! forward path, so replay splits pages exactly the way live inserts
//! do. The pipeline is idempotent: a second run over the same WAL and
//! pages finds nothing to do.

mod analysis;
mod redo;
mod undo;

pub use analysis::Analysis;

use std::sync::Arc;

use tracing::info;

use basalt_common::error::EngineResult;
use basalt_common::types::{Lsn, TxnId};
use basalt_storage::{BPlusTree, BufferPool, DiskManager};
use basalt_wal::{LogManager, LsnGenerator};

/// Summary of a recovery run.
#[derive(Debug, Clone)]
pub struct RecoveryReport {
    /// Log records scanned during Analysis.
    pub records_scanned: usize,
    /// Loser transactions found.
    pub losers: usize,
    /// Data records re-applied by Redo.
    pub redo_applied: usize,
    /// Changes reversed by Undo.
    pub undo_applied: usize,
    /// Highest LSN seen in the log.
    pub max_lsn: Lsn,
    /// First transaction id safe for new transactions.
    pub next_txn_id: TxnId,
}

/// Orchestrates the three recovery phases.
pub struct RecoveryCoordinator;

impl RecoveryCoordinator {
    /// Runs recovery over the WAL and database file.
    ///
    /// `order` and `frames` configure the tree and scratch buffer pool
    /// recovery replays through; every dirtied page is flushed before
    /// the call returns. Returns an LSN generator resuming past the
    /// replayed log, plus a report of what each phase did.
    pub fn run(
        disk: &Arc<DiskManager>,
        wal: &LogManager,
        order: usize,
        frames: usize,
    ) -> EngineResult<(LsnGenerator, RecoveryReport)> {
        let records = wal.read_all().map_err(basalt_common::EngineError::from)?;
        info!(records = records.len(), "recovery: scanned WAL");

        let analysis = analysis::analyze(&records);
        info!(
            losers = analysis.txn_table.len(),
            dirty_pages = analysis.dirty_pages.len(),
            first_redo = ?analysis.first_redo_lsn,
            "recovery: analysis complete"
        );

        let lsn = LsnGenerator::starting_at(Lsn::new(analysis.max_lsn.as_i64().max(0)));

        // Recovery holds its own pool over the shared disk manager; no
        // user transactions run until it has flushed and dropped it.
        let pool = Arc::new(BufferPool::new(frames, Arc::clone(disk), None));
        let tree = BPlusTree::new(Arc::clone(&pool), order);

        let redo_applied = redo::redo(&tree, &records, &analysis)?;
        info!(applied = redo_applied, "recovery: redo complete");

        let undo_applied = undo::undo(&tree, wal, &lsn, &records, &analysis)?;
        info!(reversed = undo_applied, "recovery: undo complete");

        pool.flush_all()?;
        disk.flush()?;

        let report = RecoveryReport {
            records_scanned: records.len(),
            losers: analysis.txn_table.len(),
            redo_applied,
            undo_applied,
            max_lsn: analysis.max_lsn,
            next_txn_id: analysis.next_txn_id(),
        };
        Ok((lsn, report))
    }
}
