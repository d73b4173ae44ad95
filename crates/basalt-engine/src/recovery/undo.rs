//! Recovery phase 3: Undo.

use std::collections::HashMap;

use tracing::{debug, warn};

use basalt_common::error::EngineResult;
use basalt_common::types::{Lsn, TxnId};
use basalt_storage::node::decode_entry_image;
use basalt_storage::BPlusTree;
use basalt_wal::{LogManager, LogRecord, LsnGenerator, RecordKind};

use super::analysis::Analysis;

/// Rolls back every loser transaction.
///
/// Each loser's chain is walked backward via `prev_lsn`. Data records
/// are reversed with their old image, and a compensation record is
/// logged per reversal; a CLR's own `prev_lsn` points past the record
/// it undoes, so a crash during Undo never re-undoes work. When a
/// chain is fully unwound an abort record closes the transaction, which
/// keeps a second recovery from seeing it as a loser at all.
pub(super) fn undo(
    tree: &BPlusTree,
    wal: &LogManager,
    lsn: &LsnGenerator,
    records: &[LogRecord],
    analysis: &Analysis,
) -> EngineResult<usize> {
    if analysis.txn_table.is_empty() {
        debug!("undo: no loser transactions");
        return Ok(0);
    }

    let by_lsn: HashMap<Lsn, &LogRecord> = records.iter().map(|r| (r.lsn, r)).collect();

    // Newest losers first, for a deterministic order.
    let mut losers: Vec<(TxnId, Lsn)> = analysis
        .txn_table
        .iter()
        .map(|(&txn, &last)| (txn, last))
        .collect();
    losers.sort_by(|a, b| b.1.cmp(&a.1));

    let mut reversed = 0;
    for (txn_id, last_lsn) in losers {
        debug!(txn = %txn_id, last_lsn = %last_lsn, "undo: rolling back loser");
        let mut chain_tail = last_lsn;
        let mut current = last_lsn;

        while current.is_valid() {
            let Some(record) = by_lsn.get(&current) else {
                warn!(txn = %txn_id, lsn = %current, "undo: chain record missing");
                break;
            };

            match record.kind {
                RecordKind::Begin => break,
                RecordKind::Clr => {
                    // Already compensated; its prev_lsn skips past the
                    // undone record.
                    current = record.prev_lsn;
                }
                kind if kind.is_data() && record.page_id.is_valid() => {
                    let clr_lsn = lsn.next();
                    reverse(tree, record, clr_lsn)?;

                    let clr = LogRecord::clr(
                        clr_lsn,
                        txn_id,
                        record.prev_lsn,
                        record.page_id,
                        record.lsn,
                        record.old_bytes.clone(),
                    );
                    wal.append(&clr, false).map_err(basalt_common::EngineError::from)?;
                    chain_tail = clr_lsn;
                    reversed += 1;
                    debug!(undone = %record.lsn, clr = %clr_lsn, "undo: reversed record");
                    current = record.prev_lsn;
                }
                _ => current = record.prev_lsn,
            }
        }

        // Close the loser so a later recovery does not undo it again.
        let abort = LogRecord::abort(lsn.next(), txn_id, chain_tail);
        wal.append(&abort, false).map_err(basalt_common::EngineError::from)?;
    }

    wal.flush().map_err(basalt_common::EngineError::from)?;
    Ok(reversed)
}

/// Reverses one data record: an insert is removed, an update or delete
/// has its old entry restored. The CLR's LSN is stamped onto the pages
/// the reversal touches.
fn reverse(tree: &BPlusTree, record: &LogRecord, clr_lsn: Lsn) -> EngineResult<()> {
    match &record.old_bytes {
        Some(old) => {
            let (key, value) = decode_entry_image(old)?;
            tree.insert(key, value, clr_lsn)?;
        }
        None => {
            // No before-image: the record created the key.
            if let Some(new) = &record.new_bytes {
                let (key, _) = decode_entry_image(new)?;
                tree.delete(&key, clr_lsn)?;
            }
        }
    }
    Ok(())
}
