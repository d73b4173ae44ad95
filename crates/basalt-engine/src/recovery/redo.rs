//! Recovery phase 2: Redo.

use tracing::debug;

use basalt_common::error::{EngineError, EngineResult};
use basalt_common::types::Lsn;
use basalt_storage::node::decode_entry_image;
use basalt_storage::BPlusTree;
use basalt_wal::{LogRecord, RecordKind};

use super::analysis::Analysis;

/// Replays committed data records forward from `first_redo_lsn`.
///
/// A record is skipped when its target page already carries a
/// `page_lsn` at or past the record (the change reached disk before the
/// crash). Applied records go through the tree so splits happen exactly
/// as on the forward path; the record's LSN is stamped onto every page
/// the re-applied change touches.
pub(super) fn redo(tree: &BPlusTree, records: &[LogRecord], analysis: &Analysis) -> EngineResult<usize> {
    let Some(first_redo) = analysis.first_redo_lsn else {
        debug!("redo: no dirty pages");
        return Ok(0);
    };

    let mut applied = 0;
    for record in records {
        if record.lsn < first_redo || !record.kind.is_data() || !record.page_id.is_valid() {
            continue;
        }
        if !analysis.committed.contains(&record.txn_id) {
            debug!(lsn = %record.lsn, txn = %record.txn_id, "redo: skip, not committed");
            continue;
        }

        if durable_lsn(tree, record)? >= record.lsn {
            debug!(lsn = %record.lsn, page = %record.page_id, "redo: already on disk");
            continue;
        }

        apply(tree, record)?;
        applied += 1;
        debug!(lsn = %record.lsn, page = %record.page_id, kind = ?record.kind, "redo: applied");
    }
    Ok(applied)
}

/// The `page_lsn` of the record's target page, or `Lsn::INVALID` when
/// the page was never written before the crash.
fn durable_lsn(tree: &BPlusTree, record: &LogRecord) -> EngineResult<Lsn> {
    match tree.pool().fetch(record.page_id) {
        Ok(guard) => Ok(guard.read().page_lsn()),
        Err(EngineError::PageOutOfBounds { .. }) => Ok(Lsn::INVALID),
        Err(e) => Err(e),
    }
}

/// Re-applies one data record through the tree.
fn apply(tree: &BPlusTree, record: &LogRecord) -> EngineResult<()> {
    match record.kind {
        RecordKind::Insert | RecordKind::Update => {
            let image = record.new_bytes.as_ref().ok_or_else(|| {
                EngineError::RecoveryFailed {
                    lsn: record.lsn,
                    message: "data record without a new image".to_string(),
                }
            })?;
            let (key, value) = decode_entry_image(image)?;
            tree.insert(key, value, record.lsn)?;
        }
        RecordKind::Delete => {
            let image = record.old_bytes.as_ref().ok_or_else(|| {
                EngineError::RecoveryFailed {
                    lsn: record.lsn,
                    message: "delete record without an old image".to_string(),
                }
            })?;
            let (key, _) = decode_entry_image(image)?;
            tree.delete(&key, record.lsn)?;
        }
        _ => {}
    }
    Ok(())
}
