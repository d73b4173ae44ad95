//! Recovery phase 1: Analysis.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use basalt_common::types::{Lsn, PageId, TxnId};
use basalt_wal::{LogRecord, RecordKind};

/// The tables produced by scanning the log forward.
#[derive(Debug)]
pub struct Analysis {
    /// Transactions still open at the end of the log: the losers, each
    /// mapped to its last LSN.
    pub txn_table: HashMap<TxnId, Lsn>,
    /// Page id → earliest LSN that dirtied it.
    pub dirty_pages: HashMap<PageId, Lsn>,
    /// Transactions with a commit record.
    pub committed: HashSet<TxnId>,
    /// Start point for Redo; `None` means nothing to redo.
    pub first_redo_lsn: Option<Lsn>,
    /// Highest LSN seen.
    pub max_lsn: Lsn,
    /// Highest transaction id seen.
    pub max_txn_id: u32,
}

impl Default for Analysis {
    fn default() -> Self {
        Self {
            txn_table: HashMap::new(),
            dirty_pages: HashMap::new(),
            committed: HashSet::new(),
            first_redo_lsn: None,
            max_lsn: Lsn::INVALID,
            max_txn_id: 0,
        }
    }
}

impl Analysis {
    /// First transaction id that is safely beyond every replayed one.
    #[must_use]
    pub fn next_txn_id(&self) -> TxnId {
        TxnId::new(self.max_txn_id + 1)
    }
}

/// Scans the log in LSN order, maintaining the transaction table and
/// dirty page table.
#[must_use]
pub fn analyze(records: &[LogRecord]) -> Analysis {
    let mut analysis = Analysis::default();

    for record in records {
        analysis.max_lsn = analysis.max_lsn.max(record.lsn);
        if record.txn_id.is_valid() {
            analysis.max_txn_id = analysis.max_txn_id.max(record.txn_id.as_u32());
        }

        match record.kind {
            RecordKind::Begin => {
                analysis.txn_table.insert(record.txn_id, record.lsn);
                debug!(txn = %record.txn_id, lsn = %record.lsn, "analysis: begin");
            }
            RecordKind::Commit => {
                analysis.txn_table.remove(&record.txn_id);
                analysis.committed.insert(record.txn_id);
                debug!(txn = %record.txn_id, "analysis: commit");
            }
            RecordKind::Abort => {
                analysis.txn_table.remove(&record.txn_id);
                debug!(txn = %record.txn_id, "analysis: abort");
            }
            RecordKind::Insert | RecordKind::Update | RecordKind::Delete => {
                if record.page_id.is_valid() {
                    analysis
                        .dirty_pages
                        .entry(record.page_id)
                        .or_insert(record.lsn);
                }
                analysis.txn_table.insert(record.txn_id, record.lsn);
            }
            RecordKind::Clr => {
                // Compensations keep the loser's chain current but are
                // never themselves undone.
                analysis.txn_table.insert(record.txn_id, record.lsn);
            }
            RecordKind::Checkpoint => {}
        }
    }

    analysis.first_redo_lsn = analysis.dirty_pages.values().min().copied();
    analysis
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn image(payload: &[u8]) -> Bytes {
        Bytes::copy_from_slice(payload)
    }

    #[test]
    fn test_empty_log() {
        let analysis = analyze(&[]);
        assert!(analysis.txn_table.is_empty());
        assert!(analysis.dirty_pages.is_empty());
        assert_eq!(analysis.first_redo_lsn, None);
        assert_eq!(analysis.max_lsn, Lsn::INVALID);
        assert_eq!(analysis.next_txn_id(), TxnId::new(1));
    }

    #[test]
    fn test_committed_txn_leaves_table() {
        let records = vec![
            LogRecord::begin(Lsn::new(1), TxnId::new(100)),
            LogRecord::insert(
                Lsn::new(2),
                TxnId::new(100),
                Lsn::new(1),
                PageId::new(5),
                image(b"\x00\x00\x00\x01kv"),
            ),
            LogRecord::commit(Lsn::new(3), TxnId::new(100), Lsn::new(2)),
        ];

        let analysis = analyze(&records);
        assert!(analysis.txn_table.is_empty());
        assert!(analysis.committed.contains(&TxnId::new(100)));
        assert_eq!(analysis.dirty_pages.get(&PageId::new(5)), Some(&Lsn::new(2)));
        assert_eq!(analysis.first_redo_lsn, Some(Lsn::new(2)));
        assert_eq!(analysis.max_lsn, Lsn::new(3));
        assert_eq!(analysis.next_txn_id(), TxnId::new(101));
    }

    #[test]
    fn test_loser_keeps_last_lsn() {
        let records = vec![
            LogRecord::begin(Lsn::new(4), TxnId::new(200)),
            LogRecord::update(
                Lsn::new(5),
                TxnId::new(200),
                Lsn::new(4),
                PageId::new(7),
                image(b"\x00\x00\x00\x01kx"),
                image(b"\x00\x00\x00\x01ky"),
            ),
        ];

        let analysis = analyze(&records);
        assert_eq!(analysis.txn_table.get(&TxnId::new(200)), Some(&Lsn::new(5)));
        assert!(!analysis.committed.contains(&TxnId::new(200)));
    }

    #[test]
    fn test_dirty_page_keeps_earliest_lsn() {
        let page = PageId::new(3);
        let records = vec![
            LogRecord::begin(Lsn::new(1), TxnId::new(1)),
            LogRecord::insert(Lsn::new(2), TxnId::new(1), Lsn::new(1), page, image(b"\x00\x00\x00\x01aa")),
            LogRecord::insert(Lsn::new(3), TxnId::new(1), Lsn::new(2), page, image(b"\x00\x00\x00\x01bb")),
        ];

        let analysis = analyze(&records);
        assert_eq!(analysis.dirty_pages.get(&page), Some(&Lsn::new(2)));
    }

    #[test]
    fn test_abort_removes_from_table() {
        let records = vec![
            LogRecord::begin(Lsn::new(1), TxnId::new(9)),
            LogRecord::abort(Lsn::new(2), TxnId::new(9), Lsn::new(1)),
        ];
        let analysis = analyze(&records);
        assert!(analysis.txn_table.is_empty());
        assert!(!analysis.committed.contains(&TxnId::new(9)));
    }
}
