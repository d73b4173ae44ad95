//! The database handle and its public operations.
//!
//! A write flows through the layers in a fixed order: the transaction
//! manager assigns an LSN, the log manager appends the record, the MVCC
//! store records the new version, and — at commit, after the commit
//! record is forced — the winning versions are persisted into the B+
//! tree through the buffer pool, which stamps page LSNs on the way.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use basalt_common::config::EngineConfig;
use basalt_common::error::{Component, EngineError, EngineResult};
use basalt_common::types::{Key, Lsn, PageId, Value};
use basalt_storage::buffer::{BufferPoolStats, LogFlush};
use basalt_storage::node::{check_entry_size, encode_entry_image};
use basalt_storage::page::HeaderPage;
use basalt_storage::{BPlusTree, BufferPool, DiskManager};
use basalt_txn::{Transaction, TxnManager, VersionStore};
use basalt_wal::{LogManager, LogRecord, LsnGenerator, WalConfig};

use crate::recovery::RecoveryCoordinator;

/// Adapts the log manager to the buffer pool's durability seam.
struct WalHorizon(Arc<LogManager>);

impl LogFlush for WalHorizon {
    fn flushed_lsn(&self) -> Lsn {
        self.0.flushed_lsn()
    }

    fn flush_to(&self, lsn: Lsn) -> EngineResult<()> {
        self.0.flush_to(lsn).map_err(EngineError::from)
    }
}

/// Point-in-time engine statistics.
#[derive(Debug, Clone, Default)]
pub struct DbStats {
    /// Pages in the database file.
    pub num_pages: u32,
    /// Pages read from disk.
    pub disk_reads: u64,
    /// Pages written to disk.
    pub disk_writes: u64,
    /// Buffer pool counters.
    pub pool: BufferPoolStats,
    /// Log records appended.
    pub wal_records: u64,
    /// Log bytes appended.
    pub wal_bytes: u64,
    /// Log fsyncs.
    pub wal_syncs: u64,
    /// Log segment rotations.
    pub wal_rotations: u64,
    /// Transactions begun.
    pub txns_begun: u64,
    /// Transactions committed.
    pub txns_committed: u64,
    /// Transactions aborted.
    pub txns_aborted: u64,
    /// Keys with a live version chain.
    pub version_chains: usize,
}

/// An embedded BasaltDB database.
///
/// The handle is shared by reference across threads; every operation is
/// synchronous. Opening a database whose WAL directory holds segments
/// runs crash recovery before the first operation.
///
/// # Example
///
/// ```rust,no_run
/// use basalt_engine::Database;
/// use basalt_common::types::{Key, Value};
///
/// let db = Database::open("/tmp/demo.db", 64).unwrap();
/// let txn = db.begin().unwrap();
/// db.insert(&txn, Key::from_u64(10), Value::from("A")).unwrap();
/// assert!(db.search(&txn, &Key::from_u64(10)).unwrap().is_some());
/// db.commit(&txn).unwrap();
/// db.close().unwrap();
/// ```
pub struct Database {
    disk: Arc<DiskManager>,
    pool: Arc<BufferPool>,
    tree: BPlusTree,
    /// Tree latch: descents share it, structural writers hold it
    /// exclusively so a split never misroutes a concurrent search.
    tree_latch: RwLock<()>,
    wal: Arc<LogManager>,
    lsn: Arc<LsnGenerator>,
    txns: TxnManager,
    versions: VersionStore,
    closed: AtomicBool,
}

impl Database {
    /// Opens or creates a database at `path` with the given tree order.
    ///
    /// The WAL lives in a sibling directory derived from `path`.
    pub fn open(path: impl AsRef<Path>, order: usize) -> EngineResult<Self> {
        let path = path.as_ref();
        let config = EngineConfig::default().with_tree_order(order);
        Self::open_with(path, config, WalConfig::new(Self::default_wal_dir(path)))
    }

    /// Opens a database with full control over engine and WAL settings.
    pub fn open_with(
        path: impl AsRef<Path>,
        config: EngineConfig,
        wal_config: WalConfig,
    ) -> EngineResult<Self> {
        config.validate()?;

        let disk = Arc::new(DiskManager::open(path.as_ref())?);
        let needs_recovery = WalConfig::has_segments(&wal_config.dir);
        let wal = Arc::new(LogManager::open(wal_config).map_err(EngineError::from)?);

        let (lsn, txns) = if needs_recovery {
            let (lsn, report) =
                RecoveryCoordinator::run(&disk, &wal, config.tree_order, config.buffer_pool_frames)?;
            info!(
                records = report.records_scanned,
                redone = report.redo_applied,
                undone = report.undo_applied,
                losers = report.losers,
                "recovery finished"
            );
            (lsn, TxnManager::starting_at(report.next_txn_id))
        } else {
            (LsnGenerator::new(), TxnManager::new())
        };

        let horizon: Arc<dyn LogFlush> = Arc::new(WalHorizon(Arc::clone(&wal)));
        let pool = Arc::new(BufferPool::new(
            config.buffer_pool_frames,
            Arc::clone(&disk),
            Some(horizon),
        ));
        let tree = BPlusTree::new(Arc::clone(&pool), config.tree_order);

        Ok(Self {
            disk,
            pool,
            tree,
            tree_latch: RwLock::new(()),
            wal,
            lsn: Arc::new(lsn),
            txns,
            versions: VersionStore::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// The WAL directory used by [`open`](Self::open) for a database
    /// path: the path with `.wal` appended.
    #[must_use]
    pub fn default_wal_dir(path: &Path) -> PathBuf {
        let mut dir = path.as_os_str().to_os_string();
        dir.push(".wal");
        PathBuf::from(dir)
    }

    /// Begins a transaction, logging its begin record.
    pub fn begin(&self) -> EngineResult<Transaction> {
        self.check_open()?;

        let txn = self.txns.begin(self.lsn.current());
        let begin = LogRecord::begin(self.lsn.next(), txn.id);
        self.wal.append(&begin, false).map_err(EngineError::from)?;
        self.txns.set_last_lsn(txn.id, begin.lsn)?;
        Ok(txn)
    }

    /// Inserts or overwrites `key` within the transaction.
    ///
    /// The write is logged (without forcing) and recorded in the key's
    /// version chain; it reaches the tree only at commit.
    pub fn insert(&self, txn: &Transaction, key: Key, value: Value) -> EngineResult<()> {
        self.check_open()?;
        self.check_running(txn)?;
        check_entry_size(&key, Some(&value))?;

        let (page_id, old) = {
            let _latch = self.tree_latch.write();
            (self.tree.target_leaf(&key)?, self.tree.search(&key)?)
        };
        let prev = self.txns.last_lsn(txn.id);
        let lsn = self.lsn.next();

        let new_image = encode_entry_image(&key, Some(&value));
        let record = match old {
            Some(old_value) => LogRecord::update(
                lsn,
                txn.id,
                prev,
                page_id,
                encode_entry_image(&key, Some(&old_value)),
                new_image,
            ),
            None => LogRecord::insert(lsn, txn.id, prev, page_id, new_image),
        };
        self.wal.append(&record, false).map_err(EngineError::from)?;

        self.versions.record_write(key, txn.id, Some(value), lsn);
        self.txns.set_last_lsn(txn.id, lsn)?;
        Ok(())
    }

    /// Deletes `key` within the transaction by writing a tombstone
    /// version; the leaf entry is removed at commit.
    pub fn delete(&self, txn: &Transaction, key: &Key) -> EngineResult<()> {
        self.check_open()?;
        self.check_running(txn)?;

        let (page_id, old) = {
            let _latch = self.tree_latch.write();
            (self.tree.target_leaf(key)?, self.tree.search(key)?)
        };
        let prev = self.txns.last_lsn(txn.id);
        let lsn = self.lsn.next();

        let record = LogRecord::delete(
            lsn,
            txn.id,
            prev,
            page_id,
            encode_entry_image(key, old.as_ref()),
        );
        self.wal.append(&record, false).map_err(EngineError::from)?;

        self.versions.record_write(key.clone(), txn.id, None, lsn);
        self.txns.set_last_lsn(txn.id, lsn)?;
        Ok(())
    }

    /// Reads `key` at the transaction's snapshot.
    ///
    /// The version chain is consulted newest-first; with no chain the
    /// lookup falls through to the persisted tree.
    pub fn search(&self, txn: &Transaction, key: &Key) -> EngineResult<Option<Value>> {
        self.check_open()?;
        self.check_running(txn)?;

        if let Some(resolved) =
            self.versions
                .visible(key, txn.id, txn.start_lsn, |id| self.txns.state_of(id))
        {
            return Ok(resolved);
        }
        let _latch = self.tree_latch.read();
        self.tree.search(key)
    }

    /// Returns `(key, value)` pairs with `lo ≤ key < hi` in ascending
    /// key order, at the transaction's snapshot.
    pub fn range_scan(
        &self,
        txn: &Transaction,
        lo: &Key,
        hi: &Key,
    ) -> EngineResult<Vec<(Key, Value)>> {
        self.check_open()?;
        self.check_running(txn)?;
        if lo.as_bytes() >= hi.as_bytes() {
            return Err(EngineError::invalid_argument(
                "range lower bound must be below upper bound",
            ));
        }

        let mut merged: BTreeMap<Key, Value> = {
            let _latch = self.tree_latch.read();
            self.tree.range_scan(lo, hi)?.into_iter().collect()
        };

        for (key, resolved) in
            self.versions
                .visible_in_range(lo, hi, txn.id, txn.start_lsn, |id| self.txns.state_of(id))
        {
            match resolved {
                Some(value) => {
                    merged.insert(key, value);
                }
                None => {
                    merged.remove(&key);
                }
            }
        }

        Ok(merged.into_iter().collect())
    }

    /// Commits the transaction.
    ///
    /// The commit record is forced to stable storage before the winning
    /// versions are persisted into the tree; only then is the
    /// transaction reported committed.
    pub fn commit(&self, txn: &Transaction) -> EngineResult<()> {
        self.check_open()?;
        self.check_running(txn)?;

        let prev = self.txns.last_lsn(txn.id);
        let commit = LogRecord::commit(self.lsn.next(), txn.id, prev);
        self.wal.append(&commit, true).map_err(EngineError::from)?;

        {
            let _latch = self.tree_latch.write();
            for (key, version) in self.versions.winning_versions(txn.id) {
                match version.value {
                    Some(value) => {
                        self.tree.insert(key, Some(value), version.lsn)?;
                    }
                    None => {
                        self.tree.delete(&key, version.lsn)?;
                    }
                }
            }
        }

        self.txns.mark_committed(txn.id)?;
        let horizon = self
            .txns
            .oldest_running_snapshot()
            .unwrap_or(Lsn::new(i64::MAX));
        self.versions.prune(horizon, |id| self.txns.state_of(id));
        debug!(txn = %txn.id, "commit complete");
        Ok(())
    }

    /// Aborts the transaction, discarding its versions.
    ///
    /// None of its writes reached the tree, so no page undo is needed
    /// here; a crash mid-transaction is handled by recovery instead.
    pub fn abort(&self, txn: &Transaction) -> EngineResult<()> {
        self.check_open()?;
        self.check_running(txn)?;

        let prev = self.txns.last_lsn(txn.id);
        let abort = LogRecord::abort(self.lsn.next(), txn.id, prev);
        self.wal.append(&abort, true).map_err(EngineError::from)?;

        self.versions.discard_txn(txn.id);
        self.txns.mark_aborted(txn.id)?;
        debug!(txn = %txn.id, "abort complete");
        Ok(())
    }

    /// Flushes every dirty page and appends a forced checkpoint record.
    pub fn checkpoint(&self) -> EngineResult<()> {
        self.check_open()?;

        self.pool.flush_all()?;
        self.disk.flush()?;
        let record = LogRecord::checkpoint(self.lsn.next());
        self.wal.append(&record, true).map_err(EngineError::from)?;
        info!(lsn = %record.lsn, "checkpoint complete");
        Ok(())
    }

    /// Flushes the pool and WAL, then releases both files. Idempotent.
    pub fn close(&self) -> EngineResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // Persist the allocator watermark before the final flush.
        {
            let _latch = self.tree_latch.write();
            let mut guard = self.pool.fetch(PageId::HEADER)?;
            let mut page = guard.write();
            let mut header = HeaderPage::read_from(&page)?;
            header.next_page_id = PageId::new(self.disk.num_pages() as i32);
            header.write_to(&mut page);
        }

        self.pool.flush_all()?;
        self.wal.close().map_err(EngineError::from)?;
        self.disk.close()?;
        info!("database closed");
        Ok(())
    }

    /// Returns true if the handle has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Gathers engine statistics.
    #[must_use]
    pub fn stats(&self) -> DbStats {
        let disk_stats = self.disk.stats();
        let wal_stats = self.wal.stats();
        let txn_stats = self.txns.stats();
        DbStats {
            num_pages: self.disk.num_pages(),
            disk_reads: disk_stats.reads.load(Ordering::Relaxed),
            disk_writes: disk_stats.writes.load(Ordering::Relaxed),
            pool: self.pool.stats(),
            wal_records: wal_stats.records_appended.load(Ordering::Relaxed),
            wal_bytes: wal_stats.bytes_appended.load(Ordering::Relaxed),
            wal_syncs: wal_stats.syncs.load(Ordering::Relaxed),
            wal_rotations: wal_stats.rotations.load(Ordering::Relaxed),
            txns_begun: txn_stats.begun.load(Ordering::Relaxed),
            txns_committed: txn_stats.committed.load(Ordering::Relaxed),
            txns_aborted: txn_stats.aborted.load(Ordering::Relaxed),
            version_chains: self.versions.chain_count(),
        }
    }

    fn check_open(&self) -> EngineResult<()> {
        if self.is_closed() {
            Err(EngineError::Closed {
                component: Component::Engine,
            })
        } else {
            Ok(())
        }
    }

    fn check_running(&self, txn: &Transaction) -> EngineResult<()> {
        if self.txns.is_running(txn.id) {
            Ok(())
        } else {
            Err(EngineError::TxnNotRunning { txn_id: txn.id })
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.disk.path())
            .field("closed", &self.is_closed())
            .finish()
    }
}
