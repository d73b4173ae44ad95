//! Buffer pool implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::debug;

use basalt_common::error::{EngineError, EngineResult};
use basalt_common::types::{Lsn, PageId};

use super::frame::{Frame, FrameId};
use super::guard::PageGuard;
use super::BufferPoolStats;
use crate::disk::DiskManager;
use crate::page::PageKind;

/// Durability horizon of the write-ahead log, as the buffer pool sees it.
///
/// A dirty page whose `page_lsn` is `L` must not reach disk until the WAL
/// is durable through `L`. The engine adapts its log manager to this
/// trait; the storage crate stays independent of the WAL crate.
pub trait LogFlush: Send + Sync {
    /// Highest LSN guaranteed durable.
    fn flushed_lsn(&self) -> Lsn;

    /// Forces the log until it is durable at least up to `lsn`.
    fn flush_to(&self, lsn: Lsn) -> EngineResult<()>;
}

/// Fixed-capacity page cache with LRU eviction.
///
/// The page table and eviction decisions are serialized by one mutex;
/// page images are guarded per-frame, and pins are released through
/// [`PageGuard`] drops without taking the table lock.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use basalt_storage::{BufferPool, DiskManager};
/// use basalt_common::types::PageId;
///
/// let disk = Arc::new(DiskManager::open("/tmp/demo.db").unwrap());
/// let pool = BufferPool::new(64, disk, None);
/// let guard = pool.fetch(PageId::HEADER).unwrap();
/// let kind = guard.read().kind();
/// ```
pub struct BufferPool {
    frames: Vec<Arc<Frame>>,
    /// Maps cached page ids to their frame.
    table: Mutex<HashMap<PageId, FrameId>>,
    disk: Arc<DiskManager>,
    wal: Option<Arc<dyn LogFlush>>,
    /// Base for monotonic access timestamps.
    epoch: Instant,
    fetches: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    flushes: AtomicU64,
}

impl BufferPool {
    /// Creates a pool with `capacity` frames over the given disk manager.
    ///
    /// `wal` couples dirty write-back to log durability; pass `None` only
    /// when no WAL exists (tests, offline tooling).
    #[must_use]
    pub fn new(capacity: usize, disk: Arc<DiskManager>, wal: Option<Arc<dyn LogFlush>>) -> Self {
        assert!(capacity > 0, "buffer pool needs at least one frame");
        Self {
            frames: (0..capacity)
                .map(|i| Arc::new(Frame::new(FrameId::new(i))))
                .collect(),
            table: Mutex::new(HashMap::with_capacity(capacity)),
            disk,
            wal,
            epoch: Instant::now(),
            fetches: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
        }
    }

    /// Fetches a page, pinning its frame.
    ///
    /// Cache hits return immediately; misses load the page from disk into
    /// a free or evicted frame.
    pub fn fetch(&self, page_id: PageId) -> EngineResult<PageGuard> {
        if !page_id.is_valid() {
            return Err(EngineError::invalid_argument(format!(
                "cannot fetch page {page_id}"
            )));
        }
        self.fetches.fetch_add(1, Ordering::Relaxed);

        let mut table = self.table.lock();
        if let Some(&frame_id) = table.get(&page_id) {
            let frame = &self.frames[frame_id.index()];
            frame.pin();
            frame.touch(self.now_nanos());
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(PageGuard::new(Arc::clone(frame), page_id));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let frame = self.take_frame(&mut table)?;

        let page = self.disk.read_page(page_id)?;
        *frame.page_mut() = page;
        frame.set_page_id(page_id);
        frame.set_dirty(false);
        frame.pin();
        frame.touch(self.now_nanos());
        table.insert(page_id, frame.id());

        Ok(PageGuard::new(frame, page_id))
    }

    /// Allocates a fresh page and returns it pinned and dirty.
    ///
    /// The page starts blank with its id set and the given kind.
    pub fn allocate(&self, kind: PageKind) -> EngineResult<PageGuard> {
        let page_id = self.disk.allocate();

        let mut table = self.table.lock();
        let frame = self.take_frame(&mut table)?;

        {
            let mut page = frame.page_mut();
            page.reset();
            page.set_page_id(page_id);
            page.set_kind(kind);
        }
        frame.set_page_id(page_id);
        frame.set_dirty(true);
        frame.pin();
        frame.touch(self.now_nanos());
        table.insert(page_id, frame.id());

        Ok(PageGuard::new(frame, page_id))
    }

    /// Decrements a page's pin count, ORing in the dirty flag.
    ///
    /// Guards do this automatically on drop; the explicit form exists for
    /// callers that manage pins by hand.
    pub fn unpin(&self, page_id: PageId, dirtied: bool) -> EngineResult<()> {
        let table = self.table.lock();
        let frame_id = table.get(&page_id).ok_or_else(|| {
            EngineError::invalid_argument(format!("page {page_id} is not cached"))
        })?;
        let frame = &self.frames[frame_id.index()];
        if dirtied {
            frame.set_dirty(true);
        }
        frame.unpin();
        Ok(())
    }

    /// Writes a specific dirty page back to disk.
    pub fn flush_page(&self, page_id: PageId) -> EngineResult<()> {
        let table = self.table.lock();
        if let Some(&frame_id) = table.get(&page_id) {
            let frame = &self.frames[frame_id.index()];
            if frame.is_dirty() {
                self.write_back(frame)?;
            }
        }
        Ok(())
    }

    /// Writes every dirty frame back to disk and clears its dirty flag.
    pub fn flush_all(&self) -> EngineResult<usize> {
        let _table = self.table.lock();
        let mut flushed = 0;
        for frame in &self.frames {
            if !frame.is_empty() && frame.is_dirty() {
                self.write_back(frame)?;
                flushed += 1;
            }
        }
        debug!(flushed, "flushed buffer pool");
        Ok(flushed)
    }

    /// Returns true if the page is currently cached.
    #[must_use]
    pub fn contains(&self, page_id: PageId) -> bool {
        self.table.lock().contains_key(&page_id)
    }

    /// Number of frames in the pool.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    /// The disk manager backing this pool.
    #[must_use]
    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    /// Returns point-in-time statistics.
    #[must_use]
    pub fn stats(&self) -> BufferPoolStats {
        let mut pinned = 0;
        let mut dirty = 0;
        for frame in &self.frames {
            if frame.is_pinned() {
                pinned += 1;
            }
            if frame.is_dirty() {
                dirty += 1;
            }
        }
        BufferPoolStats {
            fetches: self.fetches.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            pinned_frames: pinned,
            dirty_frames: dirty,
        }
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn now_nanos(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Finds a free frame, or evicts the LRU unpinned one. Called with
    /// the table lock held so eviction and mapping stay atomic.
    fn take_frame(&self, table: &mut HashMap<PageId, FrameId>) -> EngineResult<Arc<Frame>> {
        if let Some(frame) = self.frames.iter().find(|f| f.is_empty() && !f.is_pinned()) {
            return Ok(Arc::clone(frame));
        }

        let victim = self
            .frames
            .iter()
            .filter(|f| f.is_evictable())
            .min_by_key(|f| f.last_access_nanos())
            .ok_or(EngineError::AllFramesPinned {
                frames: self.frames.len(),
            })?;

        if victim.is_dirty() {
            self.write_back(victim)?;
        }

        table.remove(&victim.page_id());
        debug!(page = %victim.page_id(), frame = victim.id().index(), "evicted page");
        victim.reset();
        self.evictions.fetch_add(1, Ordering::Relaxed);

        Ok(Arc::clone(victim))
    }

    /// Writes a dirty frame through the disk manager, forcing the WAL
    /// first when the page's LSN is ahead of the durable horizon.
    fn write_back(&self, frame: &Arc<Frame>) -> EngineResult<()> {
        let page = frame.page();
        let page_lsn = page.page_lsn();
        if let Some(wal) = &self.wal {
            if page_lsn.is_valid() && wal.flushed_lsn() < page_lsn {
                wal.flush_to(page_lsn)?;
            }
        }

        self.disk.write_page(frame.page_id(), &page)?;
        drop(page);

        frame.set_dirty(false);
        self.flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("capacity", &self.frames.len())
            .field("cached", &self.table.lock().len())
            .finish()
    }
}
