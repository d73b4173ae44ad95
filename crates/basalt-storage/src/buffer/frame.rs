//! A buffer frame: one slot in the pool holding a page image plus its
//! runtime metadata.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use basalt_common::types::PageId;

use crate::page::Page;

/// Frame identifier - index into the pool's frame array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(usize);

impl FrameId {
    /// Creates a new frame ID.
    #[inline]
    #[must_use]
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    /// Returns the raw index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// A frame holds a single page in memory.
///
/// Pin counts, the dirty flag, and the access timestamp use atomics so
/// that guards can release pins without touching the pool's page table.
pub struct Frame {
    id: FrameId,
    /// The cached page image.
    page: RwLock<Page>,
    /// Page held by this frame; INVALID when the frame is free.
    page_id: AtomicI32,
    /// Number of active pins.
    pin_count: AtomicU32,
    /// Whether the image differs from disk.
    dirty: AtomicBool,
    /// Monotonic nanoseconds of the most recent fetch; LRU evicts the
    /// smallest.
    last_access_nanos: AtomicU64,
}

impl Frame {
    /// Creates an empty frame.
    #[must_use]
    pub fn new(id: FrameId) -> Self {
        Self {
            id,
            page: RwLock::new(Page::new()),
            page_id: AtomicI32::new(PageId::INVALID.as_i32()),
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
            last_access_nanos: AtomicU64::new(0),
        }
    }

    /// Returns the frame ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> FrameId {
        self.id
    }

    /// Returns the page id held by this frame.
    #[inline]
    #[must_use]
    pub fn page_id(&self) -> PageId {
        PageId::new(self.page_id.load(Ordering::Acquire))
    }

    /// Assigns the frame to a page.
    #[inline]
    pub fn set_page_id(&self, page_id: PageId) {
        self.page_id.store(page_id.as_i32(), Ordering::Release);
    }

    /// Returns true if no page is assigned.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.page_id().is_valid()
    }

    /// Increments the pin count.
    #[inline]
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the pin count.
    #[inline]
    pub fn unpin(&self) -> u32 {
        let old = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(old > 0, "unpinned frame with pin_count = 0");
        old - 1
    }

    /// Returns the current pin count.
    #[inline]
    #[must_use]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Returns true if the frame is pinned.
    #[inline]
    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    /// Returns the dirty flag.
    #[inline]
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Sets the dirty flag.
    #[inline]
    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    /// Records an access at the given monotonic timestamp.
    #[inline]
    pub fn touch(&self, nanos: u64) {
        self.last_access_nanos.store(nanos, Ordering::Release);
    }

    /// Returns the timestamp of the most recent access.
    #[inline]
    #[must_use]
    pub fn last_access_nanos(&self) -> u64 {
        self.last_access_nanos.load(Ordering::Acquire)
    }

    /// Locks the page image for reading.
    #[inline]
    pub fn page(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    /// Locks the page image for writing.
    #[inline]
    pub fn page_mut(&self) -> RwLockWriteGuard<'_, Page> {
        self.page.write()
    }

    /// Returns true if this frame may be evicted: unpinned and holding a
    /// page.
    #[inline]
    #[must_use]
    pub fn is_evictable(&self) -> bool {
        !self.is_pinned() && !self.is_empty()
    }

    /// Resets the frame to the free state, clearing the page image, pin
    /// count, dirty flag, and access time.
    pub fn reset(&self) {
        self.page.write().reset();
        self.page_id
            .store(PageId::INVALID.as_i32(), Ordering::Release);
        self.pin_count.store(0, Ordering::Release);
        self.dirty.store(false, Ordering::Release);
        self.last_access_nanos.store(0, Ordering::Release);
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.id)
            .field("page_id", &self.page_id())
            .field("pin_count", &self.pin_count())
            .field("dirty", &self.is_dirty())
            .field("last_access_nanos", &self.last_access_nanos())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_common::types::Lsn;

    #[test]
    fn test_new_frame_is_empty() {
        let frame = Frame::new(FrameId::new(0));
        assert!(frame.is_empty());
        assert!(!frame.is_pinned());
        assert!(!frame.is_dirty());
        assert!(!frame.is_evictable());
    }

    #[test]
    fn test_pin_unpin() {
        let frame = Frame::new(FrameId::new(0));
        assert_eq!(frame.pin(), 1);
        assert_eq!(frame.pin(), 2);
        assert_eq!(frame.unpin(), 1);
        assert_eq!(frame.unpin(), 0);
        assert!(!frame.is_pinned());
    }

    #[test]
    fn test_evictability() {
        let frame = Frame::new(FrameId::new(0));
        frame.set_page_id(PageId::new(4));
        assert!(frame.is_evictable());

        frame.pin();
        assert!(!frame.is_evictable());
        frame.unpin();
        assert!(frame.is_evictable());
    }

    #[test]
    fn test_reset() {
        let frame = Frame::new(FrameId::new(0));
        frame.set_page_id(PageId::new(4));
        frame.pin();
        frame.set_dirty(true);
        frame.touch(123);
        frame.page_mut().set_page_lsn(Lsn::new(9));

        frame.reset();
        assert!(frame.is_empty());
        assert_eq!(frame.pin_count(), 0);
        assert!(!frame.is_dirty());
        assert_eq!(frame.last_access_nanos(), 0);
        assert_eq!(frame.page().page_lsn(), Lsn::INVALID);
    }

    #[test]
    fn test_touch_ordering() {
        let frame = Frame::new(FrameId::new(0));
        frame.touch(100);
        assert_eq!(frame.last_access_nanos(), 100);
        frame.touch(200);
        assert_eq!(frame.last_access_nanos(), 200);
    }
}
