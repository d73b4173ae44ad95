//! RAII pin guards for buffer pool pages.
//!
//! [`BufferPool::fetch`](super::BufferPool::fetch) returns a pinned
//! frame; the guard releases the pin on every exit path so callers can
//! never leak one. Mutation goes through [`PageGuard::write`], which
//! marks the frame dirty at the same time.

use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use basalt_common::types::PageId;

use super::frame::Frame;
use crate::page::Page;

/// A pinned page in the buffer pool.
///
/// The pin is released when the guard drops. The dirty flag is set the
/// moment mutable access is taken.
pub struct PageGuard {
    frame: Arc<Frame>,
    page_id: PageId,
}

impl PageGuard {
    pub(crate) fn new(frame: Arc<Frame>, page_id: PageId) -> Self {
        Self { frame, page_id }
    }

    /// Returns the guarded page's id.
    #[inline]
    #[must_use]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Locks the page for reading.
    #[inline]
    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.frame.page()
    }

    /// Locks the page for writing, marking the frame dirty.
    #[inline]
    pub fn write(&mut self) -> RwLockWriteGuard<'_, Page> {
        self.frame.set_dirty(true);
        self.frame.page_mut()
    }

    /// Marks the frame dirty without taking the write lock.
    #[inline]
    pub fn mark_dirty(&mut self) {
        self.frame.set_dirty(true);
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        self.frame.unpin();
    }
}

impl std::fmt::Debug for PageGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard")
            .field("page_id", &self.page_id)
            .field("frame", &self.frame.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::super::frame::FrameId;
    use super::*;

    #[test]
    fn test_guard_unpins_on_drop() {
        let frame = Arc::new(Frame::new(FrameId::new(0)));
        frame.set_page_id(PageId::new(1));
        frame.pin();

        {
            let _guard = PageGuard::new(Arc::clone(&frame), PageId::new(1));
            assert_eq!(frame.pin_count(), 1);
        }
        assert_eq!(frame.pin_count(), 0);
    }

    #[test]
    fn test_write_marks_dirty() {
        let frame = Arc::new(Frame::new(FrameId::new(0)));
        frame.set_page_id(PageId::new(1));
        frame.pin();

        let mut guard = PageGuard::new(Arc::clone(&frame), PageId::new(1));
        assert!(!frame.is_dirty());
        {
            let mut page = guard.write();
            page.payload_mut()[0] = 0xAB;
        }
        assert!(frame.is_dirty());

        drop(guard);
        assert_eq!(frame.page().payload()[0], 0xAB);
    }

    #[test]
    fn test_read_does_not_dirty() {
        let frame = Arc::new(Frame::new(FrameId::new(0)));
        frame.set_page_id(PageId::new(1));
        frame.pin();

        let guard = PageGuard::new(Arc::clone(&frame), PageId::new(1));
        let _ = guard.read();
        assert!(!frame.is_dirty());
    }
}
