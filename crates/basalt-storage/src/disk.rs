//! The paged disk manager.
//!
//! The database file is a sequence of 4096-byte pages; page `N` lives at
//! offset `N × 4096`. Page 0 is the header page and is created together
//! with the file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info};

use basalt_common::constants::PAGE_SIZE;
use basalt_common::error::{Component, EngineError, EngineResult};
use basalt_common::types::PageId;

use crate::page::{HeaderPage, Page};

/// Disk manager statistics.
#[derive(Debug, Default)]
pub struct DiskStats {
    /// Pages read from disk.
    pub reads: AtomicU64,
    /// Pages written to disk.
    pub writes: AtomicU64,
}

/// Low-level page I/O for a single database file.
///
/// Reads and writes are serialized by an internal mutex; allocation is a
/// lock-free counter. A handle that hit a fatal I/O error should be
/// discarded and the file reopened.
///
/// # Example
///
/// ```rust,no_run
/// use basalt_storage::disk::DiskManager;
/// use basalt_common::types::PageId;
///
/// let disk = DiskManager::open("/tmp/demo.db").unwrap();
/// let header = disk.read_page(PageId::HEADER).unwrap();
/// assert_eq!(header.page_id(), PageId::HEADER);
/// ```
pub struct DiskManager {
    path: PathBuf,
    /// None once the handle is closed.
    file: Mutex<Option<File>>,
    num_pages: AtomicU32,
    stats: DiskStats,
}

impl DiskManager {
    /// Opens or creates the database file at `path`.
    ///
    /// A new file is initialized with a single header page at offset 0.
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref().to_path_buf();
        let existed = path.exists();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| EngineError::io(Component::Disk, e))?;

        let manager = if existed {
            let len = file
                .metadata()
                .map_err(|e| EngineError::io(Component::Disk, e))?
                .len();
            let num_pages = (len / PAGE_SIZE as u64) as u32;
            info!(path = %path.display(), pages = num_pages, "opened database file");
            Self {
                path,
                file: Mutex::new(Some(file)),
                num_pages: AtomicU32::new(num_pages),
                stats: DiskStats::default(),
            }
        } else {
            let manager = Self {
                path: path.clone(),
                file: Mutex::new(Some(file)),
                num_pages: AtomicU32::new(0),
                stats: DiskStats::default(),
            };

            let mut header = Page::new();
            HeaderPage::initial().write_to(&mut header);
            manager.write_page(PageId::HEADER, &header)?;
            info!(path = %path.display(), "created database file");
            manager
        };

        Ok(manager)
    }

    /// Reads the 4096-byte image at `page_id × 4096`.
    ///
    /// Fails for ids outside `[0, num_pages)`; a partial read is an I/O
    /// error.
    pub fn read_page(&self, page_id: PageId) -> EngineResult<Page> {
        let num_pages = self.num_pages();
        if !page_id.is_valid() || page_id.as_i32() as u32 >= num_pages {
            return Err(EngineError::PageOutOfBounds { page_id, num_pages });
        }

        let mut guard = self.file.lock();
        let file = Self::file_of(&mut guard)?;

        let mut buf = [0u8; PAGE_SIZE];
        file.seek(SeekFrom::Start(page_id.file_offset()))
            .map_err(|e| EngineError::io(Component::Disk, e))?;
        let mut read = 0;
        while read < PAGE_SIZE {
            match file.read(&mut buf[read..]) {
                Ok(0) => {
                    return Err(EngineError::ShortRead {
                        page_id,
                        expected: PAGE_SIZE,
                        got: read,
                    })
                }
                Ok(n) => read += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(EngineError::io(Component::Disk, e)),
            }
        }
        drop(guard);

        self.stats.reads.fetch_add(1, Ordering::Relaxed);
        debug!(page = %page_id, "read page");
        Page::from_bytes(&buf)
    }

    /// Writes a page image at `page_id × 4096`, extending the file as
    /// needed.
    pub fn write_page(&self, page_id: PageId, page: &Page) -> EngineResult<()> {
        if !page_id.is_valid() {
            return Err(EngineError::invalid_argument(format!(
                "cannot write page {page_id}"
            )));
        }

        let mut guard = self.file.lock();
        let file = Self::file_of(&mut guard)?;

        file.seek(SeekFrom::Start(page_id.file_offset()))
            .map_err(|e| EngineError::io(Component::Disk, e))?;
        file.write_all(page.as_bytes())
            .map_err(|e| EngineError::io(Component::Disk, e))?;
        drop(guard);

        self.num_pages
            .fetch_max(page_id.as_i32() as u32 + 1, Ordering::AcqRel);
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        debug!(page = %page_id, "wrote page");
        Ok(())
    }

    /// Allocates a fresh page id (the current page count, post-incremented).
    ///
    /// The file itself is extended by the first write of the new page.
    pub fn allocate(&self) -> PageId {
        let id = self.num_pages.fetch_add(1, Ordering::AcqRel);
        debug!(page = id, "allocated page");
        PageId::new(id as i32)
    }

    /// Forces file data and metadata to stable storage.
    pub fn flush(&self) -> EngineResult<()> {
        let mut guard = self.file.lock();
        let file = Self::file_of(&mut guard)?;
        file.sync_all()
            .map_err(|e| EngineError::io(Component::Disk, e))
    }

    /// Flushes and releases the file handle. Idempotent.
    pub fn close(&self) -> EngineResult<()> {
        let mut guard = self.file.lock();
        if let Some(file) = guard.take() {
            file.sync_all()
                .map_err(|e| EngineError::io(Component::Disk, e))?;
            info!(path = %self.path.display(), "closed database file");
        }
        Ok(())
    }

    /// Current number of pages in the file.
    #[must_use]
    pub fn num_pages(&self) -> u32 {
        self.num_pages.load(Ordering::Acquire)
    }

    /// The database file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the I/O statistics.
    #[must_use]
    pub fn stats(&self) -> &DiskStats {
        &self.stats
    }

    fn file_of(guard: &mut Option<File>) -> EngineResult<&mut File> {
        guard.as_mut().ok_or(EngineError::Closed {
            component: Component::Disk,
        })
    }
}

impl std::fmt::Debug for DiskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskManager")
            .field("path", &self.path)
            .field("num_pages", &self.num_pages())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageKind;
    use basalt_common::types::Lsn;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, DiskManager) {
        let tmp = TempDir::new().unwrap();
        let disk = DiskManager::open(tmp.path().join("test.db")).unwrap();
        (tmp, disk)
    }

    #[test]
    fn test_new_file_has_header_page() {
        let (_tmp, disk) = open_temp();
        assert_eq!(disk.num_pages(), 1);

        let page = disk.read_page(PageId::HEADER).unwrap();
        assert_eq!(page.kind(), PageKind::Header);

        let header = HeaderPage::read_from(&page).unwrap();
        assert_eq!(header.root_page_id, PageId::INVALID);
    }

    #[test]
    fn test_write_read_roundtrip() {
        let (_tmp, disk) = open_temp();

        let id = disk.allocate();
        let mut page = Page::new();
        page.set_page_id(id);
        page.set_kind(PageKind::Leaf);
        page.set_page_lsn(Lsn::new(99));
        page.payload_mut()[0..4].copy_from_slice(b"data");

        disk.write_page(id, &page).unwrap();

        let read = disk.read_page(id).unwrap();
        assert_eq!(read.page_id(), id);
        assert_eq!(read.kind(), PageKind::Leaf);
        assert_eq!(read.page_lsn(), Lsn::new(99));
        assert_eq!(&read.payload()[0..4], b"data");
    }

    #[test]
    fn test_allocate_is_sequential() {
        let (_tmp, disk) = open_temp();
        assert_eq!(disk.allocate(), PageId::new(1));
        assert_eq!(disk.allocate(), PageId::new(2));
        assert_eq!(disk.num_pages(), 3);
    }

    #[test]
    fn test_read_out_of_bounds() {
        let (_tmp, disk) = open_temp();
        assert!(matches!(
            disk.read_page(PageId::new(100)),
            Err(EngineError::PageOutOfBounds { .. })
        ));
        assert!(disk.read_page(PageId::INVALID).is_err());
    }

    #[test]
    fn test_reopen_preserves_pages() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("test.db");

        let id;
        {
            let disk = DiskManager::open(&path).unwrap();
            id = disk.allocate();
            let mut page = Page::new();
            page.set_page_id(id);
            page.set_kind(PageKind::Leaf);
            disk.write_page(id, &page).unwrap();
            disk.close().unwrap();
        }

        let disk = DiskManager::open(&path).unwrap();
        assert_eq!(disk.num_pages(), 2);
        assert_eq!(disk.read_page(id).unwrap().kind(), PageKind::Leaf);
    }

    #[test]
    fn test_closed_handle_rejected() {
        let (_tmp, disk) = open_temp();
        disk.close().unwrap();
        assert!(matches!(
            disk.read_page(PageId::HEADER),
            Err(EngineError::Closed { .. })
        ));
        // Closing twice is fine.
        disk.close().unwrap();
    }

    #[test]
    fn test_write_extends_file() {
        let (_tmp, disk) = open_temp();
        let mut page = Page::new();
        page.set_page_id(PageId::new(5));
        page.set_kind(PageKind::Leaf);
        disk.write_page(PageId::new(5), &page).unwrap();
        assert_eq!(disk.num_pages(), 6);
    }
}
