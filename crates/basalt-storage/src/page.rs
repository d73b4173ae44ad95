//! The fixed-size page container and its typed header.
//!
//! Every page is exactly 4096 bytes. The on-disk byte image is
//! authoritative; an in-memory copy that disagrees must be marked dirty
//! in its buffer frame and will eventually be written back.
//!
//! # Header Layout (16 bytes)
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//!   0       4   page_id (i32)
//!   4       1   page_kind
//!   5       8   page_lsn (i64)
//!  13       3   reserved
//! ```

use std::fmt;

use basalt_common::constants::{DB_FORMAT_VERSION, PAGE_HEADER_SIZE, PAGE_PAYLOAD_SIZE, PAGE_SIZE};
use basalt_common::error::{Component, EngineError, EngineResult};
use basalt_common::types::{Lsn, PageId};

/// Kind of a page, stored in its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PageKind {
    /// Unassigned page.
    Invalid = 0,
    /// The database header page (always page 0).
    Header = 1,
    /// B+ tree internal node.
    Internal = 2,
    /// B+ tree leaf node.
    Leaf = 3,
}

impl PageKind {
    /// Parses a kind byte; unknown values map to `Invalid`.
    #[inline]
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Header,
            2 => Self::Internal,
            3 => Self::Leaf,
            _ => Self::Invalid,
        }
    }

    /// Returns the kind byte.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for PageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => write!(f, "Invalid"),
            Self::Header => write!(f, "Header"),
            Self::Internal => write!(f, "Internal"),
            Self::Leaf => write!(f, "Leaf"),
        }
    }
}

/// A 4096-byte page image.
///
/// The struct is a plain byte container with typed accessors into the
/// header; pin counts and dirty tracking live in the buffer frame that
/// holds the page.
///
/// # Example
///
/// ```rust
/// use basalt_storage::page::{Page, PageKind};
/// use basalt_common::types::{Lsn, PageId};
///
/// let mut page = Page::new();
/// page.set_page_id(PageId::new(3));
/// page.set_kind(PageKind::Leaf);
/// page.set_page_lsn(Lsn::new(17));
/// assert_eq!(page.page_id(), PageId::new(3));
/// ```
#[derive(Clone)]
pub struct Page {
    data: Box<[u8; PAGE_SIZE]>,
}

impl Page {
    /// Creates a blank page: id −1, kind `Invalid`, LSN −1, zero payload.
    #[must_use]
    pub fn new() -> Self {
        let mut page = Self {
            data: Box::new([0u8; PAGE_SIZE]),
        };
        page.set_page_id(PageId::INVALID);
        page.set_kind(PageKind::Invalid);
        page.set_page_lsn(Lsn::INVALID);
        page
    }

    /// Reconstructs a page from a full on-disk image.
    pub fn from_bytes(bytes: &[u8]) -> EngineResult<Self> {
        if bytes.len() != PAGE_SIZE {
            return Err(EngineError::corrupted(
                Component::Disk,
                PageId::INVALID,
                format!("page image is {} bytes, expected {}", bytes.len(), PAGE_SIZE),
            ));
        }
        let mut data = Box::new([0u8; PAGE_SIZE]);
        data.copy_from_slice(bytes);
        Ok(Self { data })
    }

    /// Returns the page id from the header.
    #[inline]
    #[must_use]
    pub fn page_id(&self) -> PageId {
        let raw: [u8; 4] = self.data[0..4].try_into().unwrap();
        PageId::new(i32::from_be_bytes(raw))
    }

    /// Sets the page id in the header.
    #[inline]
    pub fn set_page_id(&mut self, page_id: PageId) {
        self.data[0..4].copy_from_slice(&page_id.as_i32().to_be_bytes());
    }

    /// Returns the page kind from the header.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> PageKind {
        PageKind::from_u8(self.data[4])
    }

    /// Sets the page kind in the header.
    #[inline]
    pub fn set_kind(&mut self, kind: PageKind) {
        self.data[4] = kind.as_u8();
    }

    /// Returns the LSN of the last logged change applied to this page.
    #[inline]
    #[must_use]
    pub fn page_lsn(&self) -> Lsn {
        let raw: [u8; 8] = self.data[5..13].try_into().unwrap();
        Lsn::new(i64::from_be_bytes(raw))
    }

    /// Stamps the page LSN.
    #[inline]
    pub fn set_page_lsn(&mut self, lsn: Lsn) {
        self.data[5..13].copy_from_slice(&lsn.as_i64().to_be_bytes());
    }

    /// Returns the payload (everything after the header).
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.data[PAGE_HEADER_SIZE..]
    }

    /// Returns the payload mutably.
    #[inline]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.data[PAGE_HEADER_SIZE..]
    }

    /// Replaces the payload with `bytes`, zero-filling the remainder.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` exceeds the payload capacity; callers bound
    /// encoded nodes by [`PAGE_PAYLOAD_SIZE`] before writing.
    pub fn write_payload(&mut self, bytes: &[u8]) {
        assert!(bytes.len() <= PAGE_PAYLOAD_SIZE, "payload overflow");
        let payload = self.payload_mut();
        payload[..bytes.len()].copy_from_slice(bytes);
        payload[bytes.len()..].fill(0);
    }

    /// Returns the full page image.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..]
    }

    /// Resets the page to the blank state: id −1, LSN −1, kind `Invalid`,
    /// zero payload.
    pub fn reset(&mut self) {
        self.data.fill(0);
        self.set_page_id(PageId::INVALID);
        self.set_kind(PageKind::Invalid);
        self.set_page_lsn(Lsn::INVALID);
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("page_id", &self.page_id())
            .field("kind", &self.kind())
            .field("page_lsn", &self.page_lsn())
            .finish()
    }
}

/// Metadata stored in the payload of page 0.
///
/// Layout: format version (u32), root page id (i32, −1 = empty tree),
/// next allocatable page id (i32).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderPage {
    /// File format version.
    pub version: u32,
    /// Root of the B+ tree, or `PageId::INVALID` when the tree is empty.
    pub root_page_id: PageId,
    /// Next page id the allocator will hand out.
    pub next_page_id: PageId,
}

impl HeaderPage {
    /// The header page contents of a freshly created database.
    #[must_use]
    pub fn initial() -> Self {
        Self {
            version: DB_FORMAT_VERSION,
            root_page_id: PageId::INVALID,
            next_page_id: PageId::new(1),
        }
    }

    /// Writes this header into a page, setting id and kind.
    pub fn write_to(&self, page: &mut Page) {
        page.set_page_id(PageId::HEADER);
        page.set_kind(PageKind::Header);
        let payload = page.payload_mut();
        payload[0..4].copy_from_slice(&self.version.to_be_bytes());
        payload[4..8].copy_from_slice(&self.root_page_id.as_i32().to_be_bytes());
        payload[8..12].copy_from_slice(&self.next_page_id.as_i32().to_be_bytes());
    }

    /// Reads the header out of page 0.
    pub fn read_from(page: &Page) -> EngineResult<Self> {
        if page.kind() != PageKind::Header {
            return Err(EngineError::corrupted(
                Component::Disk,
                page.page_id(),
                format!("expected header page, found {}", page.kind()),
            ));
        }
        let payload = page.payload();
        let version = u32::from_be_bytes(payload[0..4].try_into().unwrap());
        let root_page_id = PageId::new(i32::from_be_bytes(payload[4..8].try_into().unwrap()));
        let next_page_id = PageId::new(i32::from_be_bytes(payload[8..12].try_into().unwrap()));
        Ok(Self {
            version,
            root_page_id,
            next_page_id,
        })
    }
}
