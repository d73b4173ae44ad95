//! System-wide constants for BasaltDB.
//!
//! These values define the on-disk format; changing them breaks
//! compatibility with existing database files.

// =============================================================================
// Page Format
// =============================================================================

/// Size of a page in bytes. Fixed; every page I/O moves exactly this much.
pub const PAGE_SIZE: usize = 4096;

/// Size of the page header in bytes.
///
/// The header contains: page_id (4), page_kind (1), page_lsn (8),
/// reserved (3).
pub const PAGE_HEADER_SIZE: usize = 16;

/// Usable payload bytes per page, after the header.
pub const PAGE_PAYLOAD_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

/// Format version written into the header page of new database files.
pub const DB_FORMAT_VERSION: u32 = 1;

// =============================================================================
// Key and Value Limits
// =============================================================================

/// Maximum key size in bytes.
///
/// Bounded so that any single entry always fits in a fresh leaf page.
pub const MAX_KEY_SIZE: usize = 1024;

/// Maximum value size in bytes.
pub const MAX_VALUE_SIZE: usize = 2048;

// =============================================================================
// B+ Tree
// =============================================================================

/// Minimum accepted tree order (fanout).
pub const MIN_TREE_ORDER: usize = 3;

/// Default tree order when the caller does not specify one.
pub const DEFAULT_TREE_ORDER: usize = 128;

// =============================================================================
// Buffer Pool
// =============================================================================

/// Default number of buffer pool frames.
pub const DEFAULT_BUFFER_POOL_FRAMES: usize = 1000;

// =============================================================================
// Write-Ahead Log
// =============================================================================

/// Default WAL segment size (16 MiB).
pub const DEFAULT_WAL_SEGMENT_SIZE: usize = 16 * 1024 * 1024;

/// Default in-memory WAL append buffer size (1 MiB).
pub const DEFAULT_WAL_BUFFER_BYTES: usize = 1024 * 1024;

/// Upper bound on a single WAL record; replay treats larger length
/// prefixes as garbage and truncates.
pub const MAX_WAL_RECORD_SIZE: usize = 10 * 1024 * 1024;

/// Fixed size of the log record header in bytes.
///
/// Contains: lsn (8), txn_id (4), prev_lsn (8), kind (1), page_id (4),
/// old_len (4), new_len (4), checksum (4).
pub const LOG_RECORD_HEADER_SIZE: usize = 37;

/// Size of the file header at the start of every WAL segment.
pub const WAL_FILE_HEADER_SIZE: usize = 64;

/// Magic number at the start of every WAL segment file.
pub const WAL_MAGIC: u32 = 0xD1B5_7A61;

/// WAL segment format version.
pub const WAL_VERSION: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_constants() {
        assert!(PAGE_SIZE.is_power_of_two());
        assert_eq!(PAGE_HEADER_SIZE + PAGE_PAYLOAD_SIZE, PAGE_SIZE);
    }

    #[test]
    fn test_entry_fits_fresh_leaf() {
        // Leaf overhead: tag (1) + count (4) + next_leaf (4).
        // Entry overhead: key_len (4) + value_len (4).
        let worst_entry = 4 + MAX_KEY_SIZE + 4 + MAX_VALUE_SIZE;
        assert!(9 + worst_entry <= PAGE_PAYLOAD_SIZE);
    }

    #[test]
    fn test_wal_constants() {
        assert!(MAX_WAL_RECORD_SIZE < DEFAULT_WAL_SEGMENT_SIZE);
        assert!(LOG_RECORD_HEADER_SIZE < WAL_FILE_HEADER_SIZE);
    }
}
