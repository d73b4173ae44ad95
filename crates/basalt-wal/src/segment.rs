//! WAL segment file format.
//!
//! Segments are named by a 24-digit zero-padded decimal number with a
//! `.log` extension and begin with a fixed 64-byte file header:
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//!   0       4   magic (0xD1B57A61)
//!   4       4   version
//!   8       8   start_lsn (i64)
//!  16      48   zero padding (reserved)
//! ```
//!
//! After the header, the segment is a run of length-prefixed records:
//! `record_len (u32) ‖ record_bytes`.

use std::path::Path;

use bytes::{Buf, BufMut, BytesMut};

use basalt_common::constants::{WAL_FILE_HEADER_SIZE, WAL_MAGIC, WAL_VERSION};
use basalt_common::types::Lsn;

use crate::error::{WalError, WalResult};

/// The fixed header at the start of every segment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Magic number identifying a BasaltDB WAL segment.
    pub magic: u32,
    /// Segment format version.
    pub version: u32,
    /// First LSN expected in this segment.
    pub start_lsn: Lsn,
}

impl SegmentHeader {
    /// Creates a header for a new segment starting at `start_lsn`.
    #[must_use]
    pub fn new(start_lsn: Lsn) -> Self {
        Self {
            magic: WAL_MAGIC,
            version: WAL_VERSION,
            start_lsn,
        }
    }

    /// Serializes the header to its fixed 64-byte form.
    #[must_use]
    pub fn serialize(&self) -> [u8; WAL_FILE_HEADER_SIZE] {
        let mut buf = BytesMut::with_capacity(WAL_FILE_HEADER_SIZE);
        buf.put_u32(self.magic);
        buf.put_u32(self.version);
        buf.put_i64(self.start_lsn.as_i64());
        buf.resize(WAL_FILE_HEADER_SIZE, 0);

        let mut out = [0u8; WAL_FILE_HEADER_SIZE];
        out.copy_from_slice(&buf);
        out
    }

    /// Deserializes a header from the start of a segment file.
    pub fn deserialize(bytes: &[u8]) -> WalResult<Self> {
        if bytes.len() < WAL_FILE_HEADER_SIZE {
            return Err(WalError::decode(format!(
                "segment header too short: {} < {}",
                bytes.len(),
                WAL_FILE_HEADER_SIZE
            )));
        }

        let mut buf = bytes;
        let magic = buf.get_u32();
        let version = buf.get_u32();
        let start_lsn = Lsn::new(buf.get_i64());

        Ok(Self {
            magic,
            version,
            start_lsn,
        })
    }

    /// Validates magic and version against the expected constants.
    pub fn validate(&self, path: &Path) -> WalResult<()> {
        if self.magic != WAL_MAGIC {
            return Err(WalError::InvalidMagic {
                path: path.to_path_buf(),
                expected: WAL_MAGIC,
                found: self.magic,
            });
        }
        if self.version != WAL_VERSION {
            return Err(WalError::UnsupportedVersion {
                path: path.to_path_buf(),
                expected: WAL_VERSION,
                found: self.version,
            });
        }
        Ok(())
    }
}

/// Formats the file name for a segment number: `{:024}.log`.
#[must_use]
pub fn segment_file_name(segment_number: u64) -> String {
    format!("{segment_number:024}.log")
}

/// Parses a segment number back out of a segment file path.
///
/// Returns `None` for paths that are not well-formed segment names.
#[must_use]
pub fn parse_segment_number(path: &Path) -> Option<u64> {
    if path.extension()? != "log" {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.len() != 24 || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_header_roundtrip() {
        let header = SegmentHeader::new(Lsn::new(1000));
        let bytes = header.serialize();
        assert_eq!(bytes.len(), WAL_FILE_HEADER_SIZE);
        assert!(bytes[16..].iter().all(|&b| b == 0));

        let decoded = SegmentHeader::deserialize(&bytes).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_header_validation() {
        let path = PathBuf::from("000000000000000000000000.log");
        let good = SegmentHeader::new(Lsn::ZERO);
        assert!(good.validate(&path).is_ok());

        let bad_magic = SegmentHeader {
            magic: 0x1234_5678,
            ..good
        };
        assert!(matches!(
            bad_magic.validate(&path),
            Err(WalError::InvalidMagic { .. })
        ));

        let bad_version = SegmentHeader { version: 99, ..good };
        assert!(matches!(
            bad_version.validate(&path),
            Err(WalError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn test_segment_file_name() {
        assert_eq!(segment_file_name(0), "000000000000000000000000.log");
        assert_eq!(segment_file_name(42), "000000000000000000000042.log");
    }

    #[test]
    fn test_parse_segment_number() {
        assert_eq!(
            parse_segment_number(Path::new("000000000000000000000000.log")),
            Some(0)
        );
        assert_eq!(
            parse_segment_number(Path::new("/wal/000000000000000000000042.log")),
            Some(42)
        );
        assert_eq!(parse_segment_number(Path::new("notes.txt")), None);
        assert_eq!(parse_segment_number(Path::new("42.log")), None);
        assert_eq!(
            parse_segment_number(Path::new("00000000000000000000004x.log")),
            None
        );
    }
}
