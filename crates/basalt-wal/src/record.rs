//! Binary log record format.
//!
//! Every change to the database is described by a [`LogRecord`]. The
//! serialized form is a fixed 37-byte header interleaved with the two
//! variable-length byte strings:
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//!   0       8   lsn (i64)
//!   8       4   txn_id (u32)
//!  12       8   prev_lsn (i64, -1 = no previous record for this txn)
//!  20       1   kind
//!  21       4   page_id (i32, -1 for control records)
//!  25       4   old_len (u32)
//!  29       -   old_bytes
//!   -       4   new_len (u32)
//!   -       -   new_bytes
//!   -       4   checksum (CRC32 of every preceding byte)
//! ```
//!
//! For data records (`Insert`/`Update`/`Delete`), the old/new byte strings
//! carry a leaf-entry image (`key_len ‖ key ‖ value`); the storage crate
//! owns that encoding. A `Clr` stores the LSN of the record it undoes in
//! `old_bytes` and the restored entry image in `new_bytes`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use basalt_common::constants::LOG_RECORD_HEADER_SIZE;
use basalt_common::types::{Lsn, PageId, TxnId};

use crate::error::{WalError, WalResult};

/// Log record kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordKind {
    /// Transaction started.
    Begin = 1,
    /// Transaction committed; always force-flushed.
    Commit = 2,
    /// Transaction rolled back.
    Abort = 3,
    /// New entry added to a page.
    Insert = 4,
    /// Existing entry overwritten; carries the old and new images.
    Update = 5,
    /// Entry removed; carries the old image for undo.
    Delete = 6,
    /// Checkpoint marker.
    Checkpoint = 7,
    /// Compensation log record written during undo.
    Clr = 8,
}

impl RecordKind {
    /// Converts the kind to its tag byte.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parses a tag byte.
    pub fn from_u8(code: u8) -> WalResult<Self> {
        match code {
            1 => Ok(Self::Begin),
            2 => Ok(Self::Commit),
            3 => Ok(Self::Abort),
            4 => Ok(Self::Insert),
            5 => Ok(Self::Update),
            6 => Ok(Self::Delete),
            7 => Ok(Self::Checkpoint),
            8 => Ok(Self::Clr),
            _ => Err(WalError::UnknownRecordKind { code }),
        }
    }

    /// Returns true for the page-modifying kinds considered by Redo.
    #[inline]
    #[must_use]
    pub const fn is_data(self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete)
    }
}

/// A single write-ahead log record.
///
/// Records are immutable once built; the checksum is computed at
/// construction and verified on deserialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// LSN assigned to this record.
    pub lsn: Lsn,
    /// Transaction that produced the record.
    pub txn_id: TxnId,
    /// LSN of the previous record of the same transaction.
    pub prev_lsn: Lsn,
    /// Record kind.
    pub kind: RecordKind,
    /// Page affected, or `PageId::INVALID` for control records.
    pub page_id: PageId,
    /// Before-image, absent when the kind has none (e.g. `Insert`).
    pub old_bytes: Option<Bytes>,
    /// After-image, absent when the kind has none (e.g. `Delete`).
    pub new_bytes: Option<Bytes>,
    /// CRC32 over every preceding serialized byte.
    pub checksum: u32,
}

impl LogRecord {
    fn build(
        lsn: Lsn,
        txn_id: TxnId,
        prev_lsn: Lsn,
        kind: RecordKind,
        page_id: PageId,
        old_bytes: Option<Bytes>,
        new_bytes: Option<Bytes>,
    ) -> Self {
        let mut record = Self {
            lsn,
            txn_id,
            prev_lsn,
            kind,
            page_id,
            old_bytes,
            new_bytes,
            checksum: 0,
        };
        let mut prefix = BytesMut::with_capacity(record.serialized_size());
        record.encode_prefix(&mut prefix);
        record.checksum = crc32fast::hash(&prefix);
        record
    }

    /// Creates a `Begin` record.
    #[must_use]
    pub fn begin(lsn: Lsn, txn_id: TxnId) -> Self {
        Self::build(
            lsn,
            txn_id,
            Lsn::INVALID,
            RecordKind::Begin,
            PageId::INVALID,
            None,
            None,
        )
    }

    /// Creates a `Commit` record.
    #[must_use]
    pub fn commit(lsn: Lsn, txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self::build(
            lsn,
            txn_id,
            prev_lsn,
            RecordKind::Commit,
            PageId::INVALID,
            None,
            None,
        )
    }

    /// Creates an `Abort` record.
    #[must_use]
    pub fn abort(lsn: Lsn, txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self::build(
            lsn,
            txn_id,
            prev_lsn,
            RecordKind::Abort,
            PageId::INVALID,
            None,
            None,
        )
    }

    /// Creates an `Insert` record with the new entry image.
    #[must_use]
    pub fn insert(lsn: Lsn, txn_id: TxnId, prev_lsn: Lsn, page_id: PageId, new: Bytes) -> Self {
        Self::build(
            lsn,
            txn_id,
            prev_lsn,
            RecordKind::Insert,
            page_id,
            None,
            Some(new),
        )
    }

    /// Creates an `Update` record with the old and new entry images.
    #[must_use]
    pub fn update(
        lsn: Lsn,
        txn_id: TxnId,
        prev_lsn: Lsn,
        page_id: PageId,
        old: Bytes,
        new: Bytes,
    ) -> Self {
        Self::build(
            lsn,
            txn_id,
            prev_lsn,
            RecordKind::Update,
            page_id,
            Some(old),
            Some(new),
        )
    }

    /// Creates a `Delete` record with the old entry image.
    #[must_use]
    pub fn delete(lsn: Lsn, txn_id: TxnId, prev_lsn: Lsn, page_id: PageId, old: Bytes) -> Self {
        Self::build(
            lsn,
            txn_id,
            prev_lsn,
            RecordKind::Delete,
            page_id,
            Some(old),
            None,
        )
    }

    /// Creates a `Checkpoint` record.
    #[must_use]
    pub fn checkpoint(lsn: Lsn) -> Self {
        Self::build(
            lsn,
            TxnId::INVALID,
            Lsn::INVALID,
            RecordKind::Checkpoint,
            PageId::INVALID,
            None,
            None,
        )
    }

    /// Creates a compensation record for undoing `undone_lsn`.
    ///
    /// `restored` is the entry image the undo re-applied, if any.
    #[must_use]
    pub fn clr(
        lsn: Lsn,
        txn_id: TxnId,
        prev_lsn: Lsn,
        page_id: PageId,
        undone_lsn: Lsn,
        restored: Option<Bytes>,
    ) -> Self {
        let undone = Bytes::copy_from_slice(&undone_lsn.as_i64().to_be_bytes());
        Self::build(
            lsn,
            txn_id,
            prev_lsn,
            RecordKind::Clr,
            page_id,
            Some(undone),
            restored,
        )
    }

    /// For a `Clr`, the LSN of the record it compensates.
    #[must_use]
    pub fn undone_lsn(&self) -> Option<Lsn> {
        if self.kind != RecordKind::Clr {
            return None;
        }
        let bytes = self.old_bytes.as_ref()?;
        let raw: [u8; 8] = bytes.as_ref().try_into().ok()?;
        Some(Lsn::new(i64::from_be_bytes(raw)))
    }

    /// Serialized size in bytes, including the checksum.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        LOG_RECORD_HEADER_SIZE
            + self.old_bytes.as_ref().map_or(0, Bytes::len)
            + self.new_bytes.as_ref().map_or(0, Bytes::len)
    }

    fn encode_prefix(&self, buf: &mut BytesMut) {
        buf.put_i64(self.lsn.as_i64());
        buf.put_u32(self.txn_id.as_u32());
        buf.put_i64(self.prev_lsn.as_i64());
        buf.put_u8(self.kind.as_u8());
        buf.put_i32(self.page_id.as_i32());

        match &self.old_bytes {
            Some(old) => {
                buf.put_u32(old.len() as u32);
                buf.extend_from_slice(old);
            }
            None => buf.put_u32(0),
        }
        match &self.new_bytes {
            Some(new) => {
                buf.put_u32(new.len() as u32);
                buf.extend_from_slice(new);
            }
            None => buf.put_u32(0),
        }
    }

    /// Serializes the record, checksum last.
    #[must_use]
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.serialized_size());
        self.encode_prefix(&mut buf);
        buf.put_u32(self.checksum);
        buf.freeze()
    }

    /// Deserializes a record and verifies its checksum.
    pub fn deserialize(bytes: &[u8]) -> WalResult<Self> {
        if bytes.len() < LOG_RECORD_HEADER_SIZE {
            return Err(WalError::decode(format!(
                "record too short: {} < {}",
                bytes.len(),
                LOG_RECORD_HEADER_SIZE
            )));
        }

        let mut buf = bytes;
        let lsn = Lsn::new(buf.get_i64());
        let txn_id = TxnId::new(buf.get_u32());
        let prev_lsn = Lsn::new(buf.get_i64());
        let kind = RecordKind::from_u8(buf.get_u8())?;
        let page_id = PageId::new(buf.get_i32());

        let old_len = buf.get_u32() as usize;
        if buf.remaining() < old_len + 4 {
            return Err(WalError::decode("old value overruns record"));
        }
        let old_bytes = (old_len > 0).then(|| Bytes::copy_from_slice(&buf[..old_len]));
        buf.advance(old_len);

        let new_len = buf.get_u32() as usize;
        if buf.remaining() < new_len + 4 {
            return Err(WalError::decode("new value overruns record"));
        }
        let new_bytes = (new_len > 0).then(|| Bytes::copy_from_slice(&buf[..new_len]));
        buf.advance(new_len);

        let stored = buf.get_u32();
        if buf.has_remaining() {
            return Err(WalError::decode("trailing bytes after record"));
        }

        let computed = crc32fast::hash(&bytes[..bytes.len() - 4]);
        if stored != computed {
            return Err(WalError::checksum_mismatch(lsn, stored, computed));
        }

        Ok(Self {
            lsn,
            txn_id,
            prev_lsn,
            kind,
            page_id,
            old_bytes,
            new_bytes,
            checksum: stored,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            RecordKind::Begin,
            RecordKind::Commit,
            RecordKind::Abort,
            RecordKind::Insert,
            RecordKind::Update,
            RecordKind::Delete,
            RecordKind::Checkpoint,
            RecordKind::Clr,
        ] {
            assert_eq!(RecordKind::from_u8(kind.as_u8()).unwrap(), kind);
        }
        assert!(RecordKind::from_u8(0).is_err());
        assert!(RecordKind::from_u8(255).is_err());
    }

    #[test]
    fn test_begin_roundtrip() {
        let record = LogRecord::begin(Lsn::new(1), TxnId::new(7));
        let bytes = record.serialize();
        assert_eq!(bytes.len(), LOG_RECORD_HEADER_SIZE);

        let decoded = LogRecord::deserialize(&bytes).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.prev_lsn, Lsn::INVALID);
        assert_eq!(decoded.page_id, PageId::INVALID);
    }

    #[test]
    fn test_update_roundtrip() {
        let record = LogRecord::update(
            Lsn::new(42),
            TxnId::new(3),
            Lsn::new(40),
            PageId::new(7),
            Bytes::from_static(b"old entry"),
            Bytes::from_static(b"new entry"),
        );

        let bytes = record.serialize();
        let decoded = LogRecord::deserialize(&bytes).unwrap();

        assert_eq!(decoded, record);
        assert_eq!(decoded.old_bytes.as_deref(), Some(b"old entry".as_ref()));
        assert_eq!(decoded.new_bytes.as_deref(), Some(b"new entry".as_ref()));
        assert_eq!(decoded.checksum, record.checksum);
    }

    #[test]
    fn test_insert_has_no_old_image() {
        let record = LogRecord::insert(
            Lsn::new(5),
            TxnId::new(1),
            Lsn::new(4),
            PageId::new(2),
            Bytes::from_static(b"v"),
        );
        assert!(record.old_bytes.is_none());
        assert!(record.kind.is_data());
    }

    #[test]
    fn test_clr_undone_lsn() {
        let record = LogRecord::clr(
            Lsn::new(9),
            TxnId::new(2),
            Lsn::new(8),
            PageId::new(4),
            Lsn::new(5),
            Some(Bytes::from_static(b"restored")),
        );
        assert_eq!(record.undone_lsn(), Some(Lsn::new(5)));

        let other = LogRecord::begin(Lsn::new(1), TxnId::new(1));
        assert_eq!(other.undone_lsn(), None);
    }

    #[test]
    fn test_corrupt_checksum_detected() {
        let record = LogRecord::insert(
            Lsn::new(10),
            TxnId::new(1),
            Lsn::INVALID,
            PageId::new(1),
            Bytes::from_static(b"payload"),
        );
        let mut bytes = record.serialize().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        match LogRecord::deserialize(&bytes) {
            Err(WalError::ChecksumMismatch { lsn, .. }) => assert_eq!(lsn, Lsn::new(10)),
            other => panic!("expected checksum mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_corrupt_payload_detected() {
        let record = LogRecord::insert(
            Lsn::new(11),
            TxnId::new(1),
            Lsn::INVALID,
            PageId::new(1),
            Bytes::from_static(b"payload"),
        );
        let mut bytes = record.serialize().to_vec();
        bytes[30] ^= 0x01;
        assert!(LogRecord::deserialize(&bytes).is_err());
    }

    #[test]
    fn test_truncated_record_rejected() {
        let record = LogRecord::commit(Lsn::new(3), TxnId::new(1), Lsn::new(2));
        let bytes = record.serialize();
        assert!(LogRecord::deserialize(&bytes[..bytes.len() - 1]).is_err());
        assert!(LogRecord::deserialize(&bytes[..10]).is_err());
    }
}
