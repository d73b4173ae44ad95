//! The log manager: buffered appends, force-on-commit, segment rotation,
//! and full replay.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use bytes::BytesMut;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use basalt_common::constants::WAL_FILE_HEADER_SIZE;
use basalt_common::types::Lsn;

use crate::config::WalConfig;
use crate::error::{WalError, WalResult};
use crate::record::LogRecord;
use crate::segment::{parse_segment_number, SegmentHeader};

/// WAL statistics.
#[derive(Debug, Default)]
pub struct WalStats {
    /// Total records appended.
    pub records_appended: AtomicU64,
    /// Total record bytes appended (including length prefixes).
    pub bytes_appended: AtomicU64,
    /// Number of fsyncs performed.
    pub syncs: AtomicU64,
    /// Number of segment rotations.
    pub rotations: AtomicU64,
}

/// State guarded by the append lock.
struct LogInner {
    /// Handle of the current (highest-numbered) segment.
    file: File,
    /// Number of the current segment.
    segment_number: u64,
    /// On-disk footprint of the current segment, header included.
    segment_offset: u64,
    /// In-memory append buffer.
    buffer: BytesMut,
    /// LSN of the most recently appended record.
    last_appended: Lsn,
    /// Whether anything was written since the last fsync.
    needs_sync: bool,
}

/// The write-ahead log manager.
///
/// Appends are serialized by one mutex; replay opens independent read
/// handles. Records arrive pre-stamped with their LSN and must be
/// appended in LSN order.
///
/// # Example
///
/// ```rust,no_run
/// use basalt_common::types::{Lsn, TxnId};
/// use basalt_wal::{LogManager, LogRecord, WalConfig};
///
/// let wal = LogManager::open(WalConfig::new("/tmp/db-wal")).unwrap();
/// let record = LogRecord::begin(Lsn::new(1), TxnId::new(1));
/// wal.append(&record, false).unwrap();
/// ```
pub struct LogManager {
    config: WalConfig,
    inner: Mutex<LogInner>,
    /// Highest LSN guaranteed durable.
    flushed_lsn: AtomicI64,
    closed: AtomicBool,
    stats: WalStats,
}

impl LogManager {
    /// Opens the log, creating the directory and the first segment if
    /// nothing exists yet. An existing highest-numbered segment is
    /// reopened for append.
    pub fn open(config: WalConfig) -> WalResult<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.dir)?;

        let existing = Self::list_segments(&config)?;
        let inner = match existing.last() {
            Some(&segment_number) => {
                let path = config.segment_path(segment_number);
                let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

                let mut header_bytes = [0u8; WAL_FILE_HEADER_SIZE];
                file.read_exact(&mut header_bytes)?;
                SegmentHeader::deserialize(&header_bytes)?.validate(&path)?;

                // Appends resume after the last good record; a corrupt or
                // half-written tail is cut off.
                let segment_offset = Self::scan_valid_end(&mut file, &config)?;
                if segment_offset < file.metadata()?.len() {
                    warn!(
                        segment = segment_number,
                        offset = segment_offset,
                        "truncating WAL segment past last good record"
                    );
                    file.set_len(segment_offset)?;
                }
                file.seek(SeekFrom::Start(segment_offset))?;
                info!(
                    segment = segment_number,
                    offset = segment_offset,
                    "reopened WAL segment"
                );
                LogInner {
                    file,
                    segment_number,
                    segment_offset,
                    buffer: BytesMut::with_capacity(config.buffer_bytes),
                    last_appended: Lsn::INVALID,
                    needs_sync: false,
                }
            }
            None => {
                let file = Self::create_segment(&config, 0, Lsn::ZERO)?;
                info!(dir = %config.dir.display(), "created WAL");
                LogInner {
                    file,
                    segment_number: 0,
                    segment_offset: WAL_FILE_HEADER_SIZE as u64,
                    buffer: BytesMut::with_capacity(config.buffer_bytes),
                    last_appended: Lsn::INVALID,
                    needs_sync: false,
                }
            }
        };

        Ok(Self {
            config,
            inner: Mutex::new(inner),
            flushed_lsn: AtomicI64::new(Lsn::INVALID.as_i64()),
            closed: AtomicBool::new(false),
            stats: WalStats::default(),
        })
    }

    /// Appends a record. With `force`, the call does not return until the
    /// record is on stable storage; commit records must be appended with
    /// `force = true`.
    ///
    /// Returns the record's LSN.
    pub fn append(&self, record: &LogRecord, force: bool) -> WalResult<Lsn> {
        self.check_closed()?;

        let bytes = record.serialize();
        if bytes.len() > self.config.max_record_size {
            return Err(WalError::RecordTooLarge {
                size: bytes.len(),
                max: self.config.max_record_size,
            });
        }
        let footprint = 4 + bytes.len() as u64;

        let mut inner = self.inner.lock();

        // Rotate before a record that would cross the segment boundary.
        if inner.segment_offset + footprint > self.config.segment_size as u64 {
            self.flush_locked(&mut inner)?;
            self.rotate_locked(&mut inner, record.lsn)?;
        }

        if inner.buffer.len() + footprint as usize > self.config.buffer_bytes {
            self.flush_locked(&mut inner)?;
        }

        if footprint as usize > self.config.buffer_bytes {
            // Oversized records bypass the buffer.
            inner.file.write_all(&(bytes.len() as u32).to_be_bytes())?;
            inner.file.write_all(&bytes)?;
        } else {
            inner.buffer.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
            inner.buffer.extend_from_slice(&bytes);
        }

        inner.segment_offset += footprint;
        inner.last_appended = record.lsn;
        inner.needs_sync = true;

        self.stats.records_appended.fetch_add(1, Ordering::Relaxed);
        self.stats.bytes_appended.fetch_add(footprint, Ordering::Relaxed);

        if force {
            self.flush_locked(&mut inner)?;
        }

        Ok(record.lsn)
    }

    /// Flushes the append buffer and forces the segment to stable storage.
    pub fn flush(&self) -> WalResult<()> {
        self.check_closed()?;
        let mut inner = self.inner.lock();
        self.flush_locked(&mut inner)
    }

    /// Forces the log until it is durable at least up to `lsn`.
    ///
    /// Used by the buffer pool to uphold the WAL-before-page rule ahead
    /// of a dirty write-back.
    pub fn flush_to(&self, lsn: Lsn) -> WalResult<()> {
        if self.flushed_lsn() >= lsn {
            return Ok(());
        }
        self.flush()
    }

    /// The highest LSN guaranteed to be on stable storage.
    #[must_use]
    pub fn flushed_lsn(&self) -> Lsn {
        Lsn::new(self.flushed_lsn.load(Ordering::Acquire))
    }

    /// Reads every record from every segment in numeric order.
    ///
    /// Replay of a segment halts at EOF, a zero or oversized length
    /// prefix, or a record whose checksum fails; records already read
    /// remain valid and the truncation point is the last good record.
    pub fn read_all(&self) -> WalResult<Vec<LogRecord>> {
        if !self.closed.load(Ordering::Acquire) {
            self.flush()?;
        }

        let mut records = Vec::new();
        for segment_number in Self::list_segments(&self.config)? {
            let path = self.config.segment_path(segment_number);
            if !self.read_segment(&path, &mut records)? {
                break;
            }
        }
        Ok(records)
    }

    /// Closes the log, flushing pending records first. Idempotent.
    pub fn close(&self) -> WalResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut inner = self.inner.lock();
        self.flush_locked(&mut inner)?;
        debug!("closed WAL");
        Ok(())
    }

    /// Returns true if the log has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns the WAL statistics.
    #[must_use]
    pub fn stats(&self) -> &WalStats {
        &self.stats
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn check_closed(&self) -> WalResult<()> {
        if self.is_closed() {
            Err(WalError::Closed)
        } else {
            Ok(())
        }
    }

    fn flush_locked(&self, inner: &mut LogInner) -> WalResult<()> {
        if inner.buffer.is_empty() && !inner.needs_sync {
            return Ok(());
        }

        if !inner.buffer.is_empty() {
            inner.file.write_all(&inner.buffer)?;
            inner.buffer.clear();
        }
        inner.file.sync_all()?;
        inner.needs_sync = false;

        self.flushed_lsn
            .store(inner.last_appended.as_i64(), Ordering::Release);
        self.stats.syncs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn rotate_locked(&self, inner: &mut LogInner, next_lsn: Lsn) -> WalResult<()> {
        inner.file.sync_all()?;

        let next_number = inner.segment_number + 1;
        inner.file = Self::create_segment(&self.config, next_number, next_lsn)?;
        inner.segment_number = next_number;
        inner.segment_offset = WAL_FILE_HEADER_SIZE as u64;

        self.stats.rotations.fetch_add(1, Ordering::Relaxed);
        debug!(segment = next_number, start_lsn = %next_lsn, "rotated WAL segment");
        Ok(())
    }

    fn create_segment(config: &WalConfig, segment_number: u64, start_lsn: Lsn) -> WalResult<File> {
        let path = config.segment_path(segment_number);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        file.write_all(&SegmentHeader::new(start_lsn).serialize())?;
        file.sync_all()?;
        Ok(file)
    }

    /// Finds the end of valid data in an open segment: the offset just
    /// past the last record that reads back clean.
    fn scan_valid_end(file: &mut File, config: &WalConfig) -> WalResult<u64> {
        let mut pos = WAL_FILE_HEADER_SIZE as u64;
        file.seek(SeekFrom::Start(pos))?;

        loop {
            let mut len_bytes = [0u8; 4];
            match file.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(pos),
                Err(e) => return Err(e.into()),
            }

            let len = u32::from_be_bytes(len_bytes) as usize;
            if len == 0 || len > config.max_record_size {
                return Ok(pos);
            }

            let mut record_bytes = vec![0u8; len];
            if file.read_exact(&mut record_bytes).is_err() {
                return Ok(pos);
            }
            if LogRecord::deserialize(&record_bytes).is_err() {
                return Ok(pos);
            }
            pos += 4 + len as u64;
        }
    }

    /// Segment numbers present in the directory, ascending.
    fn list_segments(config: &WalConfig) -> WalResult<Vec<u64>> {
        let mut numbers = Vec::new();
        if config.dir.exists() {
            for entry in std::fs::read_dir(&config.dir)? {
                if let Some(n) = parse_segment_number(&entry?.path()) {
                    numbers.push(n);
                }
            }
        }
        numbers.sort_unstable();
        Ok(numbers)
    }

    /// Reads one segment into `records`. Returns false if later segments
    /// should not be trusted (corrupt header or truncated tail).
    fn read_segment(&self, path: &std::path::Path, records: &mut Vec<LogRecord>) -> WalResult<bool> {
        let mut file = File::open(path)?;

        let mut header_bytes = [0u8; WAL_FILE_HEADER_SIZE];
        if file.read_exact(&mut header_bytes).is_err() {
            warn!(path = %path.display(), "WAL segment shorter than its header");
            return Ok(false);
        }
        if let Err(err) = SegmentHeader::deserialize(&header_bytes).and_then(|h| h.validate(path)) {
            warn!(path = %path.display(), %err, "invalid WAL segment header");
            return Ok(false);
        }

        loop {
            let mut len_bytes = [0u8; 4];
            match file.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(true),
                Err(e) => return Err(e.into()),
            }

            let len = u32::from_be_bytes(len_bytes) as usize;
            if len == 0 || len > self.config.max_record_size {
                return Ok(false);
            }

            let mut record_bytes = vec![0u8; len];
            if file.read_exact(&mut record_bytes).is_err() {
                return Ok(false);
            }

            match LogRecord::deserialize(&record_bytes) {
                Ok(record) => records.push(record),
                Err(err) if err.is_corruption() => {
                    warn!(path = %path.display(), %err, "WAL replay truncated at corrupt record");
                    return Ok(false);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl std::fmt::Debug for LogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogManager")
            .field("dir", &self.config.dir)
            .field("flushed_lsn", &self.flushed_lsn())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsn::LsnGenerator;
    use basalt_common::types::{PageId, TxnId};
    use bytes::Bytes;
    use std::path::Path;
    use tempfile::TempDir;

    fn test_config(dir: &Path) -> WalConfig {
        WalConfig::new(dir)
            .with_segment_size(64 * 1024)
            .with_buffer_bytes(4 * 1024)
            .with_max_record_size(16 * 1024)
    }

    fn insert_record(lsn: &LsnGenerator, txn: u32, payload: &[u8]) -> LogRecord {
        LogRecord::insert(
            lsn.next(),
            TxnId::new(txn),
            Lsn::INVALID,
            PageId::new(1),
            Bytes::copy_from_slice(payload),
        )
    }

    #[test]
    fn test_append_and_read_back() {
        let tmp = TempDir::new().unwrap();
        let wal = LogManager::open(test_config(tmp.path())).unwrap();
        let lsn = LsnGenerator::new();

        let r1 = insert_record(&lsn, 1, b"one");
        let r2 = insert_record(&lsn, 1, b"two");
        wal.append(&r1, false).unwrap();
        wal.append(&r2, true).unwrap();

        let records = wal.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], r1);
        assert_eq!(records[1], r2);
    }

    #[test]
    fn test_force_updates_flushed_lsn() {
        let tmp = TempDir::new().unwrap();
        let wal = LogManager::open(test_config(tmp.path())).unwrap();
        let lsn = LsnGenerator::new();

        wal.append(&insert_record(&lsn, 1, b"buffered"), false).unwrap();
        assert_eq!(wal.flushed_lsn(), Lsn::INVALID);

        let commit = LogRecord::commit(lsn.next(), TxnId::new(1), Lsn::new(1));
        wal.append(&commit, true).unwrap();
        assert_eq!(wal.flushed_lsn(), commit.lsn);
    }

    #[test]
    fn test_flush_to() {
        let tmp = TempDir::new().unwrap();
        let wal = LogManager::open(test_config(tmp.path())).unwrap();
        let lsn = LsnGenerator::new();

        let record = insert_record(&lsn, 1, b"payload");
        wal.append(&record, false).unwrap();

        wal.flush_to(record.lsn).unwrap();
        assert!(wal.flushed_lsn() >= record.lsn);
    }

    #[test]
    fn test_segment_rotation() {
        let tmp = TempDir::new().unwrap();
        let config = WalConfig::new(tmp.path())
            .with_segment_size(512)
            .with_buffer_bytes(256)
            .with_max_record_size(128);
        let wal = LogManager::open(config).unwrap();
        let lsn = LsnGenerator::new();

        let payload = vec![0xABu8; 80];
        for _ in 0..20 {
            wal.append(&insert_record(&lsn, 1, &payload), false).unwrap();
        }
        wal.flush().unwrap();

        assert!(wal.stats().rotations.load(Ordering::Relaxed) > 0);
        assert!(tmp.path().join(crate::segment::segment_file_name(1)).exists());

        let records = wal.read_all().unwrap();
        assert_eq!(records.len(), 20);
        for pair in records.windows(2) {
            assert!(pair[1].lsn > pair[0].lsn);
        }
    }

    #[test]
    fn test_reopen_resumes_appends() {
        let tmp = TempDir::new().unwrap();
        let lsn = LsnGenerator::new();

        {
            let wal = LogManager::open(test_config(tmp.path())).unwrap();
            wal.append(&insert_record(&lsn, 1, b"before"), true).unwrap();
            wal.close().unwrap();
        }

        let wal = LogManager::open(test_config(tmp.path())).unwrap();
        wal.append(&insert_record(&lsn, 2, b"after"), true).unwrap();

        let records = wal.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].new_bytes.as_deref(), Some(b"before".as_ref()));
        assert_eq!(records[1].new_bytes.as_deref(), Some(b"after".as_ref()));
    }

    #[test]
    fn test_corrupt_record_truncates_replay() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let lsn = LsnGenerator::new();

        let wal = LogManager::open(config.clone()).unwrap();
        for i in 0..5 {
            wal.append(&insert_record(&lsn, 1, &[i; 8]), false).unwrap();
        }
        wal.close().unwrap();

        // Flip a byte inside the checksum of the fourth record.
        let path = config.segment_path(0);
        let mut bytes = std::fs::read(&path).unwrap();
        let record_footprint = 4 + insert_record(&LsnGenerator::new(), 1, &[0; 8]).serialized_size();
        let target = WAL_FILE_HEADER_SIZE + 3 * record_footprint + record_footprint - 1;
        bytes[target] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let wal = LogManager::open(config).unwrap();
        let records = wal.read_all().unwrap();
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn test_appends_continue_after_truncated_replay() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let lsn = LsnGenerator::new();

        let wal = LogManager::open(config.clone()).unwrap();
        wal.append(&insert_record(&lsn, 1, b"good"), true).unwrap();
        wal.close().unwrap();

        let wal = LogManager::open(config).unwrap();
        let before = wal.read_all().unwrap().len();
        wal.append(&insert_record(&lsn, 2, b"more"), true).unwrap();
        assert_eq!(wal.read_all().unwrap().len(), before + 1);
    }

    #[test]
    fn test_record_too_large() {
        let tmp = TempDir::new().unwrap();
        let wal = LogManager::open(test_config(tmp.path())).unwrap();
        let lsn = LsnGenerator::new();

        let record = insert_record(&lsn, 1, &vec![0u8; 32 * 1024]);
        assert!(matches!(
            wal.append(&record, false),
            Err(WalError::RecordTooLarge { .. })
        ));
    }

    #[test]
    fn test_closed_rejects_appends() {
        let tmp = TempDir::new().unwrap();
        let wal = LogManager::open(test_config(tmp.path())).unwrap();
        let lsn = LsnGenerator::new();

        wal.close().unwrap();
        assert!(matches!(
            wal.append(&insert_record(&lsn, 1, b"x"), false),
            Err(WalError::Closed)
        ));
        // Closing twice is fine.
        wal.close().unwrap();
    }

    #[test]
    fn test_empty_log_reads_empty() {
        let tmp = TempDir::new().unwrap();
        let wal = LogManager::open(test_config(tmp.path())).unwrap();
        assert!(wal.read_all().unwrap().is_empty());
    }
}
