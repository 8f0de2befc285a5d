//! Append-only record log.
//!
//! [`LogWriter`] appends [`LogRecord`]s and fsyncs according to the
//! configured [`DurabilityMode`]. [`read_log`] replays a log file, stopping at
//! the first record that is torn or fails its checksum; [`LogReadResult::valid_end`]
//! tells the caller where to truncate before appending again.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::warn;
use zinc_core::DurabilityMode;

use crate::format::{LogRecord, RecordError, ValueSpan};

/// Cumulative log operation counters.
///
/// Never reset over the lifetime of the writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogCounters {
    /// Records appended
    pub appends: u64,
    /// fsync calls issued
    pub sync_calls: u64,
    /// Bytes written
    pub bytes_written: u64,
}

/// Where an appended record landed in the file
#[derive(Debug, Clone)]
pub struct AppendedRecord {
    /// File offset of the first record byte
    pub offset: u64,
    /// Encoded record length
    pub len: u64,
    /// Per-mutation value spans, relative to `offset`
    pub spans: Vec<Option<ValueSpan>>,
}

/// Append-only writer over one log file.
pub struct LogWriter {
    file: File,
    path: PathBuf,
    position: u64,
    durability: DurabilityMode,
    writes_since_sync: usize,
    last_sync_time: Instant,
    counters: LogCounters,
}

impl LogWriter {
    /// Open `path` for appending, creating it if missing.
    ///
    /// Any bytes past `valid_end` (a torn tail found by [`read_log`]) are
    /// truncated first.
    pub fn open(path: &Path, valid_end: u64, durability: DurabilityMode) -> std::io::Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        let len = file.metadata()?.len();
        if len > valid_end {
            warn!(
                target: "zinc::storage",
                path = %path.display(),
                truncated_bytes = len - valid_end,
                "Truncating unreadable log tail"
            );
            file.set_len(valid_end)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::Start(valid_end))?;

        Ok(LogWriter {
            file,
            path: path.to_path_buf(),
            position: valid_end,
            durability,
            writes_since_sync: 0,
            last_sync_time: Instant::now(),
            counters: LogCounters::default(),
        })
    }

    /// Create a fresh, empty log at `path` (truncating anything there)
    pub fn create(path: &Path, durability: DurabilityMode) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(LogWriter {
            file,
            path: path.to_path_buf(),
            position: 0,
            durability,
            writes_since_sync: 0,
            last_sync_time: Instant::now(),
            counters: LogCounters::default(),
        })
    }

    /// Append a record, syncing if the durability mode says so
    pub fn append(&mut self, record: &LogRecord) -> std::io::Result<AppendedRecord> {
        let appended = self.write_record(record)?;
        if let Err(e) = self.maybe_sync() {
            self.rollback(appended.offset);
            return Err(e);
        }
        Ok(appended)
    }

    /// Append a record and fsync before returning, whatever the mode
    pub fn append_synced(&mut self, record: &LogRecord) -> std::io::Result<AppendedRecord> {
        let appended = self.write_record(record)?;
        if let Err(e) = self.sync() {
            self.rollback(appended.offset);
            return Err(e);
        }
        Ok(appended)
    }

    /// Cut the file back to `offset` after a failed append, so a record the
    /// caller saw fail is never replayed.
    fn rollback(&mut self, offset: u64) {
        let _ = self.file.set_len(offset);
        let _ = self.file.seek(SeekFrom::Start(offset));
        self.position = offset;
    }

    fn write_record(&mut self, record: &LogRecord) -> std::io::Result<AppendedRecord> {
        let (bytes, spans) = record.encode();
        let offset = self.position;
        if let Err(e) = self.file.write_all(&bytes) {
            self.rollback(offset);
            return Err(e);
        }

        self.position += bytes.len() as u64;
        self.writes_since_sync += 1;
        self.counters.appends += 1;
        self.counters.bytes_written += bytes.len() as u64;

        Ok(AppendedRecord {
            offset,
            len: bytes.len() as u64,
            spans,
        })
    }

    fn maybe_sync(&mut self) -> std::io::Result<()> {
        if self
            .durability
            .sync_due(self.writes_since_sync, self.last_sync_time.elapsed())
        {
            self.sync()?;
        }
        Ok(())
    }

    /// fsync unconditionally
    pub fn sync(&mut self) -> std::io::Result<()> {
        self.file.sync_data()?;
        self.counters.sync_calls += 1;
        self.writes_since_sync = 0;
        self.last_sync_time = Instant::now();
        Ok(())
    }

    /// fsync if anything was written since the last sync
    pub fn sync_pending(&mut self) -> std::io::Result<()> {
        if self.writes_since_sync > 0 {
            self.sync()?;
        }
        Ok(())
    }

    /// Bytes in the file
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of cumulative counters
    pub fn counters(&self) -> LogCounters {
        self.counters
    }
}

/// Best-effort fsync of the directory holding `path`
pub(crate) fn sync_dir(path: &Path) {
    if let Some(dir) = path.parent() {
        if let Ok(handle) = File::open(dir) {
            let _ = handle.sync_all();
        }
    }
}

/// Fill `buf` from `file` at `offset` without moving a shared cursor
#[cfg(unix)]
pub(crate) fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

/// Fill `buf` from `file` at `offset` without moving a shared cursor
#[cfg(windows)]
pub(crate) fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::std::io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ))
            }
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == std::std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// A record recovered from a log, with its location.
#[derive(Debug, Clone)]
pub struct ReadRecord {
    /// The record
    pub record: LogRecord,
    /// File offset of the first record byte
    pub offset: u64,
    /// Encoded length
    pub len: u64,
    /// Per-mutation value spans, relative to `offset`
    pub spans: Vec<Option<ValueSpan>>,
}

/// Why replay stopped before the end of the file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Last record was cut short (crash during append)
    TornTail,
    /// A record failed validation
    Corrupt(RecordError),
}

/// Result of replaying one log file
#[derive(Debug, Default)]
pub struct LogReadResult {
    /// Valid records in file order
    pub records: Vec<ReadRecord>,
    /// Offset just past the last valid record
    pub valid_end: u64,
    /// File length on disk
    pub file_len: u64,
    /// Set when replay stopped early
    pub stopped: Option<StopReason>,
}

impl LogReadResult {
    /// Bytes after the last valid record
    pub fn bytes_to_truncate(&self) -> u64 {
        self.file_len.saturating_sub(self.valid_end)
    }
}

/// Replay every valid record in `path`.
///
/// A missing file reads as empty. Replay stops at the first torn or corrupt
/// record; nothing after it is returned.
pub fn read_log(path: &Path) -> std::io::Result<LogReadResult> {
    let mut bytes = Vec::new();
    match File::open(path) {
        Ok(mut file) => {
            file.read_to_end(&mut bytes)?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(LogReadResult::default());
        }
        Err(e) => return Err(e),
    }

    let mut result = LogReadResult {
        file_len: bytes.len() as u64,
        ..LogReadResult::default()
    };

    let mut offset = 0usize;
    while offset < bytes.len() {
        match LogRecord::decode(&bytes[offset..]) {
            Ok((record, spans, consumed)) => {
                result.records.push(ReadRecord {
                    record,
                    offset: offset as u64,
                    len: consumed as u64,
                    spans,
                });
                offset += consumed;
            }
            Err(RecordError::InsufficientData) => {
                result.stopped = Some(StopReason::TornTail);
                break;
            }
            Err(e) => {
                warn!(
                    target: "zinc::storage",
                    path = %path.display(),
                    offset,
                    error = %e,
                    "Log record failed validation, discarding remainder"
                );
                result.stopped = Some(StopReason::Corrupt(e));
                break;
            }
        }
    }

    result.valid_end = offset as u64;
    Ok(result)
}
