//! Log corruption utilities
//!
//! Simulate the damage recovery must survive:
//!
//! - Truncation: bytes missing from the log tail (crash during append)
//! - Garbage: junk after the last record (partial write)
//! - Partial record: a plausible record header with no body

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::lsm::parse_wal_segment;
use crate::ordered::DATA_FILE_NAME;

/// What a corruption call changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptionResult {
    /// File that was modified, if any log existed
    pub file: Option<PathBuf>,
    /// Size before
    pub original_size: u64,
    /// Size after
    pub new_size: u64,
}

/// Corrupts the active log of one store directory.
pub struct LogCorruptor {
    store_dir: PathBuf,
}

impl LogCorruptor {
    /// Corruptor for the store at `store_dir`
    pub fn new(store_dir: impl AsRef<Path>) -> Self {
        LogCorruptor {
            store_dir: store_dir.as_ref().to_path_buf(),
        }
    }

    /// The log new writes go to: `data.log` for the ordered engine, the
    /// newest WAL segment for the LSM engine
    pub fn active_log(&self) -> std::io::Result<Option<PathBuf>> {
        let data = self.store_dir.join(DATA_FILE_NAME);
        if data.exists() {
            return Ok(Some(data));
        }
        let mut newest: Option<(u64, PathBuf)> = None;
        for entry in std::fs::read_dir(&self.store_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(segment) = name.to_str().and_then(parse_wal_segment) {
                if newest.as_ref().map_or(true, |(n, _)| segment > *n) {
                    newest = Some((segment, entry.path()));
                }
            }
        }
        Ok(newest.map(|(_, path)| path))
    }

    /// Remove `bytes` from the end of the active log
    pub fn truncate_tail(&self, bytes: u64) -> std::io::Result<CorruptionResult> {
        let Some(path) = self.active_log()? else {
            return Ok(CorruptionResult::untouched());
        };
        let original_size = std::fs::metadata(&path)?.len();
        let new_size = original_size.saturating_sub(bytes);
        OpenOptions::new().write(true).open(&path)?.set_len(new_size)?;
        Ok(CorruptionResult {
            file: Some(path),
            original_size,
            new_size,
        })
    }

    /// Append `garbage` to the active log
    pub fn append_garbage(&self, garbage: &[u8]) -> std::io::Result<CorruptionResult> {
        let Some(path) = self.active_log()? else {
            return Ok(CorruptionResult::untouched());
        };
        let original_size = std::fs::metadata(&path)?.len();
        let mut file = OpenOptions::new().append(true).open(&path)?;
        file.write_all(garbage)?;
        file.sync_all()?;
        Ok(CorruptionResult {
            file: Some(path),
            original_size,
            new_size: original_size + garbage.len() as u64,
        })
    }

    /// Append the first bytes of a record whose body never made it to disk
    pub fn append_partial_record(&self) -> std::io::Result<CorruptionResult> {
        let partial = [
            0x40, 0x00, 0x00, 0x00, // length prefix promising 64 bytes
            0x01, // format version
            0x09, 0x00, 0x00, 0x00, // part of the sequence number
        ];
        self.append_garbage(&partial)
    }

    /// Flip every bit of the byte `from_end` bytes before the end of the log
    pub fn flip_byte_from_end(&self, from_end: u64) -> std::io::Result<CorruptionResult> {
        let Some(path) = self.active_log()? else {
            return Ok(CorruptionResult::untouched());
        };
        let mut data = std::fs::read(&path)?;
        let size = data.len() as u64;
        if from_end == 0 || from_end > size {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "offset outside log",
            ));
        }
        let pos = (size - from_end) as usize;
        data[pos] ^= 0xFF;
        std::fs::write(&path, data)?;
        Ok(CorruptionResult {
            file: Some(path),
            original_size: size,
            new_size: size,
        })
    }
}

impl CorruptionResult {
    fn untouched() -> Self {
        CorruptionResult {
            file: None,
            original_size: 0,
            new_size: 0,
        }
    }
}
