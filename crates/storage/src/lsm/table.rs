//! Immutable sorted tables.
//!
//! A flushed memtable (or the result of a merge) is written as one table
//! file and memory-mapped for reads. A key index is built at open; values are
//! copied out of the map on lookup.
//!
//! # File Layout
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ Magic "ZTBL" (4) | Ver (4)   │
//! ├──────────────────────────────┤
//! │ Entry*                       │  Tag(1) KeyLen(4) Key [ValLen(4) Value]
//! ├──────────────────────────────┤
//! │ Count (8) | WalThrough (8)   │
//! │ CRC32 (4) | "ZEND" (4)       │  CRC covers header and entries
//! └──────────────────────────────┘
//! ```
//!
//! `WalThrough` is the last WAL segment whose records the table contains.
//! Recovery never replays a segment at or below it.
//!
//! Tables are written to a temporary file, fsynced, then renamed into place,
//! so a table file is either complete or absent.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use crc32fast::Hasher;
use memmap2::Mmap;

use crate::log::sync_dir;

const TABLE_MAGIC: &[u8; 4] = b"ZTBL";
const TABLE_END_MAGIC: &[u8; 4] = b"ZEND";
const TABLE_VERSION: u32 = 2;
const HEADER_SIZE: usize = 8;
const FOOTER_SIZE: usize = 24;

const ENTRY_VALUE: u8 = 0x01;
const ENTRY_TOMBSTONE: u8 = 0x02;

/// Table file name for `id`
pub fn table_file_name(id: u64) -> String {
    format!("table-{:06}.sst", id)
}

/// Parse a table id out of a file name
pub fn parse_table_id(name: &str) -> Option<u64> {
    name.strip_prefix("table-")?
        .strip_suffix(".sst")?
        .parse()
        .ok()
}

/// Writer adapter that checksums everything passing through it
struct CrcWriter<W: Write> {
    inner: W,
    hasher: Hasher,
}

impl<W: Write> Write for CrcWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Write a table atomically at `path`.
///
/// `entries` must be in strictly ascending key order. Tombstones are written
/// only when `keep_tombstones` is set. `wal_through` is the last WAL segment
/// the entries were taken from. Returns the number of entries written.
pub fn write_table<'a, I>(
    path: &Path,
    entries: I,
    keep_tombstones: bool,
    wal_through: u64,
) -> io::Result<u64>
where
    I: IntoIterator<Item = (&'a [u8], Option<&'a [u8]>)>,
{
    let tmp_path = path.with_extension("sst.tmp");
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp_path)?;

    let mut writer = CrcWriter {
        inner: BufWriter::new(file),
        hasher: Hasher::new(),
    };
    writer.write_all(TABLE_MAGIC)?;
    writer.write_u32::<LittleEndian>(TABLE_VERSION)?;

    let mut count = 0u64;
    for (key, value) in entries {
        match value {
            Some(value) => {
                writer.write_u8(ENTRY_VALUE)?;
                writer.write_u32::<LittleEndian>(key.len() as u32)?;
                writer.write_all(key)?;
                writer.write_u32::<LittleEndian>(value.len() as u32)?;
                writer.write_all(value)?;
            }
            None if keep_tombstones => {
                writer.write_u8(ENTRY_TOMBSTONE)?;
                writer.write_u32::<LittleEndian>(key.len() as u32)?;
                writer.write_all(key)?;
            }
            None => continue,
        }
        count += 1;
    }

    let CrcWriter { mut inner, hasher } = writer;
    let crc = hasher.finalize();
    inner.write_u64::<LittleEndian>(count)?;
    inner.write_u64::<LittleEndian>(wal_through)?;
    inner.write_u32::<LittleEndian>(crc)?;
    inner.write_all(TABLE_END_MAGIC)?;
    inner.flush()?;
    inner.get_ref().sync_all()?;
    drop(inner);

    std::fs::rename(&tmp_path, path)?;
    sync_dir(path);
    Ok(count)
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Value { offset: usize, len: usize },
    Tombstone,
}

/// Open, memory-mapped sorted table
pub struct SsTable {
    id: u64,
    path: PathBuf,
    wal_through: u64,
    data: Mmap,
    index: BTreeMap<Vec<u8>, Slot>,
}

impl std::fmt::Debug for SsTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsTable")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("wal_through", &self.wal_through)
            .field("entries", &self.index.len())
            .finish()
    }
}

impl SsTable {
    /// Map and validate a table file
    pub fn open(path: &Path, id: u64) -> io::Result<Self> {
        let file = File::open(path)?;
        // SAFETY: table files are never written after being renamed into
        // place. A merge may unlink a table that an older snapshot still maps;
        // on Unix the mapping stays valid until the last `Arc<SsTable>` drops.
        let data = unsafe { Mmap::map(&file)? };
        let (index, wal_through) = build_index(&data)?;
        Ok(SsTable {
            id,
            path: path.to_path_buf(),
            wal_through,
            data,
            index,
        })
    }

    /// Table id; higher ids hold newer data
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Last WAL segment folded into this table
    pub fn wal_through(&self) -> u64 {
        self.wal_through
    }

    /// File backing this table
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries, tombstones included
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True when the table holds no entries
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// `Some(Some(v))` for a value, `Some(None)` for a tombstone
    pub fn get(&self, key: &[u8]) -> Option<Option<&[u8]>> {
        self.index.get(key).map(|slot| self.resolve(*slot))
    }

    /// Entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], Option<&[u8]>)> {
        self.index
            .iter()
            .map(move |(k, slot)| (k.as_slice(), self.resolve(*slot)))
    }

    fn resolve(&self, slot: Slot) -> Option<&[u8]> {
        match slot {
            Slot::Value { offset, len } => Some(&self.data[offset..offset + len]),
            Slot::Tombstone => None,
        }
    }
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn build_index(bytes: &[u8]) -> io::Result<(BTreeMap<Vec<u8>, Slot>, u64)> {
    if bytes.len() < HEADER_SIZE + FOOTER_SIZE {
        return Err(invalid("table too small"));
    }
    if &bytes[0..4] != TABLE_MAGIC {
        return Err(invalid("bad table magic"));
    }
    let version = LittleEndian::read_u32(&bytes[4..8]);
    if version != TABLE_VERSION {
        return Err(invalid(format!("unsupported table version {}", version)));
    }

    let body_end = bytes.len() - FOOTER_SIZE;
    let footer = &bytes[body_end..];
    if &footer[20..24] != TABLE_END_MAGIC {
        return Err(invalid("bad table footer"));
    }
    let count = LittleEndian::read_u64(&footer[0..8]);
    let wal_through = LittleEndian::read_u64(&footer[8..16]);
    let stored_crc = LittleEndian::read_u32(&footer[16..20]);

    let mut hasher = Hasher::new();
    hasher.update(&bytes[..body_end]);
    if hasher.finalize() != stored_crc {
        return Err(invalid("table checksum mismatch"));
    }

    let mut index = BTreeMap::new();
    let mut cursor = HEADER_SIZE;
    while cursor < body_end {
        if cursor + 5 > body_end {
            return Err(invalid("truncated table entry"));
        }
        let tag = bytes[cursor];
        let key_len = LittleEndian::read_u32(&bytes[cursor + 1..]) as usize;
        cursor += 5;
        if cursor + key_len > body_end {
            return Err(invalid("truncated table key"));
        }
        let key = bytes[cursor..cursor + key_len].to_vec();
        cursor += key_len;

        let slot = match tag {
            ENTRY_VALUE => {
                if cursor + 4 > body_end {
                    return Err(invalid("truncated table value"));
                }
                let len = LittleEndian::read_u32(&bytes[cursor..]) as usize;
                cursor += 4;
                if cursor + len > body_end {
                    return Err(invalid("truncated table value"));
                }
                let slot = Slot::Value {
                    offset: cursor,
                    len,
                };
                cursor += len;
                slot
            }
            ENTRY_TOMBSTONE => Slot::Tombstone,
            other => return Err(invalid(format!("bad table entry tag {:#04x}", other))),
        };
        index.insert(key, slot);
    }

    if index.len() as u64 != count {
        return Err(invalid(format!(
            "table entry count mismatch: footer {}, found {}",
            count,
            index.len()
        )));
    }
    Ok((index, wal_through))
}
