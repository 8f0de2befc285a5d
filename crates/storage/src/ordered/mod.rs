//! Ordered-log engine.
//!
//! All writes go to a single append-only `data.log`. An in-memory ordered
//! index maps each live key to the position of its latest value in the log;
//! values are read back from the file on demand. A write batch is one log
//! record, so it is atomic across a crash.
//!
//! Overwritten and deleted values stay in the log as dead bytes. When they
//! exceed `compact_ratio` of the file, closing the engine rewrites the log
//! with live entries only (write to a temporary file, fsync, rename).
//!
//! This engine has no ID sequence: [`KvEngine::id_sequence`] returns `None`.

mod batch;

pub use batch::OrderedBatch;

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};
use zinc_core::{
    DurabilityMode, EngineKind, EngineTxn, KvEngine, OrderedOptions, Result, StorageError,
};

use crate::format::{LogRecord, Mutation, ValueSpan};
use crate::lock::DirLock;
use crate::log::{read_exact_at, read_log, sync_dir, LogWriter};

/// Data file inside the store directory
pub const DATA_FILE_NAME: &str = "data.log";
const COMPACT_FILE_NAME: &str = "data.log.compact";

#[derive(Debug, Clone, Copy)]
struct ValueLoc {
    offset: u64,
    len: u32,
}

#[derive(Debug, Default)]
struct KeyIndex {
    entries: BTreeMap<Vec<u8>, ValueLoc>,
    dead_bytes: u64,
}

impl KeyIndex {
    fn put(&mut self, key: &[u8], loc: ValueLoc) {
        if let Some(old) = self.entries.insert(key.to_vec(), loc) {
            self.dead_bytes += put_size(key, old.len);
        }
    }

    fn delete(&mut self, key: &[u8]) {
        if let Some(old) = self.entries.remove(key) {
            self.dead_bytes += put_size(key, old.len);
        }
        self.dead_bytes += (1 + 4 + key.len()) as u64;
    }

    fn apply(&mut self, record_offset: u64, mutations: &[Mutation], spans: &[Option<ValueSpan>]) {
        for (mutation, span) in mutations.iter().zip(spans) {
            match (mutation, span) {
                (Mutation::Put { key, .. }, Some(span)) => self.put(
                    key,
                    ValueLoc {
                        offset: record_offset + span.offset as u64,
                        len: span.len as u32,
                    },
                ),
                (Mutation::Delete { key }, _) => self.delete(key),
                (Mutation::Put { .. }, None) => {}
            }
        }
    }
}

/// Write `chunk` as one record of a compacted log and index it
fn append_chunk(
    out: &mut LogWriter,
    out_path: &Path,
    seq: &mut u64,
    chunk: &mut Vec<Mutation>,
    rebuilt: &mut KeyIndex,
) -> Result<()> {
    if chunk.is_empty() {
        return Ok(());
    }
    let record = LogRecord::new(*seq, std::mem::take(chunk));
    let appended = out
        .append(&record)
        .map_err(|e| StorageError::io("append", out_path, e))?;
    rebuilt.apply(appended.offset, &record.mutations, &appended.spans);
    *seq += 1;
    Ok(())
}

fn put_size(key: &[u8], value_len: u32) -> u64 {
    (1 + 4 + key.len() + 4) as u64 + value_len as u64
}

struct Appender {
    log: LogWriter,
    next_seq: u64,
}

/// Counters describing the data log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderedStats {
    /// Live keys
    pub keys: usize,
    /// Size of `data.log`
    pub file_bytes: u64,
    /// Bytes belonging to overwritten or deleted entries
    pub dead_bytes: u64,
}

/// Embedded ordered-log store for one index.
pub struct OrderedEngine {
    name: String,
    path: PathBuf,
    options: OrderedOptions,
    durability: DurabilityMode,
    index: RwLock<KeyIndex>,
    writer: Mutex<Appender>,
    /// Positional reads share it; compaction swaps it
    reader: RwLock<File>,
    closed: AtomicBool,
    lock: Mutex<Option<DirLock>>,
}

impl OrderedEngine {
    /// Open (or create) the store at `path`, rebuilding the key index.
    pub fn open(
        name: &str,
        path: &Path,
        options: OrderedOptions,
        durability: DurabilityMode,
    ) -> Result<Self> {
        let open_err = |reason: String| StorageError::EngineOpen {
            index: name.to_string(),
            path: path.to_path_buf(),
            reason,
        };

        std::fs::create_dir_all(path).map_err(|e| open_err(e.to_string()))?;
        let dir_lock = DirLock::acquire(path).map_err(open_err)?;
        let _ = std::fs::remove_file(path.join(COMPACT_FILE_NAME));

        let data_path = path.join(DATA_FILE_NAME);
        let result = read_log(&data_path).map_err(|e| open_err(e.to_string()))?;

        let mut index = KeyIndex::default();
        let mut next_seq = 1u64;
        for read in &result.records {
            index.apply(read.offset, &read.record.mutations, &read.spans);
            next_seq = next_seq.max(read.record.seq + 1);
        }

        let log = LogWriter::open(&data_path, result.valid_end, durability)
            .map_err(|e| open_err(e.to_string()))?;
        let reader = File::open(&data_path).map_err(|e| open_err(e.to_string()))?;

        info!(
            target: "zinc::storage",
            index = name,
            path = %path.display(),
            keys = index.entries.len(),
            records_replayed = result.records.len(),
            "Ordered-log engine opened"
        );

        Ok(OrderedEngine {
            name: name.to_string(),
            path: path.to_path_buf(),
            options,
            durability,
            index: RwLock::new(index),
            writer: Mutex::new(Appender { log, next_seq }),
            reader: RwLock::new(reader),
            closed: AtomicBool::new(false),
            lock: Mutex::new(Some(dir_lock)),
        })
    }

    /// Name of the index this engine backs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Engine tuning
    pub fn options(&self) -> &OrderedOptions {
        &self.options
    }

    /// Current log statistics
    pub fn stats(&self) -> OrderedStats {
        let file_bytes = self.writer.lock().log.position();
        let index = self.index.read();
        OrderedStats {
            keys: index.entries.len(),
            file_bytes,
            dead_bytes: index.dead_bytes,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed {
                index: self.name.clone(),
            });
        }
        Ok(())
    }

    fn read_value(&self, key: &[u8], loc: ValueLoc) -> Result<Vec<u8>> {
        let reader = self.reader.read();
        let mut value = vec![0u8; loc.len as usize];
        read_exact_at(&reader, &mut value, loc.offset)
            .map_err(|e| StorageError::read("OrderedEngine::get", key, e))?;
        Ok(value)
    }

    /// Durably apply `mutations` as one log record.
    pub(crate) fn apply(&self, mutations: Vec<Mutation>) -> Result<()> {
        if mutations.is_empty() {
            return Ok(());
        }
        let mut writer = self.writer.lock();
        self.ensure_open()?;

        let record = LogRecord::new(writer.next_seq, mutations);
        let appended = writer
            .log
            .append(&record)
            .map_err(|e| StorageError::commit(&self.name, e))?;
        writer.next_seq += 1;

        self.index
            .write()
            .apply(appended.offset, &record.mutations, &appended.spans);
        Ok(())
    }

    fn should_compact(&self, file_bytes: u64) -> bool {
        let dead = self.index.read().dead_bytes;
        file_bytes > 0 && dead as f64 / file_bytes as f64 > self.options.compact_ratio
    }

    /// Rewrite the log with live entries only.
    pub fn compact(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        self.ensure_open()?;
        self.compact_locked(&mut writer)
    }

    fn compact_locked(&self, writer: &mut Appender) -> Result<()> {
        let data_path = self.path.join(DATA_FILE_NAME);
        let tmp_path = self.path.join(COMPACT_FILE_NAME);
        let before = writer.log.position();

        let mut index = self.index.write();
        let mut reader = self.reader.write();

        // Synced once at the end rather than per record.
        let deferred = DurabilityMode::Standard {
            interval_ms: u64::MAX,
            batch_size: usize::MAX,
        };
        let mut out = LogWriter::create(&tmp_path, deferred)
            .map_err(|e| StorageError::io("create", &tmp_path, e))?;

        let mut rebuilt = KeyIndex::default();
        let mut seq = 1u64;
        let mut chunk: Vec<Mutation> = Vec::new();
        let mut chunk_bytes = 0usize;

        for (key, loc) in index.entries.iter() {
            let mut value = vec![0u8; loc.len as usize];
            read_exact_at(&reader, &mut value, loc.offset)
                .map_err(|e| StorageError::io("read", &data_path, e))?;

            let mutation = Mutation::Put {
                key: key.clone(),
                value,
            };
            let size = mutation.encoded_len();
            if !chunk.is_empty()
                && (chunk.len() >= self.options.max_batch_entries
                    || chunk_bytes + size > self.options.max_batch_bytes)
            {
                append_chunk(&mut out, &tmp_path, &mut seq, &mut chunk, &mut rebuilt)?;
                chunk_bytes = 0;
            }
            chunk_bytes += size;
            chunk.push(mutation);
        }
        append_chunk(&mut out, &tmp_path, &mut seq, &mut chunk, &mut rebuilt)?;
        out.sync()
            .map_err(|e| StorageError::io("sync", &tmp_path, e))?;
        let after = out.position();
        drop(out);

        std::fs::rename(&tmp_path, &data_path)
            .map_err(|e| StorageError::io("rename", &data_path, e))?;
        sync_dir(&data_path);

        writer.log = LogWriter::open(&data_path, after, self.durability)
            .map_err(|e| StorageError::io("open", &data_path, e))?;
        writer.next_seq = seq;
        *reader = File::open(&data_path).map_err(|e| StorageError::io("open", &data_path, e))?;
        *index = rebuilt;

        info!(
            target: "zinc::storage",
            index = %self.name,
            bytes_before = before,
            bytes_after = after,
            keys = index.entries.len(),
            "Data log compacted"
        );
        Ok(())
    }
}

impl KvEngine for OrderedEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::OrderedLog
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.apply(vec![Mutation::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        }])
        .map_err(|e| match e {
            StorageError::Closed { .. } => e,
            other => StorageError::write("OrderedEngine::set", key, other),
        })
    }

    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let index = self.index.read();
        let loc = index
            .entries
            .get(key)
            .copied()
            .ok_or_else(|| StorageError::not_found(&self.name, key))?;
        self.read_value(key, loc)
    }

    fn get_many(&self, keys: &[&[u8]]) -> Result<HashMap<Vec<u8>, Vec<u8>>> {
        self.ensure_open()?;
        // Holding the index lock keeps writers out, so all values come from
        // the same committed state.
        let index = self.index.read();
        let mut values = HashMap::with_capacity(keys.len());
        for key in keys {
            let loc = index
                .entries
                .get(*key)
                .copied()
                .ok_or_else(|| StorageError::not_found(&self.name, key))?;
            values.insert(key.to_vec(), self.read_value(key, loc)?);
        }
        Ok(values)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.ensure_open()?;
        if !self.index.read().entries.contains_key(key) {
            return Ok(());
        }
        self.apply(vec![Mutation::Delete { key: key.to_vec() }])
            .map_err(|e| match e {
                StorageError::Closed { .. } => e,
                other => StorageError::write("OrderedEngine::delete", key, other),
            })
    }

    fn begin(&self, write: bool) -> Result<Box<dyn EngineTxn + '_>> {
        self.ensure_open()?;
        Ok(Box::new(OrderedBatch::new(self, write)))
    }

    fn close(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut writer = self.writer.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let synced = writer
            .log
            .sync_pending()
            .map_err(|e| StorageError::io("sync", writer.log.path(), e));

        let file_bytes = writer.log.position();
        if self.should_compact(file_bytes) {
            debug!(
                target: "zinc::storage",
                index = %self.name,
                file_bytes,
                "Compacting data log on close"
            );
            if let Err(e) = self.compact_locked(&mut writer) {
                warn!(
                    target: "zinc::storage",
                    index = %self.name,
                    error = %e,
                    "Compaction on close failed, log left as is"
                );
            }
        }
        drop(writer);
        self.lock.lock().take();

        info!(target: "zinc::storage", index = %self.name, "Ordered-log engine closed");
        synced
    }
}

impl Drop for OrderedEngine {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            if let Err(e) = self.writer.get_mut().log.sync_pending() {
                warn!(
                    target: "zinc::storage",
                    index = %self.name,
                    error = %e,
                    "Failed to sync data log on drop"
                );
            }
        }
    }
}
