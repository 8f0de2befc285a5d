//! Transactional LSM engine.
//!
//! Layout of a store directory:
//!
//! ```text
//! <index>/
//! ├── LOCK
//! ├── wal-000003.log      active write-ahead log segment
//! ├── table-000001.sst    sorted tables, higher id = newer
//! └── table-000002.sst
//! ```
//!
//! Commits are serialized: each writeset is appended to the WAL as one
//! checksummed record, then applied to the memtable. When the memtable grows
//! past `memtable_bytes` it is written out as a sorted table and a fresh WAL
//! segment is started. When the table count exceeds `max_tables`, all tables
//! are merged into one and tombstones are dropped.
//!
//! Readers take a snapshot (memtable + table list, both behind `Arc`), so a
//! read transaction or a `get_many` sees one consistent state while commits
//! continue. The memtable is copy-on-write: a commit clones it only if a
//! snapshot is still holding the previous version.
//!
//! The engine also owns the index's ID sequence; its lease bound is stored
//! under [`SEQUENCE_KEY`] and written with a forced fsync.

mod memtable;
mod table;
mod txn;

pub use memtable::MemTable;
pub use table::{parse_table_id, table_file_name, write_table, SsTable};
pub use txn::LsmTxn;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};
use zinc_core::{
    DurabilityMode, EngineKind, EngineTxn, IdSequence, KvEngine, LsmOptions, Result,
    StorageError, SEQUENCE_KEY,
};

use crate::format::{LogRecord, Mutation};
use crate::lock::DirLock;
use crate::log::{read_log, LogWriter};
use crate::sequence::{decode_bound, encode_bound, LeasedSequence};

/// WAL segment file name for `segment`
pub fn wal_file_name(segment: u64) -> String {
    format!("wal-{:06}.log", segment)
}

/// Parse a WAL segment number out of a file name
pub fn parse_wal_segment(name: &str) -> Option<u64> {
    name.strip_prefix("wal-")?
        .strip_suffix(".log")?
        .parse()
        .ok()
}

/// Point-in-time view of the engine's data.
#[derive(Debug, Clone, Default)]
pub struct LsmSnapshot {
    memtable: Arc<MemTable>,
    /// Oldest first
    tables: Arc<Vec<Arc<SsTable>>>,
}

impl LsmSnapshot {
    /// Newest committed value of `key` in this view
    pub fn lookup(&self, key: &[u8]) -> Option<Vec<u8>> {
        if let Some(value) = self.memtable.get(key) {
            return value.map(<[u8]>::to_vec);
        }
        for table in self.tables.iter().rev() {
            if let Some(value) = table.get(key) {
                return value.map(<[u8]>::to_vec);
            }
        }
        None
    }
}

/// Commit-side state, guarded by one mutex
struct CommitLog {
    wal: LogWriter,
    segment: u64,
    next_seq: u64,
    next_table_id: u64,
}

/// Counters describing the engine's on-disk shape
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LsmStats {
    /// Keys in the memtable, tombstones included
    pub memtable_entries: usize,
    /// Approximate memtable size
    pub memtable_bytes: usize,
    /// Number of sorted tables
    pub tables: usize,
    /// Active WAL segment number
    pub wal_segment: u64,
}

/// Embedded LSM store for one index.
pub struct LsmEngine {
    name: String,
    path: PathBuf,
    options: LsmOptions,
    durability: DurabilityMode,
    state: RwLock<LsmSnapshot>,
    log: Mutex<CommitLog>,
    sequence: LeasedSequence,
    closed: AtomicBool,
    lock: Mutex<Option<DirLock>>,
}

impl LsmEngine {
    /// Open (or create) the store at `path`, replaying its WAL.
    pub fn open(
        name: &str,
        path: &Path,
        options: LsmOptions,
        durability: DurabilityMode,
        id_lease_size: u64,
    ) -> Result<Self> {
        let open_err = |reason: String| StorageError::EngineOpen {
            index: name.to_string(),
            path: path.to_path_buf(),
            reason,
        };

        std::fs::create_dir_all(path).map_err(|e| open_err(e.to_string()))?;
        let dir_lock = DirLock::acquire(path).map_err(open_err)?;

        let mut segments = Vec::new();
        let mut table_ids = Vec::new();
        let entries = std::fs::read_dir(path).map_err(|e| open_err(e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| open_err(e.to_string()))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some(segment) = parse_wal_segment(file_name) {
                segments.push(segment);
            } else if let Some(id) = parse_table_id(file_name) {
                table_ids.push(id);
            } else if file_name.ends_with(".tmp") {
                // Interrupted flush or merge
                let _ = std::fs::remove_file(entry.path());
            }
        }
        segments.sort_unstable();
        table_ids.sort_unstable();

        let mut tables = Vec::with_capacity(table_ids.len());
        for id in &table_ids {
            let table_path = path.join(table_file_name(*id));
            let table = SsTable::open(&table_path, *id)
                .map_err(|e| StorageError::corruption(&table_path, e))?;
            tables.push(Arc::new(table));
        }

        // Segments already folded into a table are left over from a failed
        // cleanup; replaying them would shadow newer table data.
        let flushed_through = tables.iter().map(|t| t.wal_through()).max().unwrap_or(0);
        segments.retain(|&segment| {
            if segment > flushed_through {
                return true;
            }
            let stale = path.join(wal_file_name(segment));
            warn!(
                target: "zinc::storage",
                index = name,
                segment,
                flushed_through,
                "Skipping WAL segment already flushed to a table"
            );
            if let Err(e) = std::fs::remove_file(&stale) {
                warn!(
                    target: "zinc::storage",
                    index = name,
                    segment,
                    error = %e,
                    "Failed to remove obsolete WAL segment"
                );
            }
            false
        });

        let mut memtable = MemTable::new();
        let mut next_seq = 1u64;
        let mut replayed = 0usize;
        let mut last_valid_end = 0u64;
        for (i, segment) in segments.iter().enumerate() {
            let wal_path = path.join(wal_file_name(*segment));
            let result = read_log(&wal_path).map_err(|e| open_err(e.to_string()))?;
            if result.stopped.is_some() && i + 1 < segments.len() {
                warn!(
                    target: "zinc::storage",
                    index = name,
                    segment,
                    discarded_bytes = result.bytes_to_truncate(),
                    "Sealed WAL segment has an unreadable tail"
                );
            }
            for read in &result.records {
                memtable.apply(&read.record.mutations);
                next_seq = next_seq.max(read.record.seq + 1);
                replayed += 1;
            }
            last_valid_end = result.valid_end;
        }

        let (wal, segment) = match segments.last() {
            Some(&segment) => {
                let wal_path = path.join(wal_file_name(segment));
                let wal = LogWriter::open(&wal_path, last_valid_end, durability)
                    .map_err(|e| open_err(e.to_string()))?;
                (wal, segment)
            }
            None => {
                let segment = flushed_through + 1;
                let wal = LogWriter::create(&path.join(wal_file_name(segment)), durability)
                    .map_err(|e| open_err(e.to_string()))?;
                (wal, segment)
            }
        };

        let snapshot = LsmSnapshot {
            memtable: Arc::new(memtable),
            tables: Arc::new(tables),
        };
        let persisted = snapshot.lookup(SEQUENCE_KEY).and_then(|b| decode_bound(&b));

        info!(
            target: "zinc::storage",
            index = name,
            path = %path.display(),
            tables = table_ids.len(),
            wal_segments = segments.len(),
            records_replayed = replayed,
            "LSM engine opened"
        );

        Ok(LsmEngine {
            name: name.to_string(),
            path: path.to_path_buf(),
            options,
            durability,
            state: RwLock::new(snapshot),
            log: Mutex::new(CommitLog {
                wal,
                segment,
                next_seq,
                next_table_id: table_ids.last().map_or(1, |id| id + 1),
            }),
            sequence: LeasedSequence::new(name, persisted, id_lease_size),
            closed: AtomicBool::new(false),
            lock: Mutex::new(Some(dir_lock)),
        })
    }

    /// Name of the index this engine backs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Engine tuning
    pub fn options(&self) -> &LsmOptions {
        &self.options
    }

    /// Consistent view of committed data
    pub fn snapshot(&self) -> LsmSnapshot {
        self.state.read().clone()
    }

    /// Current shape of the engine
    pub fn stats(&self) -> LsmStats {
        let segment = self.log.lock().segment;
        let state = self.state.read();
        LsmStats {
            memtable_entries: state.memtable.len(),
            memtable_bytes: state.memtable.bytes(),
            tables: state.tables.len(),
            wal_segment: segment,
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

    /// Durably apply `mutations` as one atomic unit.
    ///
    /// With `force_sync` the WAL record is fsynced regardless of the
    /// durability mode.
    pub(crate) fn apply(&self, mutations: Vec<Mutation>, force_sync: bool) -> Result<()> {
        if mutations.is_empty() {
            return Ok(());
        }
        let mut log = self.log.lock();
        self.ensure_open()?;

        let record = LogRecord::new(log.next_seq, mutations);
        let appended = if force_sync {
            log.wal.append_synced(&record)
        } else {
            log.wal.append(&record)
        };
        appended.map_err(|e| StorageError::commit(&self.name, e))?;
        log.next_seq += 1;

        let memtable_bytes = {
            let mut state = self.state.write();
            let memtable = Arc::make_mut(&mut state.memtable);
            memtable.apply(&record.mutations);
            memtable.bytes()
        };

        if memtable_bytes >= self.options.memtable_bytes {
            // The commit is already durable in the WAL; a failed flush is
            // retried on the next commit.
            if let Err(e) = self.flush_locked(&mut log) {
                warn!(
                    target: "zinc::storage",
                    index = %self.name,
                    error = %e,
                    "Memtable flush failed"
                );
            }
        }
        Ok(())
    }

    /// Write the memtable out as a sorted table now.
    pub fn flush(&self) -> Result<()> {
        let mut log = self.log.lock();
        self.ensure_open()?;
        self.flush_locked(&mut log)
    }

    fn flush_locked(&self, log: &mut CommitLog) -> Result<()> {
        let (memtable, has_tables) = {
            let state = self.state.read();
            (Arc::clone(&state.memtable), !state.tables.is_empty())
        };
        if memtable.is_empty() {
            return Ok(());
        }

        let id = log.next_table_id;
        let table_path = self.path.join(table_file_name(id));
        // With no older table there is nothing for a tombstone to shadow.
        let written = write_table(&table_path, memtable.iter(), has_tables, log.segment)
            .map_err(|e| StorageError::io("write table", &table_path, e))?;
        let table = SsTable::open(&table_path, id)
            .map_err(|e| StorageError::corruption(&table_path, e))?;
        log.next_table_id += 1;

        let new_segment = log.segment + 1;
        let wal_path = self.path.join(wal_file_name(new_segment));
        let wal = LogWriter::create(&wal_path, self.durability)
            .map_err(|e| StorageError::io("create wal", &wal_path, e))?;

        let table_count = {
            let mut state = self.state.write();
            let mut tables = state.tables.as_ref().clone();
            tables.push(Arc::new(table));
            state.tables = Arc::new(tables);
            state.memtable = Arc::new(MemTable::new());
            state.tables.len()
        };

        let old_segment = log.segment;
        log.wal = wal;
        log.segment = new_segment;
        self.remove_wal_segments_through(old_segment);

        debug!(
            target: "zinc::storage",
            index = %self.name,
            table_id = id,
            entries = written,
            tables = table_count,
            "Memtable flushed"
        );

        if table_count > self.options.max_tables {
            self.merge_locked(log)?;
        }
        Ok(())
    }

    fn remove_wal_segments_through(&self, last: u64) {
        let Ok(entries) = std::fs::read_dir(&self.path) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            if let Some(segment) = name.to_str().and_then(parse_wal_segment) {
                if segment <= last {
                    if let Err(e) = std::fs::remove_file(entry.path()) {
                        warn!(
                            target: "zinc::storage",
                            index = %self.name,
                            segment,
                            error = %e,
                            "Failed to remove obsolete WAL segment"
                        );
                    }
                }
            }
        }
    }

    /// Merge all tables into one, dropping tombstones.
    pub fn merge(&self) -> Result<()> {
        let mut log = self.log.lock();
        self.ensure_open()?;
        self.merge_locked(&mut log)
    }

    fn merge_locked(&self, log: &mut CommitLog) -> Result<()> {
        let tables = Arc::clone(&self.state.read().tables);
        if tables.len() < 2 {
            return Ok(());
        }

        let mut merged: BTreeMap<&[u8], Option<&[u8]>> = BTreeMap::new();
        for table in tables.iter().rev() {
            for (key, value) in table.iter() {
                merged.entry(key).or_insert(value);
            }
        }

        let wal_through = tables.iter().map(|t| t.wal_through()).max().unwrap_or(0);
        let id = log.next_table_id;
        let table_path = self.path.join(table_file_name(id));
        let written = write_table(&table_path, merged, false, wal_through)
            .map_err(|e| StorageError::io("write table", &table_path, e))?;
        let table = SsTable::open(&table_path, id)
            .map_err(|e| StorageError::corruption(&table_path, e))?;
        log.next_table_id += 1;

        self.state.write().tables = Arc::new(vec![Arc::new(table)]);

        // Oldest first: a surviving newer table still shadows anything an
        // interrupted cleanup leaves behind.
        for old in tables.iter() {
            if let Err(e) = std::fs::remove_file(old.path()) {
                warn!(
                    target: "zinc::storage",
                    index = %self.name,
                    table_id = old.id(),
                    error = %e,
                    "Failed to remove merged table"
                );
            }
        }

        info!(
            target: "zinc::storage",
            index = %self.name,
            merged_tables = tables.len(),
            entries = written,
            "Tables merged"
        );
        Ok(())
    }

    fn persist_bound(&self, bound: u64) -> Result<()> {
        self.apply(
            vec![Mutation::Put {
                key: SEQUENCE_KEY.to_vec(),
                value: encode_bound(bound).to_vec(),
            }],
            true,
        )
    }

    /// Current `(next, bound)` of the ID lease
    pub fn sequence_state(&self) -> (u64, u64) {
        self.sequence.state()
    }
}

fn rewrap(op: &'static str, key: &[u8], err: StorageError, write: bool) -> StorageError {
    match err {
        StorageError::Closed { .. } => err,
        other if write => StorageError::write(op, key, other),
        other => StorageError::read(op, key, other),
    }
}

impl KvEngine for LsmEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Lsm
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.apply(
            vec![Mutation::Put {
                key: key.to_vec(),
                value: value.to_vec(),
            }],
            false,
        )
        .map_err(|e| rewrap("LsmEngine::set", key, e, true))
    }

    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.ensure_open()?;
        self.snapshot()
            .lookup(key)
            .ok_or_else(|| StorageError::not_found(&self.name, key))
    }

    fn get_many(&self, keys: &[&[u8]]) -> Result<HashMap<Vec<u8>, Vec<u8>>> {
        self.ensure_open()?;
        let snapshot = self.snapshot();
        let mut values = HashMap::with_capacity(keys.len());
        for key in keys {
            let value = snapshot
                .lookup(key)
                .ok_or_else(|| StorageError::not_found(&self.name, key))?;
            values.insert(key.to_vec(), value);
        }
        Ok(values)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.apply(vec![Mutation::Delete { key: key.to_vec() }], false)
            .map_err(|e| rewrap("LsmEngine::delete", key, e, true))
    }

    fn begin(&self, write: bool) -> Result<Box<dyn EngineTxn + '_>> {
        self.ensure_open()?;
        Ok(Box::new(LsmTxn::new(self, self.snapshot(), write)))
    }

    fn id_sequence(&self) -> Option<&dyn IdSequence> {
        Some(self)
    }

    fn close(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        let released = self.sequence.release(|bound| self.persist_bound(bound));

        let mut log = self.log.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let synced = log
            .wal
            .sync_pending()
            .map_err(|e| StorageError::io("sync wal", log.wal.path(), e));
        drop(log);
        self.lock.lock().take();

        info!(target: "zinc::storage", index = %self.name, "LSM engine closed");
        released.and(synced)
    }
}

impl IdSequence for LsmEngine {
    fn next_id(&self) -> Result<u64> {
        self.ensure_open()?;
        self.sequence.next(|bound| self.persist_bound(bound))
    }

    fn release(&self) -> Result<()> {
        self.ensure_open()?;
        self.sequence.release(|bound| self.persist_bound(bound))
    }
}

impl Drop for LsmEngine {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            // Not closed: flush what we can but leave the ID lease alone, as
            // after a crash.
            if let Err(e) = self.log.get_mut().wal.sync_pending() {
                warn!(
                    target: "zinc::storage",
                    index = %self.name,
                    error = %e,
                    "Failed to sync WAL on drop"
                );
            }
        }
    }
}
