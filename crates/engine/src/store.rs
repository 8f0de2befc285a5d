//! Per-index store
//!
//! An [`IndexStore`] owns the engine backing one index and is the only way
//! the rest of the system touches that engine. Every key it writes is put in
//! a [`Namespace`], so generic data, document sources and the engine's own
//! bookkeeping never collide.
//!
//! Stores are shared as `Arc<IndexStore>` and safe to use from many threads.
//! Closing takes an exclusive guard, so it waits for in-flight operations and
//! every later call fails with `Closed`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, info};
use zinc_core::{EngineKind, EngineTxn, IndexName, KvEngine, Namespace, Result, StorageError};

use crate::bulk::BulkWriter;

/// Open store for a single index
pub struct IndexStore {
    name: IndexName,
    path: PathBuf,
    engine: Box<dyn KvEngine>,
    /// `true` once closed; readers hold the read guard for the whole call
    closed: RwLock<bool>,
}

impl std::fmt::Debug for IndexStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexStore")
            .field("name", &self.name)
            .field("engine", &self.engine.kind())
            .field("path", &self.path)
            .field("closed", &*self.closed.read())
            .finish()
    }
}

impl IndexStore {
    /// Wrap an open engine
    pub fn new(name: IndexName, engine: Box<dyn KvEngine>) -> Self {
        let path = engine.path().to_path_buf();
        info!(
            target: "zinc::store",
            index = %name,
            engine = %engine.kind(),
            path = %path.display(),
            "Index store opened"
        );
        IndexStore {
            name,
            path,
            engine,
            closed: RwLock::new(false),
        }
    }

    /// Index this store belongs to
    pub fn name(&self) -> &IndexName {
        &self.name
    }

    /// Engine backing this store
    pub fn kind(&self) -> EngineKind {
        self.engine.kind()
    }

    /// Directory of this store
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `close` has run
    pub fn is_closed(&self) -> bool {
        *self.closed.read()
    }

    /// Whether this store can mint document IDs
    pub fn supports_id_generation(&self) -> bool {
        self.engine.id_sequence().is_some()
    }

    /// Run `f` against the engine unless the store is closed.
    ///
    /// The read guard is held for the duration of `f` so that `close` cannot
    /// pull the engine out from under a running operation.
    /// Hold off `close` until the guard drops, as an in-flight operation would
    #[cfg(test)]
    pub(crate) fn pin_open(&self) -> parking_lot::RwLockReadGuard<'_, bool> {
        self.closed.read()
    }

    fn with_engine<T>(&self, f: impl FnOnce(&dyn KvEngine) -> Result<T>) -> Result<T> {
        let closed = self.closed.read();
        if *closed {
            return Err(self.closed_error());
        }
        f(self.engine.as_ref())
    }

    fn closed_error(&self) -> StorageError {
        StorageError::Closed {
            index: self.name.to_string(),
        }
    }

    /// Store `value` under `key`, replacing any previous value
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.set_in(Namespace::Data, key, value)
    }

    /// Most recent value of `key`
    ///
    /// # Errors
    ///
    /// `NotFound` naming `key` when it has no committed value.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.get_in(Namespace::Data, key)
    }

    /// Values for every key in `keys`, or nothing at all.
    ///
    /// All values come from one consistent read. If any key is absent the
    /// whole call fails with `NotFound` naming that key; no partial map is
    /// returned.
    pub fn get_many(&self, keys: &[&[u8]]) -> Result<HashMap<Vec<u8>, Vec<u8>>> {
        self.get_many_in(Namespace::Data, keys)
    }

    /// Remove `key`; removing an absent key succeeds
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.delete_in(Namespace::Data, key)
    }

    /// Mint the next document ID for this index.
    ///
    /// IDs are decimal strings of a strictly increasing integer, starting at
    /// `"1"` on a fresh index.
    ///
    /// # Errors
    ///
    /// - `Unsupported` if the engine has no sequence primitive
    /// - `SequenceExhausted` if a new lease could not be persisted
    pub fn generate_id(&self) -> Result<String> {
        self.with_engine(|engine| {
            let sequence = engine.id_sequence().ok_or_else(|| StorageError::Unsupported {
                index: self.name.to_string(),
                capability: "document id generation",
            })?;
            let id = sequence.next_id()?;
            Ok(id.to_string())
        })
    }

    /// Start a bulk writer over this store.
    ///
    /// With `write == false` the writer only reads.
    pub fn bulk(&self, write: bool) -> Result<BulkWriter<'_>> {
        let txn = self.begin_txn(write)?;
        Ok(BulkWriter::new(self, txn))
    }

    pub(crate) fn begin_txn(&self, write: bool) -> Result<Box<dyn EngineTxn + '_>> {
        let closed = self.closed.read();
        if *closed {
            return Err(self.closed_error());
        }
        self.engine.begin(write)
    }

    /// Close the store: flush pending writes, release the ID lease and the
    /// directory lock.
    ///
    /// Idempotent. Waits for operations already running on other threads.
    pub fn close(&self) -> Result<()> {
        let mut closed = self.closed.write();
        if *closed {
            debug!(target: "zinc::store", index = %self.name, "Store already closed");
            return Ok(());
        }
        *closed = true;
        let result = self.engine.close();
        info!(
            target: "zinc::store",
            index = %self.name,
            ok = result.is_ok(),
            "Index store closed"
        );
        result
    }

    pub(crate) fn set_in(&self, ns: Namespace, key: &[u8], value: &[u8]) -> Result<()> {
        self.with_engine(|engine| {
            engine
                .set(&ns.key(key), value)
                .map_err(|e| self.user_key_error(e, key))
        })
    }

    pub(crate) fn get_in(&self, ns: Namespace, key: &[u8]) -> Result<Vec<u8>> {
        self.with_engine(|engine| {
            engine
                .get(&ns.key(key))
                .map_err(|e| self.user_key_error(e, key))
        })
    }

    pub(crate) fn delete_in(&self, ns: Namespace, key: &[u8]) -> Result<()> {
        self.with_engine(|engine| {
            engine
                .delete(&ns.key(key))
                .map_err(|e| self.user_key_error(e, key))
        })
    }

    pub(crate) fn get_many_in(
        &self,
        ns: Namespace,
        keys: &[&[u8]],
    ) -> Result<HashMap<Vec<u8>, Vec<u8>>> {
        let raw_keys: Vec<Vec<u8>> = keys.iter().map(|k| ns.key(k)).collect();
        let raw_refs: Vec<&[u8]> = raw_keys.iter().map(Vec::as_slice).collect();

        let found = self.with_engine(|engine| {
            engine.get_many(&raw_refs).map_err(|e| {
                // Report the caller's key, not the namespaced one
                let missing = e.missing_key().and_then(|missing| {
                    keys.iter()
                        .zip(&raw_keys)
                        .find(|(_, raw)| String::from_utf8_lossy(raw) == missing)
                        .map(|(key, _)| *key)
                });
                match missing {
                    Some(key) => StorageError::not_found(self.name.as_str(), key),
                    None => e,
                }
            })
        })?;

        Ok(found
            .into_iter()
            .filter_map(|(raw, value)| ns.strip(&raw).map(|key| (key.to_vec(), value)))
            .collect())
    }

    /// Rewrite a NotFound raised for a namespaced key so it names `key`
    fn user_key_error(&self, err: StorageError, key: &[u8]) -> StorageError {
        if err.is_not_found() {
            StorageError::not_found(self.name.as_str(), key)
        } else {
            err
        }
    }
}
