//! Storage registry
//!
//! The [`StorageRegistry`] maps index names to open [`IndexStore`]s. It is a
//! plain service object: construct one at startup, hand it (usually as
//! `Arc<StorageRegistry>`) to whatever needs stores, and call
//! [`close_all`](StorageRegistry::close_all) at shutdown.
//!
//! Lookups of already-open stores go through a `DashMap` and never block each
//! other. Opening a store is serialized by a creation mutex, so two threads
//! resolving the same new index both get the one store that was opened.
//!
//! Closing a store (flush, lease release, compaction) happens outside the
//! creation mutex. While an index is closing it is parked in a `closing` map
//! behind a gate; a `resolve` of that same name waits on the gate before
//! reopening the directory, other names are not held up.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use zinc_core::{EngineKind, IndexName, Result, StorageConfig, StorageError};
use zinc_storage::open_engine;

use crate::store::IndexStore;

/// Process-wide map from index name to open store
pub struct StorageRegistry {
    config: StorageConfig,
    stores: DashMap<IndexName, Arc<IndexStore>>,
    /// Held across check-then-open so each index is opened once
    create_lock: Mutex<()>,
    /// Indexes removed from `stores` whose close has not finished yet
    closing: DashMap<IndexName, Arc<Mutex<()>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for StorageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageRegistry")
            .field("data_path", &self.config.data_path)
            .field("stores", &self.stores.len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl StorageRegistry {
    /// Create a registry over `config`
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the configuration does not validate.
    pub fn new(config: StorageConfig) -> Result<Self> {
        config.validate()?;
        info!(
            target: "zinc::registry",
            data_path = %config.data_path.display(),
            engine = %config.engine_kind(),
            "Storage registry created"
        );
        Ok(StorageRegistry {
            config,
            stores: DashMap::new(),
            create_lock: Mutex::new(()),
            closing: DashMap::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Create a registry configured from `ZINC_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(StorageConfig::from_env())
    }

    /// Configuration the registry opens stores with
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Root data directory
    pub fn data_path(&self) -> &Path {
        &self.config.data_path
    }

    /// Return the open store for `name`, opening it with `kind` if needed.
    ///
    /// `kind` only matters when the store is opened by this call; an already
    /// open store is returned whatever engine backs it.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for an invalid index name
    /// - `EngineOpen` if the store directory or engine cannot be initialized
    /// - `RegistryClosed` after [`close_all`](Self::close_all)
    pub fn resolve(&self, name: &str, kind: EngineKind) -> Result<Arc<IndexStore>> {
        self.ensure_open()?;
        let name = IndexName::new(name)?;
        if let Some(store) = self.stores.get(&name) {
            return Ok(Arc::clone(store.value()));
        }

        loop {
            self.wait_for_close(&name);

            let _create = self.create_lock.lock();
            // Re-check under the lock: another thread may have opened it.
            self.ensure_open()?;
            if let Some(store) = self.stores.get(&name) {
                return Ok(Arc::clone(store.value()));
            }
            // A delete slipped in between the wait and the lock
            if self.closing.contains_key(&name) {
                continue;
            }

            let engine = open_engine(kind, &name, &self.config)?;
            let store = Arc::new(IndexStore::new(name.clone(), engine));
            self.stores.insert(name, Arc::clone(&store));
            return Ok(store);
        }
    }

    /// [`resolve`](Self::resolve) with the configured engine kind
    pub fn resolve_default(&self, name: &str) -> Result<Arc<IndexStore>> {
        self.resolve(name, self.config.engine_kind())
    }

    /// Open store for `name`, without opening one
    pub fn get(&self, name: &str) -> Option<Arc<IndexStore>> {
        let name = IndexName::new(name).ok()?;
        self.stores.get(&name).map(|s| Arc::clone(s.value()))
    }

    /// Whether a store for `name` is open
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Names of all open stores, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.iter().map(|e| e.key().to_string()).collect();
        names.sort();
        names
    }

    /// Number of open stores
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    /// True when no store is open
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Remove `name` from the registry and close its store.
    ///
    /// Deleting an index that is not open is a no-op. Data on disk is kept;
    /// a later `resolve` reopens it.
    pub fn delete(&self, name: &str) -> Result<()> {
        let name = IndexName::new(name)?;
        self.close_detached(&name, |store| match store {
            Some(store) => {
                info!(target: "zinc::registry", index = %name, "Closing deleted index");
                store.close()
            }
            None => Ok(()),
        })
    }

    /// [`delete`](Self::delete), then remove the index directory
    pub fn purge(&self, name: &str) -> Result<()> {
        let index = IndexName::new(name)?;
        let path = self.config.index_path(&index);
        self.close_detached(&index, |store| {
            if let Some(store) = store {
                store.close()?;
            }
            match std::fs::remove_dir_all(&path) {
                Ok(()) => {
                    info!(target: "zinc::registry", index = %index, path = %path.display(), "Index purged");
                    Ok(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(StorageError::io("remove index directory", path.clone(), e)),
            }
        })
    }

    /// Close every open store and refuse further `resolve` calls.
    ///
    /// Every store is attempted even if some fail; the first failure is
    /// returned. Calling this again, or with no stores open, is a no-op.
    /// Returns only once closes started by a concurrent `delete` are done too.
    pub fn close_all(&self) -> Result<()> {
        let (first_close, drained) = {
            let _create = self.create_lock.lock();
            let first_close = !self.closed.swap(true, Ordering::AcqRel);
            let names: Vec<IndexName> = self.stores.iter().map(|e| e.key().clone()).collect();
            let drained: Vec<(IndexName, Arc<IndexStore>)> = names
                .into_iter()
                .filter_map(|name| self.stores.remove(&name))
                .collect();
            (first_close, drained)
        };

        let mut first_err = None;
        let mut closed = 0usize;
        for (name, store) in drained {
            match store.close() {
                Ok(()) => closed += 1,
                Err(e) => {
                    warn!(target: "zinc::registry", index = %name, error = %e, "Failed to close index");
                    first_err.get_or_insert(e);
                }
            }
        }

        let pending: Vec<IndexName> = self.closing.iter().map(|e| e.key().clone()).collect();
        for name in pending {
            self.wait_for_close(&name);
        }

        if first_close {
            info!(target: "zinc::registry", closed, "Storage registry shut down");
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Whether [`close_all`](Self::close_all) has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Detach `name` from `stores` under the creation lock, then run `close`
    /// with the lock released while the name sits gated in `closing`.
    fn close_detached<F>(&self, name: &IndexName, close: F) -> Result<()>
    where
        F: FnOnce(Option<Arc<IndexStore>>) -> Result<()>,
    {
        let gate = Arc::new(Mutex::new(()));
        let (held, store) = loop {
            self.wait_for_close(name);
            let _create = self.create_lock.lock();
            if self.closing.contains_key(name) {
                continue;
            }
            let held = gate.lock();
            let store = self.stores.remove(name).map(|(_, store)| store);
            self.closing.insert(name.clone(), Arc::clone(&gate));
            break (held, store);
        };

        if store.is_none() {
            debug!(target: "zinc::registry", index = %name, "Index not open");
        }
        let result = close(store);
        self.closing.remove(name);
        drop(held);
        result
    }

    /// Block until no close of `name` is in flight
    fn wait_for_close(&self, name: &IndexName) {
        let gate = self.closing.get(name).map(|e| Arc::clone(e.value()));
        if let Some(gate) = gate {
            debug!(target: "zinc::registry", index = %name, "Waiting for index to finish closing");
            drop(gate.lock());
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(StorageError::RegistryClosed);
        }
        Ok(())
    }
}
