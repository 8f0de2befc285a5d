//! Document source store
//!
//! Keeps the JSON a user originally submitted for each document, keyed by
//! document ID. This is the system of record for "what was indexed",
//! independent of how the search index represents the document.
//!
//! A [`SourceStore`] is bound to one index store; payloads live in that
//! store's `Source` namespace and cannot collide with generic data or
//! bookkeeping keys.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use zinc_core::{Namespace, Result, StorageError};

use crate::store::IndexStore;

/// Original JSON payloads of one index
#[derive(Debug, Clone)]
pub struct SourceStore {
    store: Arc<IndexStore>,
}

impl SourceStore {
    /// Source store over `store`
    pub fn new(store: Arc<IndexStore>) -> Self {
        SourceStore { store }
    }

    /// Index store the payloads are written to
    pub fn store(&self) -> &Arc<IndexStore> {
        &self.store
    }

    /// Persist `doc` under `doc_id`, replacing any previous payload
    pub fn set_source(&self, doc_id: &str, doc: &Value) -> Result<()> {
        let bytes = serde_json::to_vec(doc).map_err(|e| StorageError::Encoding {
            doc_id: doc_id.to_string(),
            reason: e.to_string(),
        })?;
        self.store.set_in(Namespace::Source, doc_id.as_bytes(), &bytes)
    }

    /// Persist already-encoded JSON verbatim.
    ///
    /// # Errors
    ///
    /// `Encoding` if `bytes` is not valid JSON; nothing is written.
    pub fn set_source_bytes(&self, doc_id: &str, bytes: &[u8]) -> Result<()> {
        serde_json::from_slice::<serde::de::IgnoredAny>(bytes).map_err(|e| {
            StorageError::Encoding {
                doc_id: doc_id.to_string(),
                reason: e.to_string(),
            }
        })?;
        self.store.set_in(Namespace::Source, doc_id.as_bytes(), bytes)
    }

    /// Exact bytes stored for `doc_id`
    pub fn get_source(&self, doc_id: &str) -> Result<Vec<u8>> {
        self.store.get_in(Namespace::Source, doc_id.as_bytes())
    }

    /// Stored payload for `doc_id`, parsed
    pub fn get_source_json(&self, doc_id: &str) -> Result<Value> {
        let bytes = self.get_source(doc_id)?;
        serde_json::from_slice(&bytes).map_err(|e| {
            StorageError::read("SourceStore::get_source_json", doc_id.as_bytes(), e)
        })
    }

    /// Payloads for every ID in `doc_ids`; fails whole if any is missing
    pub fn get_sources(&self, doc_ids: &[&str]) -> Result<HashMap<String, Vec<u8>>> {
        let keys: Vec<&[u8]> = doc_ids.iter().map(|id| id.as_bytes()).collect();
        let found = self.store.get_many_in(Namespace::Source, &keys)?;
        Ok(found
            .into_iter()
            .map(|(key, value)| (String::from_utf8_lossy(&key).into_owned(), value))
            .collect())
    }

    /// Remove the payload for `doc_id`; removing a missing one succeeds
    pub fn delete_source(&self, doc_id: &str) -> Result<()> {
        self.store.delete_in(Namespace::Source, doc_id.as_bytes())
    }
}
