//! Reference model for expected key-value state
//!
//! Tracks what a store should contain so tests can compare an engine against
//! it after reopen or crash recovery.
//!
//! # Example
//!
//! ```ignore
//! use zinc_storage::testing::ReferenceModel;
//!
//! let mut model = ReferenceModel::new();
//! model.put(b"k1", b"v1");
//! assert!(model.compare(&engine).is_empty());
//! ```

use std::collections::{BTreeMap, BTreeSet};

use zinc_core::KvEngine;

/// Difference between the model and an engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateMismatch {
    /// Expected key is absent
    Missing {
        /// Key
        key: Vec<u8>,
    },
    /// Key holds a different value
    WrongValue {
        /// Key
        key: Vec<u8>,
        /// Value in the model
        expected: Vec<u8>,
        /// Value in the engine
        actual: Vec<u8>,
    },
    /// Deleted key is still readable
    Resurrected {
        /// Key
        key: Vec<u8>,
    },
    /// Engine failed the read
    ReadFailed {
        /// Key
        key: Vec<u8>,
        /// Error text
        error: String,
    },
}

/// Expected key-value state
#[derive(Debug, Default, Clone)]
pub struct ReferenceModel {
    live: BTreeMap<Vec<u8>, Vec<u8>>,
    deleted: BTreeSet<Vec<u8>>,
}

impl ReferenceModel {
    /// Empty model
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a put
    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.deleted.remove(key);
        self.live.insert(key.to_vec(), value.to_vec());
    }

    /// Record a delete
    pub fn delete(&mut self, key: &[u8]) {
        self.live.remove(key);
        self.deleted.insert(key.to_vec());
    }

    /// Expected value of `key`
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.live.get(key).map(Vec::as_slice)
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// True when no key is live
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Check every key the model knows about against `engine`
    pub fn compare(&self, engine: &dyn KvEngine) -> Vec<StateMismatch> {
        let mut mismatches = Vec::new();
        for (key, expected) in &self.live {
            match engine.get(key) {
                Ok(actual) if &actual == expected => {}
                Ok(actual) => mismatches.push(StateMismatch::WrongValue {
                    key: key.clone(),
                    expected: expected.clone(),
                    actual,
                }),
                Err(e) if e.is_not_found() => {
                    mismatches.push(StateMismatch::Missing { key: key.clone() })
                }
                Err(e) => mismatches.push(StateMismatch::ReadFailed {
                    key: key.clone(),
                    error: e.to_string(),
                }),
            }
        }
        for key in &self.deleted {
            match engine.get(key) {
                Err(e) if e.is_not_found() => {}
                Ok(_) => mismatches.push(StateMismatch::Resurrected { key: key.clone() }),
                Err(e) => mismatches.push(StateMismatch::ReadFailed {
                    key: key.clone(),
                    error: e.to_string(),
                }),
            }
        }
        mismatches
    }
}
