//! In-memory write buffer for the LSM engine.
//!
//! Deletes are kept as tombstones (`None`) so they shadow older values in
//! sorted tables until the next full merge.

use std::collections::BTreeMap;

use crate::format::Mutation;
use crate::txn::ENTRY_OVERHEAD;

/// Sorted buffer of recent writes
#[derive(Debug, Clone, Default)]
pub struct MemTable {
    entries: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    bytes: usize,
}

impl MemTable {
    /// Empty memtable
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply committed mutations in order
    pub fn apply(&mut self, mutations: &[Mutation]) {
        for mutation in mutations {
            match mutation {
                Mutation::Put { key, value } => self.insert(key.clone(), Some(value.clone())),
                Mutation::Delete { key } => self.insert(key.clone(), None),
            }
        }
    }

    fn insert(&mut self, key: Vec<u8>, value: Option<Vec<u8>>) {
        let added = key.len() + value.as_ref().map_or(0, Vec::len) + ENTRY_OVERHEAD;
        let key_len = key.len();
        if let Some(old) = self.entries.insert(key, value) {
            self.bytes -= key_len + old.map_or(0, |v| v.len()) + ENTRY_OVERHEAD;
        }
        self.bytes += added;
    }

    /// `Some(Some(v))` for a value, `Some(None)` for a tombstone, `None` if
    /// the key was not written since the last flush
    pub fn get(&self, key: &[u8]) -> Option<Option<&[u8]>> {
        self.entries.get(key).map(|v| v.as_deref())
    }

    /// Approximate memory footprint
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Number of keys (including tombstones)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], Option<&[u8]>)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.as_slice(), v.as_deref()))
    }
}
