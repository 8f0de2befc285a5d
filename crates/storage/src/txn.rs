//! Staged transaction state shared by both engines.
//!
//! [`StagedWrites`] is the write set of an open transaction: last write per key
//! wins, reads see staged values first, and size limits are enforced at
//! staging time so that a rejected write leaves the set unchanged.

use std::collections::BTreeMap;

use zinc_core::{Result, StorageError, TxnLimit};

use crate::format::Mutation;

/// Fixed per-entry overhead counted against transaction limits
pub const ENTRY_OVERHEAD: usize = 16;

/// Transaction lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnStatus {
    /// Accepting reads and writes
    Active,
    /// Commit succeeded
    Committed,
    /// Commit failed; staged writes were dropped
    Aborted,
}

impl TxnStatus {
    /// Error unless the transaction is still active
    pub fn ensure_active(self) -> Result<()> {
        match self {
            TxnStatus::Active => Ok(()),
            other => Err(StorageError::TransactionNotActive {
                state: format!("{:?}", other),
            }),
        }
    }
}

/// Outcome of looking a key up in a write set
#[derive(Debug, PartialEq, Eq)]
pub enum Staged<'a> {
    /// Staged put
    Value(&'a [u8]),
    /// Staged delete
    Deleted,
    /// Key not touched by this transaction
    Untouched,
}

/// Bounded, ordered write set.
#[derive(Debug)]
pub struct StagedWrites {
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    bytes: usize,
    max_bytes: usize,
    max_entries: usize,
}

impl StagedWrites {
    /// Empty write set with the given limits
    pub fn new(max_bytes: usize, max_entries: usize) -> Self {
        StagedWrites {
            writes: BTreeMap::new(),
            bytes: 0,
            max_bytes,
            max_entries,
        }
    }

    /// Stage a put (`Some`) or delete (`None`).
    ///
    /// # Errors
    ///
    /// `TxnTooBig` if the write would push the set over either limit; the set
    /// is left unchanged.
    pub fn stage(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        let added = entry_size(key, value);
        let replaced = self
            .writes
            .get(key)
            .map(|old| entry_size(key, old.as_deref()));
        let entries = self.writes.len() + usize::from(replaced.is_none());
        let bytes = self.bytes - replaced.unwrap_or(0) + added;

        if entries > self.max_entries {
            return Err(StorageError::TxnTooBig {
                bound: TxnLimit::Entries,
                limit: self.max_entries,
                staged: self.writes.len(),
            });
        }
        if bytes > self.max_bytes {
            return Err(StorageError::TxnTooBig {
                bound: TxnLimit::Bytes,
                limit: self.max_bytes,
                staged: self.bytes,
            });
        }

        self.writes.insert(key.to_vec(), value.map(<[u8]>::to_vec));
        self.bytes = bytes;
        Ok(())
    }

    /// What this transaction staged for `key`
    pub fn lookup(&self, key: &[u8]) -> Staged<'_> {
        match self.writes.get(key) {
            Some(Some(value)) => Staged::Value(value),
            Some(None) => Staged::Deleted,
            None => Staged::Untouched,
        }
    }

    /// Number of staged keys
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// True when nothing is staged
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Staged bytes, including per-entry overhead
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Drain into mutations in key order
    pub fn take_mutations(&mut self) -> Vec<Mutation> {
        self.bytes = 0;
        std::mem::take(&mut self.writes)
            .into_iter()
            .map(|(key, value)| match value {
                Some(value) => Mutation::Put { key, value },
                None => Mutation::Delete { key },
            })
            .collect()
    }
}

/// Bytes a single write counts against transaction limits
pub fn entry_size(key: &[u8], value: Option<&[u8]>) -> usize {
    key.len() + value.map_or(0, <[u8]>::len) + ENTRY_OVERHEAD
}
