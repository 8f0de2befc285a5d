//! Bulk writer
//!
//! A [`BulkWriter`] stages many writes in one engine transaction. When the
//! engine reports that the transaction is full, the writer commits it, opens
//! a replacement and re-applies the write, so callers can stream any number
//! of entries through `set` without caring about engine limits.
//!
//! Each auto-committed chunk is durable on its own. Dropping the writer
//! without calling [`BulkWriter::commit`] discards only the current,
//! uncommitted chunk.
//!
//! A writer is meant for one ingestion job on one thread; it is `Send` but
//! not `Sync`.

use tracing::debug;
use zinc_core::{EngineTxn, Namespace, Result, StorageError};

use crate::store::IndexStore;

/// Auto-splitting write transaction over an [`IndexStore`]
pub struct BulkWriter<'a> {
    store: &'a IndexStore,
    /// `None` once committed
    txn: Option<Box<dyn EngineTxn + 'a>>,
    splits: usize,
    written: usize,
}

impl<'a> BulkWriter<'a> {
    pub(crate) fn new(store: &'a IndexStore, txn: Box<dyn EngineTxn + 'a>) -> Self {
        BulkWriter {
            store,
            txn: Some(txn),
            splits: 0,
            written: 0,
        }
    }

    fn spent(&self) -> StorageError {
        StorageError::BulkSpent {
            index: self.store.name().to_string(),
        }
    }

    /// Stage `value` under `key`.
    ///
    /// Either the write is applied (possibly after committing the chunk
    /// staged so far) or an error is returned; callers never observe a split.
    ///
    /// # Errors
    ///
    /// - `BulkSpent` after [`commit`](Self::commit)
    /// - `Write` if the entry alone exceeds the engine's transaction limit
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let raw = Namespace::Data.key(key);
        self.stage("BulkWriter::set", key, |txn| txn.set(&raw, value))
    }

    /// Stage a delete of `key`; deleting an absent key succeeds
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        let raw = Namespace::Data.key(key);
        self.stage("BulkWriter::delete", key, |txn| txn.delete(&raw))
    }

    /// Read `key` through the open transaction, staged writes included
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let txn = self.txn.as_ref().ok_or_else(|| self.spent())?;
        txn.get(&Namespace::Data.key(key)).map_err(|e| {
            if e.is_not_found() {
                StorageError::not_found(self.store.name().as_str(), key)
            } else {
                e
            }
        })
    }

    fn stage<F>(&mut self, op: &'static str, key: &[u8], mut apply: F) -> Result<()>
    where
        F: FnMut(&mut (dyn EngineTxn + 'a)) -> Result<()>,
    {
        let txn = self.txn.as_mut().ok_or_else(|| StorageError::BulkSpent {
            index: self.store.name().to_string(),
        })?;
        match apply(txn.as_mut()) {
            Ok(()) => {
                self.written += 1;
                Ok(())
            }
            Err(e) if e.is_txn_too_big() => {
                if txn.staged_len() == 0 {
                    // Nothing to make room for: the entry alone is too big
                    return Err(StorageError::write(op, key, e));
                }
                self.split()?;
                let txn = self.txn.as_mut().ok_or_else(|| StorageError::BulkSpent {
                    index: self.store.name().to_string(),
                })?;
                apply(txn.as_mut()).map_err(|retry| {
                    if retry.is_txn_too_big() {
                        StorageError::write(op, key, retry)
                    } else {
                        retry
                    }
                })?;
                self.written += 1;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Commit the current chunk and open a fresh transaction in its place
    fn split(&mut self) -> Result<()> {
        let mut txn = self.txn.take().ok_or_else(|| self.spent())?;
        let staged = txn.staged_len();
        let bytes = txn.staged_bytes();
        txn.commit()?;
        drop(txn);

        self.txn = Some(self.store.begin_txn(true)?);
        self.splits += 1;
        debug!(
            target: "zinc::bulk",
            index = %self.store.name(),
            entries = staged,
            bytes,
            splits = self.splits,
            "Bulk transaction full, committed chunk"
        );
        Ok(())
    }

    /// Commit everything staged so far.
    ///
    /// The writer is spent afterwards: every further call fails with
    /// `BulkSpent`. A failed commit also spends the writer; chunks committed
    /// by earlier splits stay committed.
    pub fn commit(&mut self) -> Result<()> {
        let mut txn = self.txn.take().ok_or_else(|| self.spent())?;
        let staged = txn.staged_len();
        txn.commit()?;
        debug!(
            target: "zinc::bulk",
            index = %self.store.name(),
            entries = staged,
            written = self.written,
            splits = self.splits,
            "Bulk writer committed"
        );
        Ok(())
    }

    /// Number of automatic commits caused by the transaction limit
    pub fn splits(&self) -> usize {
        self.splits
    }

    /// Entries staged in the current, uncommitted chunk
    pub fn staged(&self) -> usize {
        self.txn.as_ref().map_or(0, |txn| txn.staged_len())
    }

    /// Entries accepted by `set`/`delete` over the writer's lifetime
    pub fn written(&self) -> usize {
        self.written
    }

    /// Whether `commit` has been called
    pub fn is_spent(&self) -> bool {
        self.txn.is_none()
    }

    /// Whether this writer accepts writes
    pub fn is_writable(&self) -> bool {
        self.txn.as_ref().is_some_and(|txn| txn.is_writable())
    }
}

impl Drop for BulkWriter<'_> {
    fn drop(&mut self) {
        if let Some(txn) = &self.txn {
            if txn.staged_len() > 0 {
                debug!(
                    target: "zinc::bulk",
                    index = %self.store.name(),
                    discarded = txn.staged_len(),
                    splits = self.splits,
                    "Bulk writer dropped without commit"
                );
            }
        }
    }
}
