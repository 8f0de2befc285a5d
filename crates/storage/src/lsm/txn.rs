//! LSM transactions.
//!
//! A transaction reads from the snapshot taken at `begin` overlaid with its
//! own staged writes. Commit appends the whole write set as one WAL record,
//! so it is applied entirely or not at all. Concurrent transactions are not
//! checked for conflicts: the later commit wins.

use zinc_core::{EngineTxn, Result, StorageError};

use super::{LsmEngine, LsmSnapshot};
use crate::txn::{Staged, StagedWrites, TxnStatus};

/// Open transaction against an [`LsmEngine`]
pub struct LsmTxn<'a> {
    engine: &'a LsmEngine,
    snapshot: LsmSnapshot,
    staged: StagedWrites,
    writable: bool,
    status: TxnStatus,
}

impl<'a> LsmTxn<'a> {
    pub(super) fn new(engine: &'a LsmEngine, snapshot: LsmSnapshot, writable: bool) -> Self {
        let options = engine.options();
        LsmTxn {
            engine,
            snapshot,
            staged: StagedWrites::new(options.max_txn_bytes, options.max_txn_entries),
            writable,
            status: TxnStatus::Active,
        }
    }

    fn ensure_writable(&self, op: &'static str, key: &[u8]) -> Result<()> {
        self.status.ensure_active()?;
        if !self.writable {
            return Err(StorageError::write(op, key, "transaction is read-only"));
        }
        Ok(())
    }
}

impl EngineTxn for LsmTxn<'_> {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.status.ensure_active()?;
        match self.staged.lookup(key) {
            Staged::Value(value) => Ok(value.to_vec()),
            Staged::Deleted => Err(StorageError::not_found(self.engine.name(), key)),
            Staged::Untouched => self
                .snapshot
                .lookup(key)
                .ok_or_else(|| StorageError::not_found(self.engine.name(), key)),
        }
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.ensure_writable("LsmTxn::set", key)?;
        self.staged.stage(key, Some(value))
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.ensure_writable("LsmTxn::delete", key)?;
        self.staged.stage(key, None)
    }

    fn commit(&mut self) -> Result<()> {
        self.status.ensure_active()?;
        let mutations = self.staged.take_mutations();
        match self.engine.apply(mutations, false) {
            Ok(()) => {
                self.status = TxnStatus::Committed;
                Ok(())
            }
            Err(e) => {
                self.status = TxnStatus::Aborted;
                Err(e)
            }
        }
    }

    fn is_writable(&self) -> bool {
        self.writable
    }

    fn staged_len(&self) -> usize {
        self.staged.len()
    }

    fn staged_bytes(&self) -> usize {
        self.staged.bytes()
    }
}
