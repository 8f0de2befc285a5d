//! Write batches for the ordered-log engine.
//!
//! Reads see the batch's own staged writes first, then the latest committed
//! state of the engine (there is no snapshot). Commit writes the batch as one
//! log record.

use zinc_core::{EngineTxn, KvEngine, Result, StorageError};

use super::OrderedEngine;
use crate::txn::{Staged, StagedWrites, TxnStatus};

/// Open batch against an [`OrderedEngine`]
pub struct OrderedBatch<'a> {
    engine: &'a OrderedEngine,
    staged: StagedWrites,
    writable: bool,
    status: TxnStatus,
}

impl<'a> OrderedBatch<'a> {
    pub(super) fn new(engine: &'a OrderedEngine, writable: bool) -> Self {
        let options = engine.options();
        OrderedBatch {
            engine,
            staged: StagedWrites::new(options.max_batch_bytes, options.max_batch_entries),
            writable,
            status: TxnStatus::Active,
        }
    }

    fn ensure_writable(&self, op: &'static str, key: &[u8]) -> Result<()> {
        self.status.ensure_active()?;
        if !self.writable {
            return Err(StorageError::write(op, key, "batch is read-only"));
        }
        Ok(())
    }
}

impl EngineTxn for OrderedBatch<'_> {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.status.ensure_active()?;
        match self.staged.lookup(key) {
            Staged::Value(value) => Ok(value.to_vec()),
            Staged::Deleted => Err(StorageError::not_found(self.engine.name(), key)),
            Staged::Untouched => self.engine.get(key),
        }
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.ensure_writable("OrderedBatch::set", key)?;
        self.staged.stage(key, Some(value))
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.ensure_writable("OrderedBatch::delete", key)?;
        self.staged.stage(key, None)
    }

    fn commit(&mut self) -> Result<()> {
        self.status.ensure_active()?;
        match self.engine.apply(self.staged.take_mutations()) {
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
