//! Engine capability traits
//!
//! [`KvEngine`] is the contract every embedded engine satisfies, so the layers
//! above can swap engines without changing behavior. ID generation is a
//! separate, optional capability ([`IdSequence`]) reached through
//! [`KvEngine::id_sequence`]; engines that cannot offer it return `None`
//! instead of failing at call time.
//!
//! Thread safety: all `KvEngine` methods must be safe to call concurrently
//! (requires `Send + Sync`). Transactions are single-owner.

use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;
use crate::types::EngineKind;

/// Embedded key-value engine backing one index
pub trait KvEngine: Send + Sync {
    /// Which implementation this is
    fn kind(&self) -> EngineKind;

    /// Directory owned by this engine
    fn path(&self) -> &Path;

    /// Persist `value` under `key`, overwriting any previous value
    ///
    /// # Errors
    ///
    /// Returns `Write` if the value cannot be persisted.
    fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Most recent committed value of `key`
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the key is absent, `Read` on I/O failure.
    fn get(&self, key: &[u8]) -> Result<Vec<u8>>;

    /// Values of all `keys`, read from one consistent view
    ///
    /// All-or-nothing: the first absent key fails the whole call with
    /// `NotFound` naming that key. No partial map is ever returned.
    fn get_many(&self, keys: &[&[u8]]) -> Result<HashMap<Vec<u8>, Vec<u8>>>;

    /// Remove `key`; succeeds when the key is absent
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Begin a transaction; read-only transactions refuse writes
    fn begin(&self, write: bool) -> Result<Box<dyn EngineTxn + '_>>;

    /// Optional persisted sequence used for ID generation
    fn id_sequence(&self) -> Option<&dyn IdSequence> {
        None
    }

    /// Flush and release all engine resources
    ///
    /// Must be called at most once; later calls on the engine fail with
    /// `Closed`.
    fn close(&self) -> Result<()>;
}

/// Transaction scope opened by [`KvEngine::begin`]
///
/// Dropping an uncommitted transaction discards its staged writes.
pub trait EngineTxn: Send {
    /// Read `key`, seeing this transaction's own staged writes
    fn get(&self, key: &[u8]) -> Result<Vec<u8>>;

    /// Stage a write
    ///
    /// # Errors
    ///
    /// Returns `TxnTooBig` if staging the write would exceed the engine's
    /// per-transaction limit; the write is not staged in that case.
    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Stage a delete (same size rules as [`EngineTxn::set`])
    fn delete(&mut self, key: &[u8]) -> Result<()>;

    /// Durably apply all staged writes atomically
    ///
    /// # Errors
    ///
    /// `Commit` if nothing was applied, `TransactionNotActive` if the
    /// transaction already finished.
    fn commit(&mut self) -> Result<()>;

    /// Whether the transaction accepts writes
    fn is_writable(&self) -> bool;

    /// Number of staged mutations
    fn staged_len(&self) -> usize;

    /// Approximate staged size in bytes
    fn staged_bytes(&self) -> usize;
}

/// Persisted, monotonically increasing counter
pub trait IdSequence: Send + Sync {
    /// Next value; strictly greater than every value returned before,
    /// including before a restart
    fn next_id(&self) -> Result<u64>;

    /// Return the unused part of the current lease to storage
    fn release(&self) -> Result<()>;
}
