//! Error types for the storage layer
//!
//! Every component returns [`StorageError`] by value. Variants carry enough
//! context (operation, index, key) to diagnose a failure from its message
//! alone. We use `thiserror` for `Display` and `Error` implementations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Error taxonomy shared by engines, stores and the registry
#[derive(Debug, Error)]
pub enum StorageError {
    /// Store directory or engine initialization failed
    #[error("failed to open engine for index '{index}' at {path}: {reason}")]
    EngineOpen {
        /// Index being opened
        index: String,
        /// Directory of the store
        path: PathBuf,
        /// Underlying cause
        reason: String,
    },

    /// Key has no committed value
    ///
    /// This is an expected outcome, not a fault.
    #[error("key not found in index '{index}': {key}")]
    NotFound {
        /// Index the lookup ran against
        index: String,
        /// Missing key (lossy UTF-8)
        key: String,
    },

    /// Read failed for a reason other than absence
    #[error("{op}: read of key [{key}] failed: {reason}")]
    Read {
        /// Operation name
        op: &'static str,
        /// Key being read
        key: String,
        /// Underlying cause
        reason: String,
    },

    /// Write failed; nothing was applied
    #[error("{op}: write of key [{key}] failed: {reason}")]
    Write {
        /// Operation name
        op: &'static str,
        /// Key being written
        key: String,
        /// Underlying cause
        reason: String,
    },

    /// Transaction commit failed; none of its writes were applied
    #[error("commit failed for index '{index}': {reason}")]
    Commit {
        /// Index the transaction belongs to
        index: String,
        /// Underlying cause
        reason: String,
    },

    /// Staging the write would exceed the engine's per-transaction limit
    #[error("transaction too big: {staged} {bound} staged, limit {limit}")]
    TxnTooBig {
        /// Which limit the write ran into
        bound: TxnLimit,
        /// Engine limit, in units of `bound`
        limit: usize,
        /// Amount already staged, in units of `bound`
        staged: usize,
    },

    /// Transaction is not in a state that accepts the call
    #[error("transaction not active: {state}")]
    TransactionNotActive {
        /// Current transaction state
        state: String,
    },

    /// Bulk writer was used after commit
    #[error("bulk writer for index '{index}' already committed")]
    BulkSpent {
        /// Index the writer belongs to
        index: String,
    },

    /// Persisting a new ID lease failed; ID minting is halted for the index
    #[error("sequence exhausted for index '{index}': {reason}")]
    SequenceExhausted {
        /// Index the sequence belongs to
        index: String,
        /// Underlying cause
        reason: String,
    },

    /// The engine backing this index lacks a capability
    #[error("index '{index}' does not support {capability}")]
    Unsupported {
        /// Index name
        index: String,
        /// Missing capability
        capability: &'static str,
    },

    /// Document encoder rejected the document
    #[error("failed to encode document '{doc_id}': {reason}")]
    Encoding {
        /// Document ID
        doc_id: String,
        /// Underlying cause
        reason: String,
    },

    /// External index writer rejected the document
    #[error("index writer failed for document '{doc_id}': {reason}")]
    IndexWrite {
        /// Document ID
        doc_id: String,
        /// Underlying cause
        reason: String,
    },

    /// On-disk data could not be decoded
    #[error("data corruption in {path}: {reason}")]
    Corruption {
        /// File that failed validation
        path: PathBuf,
        /// What was wrong
        reason: String,
    },

    /// Operation on a store that has been closed
    #[error("index '{index}' is closed")]
    Closed {
        /// Index name
        index: String,
    },

    /// Registry has been shut down
    #[error("storage registry is shut down")]
    RegistryClosed,

    /// Caller supplied an invalid argument
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// I/O error with context
    #[error("{op} {path}: {source}")]
    Io {
        /// Operation name
        op: &'static str,
        /// File or directory involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },
}

/// Per-transaction limit an engine enforces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnLimit {
    /// Total staged bytes, per-entry overhead included
    Bytes,
    /// Number of distinct staged keys
    Entries,
}

impl std::fmt::Display for TxnLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TxnLimit::Bytes => f.write_str("bytes"),
            TxnLimit::Entries => f.write_str("entries"),
        }
    }
}

impl StorageError {
    /// Create a NotFound error
    pub fn not_found(index: impl Into<String>, key: &[u8]) -> Self {
        StorageError::NotFound {
            index: index.into(),
            key: String::from_utf8_lossy(key).into_owned(),
        }
    }

    /// Create a Read error
    pub fn read(op: &'static str, key: &[u8], reason: impl ToString) -> Self {
        StorageError::Read {
            op,
            key: String::from_utf8_lossy(key).into_owned(),
            reason: reason.to_string(),
        }
    }

    /// Create a Write error
    pub fn write(op: &'static str, key: &[u8], reason: impl ToString) -> Self {
        StorageError::Write {
            op,
            key: String::from_utf8_lossy(key).into_owned(),
            reason: reason.to_string(),
        }
    }

    /// Create a Commit error
    pub fn commit(index: impl Into<String>, reason: impl ToString) -> Self {
        StorageError::Commit {
            index: index.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an Io error
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        StorageError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// Create a Corruption error
    pub fn corruption(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        StorageError::Corruption {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an InvalidInput error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        StorageError::InvalidInput(msg.into())
    }

    /// True for the expected "no such key" outcome
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    /// True when an engine refused a write because the transaction is full
    pub fn is_txn_too_big(&self) -> bool {
        matches!(self, StorageError::TxnTooBig { .. })
    }

    /// The key named by a NotFound error
    pub fn missing_key(&self) -> Option<&str> {
        match self {
            StorageError::NotFound { key, .. } => Some(key),
            _ => None,
        }
    }
}
