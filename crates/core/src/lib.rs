//! Core types and traits for Zinc storage
//!
//! This crate defines the foundational types used throughout the system:
//! - IndexName: validated name of a logical index
//! - EngineKind: which embedded engine backs an index
//! - Namespace: disjoint key spaces inside one index store
//! - StorageConfig / DurabilityMode: configuration
//! - StorageError: error taxonomy
//! - Traits: engine capability contract (KvEngine, EngineTxn, IdSequence)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod durability;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{LsmOptions, OrderedOptions, StorageConfig};
pub use durability::DurabilityMode;
pub use error::{Result, StorageError, TxnLimit};
pub use traits::{EngineTxn, IdSequence, KvEngine};
pub use types::{EngineKind, IndexName, Namespace, SEQUENCE_KEY};
