//! ZincDB - per-index durable storage for the Zinc search service
//!
//! Every logical index gets its own isolated key-value store, backed by one
//! of two embedded engines: a transactional LSM engine (the default) or an
//! ordered append-only log. On top of the stores sit bulk ingestion,
//! document ID generation, the document source store and the indexing
//! sequence that keeps sources and the search index in step.
//!
//! # Quick Start
//!
//! ```ignore
//! use zincdb::{EngineKind, SourceStore, StorageConfig, StorageRegistry};
//!
//! let registry = StorageRegistry::new(StorageConfig::from_env())?;
//! let store = registry.resolve("logs", EngineKind::Lsm)?;
//!
//! let id = store.generate_id()?;
//! let sources = SourceStore::new(store.clone());
//! sources.set_source(&id, &serde_json::json!({"msg": "hello"}))?;
//!
//! registry.close_all()?;
//! ```
//!
//! # Architecture
//!
//! - `zinc-core`: error taxonomy, configuration, engine traits
//! - `zinc-storage`: log format, the two engines, leased ID sequence
//! - `zinc-engine`: stores, registry, bulk writer, sources, indexing, shutdown
//!
//! Only the service-level API is re-exported here; engine internals stay in
//! their crates.

pub use zinc_core::{
    DurabilityMode, EngineKind, IndexName, LsmOptions, OrderedOptions, Result, StorageConfig,
    StorageError, TxnLimit,
};
pub use zinc_engine::*;
