//! Index storage engine for Zinc
//!
//! This crate builds the per-index storage services on top of the engines in
//! `zinc-storage`:
//! - IndexStore: one open, namespaced key-value store per index
//! - BulkWriter: batch ingestion that splits oversized transactions
//! - StorageRegistry: index name to store mapping with a single open per name
//! - SourceStore: original JSON of every document
//! - DocumentIndexer: source-then-index sequence against external collaborators
//! - ShutdownCoordinator: closes every store on termination signals

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bulk;
pub mod indexer;
pub mod registry;
pub mod shutdown;
pub mod source;
pub mod store;

pub use bulk::BulkWriter;
pub use indexer::{CollaboratorError, DocumentEncoder, DocumentIndexer, IndexOutcome, IndexWriter};
pub use registry::StorageRegistry;
#[cfg(unix)]
pub use shutdown::wait_for_signals;
pub use shutdown::{ShutdownAction, ShutdownCoordinator, ShutdownSignal};
pub use source::SourceStore;
pub use store::IndexStore;
