//! Engine integration tests: ID generation, bulk ingestion, the indexing
//! sequence and shutdown.

#[path = "../common/mod.rs"]
mod common;

mod bulk_ingest;
mod id_generation;
mod indexing;
mod shutdown;
