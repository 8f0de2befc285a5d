//! Storage integration tests: key-value semantics of index stores under both
//! engines, isolation between indexes, and recovery after reopen or crash.

#[path = "../common/mod.rs"]
mod common;

mod isolation;
mod read_your_write;
mod recovery;
