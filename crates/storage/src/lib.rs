//! Embedded key-value engines for Zinc
//!
//! This crate implements the two engines an index store can run on:
//! - `LsmEngine`: WAL + memtable + sorted tables, snapshot-isolated
//!   transactions with a size limit, and a leased ID sequence
//! - `OrderedEngine`: single append-only log with an in-memory ordered key
//!   index, atomic write batches, and compaction on close
//!
//! Both share the checksummed record format (`format`), the log
//! writer/reader (`log`), the directory lock (`lock`) and transaction staging
//! (`txn`). `open_engine` picks one by [`EngineKind`](zinc_core::EngineKind).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod factory;
pub mod format;
pub mod lock;
pub mod log;
pub mod lsm;
pub mod ordered;
pub mod sequence;
pub mod testing;
pub mod txn;

pub use factory::open_engine;
pub use format::{LogRecord, Mutation, RecordError};
pub use lock::DirLock;
pub use log::{read_log, LogReadResult, LogWriter};
pub use lsm::{LsmEngine, LsmSnapshot, LsmStats};
pub use ordered::{OrderedEngine, OrderedStats};
pub use sequence::LeasedSequence;
pub use txn::{StagedWrites, TxnStatus};
