//! Testing utilities for engines
//!
//! - **Corruption**: damage the active log of a store directory the way a
//!   crash or failing disk would
//! - **Reference Model**: in-memory model of expected key-value state
//!
//! # Example
//!
//! ```ignore
//! use zinc_storage::testing::{LogCorruptor, ReferenceModel};
//!
//! let corruptor = LogCorruptor::new(store_dir);
//! corruptor.truncate_tail(5)?;
//! ```

mod corruption;
mod reference_model;

pub use corruption::{CorruptionResult, LogCorruptor};
pub use reference_model::{ReferenceModel, StateMismatch};
