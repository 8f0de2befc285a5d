//! Core types shared across the storage layer
//!
//! - [`IndexName`]: validated name of a logical index
//! - [`EngineKind`]: which embedded engine backs an index
//! - [`Namespace`]: disjoint key spaces inside one index store

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, StorageError};

/// Name of a logical index
///
/// Index names map 1:1 to a directory under `<data_path>/storage/`, so a name
/// must be a single, non-empty path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexName(String);

impl IndexName {
    /// Validate and wrap an index name
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(StorageError::invalid_input("index name must not be empty"));
        }
        if name == "." || name == ".." {
            return Err(StorageError::invalid_input(format!(
                "index name '{}' is reserved",
                name
            )));
        }
        if name.contains(['/', '\\', '\0']) {
            return Err(StorageError::invalid_input(format!(
                "index name '{}' must not contain path separators or NUL",
                name.escape_default()
            )));
        }
        Ok(IndexName(name))
    }

    /// Borrow the name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IndexName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for IndexName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for IndexName {
    type Error = StorageError;

    fn try_from(value: &str) -> Result<Self> {
        IndexName::new(value)
    }
}

impl TryFrom<String> for IndexName {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self> {
        IndexName::new(value)
    }
}

/// Embedded engine implementation backing an index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EngineKind {
    /// Transactional LSM engine with a persisted sequence
    #[default]
    Lsm,
    /// Ordered append-log engine without a sequence primitive
    OrderedLog,
}

impl EngineKind {
    /// Canonical configuration spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Lsm => "lsm",
            EngineKind::OrderedLog => "ordered",
        }
    }

    /// Parse a configuration value, falling back to [`EngineKind::Lsm`]
    ///
    /// Returns the kind and whether the input was recognized.
    pub fn parse_or_default(value: &str) -> (EngineKind, bool) {
        match value.parse() {
            Ok(kind) => (kind, true),
            Err(_) => (EngineKind::default(), false),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lsm" | "badger" | "transactional-lsm" => Ok(EngineKind::Lsm),
            "ordered" | "pebble" | "ordered-log" => Ok(EngineKind::OrderedLog),
            other => Err(StorageError::invalid_input(format!(
                "unknown storage engine '{}'",
                other
            ))),
        }
    }
}

/// Key space inside one index store
///
/// Every key written by the store is prefixed with its namespace byte, so
/// bookkeeping keys, document sources and generic data can never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Namespace {
    /// Store bookkeeping (sequence counters)
    System = 0x00,
    /// Original JSON payloads of documents
    Source = 0x01,
    /// Generic key-value data
    Data = 0x02,
}

impl Namespace {
    /// Prefix byte of this namespace
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Build the engine-level key for `key` in this namespace
    pub fn key(self, key: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(key.len() + 1);
        out.push(self.tag());
        out.extend_from_slice(key);
        out
    }

    /// Strip the namespace prefix, if `raw` belongs to this namespace
    pub fn strip(self, raw: &[u8]) -> Option<&[u8]> {
        match raw.split_first() {
            Some((&tag, rest)) if tag == self.tag() => Some(rest),
            _ => None,
        }
    }
}

/// Engine-level key of the document ID sequence
pub const SEQUENCE_KEY: &[u8] = b"\x00sequence/id";
