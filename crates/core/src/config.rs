//! Storage configuration
//!
//! Settings are layered: built-in defaults, then an optional `zinc.toml`,
//! then environment overrides:
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `ZINC_DATA_PATH` | root data directory | `./data` |
//! | `ZINC_STORAGE_ENGINE` | `lsm` or `ordered` | `lsm` |
//! | `ZINC_STORAGE_DURABILITY` | `standard` or `always` | `standard` |
//!
//! Each index lives at `<data_path>/storage/<index>/`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::durability::DurabilityMode;
use crate::error::{Result, StorageError};
use crate::types::{EngineKind, IndexName};

/// Config file name looked up by deployments that use one.
pub const CONFIG_FILE_NAME: &str = "zinc.toml";

/// Environment variable naming the data directory
pub const ENV_DATA_PATH: &str = "ZINC_DATA_PATH";
/// Environment variable selecting the storage engine
pub const ENV_STORAGE_ENGINE: &str = "ZINC_STORAGE_ENGINE";
/// Environment variable selecting the durability mode
pub const ENV_STORAGE_DURABILITY: &str = "ZINC_STORAGE_DURABILITY";

/// Directory below the data path holding one directory per index
pub const STORAGE_DIR: &str = "storage";

/// Tuning for the transactional LSM engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LsmOptions {
    /// Memtable size that triggers a flush to a sorted table
    pub memtable_bytes: usize,
    /// Maximum staged bytes per transaction
    pub max_txn_bytes: usize,
    /// Maximum staged entries per transaction
    pub max_txn_entries: usize,
    /// Table count that triggers a full merge
    pub max_tables: usize,
}

impl Default for LsmOptions {
    fn default() -> Self {
        LsmOptions {
            memtable_bytes: 4 * 1024 * 1024,
            max_txn_bytes: 8 * 1024 * 1024,
            max_txn_entries: 100_000,
            max_tables: 8,
        }
    }
}

/// Tuning for the ordered-log engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderedOptions {
    /// Maximum staged bytes per batch
    pub max_batch_bytes: usize,
    /// Maximum staged entries per batch
    pub max_batch_entries: usize,
    /// Fraction of dead bytes in the log that triggers compaction on close
    pub compact_ratio: f64,
}

impl Default for OrderedOptions {
    fn default() -> Self {
        OrderedOptions {
            max_batch_bytes: 8 * 1024 * 1024,
            max_batch_entries: 100_000,
            compact_ratio: 0.5,
        }
    }
}

/// Storage configuration.
///
/// # Example
///
/// ```toml
/// data_path = "./data"
/// # "lsm" (default) or "ordered"; unknown values fall back to "lsm"
/// engine = "lsm"
/// # "standard" = periodic fsync, "always" = fsync every commit
/// durability = "standard"
/// id_lease_size = 1000
///
/// [lsm]
/// memtable_bytes = 4194304
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root data directory
    pub data_path: PathBuf,
    /// Engine used when the caller does not name one
    pub engine: String,
    /// Durability mode: `"standard"` or `"always"`
    pub durability: String,
    /// Number of IDs reserved per persisted lease
    pub id_lease_size: u64,
    /// LSM engine tuning
    pub lsm: LsmOptions,
    /// Ordered-log engine tuning
    pub ordered: OrderedOptions,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            data_path: PathBuf::from("./data"),
            engine: EngineKind::Lsm.as_str().to_string(),
            durability: "standard".to_string(),
            id_lease_size: 1000,
            lsm: LsmOptions::default(),
            ordered: OrderedOptions::default(),
        }
    }
}

impl StorageConfig {
    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        let mut cfg = StorageConfig::default();
        cfg.apply_env();
        cfg
    }

    /// Small limits and strict durability, rooted at `data_path`
    pub fn for_testing(data_path: impl Into<PathBuf>) -> Self {
        StorageConfig {
            data_path: data_path.into(),
            engine: EngineKind::Lsm.as_str().to_string(),
            durability: "always".to_string(),
            id_lease_size: 1000,
            lsm: LsmOptions {
                memtable_bytes: 64 * 1024,
                max_txn_bytes: 16 * 1024,
                max_txn_entries: 256,
                max_tables: 4,
            },
            ordered: OrderedOptions {
                max_batch_bytes: 16 * 1024,
                max_batch_entries: 256,
                compact_ratio: 0.5,
            },
        }
    }

    /// Read and parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StorageError::io("read config", path, e))?;
        let config: StorageConfig = toml::from_str(&content).map_err(|e| {
            StorageError::invalid_input(format!(
                "failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize this config to TOML and write it to `path`
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            StorageError::invalid_input(format!("failed to serialize config: {}", e))
        })?;
        std::fs::write(path, content).map_err(|e| StorageError::io("write config", path, e))
    }

    /// Apply `ZINC_*` overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply `ZINC_*` overrides from an arbitrary lookup
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_DATA_PATH).filter(|p| !p.is_empty()) {
            self.data_path = PathBuf::from(path);
        }
        if let Some(engine) = lookup(ENV_STORAGE_ENGINE).filter(|e| !e.is_empty()) {
            self.engine = engine;
        }
        if let Some(durability) = lookup(ENV_STORAGE_DURABILITY).filter(|d| !d.is_empty()) {
            self.durability = durability;
        }
    }

    /// Builder: set the data path
    pub fn with_data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_path = path.into();
        self
    }

    /// Builder: set the default engine
    pub fn with_engine(mut self, kind: EngineKind) -> Self {
        self.engine = kind.as_str().to_string();
        self
    }

    /// Builder: set the durability mode
    pub fn with_durability(mut self, mode: DurabilityMode) -> Self {
        self.durability = match mode {
            DurabilityMode::Always => "always",
            DurabilityMode::Standard { .. } => "standard",
        }
        .to_string();
        self
    }

    /// Builder: set the ID lease size
    pub fn with_id_lease_size(mut self, size: u64) -> Self {
        self.id_lease_size = size;
        self
    }

    /// Resolve the configured default engine
    ///
    /// Unrecognized values fall back to the LSM engine.
    pub fn engine_kind(&self) -> EngineKind {
        let (kind, recognized) = EngineKind::parse_or_default(&self.engine);
        if !recognized {
            warn!(
                target: "zinc::config",
                engine = %self.engine,
                fallback = %kind,
                "Unrecognized storage engine, using fallback"
            );
        }
        kind
    }

    /// Parse the durability string into a [`DurabilityMode`]
    pub fn durability_mode(&self) -> Result<DurabilityMode> {
        match self.durability.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(DurabilityMode::standard_default()),
            "always" => Ok(DurabilityMode::Always),
            other => Err(StorageError::invalid_input(format!(
                "invalid durability mode '{}'; expected \"standard\" or \"always\"",
                other
            ))),
        }
    }

    /// Reject settings the engines cannot run with
    pub fn validate(&self) -> Result<()> {
        self.durability_mode()?;
        if self.id_lease_size == 0 {
            return Err(StorageError::invalid_input("id_lease_size must be > 0"));
        }
        let sizes = [
            ("lsm.memtable_bytes", self.lsm.memtable_bytes),
            ("lsm.max_txn_bytes", self.lsm.max_txn_bytes),
            ("lsm.max_txn_entries", self.lsm.max_txn_entries),
            ("lsm.max_tables", self.lsm.max_tables),
            ("ordered.max_batch_bytes", self.ordered.max_batch_bytes),
            ("ordered.max_batch_entries", self.ordered.max_batch_entries),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(StorageError::invalid_input(format!("{} must be > 0", name)));
            }
        }
        let ratio = self.ordered.compact_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(StorageError::invalid_input(format!(
                "ordered.compact_ratio must be in (0, 1], got {}",
                ratio
            )));
        }
        Ok(())
    }

    /// Directory holding all index stores
    pub fn storage_root(&self) -> PathBuf {
        self.data_path.join(STORAGE_DIR)
    }

    /// Directory of one index store
    pub fn index_path(&self, name: &IndexName) -> PathBuf {
        self.storage_root().join(name.as_str())
    }
}
