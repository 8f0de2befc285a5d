//! Durability mode configuration
//!
//! Controls when engine logs are fsynced to disk.

use std::time::Duration;

/// Durability mode for engine log writes
///
/// | Mode | fsync | Data Loss Window |
/// |------|-------|-----------------|
/// | Always | Every commit | Zero |
/// | Standard | Periodic | Up to interval/batch |
///
/// Sequence leases are synced regardless of the mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    /// fsync after every commit (slow, maximum durability)
    Always,

    /// fsync every N commits OR every T milliseconds (the default)
    ///
    /// Checked at commit time and on close; may lose up to `batch_size`
    /// commits or `interval_ms` of data on crash.
    Standard {
        /// Maximum time between fsyncs in milliseconds
        interval_ms: u64,
        /// Maximum commits between fsyncs
        batch_size: usize,
    },
}

impl DurabilityMode {
    /// Standard mode with 100ms / 1000 commits
    pub fn standard_default() -> Self {
        DurabilityMode::Standard {
            interval_ms: 100,
            batch_size: 1000,
        }
    }

    /// True if every commit must be fsynced before returning
    pub fn requires_immediate_fsync(&self) -> bool {
        matches!(self, DurabilityMode::Always)
    }

    /// Decide whether a sync is due after `writes` unsynced commits, the
    /// oldest of which is `elapsed` old
    pub fn sync_due(&self, writes: usize, elapsed: Duration) -> bool {
        match *self {
            DurabilityMode::Always => writes > 0,
            DurabilityMode::Standard {
                interval_ms,
                batch_size,
            } => writes >= batch_size || (writes > 0 && elapsed.as_millis() as u64 >= interval_ms),
        }
    }
}

impl Default for DurabilityMode {
    fn default() -> Self {
        DurabilityMode::standard_default()
    }
}
