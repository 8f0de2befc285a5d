//! Leased ID sequence.
//!
//! Issuing an ID must not cost a durable write. The sequence instead persists
//! an upper bound ("lease") and hands out values below it from memory:
//!
//! ```text
//!   persisted bound ──────────────┐
//!   next ─────┐                   │
//!   ──────────┼───────────────────┼──────────▶
//!      issued │  in-memory lease  │  never issued yet
//! ```
//!
//! When the lease runs out, a new bound `next + lease_size` is persisted
//! (synced) before any value under it is returned. After a crash the store
//! reopens at the last persisted bound, so at most one lease worth of values
//! is skipped and none is ever reissued. A clean [`LeasedSequence::release`]
//! persists `next` itself, so nothing is skipped across a clean restart.
//!
//! The lease lock is held only to bump `next`. Refills are serialized by a
//! second lock so that one slow persist does not convoy callers that still
//! have values available.

use parking_lot::Mutex;
use tracing::{debug, error};
use zinc_core::{Result, StorageError};

/// First value issued by a fresh sequence
pub const FIRST_ID: u64 = 1;

#[derive(Debug, Clone, Copy)]
struct Lease {
    next: u64,
    bound: u64,
}

/// Monotonic counter backed by a persisted lease bound.
#[derive(Debug)]
pub struct LeasedSequence {
    index: String,
    lease_size: u64,
    lease: Mutex<Lease>,
    refill: Mutex<()>,
    poisoned: Mutex<Option<String>>,
}

impl LeasedSequence {
    /// Sequence resuming from `persisted` (the stored bound), or from
    /// [`FIRST_ID`] when nothing was stored.
    pub fn new(index: impl Into<String>, persisted: Option<u64>, lease_size: u64) -> Self {
        let start = persisted.unwrap_or(FIRST_ID).max(FIRST_ID);
        LeasedSequence {
            index: index.into(),
            lease_size: lease_size.max(1),
            lease: Mutex::new(Lease {
                next: start,
                bound: start,
            }),
            refill: Mutex::new(()),
            poisoned: Mutex::new(None),
        }
    }

    /// Issue the next value.
    ///
    /// `persist` is called with a new bound whenever the lease is exhausted;
    /// it must durably store the bound before returning `Ok`.
    ///
    /// # Errors
    ///
    /// `SequenceExhausted` if the bound cannot be persisted. The sequence then
    /// refuses further values until the store is reopened.
    pub fn next<F>(&self, persist: F) -> Result<u64>
    where
        F: FnOnce(u64) -> Result<()>,
    {
        self.check_poisoned()?;
        if let Some(value) = self.take_from_lease() {
            return Ok(value);
        }

        let _refill = self.refill.lock();
        // Another caller may have refilled while we waited.
        if let Some(value) = self.take_from_lease() {
            return Ok(value);
        }
        self.check_poisoned()?;

        let start = self.lease.lock().bound;
        let new_bound = start.checked_add(self.lease_size).ok_or_else(|| {
            StorageError::SequenceExhausted {
                index: self.index.clone(),
                reason: "sequence space exhausted".to_string(),
            }
        })?;

        if let Err(e) = persist(new_bound) {
            let reason = e.to_string();
            error!(
                target: "zinc::storage",
                index = %self.index,
                bound = new_bound,
                error = %reason,
                "Failed to persist ID lease, halting ID generation"
            );
            *self.poisoned.lock() = Some(reason.clone());
            return Err(StorageError::SequenceExhausted {
                index: self.index.clone(),
                reason,
            });
        }
        debug!(target: "zinc::storage", index = %self.index, bound = new_bound, "ID lease extended");

        let mut lease = self.lease.lock();
        lease.bound = new_bound;
        let value = lease.next;
        lease.next += 1;
        Ok(value)
    }

    /// Return the unused remainder of the lease.
    ///
    /// Persists `next` as the new bound, so a clean reopen resumes without a
    /// gap. A failure leaves the older, larger bound on disk, which is still
    /// safe.
    pub fn release<F>(&self, persist: F) -> Result<()>
    where
        F: FnOnce(u64) -> Result<()>,
    {
        let _refill = self.refill.lock();
        let next = {
            let mut lease = self.lease.lock();
            if lease.next == lease.bound {
                return Ok(());
            }
            lease.bound = lease.next;
            lease.next
        };
        persist(next)?;
        debug!(target: "zinc::storage", index = %self.index, next, "ID lease released");
        Ok(())
    }

    /// Current `(next, bound)` pair
    pub fn state(&self) -> (u64, u64) {
        let lease = self.lease.lock();
        (lease.next, lease.bound)
    }

    /// True once a lease persist has failed
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.lock().is_some()
    }

    fn take_from_lease(&self) -> Option<u64> {
        let mut lease = self.lease.lock();
        if lease.next < lease.bound {
            let value = lease.next;
            lease.next += 1;
            Some(value)
        } else {
            None
        }
    }

    fn check_poisoned(&self) -> Result<()> {
        match self.poisoned.lock().as_ref() {
            Some(reason) => Err(StorageError::SequenceExhausted {
                index: self.index.clone(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Encode a sequence bound for storage
pub fn encode_bound(bound: u64) -> [u8; 8] {
    bound.to_le_bytes()
}

/// Decode a stored sequence bound
pub fn decode_bound(bytes: &[u8]) -> Option<u64> {
    let array: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_le_bytes(array))
}
