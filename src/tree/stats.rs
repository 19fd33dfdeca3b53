//! Retry and rotation counters.
//!
//! Restarts are the cost of optimistic traversal. Counting them per operation
//! kind shows how much contention a workload produces.

use std::sync::atomic::AtomicU64;

use crate::ordering::RELAXED;

/// Live counters, bumped with relaxed increments.
#[derive(Debug, Default)]
pub(crate) struct RetryStats {
    add_retries: AtomicU64,
    remove_retries: AtomicU64,
    lookup_retries: AtomicU64,
    rotations: AtomicU64,
}

impl RetryStats {
    #[inline]
    pub(crate) fn record_add_retry(&self) {
        self.add_retries.fetch_add(1, RELAXED);
    }

    #[inline]
    pub(crate) fn record_remove_retry(&self) {
        self.remove_retries.fetch_add(1, RELAXED);
    }

    #[inline]
    pub(crate) fn record_lookup_retry(&self) {
        self.lookup_retries.fetch_add(1, RELAXED);
    }

    #[inline]
    pub(crate) fn record_rotation(&self) {
        self.rotations.fetch_add(1, RELAXED);
    }

    pub(crate) fn snapshot(&self) -> RetrySnapshot {
        RetrySnapshot {
            add_retries: self.add_retries.load(RELAXED),
            remove_retries: self.remove_retries.load(RELAXED),
            lookup_retries: self.lookup_retries.load(RELAXED),
            rotations: self.rotations.load(RELAXED),
        }
    }

    pub(crate) fn reset(&self) {
        self.add_retries.store(0, RELAXED);
        self.remove_retries.store(0, RELAXED);
        self.lookup_retries.store(0, RELAXED);
        self.rotations.store(0, RELAXED);
    }
}

/// Point-in-time copy of a tree's counters.
///
/// Counters are read one at a time, so a snapshot taken under concurrent
/// load is not atomic across fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetrySnapshot {
    /// Inserts restarted after a failed revalidation.
    pub add_retries: u64,
    /// Removes restarted after a failed revalidation or an unconfirmed miss.
    pub remove_retries: u64,
    /// `contains`/`get` walks whose miss the snapshot chain rejected.
    pub lookup_retries: u64,
    /// Single rotations performed by the AVL policy.
    pub rotations: u64,
}

impl RetrySnapshot {
    /// Restarts across all operation kinds.
    #[must_use]
    pub const fn total_retries(&self) -> u64 {
        self.add_retries + self.remove_retries + self.lookup_retries
    }
}
