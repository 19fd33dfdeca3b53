//! Filepath: src/nodelock.rs
//!
//! Per-node lock with an embedded deleted flag.
//!
//! [`NodeLock`] packs the lock bit and the logical-deletion flag into a single
//! `u32`. Readers never touch the lock; they only test the deleted flag.
//! Writers acquire the lock, revalidate, mutate, and let the guard drop.
//!
//! # Concurrency Model
//! 1. Readers: traverse without locking, call `is_deleted()` where needed.
//! 2. Writers: call `lock()` to get a [`LockGuard`], modify the node, let the guard drop.
//!
//! # Type-State Pattern
//! The [`LockGuard`] type provides compile-time proof that the lock is held.
//! Only a guard can mark a node deleted. The guard unlocks on drop (panic-safe).
//!
//! ```rust
//! use pavt::nodelock::NodeLock;
//!
//! let lock = NodeLock::new();
//! {
//!     let mut guard = lock.lock();
//!     guard.mark_deleted();
//!     // Lock released when guard drops
//! }
//! assert!(lock.is_deleted());
//! assert!(!lock.is_locked());
//! ```

use std::marker::PhantomData;
use std::sync::atomic::AtomicU32;

use crate::ordering::{DELETED_ORD, LOCK_ACQUIRE, LOCK_FAILURE, RELAXED, UNLOCK_ORD};

// ============================================================================
//  Bit Constants
// ============================================================================

/// Lock bit: node is locked for modification.
const LOCK_BIT: u32 = 1 << 0;

/// Deleted bit: node is logically removed from the map. Never cleared.
const DELETED_BIT: u32 = 1 << 1;

/// Spins with `spin_loop` before falling back to `yield_now`.
const SPIN_LIMIT: u32 = 64;

// ============================================================================
//  NodeLock
// ============================================================================

/// A spinning mutual-exclusion lock embedded in every tree node.
///
/// # Layout
/// Bit 1: `deleted` | Bit 0: `locked`
///
/// # Example
///
/// ```rust
/// use pavt::nodelock::NodeLock;
///
/// let lock = NodeLock::new();
///
/// assert!(!lock.is_locked());
/// assert!(!lock.is_deleted());
/// ```
#[derive(Debug)]
pub struct NodeLock {
    value: AtomicU32,
}

// ============================================================================
//  LockGuard (Type-State Pattern)
// ============================================================================

/// Proof that a [`NodeLock`] is held.
///
/// Cannot be constructed except by calling [`NodeLock::lock()`] or
/// [`NodeLock::try_lock()`]. The lock is released when the guard drops.
///
/// # Thread Safety
/// Guards are `!Send` and `!Sync` via `PhantomData<*mut ()>`: a lock must be
/// released by the thread that acquired it.
#[derive(Debug)]
#[must_use = "releasing a lock without using the guard is a logic error"]
pub struct LockGuard<'a> {
    lock: &'a NodeLock,

    // PhantomData<*mut ()> makes this type !Send + !Sync
    _marker: PhantomData<*mut ()>,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        // Clears only the lock bit; the deleted bit is sticky.
        self.lock.value.fetch_and(!LOCK_BIT, UNLOCK_ORD);
    }
}

impl LockGuard<'_> {
    /// Mark the node as logically deleted.
    ///
    /// The flag is published immediately and survives the unlock.
    #[inline]
    pub fn mark_deleted(&mut self) {
        self.lock.value.fetch_or(DELETED_BIT, DELETED_ORD);
    }

    /// Check the deleted flag while holding the lock.
    #[inline]
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.lock.is_deleted()
    }
}

impl NodeLock {
    /// Create an unlocked, live node lock.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            value: AtomicU32::new(0),
        }
    }

    // ========================================================================
    //  Flag Accessors
    // ========================================================================

    /// Check if this node is logically deleted.
    #[inline]
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        (self.value.load(DELETED_ORD) & DELETED_BIT) != 0
    }

    /// Check if this node is locked.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        (self.value.load(RELAXED) & LOCK_BIT) != 0
    }

    /// Get the raw lock word.
    #[inline]
    #[must_use]
    pub fn value(&self) -> u32 {
        self.value.load(RELAXED)
    }

    // ========================================================================
    //  Lock Operations (Type-State Pattern)
    // ========================================================================

    /// Acquire the lock, spinning until it is free, and return a guard.
    ///
    /// Back-off: up to [`SPIN_LIMIT`] rounds of `spin_loop`, then
    /// `yield_now` between attempts. Deleted nodes can still be locked; callers
    /// revalidate with [`LockGuard::is_deleted()`].
    #[must_use = "releasing a lock without using the guard is a logic error"]
    pub fn lock(&self) -> LockGuard<'_> {
        let mut spins: u32 = 0;

        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }

            if spins < SPIN_LIMIT {
                spins += 1;
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
    }

    /// Try to acquire the lock without blocking.
    ///
    /// # Returns
    /// `Some(guard)` if the lock was acquired, `None` if it is held.
    #[must_use]
    pub fn try_lock(&self) -> Option<LockGuard<'_>> {
        let value: u32 = self.value.load(RELAXED);

        if (value & LOCK_BIT) != 0 {
            return None;
        }

        self.value
            .compare_exchange_weak(value, value | LOCK_BIT, LOCK_ACQUIRE, LOCK_FAILURE)
            .ok()
            .map(|_| LockGuard {
                lock: self,
                _marker: PhantomData,
            })
    }
}

impl Default for NodeLock {
    fn default() -> Self {
        Self::new()
    }
}
