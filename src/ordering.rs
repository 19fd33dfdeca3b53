//! Standard memory orderings for concurrent node access.
//!
//! These constants keep ordering choices consistent across the codebase and
//! make the intent clear at each access point.

use std::sync::atomic::Ordering;

/// Ordering for loading tree-shape and snapshot-chain links.
///
/// Link updates must form a single total order observed identically by all
/// threads: a reader that misses a key in the tree shape decides presence from
/// the chain, and that decision has to agree with the order in which writers
/// published their splices.
pub const LINK_LOAD: Ordering = Ordering::SeqCst;

/// Ordering for storing tree-shape and snapshot-chain links.
/// Pairs with [`LINK_LOAD`].
pub const LINK_STORE: Ordering = Ordering::SeqCst;

/// Ordering for setting and reading the deleted flag.
pub const DELETED_ORD: Ordering = Ordering::SeqCst;

/// Ordering for a successful lock acquisition CAS.
pub const LOCK_ACQUIRE: Ordering = Ordering::Acquire;

/// Ordering for a failed lock acquisition CAS.
/// Only need to see the current value.
pub const LOCK_FAILURE: Ordering = Ordering::Relaxed;

/// Ordering for lock release.
/// Must make every write of the critical section visible to the next owner.
pub const UNLOCK_ORD: Ordering = Ordering::Release;

/// Ordering for relaxed loads (within locked region).
/// Safe because the lock provides synchronization.
pub const RELAXED: Ordering = Ordering::Relaxed;
