//! Key ordering for the tree.
//!
//! Every tree is parameterized by a [`KeyComparator`]. [`NaturalOrder`] uses
//! the key's own [`Ord`] impl; any `Fn(&K, &K) -> Ordering` closure that is
//! `Send + Sync` also works, for keys that are not `Ord` or need a custom order.
//!
//! The comparator must be a total order over every key ever passed to the
//! tree, including the two sentinel bounds. Violating that is a caller
//! precondition error and is not detected.
//!
//! ```rust
//! use std::cmp::Ordering;
//! use pavt::compare::{KeyComparator, NaturalOrder};
//!
//! assert_eq!(NaturalOrder.compare(&1, &2), Ordering::Less);
//!
//! let by_len = |a: &&str, b: &&str| a.len().cmp(&b.len());
//! assert_eq!(by_len.compare(&"aaa", &"b"), Ordering::Greater);
//! ```

use std::cmp::Ordering;

/// A total order over keys of type `K`.
///
/// Shared across threads by every operation on the tree, hence `Send + Sync`.
pub trait KeyComparator<K: ?Sized>: Send + Sync {
    /// Compare `lhs` with `rhs`.
    fn compare(&self, lhs: &K, rhs: &K) -> Ordering;
}

/// Orders keys by their [`Ord`] implementation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NaturalOrder;

impl<K: Ord + ?Sized> KeyComparator<K> for NaturalOrder {
    #[inline(always)]
    fn compare(&self, lhs: &K, rhs: &K) -> Ordering {
        lhs.cmp(rhs)
    }
}

impl<K: ?Sized, F> KeyComparator<K> for F
where
    F: Fn(&K, &K) -> Ordering + Send + Sync,
{
    #[inline(always)]
    fn compare(&self, lhs: &K, rhs: &K) -> Ordering {
        self(lhs, rhs)
    }
}
