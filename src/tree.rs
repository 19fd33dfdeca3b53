//! Filepath: src/tree.rs
//! `PavtTree` - a concurrent search tree whose reads are validated by a
//! sorted snapshot chain.
//!
//! This module provides the main [`PavtTree`] type and the [`PavtBst`] /
//! [`PavtAvl`] aliases.

use std::cmp::Ordering;
use std::fmt as StdFmt;
use std::marker::PhantomData;
use std::sync::Arc;

use seize::{Collector, Guard, LocalGuard};

use crate::compare::{KeyComparator, NaturalOrder};
use crate::node::{Dir, Node};
use crate::reclaim::{reclaim_node_boxed, teardown_tree};

mod balance;
mod insert;
mod remove;
mod stats;
mod traverse;
mod verify;


pub use balance::{Avl, Rebalance, Unbalanced};
pub use stats::RetrySnapshot;

use stats::RetryStats;

// ============================================================================
//  TreeError
// ============================================================================

/// Errors that can occur when constructing a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// The lower bound does not compare strictly less than the upper bound.
    InvalidBounds,
}

impl StdFmt::Display for TreeError {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        match self {
            Self::InvalidBounds => {
                write!(f, "sentinel bounds must satisfy min < max")
            }
        }
    }
}

impl std::error::Error for TreeError {}

// ============================================================================
//  PavtTree
// ============================================================================

/// A concurrent ordered map with lock-free reads and per-node locked writes.
///
/// Structure:
///
/// ```text
///   floor (min sentinel)
///       \
///        root (max sentinel)
///       /
///   ... live keys ...
/// ```
///
/// Every live key also sits on the snapshot chain
/// `floor <-> k1 <-> k2 <-> ... <-> root`, which is the source of truth for
/// presence. The tree shape is only a search hint that rotations may move
/// under a reader's feet.
///
/// # Type Parameters
///
/// - `K` - Key type, ordered by `C`
/// - `V` - Value type, stored and returned as `Arc<V>`
/// - `B` - Balancing policy: [`Avl`] (default) or [`Unbalanced`]
/// - `C` - Comparator: [`NaturalOrder`] (default) or any `Fn(&K, &K) -> Ordering`
///
/// # Example
///
/// ```rust
/// use pavt::PavtAvl;
///
/// let tree: PavtAvl<u64, &str> = PavtAvl::new(0, u64::MAX).unwrap();
///
/// assert!(tree.add(5, "a").is_none());
/// assert!(tree.add(3, "b").is_none());
/// assert!(tree.add(8, "c").is_none());
/// assert_eq!(tree.size(), 3);
/// assert!(tree.contains(&5));
///
/// assert_eq!(tree.remove(&3).as_deref(), Some(&"b"));
/// assert!(!tree.contains(&3));
/// assert!(tree.check());
/// ```
pub struct PavtTree<K, V, B = Avl, C = NaturalOrder> {
    /// Memory reclamation collector for safe concurrent access.
    collector: Collector,

    /// Max sentinel. Every live key lives in its left subtree.
    root: *mut Node<K, V>,

    /// Min sentinel. Head of the snapshot chain; `floor.right == root`.
    floor: *mut Node<K, V>,

    comparator: C,

    stats: RetryStats,

    _policy: PhantomData<fn() -> B>,
}

/// Unbalanced concurrent binary search tree.
pub type PavtBst<K, V, C = NaturalOrder> = PavtTree<K, V, Unbalanced, C>;

/// Self-balancing concurrent AVL tree.
pub type PavtAvl<K, V, C = NaturalOrder> = PavtTree<K, V, Avl, C>;

// SAFETY: the raw sentinel pointers are owned by the tree and only freed in
// Drop. Every other node is shared through atomics and reclaimed through the
// collector, so the tree is as thread-safe as its keys, values and comparator.
unsafe impl<K: Send + Sync, V: Send + Sync, B, C: Send> Send for PavtTree<K, V, B, C> {}

// SAFETY: see the Send impl; all shared mutation goes through node locks and
// atomic links.
unsafe impl<K: Send + Sync, V: Send + Sync, B, C: Sync> Sync for PavtTree<K, V, B, C> {}

impl<K, V, B, C> StdFmt::Debug for PavtTree<K, V, B, C>
where
    B: Rebalance,
{
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("PavtTree")
            .field("policy", &B::NAME)
            .field("root", &self.root)
            .field("floor", &self.floor)
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

impl<K, V, B, C> Drop for PavtTree<K, V, B, C> {
    fn drop(&mut self) {
        // No concurrent access is possible here (Drop requires unique access).
        // floor.right == root and root.left holds every live node, so one walk
        // frees the whole shape. Retired nodes are freed when the collector drops.
        // SAFETY: exclusive access; all reachable nodes are live Box allocations.
        unsafe { teardown_tree(self.floor) };
    }
}

// ============================================================================
//  Constructors
// ============================================================================

impl<K, V, B> PavtTree<K, V, B, NaturalOrder>
where
    K: Ord + Send + Sync + 'static,
    V: Send + Sync + 'static,
    B: Rebalance,
{
    /// Create an empty tree ordered by `K`'s [`Ord`] impl.
    ///
    /// `min` and `max` become permanent sentinels. Every key later passed to
    /// the tree must lie strictly between them.
    ///
    /// # Errors
    ///
    /// [`TreeError::InvalidBounds`] if `min >= max`.
    pub fn new(min: K, max: K) -> Result<Self, TreeError> {
        Self::with_comparator(min, max, NaturalOrder)
    }
}

impl<K, V, B, C> PavtTree<K, V, B, C>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    B: Rebalance,
    C: KeyComparator<K>,
{
    /// Create an empty tree ordered by `comparator`.
    ///
    /// # Errors
    ///
    /// [`TreeError::InvalidBounds`] if `min` does not compare strictly less
    /// than `max`.
    pub fn with_comparator(min: K, max: K, comparator: C) -> Result<Self, TreeError> {
        if comparator.compare(&min, &max) != Ordering::Less {
            return Err(TreeError::InvalidBounds);
        }

        let floor: *mut Node<K, V> = Box::into_raw(Node::sentinel(min));
        let root: *mut Node<K, V> = Box::into_raw(Node::sentinel(max));

        // SAFETY: both sentinels were just allocated and are not shared yet.
        unsafe {
            (*floor).set_child(Dir::Right, root);
            (*floor).set_link(Dir::Right, root);
            (*root).set_parent(floor);
            (*root).set_link(Dir::Left, floor);
        }

        Ok(Self {
            collector: Collector::new(),
            root,
            floor,
            comparator,
            stats: RetryStats::default(),
            _policy: PhantomData,
        })
    }

    /// Enter a protected region and return a guard.
    ///
    /// Nodes loaded while the guard is alive are not reclaimed until it
    /// drops. Use it with the `*_with_guard` methods to amortize guard
    /// entry across many operations. The guard must come from this tree.
    #[must_use]
    #[inline(always)]
    pub fn guard(&self) -> LocalGuard<'_> {
        self.collector.enter()
    }

    /// Insert `key` if absent.
    ///
    /// Returns the value already stored under `key` (leaving it untouched),
    /// or `None` if `key` was inserted.
    pub fn add(&self, key: K, value: V) -> Option<Arc<V>> {
        let guard = self.guard();
        self.add_with_guard(key, value, &guard)
    }

    /// Remove `key`, returning its value, or `None` if absent.
    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        let guard = self.guard();
        self.remove_with_guard(key, &guard)
    }

    /// Whether `key` is present. Never takes a lock.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        let guard = self.guard();
        self.contains_with_guard(key, &guard)
    }

    /// The value stored under `key`, if any. Never takes a lock.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let guard = self.guard();
        self.get_with_guard(key, &guard)
    }

    /// Whether the tree holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root_node().left().is_null()
    }

    /// The comparator ordering this tree.
    #[must_use]
    pub const fn comparator(&self) -> &C {
        &self.comparator
    }

    /// Snapshot of the retry and rotation counters.
    #[must_use]
    pub fn stats(&self) -> RetrySnapshot {
        self.stats.snapshot()
    }

    /// Zero the retry and rotation counters.
    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    // ========================================================================
    //  Internal Helpers
    // ========================================================================

    #[inline(always)]
    fn cmp(&self, lhs: &K, rhs: &K) -> Ordering {
        self.comparator.compare(lhs, rhs)
    }

    #[inline(always)]
    const fn root_node(&self) -> &Node<K, V> {
        // SAFETY: sentinels live as long as the tree.
        unsafe { &*self.root }
    }

    #[inline(always)]
    const fn floor_node(&self) -> &Node<K, V> {
        // SAFETY: sentinels live as long as the tree.
        unsafe { &*self.floor }
    }

    /// Keys must lie strictly between the sentinels. Not enforced in release
    /// builds.
    #[inline(always)]
    fn debug_assert_in_bounds(&self, key: &K) {
        debug_assert!(
            self.cmp(self.floor_node().key(), key) == Ordering::Less
                && self.cmp(key, self.root_node().key()) == Ordering::Less,
            "key outside the tree's sentinel bounds"
        );
    }

    /// Run the balancing policy upward from `node`, if the policy has one.
    #[inline(always)]
    fn rebalance_from(&self, node: *mut Node<K, V>, guard: &LocalGuard<'_>) {
        if B::MAINTAINS_HEIGHT {
            self.rebalance(node, guard);
        }
    }

    /// Hand a logically deleted, fully unlinked node to the collector.
    ///
    /// # Safety
    ///
    /// `node` must be unreachable from any live node and must be retired
    /// exactly once, through a guard that belongs to this tree.
    unsafe fn retire(&self, node: *mut Node<K, V>, guard: &LocalGuard<'_>) {
        // SAFETY: caller guarantees the node is unlinked and retired once.
        unsafe { guard.defer_retire(node, reclaim_node_boxed::<K, V>) };
    }
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Fail fast in tests")]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    // ========================================================================
    // Send/Sync Verification
    // ========================================================================

    fn _assert_send_sync()
    where
        PavtAvl<u64, String>: Send + Sync,
        PavtBst<String, u64>: Send + Sync,
    {
    }

    fn avl() -> PavtAvl<i64, &'static str> {
        PavtAvl::new(i64::MIN, i64::MAX).unwrap()
    }

    fn bst() -> PavtBst<i64, &'static str> {
        PavtBst::new(i64::MIN, i64::MAX).unwrap()
    }

    // ========================================================================
    //  Construction
    // ========================================================================

    #[test]
    fn test_new_tree_is_empty() {
        let tree = avl();
        assert!(tree.is_empty());
        assert_eq!(tree.size(), 0);
        assert!(tree.check());
        assert!(tree.check_structure());
        assert_eq!(tree.height(), 0);
    }

    #[test]
    fn test_invalid_bounds_rejected() {
        let equal: Result<PavtAvl<u64, u64>, _> = PavtAvl::new(5, 5);
        assert_eq!(equal.unwrap_err(), TreeError::InvalidBounds);

        let inverted: Result<PavtBst<u64, u64>, _> = PavtBst::new(10, 1);
        assert_eq!(inverted.unwrap_err(), TreeError::InvalidBounds);
    }

    #[test]
    fn test_tree_error_display() {
        let err = TreeError::InvalidBounds;
        assert_eq!(format!("{err}"), "sentinel bounds must satisfy min < max");
    }

    #[test]
    fn test_debug_names_policy() {
        let rendered = format!("{:?}", avl());
        assert!(rendered.contains("PavtTree"));
        assert!(rendered.contains("avl"));

        let rendered = format!("{:?}", bst());
        assert!(rendered.contains("unbalanced"));
    }

    // ========================================================================
    //  Concrete Scenario
    // ========================================================================

    fn scenario<B: Rebalance>(tree: &PavtTree<i64, &'static str, B>) {
        assert!(tree.add(5, "a").is_none());
        assert!(tree.add(3, "b").is_none());
        assert!(tree.add(8, "c").is_none());

        assert_eq!(tree.size(), 3);
        assert!(tree.contains(&5));
        assert!(tree.check());

        assert_eq!(*tree.remove(&3).unwrap(), "b");
        assert!(!tree.contains(&3));
        assert_eq!(tree.size(), 2);
        assert!(tree.check());
        assert!(tree.check_structure());
    }

    #[test]
    fn test_scenario_avl() {
        scenario(&avl());
    }

    #[test]
    fn test_scenario_bst() {
        scenario(&bst());
    }

    // ========================================================================
    //  Insert
    // ========================================================================

    #[test]
    fn test_add_is_idempotent() {
        let tree = avl();

        assert!(tree.add(7, "first").is_none());
        let prior = tree.add(7, "second");

        assert_eq!(*prior.unwrap(), "first");
        assert_eq!(*tree.get(&7).unwrap(), "first");
        assert_eq!(tree.size(), 1);
    }

    #[test]
    fn test_get_missing() {
        let tree = bst();
        tree.add(1, "one");

        assert!(tree.get(&2).is_none());
        assert!(tree.get(&0).is_none());
        assert_eq!(*tree.get(&1).unwrap(), "one");
    }

    #[test]
    fn test_add_ascending_stays_balanced() {
        let tree: PavtAvl<u64, u64> = PavtAvl::new(0, u64::MAX).unwrap();

        for i in 1..=1023 {
            assert!(tree.add(i, i * 10).is_none());
        }

        assert_eq!(tree.size(), 1023);
        assert!(tree.check());
        assert!(tree.check_structure());
        // A perfect tree over 1023 keys has height 10; AVL allows ~1.44x.
        assert!(tree.height() <= 15, "height {}", tree.height());
        assert!(tree.stats().rotations > 0);
    }

    #[test]
    fn test_add_ascending_bst_degenerates() {
        let tree: PavtBst<u64, u64> = PavtBst::new(0, u64::MAX).unwrap();

        for i in 1..=64 {
            tree.add(i, i);
        }

        assert_eq!(tree.height(), 64);
        assert_eq!(tree.stats().rotations, 0);
        assert!(tree.check());
        assert!(tree.check_structure());
    }

    // ========================================================================
    //  Remove
    // ========================================================================

    #[test]
    fn test_remove_absent() {
        let tree = avl();
        tree.add(10, "ten");
        tree.add(20, "twenty");

        assert!(tree.remove(&15).is_none());
        assert!(tree.remove(&99).is_none());
        assert_eq!(tree.size(), 2);
        assert!(tree.check());

        assert!(tree.remove(&10).is_some());
        assert!(tree.remove(&10).is_none());
        assert_eq!(tree.size(), 1);
        assert!(tree.check());
    }

    #[test]
    fn test_remove_leaf_single_and_double_child() {
        let tree = bst();
        //        50
        //      /    \
        //    30      70
        //   /       /  \
        //  20     60    80
        //                 \
        //                  90
        for key in [50, 30, 70, 20, 60, 80, 90] {
            tree.add(key, "v");
        }
        assert!(tree.check_structure());

        // Leaf
        assert!(tree.remove(&60).is_some());
        assert!(tree.check() && tree.check_structure());

        // Single child (left)
        assert!(tree.remove(&30).is_some());
        assert!(tree.check() && tree.check_structure());

        // Single child (right)
        assert!(tree.remove(&80).is_some());
        assert!(tree.check() && tree.check_structure());

        // Two children, successor is the right child
        assert!(tree.remove(&50).is_some());
        assert!(tree.check() && tree.check_structure());

        let remaining: Vec<i64> = [20, 30, 50, 60, 70, 80, 90]
            .into_iter()
            .filter(|key| tree.contains(key))
            .collect();
        assert_eq!(remaining, vec![20, 70, 90]);
        assert_eq!(tree.size(), 3);
    }

    #[test]
    fn test_remove_two_children_deep_successor() {
        let tree = bst();
        //      50
        //    /    \
        //  20      80
        //         /  \
        //       60    90
        //         \
        //          70
        for key in [50, 20, 80, 60, 90, 70] {
            tree.add(key, "v");
        }

        // Successor 60 sits under 80 and has a right child 70.
        assert_eq!(*tree.remove(&50).unwrap(), "v");
        assert!(tree.check());
        assert!(tree.check_structure());
        assert_eq!(tree.size(), 5);
        for key in [20, 60, 70, 80, 90] {
            assert!(tree.contains(&key), "lost {key}");
        }
    }

    #[test]
    fn test_avl_two_children_delete_rebalances_both_sites() {
        let tree: PavtAvl<u64, u64> = PavtAvl::new(0, u64::MAX).unwrap();
        for i in 1..=200 {
            tree.add(i, i);
        }

        // Internal nodes with two children and successors deep on the right.
        for i in (2..=200).step_by(3) {
            assert_eq!(tree.remove(&i).map(|v| *v), Some(i));
            assert!(tree.check_structure(), "unbalanced after removing {i}");
        }
        assert!(tree.check());
    }

    /// A delete that rotates deep in the tree must keep walking upward: the
    /// rotated subtree lost height, and 40 above it ends up two short.
    #[test]
    fn test_avl_delete_rotation_rebalances_ancestors() {
        let tree = avl();
        let keys = [
            0, 32, 22, 40, 51, 1, 2, 3, 23, 41, 52, 24, 53, 42, 25, 54, -1, -2, -3, 55,
        ];
        for key in keys {
            assert!(tree.add(key, "v").is_none());
        }
        assert!(tree.check_structure());

        assert!(tree.remove(&22).is_some());

        assert!(tree.check());
        assert!(tree.check_structure());
        assert_eq!(tree.size(), keys.len() - 1);
        assert!(tree.height() <= 5, "height {}", tree.height());
    }

    /// Removing a node whose successor is its right child: the successor
    /// takes over the node's height so the ancestors see the subtree shrink.
    #[test]
    fn test_avl_delete_right_child_successor_rebalances_ancestors() {
        let tree = avl();
        let keys = [
            -50, 3, 4, 5, 14, -28, 15, 0, -2, -41, -20, -3, -51, -4, 6, -1, 16, 7, -29, -5,
        ];
        for key in keys {
            assert!(tree.add(key, "v").is_none());
        }
        assert!(tree.check_structure());

        assert!(tree.remove(&-50).is_some());

        assert!(tree.check());
        assert!(tree.check_structure());
        assert_eq!(tree.size(), keys.len() - 1);
        for key in keys.into_iter().filter(|&k| k != -50) {
            assert!(tree.contains(&key), "lost {key}");
        }
    }

    #[test]
    fn test_remove_everything_then_reuse() {
        let tree = avl();
        for key in 0..100 {
            tree.add(key, "x");
        }
        for key in 0..100 {
            assert!(tree.remove(&key).is_some());
        }
        assert!(tree.is_empty());
        assert_eq!(tree.size(), 0);
        assert!(tree.check());

        assert!(tree.add(42, "again").is_none());
        assert!(tree.contains(&42));
    }

    // ========================================================================
    //  Comparators
    // ========================================================================

    #[test]
    fn test_custom_comparator_reverse_order() {
        let reverse = |a: &i32, b: &i32| b.cmp(a);
        // Under the reversed order, 100 is the minimum and -100 the maximum.
        let tree: PavtAvl<i32, i32, _> = PavtAvl::with_comparator(100, -100, reverse).unwrap();

        for key in -50..50 {
            tree.add(key, key);
        }
        assert!(tree.check());
        assert!(tree.check_structure());
        assert_eq!(tree.size(), 100);
        assert!(tree.contains(&-50));
    }

    #[test]
    fn test_string_keys() {
        let tree: PavtAvl<String, usize> =
            PavtAvl::new(String::new(), "\u{10FFFF}".to_string()).unwrap();

        for (i, word) in ["pear", "apple", "fig", "kiwi", "banana"].iter().enumerate() {
            tree.add((*word).to_string(), i);
        }

        assert_eq!(*tree.get(&"fig".to_string()).unwrap(), 2);
        assert_eq!(*tree.remove(&"apple".to_string()).unwrap(), 1);
        assert!(tree.check());
    }

    // ========================================================================
    //  Reclamation
    // ========================================================================

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, AtomicOrdering::Relaxed);
        }
    }

    #[test]
    fn test_every_value_dropped_exactly_once() {
        let drops = Arc::new(AtomicUsize::new(0));

        {
            let tree: PavtAvl<u64, DropCounter> = PavtAvl::new(0, u64::MAX).unwrap();
            for key in 1..=100 {
                tree.add(key, DropCounter(Arc::clone(&drops)));
            }

            // Rejected duplicate values are dropped right away.
            tree.add(1, DropCounter(Arc::clone(&drops)));
            assert_eq!(drops.load(AtomicOrdering::Relaxed), 1);

            for key in (1..=100).step_by(2) {
                let removed = tree.remove(&key);
                assert!(removed.is_some());
            }
        }

        assert_eq!(drops.load(AtomicOrdering::Relaxed), 101);
    }

    #[test]
    fn test_stats_count_and_reset() {
        let tree: PavtAvl<u64, ()> = PavtAvl::new(0, u64::MAX).unwrap();
        for i in 1..=32 {
            tree.add(i, ());
        }
        assert!(tree.stats().rotations > 0);

        tree.reset_stats();
        assert_eq!(tree.stats(), RetrySnapshot::default());
    }
}
