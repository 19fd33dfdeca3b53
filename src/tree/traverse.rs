//! Lock-free descent and snapshot-chain validation.
//!
//! A reader walks the tree shape without locks. If it lands on the key it is
//! done. If it falls off the tree, the shape may have rotated underneath it,
//! so the miss is confirmed against the snapshot chain: the last node where
//! the walk turned left has a `pred`, the last node where it turned right
//! has a `succ`, and the key must fall strictly inside that gap. Otherwise the
//! reader retries from the root.

use std::cmp::Ordering;
use std::sync::Arc;

use seize::LocalGuard;

use crate::compare::KeyComparator;
use crate::node::{Dir, Node, node_ref};
use crate::tracing_helpers::trace_log;

use super::{PavtTree, Rebalance};

/// Where a descent stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Outcome {
    /// The node holds the key.
    Hit,
    /// The node's child slot on this side is empty.
    Miss(Dir),
}

/// Result of one root-to-leaf walk.
pub(super) struct Descent<K, V> {
    pub(super) node: *mut Node<K, V>,
    pub(super) outcome: Outcome,
    /// Last node the walk left through its left child.
    pub(super) last_left: *mut Node<K, V>,
    /// Last node the walk left through its right child.
    pub(super) last_right: *mut Node<K, V>,
}

impl<K, V, B, C> PavtTree<K, V, B, C>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    B: Rebalance,
    C: KeyComparator<K>,
{
    /// Walk the tree shape toward `key` without taking locks.
    ///
    /// Every key is below the max sentinel, so the walk starts by going left
    /// from the root.
    pub(super) fn descend(&self, key: &K, guard: &LocalGuard<'_>) -> Descent<K, V> {
        let mut node_ptr: *mut Node<K, V> = self.root;
        let mut last_left: *mut Node<K, V> = self.root;
        let mut last_right: *mut Node<K, V> = self.floor;
        let mut dir = Dir::Left;

        loop {
            // SAFETY: node_ptr is the root sentinel or a child loaded under guard.
            let node: &Node<K, V> = unsafe { node_ref(node_ptr, guard) };

            match dir {
                Dir::Left => last_left = node_ptr,
                Dir::Right => last_right = node_ptr,
            }

            let child_ptr: *mut Node<K, V> = node.child(dir);
            if child_ptr.is_null() {
                return Descent {
                    node: node_ptr,
                    outcome: Outcome::Miss(dir),
                    last_left,
                    last_right,
                };
            }

            // SAFETY: non-null child loaded under guard.
            let child: &Node<K, V> = unsafe { node_ref(child_ptr, guard) };
            node_ptr = child_ptr;

            match self.cmp(key, child.key()) {
                Ordering::Less => dir = Dir::Left,
                Ordering::Greater => dir = Dir::Right,
                Ordering::Equal => {
                    return Descent {
                        node: node_ptr,
                        outcome: Outcome::Hit,
                        last_left,
                        last_right,
                    };
                }
            }
        }
    }

    /// Whether `key` lies strictly inside the gap between a node and its
    /// chain neighbour on `dir`'s side.
    ///
    /// For `Left` the neighbour is a predecessor, so `key` must be above it;
    /// for `Right` it is a successor, so `key` must be below it.
    #[inline(always)]
    pub(super) fn inside_gap(&self, key: &K, neighbor: &Node<K, V>, dir: Dir) -> bool {
        let order: Ordering = self.cmp(key, neighbor.key());
        match dir {
            Dir::Left => order == Ordering::Greater,
            Dir::Right => order == Ordering::Less,
        }
    }

    /// Confirm a miss against the snapshot chain.
    ///
    /// Returns `false` when the walk may have been misled by a concurrent
    /// restructuring and must be retried.
    pub(super) fn miss_confirmed(
        &self,
        key: &K,
        descent: &Descent<K, V>,
        dir: Dir,
        guard: &LocalGuard<'_>,
    ) -> bool {
        let bound: *mut Node<K, V> = match dir {
            Dir::Left => descent.last_left,
            Dir::Right => descent.last_right,
        };

        // SAFETY: bound was visited during the descent under guard.
        let neighbor_ptr: *mut Node<K, V> = unsafe { node_ref(bound, guard) }.link(dir);

        // Only the sentinels have a null link on their outer side.
        if neighbor_ptr.is_null() {
            return true;
        }

        // SAFETY: non-null chain link loaded under guard.
        let neighbor: &Node<K, V> = unsafe { node_ref(neighbor_ptr, guard) };
        self.inside_gap(key, neighbor, dir)
    }

    /// Locate the node holding `key`, retrying until the answer is validated.
    fn find(&self, key: &K, guard: &LocalGuard<'_>) -> Option<*mut Node<K, V>> {
        self.debug_assert_in_bounds(key);

        loop {
            let descent: Descent<K, V> = self.descend(key, guard);

            match descent.outcome {
                Outcome::Hit => return Some(descent.node),
                Outcome::Miss(dir) => {
                    if self.miss_confirmed(key, &descent, dir, guard) {
                        return None;
                    }

                    self.stats.record_lookup_retry();
                    trace_log!(node = ?descent.node, "lookup: chain rejected miss, retrying");
                }
            }
        }
    }

    /// [`contains`](Self::contains) with an explicit guard.
    #[must_use]
    pub fn contains_with_guard(&self, key: &K, guard: &LocalGuard<'_>) -> bool {
        self.find(key, guard).is_some()
    }

    /// [`get`](Self::get) with an explicit guard.
    #[must_use]
    pub fn get_with_guard(&self, key: &K, guard: &LocalGuard<'_>) -> Option<Arc<V>> {
        let node_ptr: *mut Node<K, V> = self.find(key, guard)?;

        // SAFETY: found under guard.
        unsafe { node_ref(node_ptr, guard) }.value().cloned()
    }
}
