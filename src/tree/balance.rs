//! Balancing policies and AVL rotations.
//!
//! [`Unbalanced`] never restructures. [`Avl`] walks upward from a modified
//! node, recomputing heights and rotating wherever a node's children differ
//! in height by two or more. Each step holds the parent and node locks (plus
//! the child and grandchild for a rotation), so rotations never race with
//! inserts or removes on the same nodes.
//!
//! Rotations touch only `left`, `right`, `parent` and `height`. The snapshot
//! chain is untouched, which is what keeps lock-free readers correct while the
//! shape moves under them.

use std::cmp::max;

use seize::LocalGuard;

use crate::compare::KeyComparator;
use crate::node::{Dir, Node, height_of, node_ref};
use crate::nodelock::LockGuard;
use crate::tracing_helpers::debug_log;

use super::PavtTree;

mod sealed {
    pub trait Sealed {}

    impl Sealed for super::Unbalanced {}
    impl Sealed for super::Avl {}
}

// ============================================================================
//  Policies
// ============================================================================

/// Balancing policy of a [`PavtTree`].
///
/// Sealed: implemented only by [`Unbalanced`] and [`Avl`].
pub trait Rebalance: sealed::Sealed + Send + Sync + 'static {
    /// Whether node heights are maintained and rotations performed.
    const MAINTAINS_HEIGHT: bool;

    /// Short name for diagnostics.
    const NAME: &'static str;
}

/// Plain binary search tree: shape follows insertion order.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbalanced;

impl Rebalance for Unbalanced {
    const MAINTAINS_HEIGHT: bool = false;
    const NAME: &'static str = "unbalanced";
}

/// AVL tree: subtree heights differ by at most one once updates quiesce.
#[derive(Debug, Clone, Copy, Default)]
pub struct Avl;

impl Rebalance for Avl {
    const MAINTAINS_HEIGHT: bool = true;
    const NAME: &'static str = "avl";
}

// ============================================================================
//  Rebalance / Rotate
// ============================================================================

/// Left height minus right height.
#[inline(always)]
fn balance_factor<K, V>(node: &Node<K, V>, guard: &LocalGuard<'_>) -> i64 {
    // SAFETY: children of a locked node, loaded under guard.
    let (left, right) = unsafe { (height_of(node.left(), guard), height_of(node.right(), guard)) };
    i64::from(left) - i64::from(right)
}

/// `1 + max(child heights)`.
#[inline(always)]
fn subtree_height<K, V>(node: &Node<K, V>, guard: &LocalGuard<'_>) -> u32 {
    // SAFETY: children of a locked node, loaded under guard.
    let (left, right) = unsafe { (height_of(node.left(), guard), height_of(node.right(), guard)) };
    1 + max(left, right)
}

impl<K, V, B, C> PavtTree<K, V, B, C>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    B: Rebalance,
    C: KeyComparator<K>,
{
    /// Restore heights and balance from `start` up toward the root.
    ///
    /// Stops early once a node's height is unchanged and it is balanced, or
    /// when the node it is working on has been deleted (the remover
    /// rebalances from the replacement instead).
    pub(super) fn rebalance(&self, start: *mut Node<K, V>, guard: &LocalGuard<'_>) {
        let mut node_ptr: *mut Node<K, V> = start;
        if node_ptr == self.root {
            return;
        }

        // SAFETY: start is a live node or the remover's replacement, under guard.
        let mut parent_ptr: *mut Node<K, V> = unsafe { node_ref(node_ptr, guard) }.parent();

        while node_ptr != self.root {
            // SAFETY: both pointers were loaded from the tree under guard.
            let node: &Node<K, V> = unsafe { node_ref(node_ptr, guard) };
            // SAFETY: see above.
            let parent: &Node<K, V> = unsafe { node_ref(parent_ptr, guard) };

            let _parent_lock: LockGuard<'_> = parent.lock();
            if node.parent() != parent_ptr {
                if node.is_deleted() {
                    return;
                }
                parent_ptr = node.parent();
                continue;
            }

            let node_lock: LockGuard<'_> = node.lock();
            if node_lock.is_deleted() {
                return;
            }

            let new_height: u32 = subtree_height(node, guard);
            let balance: i64 = balance_factor(node, guard);

            if new_height != node.height() {
                node.set_height(new_height);
            } else if balance.abs() <= 1 {
                return;
            }

            if balance.abs() < 2 {
                node_ptr = parent_ptr;
                parent_ptr = parent.parent();
                continue;
            }

            let heavy: Dir = if balance > 0 { Dir::Left } else { Dir::Right };
            let child_ptr: *mut Node<K, V> = node.child(heavy);
            // SAFETY: the heavy side of an unbalanced locked node is non-empty.
            let child: &Node<K, V> = unsafe { node_ref(child_ptr, guard) };
            let _child_lock: LockGuard<'_> = child.lock();

            let child_balance: i64 = balance_factor(child, guard);
            let zig_zag: bool = match heavy {
                Dir::Left => child_balance < 0,
                Dir::Right => child_balance > 0,
            };

            if zig_zag {
                let grand_ptr: *mut Node<K, V> = child.child(heavy.opposite());
                // SAFETY: the inner side of a child leaning inward is non-empty.
                let grand: &Node<K, V> = unsafe { node_ref(grand_ptr, guard) };
                let _grand_lock: LockGuard<'_> = grand.lock();

                self.rotate(grand_ptr, child_ptr, node_ptr, guard);
                self.rotate(grand_ptr, node_ptr, parent_ptr, guard);
            } else {
                self.rotate(child_ptr, node_ptr, parent_ptr, guard);
            }

            // The pivot's height is already fresh, so resuming from it would
            // stop early. The parent may have lost height and must be checked.
            node_ptr = parent_ptr;
            parent_ptr = parent.parent();
        }
    }

    /// Lift `child` above `node`, hanging it under `parent` in `node`'s slot.
    ///
    /// Caller holds the locks of all three nodes.
    fn rotate(
        &self,
        child_ptr: *mut Node<K, V>,
        node_ptr: *mut Node<K, V>,
        parent_ptr: *mut Node<K, V>,
        guard: &LocalGuard<'_>,
    ) {
        // SAFETY: all three are locked by the caller and loaded under guard.
        let (child, node, parent) = unsafe {
            (
                node_ref(child_ptr, guard),
                node_ref(node_ptr, guard),
                node_ref(parent_ptr, guard),
            )
        };

        let side: Dir = node.side_of(child_ptr);
        let slot: Dir = parent.side_of(node_ptr);

        parent.set_child(slot, child_ptr);
        child.set_parent(parent_ptr);
        node.set_parent(child_ptr);

        // The child's inner subtree crosses over to `node`.
        let inner_ptr: *mut Node<K, V> = child.child(side.opposite());
        node.set_child(side, inner_ptr);
        if !inner_ptr.is_null() {
            // SAFETY: child of a locked node, loaded under guard.
            unsafe { node_ref(inner_ptr, guard) }.set_parent(node_ptr);
        }
        child.set_child(side.opposite(), node_ptr);

        let node_height: u32 = subtree_height(node, guard);
        node.set_height(node_height);
        // SAFETY: child of a locked node, loaded under guard.
        let outer_height: u32 = unsafe { height_of(child.child(side), guard) };
        child.set_height(1 + max(node_height, outer_height));

        self.stats.record_rotation();
        debug_log!(pivot = ?child_ptr, below = ?node_ptr, "rotate");
    }
}
