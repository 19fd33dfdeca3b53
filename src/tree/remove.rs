//! Remove.
//!
//! Locks are always taken parent before child and predecessor before
//! successor along the shape, and every lock is followed by a revalidation
//! of the links that justified taking it. Any mismatch restarts the whole
//! operation from the root.
//!
//! Three shapes:
//!
//! - **Leaf**: clear the parent's slot; the parent takes over the node's
//!   chain link on that side.
//! - **One child**: the child moves up into the node's slot.
//! - **Two children**: the successor moves into the node's position. When
//!   the successor is the node's right child it simply moves up; otherwise it
//!   is detached from its parent first, which adopts its right subtree.
//!
//! The node is marked deleted under its lock before any link changes, so a
//! concurrent writer that locks it afterwards sees the flag and restarts.

use std::ptr as StdPtr;
use std::sync::Arc;

use seize::LocalGuard;

use crate::compare::KeyComparator;
use crate::node::{Dir, Node, node_ref};
use crate::nodelock::LockGuard;
use crate::tracing_helpers::{debug_log, trace_log};

use super::traverse::{Descent, Outcome};
use super::{PavtTree, Rebalance};

/// How an unlink attempt under locks ended.
enum Unlink<K, V> {
    /// A revalidation failed; restart from the root.
    Restart,

    /// Someone else deleted the node first.
    Absent,

    /// The node is out of both the shape and the chain.
    ///
    /// Rebalancing starts at `first`, then at `second` when non-null.
    Done {
        first: *mut Node<K, V>,
        second: *mut Node<K, V>,
    },
}

impl<K, V> Unlink<K, V> {
    const fn rebalance_at(first: *mut Node<K, V>) -> Self {
        Self::Done {
            first,
            second: StdPtr::null_mut(),
        }
    }
}

/// The node being removed, with its parent, both locked and validated.
struct Victim<'g, K, V> {
    ptr: *mut Node<K, V>,
    node: &'g Node<K, V>,
    parent_ptr: *mut Node<K, V>,
    parent: &'g Node<K, V>,
    /// Which of the parent's slots holds the node.
    side: Dir,
}

impl<K, V, B, C> PavtTree<K, V, B, C>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    B: Rebalance,
    C: KeyComparator<K>,
{
    /// [`remove`](Self::remove) with an explicit guard.
    pub fn remove_with_guard(&self, key: &K, guard: &LocalGuard<'_>) -> Option<Arc<V>> {
        self.debug_assert_in_bounds(key);

        loop {
            let descent: Descent<K, V> = self.descend(key, guard);

            if let Outcome::Miss(dir) = descent.outcome {
                if self.miss_confirmed(key, &descent, dir, guard) {
                    return None;
                }

                self.stats.record_remove_retry();
                trace_log!(node = ?descent.node, "remove: chain rejected miss, retrying");
                continue;
            }

            let node_ptr: *mut Node<K, V> = descent.node;

            match Self::unlink(node_ptr, guard) {
                Unlink::Restart => {
                    self.stats.record_remove_retry();
                    trace_log!(node = ?node_ptr, "remove: revalidation failed, retrying");
                }

                Unlink::Absent => return None,

                Unlink::Done { first, second } => {
                    // SAFETY: the node stays allocated until retired below.
                    let value: Option<Arc<V>> = unsafe { node_ref(node_ptr, guard) }.value().cloned();

                    self.rebalance_from(first, guard);
                    if !second.is_null() {
                        self.rebalance_from(second, guard);
                    }

                    // SAFETY: the node is marked deleted and no live node links
                    // to it any more. Only this thread unlinked it.
                    unsafe { self.retire(node_ptr, guard) };

                    debug_log!(node = ?node_ptr, "remove: node retired");
                    return value;
                }
            }
        }
    }

    /// Lock the node and its parent, then dispatch on the node's shape.
    fn unlink(node_ptr: *mut Node<K, V>, guard: &LocalGuard<'_>) -> Unlink<K, V> {
        // SAFETY: reached during the descent under guard.
        let node: &Node<K, V> = unsafe { node_ref(node_ptr, guard) };

        let parent_ptr: *mut Node<K, V> = node.parent();
        // SAFETY: every non-sentinel node has a parent; loaded under guard.
        let parent: &Node<K, V> = unsafe { node_ref(parent_ptr, guard) };

        let _parent_lock: LockGuard<'_> = parent.lock();
        if node.parent() != parent_ptr {
            return if node.is_deleted() {
                Unlink::Absent
            } else {
                Unlink::Restart
            };
        }

        let mut node_lock: LockGuard<'_> = node.lock();
        if node_lock.is_deleted() {
            return Unlink::Absent;
        }

        let victim = Victim {
            ptr: node_ptr,
            node,
            parent_ptr,
            parent,
            side: parent.side_of(node_ptr),
        };

        let left: *mut Node<K, V> = node.left();
        let right: *mut Node<K, V> = node.right();

        match (left.is_null(), right.is_null()) {
            (true, true) => Self::unlink_leaf(&victim, &mut node_lock, guard),
            (false, false) => Self::unlink_with_two(&victim, &mut node_lock, left, right, guard),
            (true, false) => Self::unlink_with_one(&victim, &mut node_lock, right, Dir::Right, guard),
            (false, true) => Self::unlink_with_one(&victim, &mut node_lock, left, Dir::Left, guard),
        }
    }

    /// No children: the parent absorbs the node's chain link on its side.
    ///
    /// A left leaf's successor is its parent, and a right leaf's predecessor
    /// is its parent, so only the far neighbour needs relinking.
    fn unlink_leaf(
        victim: &Victim<'_, K, V>,
        node_lock: &mut LockGuard<'_>,
        guard: &LocalGuard<'_>,
    ) -> Unlink<K, V> {
        let side: Dir = victim.side;
        let far_ptr: *mut Node<K, V> = victim.node.link(side);
        // SAFETY: chain link of a locked, live node.
        let far: &Node<K, V> = unsafe { node_ref(far_ptr, guard) };

        node_lock.mark_deleted();

        victim.parent.set_child(side, StdPtr::null_mut());
        victim.parent.set_link(side, far_ptr);
        far.set_link(side.opposite(), victim.parent_ptr);

        Unlink::rebalance_at(victim.parent_ptr)
    }

    /// One child: the child takes the node's slot.
    ///
    /// The chain neighbour on the child's side (inside the child's subtree)
    /// points back at the node and is locked before the splice.
    fn unlink_with_one(
        victim: &Victim<'_, K, V>,
        node_lock: &mut LockGuard<'_>,
        child_ptr: *mut Node<K, V>,
        child_side: Dir,
        guard: &LocalGuard<'_>,
    ) -> Unlink<K, V> {
        // SAFETY: child of a locked node, loaded under guard.
        let child: &Node<K, V> = unsafe { node_ref(child_ptr, guard) };
        let _child_lock: LockGuard<'_> = child.lock();

        let near_ptr: *mut Node<K, V> = victim.node.link(child_side);
        // SAFETY: chain link of a locked, live node.
        let near: &Node<K, V> = unsafe { node_ref(near_ptr, guard) };
        let _near_lock: Option<LockGuard<'_>> = (near_ptr != child_ptr).then(|| near.lock());

        if near.link(child_side.opposite()) != victim.ptr || near.is_deleted() {
            return Unlink::Restart;
        }

        let pred_ptr: *mut Node<K, V> = victim.node.pred();
        let succ_ptr: *mut Node<K, V> = victim.node.succ();
        // SAFETY: chain links of a locked, live node.
        let (pred, succ) = unsafe { (node_ref(pred_ptr, guard), node_ref(succ_ptr, guard)) };

        node_lock.mark_deleted();

        victim.parent.set_child(victim.side, child_ptr);
        child.set_parent(victim.parent_ptr);
        pred.set_link(Dir::Right, succ_ptr);
        succ.set_link(Dir::Left, pred_ptr);

        Unlink::rebalance_at(victim.parent_ptr)
    }

    /// Two children: replace the node with its successor.
    fn unlink_with_two(
        victim: &Victim<'_, K, V>,
        node_lock: &mut LockGuard<'_>,
        left_ptr: *mut Node<K, V>,
        right_ptr: *mut Node<K, V>,
        guard: &LocalGuard<'_>,
    ) -> Unlink<K, V> {
        // SAFETY: children of a locked node, loaded under guard.
        let (left, right) = unsafe { (node_ref(left_ptr, guard), node_ref(right_ptr, guard)) };
        let _left_lock: LockGuard<'_> = left.lock();
        let _right_lock: LockGuard<'_> = right.lock();

        let pred_ptr: *mut Node<K, V> = victim.node.pred();
        let succ_ptr: *mut Node<K, V> = victim.node.succ();

        // SAFETY: chain link of a locked, live node.
        let pred: &Node<K, V> = unsafe { node_ref(pred_ptr, guard) };
        let _pred_lock: Option<LockGuard<'_>> = (pred_ptr != left_ptr).then(|| pred.lock());

        if pred.succ() != victim.ptr || pred.is_deleted() {
            return Unlink::Restart;
        }

        // Successor is the right child: it moves up and adopts the left subtree.
        if right.left().is_null() {
            debug_assert_eq!(succ_ptr, right_ptr, "right child without left must be successor");

            node_lock.mark_deleted();
            // Ancestors cached the node's height; rebalancing from `right`
            // must see any drop from it.
            right.set_height(victim.node.height());

            right.set_child(Dir::Left, left_ptr);
            left.set_parent(right_ptr);
            right.set_parent(victim.parent_ptr);
            victim.parent.set_child(victim.side, right_ptr);

            pred.set_link(Dir::Right, right_ptr);
            right.set_link(Dir::Left, pred_ptr);

            return Unlink::rebalance_at(right_ptr);
        }

        // SAFETY: chain link of a locked, live node.
        let succ: &Node<K, V> = unsafe { node_ref(succ_ptr, guard) };
        let succ_parent_ptr: *mut Node<K, V> = succ.parent();
        // SAFETY: parent of a node below `right`, loaded under guard.
        let succ_parent: &Node<K, V> = unsafe { node_ref(succ_parent_ptr, guard) };

        let _succ_parent_lock: Option<LockGuard<'_>> =
            (succ_parent_ptr != right_ptr).then(|| succ_parent.lock());
        if succ.parent() != succ_parent_ptr || succ.is_deleted() {
            return Unlink::Restart;
        }

        let _succ_lock: LockGuard<'_> = succ.lock();
        if succ.pred() != victim.ptr || succ.is_deleted() {
            return Unlink::Restart;
        }

        let succ_right_ptr: *mut Node<K, V> = succ.right();
        // SAFETY: child of a locked node, loaded under guard.
        let succ_right_lock: Option<LockGuard<'_>> = (!succ_right_ptr.is_null())
            .then(|| unsafe { node_ref(succ_right_ptr, guard) }.lock());

        // The successor's own successor; it inherits `succ` as predecessor.
        // Without a right subtree that is `succ_parent`, already locked.
        let after_ptr: *mut Node<K, V> = succ.succ();
        // SAFETY: every live key has a successor, at worst the max sentinel.
        let after: &Node<K, V> = unsafe { node_ref(after_ptr, guard) };

        let _after_lock: Option<LockGuard<'_>> =
            if succ_right_lock.is_some() && after_ptr != succ_right_ptr {
                let lock: LockGuard<'_> = after.lock();
                if after.pred() != succ_ptr || after.is_deleted() {
                    return Unlink::Restart;
                }
                Some(lock)
            } else {
                None
            };

        node_lock.mark_deleted();
        succ.set_height(victim.node.height());

        // Successor takes the node's place in the shape.
        succ.set_child(Dir::Right, right_ptr);
        right.set_parent(succ_ptr);
        succ.set_child(Dir::Left, left_ptr);
        left.set_parent(succ_ptr);
        succ.set_parent(victim.parent_ptr);
        victim.parent.set_child(victim.side, succ_ptr);

        // Its old parent adopts its right subtree.
        succ_parent.set_child(Dir::Left, succ_right_ptr);
        succ.set_link(Dir::Right, after_ptr);
        after.set_link(Dir::Left, succ_ptr);
        if !succ_right_ptr.is_null() {
            // SAFETY: locked above.
            unsafe { node_ref(succ_right_ptr, guard) }.set_parent(succ_parent_ptr);
        }

        // Splice the node out of the chain.
        succ.set_link(Dir::Left, pred_ptr);
        pred.set_link(Dir::Right, succ_ptr);

        trace_log!(succ = ?succ_ptr, "remove: successor relocated");

        Unlink::Done {
            first: succ_parent_ptr,
            second: succ_ptr,
        }
    }
}
