//! Size, height and structural checks.
//!
//! These walk the whole tree and are meant for tests, debugging and
//! quiescent states. Under concurrent updates they stay memory safe but their
//! answers are best effort.

use std::cmp::Ordering;
use std::collections::HashMap;

use seize::LocalGuard;

use crate::compare::KeyComparator;
use crate::node::{Dir, Node, node_ref};
use crate::tracing_helpers::warn_log;

use super::{PavtTree, Rebalance};

impl<K, V, B, C> PavtTree<K, V, B, C>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    B: Rebalance,
    C: KeyComparator<K>,
{
    /// Number of keys, counted over the tree shape.
    ///
    /// Not atomic with respect to concurrent updates.
    #[must_use]
    pub fn size(&self) -> usize {
        let guard: LocalGuard<'_> = self.guard();
        let mut count: usize = 0;
        let mut stack: Vec<*mut Node<K, V>> = Vec::new();

        let top: *mut Node<K, V> = self.root_node().left();
        if !top.is_null() {
            stack.push(top);
        }

        while let Some(ptr) = stack.pop() {
            // SAFETY: loaded from a child link under guard.
            let node: &Node<K, V> = unsafe { node_ref(ptr, &guard) };

            if !node.is_deleted() {
                count += 1;
            }

            for child in [node.left(), node.right()] {
                if !child.is_null() {
                    stack.push(child);
                }
            }
        }

        count
    }

    /// Number of nodes on the longest root-to-leaf path; 0 when empty.
    #[must_use]
    pub fn height(&self) -> usize {
        let guard: LocalGuard<'_> = self.guard();
        let mut deepest: usize = 0;
        let mut stack: Vec<(*mut Node<K, V>, usize)> = Vec::new();

        let top: *mut Node<K, V> = self.root_node().left();
        if !top.is_null() {
            stack.push((top, 1));
        }

        while let Some((ptr, depth)) = stack.pop() {
            deepest = deepest.max(depth);

            // SAFETY: loaded from a child link under guard.
            let node: &Node<K, V> = unsafe { node_ref(ptr, &guard) };
            for child in [node.left(), node.right()] {
                if !child.is_null() {
                    stack.push((child, depth + 1));
                }
            }
        }

        deepest
    }

    /// Validate the snapshot chain.
    ///
    /// Walks `succ` links from the min sentinel and checks that every
    /// successor points back with `pred`, that keys strictly increase, and
    /// that the walk ends at the max sentinel.
    #[must_use]
    pub fn check(&self) -> bool {
        let guard: LocalGuard<'_> = self.guard();
        let mut current_ptr: *mut Node<K, V> = self.floor;

        loop {
            // SAFETY: the floor sentinel, or a chain link loaded under guard.
            let current: &Node<K, V> = unsafe { node_ref(current_ptr, &guard) };
            let next_ptr: *mut Node<K, V> = current.succ();

            if next_ptr.is_null() {
                if current_ptr != self.root {
                    warn_log!(node = ?current_ptr, "check: chain ends before the max sentinel");
                    return false;
                }
                return true;
            }

            // SAFETY: non-null chain link loaded under guard.
            let next: &Node<K, V> = unsafe { node_ref(next_ptr, &guard) };

            if next.pred() != current_ptr {
                warn_log!(node = ?next_ptr, "check: pred does not point back");
                return false;
            }

            if self.cmp(current.key(), next.key()) != Ordering::Less {
                warn_log!(node = ?next_ptr, "check: keys out of order");
                return false;
            }

            current_ptr = next_ptr;
        }
    }

    /// Validate the tree shape against the chain and the balancing policy.
    ///
    /// Checks that every reachable node is live, lies strictly between the
    /// keys of its ancestors, and is its child's parent; that the shape holds
    /// exactly the keys on the chain; and, for [`Avl`](super::Avl), that every
    /// cached height is exact and every balance factor is within one.
    ///
    /// Only meaningful when no updates are running.
    #[must_use]
    pub fn check_structure(&self) -> bool {
        let guard: LocalGuard<'_> = self.guard();

        // Pre-order: parents land in `order` before their children.
        let mut order: Vec<*mut Node<K, V>> = Vec::new();
        let mut stack: Vec<(*mut Node<K, V>, *mut Node<K, V>, *mut Node<K, V>)> = Vec::new();

        let top: *mut Node<K, V> = self.root_node().left();
        if !top.is_null() {
            // SAFETY: loaded from the root sentinel under guard.
            if unsafe { node_ref(top, &guard) }.parent() != self.root {
                warn_log!(node = ?top, "check_structure: top node not under the root");
                return false;
            }
            stack.push((top, self.floor, self.root));
        }

        while let Some((ptr, low, high)) = stack.pop() {
            // SAFETY: loaded from a child link under guard; bounds are
            // ancestors or sentinels.
            let (node, low_node, high_node) = unsafe {
                (
                    node_ref(ptr, &guard),
                    node_ref(low, &guard),
                    node_ref(high, &guard),
                )
            };

            if node.is_deleted() {
                warn_log!(node = ?ptr, "check_structure: deleted node reachable");
                return false;
            }

            if self.cmp(low_node.key(), node.key()) != Ordering::Less
                || self.cmp(node.key(), high_node.key()) != Ordering::Less
            {
                warn_log!(node = ?ptr, "check_structure: key outside ancestor bounds");
                return false;
            }

            for dir in [Dir::Left, Dir::Right] {
                let child: *mut Node<K, V> = node.child(dir);
                if child.is_null() {
                    continue;
                }

                // SAFETY: non-null child loaded under guard.
                if unsafe { node_ref(child, &guard) }.parent() != ptr {
                    warn_log!(node = ?child, "check_structure: parent link mismatch");
                    return false;
                }

                match dir {
                    Dir::Left => stack.push((child, low, ptr)),
                    Dir::Right => stack.push((child, ptr, high)),
                }
            }

            order.push(ptr);
        }

        if order.len() != self.chain_len(&guard) {
            warn_log!(shape = order.len(), "check_structure: shape and chain disagree");
            return false;
        }

        if !B::MAINTAINS_HEIGHT {
            return true;
        }

        // Children before parents.
        let mut heights: HashMap<*mut Node<K, V>, u32> = HashMap::with_capacity(order.len());
        for &ptr in order.iter().rev() {
            // SAFETY: visited above under the same guard.
            let node: &Node<K, V> = unsafe { node_ref(ptr, &guard) };
            let left: u32 = heights.get(&node.left()).copied().unwrap_or(0);
            let right: u32 = heights.get(&node.right()).copied().unwrap_or(0);

            if left.abs_diff(right) > 1 {
                warn_log!(node = ?ptr, left, right, "check_structure: node out of balance");
                return false;
            }

            let expected: u32 = 1 + left.max(right);
            if node.height() != expected {
                warn_log!(node = ?ptr, expected, "check_structure: stale height");
                return false;
            }

            heights.insert(ptr, expected);
        }

        true
    }

    /// Number of keys on the snapshot chain, sentinels excluded.
    fn chain_len(&self, guard: &LocalGuard<'_>) -> usize {
        let mut len: usize = 0;
        let mut current_ptr: *mut Node<K, V> = self.floor_node().succ();

        while !current_ptr.is_null() && current_ptr != self.root {
            len += 1;
            // SAFETY: chain link loaded under guard.
            current_ptr = unsafe { node_ref(current_ptr, guard) }.succ();
        }

        len
    }
}
