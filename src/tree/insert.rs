//! Insert.
//!
//! Descend to the attach point, lock it alone, revalidate, then publish the
//! new leaf: chain first (neighbour, then attach point), child slot last.
//! A reader that sees the child slot therefore also sees the chain entry.

use std::sync::Arc;

use seize::LocalGuard;

use crate::compare::KeyComparator;
use crate::node::{Dir, Node, node_ref};
use crate::nodelock::LockGuard;
use crate::tracing_helpers::trace_log;

use super::traverse::{Descent, Outcome};
use super::{PavtTree, Rebalance};

impl<K, V, B, C> PavtTree<K, V, B, C>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    B: Rebalance,
    C: KeyComparator<K>,
{
    /// [`add`](Self::add) with an explicit guard.
    ///
    /// Returns the existing value if `key` is already present; the tree is
    /// left unchanged and `value` is dropped.
    pub fn add_with_guard(&self, key: K, value: V, guard: &LocalGuard<'_>) -> Option<Arc<V>> {
        self.debug_assert_in_bounds(&key);
        let value: Arc<V> = Arc::new(value);

        loop {
            let descent: Descent<K, V> = self.descend(&key, guard);
            let node_ptr: *mut Node<K, V> = descent.node;

            // SAFETY: reached during the descent under guard.
            let node: &Node<K, V> = unsafe { node_ref(node_ptr, guard) };

            let dir: Dir = match descent.outcome {
                Outcome::Hit => return node.value().cloned(),
                Outcome::Miss(dir) => dir,
            };

            let lock: LockGuard<'_> = node.lock();

            if lock.is_deleted() || !node.child(dir).is_null() {
                drop(lock);
                self.stats.record_add_retry();
                trace_log!(node = ?node_ptr, "add: attach point changed, retrying");
                continue;
            }

            // A live node always has a chain neighbour on any side it can
            // take a child, at worst a sentinel.
            let neighbor_ptr: *mut Node<K, V> = node.link(dir);
            debug_assert!(!neighbor_ptr.is_null(), "live node without chain neighbour");

            // SAFETY: chain link of a locked, live node.
            let neighbor: &Node<K, V> = unsafe { node_ref(neighbor_ptr, guard) };

            if !self.inside_gap(&key, neighbor, dir) {
                drop(lock);
                self.stats.record_add_retry();
                trace_log!(node = ?node_ptr, "add: key outside chain gap, retrying");
                continue;
            }

            let (pred, succ) = match dir {
                Dir::Left => (neighbor_ptr, node_ptr),
                Dir::Right => (node_ptr, neighbor_ptr),
            };
            let fresh: *mut Node<K, V> = Box::into_raw(Node::leaf(key, value, node_ptr, pred, succ));

            neighbor.set_link(dir.opposite(), fresh);
            node.set_link(dir, fresh);
            node.set_child(dir, fresh);

            drop(lock);

            if node_ptr != self.root {
                self.rebalance_from(node_ptr, guard);
            }

            return None;
        }
    }
}
