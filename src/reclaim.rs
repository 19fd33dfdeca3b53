//! Reclaim helpers for seize-based memory reclamation.
//!
//! This module provides:
//! - The single-node reclaimer passed to `guard.defer_retire()`
//! - Tree teardown for `Drop`

use seize::Collector;

use crate::node::Node;

// ============================================================================
//  Single-Node Reclaimer (seize callback signature)
// ============================================================================

/// Reclaim a boxed node (seize callback).
///
/// # Safety
///
/// - `ptr` must point to a valid `Node<K, V>` allocated via `Box::into_raw`.
/// - Must only be called after seize determines it's safe (no readers).
pub(crate) unsafe fn reclaim_node_boxed<K, V>(ptr: *mut Node<K, V>, _collector: &Collector) {
    // SAFETY: Caller guarantees ptr is valid and from Box::into_raw.
    // Seize ensures no readers remain.
    unsafe { drop(Box::from_raw(ptr)) };
}

// ============================================================================
//  Teardown
// ============================================================================

/// Free every node reachable through tree-shape links from `root`.
///
/// Uses an explicit stack; does NOT follow `parent`, `pred` or `succ`.
/// Returns the number of nodes freed.
///
/// # Safety
///
/// - Requires exclusive access to the tree (no concurrent readers or writers).
/// - Every reachable node must be a live `Box` allocation. Logically deleted
///   nodes are never reachable through `left`/`right` of a live node, so they
///   are left to the collector.
pub(crate) unsafe fn teardown_tree<K, V>(root: *mut Node<K, V>) -> usize {
    if root.is_null() {
        return 0;
    }

    let mut freed: usize = 0;
    let mut stack: Vec<*mut Node<K, V>> = Vec::with_capacity(64);
    stack.push(root);

    while let Some(ptr) = stack.pop() {
        // SAFETY: ptr is reachable and live per the caller's contract.
        let node: Box<Node<K, V>> = unsafe { Box::from_raw(ptr) };

        let left: *mut Node<K, V> = node.left();
        let right: *mut Node<K, V> = node.right();

        if !left.is_null() {
            stack.push(left);
        }
        if !right.is_null() {
            stack.push(right);
        }

        drop(node);
        freed += 1;
    }

    freed
}
