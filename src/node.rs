//! Tree node: the unit of storage and of locking.
//!
//! Every node carries two independent sets of links:
//!
//! - **Tree shape**: `left`, `right`, `parent`. These move under rotations
//!   and are only a hint for *where* a key lives.
//! - **Snapshot chain**: `pred`, `succ`. The node's neighbours in key order.
//!   Rotations never touch them, so the chain is the ground truth for
//!   *whether* a key is present.
//!
//! Only `left`/`right` own their targets; `parent`, `pred` and `succ` are
//! non-owning. All links are atomics because readers traverse without locks.

use std::ptr as StdPtr;
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, AtomicU32};

use seize::LocalGuard;

use crate::nodelock::{LockGuard, NodeLock};
use crate::ordering::{LINK_LOAD, LINK_STORE, RELAXED};

// ============================================================================
//  Dir
// ============================================================================

/// Side of a node: which child slot, and which chain neighbour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dir {
    Left,
    Right,
}

impl Dir {
    #[inline(always)]
    pub(crate) const fn opposite(self) -> Self {
        match self {
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }
}

// ============================================================================
//  Node
// ============================================================================

/// A key/value pair, or a boundary sentinel (no value).
pub(crate) struct Node<K, V> {
    key: K,
    value: Option<Arc<V>>,
    lock: NodeLock,

    left: AtomicPtr<Self>,
    right: AtomicPtr<Self>,
    parent: AtomicPtr<Self>,

    /// Previous key in the snapshot chain.
    pred: AtomicPtr<Self>,
    /// Next key in the snapshot chain.
    succ: AtomicPtr<Self>,

    /// Cached subtree height. Only maintained by the AVL policy.
    height: AtomicU32,
}

impl<K, V> Node<K, V> {
    /// Create a sentinel carrying one of the tree bounds.
    pub(crate) fn sentinel(key: K) -> Box<Self> {
        Box::new(Self {
            key,
            value: None,
            lock: NodeLock::new(),
            left: AtomicPtr::new(StdPtr::null_mut()),
            right: AtomicPtr::new(StdPtr::null_mut()),
            parent: AtomicPtr::new(StdPtr::null_mut()),
            pred: AtomicPtr::new(StdPtr::null_mut()),
            succ: AtomicPtr::new(StdPtr::null_mut()),
            height: AtomicU32::new(1),
        })
    }

    /// Create a leaf already wired to its parent and chain neighbours.
    ///
    /// Nothing points at the node yet; the caller publishes it.
    pub(crate) fn leaf(
        key: K,
        value: Arc<V>,
        parent: *mut Self,
        pred: *mut Self,
        succ: *mut Self,
    ) -> Box<Self> {
        Box::new(Self {
            key,
            value: Some(value),
            lock: NodeLock::new(),
            left: AtomicPtr::new(StdPtr::null_mut()),
            right: AtomicPtr::new(StdPtr::null_mut()),
            parent: AtomicPtr::new(parent),
            pred: AtomicPtr::new(pred),
            succ: AtomicPtr::new(succ),
            height: AtomicU32::new(1),
        })
    }

    #[inline(always)]
    pub(crate) const fn key(&self) -> &K {
        &self.key
    }

    #[inline(always)]
    pub(crate) const fn value(&self) -> Option<&Arc<V>> {
        self.value.as_ref()
    }

    // ========================================================================
    //  Locking
    // ========================================================================

    #[inline(always)]
    pub(crate) fn lock(&self) -> LockGuard<'_> {
        self.lock.lock()
    }

    #[inline(always)]
    pub(crate) fn is_deleted(&self) -> bool {
        self.lock.is_deleted()
    }

    // ========================================================================
    //  Tree Shape
    // ========================================================================

    #[inline(always)]
    pub(crate) fn child(&self, dir: Dir) -> *mut Self {
        match dir {
            Dir::Left => self.left.load(LINK_LOAD),
            Dir::Right => self.right.load(LINK_LOAD),
        }
    }

    #[inline(always)]
    pub(crate) fn set_child(&self, dir: Dir, child: *mut Self) {
        match dir {
            Dir::Left => self.left.store(child, LINK_STORE),
            Dir::Right => self.right.store(child, LINK_STORE),
        }
    }

    #[inline(always)]
    pub(crate) fn left(&self) -> *mut Self {
        self.child(Dir::Left)
    }

    #[inline(always)]
    pub(crate) fn right(&self) -> *mut Self {
        self.child(Dir::Right)
    }

    #[inline(always)]
    pub(crate) fn parent(&self) -> *mut Self {
        self.parent.load(LINK_LOAD)
    }

    #[inline(always)]
    pub(crate) fn set_parent(&self, parent: *mut Self) {
        self.parent.store(parent, LINK_STORE);
    }

    /// Which child slot of `self` holds `child`. Anything but the left child
    /// reports `Right`.
    #[inline(always)]
    pub(crate) fn side_of(&self, child: *mut Self) -> Dir {
        if self.left() == child {
            Dir::Left
        } else {
            Dir::Right
        }
    }

    // ========================================================================
    //  Snapshot Chain
    // ========================================================================

    /// Chain neighbour on `dir`'s side: `pred` for left, `succ` for right.
    #[inline(always)]
    pub(crate) fn link(&self, dir: Dir) -> *mut Self {
        match dir {
            Dir::Left => self.pred.load(LINK_LOAD),
            Dir::Right => self.succ.load(LINK_LOAD),
        }
    }

    #[inline(always)]
    pub(crate) fn set_link(&self, dir: Dir, node: *mut Self) {
        match dir {
            Dir::Left => self.pred.store(node, LINK_STORE),
            Dir::Right => self.succ.store(node, LINK_STORE),
        }
    }

    #[inline(always)]
    pub(crate) fn pred(&self) -> *mut Self {
        self.link(Dir::Left)
    }

    #[inline(always)]
    pub(crate) fn succ(&self) -> *mut Self {
        self.link(Dir::Right)
    }

    // ========================================================================
    //  Height (AVL)
    // ========================================================================

    #[inline(always)]
    pub(crate) fn height(&self) -> u32 {
        self.height.load(RELAXED)
    }

    #[inline(always)]
    pub(crate) fn set_height(&self, height: u32) {
        self.height.store(height, RELAXED);
    }
}

/// Height of a possibly absent subtree: 0 for null.
///
/// # Safety
///
/// `ptr` must be null or point to a node kept alive by `guard`.
#[inline(always)]
pub(crate) unsafe fn height_of<K, V>(ptr: *mut Node<K, V>, guard: &LocalGuard<'_>) -> u32 {
    if ptr.is_null() {
        0
    } else {
        // SAFETY: non-null and protected per the caller's contract.
        unsafe { node_ref(ptr, guard) }.height()
    }
}

/// Borrow a node for as long as `guard` is active.
///
/// # Safety
///
/// `ptr` must be non-null and must have been loaded from the tree (or be a
/// sentinel) while `guard` was active, so that reclamation of the node is
/// deferred until the guard is dropped.
#[inline(always)]
pub(crate) unsafe fn node_ref<'g, K, V>(
    ptr: *mut Node<K, V>,
    _guard: &'g LocalGuard<'_>,
) -> &'g Node<K, V> {
    debug_assert!(!ptr.is_null(), "node_ref on null pointer");
    // SAFETY: caller guarantees validity for the guard's lifetime.
    unsafe { &*ptr }
}
