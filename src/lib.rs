//! # `PaVT`
//!
//! Concurrent ordered maps (an unbalanced BST and an AVL tree) with lock-free
//! lookups and fine-grained locked updates.
//!
//! Every node carries, besides its tree-shape links, a pointer to its
//! in-order predecessor and successor. Together they form the *snapshot
//! chain*: a sorted doubly linked list over all live keys, bounded by a min
//! and a max sentinel. Rotations rewrite the tree shape but never the chain,
//! so a reader that walks the shape without locks can validate a miss by
//! checking that the key falls strictly inside the chain gap where its walk
//! ended. If it does not, the shape moved under the reader and it retries.
//!
//! | Operation | Locks |
//! |-----------|-------|
//! | `contains` / `get` | none |
//! | `add` | the attach point |
//! | `remove` | parent, node, and up to six neighbours |
//! | AVL rebalance | parent, node, child, grandchild per step |
//!
//! ## Thread Safety
//!
//! `PavtTree<K, V, _, C>` is `Send + Sync` when `K`, `V` and `C` are. Memory
//! of removed nodes is reclaimed through `seize`; a guard keeps every node
//! it has observed alive:
//!
//! ```rust
//! use pavt::PavtAvl;
//!
//! let tree: PavtAvl<u64, String> = PavtAvl::new(0, u64::MAX).unwrap();
//! let guard = tree.guard();
//!
//! tree.add_with_guard(7, "seven".to_string(), &guard);
//! assert!(tree.contains_with_guard(&7, &guard));
//! assert_eq!(tree.get_with_guard(&7, &guard).as_deref().map(String::as_str), Some("seven"));
//! ```
//!
//! ## Keys
//!
//! Keys are ordered by a [`KeyComparator`], by default the key's [`Ord`].
//! Both sentinel bounds are fixed at construction and every key passed to
//! the tree must lie strictly between them.
//!
//! ## Values
//!
//! Values are stored as `Arc<V>`. `add` never overwrites: it returns the
//! existing value instead.

#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// Hot-path accessors are small and called on every descent step.
#![allow(clippy::inline_always)]

pub mod compare;
pub mod nodelock;
pub mod ordering;
pub mod tree;

mod node;
mod reclaim;
mod tracing_helpers;

pub use compare::{KeyComparator, NaturalOrder};
pub use tree::{Avl, PavtAvl, PavtBst, PavtTree, Rebalance, RetrySnapshot, TreeError, Unbalanced};
