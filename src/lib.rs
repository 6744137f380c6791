//! Ordered collections over byte-string keys, built on an in-memory B+ tree.
//!
//! The crate provides [`BPlusTree`], an ordered map from variable-length
//! byte strings to an arbitrary value type, and [`HashedMap`], a thin façade
//! that hashes keys of any type into fixed-width byte strings before
//! delegating to the tree.
//!
//! ```
//! use bytetree::BPlusTree;
//!
//! let mut tree = BPlusTree::new(8);
//! tree.insert(b"maple", 3);
//! tree.insert(b"birch", 1);
//!
//! assert_eq!(tree.get(b"maple"), Some(&3));
//! for (key, count) in &tree {
//!     println!("{key:?}: {count}");
//! }
//! ```
//!
//! # Structure
//!
//! All entries live in the leaves of the tree, which are chained in key
//! order; ranged and full scans ([`BPlusTree::range`], [`BPlusTree::iter`])
//! walk that chain instead of re-descending. The branching factor is a
//! runtime parameter, the *degree*: an internal node routes through at most
//! `degree` children and a leaf holds at most `degree - 1` entries. Inserts
//! split nodes bottom-up, deletes merge or redistribute with a sibling, and
//! the root grows or collapses so every leaf stays at the same depth.
//!
//! The [`storage`] and [`page`] modules carry a page-oriented serialisation
//! target for tree nodes — a slotted-page format over a pluggable page
//! store — which the in-memory engine itself does not use.

#![forbid(keyword_idents)]
#![forbid(non_ascii_idents)]
#![forbid(unreachable_pub)]
#![warn(clippy::all)]
#![warn(missing_docs)]

mod raw;

pub mod bplus_tree;
pub mod hashed_map;
pub mod page;
pub mod storage;

pub use bplus_tree::{BPlusTree, Iter, Keys, Values};
pub use hashed_map::HashedMap;
pub use page::PageNode;
pub use storage::{MemoryStore, PageStore};
