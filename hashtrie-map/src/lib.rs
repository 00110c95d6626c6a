//! Concurrent hash-trie map with lock-free reads
//!
//! This crate provides [`HashTrieMap`], a concurrent map organized as a trie
//! over the bits of each key's hash. Readers walk the trie without taking
//! any lock; writers lock only the one trie node they change, so writers on
//! different branches never contend.
//!
//! # Features
//!
//! - **Lock-Free Reads**: `load`, `range` and iteration never block
//! - **Per-Node Write Locks**: no global lock and no global resize
//! - **Local Growth**: a crowded slot is split into a new trie level on demand,
//!   and levels emptied by deletes are pruned again
//! - **Safe Memory Reclamation**: replaced nodes are freed through
//!   `crossbeam-epoch` once no reader can still see them
//! - **Flexible Hashing**: any [`BuildHasher`](core::hash::BuildHasher);
//!   colliding hashes degrade speed, never correctness
//!
//! # Example
//!
//! ```rust
//! use hashtrie_map::HashTrieMap;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let map = Arc::new(HashTrieMap::new());
//!
//! let handles: Vec<_> = (0..4)
//!     .map(|t| {
//!         let map = Arc::clone(&map);
//!         thread::spawn(move || {
//!             for i in 0..100 {
//!                 map.store(t * 100 + i, i);
//!             }
//!         })
//!     })
//!     .collect();
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//!
//! assert_eq!(map.len(), 400);
//! assert_eq!(map.load(&205), Some(5));
//!
//! // Exactly one caller gets to store a fresh key.
//! assert_eq!(map.load_or_store(1000, 1), (1, false));
//! assert_eq!(map.load_or_store(1000, 2), (1, true));
//!
//! assert!(map.compare_and_swap(&1000, &1, 3));
//! assert!(!map.compare_and_delete(&1000, &1));
//! assert_eq!(map.load_and_delete(&1000), Some(3));
//! ```

#![warn(missing_docs)]

mod error;
mod iter;
mod map;
mod node;

pub use error::OccupiedError;
pub use iter::{Iter, Keys, Values};
pub use map::HashTrieMap;

/// Hash builder used when none is given: foldhash's fast, fixed-seed hasher.
pub type DefaultHashBuilder = foldhash::fast::FixedState;
