//! # blink-tree
//!
//! A concurrent, in-memory B-link-tree: an ordered index from fixed-width
//! unsigned integer keys to opaque 64-bit values, built for many-reader /
//! many-writer workloads on one machine.
//!
//! The B-link design gives every node a right-sibling pointer and an
//! inclusive upper bound (its *high key*). A split first publishes the new
//! right node through the sibling pointer and only then tells the parent, so
//! a traversal holding stale routing information can always recover by
//! chaining rightward instead of retrying under a lock.
//!
//! ## Concurrency
//!
//! - Reads: optimistic lock coupling. Each node carries a version latch
//!   ([`nodeversion::NodeVersion`]); readers record the version, read, then
//!   re-check it, restarting from the root on any observed change. Readers
//!   never lock and never block writers.
//! - Writes: point operations lock exactly one leaf. Split propagation
//!   holds at most two locks at once (a just-split child and its parent),
//!   always taken bottom-up, so there is no deadlock.
//! - The map interface is linearizable; forward range scans are
//!   node-by-node consistent rather than atomic.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use std::thread;
//!
//! use blink_tree::BLinkTree;
//!
//! let tree = Arc::new(BLinkTree::<u64>::new());
//!
//! let writers: Vec<_> = (0u64..4)
//!     .map(|t| {
//!         let tree = Arc::clone(&tree);
//!         thread::spawn(move || {
//!             for key in (t * 100 + 1)..=(t * 100 + 100) {
//!                 tree.insert(key, key * 10);
//!             }
//!         })
//!     })
//!     .collect();
//! for writer in writers {
//!     writer.join().unwrap();
//! }
//!
//! assert_eq!(tree.lookup(250), 2500);
//! let mut out = vec![0u64; 400];
//! assert_eq!(tree.range_lookup(1, 400, &mut out), 400);
//! ```

pub mod key;
pub mod nodeversion;
pub mod ordering;

mod internal;
mod leaf;
mod node;
mod tracing_helpers;
mod tree;

pub use key::Key;
pub use nodeversion::Restart;
pub use tree::BLinkTree;
