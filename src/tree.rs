//! Filepath: src/tree.rs
//!
//! `BLinkTree` - a concurrent ordered index from fixed-width unsigned
//! integer keys to opaque 64-bit values.
//!
//! Readers are wait-free in the sense that they never block on locks: every
//! traversal records node versions and restarts from the root when a
//! concurrent writer is observed. Writers lock at most two nodes at a time
//! (a just-split child and the parent receiving its separator), always in
//! child-then-parent order, so lock acquisition cannot deadlock.
//!
//! Two structural rules make stale descents harmless:
//!
//! - Every node knows its inclusive upper bound (`high_key`) and its right
//!   sibling. A split publishes the new right node through the sibling
//!   pointer *before* the parent learns the separator, so any traversal that
//!   lands too far left simply chains rightward.
//! - The root pointer is read without locks, so a writer may discover that
//!   the node it meant to grow is no longer the root; it then re-descends to
//!   the correct level and installs its separator there (`tree/split.rs`).

use std::fmt as StdFmt;
use std::sync::atomic::AtomicPtr;

use crate::internal::InternalNode;
use crate::key::Key;
use crate::leaf::LeafNode;
use crate::node::{self, NodePtr};
use crate::nodeversion::Restart;
use crate::ordering::READ_ORD;

mod split;
mod validate;



/// A concurrent in-memory B-link-tree.
///
/// Maps keys `K` to opaque `u64` values. The value `0` is the "not found"
/// sentinel of [`lookup`](Self::lookup); callers that need to distinguish
/// absence must not store `0`.
///
/// All operations take `&self` and the tree is [`Send`] and [`Sync`]; share
/// it behind an [`Arc`](std::sync::Arc) and call it from any number of
/// threads.
///
/// # Example
///
/// ```
/// use blink_tree::BLinkTree;
///
/// let tree: BLinkTree<u64> = BLinkTree::new();
/// tree.insert(5, 100);
/// tree.insert(3, 101);
///
/// assert_eq!(tree.lookup(5), 100);
/// assert_eq!(tree.lookup(4), 0);
/// assert!(tree.update(3, 111));
/// assert!(tree.remove(3));
/// assert_eq!(tree.lookup(3), 0);
/// ```
pub struct BLinkTree<K: Key = u64> {
    /// Current root; replaced (never in place) when the tree grows.
    root: AtomicPtr<u8>,

    /// Entry capacity of leaves.
    leaf_cardinality: usize,

    /// Routing-key capacity of internal nodes.
    internal_cardinality: usize,

    _key: std::marker::PhantomData<K>,
}

// SAFETY: all shared node state is accessed through atomics under the
// version-latch protocol; raw pointers are owned by the tree and only freed
// in Drop, which has exclusive access.
unsafe impl<K: Key> Send for BLinkTree<K> {}
// SAFETY: as above.
unsafe impl<K: Key> Sync for BLinkTree<K> {}

impl<K: Key> BLinkTree<K> {
    /// Create a tree with the default 512-byte node budget.
    #[must_use]
    pub fn new() -> Self {
        Self::with_byte_budget(node::DEFAULT_BYTE_BUDGET)
    }

    /// Create a tree whose node capacities are derived from a byte budget.
    ///
    /// # Panics
    /// If the budget is too small to fit at least 4 entries per node.
    #[must_use]
    pub fn with_byte_budget(byte_budget: usize) -> Self {
        Self::with_capacities(
            node::leaf_cardinality::<K>(byte_budget),
            node::internal_cardinality::<K>(byte_budget),
        )
    }

    /// Create a tree with explicit node capacities.
    ///
    /// Small capacities force deep trees quickly, which is what tests and
    /// split-heavy experiments want.
    ///
    /// # Panics
    /// If either capacity is below 4.
    #[must_use]
    pub fn with_capacities(leaf_cardinality: usize, internal_cardinality: usize) -> Self {
        assert!(
            leaf_cardinality >= 4 && internal_cardinality >= 4,
            "node capacities must be at least 4"
        );

        let root: Box<LeafNode<K>> = LeafNode::new(leaf_cardinality);

        Self {
            root: AtomicPtr::new(Box::into_raw(root).cast::<u8>()),
            leaf_cardinality,
            internal_cardinality,
            _key: std::marker::PhantomData,
        }
    }

    /// Tree height: 1 for a lone leaf, growing by one per root split.
    #[must_use]
    pub fn height(&self) -> u32 {
        let root: NodePtr = self.root.load(READ_ORD);

        // SAFETY: the root pointer is always a live node.
        unsafe { node::header::<K>(root) }.level() + 1
    }

    // ========================================================================
    //  Descent
    // ========================================================================

    /// Descend from the root to the leaf responsible for `key`.
    ///
    /// Returns the leaf and its read token. When `stack` is given it
    /// receives the internal ancestors that were entered downward, in
    /// root-to-leaf order; nodes reached by a rightward sibling hop are not
    /// ancestors of the leaf and stay off the stack.
    ///
    /// # Errors
    /// [`Restart`] whenever a version check fails; the caller clears any
    /// state and retries from the root.
    fn descend(&self, key: K, mut stack: Option<&mut Vec<NodePtr>>) -> Result<(NodePtr, u64), Restart> {
        let mut cur: NodePtr = self.root.load(READ_ORD);

        // SAFETY: the root pointer is always a live node.
        let mut cur_token: u64 = unsafe { node::header::<K>(cur) }.version.begin_read()?;

        // SAFETY: cur is a validated live node throughout; its level
        // discriminates the concrete kind.
        unsafe {
            while node::header::<K>(cur).level() != 0 {
                let inode: &InternalNode<K> = node::as_internal::<K>(cur);
                let (child, via_sibling) = inode.scan_child(key);

                let child_token: u64 = node::header::<K>(child).version.begin_read()?;

                // The child pointer is only trustworthy if cur did not
                // change while we computed it.
                inode.header().version.validate(cur_token)?;

                if !via_sibling {
                    if let Some(stack) = stack.as_mut() {
                        stack.push(cur);
                    }
                }

                cur = child;
                cur_token = child_token;
            }

            // A concurrent split may have moved our key range rightward
            // before the parent learned about it; chain along the leaves.
            loop {
                let header = node::header::<K>(cur);
                let sibling: NodePtr = header.sibling();

                if sibling.is_null() || key <= header.high_key() {
                    break;
                }

                let sibling_token: u64 = node::header::<K>(sibling).version.begin_read()?;
                header.version.validate(cur_token)?;

                cur = sibling;
                cur_token = sibling_token;
            }
        }

        Ok((cur, cur_token))
    }

    // ========================================================================
    //  Point Operations
    // ========================================================================

    /// Look up `key`, returning its value or `0` if absent.
    ///
    /// Lock-free: retries until a leaf snapshot validates.
    #[must_use]
    pub fn lookup(&self, key: K) -> u64 {
        loop {
            let Ok((leaf_ptr, token)) = self.descend(key, None) else {
                continue;
            };

            // SAFETY: descend only returns level-0 nodes.
            let leaf: &LeafNode<K> = unsafe { node::as_leaf::<K>(leaf_ptr) };
            let value: u64 = leaf.find(key);

            if leaf.header().version.validate(token).is_ok() {
                return value;
            }
        }
    }

    /// Insert `(key, value)`.
    ///
    /// The primitive accepts duplicate keys (each insert adds an entry);
    /// callers that want overwrite semantics should use [`Self::update`].
    pub fn insert(&self, key: K, value: u64) {
        let mut stack: Vec<NodePtr> = Vec::new();

        loop {
            stack.clear();

            let Ok((leaf_ptr, token)) = self.descend(key, Some(&mut stack)) else {
                continue;
            };

            // SAFETY: descend only returns level-0 nodes.
            let leaf: &LeafNode<K> = unsafe { node::as_leaf::<K>(leaf_ptr) };

            if leaf.header().version.try_upgrade(token).is_err() {
                continue;
            }

            if !leaf.is_full() {
                leaf.insert(key, value);
                leaf.header().version.write_unlock();
                return;
            }

            // Full leaf: split it and push the separator upward through the
            // ancestors recorded during this descent.
            self.split_leaf_and_propagate(leaf_ptr, key, value, &mut stack);
            return;
        }
    }

    /// Overwrite the value of an existing key in place.
    ///
    /// Returns `false` if the key is absent.
    pub fn update(&self, key: K, value: u64) -> bool {
        loop {
            let Ok((leaf_ptr, token)) = self.descend(key, None) else {
                continue;
            };

            // SAFETY: descend only returns level-0 nodes.
            let leaf: &LeafNode<K> = unsafe { node::as_leaf::<K>(leaf_ptr) };

            if leaf.header().version.try_upgrade(token).is_err() {
                continue;
            }

            let found: bool = leaf.update(key, value);
            leaf.header().version.write_unlock();
            return found;
        }
    }

    /// Remove one entry with `key`.
    ///
    /// Returns `false` if the key is absent. No structural changes propagate
    /// upward: leaves are never merged, even when they become empty.
    pub fn remove(&self, key: K) -> bool {
        loop {
            let Ok((leaf_ptr, token)) = self.descend(key, None) else {
                continue;
            };

            // SAFETY: descend only returns level-0 nodes.
            let leaf: &LeafNode<K> = unsafe { node::as_leaf::<K>(leaf_ptr) };

            if leaf.header().version.try_upgrade(token).is_err() {
                continue;
            }

            let found: bool = leaf.remove(key);
            leaf.header().version.write_unlock();
            return found;
        }
    }

    // ========================================================================
    //  Range Scans
    // ========================================================================

    /// Collect the values of up to `n` entries with keys `>= min_key`, in
    /// ascending key order, into `out`. Returns how many were collected.
    ///
    /// Each leaf contributes a validated snapshot, but the scan as a whole
    /// is not atomic: entries inserted or removed between leaf hops may or
    /// may not be observed.
    ///
    /// # Panics
    /// If `out` is shorter than `n`.
    pub fn range_lookup(&self, min_key: K, n: usize, out: &mut [u64]) -> usize {
        assert!(out.len() >= n, "output buffer shorter than requested count");

        'restart: loop {
            let Ok((leaf_ptr, mut token)) = self.descend(min_key, None) else {
                continue 'restart;
            };

            // SAFETY: descend only returns level-0 nodes, and the sibling
            // chain stays at level 0.
            let mut leaf: &LeafNode<K> = unsafe { node::as_leaf::<K>(leaf_ptr) };
            let mut start_idx: usize = leaf.find_lowerbound(min_key);
            let mut collected: usize = 0;

            loop {
                let new_collected: usize = leaf.range_collect(start_idx, out, collected, n);
                let sibling: NodePtr = leaf.header().sibling();

                if new_collected == n || sibling.is_null() {
                    if leaf.header().version.validate(token).is_err() {
                        continue 'restart;
                    }
                    return new_collected;
                }

                // SAFETY: sibling of a leaf is a leaf.
                let sibling_token: u64 = match unsafe { node::header::<K>(sibling) }.version.begin_read() {
                    Ok(token) => token,
                    Err(Restart) => continue 'restart,
                };
                if leaf.header().version.validate(token).is_err() {
                    continue 'restart;
                }

                // SAFETY: as above.
                leaf = unsafe { node::as_leaf::<K>(sibling) };
                token = sibling_token;
                collected = new_collected;
                start_idx = 0;
            }
        }
    }
}

impl<K: Key> Default for BLinkTree<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Key> StdFmt::Debug for BLinkTree<K> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("BLinkTree")
            .field("height", &self.height())
            .field("leaf_cardinality", &self.leaf_cardinality)
            .field("internal_cardinality", &self.internal_cardinality)
            .finish()
    }
}

impl<K: Key> Drop for BLinkTree<K> {
    /// Free the whole node graph.
    ///
    /// Splits never unlink nodes, so every node at level `L` sits on one
    /// sibling chain whose head is reachable by following leftmost children
    /// from the root. Walk each level's chain, freeing as we go.
    fn drop(&mut self) {
        let mut level_head: NodePtr = self.root.load(READ_ORD);

        while !level_head.is_null() {
            // SAFETY: every pointer reached here was allocated by this tree
            // and is freed exactly once; &mut self means no readers remain.
            unsafe {
                let level: u32 = node::header::<K>(level_head).level();
                let next_head: NodePtr = if level > 0 {
                    node::as_internal::<K>(level_head).child_at(0)
                } else {
                    std::ptr::null_mut()
                };

                let mut cur: NodePtr = level_head;
                while !cur.is_null() {
                    let sibling: NodePtr = node::header::<K>(cur).sibling();
                    if level > 0 {
                        drop(Box::from_raw(cur.cast::<InternalNode<K>>()));
                    } else {
                        drop(Box::from_raw(cur.cast::<LeafNode<K>>()));
                    }
                    cur = sibling;
                }

                level_head = next_head;
            }
        }
    }
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_tree() {
        let tree: BLinkTree<u64> = BLinkTree::new();

        assert_eq!(tree.lookup(1), 0);
        assert!(!tree.remove(1));
        assert!(!tree.update(1, 9));
        assert_eq!(tree.height(), 1);
    }

    #[test]
    fn test_point_inserts_and_lookups() {
        let tree: BLinkTree<u64> = BLinkTree::new();

        tree.insert(5, 100);
        tree.insert(3, 101);
        tree.insert(7, 102);

        assert_eq!(tree.lookup(3), 101);
        assert_eq!(tree.lookup(5), 100);
        assert_eq!(tree.lookup(7), 102);
        assert_eq!(tree.lookup(4), 0);
    }

    #[test]
    fn test_update_semantics() {
        let tree: BLinkTree<u64> = BLinkTree::new();

        tree.insert(10, 1);
        assert!(tree.update(10, 2));
        assert_eq!(tree.lookup(10), 2);
        assert!(!tree.update(11, 9));
    }

    #[test]
    fn test_remove_semantics() {
        let tree: BLinkTree<u64> = BLinkTree::new();

        tree.insert(1, 10);
        tree.insert(2, 20);

        assert!(tree.remove(1));
        assert!(!tree.remove(1));
        assert_eq!(tree.lookup(1), 0);
        assert_eq!(tree.lookup(2), 20);
    }

    #[test]
    fn test_duplicate_inserts_consume_one_per_remove() {
        let tree: BLinkTree<u64> = BLinkTree::new();

        tree.insert(5, 50);
        tree.insert(5, 51);

        assert_ne!(tree.lookup(5), 0);
        assert!(tree.remove(5));
        assert_ne!(tree.lookup(5), 0);
        assert!(tree.remove(5));
        assert_eq!(tree.lookup(5), 0);
        assert!(!tree.remove(5));
    }

    #[test]
    fn test_small_leaves_grow_and_scan() {
        let tree: BLinkTree<u64> = BLinkTree::with_capacities(4, 6);

        for key in 1..=4 {
            tree.insert(key, key * 100);
        }
        assert_eq!(tree.height(), 1);

        // The fifth insert splits the root leaf and grows the tree.
        tree.insert(5, 500);
        assert_eq!(tree.height(), 2);

        for key in 6..=8 {
            tree.insert(key, key * 100);
        }

        for key in 1..=8 {
            assert_eq!(tree.lookup(key), key * 100);
        }

        let mut out = [0u64; 4];
        assert_eq!(tree.range_lookup(3, 4, &mut out), 4);
        assert_eq!(out, [300, 400, 500, 600]);

        tree.check_invariants();
    }

    #[test]
    fn test_root_grows_repeatedly() {
        let tree: BLinkTree<u64> = BLinkTree::with_capacities(4, 4);
        let mut last_height: u32 = tree.height();

        for key in 1..=300u64 {
            tree.insert(key, key);

            // Height only ever grows.
            let height: u32 = tree.height();
            assert!(height >= last_height);
            last_height = height;
        }

        // Capacity-4 nodes push 300 keys well past three root splits.
        assert!(last_height >= 4, "height {last_height}");

        for key in 1..=300u64 {
            assert_eq!(tree.lookup(key), key);
        }
        tree.check_invariants();
    }

    #[test]
    fn test_descending_inserts() {
        let tree: BLinkTree<u64> = BLinkTree::with_capacities(4, 4);

        for key in (1..=100u64).rev() {
            tree.insert(key, key + 1000);
        }

        for key in 1..=100u64 {
            assert_eq!(tree.lookup(key), key + 1000);
        }
        tree.check_invariants();
    }

    #[test]
    fn test_range_lookup_spans_leaves() {
        let tree: BLinkTree<u64> = BLinkTree::with_capacities(4, 4);

        for key in 1..=50u64 {
            tree.insert(key, key * 2);
        }

        let mut out = vec![0u64; 10];
        assert_eq!(tree.range_lookup(20, 10, &mut out), 10);
        let expected: Vec<u64> = (20..30).map(|k| k * 2).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_range_lookup_larger_than_tree() {
        let tree: BLinkTree<u64> = BLinkTree::with_capacities(4, 4);

        for key in 1..=10u64 {
            tree.insert(key, key);
        }

        let mut out = vec![0u64; 64];
        assert_eq!(tree.range_lookup(1, 64, &mut out), 10);
        assert_eq!(tree.range_lookup(11, 64, &mut out), 0);
        assert_eq!(tree.range_lookup(1, 0, &mut out), 0);
    }

    #[test]
    fn test_remove_leaves_empty_leaf_behind() {
        let tree: BLinkTree<u64> = BLinkTree::with_capacities(4, 4);

        for key in 1..=30u64 {
            tree.insert(key, key);
        }
        for key in 1..=30u64 {
            assert!(tree.remove(key));
        }

        // Structure is untouched by removals; the tree still routes.
        for key in 1..=30u64 {
            assert_eq!(tree.lookup(key), 0);
        }
        tree.insert(15, 150);
        assert_eq!(tree.lookup(15), 150);
        tree.check_invariants();
    }

    #[test]
    fn test_u32_keys() {
        let tree: BLinkTree<u32> = BLinkTree::new();

        for key in 1..=100u32 {
            tree.insert(key, u64::from(key) * 3);
        }
        for key in 1..=100u32 {
            assert_eq!(tree.lookup(key), u64::from(key) * 3);
        }
        tree.check_invariants();
    }

    #[test]
    fn test_default_budget_many_keys() {
        let tree: BLinkTree<u64> = BLinkTree::new();

        for key in 1..=10_000u64 {
            tree.insert(key, key ^ 0xABCD);
        }
        for key in 1..=10_000u64 {
            assert_eq!(tree.lookup(key), key ^ 0xABCD);
        }
        assert!(tree.height() >= 3);
        tree.check_invariants();
    }

    #[test]
    fn test_zero_key_is_storable() {
        let tree: BLinkTree<u64> = BLinkTree::new();

        tree.insert(0, 7);
        assert_eq!(tree.lookup(0), 7);
        assert!(tree.remove(0));
        assert_eq!(tree.lookup(0), 0);
    }
}
