//! Filepath: src/internal.rs
//!
//! Internal node: routing keys and child pointers.
//!
//! An internal node with `count` keys carries `count + 1` children. The
//! subtree behind `children[i]` holds keys `<= keys[i]`; `children[count]`
//! is the rightmost child and holds keys up to `high_key`. Keys above
//! `high_key` are routed through the sibling chain instead.
//!
//! One slot is kept spare: the node reports full at `cardinality - 1` keys
//! so an insert always has room to shift the rightmost child pointer.

use std::ptr;
use std::sync::atomic::AtomicPtr;

use crate::key::Key;
use crate::node::{NodeHeader, NodePtr};
use crate::nodeversion::NodeVersion;
use crate::ordering::{READ_ORD, RELAXED, WRITE_ORD};

/// An internal routing node.
///
/// `#[repr(C)]` with the header first so a `*mut u8` node pointer can be
/// read as a [`NodeHeader`] before its kind is known.
#[repr(C)]
pub(crate) struct InternalNode<K: Key> {
    header: NodeHeader<K>,

    /// Routing keys, sorted strictly ascending over `0..count`.
    keys: Box<[K::Atomic]>,

    /// Child pointers; `0..=count` are live.
    children: Box<[AtomicPtr<u8>]>,
}

impl<K: Key> InternalNode<K> {
    /// Allocate an empty internal node at `level`.
    pub(crate) fn new(cardinality: usize, level: u32) -> Box<Self> {
        debug_assert!(level > 0, "internal nodes live above the leaf level");

        Box::new(Self {
            header: NodeHeader::new(level),
            keys: (0..cardinality).map(|_| K::atomic_new(K::ZERO)).collect(),
            children: (0..=cardinality)
                .map(|_| AtomicPtr::new(ptr::null_mut()))
                .collect(),
        })
    }

    /// Build a fresh root over a just-split pair.
    ///
    /// One key (`separator`) and two children; `high_key` is the right
    /// child's bound since the right child inherited the old upper bound.
    pub(crate) fn new_root(
        cardinality: usize,
        separator: K,
        left: NodePtr,
        right: NodePtr,
        high_key: K,
        level: u32,
    ) -> Box<Self> {
        let root: Box<Self> = Self::new(cardinality, level);

        K::atomic_store(&root.keys[0], separator, RELAXED);
        root.children[0].store(left, RELAXED);
        root.children[1].store(right, RELAXED);
        root.header.set_count(1);
        root.header.set_high_key(high_key);
        root
    }

    #[inline]
    pub(crate) const fn header(&self) -> &NodeHeader<K> {
        &self.header
    }

    /// Maximum number of routing keys.
    #[inline]
    pub(crate) fn cardinality(&self) -> usize {
        self.keys.len()
    }

    /// Full at one key short of cardinality; the spare slot is what lets
    /// [`Self::insert`] shift the rightmost child without overflow.
    #[inline]
    pub(crate) fn is_full(&self) -> bool {
        self.header.count() == self.cardinality() - 1
    }

    #[inline]
    pub(crate) fn key_at(&self, index: usize) -> K {
        K::atomic_load(&self.keys[index], READ_ORD)
    }

    #[inline]
    pub(crate) fn child_at(&self, index: usize) -> NodePtr {
        self.children[index].load(READ_ORD)
    }

    // ========================================================================
    //  Routing (optimistic-safe)
    // ========================================================================

    /// Smallest index whose key is `>= key`, or `count` if none.
    pub(crate) fn find_lowerbound(&self, key: K) -> usize {
        let count: usize = self.header.count();

        for i in 0..count {
            if self.key_at(i) >= key {
                return i;
            }
        }
        count
    }

    /// Next node on the path to `key`: the right sibling if `key` lies past
    /// this node's bound, otherwise the routed child.
    ///
    /// The flag reports a sibling hop, which keeps the node off the descent
    /// stack (it is not an ancestor of the eventual leaf).
    pub(crate) fn scan_child(&self, key: K) -> (NodePtr, bool) {
        let sibling: NodePtr = self.header.sibling();

        if !sibling.is_null() && self.header.high_key() < key {
            return (sibling, true);
        }
        (self.child_at(self.find_lowerbound(key)), false)
    }

    // ========================================================================
    //  Mutations (write lock required)
    // ========================================================================

    /// Install a separator and the right half of a child split.
    ///
    /// The slot right of `key` becomes `right_child`; the slot left of it
    /// keeps the old child (the split's left half), which still answers for
    /// keys `<= key`. The caller must have exclusive access: the write lock,
    /// or sole ownership of a split half that is not yet reachable.
    pub(crate) fn insert(&self, key: K, right_child: NodePtr) {
        debug_assert!(!self.is_full());

        let count: usize = self.header.count();
        let pos: usize = self.find_lowerbound(key);

        for i in (pos..count).rev() {
            let k: K = K::atomic_load(&self.keys[i], RELAXED);
            K::atomic_store(&self.keys[i + 1], k, WRITE_ORD);
        }
        for i in (pos + 1..=count).rev() {
            let child: NodePtr = self.children[i].load(RELAXED);
            self.children[i + 1].store(child, WRITE_ORD);
        }

        K::atomic_store(&self.keys[pos], key, WRITE_ORD);
        self.children[pos + 1].store(right_child, WRITE_ORD);
        self.header.set_count(count + 1);

        if key > self.header.high_key() {
            self.header.set_high_key(key);
        }
    }

    /// Split a full internal node around a promoted separator.
    ///
    /// The separator (`keys[half]`) is stored in neither half: it moves up
    /// to the parent. The left half keeps `keys[0..half]` with children
    /// `0..=half`; the right node takes the rest, inheriting this node's
    /// sibling and high key. Like a leaf split, the right node is born
    /// unlocked and is unreachable until this locked node is published.
    pub(crate) fn split(&self) -> (*mut InternalNode<K>, K) {
        debug_assert!(NodeVersion::is_locked(self.header.version.observe()));
        debug_assert!(self.is_full());

        let count: usize = self.header.count();
        let half: usize = count - count / 2;
        let separator: K = self.key_at(half);
        let right_count: usize = count - half - 1;

        let right: Box<InternalNode<K>> = InternalNode::new(self.cardinality(), self.header.level());
        for i in 0..right_count {
            let k: K = K::atomic_load(&self.keys[half + 1 + i], RELAXED);
            K::atomic_store(&right.keys[i], k, RELAXED);
        }
        for i in 0..=right_count {
            let child: NodePtr = self.children[half + 1 + i].load(RELAXED);
            right.children[i].store(child, RELAXED);
        }
        right.header.set_count(right_count);
        right.header.set_sibling(self.header.sibling());
        right.header.set_high_key(self.header.high_key());

        let right_ptr: *mut InternalNode<K> = Box::into_raw(right);
        self.header.set_sibling(right_ptr.cast::<u8>());
        self.header.set_high_key(separator);
        self.header.set_count(half);

        (right_ptr, separator)
    }
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Distinct dangling pointers; routing never dereferences children.
    fn fake_child(tag: usize) -> NodePtr {
        ptr::without_provenance_mut::<u8>(0x1000 + tag * 0x10)
    }

    /// Locked internal node with keys `10, 20, ..` and children `c0..=cN`.
    fn routing_node(cardinality: usize, nkeys: usize) -> Box<InternalNode<u64>> {
        let node: Box<InternalNode<u64>> = InternalNode::new(cardinality, 1);
        node.header().version.try_write_lock().unwrap();

        node.children[0].store(fake_child(0), RELAXED);
        for i in 0..nkeys {
            node.insert(((i + 1) * 10) as u64, fake_child(i + 1));
        }
        node
    }

    fn children_of(node: &InternalNode<u64>) -> Vec<NodePtr> {
        (0..=node.header().count()).map(|i| node.child_at(i)).collect()
    }

    #[test]
    fn test_lowerbound_routing() {
        let node = routing_node(6, 3); // keys 10, 20, 30

        assert_eq!(node.find_lowerbound(5), 0);
        assert_eq!(node.find_lowerbound(10), 0);
        assert_eq!(node.find_lowerbound(15), 1);
        assert_eq!(node.find_lowerbound(30), 2);
        assert_eq!(node.find_lowerbound(31), 3);
    }

    #[test]
    fn test_scan_child_routes_down() {
        let node = routing_node(6, 3);
        node.header().set_high_key(30);

        // Keys at or below a separator route to the child left of it.
        assert_eq!(node.scan_child(10), (fake_child(0), false));
        assert_eq!(node.scan_child(15), (fake_child(1), false));
        assert_eq!(node.scan_child(30), (fake_child(2), false));

        // No sibling: above high_key still routes to the rightmost child.
        assert_eq!(node.scan_child(99), (fake_child(3), false));
    }

    #[test]
    fn test_scan_child_follows_sibling_past_high_key() {
        let node = routing_node(6, 3);
        node.header().set_high_key(30);

        let sibling: NodePtr = fake_child(9);
        node.header().set_sibling(sibling);

        assert_eq!(node.scan_child(31), (sibling, true));
        // At the bound, the node still owns the key.
        assert_eq!(node.scan_child(30), (fake_child(2), false));
    }

    /// After inserting separator `k` with right child `C`, the slot right of
    /// `k` must be `C`, the slot left of `k` must be unchanged, and every
    /// other child must be preserved. Checked at every insert position.
    #[test]
    fn test_insert_places_right_child_at_every_position() {
        for nkeys in 0..4 {
            for slot in 0..=nkeys {
                let node = routing_node(6, nkeys);
                let before: Vec<NodePtr> = children_of(&node);

                // Key landing between existing keys slot and slot+1.
                let key: u64 = (slot * 10 + 5) as u64;
                let new_child: NodePtr = fake_child(77);
                node.insert(key, new_child);

                let pos: usize = node.find_lowerbound(key);
                assert_eq!(node.key_at(pos), key);
                assert_eq!(node.child_at(pos + 1), new_child, "right of new key");
                assert_eq!(node.child_at(pos), before[pos], "left of new key");

                // Children outside the insertion point are all preserved.
                let after: Vec<NodePtr> = children_of(&node);
                assert_eq!(after.len(), before.len() + 1);
                assert_eq!(&after[..=pos], &before[..=pos]);
                assert_eq!(&after[pos + 2..], &before[pos + 1..]);
            }
        }
    }

    #[test]
    fn test_insert_raises_high_key() {
        let node = routing_node(6, 2);
        node.header().set_high_key(20);

        node.insert(35, fake_child(5));
        assert_eq!(node.header().high_key(), 35);
    }

    #[test]
    fn test_split_promotes_middle_key() {
        // Cardinality 6 is full at 5 keys: 10, 20, 30, 40, 50.
        let node = routing_node(6, 5);
        node.header().set_high_key(50);
        assert!(node.is_full());

        let (right_ptr, separator) = node.split();
        // SAFETY: freshly split node, reclaimed at the end of the test.
        let right: Box<InternalNode<u64>> = unsafe { Box::from_raw(right_ptr) };

        // half = 5 - 5/2 = 3, so keys[3] == 40 is promoted.
        assert_eq!(separator, 40);

        // Left: keys 10, 20, 30 with children c0..=c3.
        assert_eq!(node.header().count(), 3);
        assert_eq!((0..3).map(|i| node.key_at(i)).collect::<Vec<_>>(), vec![10, 20, 30]);
        assert_eq!(children_of(&node), vec![fake_child(0), fake_child(1), fake_child(2), fake_child(3)]);
        assert_eq!(node.header().high_key(), 40);

        // Right: key 50 with children c4, c5. The separator lives in neither.
        assert_eq!(right.header().count(), 1);
        assert_eq!(right.key_at(0), 50);
        assert_eq!(children_of(&right), vec![fake_child(4), fake_child(5)]);
        assert_eq!(right.header().high_key(), 50);

        assert_eq!(node.header().sibling(), right_ptr.cast::<u8>());
        assert!(right.header().sibling().is_null());
        assert!(!NodeVersion::is_locked(right.header().version.observe()));
    }

    #[test]
    fn test_split_at_minimum_cardinality() {
        // Cardinality 4 is full at 3 keys; the right half gets zero keys and
        // a single child, which routes everything through its leftmost slot.
        let node = routing_node(4, 3);

        let (right_ptr, separator) = node.split();
        // SAFETY: freshly split node.
        let right: Box<InternalNode<u64>> = unsafe { Box::from_raw(right_ptr) };

        assert_eq!(separator, 30);
        assert_eq!(node.header().count(), 2);
        assert_eq!(right.header().count(), 0);
        assert_eq!(right.child_at(0), fake_child(3));
        assert_eq!(right.scan_child(99), (fake_child(3), false));
    }

    #[test]
    fn test_new_root_shape() {
        let left: NodePtr = fake_child(1);
        let right: NodePtr = fake_child(2);
        let root: Box<InternalNode<u64>> = InternalNode::new_root(6, 42, left, right, 99, 1);

        assert_eq!(root.header().count(), 1);
        assert_eq!(root.header().level(), 1);
        assert_eq!(root.header().high_key(), 99);
        assert!(root.header().sibling().is_null());
        assert_eq!(root.key_at(0), 42);

        assert_eq!(root.scan_child(42), (left, false));
        assert_eq!(root.scan_child(43), (right, false));
    }
}
