//! Quiescent-state structural checks.
//!
//! A tree walker that verifies node-local and cross-node invariants:
//! strictly increasing keys, capacity bounds, level arithmetic, separator
//! bounds between adjacent subtrees, and monotone high keys along each
//! sibling chain. Separator bounds only hold once all in-flight split
//! propagations have installed their separators, so the walker must run
//! while no other thread is operating on the tree.

use crate::internal::InternalNode;
use crate::key::Key;
use crate::leaf::LeafNode;
use crate::node::{self, NodePtr};
use crate::ordering::READ_ORD;

use super::BLinkTree;

impl<K: Key> BLinkTree<K> {
    /// Walk the whole tree and panic on the first structural violation.
    ///
    /// Intended for tests and debugging between operation phases. Callers
    /// must guarantee no concurrent operations; the walker takes no locks.
    pub fn check_invariants(&self) {
        let root: NodePtr = self.root.load(READ_ORD);

        // SAFETY: quiescent tree; all reachable pointers are live nodes.
        unsafe {
            let root_level: u32 = node::header::<K>(root).level();
            let _ = self.check_subtree(root, root_level);
            self.check_sibling_chains(root);
        }
    }

    /// Verify one subtree, returning the (min, max) leaf keys under it.
    ///
    /// # Safety
    /// `node_ptr` must be a live node of a quiescent tree.
    unsafe fn check_subtree(&self, node_ptr: NodePtr, expected_level: u32) -> Option<(K, K)> {
        // SAFETY: per contract.
        let header = unsafe { node::header::<K>(node_ptr) };
        assert_eq!(header.level(), expected_level, "level must drop by 1 per child edge");

        let count: usize = header.count();

        if header.level() == 0 {
            // SAFETY: level 0 is a leaf.
            let leaf: &LeafNode<K> = unsafe { node::as_leaf::<K>(node_ptr) };
            assert!(count <= leaf.cardinality(), "leaf overflow: {count}");

            for i in 1..count {
                assert!(leaf.key_at(i - 1) < leaf.key_at(i), "leaf keys must strictly increase");
            }
            if count == 0 {
                return None;
            }

            let max: K = leaf.key_at(count - 1);
            assert!(max <= header.high_key(), "leaf key above its high_key");
            return Some((leaf.key_at(0), max));
        }

        // SAFETY: nonzero level is an internal node.
        let internal: &InternalNode<K> = unsafe { node::as_internal::<K>(node_ptr) };
        assert!(
            count <= internal.cardinality() - 1,
            "internal overflow: {count}"
        );

        for i in 1..count {
            assert!(
                internal.key_at(i - 1) < internal.key_at(i),
                "routing keys must strictly increase"
            );
        }
        if count > 0 {
            assert!(
                internal.key_at(count - 1) <= header.high_key(),
                "routing key above its high_key"
            );
        }

        let mut subtree_min: Option<K> = None;
        let mut subtree_max: Option<K> = None;

        for i in 0..=count {
            // SAFETY: children 0..=count are live.
            let range: Option<(K, K)> = unsafe { self.check_subtree(internal.child_at(i), expected_level - 1) };

            let Some((child_min, child_max)) = range else {
                continue;
            };

            // Separator bounds: child i holds keys <= keys[i], and child
            // i+1 holds keys strictly above keys[i].
            if i < count {
                assert!(
                    child_max <= internal.key_at(i),
                    "subtree leaks past its separator"
                );
            }
            if i > 0 {
                assert!(
                    child_min > internal.key_at(i - 1),
                    "subtree undercuts its separator"
                );
            }

            subtree_min = subtree_min.or(Some(child_min));
            subtree_max = Some(child_max);
        }

        match (subtree_min, subtree_max) {
            (Some(min), Some(max)) => Some((min, max)),
            _ => None,
        }
    }

    /// Verify every level's sibling chain: high keys non-decreasing, levels
    /// uniform, chain terminated by null.
    ///
    /// # Safety
    /// `root` must be the root of a quiescent tree.
    unsafe fn check_sibling_chains(&self, root: NodePtr) {
        let mut level_head: NodePtr = root;

        loop {
            // SAFETY: per contract; leftmost children of a quiescent tree
            // are the heads of their level chains.
            unsafe {
                let level: u32 = node::header::<K>(level_head).level();
                let mut cur: NodePtr = level_head;
                let mut prev_high: Option<K> = None;

                while !cur.is_null() {
                    let header = node::header::<K>(cur);
                    assert_eq!(header.level(), level, "sibling chain must stay on one level");

                    if let Some(prev) = prev_high {
                        assert!(
                            prev <= header.high_key(),
                            "high keys must be non-decreasing along the chain"
                        );
                    }
                    prev_high = Some(header.high_key());
                    cur = header.sibling();
                }

                if level == 0 {
                    return;
                }
                level_head = node::as_internal::<K>(level_head).child_at(0);
            }
        }
    }
}
