//! Split propagation and racy root replacement.
//!
//! Entry point is [`BLinkTree::split_leaf_and_propagate`], called with a
//! full, write-locked leaf and the stack of internal ancestors recorded
//! during descent. The separator walks upward one level at a time:
//!
//! 1. Split the current node; the right half inherits sibling and high key
//!    and becomes reachable through the left half's sibling pointer.
//! 2. Lock the parent (chasing its sibling chain if the separator has moved
//!    rightward since descent), *then* unlock the left half. Readers that
//!    arrive through the parent's stale routing land on the left half and
//!    recover through its sibling pointer; unlocking before the parent
//!    publishes the separator is what keeps the critical section to at most
//!    two locks.
//! 3. If the parent has room, install the separator and stop. Otherwise
//!    split the parent and repeat.
//!
//! The stack can run dry while the split node is not the root: the root
//! pointer was read without locks at descent time, and another thread may
//! have grown the tree since. [`BLinkTree::install_separator`] handles that
//! by re-descending from the current root to the level just above the split
//! node, routing by the separator itself.

use crate::internal::InternalNode;
use crate::key::Key;
use crate::leaf::LeafNode;
use crate::node::{self, NodePtr};
use crate::nodeversion::Restart;
use crate::ordering::{READ_ORD, WRITE_ORD};
use crate::tracing_helpers::debug_log;

use super::BLinkTree;

impl<K: Key> BLinkTree<K> {
    /// Split a full, write-locked leaf, place the pending entry in the
    /// correct half, and push the separator upward.
    pub(super) fn split_leaf_and_propagate(
        &self,
        leaf_ptr: NodePtr,
        key: K,
        value: u64,
        stack: &mut Vec<NodePtr>,
    ) {
        // SAFETY: leaf_ptr is a live leaf, write-locked by the caller.
        let leaf: &LeafNode<K> = unsafe { node::as_leaf::<K>(leaf_ptr) };
        let (right, separator) = leaf.split();

        if key <= separator {
            leaf.insert(key, value);
        } else {
            // SAFETY: the right half is only reachable through the locked
            // left half, so we still have exclusive access.
            unsafe { &*right }.insert(key, value);
        }

        self.propagate(separator, leaf_ptr, right.cast::<u8>(), stack);
    }

    /// Walk the ancestor stack, installing `separator -> right` one level up
    /// from the locked `left` node.
    ///
    /// On entry and at the top of every iteration, `left` is write-locked
    /// and `right` is its freshly split, not-yet-published sibling.
    fn propagate(&self, mut separator: K, mut left: NodePtr, mut right: NodePtr, stack: &mut Vec<NodePtr>) {
        loop {
            let Some(parent_hint) = stack.pop() else {
                if left == self.root.load(READ_ORD) {
                    self.grow_root(separator, left, right);
                    // SAFETY: left is live and locked by us.
                    unsafe { node::header::<K>(left) }.version.write_unlock();
                } else {
                    // The root changed during our descent; find the parent
                    // level from the current root.
                    self.install_separator(separator, right, left);
                }
                return;
            };

            let parent: NodePtr = self.lock_and_chase(parent_hint, separator);

            // Parent locked: release the left half before publishing the
            // separator. Stale descents reach it and chain rightward.
            // SAFETY: left is live and locked by us.
            unsafe { node::header::<K>(left) }.version.write_unlock();

            // SAFETY: stack entries and their sibling chains are live
            // internal nodes; lock_and_chase returned it write-locked.
            let parent_node: &InternalNode<K> = unsafe { node::as_internal::<K>(parent) };

            if !parent_node.is_full() {
                parent_node.insert(separator, right);
                parent_node.header().version.write_unlock();
                return;
            }

            let (new_right, new_separator) = parent_node.split();
            if separator <= new_separator {
                parent_node.insert(separator, right);
            } else {
                // SAFETY: the right half is unreachable until the locked
                // left half is released.
                unsafe { &*new_right }.insert(separator, right);
            }

            left = parent;
            right = new_right.cast::<u8>();
            separator = new_separator;
        }
    }

    /// Lock the node responsible for `separator` on `start`'s level.
    ///
    /// Chases the sibling chain while the separator lies past a node's
    /// bound. Retries locally (from `start`, not from the root) until the
    /// chase validates and the lock upgrade wins.
    fn lock_and_chase(&self, start: NodePtr, separator: K) -> NodePtr {
        loop {
            // SAFETY: start came off the descent stack and sibling chains
            // only ever extend; all pointers stay live for the tree's life.
            unsafe {
                let mut cur: NodePtr = start;
                let Ok(mut token) = node::header::<K>(cur).version.begin_read() else {
                    continue;
                };

                let chased: Result<(), Restart> = loop {
                    let header = node::header::<K>(cur);
                    let sibling: NodePtr = header.sibling();

                    if sibling.is_null() || separator <= header.high_key() {
                        break Ok(());
                    }

                    let Ok(sibling_token) = node::header::<K>(sibling).version.begin_read() else {
                        break Err(Restart);
                    };
                    if header.version.validate(token).is_err() {
                        break Err(Restart);
                    }

                    cur = sibling;
                    token = sibling_token;
                };

                if chased.is_err() {
                    continue;
                }

                if node::header::<K>(cur).version.try_upgrade(token).is_ok() {
                    return cur;
                }
            }
        }
    }

    /// Replace the root with a fresh internal node over a split pair.
    ///
    /// Caller holds `left`'s write lock and has verified `left` is the
    /// current root, so no other thread can be growing the root at the same
    /// time: doing so would require this same lock.
    fn grow_root(&self, separator: K, left: NodePtr, right: NodePtr) {
        // SAFETY: left is locked by us; right is not yet published.
        let (level, high_key) = unsafe {
            let left_header = node::header::<K>(left);
            (left_header.level() + 1, node::header::<K>(right).high_key())
        };

        let root: Box<InternalNode<K>> = InternalNode::new_root(
            self.internal_cardinality,
            separator,
            left,
            right,
            high_key,
            level,
        );
        self.root.store(Box::into_raw(root).cast::<u8>(), WRITE_ORD);

        debug_log!(root_level = level, "root grown");
    }

    /// Install `separator -> right` at the level above the locked `left`
    /// node when the ancestor that should receive it was not on the stack.
    ///
    /// Re-descends from the current root routing by the separator; the tree
    /// may have grown arbitrarily since the original descent, and may grow
    /// again while this runs, hence the recursion when the target level
    /// itself splits.
    fn install_separator(&self, separator: K, right: NodePtr, left: NodePtr) {
        // SAFETY: left is live and locked by us.
        let target_level: u32 = unsafe { node::header::<K>(left) }.level() + 1;

        debug_log!(target_level, "installing separator after root change");

        'restart: loop {
            let mut cur: NodePtr = self.root.load(READ_ORD);

            // SAFETY: the tree only ever grows, so the current root sits at
            // or above target_level and every routed pointer is live.
            unsafe {
                debug_assert!(node::header::<K>(cur).level() >= target_level);

                let Ok(mut token) = node::header::<K>(cur).version.begin_read() else {
                    continue 'restart;
                };

                while node::header::<K>(cur).level() != target_level {
                    let (child, _) = node::as_internal::<K>(cur).scan_child(separator);

                    let Ok(child_token) = node::header::<K>(child).version.begin_read() else {
                        continue 'restart;
                    };
                    if node::header::<K>(cur).version.validate(token).is_err() {
                        continue 'restart;
                    }

                    cur = child;
                    token = child_token;
                }

                // Chase right along the target level.
                loop {
                    let header = node::header::<K>(cur);
                    let sibling: NodePtr = header.sibling();

                    if sibling.is_null() || separator <= header.high_key() {
                        break;
                    }

                    let Ok(sibling_token) = node::header::<K>(sibling).version.begin_read() else {
                        continue 'restart;
                    };
                    if header.version.validate(token).is_err() {
                        continue 'restart;
                    }

                    cur = sibling;
                    token = sibling_token;
                }

                if node::header::<K>(cur).version.try_upgrade(token).is_err() {
                    continue 'restart;
                }

                node::header::<K>(left).version.write_unlock();

                let target: &InternalNode<K> = node::as_internal::<K>(cur);
                if !target.is_full() {
                    target.insert(separator, right);
                    target.header().version.write_unlock();
                    return;
                }

                let (new_right, new_separator) = target.split();
                if separator <= new_separator {
                    target.insert(separator, right);
                } else {
                    (*new_right).insert(separator, right);
                }

                if cur == self.root.load(READ_ORD) {
                    self.grow_root(new_separator, cur, new_right.cast::<u8>());
                    target.header().version.write_unlock();
                } else {
                    // Grown again in the meantime; one level per recursion.
                    self.install_separator(new_separator, new_right.cast::<u8>(), cur);
                }
                return;
            }
        }
    }
}
