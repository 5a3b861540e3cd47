// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Rebalancer: split on overflow, merge or adopt on underflow.
//!
//! Both walks run bottom-up along latches the descent chain already holds:
//! a node only overflows or underflows after a mutation the chain latched
//! pessimistically, and crabbing guarantees every ancestor the walk can
//! reach is still write-latched. Siblings touched by adopt/merge are not on
//! the chain; they are latched exclusively for the span of the transfer.
//! Any thread currently inside such a sibling released the shared parent —
//! which it could only do because the sibling was safe for its intent — so
//! it is performing a node-local mutation and the wait is bounded.
//!
//! Root replacement (split at the root, collapse at the root) publishes the
//! new root through the chain's root-pointer write latch.

use crate::error::{ReedError, ReedResult};
use crate::tree::latch::LatchChain;
use crate::tree::map::ReedMap;
use crate::tree::node::{Branch, Node, NodeKind, NodeRef};
use crate::tree::types::{Fanout, MAX_TREE_DEPTH};
use log::debug;
use std::sync::Arc;

/// Split `node` if it overflowed, propagating upwards.
///
/// Precondition: `node` and every ancestor the split can reach are
/// exclusively latched on `chain`.
pub(crate) fn split_overflow<'t, K, V>(
    tree: &'t ReedMap<K, V>,
    chain: &mut LatchChain<'t, K, V>,
    node: NodeRef<K, V>,
) -> ReedResult<()>
where
    K: Ord + Clone,
{
    let fanout = tree.fanout();
    let parent = {
        let payload = unsafe { node.payload() };
        if !payload.can_split(fanout) {
            return Ok(());
        }
        payload.parent()
    };

    match parent {
        None => {
            // Splitting the root grows the tree by one level. The depth
            // ceiling is checked before anything is allocated so a refusal
            // leaves no partially-installed root behind.
            let depth = tree.depth();
            if depth >= MAX_TREE_DEPTH {
                return Err(ReedError::CapacityExceeded {
                    depth,
                    max: MAX_TREE_DEPTH,
                });
            }
            let (separator, sibling) = split_node(&node, fanout);
            let new_root = Node::new_internal(fanout);
            {
                let root_payload = unsafe { new_root.payload_mut() };
                root_payload.branch_insert(
                    0,
                    Branch {
                        sep: None,
                        child: Arc::clone(&node),
                    },
                );
                root_payload.branch_insert(
                    1,
                    Branch {
                        sep: Some(separator),
                        child: Arc::clone(&sibling),
                    },
                );
            }
            unsafe { node.payload_mut() }.set_parent(&new_root);
            unsafe { sibling.payload_mut() }.set_parent(&new_root);
            chain.install_root(new_root);
            tree.bump_depth(1);
            tree.note_split();
            tree.note_root_replacement();
            debug!("root split: tree depth is now {}", depth + 1);
            Ok(())
        }
        Some(parent) => {
            let (separator, sibling) = split_node(&node, fanout);
            unsafe { sibling.payload_mut() }.set_parent(&parent);
            let slot = child_slot_of(&parent, &node);
            unsafe { parent.payload_mut() }.branch_insert(
                slot + 1,
                Branch {
                    sep: Some(separator),
                    child: sibling,
                },
            );
            tree.note_split();
            split_overflow(tree, chain, parent)
        }
    }
}

/// Split the upper half of `node` into a fresh sibling of the same kind.
///
/// The sibling is unpublished until the caller links it into the parent, so
/// it needs no latch. Children moved into an internal sibling are
/// retargeted here, under `node`'s exclusive latch (which guards their
/// parent fields).
fn split_node<K, V>(node: &NodeRef<K, V>, fanout: Fanout) -> (K, NodeRef<K, V>)
where
    K: Ord + Clone,
{
    let sibling = match node.kind() {
        NodeKind::Leaf => Node::new_leaf(fanout),
        NodeKind::Internal => Node::new_internal(fanout),
    };
    let separator = {
        let payload = unsafe { node.payload_mut() };
        let sibling_payload = unsafe { sibling.payload_mut() };
        payload.split_into(sibling_payload, fanout)
    };
    if sibling.is_internal() {
        let sibling_payload = unsafe { sibling.payload() };
        for index in 0..sibling_payload.count() {
            unsafe { sibling_payload.child(index).payload_mut() }.set_parent(&sibling);
        }
    }
    (separator, sibling)
}

/// Merge or adopt around `node` if it underflowed, propagating upwards.
///
/// Precondition as for [`split_overflow`].
pub(crate) fn merge_underflow<'t, K, V>(
    tree: &'t ReedMap<K, V>,
    chain: &mut LatchChain<'t, K, V>,
    node: NodeRef<K, V>,
) -> ReedResult<()>
where
    K: Ord + Clone,
{
    let fanout = tree.fanout();
    let parent = {
        let payload = unsafe { node.payload() };
        match payload.parent() {
            None => {
                // Root cases. An internal root reduced to a single child is
                // collapsed; an underflowed root leaf is legal as-is.
                if node.is_internal() && payload.count() == 1 {
                    let child = Arc::clone(payload.child(0));
                    unsafe { child.payload_mut() }.clear_parent();
                    chain.install_root(child);
                    let depth = tree.depth();
                    tree.bump_depth(-1);
                    tree.note_root_replacement();
                    debug!("root collapse: tree depth is now {}", depth - 1);
                }
                return Ok(());
            }
            Some(parent) => {
                if !payload.can_merge(fanout) {
                    return Ok(());
                }
                parent
            }
        }
    };

    let slot = child_slot_of(&parent, &node);
    let (left, right) = {
        let parent_payload = unsafe { parent.payload() };
        let left = (slot > 0).then(|| Arc::clone(parent_payload.child(slot - 1)));
        let right = (slot + 1 < parent_payload.count())
            .then(|| Arc::clone(parent_payload.child(slot + 1)));
        (left, right)
    };

    // Adoption first: it repairs the underflow without touching the
    // parent's entry count. Left before right.
    if let Some(left) = &left {
        left.latch_exclusive_blocking();
        let adopted = adopt_from_left(&parent, left, &node, slot, fanout);
        unsafe { left.unlatch_exclusive() };
        if adopted {
            tree.note_adoption();
            return Ok(());
        }
    }
    if let Some(right) = &right {
        right.latch_exclusive_blocking();
        let adopted = adopt_from_right(&parent, &node, right, slot, fanout);
        unsafe { right.unlatch_exclusive() };
        if adopted {
            tree.note_adoption();
            return Ok(());
        }
    }

    // No donor: merge. The emptied node is unlinked from the parent and its
    // parent reference cleared; once its latch drops no references remain.
    if let Some(right) = right {
        right.latch_exclusive_blocking();
        merge_right_into(&parent, &node, &right, slot);
        unsafe { right.unlatch_exclusive() };
    } else if let Some(left) = left {
        left.latch_exclusive_blocking();
        merge_into_left(&parent, &left, &node, slot);
        unsafe { left.unlatch_exclusive() };
    } else {
        unreachable!("non-root node without siblings");
    }
    tree.note_merge();
    merge_underflow(tree, chain, parent)
}

/// Move the left sibling's greatest entry to the front of `node`.
fn adopt_from_left<K, V>(
    parent: &NodeRef<K, V>,
    left: &NodeRef<K, V>,
    node: &NodeRef<K, V>,
    slot: usize,
    fanout: Fanout,
) -> bool
where
    K: Ord + Clone,
{
    let left_payload = unsafe { left.payload_mut() };
    if !left_payload.can_safely_delete(fanout) {
        return false;
    }
    let node_payload = unsafe { node.payload_mut() };
    let parent_payload = unsafe { parent.payload_mut() };
    match node.kind() {
        NodeKind::Leaf => {
            let last = left_payload.count() - 1;
            let (key, value) = left_payload.leaf_remove(last);
            node_payload.leaf_insert(0, key.clone(), value);
            parent_payload.set_branch_sep(slot, Some(key));
        }
        NodeKind::Internal => {
            let last = left_payload.count() - 1;
            let donor = left_payload.branch_remove(last);
            // The old slot-0 branch stops being leftmost: it takes the
            // node's former lower bound as its separator.
            let old_bound = parent_payload.branch_sep(slot).cloned();
            node_payload.set_branch_sep(0, old_bound);
            unsafe { donor.child.payload_mut() }.set_parent(node);
            node_payload.branch_insert(
                0,
                Branch {
                    sep: None,
                    child: donor.child,
                },
            );
            parent_payload.set_branch_sep(slot, donor.sep);
        }
    }
    true
}

/// Move the right sibling's smallest entry to the tail of `node`.
fn adopt_from_right<K, V>(
    parent: &NodeRef<K, V>,
    node: &NodeRef<K, V>,
    right: &NodeRef<K, V>,
    slot: usize,
    fanout: Fanout,
) -> bool
where
    K: Ord + Clone,
{
    let right_payload = unsafe { right.payload_mut() };
    if !right_payload.can_safely_delete(fanout) {
        return false;
    }
    let node_payload = unsafe { node.payload_mut() };
    let parent_payload = unsafe { parent.payload_mut() };
    match node.kind() {
        NodeKind::Leaf => {
            let (key, value) = right_payload.leaf_remove(0);
            node_payload.leaf_push(key, value);
            let new_min = right_payload.leaf_key(0).clone();
            parent_payload.set_branch_sep(slot + 1, Some(new_min));
        }
        NodeKind::Internal => {
            // The donated slot-0 branch's true lower bound is the right
            // sibling's separator in the parent.
            let bound = parent_payload.branch_sep(slot + 1).cloned();
            let donor = right_payload.branch_remove(0);
            // The right sibling's new first branch becomes its
            // minus-infinity slot; its separator moves up to the parent.
            let promoted = right_payload.take_branch_sep(0);
            unsafe { donor.child.payload_mut() }.set_parent(node);
            node_payload.branch_push(Branch {
                sep: bound,
                child: donor.child,
            });
            parent_payload.set_branch_sep(slot + 1, promoted);
        }
    }
    true
}

/// Concatenate the right sibling's entries after `node`'s and drop the
/// sibling's slot from the parent.
fn merge_right_into<K, V>(
    parent: &NodeRef<K, V>,
    node: &NodeRef<K, V>,
    right: &NodeRef<K, V>,
    slot: usize,
) where
    K: Ord + Clone,
{
    let node_payload = unsafe { node.payload_mut() };
    let right_payload = unsafe { right.payload_mut() };
    let parent_payload = unsafe { parent.payload_mut() };
    match node.kind() {
        NodeKind::Leaf => {
            while right_payload.count() > 0 {
                let (key, value) = right_payload.leaf_remove(0);
                node_payload.leaf_push(key, value);
            }
        }
        NodeKind::Internal => {
            let bound = parent_payload.branch_sep(slot + 1).cloned();
            let mut first = true;
            while right_payload.count() > 0 {
                let mut branch = right_payload.branch_remove(0);
                if first {
                    // Replace the minus-infinity marker with the sibling's
                    // real lower bound before concatenation.
                    branch.sep = bound.clone();
                    first = false;
                }
                unsafe { branch.child.payload_mut() }.set_parent(node);
                node_payload.branch_push(branch);
            }
        }
    }
    parent_payload.branch_remove(slot + 1);
    right_payload.clear_parent();
}

/// Concatenate `node`'s entries after the left sibling's and drop `node`'s
/// slot from the parent.
fn merge_into_left<K, V>(
    parent: &NodeRef<K, V>,
    left: &NodeRef<K, V>,
    node: &NodeRef<K, V>,
    slot: usize,
) where
    K: Ord + Clone,
{
    let left_payload = unsafe { left.payload_mut() };
    let node_payload = unsafe { node.payload_mut() };
    let parent_payload = unsafe { parent.payload_mut() };
    match node.kind() {
        NodeKind::Leaf => {
            while node_payload.count() > 0 {
                let (key, value) = node_payload.leaf_remove(0);
                left_payload.leaf_push(key, value);
            }
        }
        NodeKind::Internal => {
            let bound = parent_payload.branch_sep(slot).cloned();
            let mut first = true;
            while node_payload.count() > 0 {
                let mut branch = node_payload.branch_remove(0);
                if first {
                    branch.sep = bound.clone();
                    first = false;
                }
                unsafe { branch.child.payload_mut() }.set_parent(left);
                left_payload.branch_push(branch);
            }
        }
    }
    parent_payload.branch_remove(slot);
    node_payload.clear_parent();
}

/// Locate `node`'s slot in its parent by searching for a key known to lie
/// under `node`.
fn child_slot_of<K, V>(parent: &NodeRef<K, V>, node: &NodeRef<K, V>) -> usize
where
    K: Ord + Clone,
{
    let key = anchor_key(node);
    let parent_payload = unsafe { parent.payload() };
    let slot = parent_payload.child_index(&key);
    debug_assert!(Arc::ptr_eq(parent_payload.child(slot), node));
    slot
}

/// A key guaranteed to lie within `node`'s subtree.
///
/// For a leaf that is its first key; for an internal node its second
/// branch's separator. An internal node transiently reduced to a single
/// branch (by a merge not yet propagated) borrows the minimum key of its
/// first child instead.
fn anchor_key<K, V>(node: &NodeRef<K, V>) -> K
where
    K: Ord + Clone,
{
    let payload = unsafe { node.payload() };
    match node.kind() {
        NodeKind::Leaf => payload.leaf_key(0).clone(),
        NodeKind::Internal => match payload.branch_sep(1) {
            Some(sep) if payload.count() >= 2 => sep.clone(),
            _ => min_key_below(Arc::clone(payload.child(0))),
        },
    }
}

/// Walk to the leftmost leaf under `start` and return its first key.
///
/// Each visited node is latched shared for the read. The structure below
/// the caller's write-latched node is frozen (any thread still inside it
/// can only perform node-local mutations), so the walk cannot lose its
/// footing; entry contents may move within a node, which is harmless here
/// because any key under the node anchors the parent search equally well.
fn min_key_below<K, V>(start: NodeRef<K, V>) -> K
where
    K: Ord + Clone,
{
    let mut node = start;
    loop {
        node.latch_shared_blocking();
        match node.kind() {
            NodeKind::Leaf => {
                let key = unsafe { node.payload() }.leaf_key(0).clone();
                unsafe { node.unlatch_shared() };
                return key;
            }
            NodeKind::Internal => {
                let child = Arc::clone(unsafe { node.payload() }.child(0));
                unsafe { node.unlatch_shared() };
                node = child;
            }
        }
    }
}
