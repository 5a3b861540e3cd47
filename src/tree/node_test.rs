// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Tests for the node cell.
//!
//! Single-threaded tests may borrow payloads directly: no other thread can
//! hold a latch.

use super::node::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::types::{Fanout, LatchIntent};

    fn fanout(k: usize) -> Fanout {
        Fanout::new(k).unwrap()
    }

    fn leaf_with(keys: &[i32]) -> NodeRef<i32, i32> {
        let node = Node::new_leaf(fanout(32));
        let payload = unsafe { node.payload_mut() };
        for &key in keys {
            let count = payload.count();
            payload.leaf_insert(count, key, -key);
        }
        node
    }

    #[test]
    fn test_leaf_search_found_and_insertion_point() {
        let node = leaf_with(&[10, 20, 30]);
        let payload = unsafe { node.payload() };
        assert_eq!(payload.leaf_search(&20), Ok(1));
        assert_eq!(payload.leaf_search(&5), Err(0));
        assert_eq!(payload.leaf_search(&25), Err(2));
        assert_eq!(payload.leaf_search(&35), Err(3));
    }

    #[test]
    fn test_leaf_insert_shifts_right() {
        let node = leaf_with(&[10, 30]);
        let payload = unsafe { node.payload_mut() };
        payload.leaf_insert(1, 20, -20);
        assert_eq!(payload.count(), 3);
        assert_eq!(*payload.leaf_key(0), 10);
        assert_eq!(*payload.leaf_key(1), 20);
        assert_eq!(*payload.leaf_key(2), 30);
        assert_eq!(*payload.leaf_value(1), -20);
    }

    #[test]
    fn test_leaf_remove_shifts_left_and_clears_tail() {
        let node = leaf_with(&[10, 20, 30]);
        let payload = unsafe { node.payload_mut() };
        let (key, value) = payload.leaf_remove(1);
        assert_eq!((key, value), (20, -20));
        assert_eq!(payload.count(), 2);
        assert_eq!(*payload.leaf_key(0), 10);
        assert_eq!(*payload.leaf_key(1), 30);
        // The vacated slot behind count is default-initialised again.
        assert_eq!(payload.leaf_search(&30), Ok(1));
    }

    #[test]
    fn test_version_bumps_on_structural_changes() {
        let node = leaf_with(&[]);
        let payload = unsafe { node.payload_mut() };
        let v0 = payload.version();
        payload.leaf_insert(0, 1, -1);
        let v1 = payload.version();
        assert_ne!(v0, v1);
        payload.leaf_remove(0);
        assert_ne!(v1, payload.version());
    }

    #[test]
    fn test_safety_predicates_at_boundaries() {
        let k = fanout(3); // min_entries = 2
        let node = Node::<i32, i32>::new_leaf(k);
        let payload = unsafe { node.payload_mut() };
        for key in [1, 2] {
            payload.leaf_insert(payload.count(), key, key);
        }
        // count = 2: insert is safe, delete is not (would underflow).
        assert!(payload.can_safely_insert(k));
        assert!(!payload.can_safely_delete(k));
        assert!(!payload.can_split(k));
        assert!(!payload.can_merge(k));
        payload.leaf_insert(2, 3, 3);
        // count = 3 = fanout: insert is no longer safe.
        assert!(!payload.can_safely_insert(k));
        assert!(payload.can_safely_delete(k));
        payload.leaf_insert(3, 4, 4);
        // count = 4 occupies the overflow slot: split required.
        assert!(payload.can_split(k));
        payload.leaf_remove(3);
        payload.leaf_remove(2);
        payload.leaf_remove(1);
        // count = 1 < min_entries: merge required.
        assert!(payload.can_merge(k));
        assert!(payload.is_safe(LatchIntent::Read, k));
        assert!(payload.is_safe(LatchIntent::Insert, k));
        assert!(!payload.is_safe(LatchIntent::DeleteTest, k));
    }

    fn internal_with(seps: &[i32]) -> NodeRef<i32, i32> {
        // Builds an internal node with children [-inf, seps...]; children are
        // empty leaves (their contents are irrelevant to routing tests).
        let node = Node::new_internal(fanout(32));
        let payload = unsafe { node.payload_mut() };
        payload.branch_insert(
            0,
            Branch {
                sep: None,
                child: Node::new_leaf(fanout(32)),
            },
        );
        for &sep in seps {
            let count = payload.count();
            payload.branch_insert(
                count,
                Branch {
                    sep: Some(sep),
                    child: Node::new_leaf(fanout(32)),
                },
            );
        }
        node
    }

    #[test]
    fn test_child_index_routing() {
        let node = internal_with(&[10, 20, 30]);
        let payload = unsafe { node.payload() };
        assert_eq!(payload.child_index(&5), 0); // below first separator
        assert_eq!(payload.child_index(&10), 1); // equal follows the separator's child
        assert_eq!(payload.child_index(&15), 1);
        assert_eq!(payload.child_index(&20), 2);
        assert_eq!(payload.child_index(&35), 3); // rightmost
    }

    #[test]
    fn test_child_index_below_is_strict() {
        let node = internal_with(&[10, 20, 30]);
        let payload = unsafe { node.payload() };
        assert_eq!(payload.child_index_below(&10), 0);
        assert_eq!(payload.child_index_below(&11), 1);
        assert_eq!(payload.child_index_below(&30), 2);
        assert_eq!(payload.child_index_below(&31), 3);
    }

    #[test]
    fn test_branch_remove_keeps_separator_assignment() {
        let node = internal_with(&[10, 20, 30]);
        let payload = unsafe { node.payload_mut() };
        let removed = payload.branch_remove(2);
        assert_eq!(removed.sep, Some(20));
        assert_eq!(payload.count(), 3);
        assert_eq!(payload.branch_sep(0), None);
        assert_eq!(payload.branch_sep(1), Some(&10));
        assert_eq!(payload.branch_sep(2), Some(&30));
    }

    #[test]
    fn test_leaf_split_into() {
        let k = fanout(3);
        let node = Node::new_leaf(k);
        let payload = unsafe { node.payload_mut() };
        for key in [1, 2, 3, 4] {
            payload.leaf_insert(payload.count(), key, -key);
        }
        let sibling = Node::new_leaf(k);
        let separator = {
            let sib = unsafe { sibling.payload_mut() };
            payload.split_into(sib, k)
        };
        assert_eq!(separator, 3);
        assert_eq!(payload.count(), 2);
        assert_eq!(*payload.leaf_key(0), 1);
        assert_eq!(*payload.leaf_key(1), 2);
        let sib = unsafe { sibling.payload() };
        assert_eq!(sib.count(), 2);
        assert_eq!(*sib.leaf_key(0), 3);
        assert_eq!(*sib.leaf_key(1), 4);
    }

    #[test]
    fn test_internal_split_promotes_separator() {
        let k = fanout(3);
        let node = Node::<i32, i32>::new_internal(k);
        let payload = unsafe { node.payload_mut() };
        payload.branch_insert(
            0,
            Branch {
                sep: None,
                child: Node::new_leaf(k),
            },
        );
        for sep in [10, 20, 30] {
            let count = payload.count();
            payload.branch_insert(
                count,
                Branch {
                    sep: Some(sep),
                    child: Node::new_leaf(k),
                },
            );
        }
        let sibling = Node::new_internal(k);
        let separator = {
            let sib = unsafe { sibling.payload_mut() };
            payload.split_into(sib, k)
        };
        // Branch (20, _) moved first: its separator is promoted and its slot
        // becomes the sibling's minus-infinity slot.
        assert_eq!(separator, 20);
        assert_eq!(payload.count(), 2);
        assert_eq!(payload.branch_sep(1), Some(&10));
        let sib = unsafe { sibling.payload() };
        assert_eq!(sib.count(), 2);
        assert_eq!(sib.branch_sep(0), None);
        assert_eq!(sib.branch_sep(1), Some(&30));
    }

    #[test]
    fn test_latch_polarity() {
        let node = leaf_with(&[1]);
        // Two shared latches coexist.
        node.latch_shared_blocking();
        assert!(node.latch_shared(&crate::tree::types::Deadline::new(0).unwrap()));
        // An exclusive attempt fails while shared latches are out.
        assert!(!node.latch_exclusive(&crate::tree::types::Deadline::new(0).unwrap()));
        unsafe {
            node.unlatch_shared();
            node.unlatch_shared();
        }
        assert!(node.latch_exclusive(&crate::tree::types::Deadline::new(0).unwrap()));
        unsafe { node.unlatch_exclusive() };
    }
}
