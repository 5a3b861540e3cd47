// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Tests for the latch chain.

use super::latch::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::node::Node;
    use crate::tree::types::{Deadline, Fanout};
    use parking_lot::RwLock;
    use std::sync::Arc;
    use std::thread;

    fn fanout() -> Fanout {
        Fanout::default()
    }

    #[test]
    fn test_chain_latches_and_releases_lifo() {
        let a = Node::<i32, i32>::new_leaf(fanout());
        let b = Node::<i32, i32>::new_leaf(fanout());
        let deadline = Deadline::unbounded();
        let mut chain = LatchChain::new(PESSIMISTIC_SLOTS);
        assert!(chain.latch(&a, true, &deadline).unwrap());
        assert!(chain.latch(&b, true, &deadline).unwrap());
        assert_eq!(chain.len(), 2);
        chain.release_all();
        assert_eq!(chain.len(), 0);
        // Both nodes are free again.
        assert!(a.latch_exclusive(&Deadline::new(0).unwrap()));
        assert!(b.latch_exclusive(&Deadline::new(0).unwrap()));
        unsafe {
            a.unlatch_exclusive();
            b.unlatch_exclusive();
        }
    }

    #[test]
    fn test_release_ancestors_keeps_terminal() {
        let a = Node::<i32, i32>::new_leaf(fanout());
        let b = Node::<i32, i32>::new_leaf(fanout());
        let c = Node::<i32, i32>::new_leaf(fanout());
        let deadline = Deadline::unbounded();
        let mut chain = LatchChain::new(PESSIMISTIC_SLOTS);
        chain.latch(&a, true, &deadline).unwrap();
        chain.latch(&b, false, &deadline).unwrap();
        chain.latch(&c, true, &deadline).unwrap();
        chain.release_ancestors(false);
        assert_eq!(chain.len(), 1);
        // Ancestors are free, the terminal is still held.
        assert!(a.latch_exclusive(&Deadline::new(0).unwrap()));
        assert!(b.latch_exclusive(&Deadline::new(0).unwrap()));
        assert!(!c.latch_exclusive(&Deadline::new(0).unwrap()));
        unsafe {
            a.unlatch_exclusive();
            b.unlatch_exclusive();
        }
        assert!(Arc::ptr_eq(&chain.terminal(), &c));
        chain.release_all();
    }

    #[test]
    fn test_drop_releases_everything() {
        let a = Node::<i32, i32>::new_leaf(fanout());
        {
            let mut chain = LatchChain::new(OPTIMISTIC_SLOTS);
            chain.latch(&a, true, &Deadline::unbounded()).unwrap();
        }
        assert!(a.latch_exclusive(&Deadline::new(0).unwrap()));
        unsafe { a.unlatch_exclusive() };
    }

    #[test]
    fn test_latch_timeout_on_contended_node() {
        let node = Node::<i32, i32>::new_leaf(fanout());
        node.latch_exclusive_blocking();
        let contended = Arc::clone(&node);
        let handle = thread::spawn(move || {
            let mut chain = LatchChain::new(OPTIMISTIC_SLOTS);
            let deadline = Deadline::new(5).unwrap();
            chain.latch(&contended, false, &deadline).unwrap()
        });
        assert!(!handle.join().unwrap());
        unsafe { node.unlatch_exclusive() };
    }

    #[test]
    fn test_chain_capacity_bound() {
        let deadline = Deadline::unbounded();
        let mut chain = LatchChain::new(2);
        let a = Node::<i32, i32>::new_leaf(fanout());
        let b = Node::<i32, i32>::new_leaf(fanout());
        let c = Node::<i32, i32>::new_leaf(fanout());
        chain.latch(&a, false, &deadline).unwrap();
        chain.latch(&b, false, &deadline).unwrap();
        let err = chain.latch(&c, false, &deadline).unwrap_err();
        assert!(matches!(err, crate::error::ReedError::CapacityExceeded { .. }));
        // The overflow released the chain before erroring.
        assert_eq!(chain.len(), 0);
        assert!(a.latch_exclusive(&Deadline::new(0).unwrap()));
        unsafe { a.unlatch_exclusive() };
    }

    #[test]
    fn test_root_guard_polarity_and_install() {
        let root_slot = RwLock::new(Node::<i32, i32>::new_leaf(fanout()));
        let deadline = Deadline::unbounded();
        let mut chain = LatchChain::new(PESSIMISTIC_SLOTS);
        assert!(chain.latch_root_exclusive(&root_slot, &deadline));
        let old_root = chain.root_node();
        let new_root = Node::<i32, i32>::new_leaf(fanout());
        chain.install_root(Arc::clone(&new_root));
        assert!(!Arc::ptr_eq(&chain.root_node(), &old_root));
        chain.release_all();
        assert!(Arc::ptr_eq(&*root_slot.read(), &new_root));
    }

    #[test]
    fn test_root_guard_timeout() {
        let root_slot = RwLock::new(Node::<i32, i32>::new_leaf(fanout()));
        let writer = root_slot.write();
        let mut chain = LatchChain::new(OPTIMISTIC_SLOTS);
        assert!(!chain.latch_root_shared(&root_slot, &Deadline::new(0).unwrap()));
        assert!(!chain.holds_root_guard());
        drop(writer);
        assert!(chain.latch_root_shared(&root_slot, &Deadline::new(0).unwrap()));
        assert!(chain.holds_root_guard());
    }
}
