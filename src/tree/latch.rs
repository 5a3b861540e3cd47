// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Latch chain: the latches held by one in-flight operation.
//!
//! A chain owns up to a fixed number of node latches in root-to-leaf order,
//! plus (optionally) the root-pointer latch that guards the map's root slot.
//! Release is LIFO and total: popping drops each node latch with the same
//! polarity it was taken, then the root-pointer latch. The chain releases
//! itself on drop so every exit path — normal completion, timeout,
//! invariant failure — unwinds its latches.
//!
//! ## Bounds
//!
//! - Optimistic descents hold at most a crabbing pair: 2 slots.
//! - Pessimistic descents hold at most the full path: 32 slots, which at
//!   the minimum fanout covers more entries than the supported capacity
//!   ceiling (`MAX_TREE_DEPTH` levels).

use crate::error::{ReedError, ReedResult};
use crate::tree::node::NodeRef;
use crate::tree::types::{Budget, Deadline};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;

/// Chain capacity for optimistic descents (crabbing pairs only).
pub(crate) const OPTIMISTIC_SLOTS: usize = 2;

/// Chain capacity for pessimistic descents (full root-to-leaf path).
pub(crate) const PESSIMISTIC_SLOTS: usize = 32;

/// Held root-pointer latch.
enum RootGuard<'t, K, V> {
    Shared(RwLockReadGuard<'t, NodeRef<K, V>>),
    Exclusive(RwLockWriteGuard<'t, NodeRef<K, V>>),
}

/// One held node latch.
struct HeldLatch<K, V> {
    node: NodeRef<K, V>,
    exclusive: bool,
}

/// The latches held by one operation, in acquisition (root-to-leaf) order.
pub(crate) struct LatchChain<'t, K, V> {
    root_guard: Option<RootGuard<'t, K, V>>,
    held: Vec<HeldLatch<K, V>>,
    slots: usize,
}

impl<'t, K, V> LatchChain<'t, K, V> {
    pub(crate) fn new(slots: usize) -> Self {
        Self {
            root_guard: None,
            held: Vec::with_capacity(slots),
            slots,
        }
    }

    /// Acquire the root-pointer latch in shared mode.
    pub(crate) fn latch_root_shared(
        &mut self,
        lock: &'t RwLock<NodeRef<K, V>>,
        deadline: &Deadline,
    ) -> bool {
        let guard = match deadline.budget() {
            Budget::Unbounded => Some(lock.read()),
            Budget::Immediate => lock.try_read(),
            Budget::Bounded(remaining) => lock.try_read_for(remaining),
        };
        match guard {
            Some(guard) => {
                self.root_guard = Some(RootGuard::Shared(guard));
                true
            }
            None => false,
        }
    }

    /// Acquire the root-pointer latch in exclusive mode.
    pub(crate) fn latch_root_exclusive(
        &mut self,
        lock: &'t RwLock<NodeRef<K, V>>,
        deadline: &Deadline,
    ) -> bool {
        let guard = match deadline.budget() {
            Budget::Unbounded => Some(lock.write()),
            Budget::Immediate => lock.try_write(),
            Budget::Bounded(remaining) => lock.try_write_for(remaining),
        };
        match guard {
            Some(guard) => {
                self.root_guard = Some(RootGuard::Exclusive(guard));
                true
            }
            None => false,
        }
    }

    /// Current root node as published in the root slot.
    ///
    /// Precondition: the root-pointer latch is held by this chain.
    pub(crate) fn root_node(&self) -> NodeRef<K, V> {
        match &self.root_guard {
            Some(RootGuard::Shared(guard)) => Arc::clone(&*guard),
            Some(RootGuard::Exclusive(guard)) => Arc::clone(&*guard),
            None => unreachable!("root latch not held"),
        }
    }

    /// Publish a new root.
    ///
    /// Precondition: the root-pointer latch is held exclusively.
    pub(crate) fn install_root(&mut self, node: NodeRef<K, V>) {
        match &mut self.root_guard {
            Some(RootGuard::Exclusive(guard)) => **guard = node,
            _ => unreachable!("root replacement without the root write latch"),
        }
    }

    #[cfg(test)]
    pub(crate) fn holds_root_guard(&self) -> bool {
        self.root_guard.is_some()
    }

    /// Latch `node` and push it onto the chain.
    ///
    /// ## Output
    /// - `Ok(true)`: latched and pushed
    /// - `Ok(false)`: timed out (chain unchanged; caller releases)
    /// - `Err(CapacityExceeded)`: chain bound hit; the chain is released
    pub(crate) fn latch(
        &mut self,
        node: &NodeRef<K, V>,
        exclusive: bool,
        deadline: &Deadline,
    ) -> ReedResult<bool> {
        if self.held.len() >= self.slots {
            self.release_all();
            return Err(ReedError::CapacityExceeded {
                depth: self.slots,
                max: self.slots,
            });
        }
        let granted = if exclusive {
            node.latch_exclusive(deadline)
        } else {
            node.latch_shared(deadline)
        };
        if granted {
            self.held.push(HeldLatch {
                node: Arc::clone(node),
                exclusive,
            });
        }
        Ok(granted)
    }

    /// Release every latch strictly above the most recently pushed node,
    /// deepest ancestor first, and drop the root-pointer latch unless the
    /// caller asks to keep it (the kept node being the root itself).
    pub(crate) fn release_ancestors(&mut self, keep_root_guard: bool) {
        if !self.held.is_empty() {
            let last = self.held.len() - 1;
            for held in self.held.drain(..last).rev() {
                Self::release_one(held);
            }
        }
        if !keep_root_guard {
            self.root_guard = None;
        }
    }

    /// Total LIFO release: node latches leaf-first, then the root pointer.
    pub(crate) fn release_all(&mut self) {
        while let Some(held) = self.held.pop() {
            Self::release_one(held);
        }
        self.root_guard = None;
    }

    /// Most recently latched node.
    ///
    /// Precondition: the chain is non-empty.
    pub(crate) fn terminal(&self) -> NodeRef<K, V> {
        match self.held.last() {
            Some(held) => Arc::clone(&held.node),
            None => unreachable!("latch chain is empty"),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.held.len()
    }

    fn release_one(held: HeldLatch<K, V>) {
        if held.exclusive {
            unsafe { held.node.unlatch_exclusive() };
        } else {
            unsafe { held.node.unlatch_shared() };
        }
    }
}

impl<'t, K, V> Drop for LatchChain<'t, K, V> {
    fn drop(&mut self) {
        self.release_all();
    }
}
