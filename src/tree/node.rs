// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! B+ tree node cell with a per-node reader-writer latch.
//!
//! A node is a fixed-capacity array of `fanout + 1` slots (the extra slot
//! absorbs the transient overflow between an insert and the split that
//! follows), guarded by a raw reader-writer latch. Leaves hold key-value
//! pairs; internal nodes hold separator-child branches where slot 0 carries
//! the logical minus-infinity separator (represented as `None`).
//!
//! ## Latch protocol
//!
//! The payload lives in an `UnsafeCell` and is only dereferenced while the
//! node's latch is held: shared for reads, exclusive for writes. A node's
//! `parent` back-reference is additionally guarded by the *parent's*
//! exclusive latch: every retarget happens while the node's current parent
//! is write-latched, and every reader of the field holds that same latch
//! (directly or through the latch chain).
//!
//! ## Structure
//!
//! ```text
//! Leaf:     [ (k0,v0) (k1,v1) ... (kn,vn) | overflow ]
//! Internal: [ (-inf,c0) (s1,c1) ... (sn,cn) | overflow ]
//!            keys under c0 < s1 <= keys under c1 < s2 <= ...
//! ```

use crate::tree::types::{Budget, Deadline, Fanout, LatchIntent};
use parking_lot::lock_api::{RawRwLock as RawLatch, RawRwLockTimed as _};
use parking_lot::RawRwLock;
use std::cell::UnsafeCell;
use std::sync::{Arc, Weak};

/// Shared handle to a node. Ownership flows root-to-leaf through the child
/// slots of internal nodes; parents are referenced weakly.
pub(crate) type NodeRef<K, V> = Arc<Node<K, V>>;

/// Node kind discriminator. Immutable for the lifetime of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeKind {
    Leaf,
    Internal,
}

/// Separator-child branch of an internal node.
///
/// `sep` is `None` only in slot 0, where it stands for minus infinity.
pub(crate) struct Branch<K, V> {
    pub(crate) sep: Option<K>,
    pub(crate) child: NodeRef<K, V>,
}

/// Slot storage, selected once at node creation.
pub(crate) enum Entries<K, V> {
    Leaf(Box<[Option<(K, V)>]>),
    Internal(Box<[Option<Branch<K, V>>]>),
}

/// Latched payload of a node.
pub(crate) struct NodeInner<K, V> {
    entries: Entries<K, V>,
    count: usize,
    parent: Weak<Node<K, V>>,
    version: u32,
}

/// One B+ tree node: immutable kind, reader-writer latch, latched payload.
pub(crate) struct Node<K, V> {
    kind: NodeKind,
    latch: RawRwLock,
    cell: UnsafeCell<NodeInner<K, V>>,
}

// The payload is only touched under the latch; see the latch protocol above.
unsafe impl<K: Send + Sync, V: Send + Sync> Send for Node<K, V> {}
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for Node<K, V> {}

impl<K, V> Node<K, V> {
    /// Create an empty leaf node.
    pub(crate) fn new_leaf(fanout: Fanout) -> NodeRef<K, V> {
        Arc::new(Self {
            kind: NodeKind::Leaf,
            latch: RawRwLock::INIT,
            cell: UnsafeCell::new(NodeInner {
                entries: Entries::Leaf(empty_slots(fanout.slot_count())),
                count: 0,
                parent: Weak::new(),
                version: 0,
            }),
        })
    }

    /// Create an empty internal node.
    pub(crate) fn new_internal(fanout: Fanout) -> NodeRef<K, V> {
        Arc::new(Self {
            kind: NodeKind::Internal,
            latch: RawRwLock::INIT,
            cell: UnsafeCell::new(NodeInner {
                entries: Entries::Internal(empty_slots(fanout.slot_count())),
                count: 0,
                parent: Weak::new(),
                version: 0,
            }),
        })
    }

    /// Node kind (readable without the latch: immutable).
    pub(crate) fn kind(&self) -> NodeKind {
        self.kind
    }

    pub(crate) fn is_leaf(&self) -> bool {
        self.kind == NodeKind::Leaf
    }

    pub(crate) fn is_internal(&self) -> bool {
        self.kind == NodeKind::Internal
    }

    /// Acquire the latch in shared mode within the deadline's budget.
    pub(crate) fn latch_shared(&self, deadline: &Deadline) -> bool {
        match deadline.budget() {
            Budget::Unbounded => {
                self.latch.lock_shared();
                true
            }
            Budget::Immediate => self.latch.try_lock_shared(),
            Budget::Bounded(remaining) => self.latch.try_lock_shared_for(remaining),
        }
    }

    /// Acquire the latch in exclusive mode within the deadline's budget.
    pub(crate) fn latch_exclusive(&self, deadline: &Deadline) -> bool {
        match deadline.budget() {
            Budget::Unbounded => {
                self.latch.lock_exclusive();
                true
            }
            Budget::Immediate => self.latch.try_lock_exclusive(),
            Budget::Bounded(remaining) => self.latch.try_lock_exclusive_for(remaining),
        }
    }

    /// Blocking shared acquisition (used by scans and the rebalancer).
    pub(crate) fn latch_shared_blocking(&self) {
        self.latch.lock_shared();
    }

    /// Blocking exclusive acquisition (used by the rebalancer on siblings).
    pub(crate) fn latch_exclusive_blocking(&self) {
        self.latch.lock_exclusive();
    }

    /// Release a shared latch previously acquired on this node.
    ///
    /// ## Safety
    /// The caller must hold a shared latch on this node.
    pub(crate) unsafe fn unlatch_shared(&self) {
        self.latch.unlock_shared();
    }

    /// Release an exclusive latch previously acquired on this node.
    ///
    /// ## Safety
    /// The caller must hold the exclusive latch on this node.
    pub(crate) unsafe fn unlatch_exclusive(&self) {
        self.latch.unlock_exclusive();
    }

    /// Borrow the payload for reading.
    ///
    /// ## Safety
    /// The caller must hold this node's latch (shared or exclusive) and must
    /// not let the borrow outlive the latch.
    #[allow(clippy::missing_safety_doc)]
    pub(crate) unsafe fn payload(&self) -> &NodeInner<K, V> {
        &*self.cell.get()
    }

    /// Borrow the payload for writing.
    ///
    /// ## Safety
    /// The caller must hold this node's exclusive latch, must not let the
    /// borrow outlive the latch, and must not create a second payload borrow
    /// of the same node while this one is live.
    #[allow(clippy::mut_from_ref, clippy::missing_safety_doc)]
    pub(crate) unsafe fn payload_mut(&self) -> &mut NodeInner<K, V> {
        &mut *self.cell.get()
    }
}

fn empty_slots<T>(count: usize) -> Box<[Option<T>]> {
    std::iter::repeat_with(|| None).take(count).collect()
}

impl<K: Ord, V> NodeInner<K, V> {
    /// Number of occupied entries.
    pub(crate) fn count(&self) -> usize {
        self.count
    }

    /// Structural version counter (debug harness only).
    #[cfg(test)]
    pub(crate) fn version(&self) -> u32 {
        self.version
    }

    /// Upgrade the parent back-reference. `None` means this node is the root
    /// (or has been detached by a merge).
    pub(crate) fn parent(&self) -> Option<NodeRef<K, V>> {
        self.parent.upgrade()
    }

    pub(crate) fn set_parent(&mut self, parent: &NodeRef<K, V>) {
        self.parent = Arc::downgrade(parent);
    }

    pub(crate) fn clear_parent(&mut self) {
        self.parent = Weak::new();
    }

    fn touch(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    // ------------------------------------------------------------------
    // Safety predicates
    // ------------------------------------------------------------------

    /// Post-insert will not overflow.
    pub(crate) fn can_safely_insert(&self, fanout: Fanout) -> bool {
        self.count < fanout.max_entries()
    }

    /// Post-delete will not underflow.
    pub(crate) fn can_safely_delete(&self, fanout: Fanout) -> bool {
        self.count > fanout.min_entries()
    }

    /// Overflowed: a split is required.
    pub(crate) fn can_split(&self, fanout: Fanout) -> bool {
        self.count > fanout.max_entries()
    }

    /// Underflowed: a merge or adoption is required.
    pub(crate) fn can_merge(&self, fanout: Fanout) -> bool {
        self.count < fanout.min_entries()
    }

    /// Whether the intended point mutation cannot cascade past this node.
    pub(crate) fn is_safe(&self, intent: LatchIntent, fanout: Fanout) -> bool {
        match intent {
            LatchIntent::Read => true,
            LatchIntent::Insert | LatchIntent::InsertTest => self.can_safely_insert(fanout),
            LatchIntent::Delete | LatchIntent::DeleteTest => self.can_safely_delete(fanout),
        }
    }

    // ------------------------------------------------------------------
    // Leaf operations
    // ------------------------------------------------------------------

    fn leaf_slots(&self) -> &[Option<(K, V)>] {
        match &self.entries {
            Entries::Leaf(slots) => slots,
            Entries::Internal(_) => unreachable!("leaf access on internal node"),
        }
    }

    fn leaf_slots_mut(&mut self) -> &mut [Option<(K, V)>] {
        match &mut self.entries {
            Entries::Leaf(slots) => slots,
            Entries::Internal(_) => unreachable!("leaf access on internal node"),
        }
    }

    /// Binary search the occupied leaf slots.
    ///
    /// ## Output
    /// - `Ok(index)`: Key present at `index`
    /// - `Err(index)`: Key absent; `index` is its insertion position
    pub(crate) fn leaf_search(&self, key: &K) -> Result<usize, usize> {
        self.leaf_slots()[..self.count].binary_search_by(|slot| match slot {
            Some((k, _)) => k.cmp(key),
            None => std::cmp::Ordering::Greater,
        })
    }

    pub(crate) fn leaf_key(&self, index: usize) -> &K {
        match &self.leaf_slots()[index] {
            Some((key, _)) => key,
            None => unreachable!("empty leaf slot {}", index),
        }
    }

    pub(crate) fn leaf_value(&self, index: usize) -> &V {
        match &self.leaf_slots()[index] {
            Some((_, value)) => value,
            None => unreachable!("empty leaf slot {}", index),
        }
    }

    pub(crate) fn leaf_value_mut(&mut self, index: usize) -> &mut V {
        match &mut self.leaf_slots_mut()[index] {
            Some((_, value)) => value,
            None => unreachable!("empty leaf slot {}", index),
        }
    }

    /// Insert a pair at `index`, shifting `[index, count)` right by one.
    ///
    /// Precondition: the caller holds this node's exclusive latch and
    /// `count < slot_count` (the overflow slot is the last resort).
    pub(crate) fn leaf_insert(&mut self, index: usize, key: K, value: V) {
        let count = self.count;
        {
            let slots = self.leaf_slots_mut();
            debug_assert!(count < slots.len());
            debug_assert!(index <= count);
            slots[index..=count].rotate_right(1);
            slots[index] = Some((key, value));
        }
        self.count += 1;
        self.touch();
    }

    /// Remove the pair at `index`, shifting `[index + 1, count)` left by one.
    pub(crate) fn leaf_remove(&mut self, index: usize) -> (K, V) {
        let count = self.count;
        let pair = {
            let slots = self.leaf_slots_mut();
            debug_assert!(index < count);
            let pair = slots[index].take();
            slots[index..count].rotate_left(1);
            pair
        };
        self.count -= 1;
        self.touch();
        match pair {
            Some(pair) => pair,
            None => unreachable!("empty leaf slot {}", index),
        }
    }

    /// Append a pair after the current last entry.
    pub(crate) fn leaf_push(&mut self, key: K, value: V) {
        let count = self.count;
        self.leaf_insert(count, key, value);
    }

    // ------------------------------------------------------------------
    // Internal-node operations
    // ------------------------------------------------------------------

    fn branch_slots(&self) -> &[Option<Branch<K, V>>] {
        match &self.entries {
            Entries::Internal(slots) => slots,
            Entries::Leaf(_) => unreachable!("branch access on leaf node"),
        }
    }

    fn branch_slots_mut(&mut self) -> &mut [Option<Branch<K, V>>] {
        match &mut self.entries {
            Entries::Internal(slots) => slots,
            Entries::Leaf(_) => unreachable!("branch access on leaf node"),
        }
    }

    /// Greatest child index whose separator is <= `key`.
    ///
    /// Slot 0 carries the minus-infinity separator, so the result is always
    /// a valid child index. A key equal to a separator follows that
    /// separator's own child.
    pub(crate) fn child_index(&self, key: &K) -> usize {
        let slots = &self.branch_slots()[..self.count];
        slots[1..].partition_point(|slot| match slot {
            Some(branch) => match &branch.sep {
                Some(sep) => sep <= key,
                None => true,
            },
            None => false,
        })
    }

    /// Greatest child index whose separator is strictly below `key`.
    ///
    /// Used by reverse scans to step into the subtree left of a boundary.
    pub(crate) fn child_index_below(&self, key: &K) -> usize {
        let slots = &self.branch_slots()[..self.count];
        slots[1..].partition_point(|slot| match slot {
            Some(branch) => match &branch.sep {
                Some(sep) => sep < key,
                None => true,
            },
            None => false,
        })
    }

    pub(crate) fn child(&self, index: usize) -> &NodeRef<K, V> {
        match &self.branch_slots()[index] {
            Some(branch) => &branch.child,
            None => unreachable!("empty branch slot {}", index),
        }
    }

    /// Separator of the branch at `index` (`None` for the slot-0 branch, or
    /// for an unoccupied slot).
    pub(crate) fn branch_sep(&self, index: usize) -> Option<&K> {
        self.branch_slots()[index]
            .as_ref()
            .and_then(|branch| branch.sep.as_ref())
    }

    pub(crate) fn set_branch_sep(&mut self, index: usize, sep: Option<K>) {
        {
            let slots = self.branch_slots_mut();
            match &mut slots[index] {
                Some(branch) => branch.sep = sep,
                None => unreachable!("empty branch slot {}", index),
            }
        }
        self.touch();
    }

    /// Take the separator at `index`, leaving the minus-infinity marker.
    pub(crate) fn take_branch_sep(&mut self, index: usize) -> Option<K> {
        let sep = {
            let slots = self.branch_slots_mut();
            match &mut slots[index] {
                Some(branch) => branch.sep.take(),
                None => unreachable!("empty branch slot {}", index),
            }
        };
        self.touch();
        sep
    }

    /// Insert a branch at `index`, shifting `[index, count)` right by one.
    pub(crate) fn branch_insert(&mut self, index: usize, branch: Branch<K, V>) {
        let count = self.count;
        {
            let slots = self.branch_slots_mut();
            debug_assert!(count < slots.len());
            debug_assert!(index <= count);
            slots[index..=count].rotate_right(1);
            slots[index] = Some(branch);
        }
        self.count += 1;
        self.touch();
    }

    /// Remove the branch at `index`, shifting `[index + 1, count)` left.
    pub(crate) fn branch_remove(&mut self, index: usize) -> Branch<K, V> {
        let count = self.count;
        let branch = {
            let slots = self.branch_slots_mut();
            debug_assert!(index < count);
            let branch = slots[index].take();
            slots[index..count].rotate_left(1);
            branch
        };
        self.count -= 1;
        self.touch();
        match branch {
            Some(branch) => branch,
            None => unreachable!("empty branch slot {}", index),
        }
    }

    /// Append a branch after the current last entry.
    pub(crate) fn branch_push(&mut self, branch: Branch<K, V>) {
        let count = self.count;
        self.branch_insert(count, branch);
    }

    // ------------------------------------------------------------------
    // Split
    // ------------------------------------------------------------------

    /// Move the upper half of this overflowed node into an empty sibling of
    /// the same kind, returning the separator that routes to the sibling.
    ///
    /// The lower ⌈k/2⌉ entries stay; for an internal node the first moved
    /// branch surrenders its separator (it becomes the sibling's
    /// minus-infinity slot) and that separator is the one returned. Parent
    /// back-references of moved children are *not* retargeted here; the
    /// rebalancer does that once both payloads are released.
    pub(crate) fn split_into(&mut self, sibling: &mut NodeInner<K, V>, fanout: Fanout) -> K
    where
        K: Clone,
    {
        let keep = fanout.min_entries();
        let count = self.count;
        debug_assert!(count > fanout.max_entries());
        let separator = match (&mut self.entries, &mut sibling.entries) {
            (Entries::Leaf(src), Entries::Leaf(dst)) => {
                for index in keep..count {
                    dst[index - keep] = src[index].take();
                }
                match &dst[0] {
                    Some((key, _)) => key.clone(),
                    None => unreachable!("split moved no entries"),
                }
            }
            (Entries::Internal(src), Entries::Internal(dst)) => {
                for index in keep..count {
                    dst[index - keep] = src[index].take();
                }
                match &mut dst[0] {
                    // The first moved branch becomes the sibling's slot 0:
                    // its separator moves up to the parent.
                    Some(branch) => match branch.sep.take() {
                        Some(sep) => sep,
                        None => unreachable!("split moved the minus-infinity slot"),
                    },
                    None => unreachable!("split moved no entries"),
                }
            }
            _ => unreachable!("split across node kinds"),
        };
        self.count = keep;
        sibling.count = count - keep;
        self.touch();
        sibling.touch();
        separator
    }
}
