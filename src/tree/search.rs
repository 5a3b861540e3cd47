// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Descent engine: root-to-terminal traversal under a latch intent.
//!
//! A descent latches the root pointer, follows separators from the root to
//! a leaf (or to a bounded depth, for scans), and leaves the terminal node
//! latched on the caller's chain. Two modes exist:
//!
//! - **Optimistic**: shared latches on internal nodes, held as crabbing
//!   pairs; an exclusive latch only on the leaf. Correct whenever the
//!   leaf mutation does not cascade.
//! - **Pessimistic**: exclusive latches on the whole path; ancestors are
//!   released as soon as a descendant proves safe for the intent.
//!
//! The latch on a child is always acquired before any ancestor latch is
//! dropped, so no writer can slip between a reader and its next target.

use crate::error::ReedResult;
use crate::tree::latch::LatchChain;
use crate::tree::map::ReedMap;
use crate::tree::types::{Deadline, LatchIntent};

/// Where a descent is headed.
pub(crate) enum DescentTarget<'a, K> {
    /// Follow separators towards `key`.
    Key(&'a K),
    /// Follow the greatest child strictly below `key` (reverse scans).
    KeyBelow(&'a K),
    /// Follow child 0 at every level.
    Min,
    /// Follow the last child at every level.
    Max,
}

/// Descent options beyond the target.
pub(crate) struct DescentOptions<'a, K> {
    pub(crate) target: DescentTarget<'a, K>,
    /// Stop at this node depth (root = 1) instead of descending to a leaf.
    /// Only meaningful for read descents (scans).
    pub(crate) max_depth: Option<usize>,
}

impl<'a, K> DescentOptions<'a, K> {
    pub(crate) fn key(key: &'a K) -> Self {
        Self {
            target: DescentTarget::Key(key),
            max_depth: None,
        }
    }
}

/// What a completed descent observed.
pub(crate) struct Descent<K> {
    /// Matched entry index at the terminal leaf, if the target key is there.
    pub(crate) found: Option<usize>,
    /// Insertion slot for the target key when absent.
    pub(crate) insert_slot: usize,
    /// Node depth of the terminal (root = 1).
    pub(crate) depth: usize,
    /// Separator of the nearest next-sibling subtree seen on the way down.
    /// A forward scan resumes from it after draining the terminal subtree.
    pub(crate) next_subtree: Option<K>,
    /// Deepest separator followed on the way down: the terminal subtree's
    /// lower bound. A reverse scan resumes below it.
    pub(crate) lower_bound: Option<K>,
}

/// Outcome of a descent.
pub(crate) enum DescentSignal<K> {
    /// Terminal node reached and latched per the intent; it is the chain's
    /// most recent entry.
    Terminal(Descent<K>),
    /// A latch was refused within the budget. The chain is fully released.
    TimedOut,
    /// Optimistic descent found the leaf unsafe for a plain mutation.
    /// The chain is fully released; retry pessimistically.
    NotSafeLeaf,
    /// Optimistic descent found the leaf unsafe for a conditional mutation.
    /// The leaf's exclusive latch is retained so the caller can inspect it.
    NotSafeLeafTest(Descent<K>),
}

/// Descend from the root towards the target.
///
/// On `Terminal` and `NotSafeLeafTest` the terminal node is latched on
/// `chain`; on `TimedOut` and `NotSafeLeaf` the chain has been released.
pub(crate) fn descend<'t, K, V>(
    tree: &'t ReedMap<K, V>,
    chain: &mut LatchChain<'t, K, V>,
    intent: LatchIntent,
    pessimistic: bool,
    deadline: &Deadline,
    options: DescentOptions<'_, K>,
) -> ReedResult<DescentSignal<K>>
where
    K: Ord + Clone,
{
    debug_assert!(
        options.max_depth.is_none() || intent == LatchIntent::Read,
        "bounded-depth descent is a read-only facility"
    );
    let fanout = tree.fanout();

    // The root pointer is latched first and held until the root node's own
    // latch is in hand, so the root slot cannot be swapped mid-descent.
    let root_exclusive = pessimistic && intent.is_mutation();
    let granted = if root_exclusive {
        chain.latch_root_exclusive(tree.root_slot(), deadline)
    } else {
        chain.latch_root_shared(tree.root_slot(), deadline)
    };
    if !granted {
        return Ok(DescentSignal::TimedOut);
    }

    let mut node = chain.root_node();
    let mut depth = 1usize;
    let mut next_subtree: Option<K> = None;
    let mut lower_bound: Option<K> = None;

    loop {
        let exclusive = if pessimistic {
            intent.is_mutation()
        } else {
            intent.is_mutation() && node.is_leaf()
        };
        if !chain.latch(&node, exclusive, deadline)? {
            chain.release_all();
            return Ok(DescentSignal::TimedOut);
        }

        if pessimistic {
            // Crab release: once this node is safe, nothing above can be
            // touched by the rebalancer. Keep the root-pointer latch only
            // when the safe node is the root itself.
            let safe = unsafe { node.payload() }.is_safe(intent, fanout);
            if safe {
                chain.release_ancestors(depth == 1);
            }
        } else {
            // Shared crabbing: hold at most the (parent, child) pair, and
            // let go of the root pointer once the root node is latched.
            chain.release_ancestors(false);
        }

        let at_floor = options.max_depth.is_some_and(|limit| depth >= limit);
        if node.is_leaf() || at_floor {
            break;
        }

        let payload = unsafe { node.payload() };
        let index = match &options.target {
            DescentTarget::Min => 0,
            DescentTarget::Max => payload.count() - 1,
            DescentTarget::Key(key) => payload.child_index(key),
            DescentTarget::KeyBelow(key) => payload.child_index_below(key),
        };
        if index + 1 < payload.count() {
            next_subtree = payload.branch_sep(index + 1).cloned();
        }
        if let Some(sep) = payload.branch_sep(index) {
            lower_bound = Some(sep.clone());
        }
        let child = std::sync::Arc::clone(payload.child(index));
        depth += 1;
        node = child;
    }

    let payload = unsafe { node.payload() };
    let mut descent = Descent {
        found: None,
        insert_slot: 0,
        depth,
        next_subtree,
        lower_bound,
    };
    if node.is_leaf() {
        if let DescentTarget::Key(key) = &options.target {
            match payload.leaf_search(key) {
                Ok(index) => descent.found = Some(index),
                Err(index) => descent.insert_slot = index,
            }
        }
        if !pessimistic && intent.is_mutation() && !payload.is_safe(intent, fanout) {
            if intent.retains_unsafe_leaf() {
                return Ok(DescentSignal::NotSafeLeafTest(descent));
            }
            log::trace!("optimistic descent hit an unsafe leaf, retrying pessimistically");
            chain.release_all();
            return Ok(DescentSignal::NotSafeLeaf);
        }
    }
    Ok(DescentSignal::Terminal(descent))
}
