// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Structural invariant checks (debug harness).
//!
//! Walks the whole tree under shared latches, hand over hand, and checks
//! every invariant the engine promises between mutations:
//!
//! - non-root occupancy within `[⌈k/2⌉, k]`, root occupancy within bounds
//! - strict key ordering inside every node, globally unique keys
//! - separator consistency: every key of child `i` lies in
//!   `[sep(i), sep(i + 1))` with slot 0 standing for minus infinity
//! - all leaves at the same depth
//! - every child's parent back-reference pointing at its owner
//! - the map's `len` and `depth` counters matching the walked tree
//!
//! A violation reports `ReedError::InvariantViolation` and is a bug in the
//! engine, never a user error. Intended to run at quiescent points.

use crate::error::{ReedError, ReedResult};
use crate::tree::map::ReedMap;
use crate::tree::node::{NodeKind, NodeRef};
use crate::tree::types::Fanout;
use std::sync::Arc;

struct WalkState {
    leaf_depth: Option<usize>,
    entries: usize,
}

pub(crate) fn verify_tree<K, V>(map: &ReedMap<K, V>) -> ReedResult<()>
where
    K: Ord + Clone,
    V: Clone,
{
    let guard = map.root_slot().read();
    let root = Arc::clone(&*guard);
    let mut state = WalkState {
        leaf_depth: None,
        entries: 0,
    };
    root.latch_shared_blocking();
    let result = (|| {
        if unsafe { root.payload() }.parent().is_some() {
            return Err(violation("root carries a parent back-reference".to_string()));
        }
        walk(&root, 1, None, None, true, map.fanout(), &mut state)
    })();
    unsafe { root.unlatch_shared() };
    result?;

    let walked_depth = state.leaf_depth.unwrap_or(1);
    if walked_depth != map.depth() {
        return Err(violation(format!(
            "depth counter {} does not match walked depth {}",
            map.depth(),
            walked_depth
        )));
    }
    if state.entries != map.len() {
        return Err(violation(format!(
            "len counter {} does not match walked entry count {}",
            map.len(),
            state.entries
        )));
    }
    Ok(())
}

fn violation(reason: String) -> ReedError {
    ReedError::InvariantViolation { reason }
}

/// Check `node` and recurse. The caller holds `node`'s shared latch; bounds
/// are exclusive above (`max`) and inclusive below (`min`).
fn walk<K, V>(
    node: &NodeRef<K, V>,
    depth: usize,
    min: Option<&K>,
    max: Option<&K>,
    is_root: bool,
    fanout: Fanout,
    state: &mut WalkState,
) -> ReedResult<()>
where
    K: Ord + Clone,
    V: Clone,
{
    let payload = unsafe { node.payload() };
    let count = payload.count();

    // Occupancy.
    if count > fanout.max_entries() {
        return Err(violation(format!(
            "node at depth {} holds {} entries, above the fanout of {}",
            depth,
            count,
            fanout.max_entries()
        )));
    }
    if is_root {
        if node.is_internal() && count < 2 {
            return Err(violation(format!(
                "internal root holds {} entries; single-child roots must collapse",
                count
            )));
        }
    } else if count < fanout.min_entries() {
        return Err(violation(format!(
            "node at depth {} holds {} entries, below the half-full bound of {}",
            depth,
            count,
            fanout.min_entries()
        )));
    }

    match node.kind() {
        NodeKind::Leaf => {
            match state.leaf_depth {
                None => state.leaf_depth = Some(depth),
                Some(expected) if expected != depth => {
                    return Err(violation(format!(
                        "leaf at depth {} while earlier leaves sit at depth {}",
                        depth, expected
                    )));
                }
                Some(_) => {}
            }
            state.entries += count;
            for index in 0..count {
                let key = payload.leaf_key(index);
                if index > 0 && payload.leaf_key(index - 1) >= key {
                    return Err(violation(format!(
                        "leaf keys out of order at slot {}",
                        index
                    )));
                }
                if let Some(min) = min {
                    if key < min {
                        return Err(violation(format!(
                            "leaf key at slot {} below its subtree's lower bound",
                            index
                        )));
                    }
                }
                if let Some(max) = max {
                    if key >= max {
                        return Err(violation(format!(
                            "leaf key at slot {} at or above its subtree's upper bound",
                            index
                        )));
                    }
                }
            }
        }
        NodeKind::Internal => {
            if payload.branch_sep(0).is_some() {
                return Err(violation(
                    "internal slot 0 must carry the minus-infinity separator".to_string(),
                ));
            }
            for index in 1..count {
                let sep = match payload.branch_sep(index) {
                    Some(sep) => sep,
                    None => {
                        return Err(violation(format!(
                            "internal slot {} is missing its separator",
                            index
                        )));
                    }
                };
                if let Some(prev) = payload.branch_sep(index - 1) {
                    if prev >= sep {
                        return Err(violation(format!(
                            "separators out of order at slot {}",
                            index
                        )));
                    }
                }
                if let Some(min) = min {
                    if sep <= min {
                        return Err(violation(format!(
                            "separator at slot {} not above the subtree's lower bound",
                            index
                        )));
                    }
                }
                if let Some(max) = max {
                    if sep >= max {
                        return Err(violation(format!(
                            "separator at slot {} not below the subtree's upper bound",
                            index
                        )));
                    }
                }
            }
            for index in 0..count {
                let child = payload.child(index);
                // The child's parent field is guarded by this node's latch,
                // which the walk holds.
                child.latch_shared_blocking();
                let back_reference = unsafe { child.payload() }.parent();
                let result = match back_reference {
                    Some(parent) if Arc::ptr_eq(&parent, node) => {
                        let child_min = payload.branch_sep(index).or(min);
                        let child_max = if index + 1 < count {
                            payload.branch_sep(index + 1)
                        } else {
                            max
                        };
                        walk(child, depth + 1, child_min, child_max, false, fanout, state)
                    }
                    Some(_) => Err(violation(format!(
                        "child at slot {} points at a different parent",
                        index
                    ))),
                    None => Err(violation(format!(
                        "child at slot {} has no parent back-reference",
                        index
                    ))),
                };
                unsafe { child.unlatch_shared() };
                result?;
            }
        }
    }
    Ok(())
}
