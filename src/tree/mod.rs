// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Concurrent B+ tree engine.
//!
//! In-memory ordered index with per-node reader-writer latching. The
//! engine is layered leaves-first:
//!
//! - **node**: fixed-capacity cell holding ordered entries (leaf) or
//!   separator-child branches (internal), one latch per node
//! - **latch**: the bounded chain of latches one operation holds, with the
//!   crabbing acquire/release discipline
//! - **search**: root-to-terminal descent under a latch intent
//! - **rebalance**: split on overflow, merge/adopt on underflow, walking
//!   bottom-up along the held chain
//! - **map**: the public `ReedMap` facade and its two-phase
//!   optimistic/pessimistic mutation protocol
//! - **iter**: subtree-locked ordered scans
//! - **verify**: the structural invariant harness used by tests

mod iter;
mod latch;
mod map;
mod node;
mod rebalance;
mod search;
mod types;
mod verify;


#[cfg(test)]
#[path = "node_test.rs"]
mod node_test;

#[cfg(test)]
#[path = "latch_test.rs"]
mod latch_test;

#[cfg(test)]
#[path = "map_test.rs"]
mod map_test;


// Re-export public API
pub use iter::Scan;
pub use map::ReedMap;
pub use types::{Fanout, GetOrAddResult, InsertResult, MapStats, RemoveResult, SearchResult};
