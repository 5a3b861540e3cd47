// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! ReedMap - concurrent ordered map on a latch-crabbing B+ tree.
//!
//! An in-memory key-value dictionary with a total order on keys, built for
//! parallel point operations and ordered scans. Every tree node carries
//! its own reader-writer latch; operations descend with latch crabbing, so
//! writers working in disjoint subtrees proceed simultaneously.
//!
//! ## Features
//!
//! - **Concurrent point operations**: insert, update, get-or-insert,
//!   conditional insert, delete, lookup, containment
//! - **Two-phase descents**: optimistic (shared latches, write the leaf)
//!   with a pessimistic fallback only when a mutation can cascade
//! - **Ordered scans**: forward, reverse, range and half-range, locking
//!   one bounded-depth subtree at a time
//! - **Millisecond timeouts**: every operation takes `-1` (wait forever),
//!   `0` (non-blocking) or a bounded wait, and fails fast with no side
//!   effect on expiry
//! - **Writer-fair latching**: readers cannot starve a pending writer
//!
//! ## Quick Start
//!
//! ```rust
//! use reedmap::{InsertResult, ReedMap};
//!
//! let map = ReedMap::new();
//! map.add_or_update("page.title", 1)?;
//! map.add_or_update("page.description", 2)?;
//!
//! assert_eq!(map.try_get(&"page.title")?.value(), Some(1));
//! assert_eq!(map.try_add("page.title", 9)?, InsertResult::AlreadyExists);
//!
//! for entry in map.iter() {
//!     let (key, value) = entry?;
//!     println!("{key}: {value}");
//! }
//! # Ok::<(), reedmap::ReedError>(())
//! ```
//!
//! ## Architecture
//!
//! ReedMap is organised into modules:
//!
//! - **tree**: the B+ tree engine (nodes, latch chain, descent,
//!   rebalancing, scans, invariant harness)
//! - **error**: structured error types (`ReedError`, `ReedResult`)

pub mod error;
pub mod tree;


// Re-export commonly used types
pub use error::{ReedError, ReedResult};
pub use tree::{
    Fanout, GetOrAddResult, InsertResult, MapStats, ReedMap, RemoveResult, Scan, SearchResult,
};

/// ReedMap version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
