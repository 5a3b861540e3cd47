// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Core types for the concurrent B+ tree engine.
//!
//! Defines the validated tree configuration (`Fanout`), timeout accounting
//! (`Deadline`), latch intents, and the observable result enums returned by
//! the map facade.

use crate::error::{ReedError, ReedResult};
use std::time::{Duration, Instant};

/// Maximum tree depth in node levels.
///
/// The latch chain reserves 32 slots for a pessimistic descent; with the
/// minimum fanout of 3 every non-root node holds at least 2 entries, so a
/// 30-level tree already exceeds 2^30 entries. Growth beyond this depth is
/// refused with `ReedError::CapacityExceeded`.
pub(crate) const MAX_TREE_DEPTH: usize = 30;

/// Timeout value for "wait forever".
pub(crate) const WAIT_FOREVER_MS: i64 = -1;

/// B+ tree fanout configuration.
///
/// Defines the maximum number of entries per node. Every node additionally
/// carries one overflow slot used transiently between an insert and the
/// split that restores the capacity bound.
///
/// ## Constraints
/// - Minimum fanout: 3 (allows a meaningful half-full requirement)
/// - Default fanout: 32
///
/// ## Example
/// ```rust
/// use reedmap::Fanout;
///
/// let fanout = Fanout::new(16)?;
/// assert_eq!(fanout.max_entries(), 16);
/// assert_eq!(fanout.min_entries(), 8); // half-full requirement
/// # Ok::<(), reedmap::ReedError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fanout(usize);

impl Fanout {
    /// Minimum legal fanout.
    pub const MIN: usize = 3;

    /// Create new fanout with validation.
    ///
    /// ## Input
    /// - `fanout`: Desired maximum entries per node (must be >= 3)
    ///
    /// ## Output
    /// - `Ok(Fanout)`: Valid fanout created
    /// - `Err(ReedError::InvalidFanout)`: Fanout less than 3
    ///
    /// ## Performance
    /// - O(1) validation
    pub fn new(fanout: usize) -> ReedResult<Self> {
        if fanout < Self::MIN {
            return Err(ReedError::InvalidFanout {
                fanout,
                min: Self::MIN,
            });
        }
        Ok(Self(fanout))
    }

    /// Get maximum entries per node.
    pub fn max_entries(&self) -> usize {
        self.0
    }

    /// Get minimum entries per non-root node (half-full requirement, ⌈k/2⌉).
    pub fn min_entries(&self) -> usize {
        self.0.div_ceil(2)
    }

    /// Get physical slots per node (maximum entries plus the overflow slot).
    pub(crate) fn slot_count(&self) -> usize {
        self.0 + 1
    }

    /// Get raw fanout value.
    pub fn value(&self) -> usize {
        self.0
    }
}

impl Default for Fanout {
    /// Default fanout of 32 entries per node.
    fn default() -> Self {
        Self(32)
    }
}

/// Remaining latch-acquisition budget at one suspension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Budget {
    /// Block until the latch is granted.
    Unbounded,
    /// Non-blocking try (zero timeout, or an exhausted budget).
    Immediate,
    /// Bounded wait for the remaining duration.
    Bounded(Duration),
}

/// Deadline for one public operation.
///
/// Derived once from the caller's `timeout_ms` and consulted before every
/// latch acquisition. The remaining budget is `timeout - elapsed`, clamped
/// to zero: an exhausted budget degrades to a non-blocking try.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    limit: Option<Instant>,
}

impl Deadline {
    /// Create a deadline from a user timeout.
    ///
    /// ## Input
    /// - `timeout_ms`: -1 = wait forever, 0 = non-blocking, > 0 = bounded wait
    ///
    /// ## Output
    /// - `Err(ReedError::InvalidTimeout)`: Negative value other than -1
    pub(crate) fn new(timeout_ms: i64) -> ReedResult<Self> {
        match timeout_ms {
            WAIT_FOREVER_MS => Ok(Self { limit: None }),
            ms if ms >= 0 => Ok(Self {
                limit: Some(Instant::now() + Duration::from_millis(ms as u64)),
            }),
            ms => Err(ReedError::InvalidTimeout { timeout_ms: ms }),
        }
    }

    /// Deadline that never expires.
    pub(crate) fn unbounded() -> Self {
        Self { limit: None }
    }

    /// Remaining budget at this instant.
    pub(crate) fn budget(&self) -> Budget {
        match self.limit {
            None => Budget::Unbounded,
            Some(limit) => {
                let now = Instant::now();
                if now >= limit {
                    Budget::Immediate
                } else {
                    Budget::Bounded(limit - now)
                }
            }
        }
    }
}

/// Latch intent of one in-flight operation.
///
/// The `*Test` variants belong to conditional operations that must inspect
/// the leaf before committing; they retain the leaf's write latch even when
/// the leaf is structurally unsafe, so the caller can decide whether a
/// pessimistic second descent is required at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LatchIntent {
    Read,
    Insert,
    Delete,
    InsertTest,
    DeleteTest,
}

impl LatchIntent {
    /// Whether this intent mutates the leaf.
    pub(crate) fn is_mutation(self) -> bool {
        !matches!(self, Self::Read)
    }

    /// Whether this intent inserts.
    pub(crate) fn is_insert(self) -> bool {
        matches!(self, Self::Insert | Self::InsertTest)
    }

    /// Whether an unsafe leaf keeps its write latch for inspection.
    pub(crate) fn retains_unsafe_leaf(self) -> bool {
        matches!(self, Self::InsertTest | Self::DeleteTest)
    }
}

/// Result of an insert-family operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// Entry inserted (or updated, for `add_or_update`).
    Success,
    /// Key already present; the map is unchanged.
    AlreadyExists,
    /// A latch could not be acquired within the timeout; the map is unchanged.
    TimedOut,
}

impl InsertResult {
    /// Whether the operation committed.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Whether the operation timed out.
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

/// Result of a remove operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveResult {
    /// Entry removed.
    Success,
    /// Key not present; the map is unchanged.
    NotFound,
    /// A latch could not be acquired within the timeout; the map is unchanged.
    TimedOut,
}

impl RemoveResult {
    /// Whether the operation committed.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Whether the operation timed out.
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

/// Result of a lookup operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchResult<V> {
    /// Key present; carries the associated value (or unit for containment).
    Found(V),
    /// Key not present.
    NotFound,
    /// A latch could not be acquired within the timeout.
    TimedOut,
}

impl<V> SearchResult<V> {
    /// Whether the key was found.
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    /// Whether the operation timed out.
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }

    /// Extract the value, if found.
    pub fn value(self) -> Option<V> {
        match self {
            Self::Found(value) => Some(value),
            _ => None,
        }
    }
}

/// Result of `get_or_add`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetOrAddResult<V> {
    /// Key was absent; the supplied value was inserted and is returned.
    Added(V),
    /// Key was present; the existing value is returned and the map unchanged.
    Existing(V),
    /// A latch could not be acquired within the timeout; the map is unchanged.
    TimedOut,
}

impl<V> GetOrAddResult<V> {
    /// Whether the operation timed out.
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }

    /// Extract the value (inserted or pre-existing).
    pub fn value(self) -> Option<V> {
        match self {
            Self::Added(value) | Self::Existing(value) => Some(value),
            Self::TimedOut => None,
        }
    }
}

/// Snapshot of structural operation counters.
///
/// Counters are maintained with relaxed atomics; a snapshot taken during
/// concurrent mutation is best-effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MapStats {
    /// Node splits performed after inserts.
    pub splits: u64,
    /// Node merges performed after removes.
    pub merges: u64,
    /// Entry adoptions between siblings (underflow repaired without a merge).
    pub adoptions: u64,
    /// Root replacements (root split, root collapse, clear).
    pub root_replacements: u64,
    /// Operations that returned a timeout.
    pub timeouts: u64,
}
