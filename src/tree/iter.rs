// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Ordered scans via subtree locking.
//!
//! A scan never read-locks the whole tree. It repeatedly descends to a
//! bounded-depth subtree, drains that subtree into a buffer under its
//! shared latch (hand over hand on the way down), releases the latch, and
//! yields from the buffer. The next descent resumes from the boundary
//! separator recorded on the way down: the nearest next-sibling separator
//! for ascending scans, the subtree's own lower bound for descending ones.
//!
//! Splits or merges between two descents can move entries across subtree
//! boundaries; the scan therefore filters against the last key it has
//! accepted (strictly greater for ascending scans, strictly smaller for
//! descending) so no entry is yielded twice. The view is locally
//! consistent per subtree, not a global snapshot.
//!
//! ## Algorithm
//!
//! 1. Descend to the subtree containing the boundary (O(log n))
//! 2. Drain the latched subtree in key order
//! 3. Record the next boundary separator, release the subtree
//! 4. Yield buffered entries; repeat until no boundary remains
//!
//! ## Timeouts
//!
//! The per-subtree descent honours the scan's timeout budget. An expired
//! budget surfaces as `Err(ReedError::LockTimeout)` and ends the scan;
//! unbounded scans (the default) never yield an error.

use crate::error::{ReedError, ReedResult};
use crate::tree::latch::{LatchChain, OPTIMISTIC_SLOTS};
use crate::tree::map::ReedMap;
use crate::tree::node::{NodeKind, NodeRef};
use crate::tree::search::{descend, DescentOptions, DescentSignal, DescentTarget};
use crate::tree::types::{Deadline, LatchIntent, WAIT_FOREVER_MS};
use std::collections::VecDeque;

/// Default bounded depth of the subtrees a scan latches in turn.
const DEFAULT_SUBTREE_DEPTH: usize = 2;

/// One directed bound of a scan.
struct ScanBound<K> {
    key: K,
    inclusive: bool,
}

/// Where the next chunk starts.
enum Cursor<K> {
    Start,
    Boundary(K),
    Finished,
}

/// Lazy ordered scan over a [`ReedMap`].
///
/// Yields `ReedResult<(K, V)>`: `Err` is only possible when a timeout was
/// configured with [`Scan::with_timeout_ms`].
///
/// ## Example
/// ```rust
/// use reedmap::ReedMap;
///
/// let map = ReedMap::new();
/// for key in [3, 1, 2] {
///     map.add_or_update(key, key * 10)?;
/// }
/// let keys: Vec<i32> = map.iter().map(|entry| Ok(entry?.0)).collect::<reedmap::ReedResult<_>>()?;
/// assert_eq!(keys, vec![1, 2, 3]);
/// # Ok::<(), reedmap::ReedError>(())
/// ```
pub struct Scan<'a, K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    map: &'a ReedMap<K, V>,
    reverse: bool,
    lower: Option<ScanBound<K>>,
    upper: Option<ScanBound<K>>,
    timeout_ms: i64,
    subtree_depth: usize,
    buffer: VecDeque<(K, V)>,
    cursor: Cursor<K>,
    /// Last key accepted, for cross-chunk duplicate suppression.
    last: Option<K>,
}

impl<'a, K, V> Scan<'a, K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    fn new(
        map: &'a ReedMap<K, V>,
        reverse: bool,
        lower: Option<ScanBound<K>>,
        upper: Option<ScanBound<K>>,
    ) -> Self {
        Self {
            map,
            reverse,
            lower,
            upper,
            timeout_ms: WAIT_FOREVER_MS,
            subtree_depth: DEFAULT_SUBTREE_DEPTH,
            buffer: VecDeque::new(),
            cursor: Cursor::Start,
            last: None,
        }
    }

    pub(crate) fn all(map: &'a ReedMap<K, V>, reverse: bool) -> Self {
        Self::new(map, reverse, None, None)
    }

    pub(crate) fn range(map: &'a ReedMap<K, V>, from: K, to: K) -> Self {
        if from <= to {
            Self::new(
                map,
                false,
                Some(ScanBound {
                    key: from,
                    inclusive: true,
                }),
                Some(ScanBound {
                    key: to,
                    inclusive: false,
                }),
            )
        } else {
            // Descending over to < key <= from: the mirror image of the
            // ascending half-open interval.
            Self::new(
                map,
                true,
                Some(ScanBound {
                    key: to,
                    inclusive: false,
                }),
                Some(ScanBound {
                    key: from,
                    inclusive: true,
                }),
            )
        }
    }

    pub(crate) fn starting_with(map: &'a ReedMap<K, V>, key: K, reverse: bool) -> Self {
        if reverse {
            Self::new(
                map,
                true,
                None,
                Some(ScanBound {
                    key,
                    inclusive: true,
                }),
            )
        } else {
            Self::new(
                map,
                false,
                Some(ScanBound {
                    key,
                    inclusive: true,
                }),
                None,
            )
        }
    }

    pub(crate) fn ending_with(map: &'a ReedMap<K, V>, key: K, inclusive: bool) -> Self {
        Self::new(map, false, None, Some(ScanBound { key, inclusive }))
    }

    /// Bound every per-subtree descent by `timeout_ms`.
    ///
    /// ## Error Conditions
    /// - `InvalidTimeout`: Negative timeout other than -1
    pub fn with_timeout_ms(mut self, timeout_ms: i64) -> ReedResult<Self> {
        // Validate eagerly so a bad argument errors here, not mid-scan.
        Deadline::new(timeout_ms)?;
        self.timeout_ms = timeout_ms;
        Ok(self)
    }

    /// Latch subtrees of roughly this depth per chunk (default 2).
    ///
    /// Smaller depths shorten latch holds, larger depths reduce descents.
    pub fn with_subtree_depth(mut self, subtree_depth: usize) -> Self {
        self.subtree_depth = subtree_depth;
        self
    }

    /// Whether a boundary key means the scan is already past its far bound.
    fn boundary_exhausted(&self, boundary: &K) -> bool {
        if self.reverse {
            // The next chunk holds keys strictly below the boundary.
            match &self.lower {
                Some(bound) => *boundary <= bound.key,
                None => false,
            }
        } else {
            // The next chunk holds keys at or above the boundary.
            match &self.upper {
                Some(bound) => {
                    if bound.inclusive {
                        *boundary > bound.key
                    } else {
                        *boundary >= bound.key
                    }
                }
                None => false,
            }
        }
    }

    /// Whether `key` is inside the scan's bounds; `Beyond` ends the scan.
    fn admit(&self, key: &K) -> Admission {
        if let Some(last) = &self.last {
            let duplicate = if self.reverse { key >= last } else { key <= last };
            if duplicate {
                return Admission::Skip;
            }
        }
        let (near, far) = if self.reverse {
            (&self.upper, &self.lower)
        } else {
            (&self.lower, &self.upper)
        };
        if let Some(bound) = near {
            let before_start = if self.reverse {
                if bound.inclusive {
                    key > &bound.key
                } else {
                    key >= &bound.key
                }
            } else if bound.inclusive {
                key < &bound.key
            } else {
                key <= &bound.key
            };
            if before_start {
                return Admission::Skip;
            }
        }
        if let Some(bound) = far {
            let beyond = if self.reverse {
                if bound.inclusive {
                    key < &bound.key
                } else {
                    key <= &bound.key
                }
            } else if bound.inclusive {
                key > &bound.key
            } else {
                key >= &bound.key
            };
            if beyond {
                return Admission::Beyond;
            }
        }
        Admission::Take
    }

    /// Latch the next subtree, drain it, refill the buffer.
    fn fill_chunk(&mut self) -> ReedResult<()> {
        loop {
            let boundary = match &self.cursor {
                Cursor::Finished => return Ok(()),
                Cursor::Boundary(key) => Some(key.clone()),
                Cursor::Start => None,
            };
            if let Some(key) = &boundary {
                if self.boundary_exhausted(key) {
                    self.cursor = Cursor::Finished;
                    return Ok(());
                }
            }

            let deadline = Deadline::new(self.timeout_ms)?;
            // Aim the descent at a subtree of roughly `subtree_depth`
            // levels; a stale depth snapshot only changes the chunk size.
            let stop_depth = self.map.depth().saturating_sub(self.subtree_depth) + 1;
            let target = match (&boundary, self.reverse) {
                (Some(key), false) => DescentTarget::Key(key),
                (Some(key), true) => DescentTarget::KeyBelow(key),
                (None, false) => match &self.lower {
                    Some(bound) => DescentTarget::Key(&bound.key),
                    None => DescentTarget::Min,
                },
                (None, true) => match &self.upper {
                    Some(bound) => DescentTarget::Key(&bound.key),
                    None => DescentTarget::Max,
                },
            };

            let mut chain = LatchChain::new(OPTIMISTIC_SLOTS);
            let signal = descend(
                self.map,
                &mut chain,
                LatchIntent::Read,
                false,
                &deadline,
                DescentOptions {
                    target,
                    max_depth: Some(stop_depth),
                },
            )?;
            let descent = match signal {
                DescentSignal::TimedOut => {
                    self.map.note_timeout();
                    self.cursor = Cursor::Finished;
                    return Err(ReedError::LockTimeout {
                        timeout_ms: self.timeout_ms,
                    });
                }
                DescentSignal::Terminal(descent) => descent,
                _ => unreachable!("read descents terminate"),
            };

            let node = chain.terminal();
            let mut drained = Vec::new();
            drain_subtree(&node, self.reverse, &mut drained);
            chain.release_all();

            self.cursor = if self.reverse {
                match descent.lower_bound {
                    Some(bound) => Cursor::Boundary(bound),
                    None => Cursor::Finished,
                }
            } else {
                match descent.next_subtree {
                    Some(bound) => Cursor::Boundary(bound),
                    None => Cursor::Finished,
                }
            };

            for (key, value) in drained {
                match self.admit(&key) {
                    Admission::Skip => continue,
                    Admission::Beyond => {
                        self.cursor = Cursor::Finished;
                        break;
                    }
                    Admission::Take => {
                        self.last = Some(key.clone());
                        self.buffer.push_back((key, value));
                    }
                }
            }

            if !self.buffer.is_empty() || matches!(self.cursor, Cursor::Finished) {
                return Ok(());
            }
        }
    }
}

enum Admission {
    Take,
    Skip,
    Beyond,
}

/// Drain every entry under `node` (latched shared by the caller) in key
/// order, cloning pairs out. Children are latched shared hand over hand;
/// writers already inside the subtree hold at most short leaf latches.
fn drain_subtree<K, V>(node: &NodeRef<K, V>, reverse: bool, out: &mut Vec<(K, V)>)
where
    K: Ord + Clone,
    V: Clone,
{
    let payload = unsafe { node.payload() };
    match node.kind() {
        NodeKind::Leaf => {
            let count = payload.count();
            if reverse {
                for index in (0..count).rev() {
                    out.push((
                        payload.leaf_key(index).clone(),
                        payload.leaf_value(index).clone(),
                    ));
                }
            } else {
                for index in 0..count {
                    out.push((
                        payload.leaf_key(index).clone(),
                        payload.leaf_value(index).clone(),
                    ));
                }
            }
        }
        NodeKind::Internal => {
            let count = payload.count();
            let visit = |index: usize, out: &mut Vec<(K, V)>| {
                let child = payload.child(index);
                child.latch_shared_blocking();
                drain_subtree(child, reverse, out);
                unsafe { child.unlatch_shared() };
            };
            if reverse {
                for index in (0..count).rev() {
                    visit(index, out);
                }
            } else {
                for index in 0..count {
                    visit(index, out);
                }
            }
        }
    }
}

impl<'a, K, V> Iterator for Scan<'a, K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    type Item = ReedResult<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(pair) = self.buffer.pop_front() {
                return Some(Ok(pair));
            }
            if matches!(self.cursor, Cursor::Finished) {
                return None;
            }
            if let Err(error) = self.fill_chunk() {
                return Some(Err(error));
            }
        }
    }

    /// The result count is unknown without scanning.
    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, None)
    }
}

impl<'a, K, V> std::fmt::Debug for Scan<'a, K, V>
where
    K: Ord + Clone + std::fmt::Debug,
    V: Clone,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scan")
            .field("reverse", &self.reverse)
            .field("buffered", &self.buffer.len())
            .field("timeout_ms", &self.timeout_ms)
            .field("subtree_depth", &self.subtree_depth)
            .finish()
    }
}

impl<'a, K, V> IntoIterator for &'a ReedMap<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    type Item = ReedResult<(K, V)>;
    type IntoIter = Scan<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
