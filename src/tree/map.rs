// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Concurrent ordered map facade.
//!
//! `ReedMap` is a key-value dictionary over a B+ tree whose nodes carry
//! individual reader-writer latches. Point operations descend the tree
//! optimistically (shared latches down, exclusive latch on the leaf only)
//! and fall back to a pessimistic descent (exclusive latches with crab
//! release) when the leaf mutation could cascade. Operations on disjoint
//! subtrees proceed in parallel.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │ ReedMap                                         │
//! ├─────────────────────────────────────────────────┤
//! │ - root: RwLock<NodeRef>   (root-pointer latch)  │
//! │ - fanout: Fanout          (entries per node)    │
//! │ - len, depth: atomics     (best-effort)         │
//! │ - counters: splits/merges/adoptions/timeouts    │
//! └─────────────────────────────────────────────────┘
//!            │ descend (latch crabbing)
//!            ▼
//! ┌──────────────┐   split / merge    ┌──────────────┐
//! │ internal     │ ◄────────────────► │ internal     │
//! │ [-∞|s1|s2..] │                    │ [-∞|s1|s2..] │
//! └──────────────┘                    └──────────────┘
//!        │                                   │
//!        ▼                                   ▼
//!   leaf entries                        leaf entries
//! ```
//!
//! ## Timeouts
//!
//! Every operation has a `*_for` twin taking `timeout_ms`: `-1` waits
//! forever, `0` is a non-blocking try, positive values bound the total
//! latch wait in milliseconds. A timeout releases every held latch and
//! reports `TimedOut` with no user-visible side effect.

use crate::error::ReedResult;
use crate::tree::iter::Scan;
use crate::tree::latch::{LatchChain, OPTIMISTIC_SLOTS, PESSIMISTIC_SLOTS};
use crate::tree::node::{Node, NodeRef};
use crate::tree::rebalance::{merge_underflow, split_overflow};
use crate::tree::search::{descend, Descent, DescentOptions, DescentSignal, DescentTarget};
use crate::tree::types::{
    Budget, Deadline, Fanout, GetOrAddResult, InsertResult, LatchIntent, MapStats, RemoveResult,
    SearchResult, WAIT_FOREVER_MS,
};
use crate::tree::verify;
use log::debug;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Structural operation counters (relaxed atomics).
#[derive(Default)]
struct Counters {
    splits: AtomicU64,
    merges: AtomicU64,
    adoptions: AtomicU64,
    root_replacements: AtomicU64,
    timeouts: AtomicU64,
}

/// Concurrent ordered map backed by a latch-crabbing B+ tree.
///
/// ## Type Parameters
/// - `K`: Key type (total order; cloned into separators and scan results)
/// - `V`: Value type (cloned out by lookups and scans)
///
/// ## Thread Safety
/// - All operations take `&self`; share the map behind an `Arc`.
/// - Writers on disjoint subtrees run in parallel; readers on the same
///   node run in parallel; the latches are task-fair, so readers cannot
///   starve a pending writer.
///
/// ## Example
/// ```rust
/// use reedmap::{InsertResult, ReedMap};
///
/// let map = ReedMap::new();
/// assert_eq!(map.try_add(1, "one")?, InsertResult::Success);
/// assert_eq!(map.try_add(1, "uno")?, InsertResult::AlreadyExists);
/// assert_eq!(map.try_get(&1)?.value(), Some("one"));
/// assert_eq!(map.len(), 1);
/// # Ok::<(), reedmap::ReedError>(())
/// ```
pub struct ReedMap<K, V> {
    root: RwLock<NodeRef<K, V>>,
    fanout: Fanout,
    len: AtomicUsize,
    depth: AtomicUsize,
    counters: Counters,
}

/// What an upsert should do when the key is already present.
#[derive(Clone, Copy, PartialEq, Eq)]
enum UpsertMode {
    /// Leave the existing entry alone (`try_add`).
    AddOnly,
    /// Replace the existing value (`add_or_update`).
    Overwrite,
    /// Return a clone of the existing value (`get_or_add`).
    GetOrAdd,
}

/// Internal upsert outcome, folded into the public result enums.
enum Upserted<V> {
    Inserted,
    Replaced,
    Existing(Option<V>),
    TimedOut,
}

impl<K, V> ReedMap<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    /// Create a map with the default fanout of 32.
    pub fn new() -> Self {
        Self::with_fanout(Fanout::default())
    }

    /// Create a map with an explicit fanout.
    ///
    /// ## Input
    /// - `fanout`: Validated tree fanout (see [`Fanout::new`])
    ///
    /// ## Example
    /// ```rust
    /// use reedmap::{Fanout, ReedMap};
    ///
    /// let map: ReedMap<u64, u64> = ReedMap::with_fanout(Fanout::new(3)?);
    /// assert_eq!(map.fanout().max_entries(), 3);
    /// # Ok::<(), reedmap::ReedError>(())
    /// ```
    pub fn with_fanout(fanout: Fanout) -> Self {
        Self {
            root: RwLock::new(Node::new_leaf(fanout)),
            fanout,
            len: AtomicUsize::new(0),
            depth: AtomicUsize::new(1),
            counters: Counters::default(),
        }
    }

    // ------------------------------------------------------------------
    // Point operations
    // ------------------------------------------------------------------

    /// Insert `key -> value` if the key is absent; waits forever.
    ///
    /// ## Output
    /// - `Success`: Entry inserted
    /// - `AlreadyExists`: Key present; the map is unchanged
    ///
    /// ## Error Conditions
    /// - `CapacityExceeded`: Tree depth would exceed the supported maximum
    pub fn try_add(&self, key: K, value: V) -> ReedResult<InsertResult> {
        self.try_add_for(key, value, WAIT_FOREVER_MS)
    }

    /// Insert `key -> value` if the key is absent, bounded by `timeout_ms`.
    ///
    /// ## Input
    /// - `timeout_ms`: -1 = wait forever, 0 = non-blocking, > 0 = bounded
    ///
    /// ## Output
    /// - `Success` | `AlreadyExists` | `TimedOut`
    ///
    /// ## Error Conditions
    /// - `InvalidTimeout`: Negative timeout other than -1
    /// - `CapacityExceeded`: Tree depth would exceed the supported maximum
    pub fn try_add_for(&self, key: K, value: V, timeout_ms: i64) -> ReedResult<InsertResult> {
        let deadline = Deadline::new(timeout_ms)?;
        Ok(match self.upsert(key, value, UpsertMode::AddOnly, &deadline)? {
            Upserted::Inserted => InsertResult::Success,
            Upserted::Existing(_) => InsertResult::AlreadyExists,
            Upserted::TimedOut => InsertResult::TimedOut,
            Upserted::Replaced => unreachable!("try_add never replaces"),
        })
    }

    /// Insert `key -> value`, replacing any existing value; waits forever.
    pub fn add_or_update(&self, key: K, value: V) -> ReedResult<InsertResult> {
        self.add_or_update_for(key, value, WAIT_FOREVER_MS)
    }

    /// Insert or replace, bounded by `timeout_ms`.
    ///
    /// ## Output
    /// - `Success` | `TimedOut` (`AlreadyExists` is never reported)
    pub fn add_or_update_for(
        &self,
        key: K,
        value: V,
        timeout_ms: i64,
    ) -> ReedResult<InsertResult> {
        let deadline = Deadline::new(timeout_ms)?;
        Ok(
            match self.upsert(key, value, UpsertMode::Overwrite, &deadline)? {
                Upserted::Inserted | Upserted::Replaced => InsertResult::Success,
                Upserted::TimedOut => InsertResult::TimedOut,
                Upserted::Existing(_) => unreachable!("overwrite never defers"),
            },
        )
    }

    /// Get the value for `key`, inserting `value` first if absent.
    pub fn get_or_add(&self, key: K, value: V) -> ReedResult<GetOrAddResult<V>> {
        self.get_or_add_for(key, value, WAIT_FOREVER_MS)
    }

    /// Get-or-insert, bounded by `timeout_ms`.
    ///
    /// ## Output
    /// - `Added(v)`: Key was absent; `v` is the inserted value
    /// - `Existing(v)`: Key was present; `v` is the stored value
    /// - `TimedOut`
    pub fn get_or_add_for(
        &self,
        key: K,
        value: V,
        timeout_ms: i64,
    ) -> ReedResult<GetOrAddResult<V>> {
        let deadline = Deadline::new(timeout_ms)?;
        let inserted = value.clone();
        Ok(
            match self.upsert(key, value, UpsertMode::GetOrAdd, &deadline)? {
                Upserted::Inserted => GetOrAddResult::Added(inserted),
                Upserted::Existing(Some(existing)) => GetOrAddResult::Existing(existing),
                Upserted::TimedOut => GetOrAddResult::TimedOut,
                Upserted::Existing(None) | Upserted::Replaced => {
                    unreachable!("get_or_add reads the existing value")
                }
            },
        )
    }

    /// Remove `key`; waits forever.
    pub fn try_remove(&self, key: &K) -> ReedResult<RemoveResult> {
        self.try_remove_for(key, WAIT_FOREVER_MS)
    }

    /// Remove `key`, bounded by `timeout_ms`.
    ///
    /// ## Output
    /// - `Success` | `NotFound` | `TimedOut`
    pub fn try_remove_for(&self, key: &K, timeout_ms: i64) -> ReedResult<RemoveResult> {
        let deadline = Deadline::new(timeout_ms)?;
        self.remove_entry(key, &deadline)
    }

    /// Look up `key`; waits forever.
    pub fn try_get(&self, key: &K) -> ReedResult<SearchResult<V>> {
        self.try_get_for(key, WAIT_FOREVER_MS)
    }

    /// Look up `key`, bounded by `timeout_ms`.
    ///
    /// ## Output
    /// - `Found(v)`: Clone of the stored value
    /// - `NotFound` | `TimedOut`
    pub fn try_get_for(&self, key: &K, timeout_ms: i64) -> ReedResult<SearchResult<V>> {
        let deadline = Deadline::new(timeout_ms)?;
        let mut chain = LatchChain::new(OPTIMISTIC_SLOTS);
        let signal = descend(
            self,
            &mut chain,
            LatchIntent::Read,
            false,
            &deadline,
            DescentOptions::key(key),
        )?;
        Ok(match signal {
            DescentSignal::TimedOut => {
                self.note_timeout();
                SearchResult::TimedOut
            }
            DescentSignal::Terminal(found) => match found.found {
                Some(index) => {
                    let node = chain.terminal();
                    let payload = unsafe { node.payload() };
                    SearchResult::Found(payload.leaf_value(index).clone())
                }
                None => SearchResult::NotFound,
            },
            _ => unreachable!("read descents terminate"),
        })
    }

    /// Whether `key` is present; waits forever.
    pub fn contains_key(&self, key: &K) -> ReedResult<SearchResult<()>> {
        self.contains_key_for(key, WAIT_FOREVER_MS)
    }

    /// Containment test, bounded by `timeout_ms`.
    ///
    /// Returns `SearchResult<()>` rather than a bare bool so a timeout stays
    /// distinguishable from an absent key.
    pub fn contains_key_for(&self, key: &K, timeout_ms: i64) -> ReedResult<SearchResult<()>> {
        Ok(match self.try_get_for(key, timeout_ms)? {
            SearchResult::Found(_) => SearchResult::Found(()),
            SearchResult::NotFound => SearchResult::NotFound,
            SearchResult::TimedOut => SearchResult::TimedOut,
        })
    }

    /// Remove every entry; waits forever.
    ///
    /// Existing concurrent operations that already latched into the old
    /// tree complete against their own snapshot of it.
    pub fn clear(&self) {
        // An unbounded wait cannot time out and -1 is a valid timeout.
        let _ = self.clear_for(WAIT_FOREVER_MS);
    }

    /// Remove every entry, bounded by `timeout_ms`.
    ///
    /// Only the root-pointer latch is taken: a fresh empty leaf becomes the
    /// root and the counters reset.
    pub fn clear_for(&self, timeout_ms: i64) -> ReedResult<RemoveResult> {
        let deadline = Deadline::new(timeout_ms)?;
        let guard = match deadline.budget() {
            Budget::Unbounded => Some(self.root.write()),
            Budget::Immediate => self.root.try_write(),
            Budget::Bounded(remaining) => self.root.try_write_for(remaining),
        };
        let mut guard = match guard {
            Some(guard) => guard,
            None => {
                self.note_timeout();
                return Ok(RemoveResult::TimedOut);
            }
        };
        *guard = Node::new_leaf(self.fanout);
        self.len.store(0, Ordering::Relaxed);
        self.depth.store(1, Ordering::Relaxed);
        self.note_root_replacement();
        debug!("clear: installed a fresh empty root");
        Ok(RemoveResult::Success)
    }

    /// Smallest entry, or `None` when empty.
    pub fn first(&self) -> ReedResult<Option<(K, V)>> {
        self.edge_entry(false)
    }

    /// Greatest entry, or `None` when empty.
    pub fn last(&self) -> ReedResult<Option<(K, V)>> {
        self.edge_entry(true)
    }

    fn edge_entry(&self, greatest: bool) -> ReedResult<Option<(K, V)>> {
        let deadline = Deadline::unbounded();
        let mut chain = LatchChain::new(OPTIMISTIC_SLOTS);
        let target = if greatest {
            DescentTarget::Max
        } else {
            DescentTarget::Min
        };
        let signal = descend(
            self,
            &mut chain,
            LatchIntent::Read,
            false,
            &deadline,
            DescentOptions {
                target,
                max_depth: None,
            },
        )?;
        match signal {
            DescentSignal::Terminal(_) => {
                let node = chain.terminal();
                let payload = unsafe { node.payload() };
                if payload.count() == 0 {
                    return Ok(None);
                }
                let index = if greatest { payload.count() - 1 } else { 0 };
                Ok(Some((
                    payload.leaf_key(index).clone(),
                    payload.leaf_value(index).clone(),
                )))
            }
            _ => unreachable!("unbounded read descents terminate"),
        }
    }

    // ------------------------------------------------------------------
    // Scans
    // ------------------------------------------------------------------

    /// Ordered scan over all entries, ascending.
    pub fn iter(&self) -> Scan<'_, K, V> {
        Scan::all(self, false)
    }

    /// Ordered scan over all entries, descending.
    pub fn iter_reversed(&self) -> Scan<'_, K, V> {
        Scan::all(self, true)
    }

    /// Scan of `from <= key < to`, ascending. With `from > to` the scan is
    /// descending over `to < key <= from`.
    pub fn range(&self, from: K, to: K) -> Scan<'_, K, V> {
        Scan::range(self, from, to)
    }

    /// Half-range starting at `key` (inclusive): ascending by default,
    /// descending over `key' <= key` when `reverse` is set.
    pub fn starting_with(&self, key: K, reverse: bool) -> Scan<'_, K, V> {
        Scan::starting_with(self, key, reverse)
    }

    /// Ascending half-range ending at `key` (exclusive unless `inclusive`).
    pub fn ending_with(&self, key: K, inclusive: bool) -> Scan<'_, K, V> {
        Scan::ending_with(self, key, inclusive)
    }

    /// Check every structural invariant of the tree.
    ///
    /// Latches the tree shared, hand over hand. Intended for tests and
    /// debugging at quiescent points; a failure is a bug, not a user error.
    pub fn verify_invariants(&self) -> ReedResult<()> {
        verify::verify_tree(self)
    }

    // ------------------------------------------------------------------
    // Engine plumbing
    // ------------------------------------------------------------------

    fn upsert(
        &self,
        key: K,
        value: V,
        mode: UpsertMode,
        deadline: &Deadline,
    ) -> ReedResult<Upserted<V>> {
        let intent = match mode {
            UpsertMode::Overwrite => LatchIntent::Insert,
            UpsertMode::AddOnly | UpsertMode::GetOrAdd => LatchIntent::InsertTest,
        };

        // Optimistic phase: shared latches down, exclusive latch on the leaf.
        {
            let mut chain = LatchChain::new(OPTIMISTIC_SLOTS);
            let signal = descend(
                self,
                &mut chain,
                intent,
                false,
                deadline,
                DescentOptions::key(&key),
            )?;
            match signal {
                DescentSignal::TimedOut => {
                    self.note_timeout();
                    return Ok(Upserted::TimedOut);
                }
                DescentSignal::Terminal(descent) => {
                    return self.commit_upsert(&mut chain, &descent, key, value, mode, false);
                }
                DescentSignal::NotSafeLeafTest(descent) => {
                    // The unsafe leaf's write latch is retained: when the key
                    // is already there, the outcome needs no second descent.
                    if let Some(index) = descent.found {
                        let node = chain.terminal();
                        let existing = match mode {
                            UpsertMode::AddOnly => Upserted::Existing(None),
                            UpsertMode::GetOrAdd => {
                                let payload = unsafe { node.payload() };
                                Upserted::Existing(Some(payload.leaf_value(index).clone()))
                            }
                            UpsertMode::Overwrite => {
                                unreachable!("plain insert releases unsafe leaves")
                            }
                        };
                        return Ok(existing);
                    }
                    chain.release_all();
                }
                DescentSignal::NotSafeLeaf => {}
            }
        }

        // Pessimistic phase: exclusive latches with crab release.
        let mut chain = LatchChain::new(PESSIMISTIC_SLOTS);
        let signal = descend(
            self,
            &mut chain,
            intent,
            true,
            deadline,
            DescentOptions::key(&key),
        )?;
        match signal {
            DescentSignal::TimedOut => {
                self.note_timeout();
                Ok(Upserted::TimedOut)
            }
            DescentSignal::Terminal(descent) => {
                self.commit_upsert(&mut chain, &descent, key, value, mode, true)
            }
            _ => unreachable!("pessimistic descents terminate"),
        }
    }

    fn commit_upsert<'t>(
        &'t self,
        chain: &mut LatchChain<'t, K, V>,
        descent: &Descent<K>,
        key: K,
        value: V,
        mode: UpsertMode,
        pessimistic: bool,
    ) -> ReedResult<Upserted<V>> {
        let node = chain.terminal();
        if let Some(index) = descent.found {
            let outcome = match mode {
                UpsertMode::AddOnly => Upserted::Existing(None),
                UpsertMode::GetOrAdd => {
                    let payload = unsafe { node.payload() };
                    Upserted::Existing(Some(payload.leaf_value(index).clone()))
                }
                UpsertMode::Overwrite => {
                    let payload = unsafe { node.payload_mut() };
                    *payload.leaf_value_mut(index) = value;
                    Upserted::Replaced
                }
            };
            return Ok(outcome);
        }
        {
            let payload = unsafe { node.payload_mut() };
            payload.leaf_insert(descent.insert_slot, key, value);
        }
        self.len.fetch_add(1, Ordering::Relaxed);
        if pessimistic {
            // An optimistic commit only runs on a safe leaf; overflow is
            // possible on this path alone.
            split_overflow(self, chain, node)?;
        }
        Ok(Upserted::Inserted)
    }

    fn remove_entry(&self, key: &K, deadline: &Deadline) -> ReedResult<RemoveResult> {
        // Optimistic phase.
        {
            let mut chain = LatchChain::new(OPTIMISTIC_SLOTS);
            let signal = descend(
                self,
                &mut chain,
                LatchIntent::DeleteTest,
                false,
                deadline,
                DescentOptions::key(key),
            )?;
            match signal {
                DescentSignal::TimedOut => {
                    self.note_timeout();
                    return Ok(RemoveResult::TimedOut);
                }
                DescentSignal::Terminal(descent) => {
                    return Ok(match descent.found {
                        Some(index) => {
                            let node = chain.terminal();
                            {
                                let payload = unsafe { node.payload_mut() };
                                payload.leaf_remove(index);
                            }
                            self.len.fetch_sub(1, Ordering::Relaxed);
                            RemoveResult::Success
                        }
                        None => RemoveResult::NotFound,
                    });
                }
                DescentSignal::NotSafeLeafTest(descent) => {
                    // Absent key: answered from the retained leaf latch.
                    if descent.found.is_none() {
                        return Ok(RemoveResult::NotFound);
                    }
                    chain.release_all();
                }
                DescentSignal::NotSafeLeaf => {
                    unreachable!("conditional delete retains unsafe leaves")
                }
            }
        }

        // Pessimistic phase.
        let mut chain = LatchChain::new(PESSIMISTIC_SLOTS);
        let signal = descend(
            self,
            &mut chain,
            LatchIntent::DeleteTest,
            true,
            deadline,
            DescentOptions::key(key),
        )?;
        match signal {
            DescentSignal::TimedOut => {
                self.note_timeout();
                Ok(RemoveResult::TimedOut)
            }
            DescentSignal::Terminal(descent) => match descent.found {
                Some(index) => {
                    let node = chain.terminal();
                    {
                        let payload = unsafe { node.payload_mut() };
                        payload.leaf_remove(index);
                    }
                    merge_underflow(self, &mut chain, node)?;
                    self.len.fetch_sub(1, Ordering::Relaxed);
                    Ok(RemoveResult::Success)
                }
                None => Ok(RemoveResult::NotFound),
            },
            _ => unreachable!("pessimistic descents terminate"),
        }
    }
}

/// Accessors and engine plumbing that need no key or value bounds.
impl<K, V> ReedMap<K, V> {
    /// Number of entries (relaxed snapshot).
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Whether the map is empty (relaxed snapshot).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current tree depth in node levels (best-effort snapshot).
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// Configured fanout.
    pub fn fanout(&self) -> Fanout {
        self.fanout
    }

    /// Snapshot of the structural operation counters.
    pub fn stats(&self) -> MapStats {
        MapStats {
            splits: self.counters.splits.load(Ordering::Relaxed),
            merges: self.counters.merges.load(Ordering::Relaxed),
            adoptions: self.counters.adoptions.load(Ordering::Relaxed),
            root_replacements: self.counters.root_replacements.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn root_slot(&self) -> &RwLock<NodeRef<K, V>> {
        &self.root
    }

    pub(crate) fn bump_depth(&self, delta: isize) {
        if delta >= 0 {
            self.depth.fetch_add(delta as usize, Ordering::Relaxed);
        } else {
            self.depth.fetch_sub(delta.unsigned_abs(), Ordering::Relaxed);
        }
    }

    pub(crate) fn note_split(&self) {
        self.counters.splits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_merge(&self) {
        self.counters.merges.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_adoption(&self) {
        self.counters.adoptions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_root_replacement(&self) {
        self.counters.root_replacements.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_timeout(&self) {
        self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
    }
}

impl<K, V> Default for ReedMap<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> std::fmt::Debug for ReedMap<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReedMap")
            .field("fanout", &self.fanout.max_entries())
            .field("len", &self.len())
            .field("depth", &self.depth())
            .finish()
    }
}

impl<K, V> Extend<(K, V)> for ReedMap<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        for (key, value) in iter {
            // Unbounded waits cannot time out; depth exhaustion is the only
            // failure and is unreachable below astronomical sizes.
            let _ = self.add_or_update(key, value);
        }
    }
}

impl<K, V> FromIterator<(K, V)> for ReedMap<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = Self::new();
        map.extend(iter);
        map
    }
}
