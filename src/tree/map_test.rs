// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Tests for the map facade.

use super::map::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReedError;
    use crate::tree::types::{Fanout, GetOrAddResult, InsertResult, RemoveResult, SearchResult};
    use std::sync::Arc;

    fn small_map() -> ReedMap<i64, i64> {
        ReedMap::with_fanout(Fanout::new(3).unwrap())
    }

    #[test]
    fn test_single_insert_and_remove() {
        let map = small_map();
        assert_eq!(map.try_add(1, -1).unwrap(), InsertResult::Success);
        assert_eq!(map.len(), 1);
        assert_eq!(map.depth(), 1);
        assert_eq!(map.try_get(&1).unwrap(), SearchResult::Found(-1));
        assert_eq!(map.try_remove(&1).unwrap(), RemoveResult::Success);
        assert_eq!(map.len(), 0);
        assert_eq!(map.try_get(&1).unwrap(), SearchResult::NotFound);
        map.verify_invariants().unwrap();
    }

    #[test]
    fn test_overflow_splits_into_two_leaves() {
        let map = small_map();
        for key in [1, 2, 3] {
            assert_eq!(map.try_add(key, key * 10).unwrap(), InsertResult::Success);
        }
        assert_eq!(map.depth(), 1);
        // The fourth insert overflows the root leaf and splits it.
        assert_eq!(map.try_add(4, 40).unwrap(), InsertResult::Success);
        assert_eq!(map.depth(), 2);
        assert_eq!(map.len(), 4);
        let stats = map.stats();
        assert_eq!(stats.splits, 1);
        assert_eq!(stats.root_replacements, 1);
        for key in [1, 2, 3, 4] {
            assert_eq!(map.try_get(&key).unwrap(), SearchResult::Found(key * 10));
        }
        map.verify_invariants().unwrap();
    }

    #[test]
    fn test_underflow_merges_and_collapses_root() {
        let map = small_map();
        for key in [1, 2, 3, 4] {
            map.try_add(key, key).unwrap();
        }
        assert_eq!(map.depth(), 2);
        // Removing 4 underflows the right leaf; its sibling holds exactly
        // the half-full minimum, so no adoption is possible and the leaves
        // merge, collapsing the root.
        assert_eq!(map.try_remove(&4).unwrap(), RemoveResult::Success);
        assert_eq!(map.depth(), 1);
        assert_eq!(map.len(), 3);
        let stats = map.stats();
        assert!(stats.merges >= 1);
        assert_eq!(stats.root_replacements, 2); // split + collapse
        for key in [1, 2, 3] {
            assert!(map.try_get(&key).unwrap().is_found());
        }
        map.verify_invariants().unwrap();
    }

    #[test]
    fn test_adoption_repairs_underflow_without_merge() {
        let map = small_map();
        // Build leaves {0,1,2} and {3,4,5}, then shrink the right leaf to
        // {3}: the left sibling is above the half-full minimum and donates
        // its greatest entry instead of merging.
        for key in [1, 2, 3, 4, 5, 0] {
            map.try_add(key, key).unwrap();
        }
        assert_eq!(map.depth(), 2);
        assert_eq!(map.try_remove(&4).unwrap(), RemoveResult::Success);
        assert_eq!(map.try_remove(&5).unwrap(), RemoveResult::Success);
        assert_eq!(map.depth(), 2);
        let stats = map.stats();
        assert_eq!(stats.adoptions, 1);
        assert_eq!(stats.merges, 0);
        map.verify_invariants().unwrap();
        for key in [0, 1, 2, 3] {
            assert!(map.try_get(&key).unwrap().is_found());
        }
    }

    #[test]
    fn test_add_or_update_replaces() {
        let map = small_map();
        assert_eq!(map.add_or_update(7, 1).unwrap(), InsertResult::Success);
        assert_eq!(map.add_or_update(7, 2).unwrap(), InsertResult::Success);
        assert_eq!(map.try_get(&7).unwrap(), SearchResult::Found(2));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_try_add_keeps_first_value() {
        let map = small_map();
        assert_eq!(map.try_add(7, 1).unwrap(), InsertResult::Success);
        assert_eq!(map.try_add(7, 2).unwrap(), InsertResult::AlreadyExists);
        assert_eq!(map.try_get(&7).unwrap(), SearchResult::Found(1));
    }

    #[test]
    fn test_get_or_add_returns_existing() {
        let map = small_map();
        assert_eq!(map.get_or_add(7, 1).unwrap(), GetOrAddResult::Added(1));
        assert_eq!(map.get_or_add(7, 2).unwrap(), GetOrAddResult::Existing(1));
        assert_eq!(map.try_get(&7).unwrap(), SearchResult::Found(1));
    }

    #[test]
    fn test_get_or_add_on_full_leaf_without_match() {
        let map = small_map();
        for key in [1, 2, 3] {
            map.try_add(key, key).unwrap();
        }
        // Leaf is at capacity: the conditional descent retains the leaf,
        // finds no match and falls back to a pessimistic insert with split.
        assert_eq!(map.get_or_add(4, 40).unwrap(), GetOrAddResult::Added(40));
        assert_eq!(map.depth(), 2);
        map.verify_invariants().unwrap();
    }

    #[test]
    fn test_remove_missing_key_on_full_leaf_answers_from_test_descent() {
        let map = small_map();
        for key in [1, 2, 3, 4] {
            map.try_add(key, key).unwrap();
        }
        // Both leaves sit at the half-full minimum: the conditional delete
        // retains the unsafe leaf, sees the key is absent and stops.
        assert_eq!(map.try_remove(&99).unwrap(), RemoveResult::NotFound);
        assert_eq!(map.len(), 4);
        map.verify_invariants().unwrap();
    }

    #[test]
    fn test_contains_key() {
        let map = small_map();
        map.try_add(5, 50).unwrap();
        assert_eq!(map.contains_key(&5).unwrap(), SearchResult::Found(()));
        assert_eq!(map.contains_key(&6).unwrap(), SearchResult::NotFound);
    }

    #[test]
    fn test_clear_resets_to_empty_root_leaf() {
        let map = small_map();
        for key in 0..50 {
            map.try_add(key, key).unwrap();
        }
        assert!(map.depth() > 1);
        map.clear();
        assert_eq!(map.len(), 0);
        assert!(map.is_empty());
        assert_eq!(map.depth(), 1);
        assert_eq!(map.try_get(&10).unwrap(), SearchResult::NotFound);
        map.verify_invariants().unwrap();
    }

    #[test]
    fn test_first_and_last() {
        let map = small_map();
        assert_eq!(map.first().unwrap(), None);
        assert_eq!(map.last().unwrap(), None);
        for key in [5, 1, 9, 3] {
            map.try_add(key, key * 2).unwrap();
        }
        assert_eq!(map.first().unwrap(), Some((1, 2)));
        assert_eq!(map.last().unwrap(), Some((9, 18)));
    }

    #[test]
    fn test_zero_timeout_on_contended_root_returns_timed_out() {
        let map = small_map();
        map.try_add(1, 1).unwrap();
        // Latch the root node exclusively; the latch is not reentrant, so
        // every descent below must give up within its budget.
        let root = Arc::clone(&*map.root_slot().read());
        root.latch_exclusive_blocking();
        assert_eq!(map.try_add_for(2, 2, 0).unwrap(), InsertResult::TimedOut);
        assert_eq!(map.add_or_update_for(2, 2, 1).unwrap(), InsertResult::TimedOut);
        assert_eq!(
            map.get_or_add_for(2, 2, 1).unwrap(),
            GetOrAddResult::TimedOut
        );
        assert_eq!(map.try_remove_for(&1, 1).unwrap(), RemoveResult::TimedOut);
        assert_eq!(map.try_get_for(&1, 0).unwrap(), SearchResult::TimedOut);
        unsafe { root.unlatch_exclusive() };
        // With the latch released the same calls go through.
        assert_eq!(map.try_add_for(2, 2, 0).unwrap(), InsertResult::Success);
        assert_eq!(map.try_get_for(&1, 0).unwrap(), SearchResult::Found(1));
        assert!(map.stats().timeouts >= 5);
    }

    #[test]
    fn test_clear_timeout_on_contended_root_pointer() {
        let map = small_map();
        let guard = map.root_slot().write();
        assert_eq!(map.clear_for(1).unwrap(), RemoveResult::TimedOut);
        drop(guard);
        assert_eq!(map.clear_for(1).unwrap(), RemoveResult::Success);
    }

    #[test]
    fn test_invalid_timeout_is_an_argument_error() {
        let map = small_map();
        assert_eq!(
            map.try_add_for(1, 1, -2).unwrap_err(),
            ReedError::InvalidTimeout { timeout_ms: -2 }
        );
        assert!(map.try_get_for(&1, -5).is_err());
        assert!(map.clear_for(-3).is_err());
    }

    #[test]
    fn test_bulk_insert_then_delete_returns_to_empty_leaf() {
        let map = small_map();
        for key in 0..200 {
            map.try_add(key, key).unwrap();
        }
        assert_eq!(map.len(), 200);
        map.verify_invariants().unwrap();
        for key in 0..200 {
            assert_eq!(map.try_remove(&key).unwrap(), RemoveResult::Success);
        }
        assert_eq!(map.len(), 0);
        assert_eq!(map.depth(), 1);
        map.verify_invariants().unwrap();
    }

    #[test]
    fn test_interleaved_mutations_keep_invariants() {
        let map = small_map();
        for key in (0..120).rev() {
            map.add_or_update(key, key).unwrap();
        }
        for key in (0..120).step_by(3) {
            map.try_remove(&key).unwrap();
        }
        map.verify_invariants().unwrap();
        assert_eq!(map.len(), 80);
        for key in 0..120 {
            let expected_found = key % 3 != 0;
            assert_eq!(map.try_get(&key).unwrap().is_found(), expected_found);
        }
    }

    #[test]
    fn test_collection_traits() {
        let map: ReedMap<i32, i32> = [(2, 20), (1, 10)].into_iter().collect();
        assert_eq!(map.len(), 2);
        let debug = format!("{:?}", map);
        assert!(debug.contains("ReedMap"));
        let empty: ReedMap<i32, i32> = ReedMap::default();
        assert!(empty.is_empty());
    }
}
