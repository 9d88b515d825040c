//! Property-Based Tests for Bounded Child Lists
//!
//! Uses proptest to verify that the ordered child list keeps its totals
//! consistent and its bounds restored under arbitrary insertion sequences.
//!
//! # Test Properties
//!
//! 1. **Totals Consistency**: count and cumulative size always match entries
//! 2. **Bound Restoration**: after bounded insertion, bounds always hold
//! 3. **Order**: eviction removes the oldest member first
//! 4. **Admission**: an over-sized member is never admitted by eviction

#![cfg(test)]

use proptest::prelude::*;

use crate::domain::{OrderedChildList, ResourceId};

// =============================================================================
// Property Strategies
// =============================================================================

/// Strategy for generating list bounds: 1-16 max members, 1-4096 max bytes.
fn bounds_strategy() -> impl Strategy<Value = (u32, u64)> {
    (1u32..=16, 1u64..=4096)
}

/// Strategy for generating insertion sequences of member byte sizes.
fn sizes_strategy() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(0u64..512, 0..64)
}

/// Apply the bounded-insertion policy: append, evict once on count overflow,
/// then evict until the byte bound holds. Mirrors the manager's write cycle
/// without the store round trips.
fn insert_bounded(list: &mut OrderedChildList, ri: ResourceId, size: u64) {
    list.append(ri, size);
    if list.count() > list.max_count {
        list.evict_oldest();
    }
    while list.cumulative_size() > list.max_byte_size {
        if list.evict_oldest().is_none() {
            break;
        }
    }
    list.sequence += 1;
}

// =============================================================================
// Invariant Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: totals stay consistent after every insertion.
    #[test]
    fn prop_totals_consistent(
        (max_count, max_bytes) in bounds_strategy(),
        sizes in sizes_strategy(),
    ) {
        let mut list = OrderedChildList::new(max_count, max_bytes);
        for (i, size) in sizes.into_iter().enumerate() {
            insert_bounded(&mut list, ResourceId::new(format!("m{}", i)), size);
            prop_assert!(list.totals_consistent(),
                "totals diverged after insertion {}", i);
        }
    }

    /// Property: both bounds hold after every insertion of an admissible member.
    #[test]
    fn prop_bounds_restored(
        (max_count, max_bytes) in bounds_strategy(),
        sizes in sizes_strategy(),
    ) {
        let mut list = OrderedChildList::new(max_count, max_bytes);
        for (i, size) in sizes.into_iter().enumerate() {
            // Admission rejects members larger than the byte bound outright
            if size > max_bytes {
                continue;
            }
            insert_bounded(&mut list, ResourceId::new(format!("m{}", i)), size);
            prop_assert!(list.count() <= max_count,
                "count bound violated: {} > {}", list.count(), max_count);
            prop_assert!(list.cumulative_size() <= max_bytes,
                "byte bound violated: {} > {}", list.cumulative_size(), max_bytes);
            prop_assert!(list.within_bounds());
        }
    }

    /// Property: the newest member always survives an insertion that evicts.
    #[test]
    fn prop_newest_survives(
        (max_count, max_bytes) in bounds_strategy(),
        sizes in sizes_strategy(),
    ) {
        let mut list = OrderedChildList::new(max_count, max_bytes);
        for (i, size) in sizes.into_iter().enumerate() {
            if size > max_bytes {
                continue;
            }
            let ri = ResourceId::new(format!("m{}", i));
            insert_bounded(&mut list, ri.clone(), size);
            prop_assert_eq!(list.newest().map(|e| e.ri.clone()), Some(ri),
                "newest member was evicted on insertion {}", i);
        }
    }

    /// Property: eviction order is insertion order.
    #[test]
    fn prop_eviction_is_fifo(
        count in 2u32..=32,
    ) {
        // Bound of 1 member: each insertion evicts exactly its predecessor
        let mut list = OrderedChildList::new(1, u64::MAX);
        list.append(ResourceId::new("m0"), 1);
        for i in 1..count {
            list.append(ResourceId::new(format!("m{}", i)), 1);
            let evicted = list.evict_oldest();
            prop_assert_eq!(
                evicted.map(|e| e.ri),
                Some(ResourceId::new(format!("m{}", i - 1)))
            );
        }
    }

    /// Property: sequence increases monotonically with insertions.
    #[test]
    fn prop_sequence_monotone(
        (max_count, max_bytes) in bounds_strategy(),
        sizes in sizes_strategy(),
    ) {
        let mut list = OrderedChildList::new(max_count, max_bytes);
        let mut last = list.sequence;
        for (i, size) in sizes.into_iter().enumerate() {
            insert_bounded(&mut list, ResourceId::new(format!("m{}", i)), size);
            prop_assert!(list.sequence > last);
            last = list.sequence;
        }
    }
}
