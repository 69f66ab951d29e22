//! Integration tests for the Merkle-Clock.
//!
//! Tests cover:
//! - Idempotent merge of the same head
//! - Order-independent head membership
//! - Frontier monotonicity: no head member is a parent of a merged event
//! - Partition/heal with zoom notification

use mdcs_merkle::{same_set, BlockStore, Cid, EventBlock, MemoryBlockStore, MergeKind, MerkleClock};
use proptest::prelude::*;
use proptest::sample::Index;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Build a random DAG: event `i` links to parents chosen among events `0..i`.
fn build_dag(store: &MemoryBlockStore, parent_picks: &[Vec<Index>]) -> Vec<EventBlock<String>> {
    let mut events: Vec<EventBlock<String>> = Vec::new();
    for (i, picks) in parent_picks.iter().enumerate() {
        let parents: Vec<Cid> = if i == 0 {
            vec![]
        } else {
            picks.iter().map(|p| events[p.index(i)].cid()).collect()
        };
        let block = EventBlock::create(format!("event_{}", i), parents).unwrap();
        store.put(block.to_raw()).unwrap();
        events.push(block);
    }
    events
}

fn dag_and_order() -> impl Strategy<Value = (Vec<Vec<Index>>, Vec<usize>, Vec<usize>)> {
    prop::collection::vec(prop::collection::vec(any::<Index>(), 0..3), 1..12).prop_flat_map(
        |picks| {
            let n = picks.len();
            let order: Vec<usize> = (0..n).collect();
            (
                Just(picks),
                Just(order.clone()).prop_shuffle(),
                Just(order).prop_shuffle(),
            )
        },
    )
}

fn assert_frontier_invariant(clock: &MerkleClock, merged: &[EventBlock<String>]) {
    let all_parents: HashSet<Cid> = merged
        .iter()
        .flat_map(|e| e.parents().iter().copied())
        .collect();
    for cid in clock.head() {
        assert!(!all_parents.contains(&cid), "head contains superseded {}", cid.short());
    }
}

proptest! {
    #[test]
    fn prop_merge_is_order_independent((picks, order_a, order_b) in dag_and_order()) {
        let store = Arc::new(MemoryBlockStore::new());
        let events = build_dag(&store, &picks);

        let clock_a = MerkleClock::new(store.clone());
        for i in &order_a {
            clock_a.apply_head(&[events[*i].cid()], &[]);
        }
        let clock_b = MerkleClock::new(store.clone());
        for i in &order_b {
            clock_b.apply_head(&[events[*i].cid()], &[]);
        }

        prop_assert!(same_set(&clock_a.head(), &clock_b.head()));
    }

    #[test]
    fn prop_head_never_contains_merged_parents((picks, order, _) in dag_and_order()) {
        let store = Arc::new(MemoryBlockStore::new());
        let events = build_dag(&store, &picks);
        let clock = MerkleClock::new(store.clone());

        let mut merged = Vec::new();
        for i in &order {
            clock.apply_head(&[events[*i].cid()], &[]);
            merged.push(events[*i].clone());
            assert_frontier_invariant(&clock, &merged);
        }
    }

    #[test]
    fn prop_reapplying_is_idempotent((picks, order, _) in dag_and_order()) {
        let store = Arc::new(MemoryBlockStore::new());
        let events = build_dag(&store, &picks);
        let clock = MerkleClock::new(store.clone());

        for i in &order {
            clock.apply_head(&[events[*i].cid()], &[]);
        }
        let before = clock.head();
        for i in &order {
            let change = clock.apply_head(&[events[*i].cid()], &[]);
            prop_assert_eq!(change.kind, MergeKind::Unchanged);
        }
        prop_assert_eq!(clock.head(), before);
    }
}

/// Two replicas diverge during a partition and merge afterwards.
#[test]
fn test_partition_and_heal() {
    let store = Arc::new(MemoryBlockStore::new());
    let clock = MerkleClock::new(store.clone());
    let zooms = Arc::new(AtomicUsize::new(0));
    let z = zooms.clone();
    clock.on_zoom(move || {
        z.fetch_add(1, Ordering::SeqCst);
    });

    let genesis = EventBlock::create("genesis".to_string(), vec![]).unwrap();
    store.put(genesis.to_raw()).unwrap();
    clock.apply_head(&[genesis.cid()], &[]);

    // Each side of the partition extends the same head
    let mut left = genesis.cid();
    let mut right = genesis.cid();
    for i in 0..3 {
        let l = EventBlock::create(format!("left_{}", i), vec![left]).unwrap();
        let r = EventBlock::create(format!("right_{}", i), vec![right]).unwrap();
        store.put(l.to_raw()).unwrap();
        store.put(r.to_raw()).unwrap();
        left = l.cid();
        right = r.cid();
    }

    let prev = clock.head();
    clock.apply_head(&[left], &prev);
    assert_eq!(zooms.load(Ordering::SeqCst), 0);

    // The right branch arrives relative to the old genesis head
    let change = clock.apply_head(&[right], &[genesis.cid()]);
    assert_eq!(change.kind, MergeKind::Merged);
    assert!(same_set(&clock.head(), &[left, right]));
    assert_eq!(zooms.load(Ordering::SeqCst), 1);

    // Heal with a merge event
    let heal = EventBlock::create("heal".to_string(), vec![left, right]).unwrap();
    store.put(heal.to_raw()).unwrap();
    let prev = clock.head();
    clock.apply_head(&[heal.cid()], &prev);
    assert_eq!(clock.head(), vec![heal.cid()]);
    assert_eq!(store.topological_order(&clock.head()).len(), 8);
}
