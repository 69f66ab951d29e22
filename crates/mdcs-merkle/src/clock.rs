//! The Merkle-Clock: the causal frontier of committed events.
//!
//! The clock holds the current `head`, the set of events with no known
//! descendant. New heads are merged in with [`MerkleClock::apply_head`]; any
//! member that turns out to be an ancestor of another member is pruned.
//!
//! Ancestry is resolved through the [`BlockStore`]. The clock also remembers
//! every CID it has ever seen superseded, so a pruned event can never come
//! back into the head even if its descendant's block is later compacted away.

use crate::hash::Cid;
use crate::store::BlockStore;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// An ordered sequence of CIDs with set semantics.
pub type ClockHead = Vec<Cid>;

/// Handle returned when registering an observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// How a call to [`MerkleClock::apply_head`] changed the head.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeKind {
    /// Membership did not change.
    Unchanged,
    /// The head moved forward to exactly the supplied head.
    FastForward,
    /// Concurrent history was merged; the frontier changed shape.
    Merged,
}

/// The outcome of a head merge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeadChange {
    pub previous: ClockHead,
    pub current: ClockHead,
    pub kind: MergeKind,
}

impl HeadChange {
    pub fn changed(&self) -> bool {
        self.kind != MergeKind::Unchanged
    }

    /// Whether dependent caches must be reset.
    pub fn is_zoom(&self) -> bool {
        self.kind == MergeKind::Merged
    }
}

type ZoomFn = Arc<dyn Fn() + Send + Sync>;
type TickFn = Arc<dyn Fn(&HeadChange) + Send + Sync>;

#[derive(Default)]
struct Observers {
    zoom: Vec<(ObserverId, ZoomFn)>,
    tick: Vec<(ObserverId, TickFn)>,
}

/// `superseded` only grows: its size is bounded by the number of events in
/// the history this clock has merged.
#[derive(Debug, Default)]
struct ClockState {
    head: ClockHead,
    /// Every CID known to be an ancestor of a merged event.
    superseded: HashSet<Cid>,
    /// Superseded CIDs whose own parents could not be resolved yet.
    unresolved: HashSet<Cid>,
    /// Merged CIDs whose blocks were not in the store when applied.
    pending: HashSet<Cid>,
}

/// Merkle-Clock over a shared block store.
pub struct MerkleClock {
    store: Arc<dyn BlockStore>,
    state: RwLock<ClockState>,
    observers: RwLock<Observers>,
    next_observer: AtomicU64,
}

impl MerkleClock {
    /// Create a clock in the genesis state (empty head).
    pub fn new(store: Arc<dyn BlockStore>) -> Self {
        MerkleClock {
            store,
            state: RwLock::new(ClockState::default()),
            observers: RwLock::new(Observers::default()),
            next_observer: AtomicU64::new(0),
        }
    }

    /// The current head.
    pub fn head(&self) -> ClockHead {
        self.state.read().head.clone()
    }

    /// The block store used to resolve ancestry.
    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.store
    }

    /// Register an observer fired whenever a merge changes the frontier's shape.
    pub fn on_zoom<F>(&self, f: F) -> ObserverId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.observers.write().zoom.push((id, Arc::new(f)));
        id
    }

    /// Register an observer fired on every head change.
    pub fn on_tick<F>(&self, f: F) -> ObserverId
    where
        F: Fn(&HeadChange) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.observers.write().tick.push((id, Arc::new(f)));
        id
    }

    /// Unregister an observer. Returns false if it was not registered.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.zoom.len() + observers.tick.len();
        observers.zoom.retain(|(oid, _)| *oid != id);
        observers.tick.retain(|(oid, _)| *oid != id);
        before != observers.zoom.len() + observers.tick.len()
    }

    fn next_id(&self) -> ObserverId {
        ObserverId(self.next_observer.fetch_add(1, Ordering::Relaxed))
    }

    /// Merge `new_head` into the current head.
    ///
    /// `previous_head` is the head the caller observed before producing
    /// `new_head`. If the clock has not moved since then, the new head is
    /// taken as-is (minus anything already superseded). Otherwise the result
    /// is `head ∪ new_head` with every ancestor of another member removed.
    ///
    /// Observers run after the head is updated and before this returns.
    pub fn apply_head(&self, new_head: &[Cid], previous_head: &[Cid]) -> HeadChange {
        let new_head = dedupe(new_head);

        let change = {
            let mut state = self.state.write();
            let old = state.head.clone();

            for cid in &new_head {
                if self.store.contains(cid) {
                    self.record_ancestors(&mut state, cid);
                } else {
                    state.pending.insert(*cid);
                }
            }
            self.retry_unresolved(&mut state);

            let candidates = if same_set(&old, previous_head) {
                new_head.clone()
            } else {
                dedupe(&[old.as_slice(), new_head.as_slice()].concat())
            };
            let current: ClockHead = candidates
                .into_iter()
                .filter(|cid| !state.superseded.contains(cid))
                .collect();

            let kind = if same_set(&current, &old) {
                MergeKind::Unchanged
            } else if same_set(&current, &new_head) {
                MergeKind::FastForward
            } else {
                MergeKind::Merged
            };

            if kind == MergeKind::Unchanged {
                HeadChange {
                    previous: old.clone(),
                    current: old,
                    kind,
                }
            } else {
                state.head = current.clone();
                HeadChange {
                    previous: old,
                    current,
                    kind,
                }
            }
        };

        if change.changed() {
            let head: Vec<String> = change.current.iter().map(Cid::short).collect();
            debug!(kind = ?change.kind, head = ?head, "clock head updated");
            self.notify(&change);
        }

        change
    }

    /// Add the full known ancestry of `cid` to the superseded set.
    fn record_ancestors(&self, state: &mut ClockState, cid: &Cid) {
        let mut stack = match self.store.parents(cid) {
            Some(parents) => parents,
            None => return,
        };

        while let Some(current) = stack.pop() {
            if !state.superseded.insert(current) {
                continue;
            }
            match self.store.parents(&current) {
                Some(parents) => stack.extend(parents),
                None => {
                    state.unresolved.insert(current);
                }
            }
        }
    }

    /// Walk the ancestry of merged or superseded CIDs whose blocks have
    /// arrived since they were first seen.
    fn retry_unresolved(&self, state: &mut ClockState) {
        let arrived: Vec<Cid> = state
            .unresolved
            .iter()
            .chain(state.pending.iter())
            .filter(|cid| self.store.contains(cid))
            .copied()
            .collect();
        for cid in arrived {
            state.unresolved.remove(&cid);
            state.pending.remove(&cid);
            self.record_ancestors(state, &cid);
        }
    }

    fn notify(&self, change: &HeadChange) {
        // Clone the callbacks so observers may register or remove observers.
        let (zoom, tick): (Vec<ZoomFn>, Vec<TickFn>) = {
            let observers = self.observers.read();
            (
                observers.zoom.iter().map(|(_, f)| Arc::clone(f)).collect(),
                observers.tick.iter().map(|(_, f)| Arc::clone(f)).collect(),
            )
        };

        if change.is_zoom() {
            debug!(observers = zoom.len(), "clock zoom");
            for f in &zoom {
                f();
            }
        }
        for f in &tick {
            f(change);
        }
    }
}

impl std::fmt::Debug for MerkleClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MerkleClock")
            .field("head", &self.head())
            .finish()
    }
}

fn dedupe(cids: &[Cid]) -> ClockHead {
    let mut seen = HashSet::new();
    cids.iter().copied().filter(|c| seen.insert(*c)).collect()
}

/// Compare two heads as sets.
pub fn same_set(a: &[Cid], b: &[Cid]) -> bool {
    let a: HashSet<&Cid> = a.iter().collect();
    let b: HashSet<&Cid> = b.iter().collect();
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventBlock;
    use crate::store::MemoryBlockStore;
    use std::sync::atomic::AtomicUsize;

    fn setup() -> (Arc<MemoryBlockStore>, MerkleClock) {
        let store = Arc::new(MemoryBlockStore::new());
        let clock = MerkleClock::new(store.clone());
        (store, clock)
    }

    fn event(store: &MemoryBlockStore, label: &str, parents: &[Cid]) -> Cid {
        let block = EventBlock::create(label.to_string(), parents.to_vec()).unwrap();
        store.put(block.to_raw()).unwrap()
    }

    #[test]
    fn test_genesis_head_is_empty() {
        let (_store, clock) = setup();
        assert!(clock.head().is_empty());
    }

    #[test]
    fn test_fast_forward() {
        let (store, clock) = setup();
        let a = event(&store, "a", &[]);
        let b = event(&store, "b", &[a]);

        let change = clock.apply_head(&[a], &[]);
        assert_eq!(change.kind, MergeKind::FastForward);
        let change = clock.apply_head(&[b], &[a]);
        assert_eq!(change.kind, MergeKind::FastForward);
        assert_eq!(clock.head(), vec![b]);
    }

    #[test]
    fn test_stale_previous_still_prunes_ancestors() {
        let (store, clock) = setup();
        let a = event(&store, "a", &[]);
        let b = event(&store, "b", &[a]);

        clock.apply_head(&[a], &[]);
        // Caller thought the head was empty; b still supersedes a.
        let change = clock.apply_head(&[b], &[]);
        assert_eq!(clock.head(), vec![b]);
        assert_eq!(change.kind, MergeKind::FastForward);
    }

    #[test]
    fn test_concurrent_merge_fires_zoom() {
        let (store, clock) = setup();
        let zooms = Arc::new(AtomicUsize::new(0));
        let z = zooms.clone();
        clock.on_zoom(move || {
            z.fetch_add(1, Ordering::SeqCst);
        });

        let genesis = event(&store, "genesis", &[]);
        let a = event(&store, "a", &[genesis]);
        let b = event(&store, "b", &[genesis]);

        clock.apply_head(&[genesis], &[]);
        clock.apply_head(&[a], &[genesis]);
        assert_eq!(zooms.load(Ordering::SeqCst), 0);

        let change = clock.apply_head(&[b], &[genesis]);
        assert_eq!(change.kind, MergeKind::Merged);
        assert!(same_set(&clock.head(), &[a, b]));
        assert_eq!(zooms.load(Ordering::SeqCst), 1);

        let merge = event(&store, "merge", &[a, b]);
        clock.apply_head(&[merge], &clock.head());
        assert_eq!(clock.head(), vec![merge]);
        assert_eq!(zooms.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_apply_twice_is_idempotent() {
        let (store, clock) = setup();
        let a = event(&store, "a", &[]);
        let b = event(&store, "b", &[]);

        clock.apply_head(&[a], &[]);
        clock.apply_head(&[b], &[]);
        let once = clock.head();
        let change = clock.apply_head(&[b], &[]);
        assert_eq!(change.kind, MergeKind::Unchanged);
        assert_eq!(clock.head(), once);
    }

    #[test]
    fn test_ancestor_is_not_readmitted() {
        let (store, clock) = setup();
        let a = event(&store, "a", &[]);
        let b = event(&store, "b", &[a]);

        clock.apply_head(&[b], &[]);
        let change = clock.apply_head(&[a], &[]);
        assert_eq!(change.kind, MergeKind::Unchanged);
        assert_eq!(clock.head(), vec![b]);
    }

    #[test]
    fn test_late_arriving_ancestry() {
        let (store, clock) = setup();
        let a = EventBlock::create("a".to_string(), vec![]).unwrap();
        let b = EventBlock::create("b".to_string(), vec![a.cid()]).unwrap();
        let c = EventBlock::create("c".to_string(), vec![b.cid()]).unwrap();

        // Only c is known; b is recorded as superseded but unresolved
        store.put(c.to_raw()).unwrap();
        clock.apply_head(&[c.cid()], &[]);

        store.put(b.to_raw()).unwrap();
        store.put(a.to_raw()).unwrap();
        clock.apply_head(&[a.cid()], &[]);
        assert_eq!(clock.head(), vec![c.cid()]);
    }

    #[test]
    fn test_late_block_of_head_member_prunes_its_parent() {
        let (store, clock) = setup();
        let a = event(&store, "a", &[]);
        let c = event(&store, "c", &[]);
        let b = EventBlock::create("b".to_string(), vec![a]).unwrap();

        clock.apply_head(&[a], &[]);
        // b is merged before its block is available, so a cannot be pruned yet
        clock.apply_head(&[b.cid()], &[]);
        assert!(same_set(&clock.head(), &[a, b.cid()]));

        store.put(b.to_raw()).unwrap();
        let change = clock.apply_head(&[c], &[]);
        assert!(same_set(&change.current, &[b.cid(), c]));
        assert!(!clock.head().contains(&a));
    }

    #[test]
    fn test_reapplying_head_prunes_after_late_block() {
        let (store, clock) = setup();
        let a = event(&store, "a", &[]);
        let b = EventBlock::create("b".to_string(), vec![a]).unwrap();

        clock.apply_head(&[a], &[]);
        clock.apply_head(&[b.cid()], &[]);
        let head = clock.head();

        store.put(b.to_raw()).unwrap();
        clock.apply_head(&head, &head);
        assert_eq!(clock.head(), vec![b.cid()]);
    }

    #[test]
    fn test_tick_and_observer_removal() {
        let (store, clock) = setup();
        let ticks = Arc::new(AtomicUsize::new(0));
        let t = ticks.clone();
        let id = clock.on_tick(move |change| {
            assert!(change.changed());
            t.fetch_add(1, Ordering::SeqCst);
        });

        let a = event(&store, "a", &[]);
        let b = event(&store, "b", &[a]);
        clock.apply_head(&[a], &[]);
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        assert!(clock.remove_observer(id));
        assert!(!clock.remove_observer(id));
        clock.apply_head(&[b], &[a]);
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zoom_observers_run_in_registration_order() {
        let (store, clock) = setup();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            clock.on_zoom(move || order.lock().push(i));
        }

        let a = event(&store, "a", &[]);
        let b = event(&store, "b", &[]);
        clock.apply_head(&[a], &[]);
        clock.apply_head(&[b], &[]);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }
}
