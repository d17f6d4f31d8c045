//! The derived-collection engine.
//!
//! A [`Collection`] is a keyed entity store with a paired [`Writer`]. Sources
//! are collections fed directly by the embedding process; derived collections
//! are fed by recomputation glue registered on their upstreams with
//! [`register_derived`]. Every mutation updates the collection's secondary
//! indexes under the same write lock, so a reader never observes an entity
//! without its index entries (or vice versa).

use ahash::AHashMap as HashMap;
use parking_lot::RwLock;
use std::{
    collections::{BTreeMap, BTreeSet},
    hash::Hash,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// Entities stored in a collection. Keys must be unique within a collection
/// and stable across recomputations.
pub trait Keyed: Clone + PartialEq + Send + Sync + 'static {
    fn key(&self) -> String;
}

/// One change observed by a batch listener.
#[derive(Clone, Debug)]
pub enum Event<T> {
    Add(T),
    Update { new: T, old: T },
    Delete(T),
}

impl<T> Event<T> {
    /// The entity in its most recent state (the deleted entity for deletes).
    pub fn item(&self) -> &T {
        match self {
            Event::Add(t) | Event::Delete(t) => t,
            Event::Update { new, .. } => new,
        }
    }
}

/// A requested mutation, applied by a [`Writer`].
pub enum Change<T> {
    Apply(T),
    Delete(String),
}

/// Participates in readiness tracking.
pub trait Ready: Send + Sync {
    fn has_synced(&self) -> bool;
}

type IndexUpdate<T> = Box<dyn Fn(Option<&T>, Option<&T>) + Send + Sync>;
type BatchListener<T> = Arc<dyn Fn(&[Event<T>]) + Send + Sync>;

struct State<T> {
    /// BTreeMap so enumeration order is deterministic; workload uids are
    /// kind-qualified, which makes native pods sort ahead of workload
    /// entries during address dedup.
    items: BTreeMap<String, T>,
    index_updates: Vec<IndexUpdate<T>>,
}

struct Inner<T> {
    name: &'static str,
    state: RwLock<State<T>>,
    listeners: RwLock<Vec<BatchListener<T>>>,
    synced: AtomicBool,
    parents: RwLock<Vec<Arc<dyn Ready>>>,
}

/// A shared handle for reads, index registration, and listener registration.
pub struct Collection<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// The single mutating handle for a collection.
pub struct Writer<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Writer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Creates a collection. Sources start unsynced and flip on
/// [`Writer::mark_synced`]; derived collections are created with
/// `synced = true` and inherit readiness from their parents.
pub fn collection<T: Keyed>(name: &'static str, synced: bool) -> (Writer<T>, Collection<T>) {
    let inner = Arc::new(Inner {
        name,
        state: RwLock::new(State {
            items: BTreeMap::new(),
            index_updates: Vec::new(),
        }),
        listeners: RwLock::new(Vec::new()),
        synced: AtomicBool::new(synced),
        parents: RwLock::new(Vec::new()),
    });
    (
        Writer {
            inner: inner.clone(),
        },
        Collection { inner },
    )
}

// === impl Collection ===

impl<T: Keyed> Collection<T> {
    pub fn get(&self, key: &str) -> Option<T> {
        self.inner.state.read().items.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.state.read().items.contains_key(key)
    }

    /// All entities, in key order.
    pub fn list(&self) -> Vec<T> {
        self.inner.state.read().items.values().cloned().collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.state.read().items.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.state.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.read().items.is_empty()
    }

    /// Registers a secondary index. An entity may map to zero or more keys;
    /// key associations are re-derived atomically whenever the entity
    /// changes.
    pub fn index<K, F>(&self, extract: F) -> Index<K, T>
    where
        K: Hash + Eq + Clone + Send + Sync + 'static,
        F: Fn(&T) -> Vec<K> + Send + Sync + 'static,
    {
        let map: Arc<RwLock<HashMap<K, BTreeSet<String>>>> = Arc::new(RwLock::new(HashMap::new()));
        let update = {
            let map = map.clone();
            Box::new(move |old: Option<&T>, new: Option<&T>| {
                let mut map = map.write();
                if let Some(old) = old {
                    let key = old.key();
                    for k in extract(old) {
                        if let Some(set) = map.get_mut(&k) {
                            set.remove(&key);
                            if set.is_empty() {
                                map.remove(&k);
                            }
                        }
                    }
                }
                if let Some(new) = new {
                    let key = new.key();
                    for k in extract(new) {
                        map.entry(k).or_default().insert(key.clone());
                    }
                }
            })
        };

        let mut state = self.inner.state.write();
        for item in state.items.values() {
            update(None, Some(item));
        }
        state.index_updates.push(update);
        drop(state);

        Index {
            inner: self.inner.clone(),
            map,
        }
    }

    /// Registers a listener invoked once per recomputation batch.
    pub fn register_batch<F>(&self, f: F)
    where
        F: Fn(&[Event<T>]) + Send + Sync + 'static,
    {
        self.inner.listeners.write().push(Arc::new(f));
    }

    /// Registers a batched listener behind a trigger extractor: updates whose
    /// projections are equal are dropped before delivery, so bookkeeping-only
    /// changes stay silent.
    pub fn register_batch_filtered<P, E, F>(&self, extract: E, f: F)
    where
        P: PartialEq,
        E: Fn(&T) -> P + Send + Sync + 'static,
        F: Fn(&[Event<T>]) + Send + Sync + 'static,
    {
        self.register_batch(move |events| {
            let filtered = events
                .iter()
                .filter(|ev| match ev {
                    Event::Update { new, old } => extract(new) != extract(old),
                    Event::Add(_) | Event::Delete(_) => true,
                })
                .cloned()
                .collect::<Vec<_>>();
            f(&filtered);
        });
    }

    /// Adds an upstream dependency to this collection's readiness.
    pub fn add_parent(&self, parent: Arc<dyn Ready>) {
        self.inner.parents.write().push(parent);
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }
}

impl<T: Keyed> Ready for Collection<T> {
    fn has_synced(&self) -> bool {
        self.inner.synced.load(Ordering::Acquire)
            && self.inner.parents.read().iter().all(|p| p.has_synced())
    }
}

// === impl Writer ===

impl<T: Keyed> Writer<T> {
    pub fn apply(&self, item: T) {
        self.update(vec![Change::Apply(item)]);
    }

    pub fn delete(&self, key: impl ToString) {
        self.update(vec![Change::Delete(key.to_string())]);
    }

    /// Applies a batch of changes atomically and delivers one batched event
    /// to every listener. Changes that leave an entity identical are
    /// suppressed entirely: re-delivering an identical source record is a
    /// no-op.
    pub fn update(&self, changes: Vec<Change<T>>) {
        let mut events = Vec::with_capacity(changes.len());
        {
            let mut state = self.inner.state.write();
            for change in changes {
                let event = match change {
                    Change::Apply(new) => match state.items.get(&new.key()) {
                        Some(old) if *old == new => continue,
                        Some(old) => Event::Update {
                            old: old.clone(),
                            new,
                        },
                        None => Event::Add(new),
                    },
                    Change::Delete(key) => match state.items.remove(&key) {
                        Some(old) => {
                            for update in &state.index_updates {
                                update(Some(&old), None);
                            }
                            events.push(Event::Delete(old));
                            continue;
                        }
                        None => continue,
                    },
                };

                let (old, new) = match &event {
                    Event::Add(new) => (None, new.clone()),
                    Event::Update { new, old } => (Some(old.clone()), new.clone()),
                    Event::Delete(_) => unreachable!("deletes are handled above"),
                };
                for update in &state.index_updates {
                    update(old.as_ref(), Some(&new));
                }
                state.items.insert(new.key(), new);
                events.push(event);
            }
        }

        if events.is_empty() {
            return;
        }
        tracing::trace!(
            collection = self.inner.name,
            events = events.len(),
            "batch applied"
        );
        let listeners = self.inner.listeners.read().clone();
        for listener in listeners {
            listener(&events);
        }
    }

    /// Marks the collection's own initial sync complete. Monotonic.
    pub fn mark_synced(&self) {
        self.inner.synced.store(true, Ordering::Release);
    }

    pub(crate) fn keys(&self) -> Vec<String> {
        self.inner.state.read().items.keys().cloned().collect()
    }
}

// === Index ===

/// A secondary index over a collection: key → entities. Lookups are snapshot
/// consistent with the owning collection (same lock order as the writer).
pub struct Index<K, T> {
    inner: Arc<Inner<T>>,
    map: Arc<RwLock<HashMap<K, BTreeSet<String>>>>,
}

impl<K, T> Clone for Index<K, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            map: self.map.clone(),
        }
    }
}

impl<K: Hash + Eq, T: Keyed> Index<K, T> {
    /// Entities currently associated with `key`, in collection enumeration
    /// order. Absent keys yield an empty list, never an error.
    pub fn lookup(&self, key: &K) -> Vec<T> {
        let state = self.inner.state.read();
        let map = self.map.read();
        match map.get(key) {
            Some(keys) => keys
                .iter()
                .filter_map(|k| state.items.get(k).cloned())
                .collect(),
            None => Vec::new(),
        }
    }
}

// === RecomputeTrigger ===

/// A broadcast signal for recomputation that is not driven by any source
/// event (e.g. network-topology convergence). Distinct from source events but
/// consumed identically by the collections registered on it.
pub struct RecomputeTrigger {
    synced: AtomicBool,
    subscribers: RwLock<Vec<Arc<dyn Fn() + Send + Sync>>>,
}

impl RecomputeTrigger {
    pub fn new(synced: bool) -> Arc<Self> {
        Arc::new(Self {
            synced: AtomicBool::new(synced),
            subscribers: RwLock::new(Vec::new()),
        })
    }

    pub fn register<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribers.write().push(Arc::new(f));
    }

    /// Re-evaluates every registered collection without waiting for a source
    /// event.
    pub fn trigger_recomputation(&self) {
        let subs = self.subscribers.read().clone();
        for f in subs {
            f();
        }
    }

    /// Lets the external convergence signal contribute to readiness.
    pub fn mark_synced(&self) {
        self.synced.store(true, Ordering::Release);
    }
}

impl Ready for RecomputeTrigger {
    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }
}

// === derivation glue ===

/// Wires a derived collection to one upstream: on each upstream batch, the
/// affected output ids are recomputed (and only those), inserting, replacing,
/// or removing entities as the transform returns `Some`/`None`.
pub fn register_derived<U, T, A, C>(upstream: &Collection<U>, writer: Writer<T>, affected: A, compute: C)
where
    U: Keyed,
    T: Keyed,
    A: Fn(&Event<U>) -> Vec<String> + Send + Sync + 'static,
    C: Fn(&str) -> Option<T> + Send + Sync + 'static,
{
    upstream.register_batch(move |events| {
        let ids = events
            .iter()
            .flat_map(&affected)
            .collect::<BTreeSet<String>>();
        let changes = ids
            .into_iter()
            .map(|id| match compute(&id) {
                Some(item) => Change::Apply(item),
                None => Change::Delete(id),
            })
            .collect::<Vec<_>>();
        writer.update(changes);
    });
}

/// Wires a derived collection to a recompute trigger: firing the trigger
/// re-evaluates the transform for every id currently in the output.
pub fn register_trigger<T, C>(trigger: &RecomputeTrigger, writer: Writer<T>, compute: C)
where
    T: Keyed,
    C: Fn(&str) -> Option<T> + Send + Sync + 'static,
{
    trigger.register(move || {
        let changes = writer
            .keys()
            .into_iter()
            .map(|id| match compute(&id) {
                Some(item) => Change::Apply(item),
                None => Change::Delete(id),
            })
            .collect::<Vec<_>>();
        writer.update(changes);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Clone, Debug, PartialEq)]
    struct Item {
        id: String,
        group: String,
        revision: u64,
    }

    impl Keyed for Item {
        fn key(&self) -> String {
            self.id.clone()
        }
    }

    fn item(id: &str, group: &str, revision: u64) -> Item {
        Item {
            id: id.to_string(),
            group: group.to_string(),
            revision,
        }
    }

    #[test]
    fn index_tracks_rekeying() {
        let (tx, col) = collection::<Item>("items", false);
        let by_group = col.index(|i: &Item| vec![i.group.clone()]);

        tx.apply(item("a", "g1", 1));
        tx.apply(item("b", "g1", 1));
        assert_eq!(by_group.lookup(&"g1".to_string()).len(), 2);

        // Re-keying removes the stale association and installs the new one in
        // one step.
        tx.apply(item("a", "g2", 2));
        assert_eq!(by_group.lookup(&"g1".to_string()).len(), 1);
        assert_eq!(by_group.lookup(&"g2".to_string()).len(), 1);

        tx.delete("a");
        assert!(by_group.lookup(&"g2".to_string()).is_empty());
    }

    #[test]
    fn index_seeds_from_existing_items() {
        let (tx, col) = collection::<Item>("items", false);
        tx.apply(item("a", "g1", 1));
        let by_group = col.index(|i: &Item| vec![i.group.clone()]);
        assert_eq!(by_group.lookup(&"g1".to_string()).len(), 1);
    }

    #[test]
    fn identical_apply_is_suppressed() {
        let (tx, col) = collection::<Item>("items", false);
        let batches = Arc::new(Mutex::new(0usize));
        let seen = batches.clone();
        col.register_batch(move |_| *seen.lock() += 1);

        tx.apply(item("a", "g1", 1));
        tx.apply(item("a", "g1", 1));
        assert_eq!(*batches.lock(), 1);

        tx.apply(item("a", "g1", 2));
        assert_eq!(*batches.lock(), 2);
    }

    #[test]
    fn filtered_listener_drops_invisible_updates() {
        let (tx, col) = collection::<Item>("items", false);
        let delivered = Arc::new(Mutex::new(Vec::<usize>::new()));
        let log = delivered.clone();
        // Only the group is externally visible; revision churn is
        // bookkeeping.
        col.register_batch_filtered(
            |i: &Item| i.group.clone(),
            move |events| log.lock().push(events.len()),
        );

        tx.apply(item("a", "g1", 1));
        tx.apply(item("a", "g1", 2));
        tx.apply(item("a", "g2", 3));
        assert_eq!(*delivered.lock(), vec![1, 0, 1]);
    }

    #[test]
    fn derived_collection_recomputes_per_id() {
        let (src_tx, src) = collection::<Item>("src", false);
        let (out_tx, out) = collection::<Item>("out", true);
        out.add_parent(Arc::new(src.clone()));

        let upstream = src.clone();
        register_derived(
            &src,
            out_tx,
            |ev: &Event<Item>| vec![ev.item().id.clone()],
            move |id| {
                // Transform drops items in group "hidden".
                upstream.get(id).filter(|i| i.group != "hidden")
            },
        );

        src_tx.apply(item("a", "g1", 1));
        assert_eq!(out.get("a"), Some(item("a", "g1", 1)));

        src_tx.apply(item("a", "hidden", 2));
        assert_eq!(out.get("a"), None);

        src_tx.apply(item("a", "g1", 3));
        src_tx.delete("a");
        assert_eq!(out.get("a"), None);
        assert!(out.is_empty());
    }

    #[test]
    fn trigger_recomputes_existing_ids() {
        let (src_tx, src) = collection::<Item>("src", false);
        let (out_tx, out) = collection::<Item>("out", true);
        let trigger = RecomputeTrigger::new(false);

        let upstream = src.clone();
        register_derived(
            &src,
            out_tx.clone(),
            |ev: &Event<Item>| vec![ev.item().id.clone()],
            move |id| upstream.get(id),
        );
        let upstream = src.clone();
        let revision = Arc::new(Mutex::new(0u64));
        let rev = revision.clone();
        register_trigger(&trigger, out_tx, move |id| {
            upstream.get(id).map(|mut i| {
                i.revision = *rev.lock();
                i
            })
        });

        src_tx.apply(item("a", "g1", 1));
        *revision.lock() = 9;
        trigger.trigger_recomputation();
        assert_eq!(out.get("a"), Some(item("a", "g1", 9)));
    }

    #[test]
    fn readiness_is_monotonic_over_parents() {
        let (src_tx, src) = collection::<Item>("src", false);
        let (_, out) = collection::<Item>("out", true);
        let trigger = RecomputeTrigger::new(false);
        out.add_parent(Arc::new(src.clone()));
        out.add_parent(trigger.clone());

        assert!(!out.has_synced());
        src_tx.mark_synced();
        assert!(!out.has_synced());
        trigger.mark_synced();
        assert!(out.has_synced());
    }
}
