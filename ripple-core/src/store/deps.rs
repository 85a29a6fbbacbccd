//! Dependency Store
//!
//! The store is the leaf data structure of the engine: a map from
//! `(target, key)` to the set of observers subscribed to that location.
//! [`track`] adds the current observer to an edge during a read;
//! [`trigger`] resolves and notifies an edge's observers after a write.
//!
//! Observers are held by identity, not by reference: the store maps each
//! edge to `ObserverId`s and a separate registry maps identities to weak
//! effect handles. Effects in turn remember the list of edges they sit
//! in. This index-based representation keeps the observer/subject graph
//! acyclic in ownership terms: stopping an effect walks its own edge
//! list instead of relying on cycle collection.
//!
//! # Re-entrancy
//!
//! Notifying an observer may synchronously run user code that reads or
//! writes other observed state, re-entering [`track`] and [`trigger`].
//! Every lock here is therefore released before any user code runs, and
//! fan-out iterates over a snapshot of the subscriber set, never the
//! live set.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use indexmap::IndexMap;
use parking_lot::RwLock;
use smallvec::SmallVec;
use tracing::trace;

use super::key::{DepKey, TriggerOp};
use crate::reactive::context;
use crate::reactive::effect::EffectInner;
use crate::reactive::observer::ObserverId;
use crate::value::TargetId;

/// A dependency edge: the location an effect is registered against.
pub(crate) type Edge = (TargetId, DepKey);

/// One edge's subscribers, each stamped with the epoch of the run that
/// last revisited it. Stale stamps are how re-runs discover edges that
/// the latest execution no longer reads.
#[derive(Default)]
struct Dep {
    observers: IndexMap<ObserverId, u64>,
}

type KeyMap = IndexMap<DepKey, Dep>;

static STORE: OnceLock<RwLock<HashMap<TargetId, KeyMap>>> = OnceLock::new();
static REGISTRY: OnceLock<RwLock<HashMap<ObserverId, Weak<EffectInner>>>> = OnceLock::new();

fn store() -> &'static RwLock<HashMap<TargetId, KeyMap>> {
    STORE.get_or_init(|| RwLock::new(HashMap::new()))
}

fn registry() -> &'static RwLock<HashMap<ObserverId, Weak<EffectInner>>> {
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register an observer so triggers can resolve its identity.
pub(crate) fn register_observer(id: ObserverId, effect: Weak<EffectInner>) {
    registry().write().insert(id, effect);
}

/// Remove an observer from the registry.
pub(crate) fn unregister_observer(id: ObserverId) {
    registry().write().remove(&id);
}

fn resolve_observer(id: ObserverId) -> Option<Arc<EffectInner>> {
    registry().read().get(&id).and_then(Weak::upgrade)
}

/// Register the current observer against `(target, key)`.
///
/// No-op outside an observer, inside `untrack`, or when the current
/// observer has been stopped.
pub fn track(target: TargetId, key: DepKey) {
    let Some(weak) = context::current_effect() else {
        return;
    };
    let Some(effect) = weak.upgrade() else {
        return;
    };
    if !effect.is_active() {
        return;
    }

    let epoch = effect.epoch();
    let newly_added = {
        let mut store = store().write();
        let dep = store
            .entry(target)
            .or_default()
            .entry(key.clone())
            .or_insert_with(Dep::default);
        dep.observers.insert(effect.id(), epoch).is_none()
    };

    if newly_added {
        trace!(target_id = target.raw(), key = %key, observer = effect.id().raw(), "track");
        effect.record_edge(target, key);
    }
}

/// Notify every observer affected by a write to `(target, key)`.
///
/// The operation kind expands the fan-out: `Add` and `Delete` merge in
/// the iteration and length edges, `Clear` covers every edge of the
/// target. All matched edges are merged into one deduplicated set, so an
/// observer sitting on both the exact key and a synthetic key is
/// notified once. Computed-marked observers are notified before plain
/// ones, so a plain effect reading a computed sees its refreshed dirty
/// state within the same fan-out pass.
pub fn trigger(target: TargetId, key: DepKey, op: TriggerOp) {
    let mut keys: SmallVec<[DepKey; 3]> = SmallVec::new();
    keys.push(key);
    if matches!(op, TriggerOp::Add | TriggerOp::Delete) {
        keys.push(DepKey::Iterate);
        keys.push(DepKey::Length);
    }

    // Snapshot the subscriber identities, then release the store before
    // touching any observer.
    let ids: SmallVec<[ObserverId; 8]> = {
        let store = store().read();
        let Some(key_map) = store.get(&target) else {
            return;
        };
        let mut ids: SmallVec<[ObserverId; 8]> = SmallVec::new();
        let mut push_dep = |dep: &Dep| {
            for id in dep.observers.keys() {
                if !ids.contains(id) {
                    ids.push(*id);
                }
            }
        };
        if matches!(op, TriggerOp::Clear) {
            for dep in key_map.values() {
                push_dep(dep);
            }
        } else {
            for key in &keys {
                if let Some(dep) = key_map.get(key) {
                    push_dep(dep);
                }
            }
        }
        ids
    };

    if ids.is_empty() {
        return;
    }

    let mut observers: SmallVec<[Arc<EffectInner>; 8]> = ids
        .into_iter()
        .filter_map(resolve_observer)
        .collect();

    // Computed cells refresh their dirty state ahead of plain effects;
    // within each group, creation order.
    observers.sort_by_key(|o| (!o.is_computed(), o.id()));

    trace!(target_id = target.raw(), ?op, observers = observers.len(), "trigger");

    for observer in observers {
        if !observer.is_active() {
            continue;
        }
        // An observer mutating its own dependency is not re-entered
        // within the same synchronous turn unless it opted in.
        if observer.is_running() && !observer.allows_recurse() {
            continue;
        }
        observer.notify();
    }
}

/// Drop every edge stamp older than `epoch`, returning the edges the
/// latest run revisited. Called by an effect after each run.
pub(crate) fn sweep_stale_edges(
    id: ObserverId,
    epoch: u64,
    edges: SmallVec<[Edge; 4]>,
) -> SmallVec<[Edge; 4]> {
    let mut store = store().write();
    let mut retained: SmallVec<[Edge; 4]> = SmallVec::new();

    for (target, key) in edges {
        let Some(key_map) = store.get_mut(&target) else {
            continue;
        };
        let mut keep = false;
        if let Some(dep) = key_map.get_mut(&key) {
            match dep.observers.get(&id) {
                Some(stamp) if *stamp == epoch => keep = true,
                Some(_) => {
                    dep.observers.swap_remove(&id);
                }
                None => {}
            }
            if dep.observers.is_empty() {
                key_map.swap_remove(&key);
            }
        }
        if key_map.is_empty() {
            store.remove(&target);
        }
        if keep {
            retained.push((target, key));
        }
    }

    retained
}

/// Remove an observer from every edge in its handle list.
pub(crate) fn drop_edges(id: ObserverId, edges: &[Edge]) {
    let mut store = store().write();
    for (target, key) in edges {
        if let Some(key_map) = store.get_mut(target) {
            if let Some(dep) = key_map.get_mut(key) {
                dep.observers.swap_remove(&id);
                if dep.observers.is_empty() {
                    key_map.swap_remove(key);
                }
            }
            if key_map.is_empty() {
                store.remove(target);
            }
        }
    }
}

/// The number of observers currently registered on `(target, key)`.
///
/// Diagnostic accessor; not part of the tracking fast path.
pub fn subscriber_count(target: TargetId, key: &DepKey) -> usize {
    store()
        .read()
        .get(&target)
        .and_then(|key_map| key_map.get(key))
        .map(|dep| dep.observers.len())
        .unwrap_or(0)
}
