//! Observed Containers
//!
//! [`Observed`] is the interception layer: a handle over a shared
//! container whose accessors mirror plain container operations while
//! driving the dependency store. Reads call `track` with the key they
//! touched (including misses, so a later addition of that key
//! notifies). Writes that pass the same-value gate call `trigger` with
//! the operation kind, which decides whether the iteration and length
//! edges join the fan-out.
//!
//! A wrapper never copies its target: it holds the same shared storage
//! the raw value does, so raw reads and observed reads see one
//! container.
//!
//! # Read-only and shallow views
//!
//! A read-only wrapper rejects every write with a dev-mode warning and
//! tracks nothing on reads, except when it is a view over a mutable
//! wrapper: then reads still track, because the underlying mutable side
//! can change. A shallow wrapper returns nested containers raw instead
//! of lazily wrapping them on read.

use std::fmt;
use std::sync::{Arc, Weak};

use tracing::trace;

use super::wrap::{self, ObserveOptions};
use crate::error::dev_warn;
use crate::store::{track, trigger, DepKey, TriggerOp};
use crate::value::{same_value, TargetId, Value};

pub(crate) struct ObservedInner {
    /// The wrapped value: a raw container, or a mutable wrapper when
    /// this is a read-only view over one.
    target: Value,
    readonly: bool,
    shallow: bool,
}

/// A handle to an observed container.
///
/// Clones share the wrapper: identity, flags, and target are common.
#[derive(Clone)]
pub struct Observed {
    inner: Arc<ObservedInner>,
}

impl Observed {
    pub(crate) fn from_parts(target: Value, readonly: bool, shallow: bool) -> Self {
        Self {
            inner: Arc::new(ObservedInner {
                target,
                readonly,
                shallow,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ObservedInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade_inner(&self) -> Weak<ObservedInner> {
        Arc::downgrade(&self.inner)
    }

    /// The wrapper's own identity, distinct from its target's.
    pub(crate) fn registry_addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    /// Whether writes through this wrapper are rejected.
    pub fn is_readonly(&self) -> bool {
        self.inner.readonly
    }

    /// Whether nested containers are returned raw on read.
    pub fn is_shallow(&self) -> bool {
        self.inner.shallow
    }

    /// Whether two handles are the same wrapper.
    pub fn ptr_eq(&self, other: &Observed) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The fully unwrapped raw container.
    pub fn raw(&self) -> Value {
        match &self.inner.target {
            Value::Observed(obs) => obs.raw(),
            other => other.clone(),
        }
    }

    fn target_id(&self) -> TargetId {
        self.raw()
            .target_id()
            .expect("observed wrapper over a non-container")
    }

    /// Read-only views track nothing, unless the view sits over a
    /// mutable wrapper whose underlying state can still change.
    fn tracks_reads(&self) -> bool {
        if !self.inner.readonly {
            return true;
        }
        matches!(&self.inner.target, Value::Observed(obs) if !obs.is_readonly())
    }

    /// Lazily extend observation to a nested container read.
    ///
    /// A read-only view over a mutable wrapper keeps that layering one
    /// level down: the child is wrapped mutable first and then viewed
    /// read-only, so nested reads still track through the mutable side.
    fn wrap_child(&self, value: Value) -> Value {
        if self.inner.shallow || !value.is_container() {
            return value;
        }
        let child = if self.inner.readonly && self.tracks_reads() {
            wrap::observe(value)
        } else {
            value
        };
        wrap::wrap(
            child,
            ObserveOptions {
                readonly: self.inner.readonly,
                shallow: false,
            },
        )
    }

    /// Normalize an incoming value before storing it. Deep wrappers
    /// store raw so the container never nests observation state.
    fn store_value(&self, value: Value) -> Value {
        if self.inner.shallow {
            value
        } else {
            wrap::to_raw(value)
        }
    }

    /// Read the value at `key`.
    ///
    /// A miss still tracks the key, so adding it later notifies.
    pub fn get(&self, key: impl Into<DepKey>) -> Option<Value> {
        let key = key.into();
        let raw = self.raw();
        if self.tracks_reads() {
            track(self.target_id(), key.clone());
        }

        let found = match (&raw, &key) {
            (Value::Map(map), DepKey::Entry(name)) => map.read().get(name.as_str()).cloned(),
            (Value::List(list), DepKey::Index(index)) => list.read().get(*index).cloned(),
            _ => {
                dev_warn!(key = %key, "key does not address this container");
                None
            }
        };

        found.map(|value| self.wrap_child(value))
    }

    /// Write `value` at `key`, notifying subscribers.
    ///
    /// Same-value writes are silent no-ops. Writing a list index past
    /// the end fills the gap with nulls; each filled index is announced
    /// as an addition, since its reads change from misses to nulls.
    pub fn set(&self, key: impl Into<DepKey>, value: impl Into<Value>) {
        let key = key.into();
        if self.inner.readonly {
            dev_warn!(key = %key, "write through a read-only wrapper was ignored");
            return;
        }

        let value = self.store_value(value.into());
        let raw = self.raw();
        let target = self.target_id();

        let op = match (&raw, &key) {
            (Value::Map(map), DepKey::Entry(name)) => {
                let mut entries = map.write();
                let unchanged = entries.get(name.as_str()).map(|old| same_value(old, &value));
                match unchanged {
                    Some(true) => None,
                    Some(false) => {
                        entries.insert(name.clone(), value);
                        Some(TriggerOp::Set)
                    }
                    None => {
                        entries.insert(name.clone(), value);
                        Some(TriggerOp::Add)
                    }
                }
            }
            (Value::List(list), DepKey::Index(index)) => {
                let mut items = list.write();
                if *index < items.len() {
                    if same_value(&items[*index], &value) {
                        None
                    } else {
                        items[*index] = value;
                        Some(TriggerOp::Set)
                    }
                } else {
                    let gap_start = items.len();
                    while items.len() < *index {
                        items.push(Value::Null);
                    }
                    items.push(value);
                    drop(items);
                    for gap in gap_start..*index {
                        trigger(target, DepKey::Index(gap), TriggerOp::Add);
                    }
                    Some(TriggerOp::Add)
                }
            }
            _ => {
                dev_warn!(key = %key, "key does not address this container");
                None
            }
        };

        if let Some(op) = op {
            trace!(target_id = target.raw(), key = %key, ?op, "write");
            trigger(target, key, op);
        }
    }

    /// Alias of [`set`](Self::set), reading naturally at call sites
    /// that add entries.
    pub fn insert(&self, key: impl Into<DepKey>, value: impl Into<Value>) {
        self.set(key, value);
    }

    /// Whether `key` is present, tracking it either way.
    pub fn has(&self, key: impl Into<DepKey>) -> bool {
        let key = key.into();
        let raw = self.raw();
        if self.tracks_reads() {
            track(self.target_id(), key.clone());
        }

        match (&raw, &key) {
            (Value::Map(map), DepKey::Entry(name)) => map.read().contains_key(name.as_str()),
            (Value::List(list), DepKey::Index(index)) => *index < list.read().len(),
            _ => false,
        }
    }

    /// The number of entries, tracked through the size-sensitive edge.
    pub fn len(&self) -> usize {
        let raw = self.raw();
        match &raw {
            Value::List(list) => {
                if self.tracks_reads() {
                    track(self.target_id(), DepKey::Length);
                }
                list.read().len()
            }
            Value::Map(map) => {
                if self.tracks_reads() {
                    track(self.target_id(), DepKey::Iterate);
                }
                map.read().len()
            }
            _ => unreachable!("observed wrapper over a non-container"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every key currently present, in insertion order. Subscribes the
    /// observer to the iteration edge, so additions and removals
    /// re-notify.
    pub fn keys(&self) -> Vec<DepKey> {
        let raw = self.raw();
        match &raw {
            Value::Map(map) => {
                if self.tracks_reads() {
                    track(self.target_id(), DepKey::Iterate);
                }
                map.read()
                    .keys()
                    .map(|name| DepKey::Entry(name.clone()))
                    .collect()
            }
            Value::List(list) => {
                if self.tracks_reads() {
                    track(self.target_id(), DepKey::Length);
                }
                (0..list.read().len()).map(DepKey::Index).collect()
            }
            _ => unreachable!("observed wrapper over a non-container"),
        }
    }

    /// Append to a list.
    pub fn push(&self, value: impl Into<Value>) {
        if self.inner.readonly {
            dev_warn!("write through a read-only wrapper was ignored");
            return;
        }
        let raw = self.raw();
        let Value::List(list) = &raw else {
            dev_warn!("push on a non-list container");
            return;
        };

        let value = self.store_value(value.into());
        let index = {
            let mut items = list.write();
            items.push(value);
            items.len() - 1
        };
        trigger(self.target_id(), DepKey::Index(index), TriggerOp::Add);
    }

    /// Remove and return the last list element.
    pub fn pop(&self) -> Option<Value> {
        if self.inner.readonly {
            dev_warn!("write through a read-only wrapper was ignored");
            return None;
        }
        let raw = self.raw();
        let Value::List(list) = &raw else {
            dev_warn!("pop on a non-list container");
            return None;
        };

        let (removed, index) = {
            let mut items = list.write();
            let removed = items.pop();
            (removed, items.len())
        };
        if removed.is_some() {
            trigger(self.target_id(), DepKey::Index(index), TriggerOp::Delete);
        }
        removed
    }

    /// Remove the value at `key`, returning it if it was present.
    pub fn remove(&self, key: impl Into<DepKey>) -> Option<Value> {
        let key = key.into();
        if self.inner.readonly {
            dev_warn!(key = %key, "write through a read-only wrapper was ignored");
            return None;
        }
        let raw = self.raw();
        let target = self.target_id();

        let removed = match (&raw, &key) {
            (Value::Map(map), DepKey::Entry(name)) => map.write().shift_remove(name.as_str()),
            (Value::List(list), DepKey::Index(index)) => {
                let mut items = list.write();
                if *index < items.len() {
                    Some(items.remove(*index))
                } else {
                    None
                }
            }
            _ => {
                dev_warn!(key = %key, "key does not address this container");
                None
            }
        };

        if removed.is_some() {
            trigger(target, key, TriggerOp::Delete);
        }
        removed
    }

    /// Remove every entry, notifying all edges of the target.
    pub fn clear(&self) {
        if self.inner.readonly {
            dev_warn!("write through a read-only wrapper was ignored");
            return;
        }
        let raw = self.raw();
        let emptied = match &raw {
            Value::Map(map) => {
                let mut entries = map.write();
                let had_entries = !entries.is_empty();
                entries.clear();
                had_entries
            }
            Value::List(list) => {
                let mut items = list.write();
                let had_items = !items.is_empty();
                items.clear();
                had_items
            }
            _ => unreachable!("observed wrapper over a non-container"),
        };
        if emptied {
            trigger(self.target_id(), DepKey::Iterate, TriggerOp::Clear);
        }
    }
}

impl fmt::Debug for Observed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observed")
            .field("target_id", &self.target_id().raw())
            .field("readonly", &self.inner.readonly)
            .field("shallow", &self.inner.shallow)
            .finish()
    }
}
