//! Wrapper Creation and Registries
//!
//! [`wrap`] is the single entry point that turns a container into an
//! observed value. Four registries, one per (readonly, shallow)
//! combination, map container identity to a weak wrapper handle:
//! wrapping the same container twice with the same options yields the
//! same wrapper, and the registries never keep a wrapper (or its
//! target) alive on their own.
//!
//! # Layering rules
//!
//! Re-wrapping a wrapper is idempotent with one exception: a read-only
//! view over a mutable wrapper creates a new layer, keyed by the
//! wrapper's own identity, so writes through the mutable side still
//! notify readers of the read-only side.

use std::collections::{HashMap, HashSet};
use std::sync::{OnceLock, Weak};

use parking_lot::RwLock;
use tracing::debug;

use super::container::{Observed, ObservedInner};
use crate::error::dev_warn;
use crate::value::Value;

/// Flags selecting a wrapper flavor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObserveOptions {
    /// Reject writes through this wrapper.
    pub readonly: bool,
    /// Return nested containers raw instead of wrapping them on read.
    pub shallow: bool,
}

type Registry = RwLock<HashMap<usize, Weak<ObservedInner>>>;

static REGISTRIES: OnceLock<[Registry; 4]> = OnceLock::new();
static EXCLUDED: OnceLock<RwLock<HashSet<usize>>> = OnceLock::new();

fn registry(options: ObserveOptions) -> &'static Registry {
    let registries =
        REGISTRIES.get_or_init(|| std::array::from_fn(|_| RwLock::new(HashMap::new())));
    let index = ((options.readonly as usize) << 1) | options.shallow as usize;
    &registries[index]
}

fn excluded() -> &'static RwLock<HashSet<usize>> {
    EXCLUDED.get_or_init(|| RwLock::new(HashSet::new()))
}

/// Registry key for a wrap target. Raw containers key by their storage
/// address; a wrapper being re-wrapped (read-only view) keys by its own
/// identity.
fn identity(value: &Value) -> Option<usize> {
    match value {
        Value::Observed(obs) => Some(obs.registry_addr()),
        _ => value.target_id().map(|target| target.raw()),
    }
}

/// Wrap a container for observation.
///
/// Non-containers are returned as-is with a dev-mode warning, as are
/// targets registered through [`mark_excluded`]. Wrapping is
/// per-options idempotent: the same container and options yield the
/// same wrapper for as long as any handle to it is alive.
pub fn wrap(value: Value, options: ObserveOptions) -> Value {
    if !value.is_container() {
        dev_warn!(value = ?value, "only containers can be observed; value returned as-is");
        return value;
    }

    if let Value::Observed(obs) = &value {
        // Idempotent, except for the read-only-over-mutable layering.
        if !(options.readonly && !obs.is_readonly()) {
            return value;
        }
    }

    let key = match identity(&value) {
        Some(key) => key,
        None => return value,
    };

    let mut registry = registry(options).write();
    if let Some(existing) = registry.get(&key).and_then(Weak::upgrade) {
        return Value::Observed(Observed::from_inner(existing));
    }

    if excluded().read().contains(&key) {
        return value;
    }

    // Dead entries accumulate as wrappers are dropped; prune on insert.
    registry.retain(|_, weak| weak.strong_count() > 0);

    let wrapper = Observed::from_parts(value, options.readonly, options.shallow);
    debug!(
        target_id = key,
        readonly = options.readonly,
        shallow = options.shallow,
        "wrapper created"
    );
    registry.insert(key, wrapper.downgrade_inner());
    Value::Observed(wrapper)
}

/// Wrap for deep mutable observation.
pub fn observe(value: Value) -> Value {
    wrap(value, ObserveOptions::default())
}

/// Wrap as a deep read-only view.
pub fn observe_readonly(value: Value) -> Value {
    wrap(
        value,
        ObserveOptions {
            readonly: true,
            shallow: false,
        },
    )
}

/// Wrap for mutable observation of the top level only.
pub fn observe_shallow(value: Value) -> Value {
    wrap(
        value,
        ObserveOptions {
            readonly: false,
            shallow: true,
        },
    )
}

/// Wrap as a read-only view of the top level only.
pub fn observe_shallow_readonly(value: Value) -> Value {
    wrap(
        value,
        ObserveOptions {
            readonly: true,
            shallow: true,
        },
    )
}

/// Whether the value is an observed wrapper.
pub fn is_observed(value: &Value) -> bool {
    matches!(value, Value::Observed(_))
}

/// Whether the value is a read-only wrapper.
pub fn is_readonly(value: &Value) -> bool {
    matches!(value, Value::Observed(obs) if obs.is_readonly())
}

/// Whether the value is a shallow wrapper.
pub fn is_shallow(value: &Value) -> bool {
    matches!(value, Value::Observed(obs) if obs.is_shallow())
}

/// Strip observation, returning the underlying raw value.
pub fn to_raw(value: Value) -> Value {
    match value {
        Value::Observed(obs) => obs.raw(),
        other => other,
    }
}

/// Permanently exclude a container from observation.
///
/// Subsequent [`wrap`] calls on it return it unwrapped. Wrappers that
/// already exist are unaffected.
pub fn mark_excluded(value: &Value) {
    match value.target_id() {
        Some(target) => {
            excluded().write().insert(target.raw());
        }
        None => dev_warn!("only containers can be excluded from observation"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_are_returned_untouched() {
        assert_eq!(observe(Value::Int(3)), Value::Int(3));
        assert_eq!(observe(Value::Null), Value::Null);
        assert!(!is_observed(&observe(Value::from("text"))));
    }

    #[test]
    fn wrapping_is_idempotent() {
        let raw = Value::map();

        let first = observe(raw.clone());
        let second = observe(first.clone());
        assert_eq!(first, second);

        // Same raw container, same wrapper.
        let third = observe(raw);
        assert_eq!(first, third);
    }

    #[test]
    fn flavors_get_distinct_wrappers() {
        let raw = Value::map();

        let mutable = observe(raw.clone());
        let readonly = observe_readonly(raw.clone());
        let shallow = observe_shallow(raw);

        assert_ne!(mutable, readonly);
        assert_ne!(mutable, shallow);
        assert!(is_readonly(&readonly));
        assert!(is_shallow(&shallow));

        // All three share the raw target identity.
        assert_eq!(mutable.target_id(), readonly.target_id());
        assert_eq!(mutable.target_id(), shallow.target_id());
    }

    #[test]
    fn readonly_view_layers_over_a_mutable_wrapper() {
        let raw = Value::map();
        let mutable = observe(raw.clone());

        let view = observe_readonly(mutable.clone());
        assert!(is_readonly(&view));
        assert_ne!(view, mutable);

        // The layering is itself idempotent.
        assert_eq!(observe_readonly(mutable), view);

        // And a read-only view of a read-only wrapper collapses.
        let plain_readonly = observe_readonly(raw);
        assert_eq!(observe_readonly(plain_readonly.clone()), plain_readonly);
    }

    #[test]
    fn to_raw_unwraps_any_layering() {
        let raw = Value::map();
        let view = observe_readonly(observe(raw.clone()));

        assert_eq!(to_raw(view), raw);
        assert_eq!(to_raw(raw.clone()), raw);
    }

    #[test]
    fn excluded_containers_stay_raw() {
        let raw = Value::map();
        mark_excluded(&raw);
        // Pin the allocation so the excluded address is never recycled
        // for another test's container.
        std::mem::forget(raw.clone());

        let wrapped = observe(raw.clone());
        assert!(!is_observed(&wrapped));
        assert_eq!(wrapped, raw);
    }

    #[test]
    fn dropped_wrappers_leave_the_registry() {
        let raw = Value::map();

        let first = observe(raw.clone());
        let first_obs = first.as_observed().cloned().unwrap();
        drop(first);

        // The handle above still keeps the wrapper alive.
        let again = observe(raw.clone())
            .as_observed()
            .cloned()
            .unwrap();
        assert!(first_obs.ptr_eq(&again));

        drop(first_obs);
        drop(again);

        // With every handle gone, wrapping still succeeds; the dead
        // registry entry is replaced rather than resurrected.
        assert!(is_observed(&observe(raw)));
    }
}
