//! Signals
//!
//! A signal is the smallest observable unit: a single typed value with
//! no inner structure. Reads track the whole-cell edge; writes that
//! actually change the value trigger it. Everything else (who is
//! subscribed, how notifications run) lives in the dependency store and
//! the effect layer.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::store::{subscriber_count, track, trigger, DepKey, TriggerOp};
use crate::value::TargetId;

struct SignalInner<T> {
    value: RwLock<T>,
}

/// A single observable value.
///
/// Clones share storage: a write through any handle is seen by all.
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<SignalInner<T>>,
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a signal holding `value`.
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(SignalInner {
                value: RwLock::new(value),
            }),
        }
    }

    /// The signal's trackable identity.
    pub fn id(&self) -> TargetId {
        TargetId::from_addr(Arc::as_ptr(&self.inner) as *const () as usize)
    }

    /// Read the current value.
    ///
    /// Inside an observer, the read subscribes the observer to this
    /// signal.
    pub fn get(&self) -> T {
        track(self.id(), DepKey::Value);
        self.inner.value.read().clone()
    }

    /// Read the current value without registering a dependency.
    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Store a new value, notifying subscribers.
    ///
    /// Storing a value equal to the current one is a no-op and triggers
    /// nothing.
    pub fn set(&self, value: T) {
        let changed = {
            let mut current = self.inner.value.write();
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        };
        // The lock is released before fan-out so notified observers can
        // read the signal again.
        if changed {
            trigger(self.id(), DepKey::Value, TriggerOp::Set);
        }
    }

    /// Derive a new value from the current one and store it.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let next = {
            let current = self.inner.value.read();
            f(&current)
        };
        self.set(next);
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Signal<T>
where
    T: Clone + Send + Sync + std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("value", &*self.inner.value.read())
            .field("subscribers", &subscriber_count(self.id(), &DepKey::Value))
            .finish()
    }
}

/// Create a signal holding `value`.
pub fn signal<T>(value: T) -> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    Signal::new(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::context::untrack;
    use crate::reactive::effect::effect;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn get_and_set_round_trip() {
        let count = Signal::new(0i64);
        assert_eq!(count.get(), 0);

        count.set(5);
        assert_eq!(count.get(), 5);

        count.update(|n| n + 1);
        assert_eq!(count.get(), 6);
    }

    #[test]
    fn effect_reruns_on_change() {
        let count = Signal::new(0i64);
        let runs = Arc::new(AtomicI32::new(0));

        let count_clone = count.clone();
        let runs_clone = runs.clone();
        let _effect = effect(move || {
            count_clone.get();
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        count.set(1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn equal_write_triggers_nothing() {
        let count = Signal::new(3i64);
        let runs = Arc::new(AtomicI32::new(0));

        let count_clone = count.clone();
        let runs_clone = runs.clone();
        let _effect = effect(move || {
            count_clone.get();
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        count.set(3);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn untracked_reads_subscribe_nothing() {
        let count = Signal::new(0i64);
        let runs = Arc::new(AtomicI32::new(0));

        let count_clone = count.clone();
        let runs_clone = runs.clone();
        let _effect = effect(move || {
            untrack(|| count_clone.get());
            count_clone.get_untracked();
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        count.set(9);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clones_share_storage() {
        let a = Signal::new(String::from("x"));
        let b = a.clone();

        b.set(String::from("y"));
        assert_eq!(a.get(), "y");
        assert_eq!(a.id(), b.id());
    }
}
