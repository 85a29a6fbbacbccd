//! Computed Cells
//!
//! A computed cell is a cached derived value. Its getter runs inside a
//! private effect, so every observed read the getter performs becomes an
//! upstream edge of the cell. When any upstream edge fires, the cell
//! does not recompute: it flips a dirty flag and notifies its own
//! subscribers through its whole-cell edge. The next read recomputes and
//! caches; reads while clean return the cache without running the
//! getter.
//!
//! # Invalidation coalescing
//!
//! Only the first upstream change after a clean read notifies
//! downstream. Further changes arriving while the cell is already dirty
//! are absorbed, so a burst of upstream writes costs subscribers one
//! notification and the getter at most one run per read.
//!
//! # Ordering
//!
//! The dependency store notifies computed cells ahead of plain effects
//! within one fan-out pass, so an effect reading a cell whose source
//! just changed always observes the dirty flag already set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::effect::{Effect, EffectOptions, SchedulerFn};
use crate::error::dev_warn;
use crate::store::{track, trigger, DepKey, TriggerOp};
use crate::value::TargetId;

type Setter<T> = Box<dyn Fn(T) + Send + Sync>;

struct ComputedInner<T> {
    /// Private computed-marked effect running the getter.
    effect: Effect,
    value: RwLock<Option<T>>,
    /// Set on upstream invalidation, cleared by a recomputing read.
    dirty: AtomicBool,
    setter: Option<Setter<T>>,
}

/// A lazily evaluated, cached derived value.
///
/// Clones share state: the cache, the dirty flag, and the upstream
/// subscription are common to all handles.
pub struct Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<ComputedInner<T>>,
}

impl<T> Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a read-only computed cell.
    ///
    /// The getter does not run until the first read.
    pub fn new<F>(getter: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::build(getter, None)
    }

    /// Create a writable computed cell.
    ///
    /// Writes are forwarded to `setter` verbatim; whatever observed
    /// state the setter mutates propagates back through tracking as
    /// usual.
    pub fn writable<F, S>(getter: F, setter: S) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        S: Fn(T) + Send + Sync + 'static,
    {
        Self::build(getter, Some(Box::new(setter) as Setter<T>))
    }

    fn build<F>(getter: F, setter: Option<Setter<T>>) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let getter = Arc::new(getter);
        let inner = Arc::new_cyclic(|weak: &Weak<ComputedInner<T>>| {
            let target = TargetId::from_addr(weak.as_ptr() as *const () as usize);

            // The body stores through a weak handle: the effect must not
            // keep the cell alive once every public handle is gone.
            let body_cell = weak.clone();
            let body = move || {
                if let Some(cell) = body_cell.upgrade() {
                    let value = getter();
                    *cell.value.write() = Some(value);
                }
            };

            // Upstream invalidation: flip dirty, and only the first flip
            // since the last clean read reaches our subscribers.
            let sched_cell = weak.clone();
            let scheduler: SchedulerFn = Arc::new(move || {
                if let Some(cell) = sched_cell.upgrade() {
                    if !cell.dirty.swap(true, Ordering::SeqCst) {
                        trigger(target, DepKey::Value, TriggerOp::Set);
                    }
                }
            });

            let effect = Effect::with_flags(
                body,
                EffectOptions {
                    lazy: true,
                    scheduler: Some(scheduler),
                    ..Default::default()
                },
                true,
            );

            ComputedInner {
                effect,
                value: RwLock::new(None),
                dirty: AtomicBool::new(true),
                setter,
            }
        });

        Self { inner }
    }

    /// The cell's trackable identity.
    pub fn id(&self) -> TargetId {
        TargetId::from_addr(Arc::as_ptr(&self.inner) as *const () as usize)
    }

    /// Read the value, recomputing first if an upstream change
    /// invalidated the cache.
    ///
    /// Inside an observer, the read subscribes the observer to this
    /// cell.
    pub fn get(&self) -> T {
        track(self.id(), DepKey::Value);

        if self.inner.dirty.load(Ordering::SeqCst) {
            self.inner.effect.run();
            self.inner.dirty.store(false, Ordering::SeqCst);
        }

        self.inner
            .value
            .read()
            .clone()
            .expect("computed cell read before its getter stored a value")
    }

    /// Write through the cell's setter.
    ///
    /// On a cell created without a setter this is a no-op (with a
    /// dev-mode warning).
    pub fn set(&self, value: T) {
        match &self.inner.setter {
            Some(setter) => setter(value),
            None => dev_warn!("write to a computed cell without a setter was ignored"),
        }
    }

    /// Whether the next read will recompute.
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::SeqCst)
    }

    /// Whether the getter has produced a value yet.
    pub fn has_value(&self) -> bool {
        self.inner.value.read().is_some()
    }

    /// Unsubscribe from every upstream edge.
    ///
    /// A stopped cell still recomputes on dirty reads, but no longer
    /// hears about upstream changes.
    pub fn stop(&self) {
        self.inner.effect.stop();
    }
}

impl<T> Clone for Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.id().raw())
            .field("dirty", &self.is_dirty())
            .field("has_value", &self.has_value())
            .finish()
    }
}

/// Create a read-only computed cell.
pub fn computed<T, F>(getter: F) -> Computed<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    Computed::new(getter)
}
