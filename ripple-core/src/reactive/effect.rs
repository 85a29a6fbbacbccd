//! Effect Implementation
//!
//! An Effect is a re-runnable computation and the unit of subscription:
//! while it executes, it is installed as the implicit current observer,
//! and every observed read performed by its body registers an edge in
//! the dependency store. When any of those edges fire, the effect either
//! re-runs synchronously (the default) or hands control to its custom
//! scheduler.
//!
//! # Dynamic dependency re-collection
//!
//! Dependencies are re-bound on every run. Each run bumps the effect's
//! epoch; edges revisited during the run get stamped with the new epoch,
//! and when the run completes every edge still carrying an older stamp
//! is removed. A branch the latest execution did not take therefore
//! stops delivering updates immediately.
//!
//! # Recursion
//!
//! An effect that mutates its own dependency would otherwise re-enter
//! itself within the same synchronous turn. By default a running effect
//! is excluded from its own fan-out; `allow_recurse` opts back in (the
//! scheduler's re-entry ceiling then bounds the loop).
//!
//! # Stopping
//!
//! `stop()` removes the effect from every edge it is registered in,
//! deactivates it, and fires the `on_stop` callback exactly once. A
//! stopped effect receives no further automatic re-runs, but calling
//! `run()` manually still executes the body (without tracking). Dropping
//! the last handle performs the same cleanup.

use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;

use super::context::ContextGuard;
use super::observer::ObserverId;
use crate::store::deps::{self, Edge};
use crate::value::TargetId;

/// A shared closure usable as a custom scheduler.
pub type SchedulerFn = Arc<dyn Fn() + Send + Sync>;

/// Options accepted by [`Effect::new`].
#[derive(Default)]
pub struct EffectOptions {
    /// Do not run on creation; the first run is explicit.
    pub lazy: bool,
    /// Allow the effect to re-trigger itself within one turn.
    pub allow_recurse: bool,
    /// Called instead of `run()` when a dependency fires.
    pub scheduler: Option<SchedulerFn>,
    /// Cleanup callback, fired exactly once when the effect stops.
    pub on_stop: Option<Box<dyn FnOnce() + Send + Sync>>,
}

/// Shared state behind every [`Effect`] handle.
pub(crate) struct EffectInner {
    id: ObserverId,
    computed: bool,
    allow_recurse: bool,
    active: Arc<AtomicBool>,
    running: AtomicBool,
    /// Bumped at the start of every tracked run; edge stamps older than
    /// this are stale.
    epoch: AtomicU64,
    f: Box<dyn Fn() + Send + Sync>,
    scheduler: RwLock<Option<SchedulerFn>>,
    on_stop: Mutex<Option<Box<dyn FnOnce() + Send + Sync>>>,
    /// Handle list of every edge this effect is registered in.
    edges: Mutex<SmallVec<[Edge; 4]>>,
}

impl EffectInner {
    pub(crate) fn id(&self) -> ObserverId {
        self.id
    }

    pub(crate) fn is_computed(&self) -> bool {
        self.computed
    }

    pub(crate) fn allows_recurse(&self) -> bool {
        self.allow_recurse
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub(crate) fn active_flag(&self) -> Arc<AtomicBool> {
        self.active.clone()
    }

    /// Remember that this effect sits in `(target, key)`.
    ///
    /// Only called for edges the store just created for us, so the list
    /// stays duplicate-free by construction.
    pub(crate) fn record_edge(&self, target: TargetId, key: crate::store::DepKey) {
        self.edges.lock().push((target, key));
    }

    /// Execute the body with this effect installed as the current
    /// observer, then sweep edges the run no longer revisited.
    pub(crate) fn run(self: &Arc<Self>) {
        if !self.is_active() {
            // Stopped: manual invocation still executes, untracked.
            (self.f)();
            return;
        }

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.running.store(true, Ordering::SeqCst);

        // Reset the running flag even if the body panics.
        struct Running<'a>(&'a EffectInner);
        impl Drop for Running<'_> {
            fn drop(&mut self) {
                self.0.running.store(false, Ordering::SeqCst);
            }
        }
        let running = Running(self);

        {
            let _frame = ContextGuard::enter(self.id, Arc::downgrade(self));
            (self.f)();
        }
        drop(running);

        let edges = mem::take(&mut *self.edges.lock());
        let retained = deps::sweep_stale_edges(self.id, epoch, edges);
        *self.edges.lock() = retained;
    }

    /// React to a dependency firing: defer to the custom scheduler if
    /// one is installed, otherwise re-run synchronously.
    pub(crate) fn notify(self: &Arc<Self>) {
        let scheduler = self.scheduler.read().clone();
        match scheduler {
            Some(scheduler) => scheduler(),
            None => self.run(),
        }
    }

    fn stop(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            let edges = mem::take(&mut *self.edges.lock());
            deps::drop_edges(self.id, &edges);
            deps::unregister_observer(self.id);
            if let Some(on_stop) = self.on_stop.lock().take() {
                on_stop();
            }
        }
    }
}

impl Drop for EffectInner {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A handle to a re-runnable reactive computation.
///
/// Clones share state: running, stopping, or scheduling through any
/// handle affects them all.
pub struct Effect {
    inner: Arc<EffectInner>,
}

impl Effect {
    /// Create an effect. Unless `options.lazy` is set, the body runs
    /// immediately to collect its initial dependencies.
    pub fn new<F>(f: F, options: EffectOptions) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::with_flags(f, options, false)
    }

    pub(crate) fn with_flags<F>(f: F, options: EffectOptions, computed: bool) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let inner = Arc::new(EffectInner {
            id: ObserverId::next(),
            computed,
            allow_recurse: options.allow_recurse,
            active: Arc::new(AtomicBool::new(true)),
            running: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            f: Box::new(f),
            scheduler: RwLock::new(options.scheduler),
            on_stop: Mutex::new(options.on_stop),
            edges: Mutex::new(SmallVec::new()),
        });

        deps::register_observer(inner.id, Arc::downgrade(&inner));

        let effect = Self { inner };
        if !options.lazy {
            effect.run();
        }
        effect
    }

    /// The effect's ordering identity (creation order).
    pub fn id(&self) -> ObserverId {
        self.inner.id
    }

    /// Whether the effect still receives automatic re-runs.
    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    /// The number of dependency edges currently registered.
    pub fn edge_count(&self) -> usize {
        self.inner.edges.lock().len()
    }

    /// Run the body now.
    pub fn run(&self) {
        self.inner.run();
    }

    /// Deactivate the effect and remove it from every dependency edge.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Install or replace the custom scheduling callback.
    pub fn set_scheduler(&self, scheduler: SchedulerFn) {
        *self.inner.scheduler.write() = Some(scheduler);
    }

    pub(crate) fn inner(&self) -> &Arc<EffectInner> {
        &self.inner
    }

    pub(crate) fn downgrade(&self) -> Weak<EffectInner> {
        Arc::downgrade(&self.inner)
    }
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("active", &self.is_active())
            .field("edges", &self.edge_count())
            .finish()
    }
}

/// Create and immediately run an effect with default options.
pub fn effect<F>(f: F) -> Effect
where
    F: Fn() + Send + Sync + 'static,
{
    Effect::new(f, EffectOptions::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{track, trigger, DepKey, TriggerOp};
    use crate::value::Value;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn effect_runs_on_creation() {
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();

        let _effect = effect(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn lazy_effect_waits_for_explicit_run() {
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();

        let effect = Effect::new(
            move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
            },
            EffectOptions {
                lazy: true,
                ..Default::default()
            },
        );

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        effect.run();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn effect_reruns_when_dependency_fires() {
        let map = Value::map();
        let target = map.target_id().unwrap();
        let runs = Arc::new(AtomicI32::new(0));

        let runs_clone = runs.clone();
        let _effect = effect(move || {
            track(target, DepKey::from("age"));
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        trigger(target, DepKey::from("age"), TriggerOp::Set);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stale_branches_stop_receiving_updates() {
        let map = Value::map();
        let target = map.target_id().unwrap();
        let use_x = Arc::new(AtomicBool::new(true));
        let runs = Arc::new(AtomicI32::new(0));

        let use_x_clone = use_x.clone();
        let runs_clone = runs.clone();
        let effect = effect(move || {
            if use_x_clone.load(Ordering::SeqCst) {
                track(target, DepKey::from("x"));
            } else {
                track(target, DepKey::from("y"));
            }
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(effect.edge_count(), 1);
        trigger(target, DepKey::from("x"), TriggerOp::Set);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        // Switch branches and re-bind.
        use_x.store(false, Ordering::SeqCst);
        effect.run();
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(effect.edge_count(), 1);

        // The abandoned branch is silent; the new one fires.
        trigger(target, DepKey::from("x"), TriggerOp::Set);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        trigger(target, DepKey::from("y"), TriggerOp::Set);
        assert_eq!(runs.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn stopped_effect_ignores_triggers_but_runs_manually() {
        let map = Value::map();
        let target = map.target_id().unwrap();
        let runs = Arc::new(AtomicI32::new(0));

        let runs_clone = runs.clone();
        let effect = effect(move || {
            track(target, DepKey::from("age"));
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        effect.stop();
        assert!(!effect.is_active());

        trigger(target, DepKey::from("age"), TriggerOp::Set);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // Manual invocation still executes, once.
        effect.run();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(effect.edge_count(), 0);
    }

    #[test]
    fn on_stop_fires_exactly_once() {
        let stops = Arc::new(AtomicI32::new(0));
        let stops_clone = stops.clone();

        let effect = Effect::new(
            || {},
            EffectOptions {
                on_stop: Some(Box::new(move || {
                    stops_clone.fetch_add(1, Ordering::SeqCst);
                })),
                ..Default::default()
            },
        );

        effect.stop();
        effect.stop();
        drop(effect);

        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn self_trigger_does_not_recurse() {
        let map = Value::map();
        let target = map.target_id().unwrap();
        let runs = Arc::new(AtomicI32::new(0));

        let runs_clone = runs.clone();
        let _effect = effect(move || {
            track(target, DepKey::from("n"));
            runs_clone.fetch_add(1, Ordering::SeqCst);
            // Mutating our own dependency must not re-enter this run.
            trigger(target, DepKey::from("n"), TriggerOp::Set);
        });

        assert_eq!(runs.load(Ordering::SeqCst), 1);

        trigger(target, DepKey::from("n"), TriggerOp::Set);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn custom_scheduler_replaces_direct_rerun() {
        let map = Value::map();
        let target = map.target_id().unwrap();
        let runs = Arc::new(AtomicI32::new(0));
        let scheduled = Arc::new(AtomicI32::new(0));

        let runs_clone = runs.clone();
        let scheduled_clone = scheduled.clone();
        let _effect = Effect::new(
            move || {
                track(target, DepKey::from("age"));
                runs_clone.fetch_add(1, Ordering::SeqCst);
            },
            EffectOptions {
                scheduler: Some(Arc::new(move || {
                    scheduled_clone.fetch_add(1, Ordering::SeqCst);
                })),
                ..Default::default()
            },
        );
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        trigger(target, DepKey::from("age"), TriggerOp::Set);

        // The scheduler was invoked instead of the body.
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn nested_effects_restore_the_outer_observer() {
        let map = Value::map();
        let target = map.target_id().unwrap();
        let outer_runs = Arc::new(AtomicI32::new(0));

        let outer_runs_clone = outer_runs.clone();
        let _outer = effect(move || {
            outer_runs_clone.fetch_add(1, Ordering::SeqCst);

            // A nested effect tracks its own dependency...
            let _inner = effect(move || {
                track(target, DepKey::from("inner"));
            });

            // ...and afterwards reads register against the outer again.
            track(target, DepKey::from("outer"));
        });

        assert_eq!(outer_runs.load(Ordering::SeqCst), 1);
        trigger(target, DepKey::from("outer"), TriggerOp::Set);
        assert_eq!(outer_runs.load(Ordering::SeqCst), 2);
    }
}
