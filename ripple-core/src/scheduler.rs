//! Batching Scheduler
//!
//! The scheduler turns eager propagation into batched propagation: an
//! effect whose scheduler queues a job instead of re-running means any
//! number of writes within one turn cost one re-run at the next flush.
//!
//! The queue is thread-local and explicit. Queueing never flushes;
//! [`flush_jobs`] (or [`next_tick`]) is the turn boundary, playing the
//! role the microtask queue plays in browser engines.
//!
//! # Flush discipline
//!
//! - Jobs are deduplicated by observer identity while queued.
//! - A flush runs jobs in identity order (creation order), parents
//!   before the children they created. Jobs queued mid-flush join the
//!   current flush, sorted into place after the running job.
//! - Post jobs run after the main queue drains; a post job queueing
//!   main jobs starts another round.
//! - A job re-entering the queue more than [`RECURSION_LIMIT`] times in
//!   one flush is a divergence: it is reported and skipped for the rest
//!   of the flush.
//! - A panicking job is caught and reported so the rest of the flush
//!   still runs.

use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::trace;

use crate::error::{report, ReactiveError};
use crate::reactive::{Effect, EffectOptions, ObserverId};

/// How many times one job may re-enter the queue within a single flush
/// before it is treated as a divergent feedback loop.
pub const RECURSION_LIMIT: u32 = 100;

/// A unit of deferred work, deduplicated by observer identity.
#[derive(Clone)]
pub struct Job {
    id: ObserverId,
    pre: bool,
    allow_recurse: bool,
    active: Option<Arc<AtomicBool>>,
    f: Arc<dyn Fn() + Send + Sync>,
}

impl Job {
    /// Create a job owned by the observer `id`.
    pub fn new<F>(id: ObserverId, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            id,
            pre: false,
            allow_recurse: false,
            active: None,
            f: Arc::new(f),
        }
    }

    /// Build the deferred-run job for an effect.
    ///
    /// The job holds the effect weakly and shares its active flag, so a
    /// stopped or dropped effect leaves any queued job inert.
    pub fn for_effect(effect: &Effect) -> Self {
        let weak = effect.downgrade();
        let mut job = Self::new(effect.id(), move || {
            if let Some(inner) = weak.upgrade() {
                inner.run();
            }
        });
        job.allow_recurse = effect.inner().allows_recurse();
        job.active = Some(effect.inner().active_flag());
        job
    }

    /// Order this job ahead of same-identity non-pre jobs.
    pub fn pre(mut self) -> Self {
        self.pre = true;
        self
    }

    /// Let the job re-queue itself while it is the one running.
    pub fn allow_recurse(mut self) -> Self {
        self.allow_recurse = true;
        self
    }

    fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .map_or(true, |flag| flag.load(Ordering::SeqCst))
    }
}

fn order(job: &Job) -> (u64, bool) {
    (job.id.raw(), !job.pre)
}

#[derive(Default)]
struct SchedulerState {
    queue: Vec<Job>,
    post_queue: Vec<Job>,
    flush_index: usize,
    flushing: bool,
    /// Per-flush run counts, for the divergence ceiling.
    runs: HashMap<ObserverId, u32>,
}

thread_local! {
    static STATE: RefCell<SchedulerState> = RefCell::new(SchedulerState::default());
}

/// Add a job to the main queue.
///
/// A job whose identity is already queued is dropped. While a flush is
/// running, the currently executing job only counts as a duplicate of
/// itself when it did not opt into recursion, and new jobs are sorted
/// into the live queue after the running job.
pub fn queue_job(job: Job) {
    STATE.with(|state| {
        let mut state = state.borrow_mut();

        let search_from = if state.flushing {
            (state.flush_index + job.allow_recurse as usize).min(state.queue.len())
        } else {
            0
        };
        if state.queue[search_from..]
            .iter()
            .any(|queued| queued.id == job.id)
        {
            return;
        }

        trace!(id = job.id.raw(), flushing = state.flushing, "queue job");
        if state.flushing {
            let start = (state.flush_index + 1).min(state.queue.len());
            let pos = start + state.queue[start..].partition_point(|queued| order(queued) <= order(&job));
            state.queue.insert(pos, job);
        } else {
            state.queue.push(job);
        }
    });
}

/// Add a job to the post queue, run after the main queue drains.
pub fn queue_post_job(job: Job) {
    STATE.with(|state| {
        let mut state = state.borrow_mut();
        if state.post_queue.iter().any(|queued| queued.id == job.id) {
            return;
        }
        state.post_queue.push(job);
    });
}

/// Drain both queues.
///
/// Re-entrant calls are no-ops; the outermost flush drains everything,
/// including work queued while it runs.
pub fn flush_jobs() {
    let re_entered = STATE.with(|state| {
        let mut state = state.borrow_mut();
        if state.flushing {
            true
        } else {
            state.flushing = true;
            state.runs.clear();
            false
        }
    });
    if re_entered {
        return;
    }

    loop {
        // Main queue: identity order, live insertion joins this pass.
        STATE.with(|state| {
            let mut state = state.borrow_mut();
            state.flush_index = 0;
            state.queue.sort_by_key(order);
        });
        loop {
            let job = STATE.with(|state| {
                let state = state.borrow();
                state.queue.get(state.flush_index).cloned()
            });
            let Some(job) = job else { break };
            run_job(&job);
            STATE.with(|state| state.borrow_mut().flush_index += 1);
        }
        STATE.with(|state| {
            let mut state = state.borrow_mut();
            state.queue.clear();
            state.flush_index = 0;
        });

        // Post queue, in queue order. Post jobs may queue more post
        // jobs (joining this round) or main jobs (starting another).
        loop {
            let job = STATE.with(|state| {
                let mut state = state.borrow_mut();
                if state.post_queue.is_empty() {
                    None
                } else {
                    Some(state.post_queue.remove(0))
                }
            });
            let Some(job) = job else { break };
            run_job(&job);
        }

        let drained = STATE.with(|state| {
            let state = state.borrow();
            state.queue.is_empty() && state.post_queue.is_empty()
        });
        if drained {
            break;
        }
    }

    STATE.with(|state| {
        let mut state = state.borrow_mut();
        state.flushing = false;
        state.runs.clear();
    });
}

/// Flush pending work, then run `f` against the settled state.
pub fn next_tick<R>(f: impl FnOnce() -> R) -> R {
    flush_jobs();
    f()
}

/// Create an effect whose re-runs are deferred to the job queue.
///
/// The body runs once immediately to collect dependencies; afterwards,
/// triggers queue one job per flush instead of re-running inline.
pub fn batch_effect<F>(f: F) -> Effect
where
    F: Fn() + Send + Sync + 'static,
{
    let effect = Effect::new(f, EffectOptions::default());
    let job = Job::for_effect(&effect);
    effect.set_scheduler(Arc::new(move || queue_job(job.clone())));
    effect
}

fn run_job(job: &Job) {
    if !job.is_active() {
        return;
    }

    let count = STATE.with(|state| {
        let mut state = state.borrow_mut();
        let count = state.runs.entry(job.id).or_insert(0);
        *count += 1;
        *count
    });
    if count > RECURSION_LIMIT {
        // Report the first excess only; later duplicates stay silent.
        if count == RECURSION_LIMIT + 1 {
            report(ReactiveError::RecursiveUpdate {
                id: job.id,
                limit: RECURSION_LIMIT,
            });
        }
        return;
    }

    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| (job.f)())) {
        let message = panic_message(&payload);
        report(ReactiveError::JobPanicked {
            id: job.id,
            message,
        });
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::set_error_handler;
    use crate::reactive::Signal;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn queued_jobs_are_deduplicated() {
        let runs = Arc::new(AtomicI32::new(0));
        let id = ObserverId::next();

        for _ in 0..3 {
            let runs_clone = runs.clone();
            queue_job(Job::new(id, move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
            }));
        }
        flush_jobs();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn flush_runs_jobs_in_identity_order() {
        let order_seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let first = ObserverId::next();
        let second = ObserverId::next();

        // Queue out of creation order.
        let seen = order_seen.clone();
        queue_job(Job::new(second, move || seen.lock().push("second")));
        let seen = order_seen.clone();
        queue_job(Job::new(first, move || seen.lock().push("first")));
        flush_jobs();

        assert_eq!(*order_seen.lock(), vec!["first", "second"]);
    }

    #[test]
    fn jobs_queued_mid_flush_join_the_same_flush() {
        let runs = Arc::new(AtomicI32::new(0));
        let outer = ObserverId::next();
        let inner = ObserverId::next();

        let runs_clone = runs.clone();
        queue_job(Job::new(outer, move || {
            let runs_inner = runs_clone.clone();
            queue_job(Job::new(inner, move || {
                runs_inner.fetch_add(10, Ordering::SeqCst);
            }));
            runs_clone.fetch_add(1, Ordering::SeqCst);
        }));
        flush_jobs();

        assert_eq!(runs.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn post_jobs_run_after_the_main_queue() {
        let order_seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let seen = order_seen.clone();
        queue_post_job(Job::new(ObserverId::next(), move || {
            seen.lock().push("post")
        }));
        let seen = order_seen.clone();
        queue_job(Job::new(ObserverId::next(), move || {
            seen.lock().push("main")
        }));
        flush_jobs();

        assert_eq!(*order_seen.lock(), vec!["main", "post"]);
    }

    #[test]
    fn batched_effect_coalesces_writes() {
        let count = Signal::new(0i64);
        let runs = Arc::new(AtomicI32::new(0));

        let count_clone = count.clone();
        let runs_clone = runs.clone();
        let _effect = batch_effect(move || {
            count_clone.get();
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        count.set(1);
        count.set(2);
        count.set(3);
        // Nothing re-ran yet.
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        next_tick(|| {
            assert_eq!(runs.load(Ordering::SeqCst), 2);
        });
    }

    #[test]
    fn stopped_effect_leaves_queued_jobs_inert() {
        let count = Signal::new(0i64);
        let runs = Arc::new(AtomicI32::new(0));

        let count_clone = count.clone();
        let runs_clone = runs.clone();
        let effect = batch_effect(move || {
            count_clone.get();
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });

        count.set(1);
        effect.stop();
        flush_jobs();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_job_does_not_abort_the_flush() {
        let _serial = crate::error::test_support::HANDLER_LOCK.lock();
        let marker = ObserverId::next();
        let reported = Arc::new(AtomicI32::new(0));
        let reported_clone = reported.clone();
        set_error_handler(move |err| {
            if matches!(err, ReactiveError::JobPanicked { id, .. } if *id == marker) {
                reported_clone.fetch_add(1, Ordering::SeqCst);
            }
        });

        let runs = Arc::new(AtomicI32::new(0));
        queue_job(Job::new(marker, || panic!("job failure")));
        let runs_clone = runs.clone();
        queue_job(Job::new(ObserverId::next(), move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
        }));
        flush_jobs();

        assert_eq!(reported.load(Ordering::SeqCst), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn divergent_self_trigger_hits_the_ceiling() {
        let _serial = crate::error::test_support::HANDLER_LOCK.lock();
        let marker = Arc::new(parking_lot::Mutex::new(None::<ObserverId>));
        let reported = Arc::new(AtomicI32::new(0));

        let marker_clone = marker.clone();
        let reported_clone = reported.clone();
        set_error_handler(move |err| {
            if let ReactiveError::RecursiveUpdate { id, limit } = err {
                if Some(*id) == *marker_clone.lock() {
                    assert_eq!(*limit, RECURSION_LIMIT);
                    reported_clone.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        let count = Signal::new(0i64);
        let runs = Arc::new(AtomicI32::new(0));

        let count_clone = count.clone();
        let runs_clone = runs.clone();
        let effect = Effect::new(
            move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
                // Reads its own dependency, then mutates it: a
                // self-sustaining feedback loop.
                let n = count_clone.get();
                count_clone.set(n + 1);
            },
            EffectOptions {
                lazy: true,
                allow_recurse: true,
                ..Default::default()
            },
        );
        *marker.lock() = Some(effect.id());
        let job = Job::for_effect(&effect);
        effect.set_scheduler(Arc::new(move || queue_job(job.clone())));

        // The first tracked run subscribes and queues the first re-run.
        effect.run();
        flush_jobs();

        // One initial creation run, then the ceiling's worth of flushed
        // runs, then the divergence report.
        assert_eq!(runs.load(Ordering::SeqCst), 1 + RECURSION_LIMIT as i32);
        assert_eq!(reported.load(Ordering::SeqCst), 1);
        assert!(effect.is_active());
    }
}
