//! Ripple Core
//!
//! This crate implements a fine-grained reactivity engine: state whose
//! reads and writes are intercepted, so computations that read it
//! re-run automatically when it changes.
//!
//! - `value`: the dynamic value model observed containers hold
//! - `store`: the dependency store, mapping `(target, key)` edges to
//!   subscribers through [`store::track`] and [`store::trigger`]
//! - `reactive`: effects, signals, and computed cells
//! - `observe`: the built-in interception layer over containers
//! - `scheduler`: the batching job queue
//! - `error`: the error-handling seam and misuse diagnostics
//!
//! # Example
//!
//! ```rust,ignore
//! use ripple_core::{computed, effect, observe, Value};
//!
//! let state = observe(Value::map_from([("count", Value::Int(0))]));
//! let state = state.as_observed().cloned().unwrap();
//!
//! let doubled = {
//!     let state = state.clone();
//!     computed(move || state.get("count").and_then(|v| v.as_int()).unwrap_or(0) * 2)
//! };
//!
//! let _logger = {
//!     let doubled = doubled.clone();
//!     effect(move || println!("doubled: {}", doubled.get()))
//! };
//!
//! // Re-runs the effect, prints: "doubled: 10"
//! state.set("count", 5);
//! ```

pub mod error;
pub mod observe;
pub mod reactive;
pub mod scheduler;
pub mod store;
pub mod value;

pub use error::{set_dev_warnings, set_error_handler, ReactiveError};
pub use observe::{
    is_observed, is_readonly, is_shallow, mark_excluded, observe, observe_readonly,
    observe_shallow, observe_shallow_readonly, to_raw, wrap, ObserveOptions, Observed,
};
pub use reactive::{
    computed, current_observer, effect, is_observing, signal, untrack, Computed, Effect,
    EffectOptions, ObserverId, SchedulerFn, Signal,
};
pub use scheduler::{batch_effect, flush_jobs, next_tick, queue_job, queue_post_job, Job};
pub use store::{subscriber_count, track, trigger, DepKey, TriggerOp};
pub use value::{same_value, TargetId, Value};
