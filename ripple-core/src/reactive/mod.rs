//! Reactive Primitives
//!
//! This module implements the observer side of the engine: effects,
//! signals, and computed cells, plus the thread-local context that makes
//! dependency collection implicit.
//!
//! # Concepts
//!
//! ## Effects
//!
//! An Effect is a re-runnable computation and the unit of subscription.
//! While its body executes it is the current observer; every observed
//! read it performs registers an edge in the dependency store, and any
//! of those edges firing re-runs it (or invokes its custom scheduler).
//!
//! ## Signals
//!
//! A Signal is a single observable value. Reads track it, changed
//! writes trigger it.
//!
//! ## Computed cells
//!
//! A Computed is a cached derived value. It recomputes lazily on read
//! after an upstream change, and is itself observable.
//!
//! # Implementation Notes
//!
//! Dependency collection uses a thread-local observer stack: reads
//! consult the top of the stack rather than taking the observer as an
//! argument. This transparent style is shared by Vue 3, SolidJS, and
//! Leptos.

mod computed;
pub(crate) mod context;
pub(crate) mod effect;
pub(crate) mod observer;
pub(crate) mod signal;

pub use computed::{computed, Computed};
pub use context::{current_observer, is_observing, untrack};
pub use effect::{effect, Effect, EffectOptions, SchedulerFn};
pub use observer::ObserverId;
pub use signal::{signal, Signal};
