//! Observation Layer
//!
//! The built-in interception layer: wrap a container and every read or
//! write through the wrapper drives the dependency store automatically.
//! [`wrap`] (and the [`observe`] family) creates wrappers; [`Observed`]
//! is the handle they return.
//!
//! This layer is one client of the engine, not the engine itself.
//! Anything able to call `track` on reads and `trigger` on writes can
//! feed the same dependency store.

mod container;
mod wrap;

pub use container::Observed;
pub use wrap::{
    is_observed, is_readonly, is_shallow, mark_excluded, observe, observe_readonly,
    observe_shallow, observe_shallow_readonly, to_raw, wrap, ObserveOptions,
};
