//! Dependency Store
//!
//! The store maps observed locations to their subscribers. An edge is
//! the relation `(target, key) -> observer set`: [`track`] registers the
//! current observer against an edge during a read, [`trigger`] resolves
//! and notifies an edge's observers after a qualifying write.
//!
//! These two primitives are the engine's driving seam. The built-in
//! observation layer (`observe`), signals, and computed cells all funnel
//! through them, and alternative interception layers can drive the same
//! engine by calling them directly.

mod key;

pub(crate) mod deps;

pub use deps::{subscriber_count, track, trigger};
pub use key::{DepKey, TriggerOp};
