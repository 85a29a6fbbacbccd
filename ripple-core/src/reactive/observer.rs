//! Observer identity.
//!
//! Every subscription unit (an effect, a computed cell's inner effect,
//! or an externally supplied scheduler job) draws its identity from one
//! monotonic counter. The scheduler sorts by this identity, so creation
//! order doubles as execution order within a flush: units created first
//! (parents) run before units created later (children).

use std::sync::atomic::{AtomicU64, Ordering};

/// Unique, ordered identifier for an observer or scheduler job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl ObserverId {
    /// Allocate the next identity.
    ///
    /// Uses an atomic counter so identities stay unique and ordered
    /// across threads.
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw counter value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_ordered() {
        let a = ObserverId::next();
        let b = ObserverId::next();
        let c = ObserverId::next();

        assert!(a < b);
        assert!(b < c);
        assert_ne!(a, c);
    }
}
