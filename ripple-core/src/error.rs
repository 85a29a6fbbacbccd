//! Error Reporting
//!
//! The engine distinguishes three failure classes:
//!
//! 1. Misuse warnings (writing through a read-only wrapper, observing a
//!    primitive). These are non-fatal: the operation becomes a safe no-op
//!    and a diagnostic is emitted through `tracing`.
//!
//! 2. Divergence errors: a job re-entered the scheduler queue more times
//!    than the recursion ceiling allows within a single flush. The job is
//!    skipped for the remainder of the flush and the error is reported.
//!
//! 3. User-code panics inside a queued job. These are caught per job so
//!    one failing job cannot prevent the rest of a flush from running.
//!
//! Classes 2 and 3 are routed through a single error-handling seam that a
//! host layer can intercept with [`set_error_handler`]. Without a handler
//! they are logged at error level. Engine-internal bookkeeping corruption
//! is a programming error and panics instead of being reported.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use parking_lot::RwLock;
use thiserror::Error;

use crate::reactive::ObserverId;

/// Errors surfaced through the error-handling seam.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// A job re-triggered itself past the recursion ceiling during one
    /// flush. This indicates a self-sustaining feedback loop, e.g. an
    /// effect writing to its own dependency with recursion allowed.
    #[error("job {id:?} exceeded the recursion limit of {limit} in a single flush")]
    RecursiveUpdate { id: ObserverId, limit: u32 },

    /// A job panicked while the scheduler was flushing. The panic was
    /// caught so the rest of the flush could proceed.
    #[error("job {id:?} panicked during flush: {message}")]
    JobPanicked { id: ObserverId, message: String },
}

type ErrorHandler = Box<dyn Fn(&ReactiveError) + Send + Sync>;

static ERROR_HANDLER: OnceLock<RwLock<Option<ErrorHandler>>> = OnceLock::new();

fn handler_slot() -> &'static RwLock<Option<ErrorHandler>> {
    ERROR_HANDLER.get_or_init(|| RwLock::new(None))
}

/// Install the host-side error handler.
///
/// The handler receives every divergence error and every isolated job
/// panic. Installing a new handler replaces the previous one.
pub fn set_error_handler<F>(handler: F)
where
    F: Fn(&ReactiveError) + Send + Sync + 'static,
{
    *handler_slot().write() = Some(Box::new(handler));
}

/// Route an error through the seam, falling back to the log.
pub(crate) fn report(err: ReactiveError) {
    let slot = handler_slot().read();
    match slot.as_ref() {
        Some(handler) => handler(&err),
        None => tracing::error!(error = %err, "unhandled reactive error"),
    }
}

// Misuse diagnostics default to on in debug builds and off in release.
// Toggling the flag has no behavioral effect beyond the warning channel.
static DEV_WARNINGS: AtomicBool = AtomicBool::new(cfg!(debug_assertions));

/// Enable or disable misuse warnings.
pub fn set_dev_warnings(enabled: bool) {
    DEV_WARNINGS.store(enabled, Ordering::Relaxed);
}

pub(crate) fn dev_warnings_enabled() -> bool {
    DEV_WARNINGS.load(Ordering::Relaxed)
}

/// Emit a misuse warning if the diagnostic channel is enabled.
macro_rules! dev_warn {
    ($($arg:tt)*) => {
        if $crate::error::dev_warnings_enabled() {
            tracing::warn!($($arg)*);
        }
    };
}

pub(crate) use dev_warn;

/// Serializes tests that install the global error handler, which would
/// otherwise replace each other mid-test.
#[cfg(test)]
pub(crate) mod test_support {
    use parking_lot::Mutex;

    pub(crate) static HANDLER_LOCK: Mutex<()> = Mutex::new(());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;
    use std::sync::Arc;

    #[test]
    fn handler_receives_reported_errors() {
        let _serial = test_support::HANDLER_LOCK.lock();
        let marker = ObserverId::next();
        let seen = Arc::new(AtomicI32::new(0));
        let seen_clone = seen.clone();

        // The handler is global, so only count the error this test reports.
        set_error_handler(move |err| {
            if matches!(err, ReactiveError::RecursiveUpdate { id, .. } if *id == marker) {
                seen_clone.fetch_add(1, Ordering::SeqCst);
            }
        });

        report(ReactiveError::RecursiveUpdate {
            id: marker,
            limit: 100,
        });

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dev_warning_flag_toggles() {
        set_dev_warnings(true);
        assert!(dev_warnings_enabled());

        set_dev_warnings(false);
        assert!(!dev_warnings_enabled());

        set_dev_warnings(cfg!(debug_assertions));
    }
}
