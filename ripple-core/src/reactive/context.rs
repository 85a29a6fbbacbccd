//! Reactive Context
//!
//! The reactive context tracks which observer is currently running. This
//! enables automatic dependency tracking: when an observed location is
//! read, the read registers the current observer as a subscriber.
//!
//! # Implementation
//!
//! A thread-local stack holds the currently executing observers. Running
//! an effect pushes a frame; when the run completes the frame is popped,
//! restoring whatever observer was active before. This save/restore
//! stack is what makes nested effect runs (an effect whose body runs
//! another effect) work without any global bookkeeping.
//!
//! The stack stores weak handles: the context must never keep an effect
//! alive, and a frame whose effect has been dropped simply stops
//! registering dependencies.

use std::cell::RefCell;
use std::sync::Weak;

use super::effect::EffectInner;
use super::observer::ObserverId;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
    static UNTRACK_DEPTH: RefCell<usize> = const { RefCell::new(0) };
}

/// An entry in the reactive context stack.
struct Frame {
    observer: ObserverId,
    effect: Weak<EffectInner>,
}

/// Guard that pops the context frame when dropped.
///
/// Dropping on unwind keeps the stack balanced even when an observer's
/// body panics.
pub(crate) struct ContextGuard {
    observer: ObserverId,
}

impl ContextGuard {
    /// Push a frame for the given effect, making it the current observer
    /// until the returned guard is dropped.
    pub(crate) fn enter(observer: ObserverId, effect: Weak<EffectInner>) -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(Frame { observer, effect });
        });
        Self { observer }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            if let Some(frame) = popped {
                debug_assert_eq!(
                    frame.observer, self.observer,
                    "reactive context frames popped out of order"
                );
            }
        });
    }
}

/// The effect currently collecting dependencies, if any.
///
/// Returns `None` outside any observer, inside [`untrack`], or when the
/// current frame's effect has been dropped.
pub(crate) fn current_effect() -> Option<Weak<EffectInner>> {
    if UNTRACK_DEPTH.with(|d| *d.borrow() > 0) {
        return None;
    }
    CONTEXT_STACK.with(|stack| stack.borrow().last().map(|frame| frame.effect.clone()))
}

/// The identity of the current observer, ignoring the untrack state.
pub fn current_observer() -> Option<ObserverId> {
    CONTEXT_STACK.with(|stack| stack.borrow().last().map(|frame| frame.observer))
}

/// Whether any observer is currently executing on this thread.
pub fn is_observing() -> bool {
    CONTEXT_STACK.with(|stack| !stack.borrow().is_empty())
}

/// Run a closure with dependency tracking suppressed.
///
/// Reads performed inside the closure register no subscribers, even when
/// an observer is currently executing. Nesting is supported.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    UNTRACK_DEPTH.with(|d| *d.borrow_mut() += 1);
    // Balance the depth on unwind as well.
    struct Reset;
    impl Drop for Reset {
        fn drop(&mut self) {
            UNTRACK_DEPTH.with(|d| *d.borrow_mut() -= 1);
        }
    }
    let _reset = Reset;
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_tracks_current_observer() {
        let id = ObserverId::next();

        assert!(!is_observing());
        assert!(current_observer().is_none());

        {
            let _guard = ContextGuard::enter(id, Weak::new());
            assert!(is_observing());
            assert_eq!(current_observer(), Some(id));
        }

        assert!(!is_observing());
        assert!(current_observer().is_none());
    }

    #[test]
    fn nested_frames_save_and_restore() {
        let outer = ObserverId::next();
        let inner = ObserverId::next();

        let _outer_guard = ContextGuard::enter(outer, Weak::new());
        assert_eq!(current_observer(), Some(outer));

        {
            let _inner_guard = ContextGuard::enter(inner, Weak::new());
            assert_eq!(current_observer(), Some(inner));
        }

        assert_eq!(current_observer(), Some(outer));
    }

    #[test]
    fn untrack_suppresses_the_current_effect() {
        let id = ObserverId::next();
        let _guard = ContextGuard::enter(id, Weak::new());

        assert!(current_effect().is_some());

        untrack(|| {
            assert!(current_effect().is_none());
            // Nested untrack stays suppressed.
            untrack(|| assert!(current_effect().is_none()));
            assert!(current_effect().is_none());
        });

        assert!(current_effect().is_some());
    }
}
