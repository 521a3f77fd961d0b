//! Reactive Context
//!
//! The reactive context tracks which derivation is currently running and
//! whether state changes are allowed. Reads consult it to decide whether to
//! record a dependency; writes consult it to decide whether to report an
//! illegal mutation.
//!
//! # Implementation
//!
//! Each thread holds one current frame. Entering a context swaps a new
//! frame in and keeps the previous one inside the returned guard; dropping
//! the guard swaps it back. Guards therefore nest like a stack, and the
//! previous frame is restored even when the body unwinds.

use std::cell::Cell;

use crate::graph::DerivationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Frame {
    /// Derivation whose reads are being recorded.
    derivation: Option<DerivationId>,
    allow_state_changes: bool,
}

impl Frame {
    const ROOT: Frame = Frame {
        derivation: None,
        allow_state_changes: true,
    };
}

thread_local! {
    static FRAME: Cell<Frame> = const { Cell::new(Frame::ROOT) };
}

fn current() -> Frame {
    FRAME.with(Cell::get)
}

/// Guard that restores the previous context when dropped.
#[must_use = "the context is exited as soon as the guard is dropped"]
pub struct ReactiveContext {
    previous: Frame,
}

impl ReactiveContext {
    fn swap(next: Frame) -> Self {
        let previous = FRAME.with(|frame| frame.replace(next));
        Self { previous }
    }

    /// Enter a context in which reads are recorded against `derivation`.
    pub fn enter(derivation: DerivationId) -> Self {
        Self::swap(Frame {
            derivation: Some(derivation),
            ..current()
        })
    }

    /// Enter a context in which reads are not recorded at all.
    pub fn untracked() -> Self {
        Self::swap(Frame {
            derivation: None,
            ..current()
        })
    }

    /// Enter a context in which writes are reported as illegal.
    pub fn forbid_state_changes() -> Self {
        Self::swap(Frame {
            allow_state_changes: false,
            ..current()
        })
    }

    /// Check if a derivation is currently recording reads.
    pub fn is_active() -> bool {
        current().derivation.is_some()
    }

    /// Get the derivation currently recording reads, if any.
    pub fn current_derivation() -> Option<DerivationId> {
        current().derivation
    }

    pub fn state_changes_allowed() -> bool {
        current().allow_state_changes
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        // The thread-local may already be gone during thread teardown.
        let _ = FRAME.try_with(|frame| frame.set(self.previous));
    }
}

/// Run `f` without recording any of its reads.
///
/// # Example
///
/// ```rust,ignore
/// autorun(|| {
///     // Re-runs when `a` changes, but not when `b` does.
///     let sum = a.get() + untracked(|| b.get());
/// });
/// ```
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _ctx = ReactiveContext::untracked();
    f()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_tracks_derivation() {
        let id = DerivationId::new();

        assert!(!ReactiveContext::is_active());
        assert!(ReactiveContext::current_derivation().is_none());

        {
            let _ctx = ReactiveContext::enter(id);

            assert!(ReactiveContext::is_active());
            assert_eq!(ReactiveContext::current_derivation(), Some(id));
        }

        // Context should be cleaned up after drop
        assert!(!ReactiveContext::is_active());
    }

    #[test]
    fn nested_contexts() {
        let id1 = DerivationId::new();
        let id2 = DerivationId::new();

        {
            let _ctx1 = ReactiveContext::enter(id1);
            assert_eq!(ReactiveContext::current_derivation(), Some(id1));

            {
                let _ctx2 = ReactiveContext::enter(id2);
                assert_eq!(ReactiveContext::current_derivation(), Some(id2));
            }

            // After inner context drops, outer should be current
            assert_eq!(ReactiveContext::current_derivation(), Some(id1));
        }

        assert!(ReactiveContext::current_derivation().is_none());
    }

    #[test]
    fn untracked_hides_outer_derivation() {
        let id = DerivationId::new();
        let _ctx = ReactiveContext::enter(id);

        let inner = untracked(ReactiveContext::current_derivation);
        assert!(inner.is_none());
        assert_eq!(ReactiveContext::current_derivation(), Some(id));
    }

    #[test]
    fn forbidding_state_changes_keeps_derivation() {
        let id = DerivationId::new();
        let _ctx = ReactiveContext::enter(id);
        assert!(ReactiveContext::state_changes_allowed());

        {
            let _forbid = ReactiveContext::forbid_state_changes();
            assert!(!ReactiveContext::state_changes_allowed());
            assert_eq!(ReactiveContext::current_derivation(), Some(id));
        }

        assert!(ReactiveContext::state_changes_allowed());
    }

    #[test]
    fn context_is_restored_after_panic() {
        let id = DerivationId::new();

        let result = std::panic::catch_unwind(|| {
            let _ctx = ReactiveContext::enter(id);
            let _forbid = ReactiveContext::forbid_state_changes();
            panic!("inside a derivation");
        });

        assert!(result.is_err());
        assert!(ReactiveContext::current_derivation().is_none());
        assert!(ReactiveContext::state_changes_allowed());
    }
}
