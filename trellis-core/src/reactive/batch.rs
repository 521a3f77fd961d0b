//! Batches and Actions
//!
//! A batch defers reactions until it closes. Values are updated right away;
//! only the runs of the reactions that observe them wait. Batches nest, and
//! only the outermost close flushes the queue.
//!
//! Actions are batches with a name. Every action opens a
//! `trace_span!("action", name)` so that a host's subscriber can attribute
//! the writes (and the reactions they cause) to it.

use std::marker::PhantomData;

use tracing::trace_span;

use super::runtime::Runtime;

/// RAII guard for a batch.
///
/// # Example
///
/// ```rust,ignore
/// {
///     let _batch = Batch::start();
///     first.set("Ada".into());
///     last.set("Lovelace".into());
/// } // reactions observing either name run once, here
/// ```
#[must_use = "the batch closes as soon as the guard is dropped"]
pub struct Batch {
    // Batches belong to the thread that opened them.
    _not_send: PhantomData<*const ()>,
}

impl Batch {
    /// Open a batch.
    pub fn start() -> Self {
        Runtime::start_batch();
        Self {
            _not_send: PhantomData,
        }
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        Runtime::end_batch();
    }
}

/// Run `f` inside a batch and return its result.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    let _batch = Batch::start();
    f()
}

/// Run `f` immediately as an action named `"run_in_action"`.
pub fn run_in_action<R>(f: impl FnOnce() -> R) -> R {
    run_in_action_named("run_in_action", f)
}

/// Run `f` immediately as an action. The name is only a debug label.
pub fn run_in_action_named<R>(name: &str, f: impl FnOnce() -> R) -> R {
    // The span outlives the batch so the flush is attributed to the action.
    let span = trace_span!("action", name);
    let _entered = span.enter();
    let _batch = Batch::start();
    f()
}

/// Wrap `f` so that every call runs as an action named `"action"`.
///
/// # Example
///
/// ```rust,ignore
/// let increment = action(move || counter.update(|n| n + 1));
/// increment();
/// increment();
/// ```
pub fn action<R>(f: impl Fn() -> R) -> impl Fn() -> R {
    action_named("action", f)
}

/// Wrap `f` so that every call runs as an action with the given name.
pub fn action_named<R>(name: impl Into<String>, f: impl Fn() -> R) -> impl Fn() -> R {
    let name = name.into();
    move || run_in_action_named(&name, &f)
}

/// Wrap a one-argument function so that every call runs as an action.
pub fn action_with<A, R>(name: impl Into<String>, f: impl Fn(A) -> R) -> impl Fn(A) -> R {
    let name = name.into();
    move |arg| run_in_action_named(&name, || f(arg))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_batches_share_one_depth_counter() {
        assert_eq!(Runtime::batch_depth(), 0);
        batch(|| {
            assert_eq!(Runtime::batch_depth(), 1);
            batch(|| assert_eq!(Runtime::batch_depth(), 2));
            assert_eq!(Runtime::batch_depth(), 1);
        });
        assert_eq!(Runtime::batch_depth(), 0);
    }

    #[test]
    fn actions_return_results() {
        let double = action_with("double", |n: i32| n * 2);
        assert_eq!(double(21), 42);
        assert!(run_in_action(Runtime::is_batching));
        assert!(!Runtime::is_batching());
    }

    #[test]
    fn batch_closes_on_panic() {
        let result = std::panic::catch_unwind(|| {
            let _batch = Batch::start();
            panic!("inside a batch");
        });
        assert!(result.is_err());
        assert_eq!(Runtime::batch_depth(), 0);
    }
}
