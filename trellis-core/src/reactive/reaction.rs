//! Reaction Implementation
//!
//! A Reaction is a side-effecting computation that re-runs whenever one of
//! the observables it read on its latest run changes.
//!
//! # How Reactions Work
//!
//! 1. When created with [`Reaction::new`] (or [`autorun`]), the reaction
//!    runs immediately to establish its first dependency set.
//!
//! 2. When a dependency changes, the reaction is marked stale and queued.
//!    It runs once the surrounding batch closes.
//!
//! 3. Each run records a fresh dependency set. Observables that were read
//!    last time but not this time stop notifying the reaction.
//!
//! # Differences from Computed
//!
//! - Computed values return a value; reactions do not.
//! - Computed values are lazy (compute on access); reactions are eager.
//! - The runtime keeps a reaction alive until it is disposed. A computed
//!   value lives as long as its handles.

use std::cell::Cell;
use std::rc::Rc;

use tracing::{debug, error};

use crate::graph::{DerivationId, DerivationNode, DerivationState};

use super::runtime::{Derivation, Runtime};

struct ReactionInner {
    id: DerivationId,
    name: String,
    body: Box<dyn Fn()>,
    disposed: Cell<bool>,
    run_count: Cell<usize>,
}

impl ReactionInner {
    fn execute(&self) {
        if self.disposed.get() {
            return;
        }
        let result = Runtime::track(self.id, || (self.body)());
        self.run_count.set(self.run_count.get() + 1);
        if let Err(err) = result {
            error!(derivation = %self.name, error = %err, "reaction failed");
        }
    }
}

impl Derivation for ReactionInner {
    fn on_become_stale(&self) {
        Runtime::schedule(self.id);
    }

    fn run_scheduled(&self) {
        if !self.disposed.get() && Runtime::should_compute(self.id) {
            self.execute();
        }
    }
}

/// A side-effecting computation that runs when its dependencies change.
///
/// Cloning the handle shares the reaction.
///
/// # Example
///
/// ```rust,ignore
/// let count = Observable::new(0);
///
/// let c = count.clone();
/// let reaction = Reaction::new(move || {
///     println!("Count is: {}", c.get());
/// });
///
/// count.set(5);  // Prints: "Count is: 5"
/// reaction.dispose();
/// ```
#[derive(Clone)]
pub struct Reaction {
    inner: Rc<ReactionInner>,
}

impl Reaction {
    /// Create a reaction and run it once.
    pub fn new<F>(body: F) -> Self
    where
        F: Fn() + 'static,
    {
        let id = DerivationId::new();
        Self::build(id, format!("Reaction@{}", id.raw()), body).started()
    }

    /// Create a named reaction and run it once.
    pub fn named<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn() + 'static,
    {
        Self::new_lazy(name, body).started()
    }

    /// Create a reaction without running it.
    ///
    /// It tracks nothing until [`execute`](Self::execute) or
    /// [`schedule`](Self::schedule) runs it for the first time.
    pub fn new_lazy<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn() + 'static,
    {
        Self::build(DerivationId::new(), name.into(), body)
    }

    fn build<F>(id: DerivationId, name: String, body: F) -> Self
    where
        F: Fn() + 'static,
    {
        let inner = Rc::new(ReactionInner {
            id,
            name,
            body: Box::new(body),
            disposed: Cell::new(false),
            run_count: Cell::new(0),
        });
        let handle: Rc<dyn Derivation> = inner.clone();
        Runtime::register_derivation(DerivationNode::reaction(id, inner.name.clone(), handle));
        Self { inner }
    }

    fn started(self) -> Self {
        self.execute();
        self
    }

    pub fn id(&self) -> DerivationId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Run the body now, whatever the reaction's state.
    ///
    /// A panic in the body is logged and does not propagate. Does nothing
    /// once the reaction is disposed.
    pub fn execute(&self) {
        self.inner.execute();
    }

    /// Mark the reaction stale and schedule it.
    ///
    /// It runs immediately unless a batch is open or reactions are being
    /// flushed, in which case it joins the queue.
    pub fn schedule(&self) {
        if self.inner.disposed.get() {
            return;
        }
        Runtime::set_state(self.inner.id, DerivationState::Stale);
        Runtime::schedule(self.inner.id);
    }

    /// Dispose of the reaction.
    ///
    /// Its edges are removed and it never runs again. Disposing twice is a
    /// no-op.
    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }
        Runtime::dispose(self.inner.id);
        debug!(derivation = %self.inner.name, runs = self.run_count(), "reaction disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Get the number of times the body has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.get()
    }

    /// Get the number of observables read by the latest run.
    pub fn dependency_count(&self) -> usize {
        Runtime::dependency_count(self.inner.id)
    }

    pub fn state(&self) -> DerivationState {
        Runtime::state(self.inner.id)
    }
}

impl std::fmt::Debug for Reaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reaction")
            .field("name", &self.inner.name)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Handle returned by [`autorun`].
///
/// Dropping the disposer does not stop the reaction; call
/// [`dispose`](Self::dispose).
#[derive(Debug, Clone)]
pub struct Disposer {
    reaction: Reaction,
}

impl Disposer {
    /// Stop the reaction for good.
    pub fn dispose(&self) {
        self.reaction.dispose();
    }

    pub fn reaction(&self) -> &Reaction {
        &self.reaction
    }

    /// Turn the disposer into a plain closure.
    pub fn into_fn(self) -> impl Fn() {
        move || self.dispose()
    }
}

/// Create a reaction, run it once, and return its disposer.
///
/// # Example
///
/// ```rust,ignore
/// let name = Observable::new("Ada".to_string());
/// let n = name.clone();
/// let disposer = autorun(move || println!("hello {}", n.get()));
/// name.set("Grace".into());
/// disposer.dispose();
/// ```
pub fn autorun<F>(body: F) -> Disposer
where
    F: Fn() + 'static,
{
    let id = DerivationId::new();
    Disposer {
        reaction: Reaction::build(id, format!("Autorun@{}", id.raw()), body).started(),
    }
}

/// Like [`autorun`], with a debug name.
pub fn autorun_named<F>(name: impl Into<String>, body: F) -> Disposer
where
    F: Fn() + 'static,
{
    Disposer {
        reaction: Reaction::named(name, body),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{batch, Observable};

    fn counter() -> (Rc<Cell<usize>>, impl Fn() + 'static) {
        let count = Rc::new(Cell::new(0));
        let c = count.clone();
        (count, move || c.set(c.get() + 1))
    }

    #[test]
    fn reaction_runs_on_creation() {
        let (count, bump) = counter();
        let reaction = Reaction::new(bump);

        // Reaction should have run once on creation
        assert_eq!(count.get(), 1);
        assert_eq!(reaction.run_count(), 1);
        reaction.dispose();
    }

    #[test]
    fn lazy_reaction_does_not_run_on_creation() {
        let (count, bump) = counter();
        let reaction = Reaction::new_lazy("lazy", bump);

        assert_eq!(count.get(), 0);
        assert_eq!(reaction.state(), DerivationState::NotTracking);

        reaction.execute();
        assert_eq!(count.get(), 1);
        assert_eq!(reaction.state(), DerivationState::UpToDate);
        reaction.dispose();
    }

    #[test]
    fn reaction_runs_on_schedule() {
        let (count, bump) = counter();
        let reaction = Reaction::new(bump);

        reaction.schedule();
        assert_eq!(count.get(), 2);

        // Inside a batch the run waits for the close.
        batch(|| {
            reaction.schedule();
            reaction.schedule();
            assert_eq!(count.get(), 2);
        });
        assert_eq!(count.get(), 3);
        reaction.dispose();
    }

    #[test]
    fn reaction_does_not_run_after_disposal() {
        let cell = Observable::new(0);
        let (count, bump) = counter();
        let c = cell.clone();
        let reaction = Reaction::new(move || {
            c.get();
            bump();
        });

        reaction.dispose();
        assert!(reaction.is_disposed());
        assert_eq!(reaction.state(), DerivationState::NotTracking);
        assert_eq!(cell.observer_count(), 0);

        cell.set(1);
        reaction.schedule();
        reaction.execute();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn reaction_clone_shares_state() {
        let reaction1 = Reaction::new(|| {});
        let reaction2 = reaction1.clone();

        assert_eq!(reaction1.id(), reaction2.id());

        reaction1.execute();
        assert_eq!(reaction2.run_count(), 2);

        reaction1.dispose();
        assert!(reaction2.is_disposed());
    }

    #[test]
    fn panicking_body_keeps_dependencies_read_before_the_panic() {
        let cell = Observable::new(0);
        let c = cell.clone();
        let reaction = Reaction::named("fails", move || {
            if c.get() == 1 {
                panic!("one is not allowed");
            }
        });

        cell.set(1);
        assert_eq!(reaction.run_count(), 2);
        assert_eq!(cell.observer_count(), 1);

        // Still usable after the failure.
        cell.set(2);
        assert_eq!(reaction.run_count(), 3);
        reaction.dispose();
    }

    #[test]
    fn disposer_closure_disposes() {
        let cell = Observable::new(0);
        let c = cell.clone();
        let disposer = autorun_named("named", move || {
            c.get();
        });
        assert_eq!(disposer.reaction().name(), "named");

        let reaction = disposer.reaction().clone();
        let dispose = disposer.into_fn();
        dispose();
        dispose();
        assert!(reaction.is_disposed());
        assert_eq!(cell.observer_count(), 0);
    }

    #[test]
    fn disposal_releases_the_runtime_reference() {
        let before = Runtime::stats().reactions;
        let disposer = autorun(|| {});
        assert_eq!(Runtime::stats().reactions, before + 1);
        disposer.dispose();
        assert_eq!(Runtime::stats().reactions, before);
    }
}
