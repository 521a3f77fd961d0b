//! Computed Implementation
//!
//! A Computed is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Computed Values Work
//!
//! 1. Nothing runs at creation. On first access, the computation runs and
//!    its result is cached.
//!
//! 2. When accessed again, if no dependencies have changed, the cached
//!    value is returned.
//!
//! 3. When a direct dependency changes, the value is marked stale and its
//!    own observers are marked possibly stale.
//!
//! 4. On next access (or when an observer needs to know), a stale value is
//!    recomputed. If the result equals the previous one, observers that were
//!    only possibly stale go back to up-to-date without running.
//!
//! A Computed is both a derivation (it observes its inputs) and an
//! observable (other derivations observe it).

use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use tracing::{error, trace};

use crate::error::ReactiveError;
use crate::graph::{DerivationId, DerivationNode, DerivationState, ObservableId};

use super::atom::Atom;
use super::context::ReactiveContext;
use super::runtime::{Derivation, Runtime};

struct ComputedInner<T> {
    id: DerivationId,
    atom: Atom,
    compute: Box<dyn Fn() -> T>,

    /// Result of the latest evaluation. Failures are cached too, until an
    /// input changes.
    cached: RefCell<Option<Result<T, ReactiveError>>>,

    evaluating: Cell<bool>,
    compute_count: Cell<usize>,
}

impl<T> ComputedInner<T>
where
    T: Clone + PartialEq + 'static,
{
    fn name(&self) -> &str {
        self.atom.name()
    }

    fn cycle(&self) -> ReactiveError {
        ReactiveError::ComputedCycle {
            name: self.name().to_string(),
        }
    }

    /// Recompute if an input changed since the last evaluation.
    fn refresh_if_stale(&self) -> Result<(), ReactiveError> {
        if self.evaluating.get() {
            return Err(self.cycle());
        }
        if Runtime::should_compute(self.id) || self.cached.borrow().is_none() {
            self.recompute();
        }
        Ok(())
    }

    /// Run the computation and cache the result.
    ///
    /// Returns whether the cached result changed.
    fn recompute(&self) -> bool {
        self.evaluating.set(true);
        let result = {
            let _forbid = ReactiveContext::forbid_state_changes();
            Runtime::track(self.id, || (self.compute)())
        };
        self.evaluating.set(false);
        self.compute_count.set(self.compute_count.get() + 1);

        if let Err(err) = &result {
            error!(derivation = %self.name(), error = %err, "computed value failed");
        }

        let changed = match (&*self.cached.borrow(), &result) {
            (Some(Ok(previous)), Ok(next)) => previous != next,
            _ => true,
        };
        let previous = self.cached.replace(Some(result));
        trace!(derivation = %self.name(), changed, "recomputed");

        if changed {
            Runtime::propagate_changed_confirmed(self.atom.id());
        }
        drop(previous);
        changed
    }

    fn read(&self) -> Result<T, ReactiveError> {
        match &*self.cached.borrow() {
            Some(result) => result.clone(),
            None => Err(self.cycle()),
        }
    }
}

impl<T> Derivation for ComputedInner<T>
where
    T: Clone + PartialEq + 'static,
{
    fn on_become_stale(&self) {
        Runtime::propagate_maybe_changed(self.atom.id());
    }

    fn run_scheduled(&self) {}

    fn confirm(&self) {
        // A cycle here is reported to whoever reads the value.
        let _ = self.refresh_if_stale();
    }
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        Runtime::release_derivation(self.id);
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// # Type Parameters
///
/// - `T`: The type of the computed value. `PartialEq` decides whether a
///   recomputation changed anything for the observers.
///
/// Cloning the handle shares the cache. The value is released when the last
/// handle is dropped.
///
/// # Example
///
/// ```rust,ignore
/// let price = Observable::new(10);
/// let quantity = Observable::new(3);
///
/// let (p, q) = (price.clone(), quantity.clone());
/// let total = computed(move || p.get() * q.get());
///
/// assert_eq!(total.get(), 30);  // computes
/// assert_eq!(total.get(), 30);  // cached
/// ```
pub struct Computed<T>
where
    T: Clone + PartialEq + 'static,
{
    inner: Rc<ComputedInner<T>>,
}

impl<T> Computed<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Create a new computed value. The function does not run yet.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        let id = DerivationId::new();
        Self::build(id, format!("Computed@{}", id.raw()), compute)
    }

    /// Create a new computed value with a debug name.
    pub fn named<F>(name: impl Into<String>, compute: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::build(DerivationId::new(), name.into(), compute)
    }

    fn build<F>(id: DerivationId, name: String, compute: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        let inner = Rc::new(ComputedInner {
            id,
            atom: Atom::for_computed(name.clone(), id),
            compute: Box::new(compute),
            cached: RefCell::new(None),
            evaluating: Cell::new(false),
            compute_count: Cell::new(0),
        });
        let weak: Weak<ComputedInner<T>> = Rc::downgrade(&inner);
        let handle: Weak<dyn Derivation> = weak;
        Runtime::register_derivation(DerivationNode::computed(id, name, handle));
        Self { inner }
    }

    pub fn id(&self) -> DerivationId {
        self.inner.id
    }

    /// ID of the observable side, the node other derivations depend on.
    pub fn observable_id(&self) -> ObservableId {
        self.inner.atom.id()
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Get the value, recomputing it if an input changed.
    ///
    /// If called within a derivation, this also records the derivation as
    /// an observer.
    ///
    /// # Panics
    ///
    /// Panics if the computation panicked, or if the value reads itself
    /// while being computed. Inside a reaction the panic is caught and
    /// logged like any other failure of the reaction. Use
    /// [`try_get`](Self::try_get) to handle the error instead.
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Get the value, or the error of its latest evaluation.
    pub fn try_get(&self) -> Result<T, ReactiveError> {
        if self.inner.evaluating.get() {
            return Err(self.inner.cycle());
        }
        self.inner.atom.report_observed();
        self.inner.refresh_if_stale()?;
        self.inner.read()
    }

    /// Force a recomputation and return the new value.
    ///
    /// Observers are notified if the result changed.
    pub fn refresh(&self) -> T {
        if !self.inner.evaluating.get() {
            Runtime::set_state(self.inner.id, DerivationState::Stale);
            if self.inner.recompute() {
                self.inner.atom.report_changed();
            }
        }
        self.get()
    }

    /// Whether the next read will recompute.
    pub fn is_dirty(&self) -> bool {
        self.inner.cached.borrow().is_none()
            || matches!(
                self.state(),
                DerivationState::Stale | DerivationState::NotTracking
            )
    }

    pub fn state(&self) -> DerivationState {
        Runtime::state(self.inner.id)
    }

    /// Get the number of times the computation has run.
    pub fn compute_count(&self) -> usize {
        self.inner.compute_count.get()
    }

    /// Number of derivations whose latest run read this value.
    pub fn observer_count(&self) -> usize {
        self.inner.atom.observer_count()
    }

    /// Get the number of observables read by the latest evaluation.
    pub fn dependency_count(&self) -> usize {
        Runtime::dependency_count(self.inner.id)
    }
}

impl<T> Clone for Computed<T>
where
    T: Clone + PartialEq + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Computed<T>
where
    T: Clone + PartialEq + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("name", &self.name())
            .field("cached", &*self.inner.cached.borrow())
            .field("state", &self.state())
            .field("compute_count", &self.compute_count())
            .finish()
    }
}

/// Create a computed value.
pub fn computed<T, F>(compute: F) -> Computed<T>
where
    T: Clone + PartialEq + 'static,
    F: Fn() -> T + 'static,
{
    Computed::new(compute)
}

/// Create a computed value with a debug name.
pub fn computed_named<T, F>(name: impl Into<String>, compute: F) -> Computed<T>
where
    T: Clone + PartialEq + 'static,
    F: Fn() -> T + 'static,
{
    Computed::named(name, compute)
}

// ============================================================================
// Tests
// ============================================================================
