//! Observable Implementation
//!
//! An Observable is the fundamental reactive primitive. It holds a value and
//! an [`Atom`] that reports reads and changes to the runtime.
//!
//! # How Observables Work
//!
//! 1. When an observable is read within a derivation (computed value or
//!    reaction), the runtime records the derivation as an observer.
//!
//! 2. When the value is replaced by a different one, every observer is
//!    marked stale.
//!
//! 3. Stale reactions re-run once the current batch closes. Stale computed
//!    values recompute on their next read.
//!
//! Writing a value equal to the current one is a no-op.

use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

use crate::graph::ObservableId;

use super::atom::Atom;
use super::runtime::Runtime;

struct ObservableInner<T> {
    atom: Atom,
    value: RefCell<T>,
}

/// A reactive cell holding a value of type T.
///
/// # Type Parameters
///
/// - `T`: The type of value stored in the cell. `PartialEq` decides whether
///   a write is a change.
///
/// Cloning the handle shares the cell.
///
/// # Example
///
/// ```rust,ignore
/// let count = Observable::new(0);
///
/// // Read the value
/// let value = count.get();
///
/// // Update the value (marks observers stale)
/// count.set(5);
/// ```
pub struct Observable<T>
where
    T: Clone + PartialEq + 'static,
{
    inner: Rc<ObservableInner<T>>,
}

impl<T> Observable<T>
where
    T: Clone + PartialEq + 'static,
{
    /// Create a new cell with the given initial value.
    pub fn new(value: T) -> Self {
        Self::from_atom(Atom::unnamed("Observable"), value)
    }

    /// Create a new cell with a debug name.
    pub fn named(name: impl Into<String>, value: T) -> Self {
        Self::from_atom(Atom::new(name), value)
    }

    fn from_atom(atom: Atom, value: T) -> Self {
        Self {
            inner: Rc::new(ObservableInner {
                atom,
                value: RefCell::new(value),
            }),
        }
    }

    pub fn id(&self) -> ObservableId {
        self.inner.atom.id()
    }

    pub fn name(&self) -> &str {
        self.inner.atom.name()
    }

    /// Get the current value.
    ///
    /// If called within a derivation, this also records the derivation as
    /// an observer.
    pub fn get(&self) -> T {
        self.inner.atom.report_observed();
        self.inner.value.borrow().clone()
    }

    /// Record a read without cloning the value.
    ///
    /// Returns whether any derivation observes this cell.
    pub fn track(&self) -> bool {
        self.inner.atom.report_observed()
    }

    /// Get the current value without recording a dependency.
    pub fn get_untracked(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Call `f` with the current value, recording a dependency.
    ///
    /// `f` sees a snapshot, so it may write to this cell.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.atom.report_observed();
        let value = self.inner.value.borrow().clone();
        f(&value)
    }

    /// Replace the value and notify observers.
    ///
    /// Returns `false`, and notifies nobody, if the new value equals the
    /// current one.
    pub fn set(&self, value: T) -> bool {
        if *self.inner.value.borrow() == value {
            return false;
        }
        Runtime::check_state_change(self.name());
        let previous = self.inner.value.replace(value);
        self.inner.atom.report_changed();
        drop(previous);
        true
    }

    /// Update the value using a function.
    ///
    /// The current value is read without recording a dependency.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&T) -> T,
    {
        let next = f(&self.inner.value.borrow());
        self.set(next)
    }

    /// Number of derivations whose latest run read this cell.
    pub fn observer_count(&self) -> usize {
        self.inner.atom.observer_count()
    }

    pub(crate) fn atom(&self) -> &Atom {
        &self.inner.atom
    }

    /// Whether both handles share the same cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Clone for Observable<T>
where
    T: Clone + PartialEq + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Observable<T>
where
    T: Clone + PartialEq + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observable")
            .field("name", &self.name())
            .field("value", &*self.inner.value.borrow())
            .field("observer_count", &self.observer_count())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
