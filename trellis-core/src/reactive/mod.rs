//! Reactive Primitives
//!
//! This module implements the core reactive system: observables, computed
//! values, and reactions, tied together by batches and actions.
//!
//! # Concepts
//!
//! ## Observables
//!
//! An Observable is a container for mutable state. When its value is read
//! while a derivation (computed value or reaction) runs, the runtime records
//! that derivation as an observer. When the value changes, all observers are
//! marked stale.
//!
//! [`ObservableObject`] applies the same idea to a keyed record, one cell per
//! field. [`Registry`] attaches it to data the crate does not own.
//!
//! ## Computed Values
//!
//! A Computed is a derived value that caches its result. It re-evaluates
//! only when one of its dependencies changed and somebody reads it.
//!
//! ## Reactions
//!
//! A Reaction is a side-effecting computation that re-runs whenever its
//! dependencies change. [`autorun`] creates one and returns a [`Disposer`].
//!
//! ## Batches and Actions
//!
//! Writes inside a [`batch`] or an [`action`] update values immediately but
//! hold reactions back until the outermost batch closes, so each reaction
//! runs once and sees every write.
//!
//! # Implementation Notes
//!
//! The runtime uses a thread-local tracking context to detect dependencies
//! automatically: every read asks the context which derivation is running
//! and, if there is one, records an edge in the dependency graph. Each run
//! rebuilds the derivation's edges from scratch, so a branch that is not
//! taken stops being a dependency.

mod atom;
mod batch;
mod computed;
mod context;
mod object;
mod observable;
mod reaction;
mod registry;
mod runtime;

pub use atom::Atom;
pub use batch::{
    action, action_named, action_with, batch, run_in_action, run_in_action_named, Batch,
};
pub use computed::{computed, computed_named, Computed};
pub use context::{untracked, ReactiveContext};
pub use object::{observable, observable_named, FieldValue, ObservableHandle, ObservableObject};
pub use observable::Observable;
pub use reaction::{autorun, autorun_named, Disposer, Reaction};
pub use registry::Registry;
pub use runtime::{Runtime, RuntimeStats};

pub(crate) use runtime::Derivation;

pub use crate::graph::{DerivationId, DerivationKind, DerivationState, ObservableId};
