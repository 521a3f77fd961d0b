//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph:
//! one [`ObservableNode`] per trackable value and one [`DerivationNode`] per
//! reaction or computed value.

use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::reactive::Derivation;

/// Unique identifier for an observable node (a cell, a record field, a
/// registry key, or the observable side of a computed value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObservableId(u64);

impl ObservableId {
    /// Generate a new unique observable ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ObservableId {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique identifier for a derivation (reaction or computed value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DerivationId(u64);

impl DerivationId {
    /// Generate a new unique derivation ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for DerivationId {
    fn default() -> Self {
        Self::new()
    }
}

/// The kind of derivation a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DerivationKind {
    /// Eager side effect. Scheduled when a dependency changes.
    Reaction,

    /// Lazy memoized value. Marked dirty when a dependency changes and
    /// recomputed on the next read.
    Computed,
}

/// Staleness of a derivation with respect to its dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DerivationState {
    /// Never ran, or disposed. Holds no dependency edges.
    NotTracking,

    /// Ran against the current values of all dependencies.
    UpToDate,

    /// A computed dependency may have changed. Confirmed lazily by
    /// re-evaluating that dependency before deciding to re-run.
    PossiblyStale,

    /// A dependency definitely changed. Must re-run.
    Stale,
}

/// Dependency lists are short in practice.
pub type DependencyList = SmallVec<[ObservableId; 4]>;

/// A trackable value in the dependency graph.
pub struct ObservableNode {
    id: ObservableId,
    name: String,

    /// Derivations whose latest run read this value.
    /// Insertion-ordered so that propagation order is deterministic.
    observers: IndexSet<DerivationId>,

    /// Run identifier of the last derivation run that read this value.
    last_accessed_by: u64,

    /// Set when this node is the observable side of a computed value.
    computed: Option<DerivationId>,
}

impl ObservableNode {
    /// Create a node for a plain observable value.
    pub fn new(id: ObservableId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            observers: IndexSet::new(),
            last_accessed_by: 0,
            computed: None,
        }
    }

    /// Create the observable side of a computed value.
    pub fn for_computed(id: ObservableId, name: impl Into<String>, computed: DerivationId) -> Self {
        Self {
            computed: Some(computed),
            ..Self::new(id, name)
        }
    }

    pub fn id(&self) -> ObservableId {
        self.id
    }

    pub fn observers(&self) -> &IndexSet<DerivationId> {
        &self.observers
    }

    pub fn computed(&self) -> Option<DerivationId> {
        self.computed
    }

    /// Record an access by the run `run_id` of `derivation`.
    ///
    /// Returns `false` if this run already accessed the node, in which case
    /// no edge needs to be added.
    pub(crate) fn accessed_by(&mut self, run_id: u64, derivation: DerivationId) -> bool {
        if self.last_accessed_by == run_id {
            return false;
        }
        self.last_accessed_by = run_id;
        self.observers.insert(derivation);
        true
    }

    pub(crate) fn remove_observer(&mut self, derivation: DerivationId) -> bool {
        self.observers.shift_remove(&derivation)
    }
}

impl fmt::Debug for ObservableNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("observers", &self.observers)
            .field("computed", &self.computed)
            .finish()
    }
}

/// A reaction or computed value in the dependency graph.
pub struct DerivationNode {
    id: DerivationId,
    name: String,
    kind: DerivationKind,
    state: DerivationState,

    /// Observables read by the latest completed run.
    observing: DependencyList,

    /// Observables read so far by the run in progress.
    new_observing: Option<DependencyList>,

    /// Identifier of the latest run.
    run_id: u64,

    /// Callback into the derivation, used to schedule and confirm it.
    handle: Weak<dyn Derivation>,

    /// Reactions are owned by the graph until disposed. Computed values are
    /// owned by their handles and only referenced weakly. Never read; held
    /// only so that dropping the node drops the reaction.
    _keep_alive: Option<Rc<dyn Derivation>>,
}

impl DerivationNode {
    /// Create a reaction node. The graph keeps the reaction alive.
    pub fn reaction(id: DerivationId, name: impl Into<String>, handle: Rc<dyn Derivation>) -> Self {
        Self {
            id,
            name: name.into(),
            kind: DerivationKind::Reaction,
            state: DerivationState::NotTracking,
            observing: DependencyList::new(),
            new_observing: None,
            run_id: 0,
            handle: Rc::downgrade(&handle),
            _keep_alive: Some(handle),
        }
    }

    /// Create a computed node. The graph only holds a weak reference.
    pub fn computed(id: DerivationId, name: impl Into<String>, handle: Weak<dyn Derivation>) -> Self {
        Self {
            id,
            name: name.into(),
            kind: DerivationKind::Computed,
            state: DerivationState::NotTracking,
            observing: DependencyList::new(),
            new_observing: None,
            run_id: 0,
            handle,
            _keep_alive: None,
        }
    }

    pub fn id(&self) -> DerivationId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DerivationKind {
        self.kind
    }

    pub fn state(&self) -> DerivationState {
        self.state
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn observing(&self) -> &[ObservableId] {
        &self.observing
    }

    /// Whether a run is in progress (a scratch list is open).
    pub fn is_running(&self) -> bool {
        self.new_observing.is_some()
    }

    pub fn handle(&self) -> Option<Rc<dyn Derivation>> {
        self.handle.upgrade()
    }

    pub(crate) fn set_state(&mut self, state: DerivationState) {
        self.state = state;
    }

    /// Open a fresh scratch list for the run `run_id`.
    ///
    /// The state is set to up-to-date before the body runs, so reads the
    /// body makes of its own outputs see a fresh derivation.
    pub(crate) fn begin_run(&mut self, run_id: u64) {
        self.state = DerivationState::UpToDate;
        self.run_id = run_id;
        self.new_observing = Some(DependencyList::with_capacity(self.observing.len()));
    }

    pub(crate) fn push_dependency(&mut self, observable: ObservableId) {
        if let Some(scratch) = self.new_observing.as_mut() {
            scratch.push(observable);
        }
    }

    pub(crate) fn take_scratch(&mut self) -> Option<DependencyList> {
        self.new_observing.take()
    }

    pub(crate) fn replace_observing(&mut self, observing: DependencyList) {
        self.observing = observing;
    }

    /// Drop every reference to `observable`, used when it is released.
    pub(crate) fn forget(&mut self, observable: ObservableId) {
        self.observing.retain(|o| *o != observable);
        if let Some(scratch) = self.new_observing.as_mut() {
            scratch.retain(|o| *o != observable);
        }
    }

    /// All observables this node holds an edge to, bound or in progress.
    pub(crate) fn all_edges(&self) -> impl Iterator<Item = ObservableId> + '_ {
        self.observing
            .iter()
            .chain(self.new_observing.iter().flatten())
            .copied()
    }
}

impl fmt::Debug for DerivationNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivationNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("observing", &self.observing)
            .field("run_id", &self.run_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(ObservableId::new(), ObservableId::new());
        assert_ne!(DerivationId::new(), DerivationId::new());
    }

    #[test]
    fn access_is_recorded_once_per_run() {
        let mut node = ObservableNode::new(ObservableId::new(), "cell");
        let derivation = DerivationId::new();

        assert!(node.accessed_by(1, derivation));
        assert!(!node.accessed_by(1, derivation));
        assert!(node.accessed_by(2, derivation));
        assert_eq!(node.observers().len(), 1);
    }

    #[test]
    fn computed_node_links_back_to_derivation() {
        let derivation = DerivationId::new();
        let node = ObservableNode::for_computed(ObservableId::new(), "total", derivation);
        assert_eq!(node.computed(), Some(derivation));
        assert!(node.observers().is_empty());
    }
}
