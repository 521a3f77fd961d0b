//! Dependency Graph Arena
//!
//! All nodes live in two maps keyed by ID. Edges are stored in both
//! directions (an observable's observer set and a derivation's dependency
//! list) and every operation that touches one side touches the other, so
//! neither side ever holds a dangling one-sided edge.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use super::node::{
    DependencyList, DerivationId, DerivationKind, DerivationNode, DerivationState, ObservableId,
    ObservableNode,
};
use crate::reactive::Derivation;

/// Arena holding every observable and derivation of one runtime.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    observables: HashMap<ObservableId, ObservableNode>,
    derivations: HashMap<DerivationId, DerivationNode>,
}

impl DependencyGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_observable(&mut self, node: ObservableNode) {
        self.observables.insert(node.id(), node);
    }

    pub fn insert_derivation(&mut self, node: DerivationNode) {
        self.derivations.insert(node.id(), node);
    }

    pub fn derivation(&self, id: DerivationId) -> Option<&DerivationNode> {
        self.derivations.get(&id)
    }

    /// Remove an observable and every edge pointing at it.
    pub fn remove_observable(&mut self, id: ObservableId) -> Option<ObservableNode> {
        let node = self.observables.remove(&id)?;
        for derivation in node.observers() {
            if let Some(d) = self.derivations.get_mut(derivation) {
                d.forget(id);
            }
        }
        Some(node)
    }

    /// Remove a derivation and every edge it holds.
    ///
    /// The returned node may own the derivation itself, so callers drop it
    /// only after releasing any borrow of the graph.
    pub fn remove_derivation(&mut self, id: DerivationId) -> Option<DerivationNode> {
        let node = self.derivations.remove(&id)?;
        for observable in node.all_edges() {
            if let Some(o) = self.observables.get_mut(&observable) {
                o.remove_observer(id);
            }
        }
        Some(node)
    }

    /// Start a run of `id`. Returns `false` if the derivation is gone.
    pub fn begin_run(&mut self, id: DerivationId, run_id: u64) -> bool {
        match self.derivations.get_mut(&id) {
            Some(node) => {
                node.begin_run(run_id);
                true
            }
            None => false,
        }
    }

    /// Record that the running derivation read `observable`.
    ///
    /// The edge is added on both sides right away. Re-reads during the same
    /// run are skipped by comparing run identifiers. Returns whether the
    /// observable has any observers after the access.
    pub fn record_access(&mut self, derivation: DerivationId, observable: ObservableId) -> bool {
        let Some(d) = self.derivations.get_mut(&derivation) else {
            return false;
        };
        let Some(o) = self.observables.get_mut(&observable) else {
            return false;
        };
        if d.is_running() && o.accessed_by(d.run_id(), derivation) {
            d.push_dependency(observable);
        }
        !o.observers().is_empty()
    }

    /// Reconcile the dependencies of `id` after a run.
    ///
    /// Observables read during the run become the bound set. Observables
    /// bound before but not read this time lose `id` as an observer.
    /// Returns the number of edges removed.
    pub fn bind_dependencies(&mut self, id: DerivationId) -> usize {
        let Some(node) = self.derivations.get_mut(&id) else {
            return 0;
        };
        let Some(scratch) = node.take_scratch() else {
            return 0;
        };

        let mut seen = HashSet::with_capacity(scratch.len());
        let fresh: DependencyList = scratch.into_iter().filter(|o| seen.insert(*o)).collect();
        let dropped: Vec<ObservableId> = node
            .observing()
            .iter()
            .filter(|o| !seen.contains(*o))
            .copied()
            .collect();
        node.replace_observing(fresh);

        for observable in &dropped {
            if let Some(o) = self.observables.get_mut(observable) {
                o.remove_observer(id);
            }
        }
        dropped.len()
    }

    /// A dependency changed: up-to-date observers become stale, possibly
    /// stale observers are confirmed stale.
    ///
    /// Returns the observers that were up to date; only those need their
    /// "became stale" hook called.
    pub fn mark_stale(&mut self, observable: ObservableId) -> Vec<DerivationId> {
        let mut newly_stale = Vec::new();
        let Some(o) = self.observables.get(&observable) else {
            return newly_stale;
        };
        for id in o.observers() {
            let Some(d) = self.derivations.get_mut(id) else {
                continue;
            };
            match d.state() {
                DerivationState::UpToDate => {
                    d.set_state(DerivationState::Stale);
                    newly_stale.push(*id);
                }
                DerivationState::PossiblyStale => d.set_state(DerivationState::Stale),
                DerivationState::Stale | DerivationState::NotTracking => {}
            }
        }
        newly_stale
    }

    /// A computed dependency may have changed: up-to-date observers become
    /// possibly stale. Returns them.
    pub fn mark_possibly_stale(&mut self, observable: ObservableId) -> Vec<DerivationId> {
        let mut marked = Vec::new();
        let Some(o) = self.observables.get(&observable) else {
            return marked;
        };
        for id in o.observers() {
            if let Some(d) = self.derivations.get_mut(id) {
                if d.state() == DerivationState::UpToDate {
                    d.set_state(DerivationState::PossiblyStale);
                    marked.push(*id);
                }
            }
        }
        marked
    }

    /// A computed dependency did change: possibly stale observers become
    /// stale.
    pub fn confirm_stale(&mut self, observable: ObservableId) {
        let Some(o) = self.observables.get(&observable) else {
            return;
        };
        for id in o.observers() {
            if let Some(d) = self.derivations.get_mut(id) {
                if d.state() == DerivationState::PossiblyStale {
                    d.set_state(DerivationState::Stale);
                }
            }
        }
    }

    pub fn state(&self, id: DerivationId) -> Option<DerivationState> {
        self.derivations.get(&id).map(DerivationNode::state)
    }

    pub fn set_state(&mut self, id: DerivationId, state: DerivationState) {
        if let Some(d) = self.derivations.get_mut(&id) {
            d.set_state(state);
        }
    }

    pub fn handle(&self, id: DerivationId) -> Option<Rc<dyn Derivation>> {
        self.derivations.get(&id).and_then(DerivationNode::handle)
    }

    pub fn handles(&self, ids: &[DerivationId]) -> Vec<Rc<dyn Derivation>> {
        ids.iter().filter_map(|id| self.handle(*id)).collect()
    }

    /// Computed values among the bound dependencies of `id`, in read order.
    pub fn computed_dependencies(&self, id: DerivationId) -> Vec<DerivationId> {
        self.derivations
            .get(&id)
            .map(|d| {
                d.observing()
                    .iter()
                    .filter_map(|o| self.observables.get(o).and_then(ObservableNode::computed))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn observer_count(&self, observable: ObservableId) -> usize {
        self.observables
            .get(&observable)
            .map_or(0, |o| o.observers().len())
    }

    pub fn dependency_count(&self, derivation: DerivationId) -> usize {
        self.derivations
            .get(&derivation)
            .map_or(0, |d| d.observing().len())
    }

    pub fn observable_count(&self) -> usize {
        self.observables.len()
    }

    pub fn derivation_count(&self, kind: DerivationKind) -> usize {
        self.derivations.values().filter(|d| d.kind() == kind).count()
    }
}
