//! Atoms
//!
//! An atom is the smallest observable: it holds no value, it only reports
//! reads and changes to the runtime. [`Observable`](super::Observable),
//! record fields and registry keys are built on top of it, and hosts can use
//! one directly to make their own data structures observable.

use std::fmt;

use crate::graph::{DerivationId, ObservableId, ObservableNode};

use super::runtime::Runtime;

/// A named, value-less observable.
///
/// Dropping the atom removes it, and every edge to it, from the graph.
pub struct Atom {
    id: ObservableId,
    name: String,
}

impl Atom {
    /// Create an atom with a debug name.
    pub fn new(name: impl Into<String>) -> Self {
        let id = ObservableId::new();
        let name = name.into();
        Runtime::register_observable(ObservableNode::new(id, name.clone()));
        Self { id, name }
    }

    /// Create an atom named `<kind>@<id>`.
    pub fn unnamed(kind: &str) -> Self {
        let id = ObservableId::new();
        let name = format!("{kind}@{}", id.raw());
        Runtime::register_observable(ObservableNode::new(id, name.clone()));
        Self { id, name }
    }

    /// Create the observable side of a computed value.
    pub(crate) fn for_computed(name: impl Into<String>, computed: DerivationId) -> Self {
        let id = ObservableId::new();
        let name = name.into();
        Runtime::register_observable(ObservableNode::for_computed(id, name.clone(), computed));
        Self { id, name }
    }

    pub fn id(&self) -> ObservableId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record a read by the running derivation, if any.
    ///
    /// Returns whether any derivation observes this atom afterwards.
    pub fn report_observed(&self) -> bool {
        Runtime::report_observed(self.id)
    }

    /// Tell every observer that this atom changed.
    pub fn report_changed(&self) {
        Runtime::report_changed(self.id);
    }

    /// Number of derivations whose latest run read this atom.
    pub fn observer_count(&self) -> usize {
        Runtime::observer_count(self.id)
    }
}

impl Drop for Atom {
    fn drop(&mut self) {
        Runtime::release_observable(self.id);
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atom")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atoms_register_and_release() {
        let before = Runtime::stats().observables;
        let atom = Atom::new("ticks");
        assert_eq!(atom.name(), "ticks");
        assert_eq!(Runtime::stats().observables, before + 1);

        drop(atom);
        assert_eq!(Runtime::stats().observables, before);
    }

    #[test]
    fn unnamed_atoms_embed_their_id() {
        let atom = Atom::unnamed("cell");
        assert_eq!(atom.name(), format!("cell@{}", atom.id().raw()));
    }

    #[test]
    fn reads_outside_derivations_are_not_recorded() {
        let atom = Atom::new("plain");
        assert!(!atom.report_observed());
        assert_eq!(atom.observer_count(), 0);
        // A change with no observers is a no-op.
        atom.report_changed();
    }
}
