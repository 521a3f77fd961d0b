//! Dependency Graph
//!
//! This module holds the data side of the runtime: the bipartite graph that
//! links observables to the derivations that read them, and the scheduler
//! that queues stale reactions.
//!
//! # Overview
//!
//! - Observable nodes stand for anything a derivation can read: a cell, a
//!   record field, a registry key, or the output of a computed value.
//! - Derivation nodes stand for reactions and computed values.
//! - An edge from observable O to derivation D exists exactly when D's last
//!   run read O. It is stored on both sides.
//!
//! When an observable changes, its observers are marked stale. Computed
//! observers relay a weaker "possibly stale" mark to their own observers,
//! which is confirmed or cleared when somebody next needs the value.
//!
//! # Design Decisions
//!
//! 1. Nodes live in a central arena indexed by ID, so edges are plain IDs
//!    and there are no reference cycles between user handles.
//!
//! 2. Nothing in this module calls user code. The runtime collects
//!    derivation handles from the graph, releases its borrow, and only then
//!    invokes them.

mod arena;
mod node;
mod scheduler;

pub use arena::DependencyGraph;
pub use node::{
    DerivationId, DerivationKind, DerivationNode, DerivationState, ObservableId, ObservableNode,
};
pub use scheduler::Scheduler;
