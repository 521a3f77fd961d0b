//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects observables,
//! computed values, and reactions. It owns the dependency graph and the
//! reaction scheduler, and it is the only place where both meet.
//!
//! # How It Works
//!
//! 1. When an observable is read, the runtime records an edge from it to
//!    the derivation in the current [`ReactiveContext`].
//!
//! 2. When an observable changes, the runtime opens an implicit batch and:
//!    a. Marks up-to-date observers stale
//!    b. Computed observers relay "possibly stale" to their own observers
//!    c. Reactions enqueue themselves
//!    d. Computed values stay lazy, they recompute on next access
//!
//! 3. When the outermost batch closes, queued reactions run in the order
//!    they were first scheduled. A reaction that was only possibly stale
//!    first asks its computed dependencies to confirm; if none of them
//!    actually changed, it does not run.
//!
//! # Threading
//!
//! All state is thread-local. Every handle of this crate is `!Send`, so a
//! graph never spans two threads and no locking is needed.

use std::cell::{Cell, RefCell};
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::Serialize;
use tracing::{error, trace, warn};

use super::batch::Batch;
use super::context::ReactiveContext;
use super::registry;
use crate::config::RuntimeConfig;
use crate::error::{panic_message, ReactiveError};
use crate::graph::{
    DependencyGraph, DerivationId, DerivationKind, DerivationNode, DerivationState, ObservableId,
    ObservableNode, Scheduler,
};

/// A node that can be told its inputs changed.
///
/// Implemented by the shared state behind [`Reaction`](super::Reaction) and
/// [`Computed`](super::Computed). The graph stores these handles and the
/// runtime invokes them once it no longer borrows the graph.
pub trait Derivation {
    /// Called when the node moves from up-to-date to (possibly) stale.
    fn on_become_stale(&self);

    /// Run the node if it still needs to. Reactions only.
    fn run_scheduled(&self);

    /// Bring a computed value up to date. Reactions ignore this.
    fn confirm(&self) {}
}

/// Snapshot of the runtime's size, for hosts and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuntimeStats {
    pub observables: usize,
    pub reactions: usize,
    pub computeds: usize,
    pub pending_reactions: usize,
    pub batch_depth: usize,
    pub registry_owners: usize,
}

struct RuntimeState {
    graph: RefCell<DependencyGraph>,
    scheduler: RefCell<Scheduler>,
    config: RefCell<RuntimeConfig>,
    run_id: Cell<u64>,
}

thread_local! {
    static STATE: RuntimeState = RuntimeState {
        graph: RefCell::new(DependencyGraph::new()),
        scheduler: RefCell::new(Scheduler::new()),
        config: RefCell::new(RuntimeConfig::default()),
        run_id: Cell::new(0),
    };
}

fn with_graph<R>(f: impl FnOnce(&mut DependencyGraph) -> R) -> R {
    STATE.with(|state| f(&mut state.graph.borrow_mut()))
}

fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    STATE.with(|state| f(&mut state.scheduler.borrow_mut()))
}

/// Clears the flush flag even if the loop exits early.
struct FlushGuard;

impl FlushGuard {
    fn set() -> Self {
        with_scheduler(|s| s.set_running(true));
        FlushGuard
    }
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        let _ = STATE.try_with(|state| state.scheduler.borrow_mut().set_running(false));
    }
}

/// The per-thread reactive runtime.
///
/// All methods are associated functions over thread-local state.
pub struct Runtime;

impl Runtime {
    // ------------------------------------------------------------------
    // Configuration and introspection
    // ------------------------------------------------------------------

    /// Install a configuration for the current thread.
    pub fn configure(config: RuntimeConfig) {
        STATE.with(|state| *state.config.borrow_mut() = config);
    }

    /// The configuration of the current thread.
    pub fn config() -> RuntimeConfig {
        STATE.with(|state| state.config.borrow().clone())
    }

    pub fn stats() -> RuntimeStats {
        let (observables, reactions, computeds) = with_graph(|g| {
            (
                g.observable_count(),
                g.derivation_count(DerivationKind::Reaction),
                g.derivation_count(DerivationKind::Computed),
            )
        });
        let (pending_reactions, batch_depth) = with_scheduler(|s| (s.pending_len(), s.depth()));
        RuntimeStats {
            observables,
            reactions,
            computeds,
            pending_reactions,
            batch_depth,
            registry_owners: registry::owner_count(),
        }
    }

    /// Check if a derivation is currently recording reads.
    pub fn is_tracking() -> bool {
        ReactiveContext::is_active()
    }

    /// Get the derivation currently recording reads, if any.
    pub fn current_derivation() -> Option<DerivationId> {
        ReactiveContext::current_derivation()
    }

    pub fn batch_depth() -> usize {
        with_scheduler(|s| s.depth())
    }

    pub fn is_batching() -> bool {
        with_scheduler(|s| s.is_batching())
    }

    /// Whether the flush loop is draining the reaction queue.
    pub fn is_running_reactions() -> bool {
        with_scheduler(|s| s.is_running())
    }

    pub fn state_changes_allowed() -> bool {
        ReactiveContext::state_changes_allowed()
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    pub(crate) fn register_observable(node: ObservableNode) {
        with_graph(|g| g.insert_observable(node));
    }

    /// Drop an observable and its edges. Safe to call from `Drop`.
    pub(crate) fn release_observable(id: ObservableId) {
        let _ = STATE.try_with(|state| {
            if let Ok(mut graph) = state.graph.try_borrow_mut() {
                graph.remove_observable(id);
            }
        });
    }

    pub(crate) fn register_derivation(node: DerivationNode) {
        with_graph(|g| g.insert_derivation(node));
    }

    /// Drop a computed value's node and its edges. Safe to call from `Drop`.
    pub(crate) fn release_derivation(id: DerivationId) {
        let _ = STATE.try_with(|state| {
            if let Ok(mut scheduler) = state.scheduler.try_borrow_mut() {
                scheduler.remove(id);
            }
            let node = match state.graph.try_borrow_mut() {
                Ok(mut graph) => graph.remove_derivation(id),
                Err(_) => None,
            };
            drop(node);
        });
    }

    // ------------------------------------------------------------------
    // Reads and writes
    // ------------------------------------------------------------------

    /// Record a read of `id` by the current derivation, if any.
    ///
    /// Returns whether any derivation observes `id` afterwards.
    pub(crate) fn report_observed(id: ObservableId) -> bool {
        match ReactiveContext::current_derivation() {
            Some(derivation) => with_graph(|g| g.record_access(derivation, id)),
            None => with_graph(|g| g.observer_count(id) > 0),
        }
    }

    /// Propagate a change of `id` to its observers.
    ///
    /// Each change is its own batch, so reactions observing several paths
    /// to `id` still run once and only after every mark has been placed.
    pub(crate) fn report_changed(id: ObservableId) {
        let _batch = Batch::start();
        let stale = with_graph(|g| {
            let ids = g.mark_stale(id);
            g.handles(&ids)
        });
        for derivation in stale {
            derivation.on_become_stale();
        }
    }

    /// The computed value behind `id` may have changed.
    pub(crate) fn propagate_maybe_changed(id: ObservableId) {
        let marked = with_graph(|g| {
            let ids = g.mark_possibly_stale(id);
            g.handles(&ids)
        });
        for derivation in marked {
            derivation.on_become_stale();
        }
    }

    /// A computed value recomputed to a different result.
    pub(crate) fn propagate_changed_confirmed(id: ObservableId) {
        with_graph(|g| g.confirm_stale(id));
    }

    /// Report a write to `name` if writes are not allowed right now.
    ///
    /// Returns `false` if the write was reported. It is applied either way.
    pub(crate) fn check_state_change(name: &str) -> bool {
        let outside_action = STATE.with(|state| state.config.borrow().enforce_actions)
            && !Self::is_batching();
        if ReactiveContext::state_changes_allowed() && !outside_action {
            return true;
        }
        let err = ReactiveError::StateChangeNotAllowed {
            name: name.to_string(),
        };
        warn!(observable = name, outside_action, "{err}");
        false
    }

    // ------------------------------------------------------------------
    // Derivation lifecycle
    // ------------------------------------------------------------------

    pub(crate) fn derivation_name(id: DerivationId) -> String {
        with_graph(|g| {
            g.derivation(id)
                .map(|d| d.name().to_string())
                .unwrap_or_default()
        })
    }

    pub(crate) fn state(id: DerivationId) -> DerivationState {
        with_graph(|g| g.state(id)).unwrap_or(DerivationState::NotTracking)
    }

    pub(crate) fn set_state(id: DerivationId, state: DerivationState) {
        with_graph(|g| g.set_state(id, state));
    }

    pub(crate) fn dependency_count(id: DerivationId) -> usize {
        with_graph(|g| g.dependency_count(id))
    }

    pub(crate) fn observer_count(id: ObservableId) -> usize {
        with_graph(|g| g.observer_count(id))
    }

    /// Run `f` as derivation `id`, recording its reads.
    ///
    /// Writes made by `f` are batched until the run completes. The previous
    /// context is restored and the dependencies read so far are bound even
    /// if `f` panics; the panic comes back as an error.
    pub(crate) fn track<R>(id: DerivationId, f: impl FnOnce() -> R) -> Result<R, ReactiveError> {
        let _batch = Batch::start();
        let run_id = STATE.with(|state| {
            let next = state.run_id.get() + 1;
            state.run_id.set(next);
            next
        });
        with_graph(|g| g.begin_run(id, run_id));

        let result = {
            let _ctx = ReactiveContext::enter(id);
            catch_unwind(AssertUnwindSafe(f))
        };

        let dropped = with_graph(|g| g.bind_dependencies(id));
        trace!(derivation = id.raw(), run_id, dropped, "bound dependencies");

        result.map_err(|payload| ReactiveError::DerivationPanicked {
            name: Self::derivation_name(id),
            message: panic_message(payload.as_ref()),
        })
    }

    /// Decide whether derivation `id` has to run.
    ///
    /// A possibly stale derivation confirms its computed dependencies in
    /// read order and only runs if one of them actually changed.
    pub(crate) fn should_compute(id: DerivationId) -> bool {
        match Self::state(id) {
            DerivationState::UpToDate => false,
            DerivationState::NotTracking | DerivationState::Stale => {
                with_graph(|g| g.derivation(id).is_some())
            }
            DerivationState::PossiblyStale => {
                let _ctx = ReactiveContext::untracked();
                let computeds = with_graph(|g| {
                    let ids = g.computed_dependencies(id);
                    g.handles(&ids)
                });
                for computed in computeds {
                    computed.confirm();
                    if Self::state(id) == DerivationState::Stale {
                        return true;
                    }
                }
                Self::set_state(id, DerivationState::UpToDate);
                false
            }
        }
    }

    /// Run a stale reaction now, or queue it if a batch or flush is open.
    pub(crate) fn schedule(id: DerivationId) {
        let deferred = with_scheduler(|s| {
            if s.must_defer() {
                s.enqueue(id);
                true
            } else {
                false
            }
        });
        if deferred {
            return;
        }
        if let Some(reaction) = with_graph(|g| g.handle(id)) {
            reaction.run_scheduled();
        }
    }

    /// Remove a reaction from the graph and the queue.
    ///
    /// Returns `false` if it was already gone.
    pub(crate) fn dispose(id: DerivationId) -> bool {
        with_scheduler(|s| s.remove(id));
        let node = with_graph(|g| g.remove_derivation(id));
        // Dropping the node may drop the reaction and everything its body
        // owns, so it happens after the graph borrow ends.
        node.is_some()
    }

    // ------------------------------------------------------------------
    // Batching
    // ------------------------------------------------------------------

    pub(crate) fn start_batch() {
        let depth = with_scheduler(|s| {
            s.start_batch();
            s.depth()
        });
        trace!(depth, "batch opened");
    }

    /// Close a batch. The outermost close flushes pending reactions.
    pub(crate) fn end_batch() {
        let outermost = match STATE.try_with(|state| state.scheduler.borrow_mut().end_batch()) {
            Ok(outermost) => outermost,
            Err(_) => return,
        };
        if outermost {
            trace!("outermost batch closed");
            Self::run_pending_reactions();
        }
    }

    /// Drain the reaction queue until it stays empty.
    ///
    /// Reactions queued while the flush runs are picked up by the next
    /// pass. After the configured number of passes the rest is dropped.
    fn run_pending_reactions() {
        if with_scheduler(|s| s.is_running()) {
            return;
        }
        let _flush = FlushGuard::set();
        // A limit of zero would drop every reaction on its first pass.
        let max_iterations =
            STATE.with(|state| state.config.borrow().max_reaction_iterations.max(1));

        let mut iterations = 0;
        loop {
            let pending = with_scheduler(|s| s.take_pending());
            if pending.is_empty() {
                break;
            }
            iterations += 1;
            if iterations > max_iterations {
                Self::abandon(pending, max_iterations);
                break;
            }
            trace!(pass = iterations, reactions = pending.len(), "flushing reactions");
            for id in pending {
                if let Some(reaction) = with_graph(|g| g.handle(id)) {
                    reaction.run_scheduled();
                }
            }
        }
    }

    /// Give up on a flush that keeps producing work.
    ///
    /// The dropped reactions are reset to up-to-date so that the next
    /// change of any of their dependencies schedules them again.
    fn abandon(pending: Vec<DerivationId>, iterations: usize) {
        let name = pending
            .first()
            .map(|id| Self::derivation_name(*id))
            .unwrap_or_default();
        let err = ReactiveError::ReactionsDidNotConverge { iterations, name };
        error!(dropped = pending.len(), "{err}");
        with_graph(|g| {
            for id in &pending {
                if g.state(*id).is_some() {
                    g.set_state(*id, DerivationState::UpToDate);
                }
            }
        });
    }

    #[cfg(test)]
    pub(crate) fn handle(id: DerivationId) -> Option<std::rc::Rc<dyn Derivation>> {
        with_graph(|g| g.handle(id))
    }
}

// ============================================================================
// Tests
// ============================================================================
