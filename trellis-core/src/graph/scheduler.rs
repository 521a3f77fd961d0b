//! Reaction Scheduler
//!
//! The scheduler holds the bookkeeping that decides *when* stale reactions
//! run. It owns no user code; the runtime asks it questions and acts on the
//! answers.
//!
//! # Algorithm
//!
//! 1. A write opens an implicit batch. Explicit batches and actions nest.
//! 2. A reaction that becomes stale while a batch is open, or while the
//!    flush loop is already running, is queued.
//! 3. When the outermost batch closes, the runtime drains the queue in
//!    insertion order. Reactions queued during the flush are picked up by
//!    the next pass of the same flush.
//!
//! A reaction is queued at most once per pass: the pending set is an
//! [`IndexSet`], so a second enqueue keeps the original position.

use indexmap::IndexSet;

use super::node::DerivationId;

/// Batch depth, flush flag and pending reaction queue of one runtime.
#[derive(Debug, Default)]
pub struct Scheduler {
    /// Number of open batches.
    depth: usize,

    /// Set while the flush loop drains the queue.
    running: bool,

    /// Reactions waiting for the flush, in first-scheduled order.
    pending: IndexSet<DerivationId>,
}

impl Scheduler {
    /// Create a new idle scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_batch(&mut self) {
        self.depth += 1;
    }

    /// Close a batch. Returns `true` if it was the outermost one.
    ///
    /// Unbalanced calls are tolerated and leave the depth at zero.
    pub fn end_batch(&mut self) -> bool {
        match self.depth {
            0 => false,
            1 => {
                self.depth = 0;
                true
            }
            _ => {
                self.depth -= 1;
                false
            }
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_batching(&self) -> bool {
        self.depth > 0
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    /// Whether a newly stale reaction has to wait instead of running now.
    pub fn must_defer(&self) -> bool {
        self.is_batching() || self.running
    }

    /// Queue a reaction. Returns `false` if it was already queued.
    pub fn enqueue(&mut self, id: DerivationId) -> bool {
        self.pending.insert(id)
    }

    /// Drop a reaction from the queue, keeping the order of the rest.
    pub fn remove(&mut self, id: DerivationId) -> bool {
        self.pending.shift_remove(&id)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Take the whole queue for one flush pass.
    pub fn take_pending(&mut self) -> Vec<DerivationId> {
        self.pending.drain(..).collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
