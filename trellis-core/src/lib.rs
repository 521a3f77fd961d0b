//! Trellis Core
//!
//! This crate provides a fine-grained reactive runtime. It implements:
//!
//! - Observable state (cells, keyed records, and adapters for host data)
//! - Memoized computed values that recompute lazily
//! - Reactions that re-run when, and only when, what they read changes
//! - Batches and actions that coalesce many writes into one propagation
//!
//! Dependencies are discovered automatically: whatever a derivation reads
//! during its latest run is what it depends on.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Public primitives and the per-thread runtime
//! - `graph`: Dependency graph and reaction scheduler (internal)
//! - `config`: Runtime configuration
//! - `error`: Error types
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::reactive::{autorun, computed, run_in_action, Observable};
//!
//! // Create an observable
//! let count = Observable::new(0);
//!
//! // Create a derived value
//! let c = count.clone();
//! let doubled = computed(move || c.get() * 2);
//!
//! // Create a reaction
//! let (c, d) = (count.clone(), doubled.clone());
//! let disposer = autorun(move || {
//!     println!("Count: {}, Doubled: {}", c.get(), d.get());
//! });
//!
//! // Update the observable twice; the reaction runs once
//! run_in_action(|| {
//!     count.set(4);
//!     count.set(5);
//! });
//! // Prints: "Count: 5, Doubled: 10"
//!
//! disposer.dispose();
//! ```

pub mod config;
pub mod error;
pub mod reactive;

pub(crate) mod graph;

pub use config::RuntimeConfig;
pub use error::ReactiveError;
pub use reactive::{
    action, action_named, autorun, autorun_named, batch, computed, computed_named, observable,
    observable_named, run_in_action, run_in_action_named, untracked, Computed, Disposer,
    Observable, ObservableObject, Reaction, Runtime,
};
