//! Error types for the reactive runtime.
//!
//! User failures inside derivations never escape the scheduler; they are
//! caught, logged through `tracing`, and (for computed values) cached so that
//! fallible accessors can hand them back to the caller.

use std::any::Any;

use thiserror::Error;

/// Errors reported by the reactive runtime.
///
/// The type is `Clone` so a [`Computed`](crate::reactive::Computed) can keep
/// the failure of its last evaluation and return it on every read until one
/// of its inputs changes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// The user function of a reaction or computed value panicked.
    #[error("derivation '{name}' panicked: {message}")]
    DerivationPanicked {
        /// Debug name of the failing derivation.
        name: String,
        /// The panic payload rendered as text.
        message: String,
    },

    /// A cell was written while state changes were disallowed.
    ///
    /// The write is still applied; this error is only reported.
    #[error("state change to '{name}' is not allowed here")]
    StateChangeNotAllowed {
        /// Debug name of the written cell.
        name: String,
    },

    /// The flush loop kept producing new work after the configured number
    /// of passes.
    #[error("reactions did not converge after {iterations} iterations (last: '{name}')")]
    ReactionsDidNotConverge {
        /// Number of passes that ran.
        iterations: usize,
        /// Debug name of a reaction that was still pending.
        name: String,
    },

    /// A computed value read itself while it was being evaluated.
    #[error("cycle detected in computed '{name}'")]
    ComputedCycle {
        /// Debug name of the computed value.
        name: String,
    },

    /// A record field could not be decoded into the requested type.
    #[error("field '{key}' could not be decoded: {message}")]
    Decode {
        /// The field key.
        key: String,
        /// The decoder's message.
        message: String,
    },

    /// Runtime configuration could not be parsed.
    #[error("invalid runtime configuration: {message}")]
    InvalidConfig {
        /// The parser's message.
        message: String,
    },
}

/// Render a panic payload as text.
///
/// `panic!` with a literal produces a `&'static str`, formatted panics
/// produce a `String`; anything else is opaque.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
