//! Runtime configuration.
//!
//! Each thread's runtime starts with [`RuntimeConfig::default`]. Hosts that
//! want stricter behaviour install their own with
//! [`Runtime::configure`](crate::reactive::Runtime::configure), typically
//! parsed from a JSON document.

use serde::{Deserialize, Serialize};

use crate::error::ReactiveError;

/// Default number of flush passes before the runtime gives up on a batch.
pub const DEFAULT_MAX_REACTION_ITERATIONS: usize = 100;

/// Tunables for the reactive runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Report writes that happen outside of any action or batch.
    ///
    /// Reported writes are still applied.
    pub enforce_actions: bool,

    /// How many flush passes may run before pending reactions are dropped
    /// and [`ReactiveError::ReactionsDidNotConverge`] is logged.
    pub max_reaction_iterations: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            enforce_actions: false,
            max_reaction_iterations: DEFAULT_MAX_REACTION_ITERATIONS,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing keys keep their defaults.
    pub fn from_json_str(text: &str) -> Result<Self, ReactiveError> {
        let config: Self = serde_json::from_str(text).map_err(|e| ReactiveError::InvalidConfig {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration lets a flush make progress.
    pub fn validate(&self) -> Result<(), ReactiveError> {
        if self.max_reaction_iterations == 0 {
            return Err(ReactiveError::InvalidConfig {
                message: "max_reaction_iterations must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Builder-style setter for [`enforce_actions`](Self::enforce_actions).
    pub fn with_enforce_actions(mut self, enforce: bool) -> Self {
        self.enforce_actions = enforce;
        self
    }

    /// Builder-style setter for
    /// [`max_reaction_iterations`](Self::max_reaction_iterations).
    ///
    /// Zero is clamped to one so that a flush always gets a single pass.
    pub fn with_max_reaction_iterations(mut self, iterations: usize) -> Self {
        self.max_reaction_iterations = iterations.max(1);
        self
    }
}
