// SPDX-License-Identifier: MIT

//! Execution limits shared by the agent runners

use serde::{Deserialize, Serialize};

pub const ENV_MAX_ITERATIONS: &str = "WEAVE_MAX_ITERATIONS";
pub const ENV_MAX_RETRIES_PER_STEP: &str = "WEAVE_MAX_RETRIES_PER_STEP";
pub const ENV_TOTAL_MAX_RETRIES: &str = "WEAVE_TOTAL_MAX_RETRIES";

/// Bounds applied to one agent run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Model rounds allowed per run
    pub max_iterations: usize,
    /// Retries allowed within one iteration
    pub max_retries_per_step: usize,
    /// Retries allowed across the whole run
    pub total_max_retries: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_retries_per_step: 3,
            total_max_retries: 20,
        }
    }
}

impl ExecutionConfig {
    /// Defaults overridden by `WEAVE_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_iterations: read_env(ENV_MAX_ITERATIONS, defaults.max_iterations),
            max_retries_per_step: read_env(ENV_MAX_RETRIES_PER_STEP, defaults.max_retries_per_step),
            total_max_retries: read_env(ENV_TOTAL_MAX_RETRIES, defaults.total_max_retries),
        }
    }
}

fn read_env(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("Ignoring invalid {}={:?}, using {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
