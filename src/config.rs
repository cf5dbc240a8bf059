//! Configuration for the run loop.

use serde::{Deserialize, Serialize};

/// Run loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLoopConfig {
    /// Shutdown drain configuration.
    #[serde(default)]
    pub drain: DrainConfig,

    /// Whether to collect per-task timing in the metrics.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for RunLoopConfig {
    fn default() -> Self {
        Self {
            drain: DrainConfig::default(),
            metrics_enabled: true,
        }
    }
}

/// Shutdown drain configuration.
///
/// Tasks discarded at destruction may post further tasks from their drop
/// glue, so the drain loops until an iteration does no work, capped at
/// `max_iterations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrainConfig {
    /// Maximum drain iterations before giving up.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_max_iterations() -> u32 {
    100
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}
