//! Optimizer configuration.

use morphos_core::{MorphosError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the optimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    /// Minimum seconds between optimize cycles
    pub optimization_interval_secs: u64,

    /// Distance from target that starts a run, and the tolerance of convergence
    pub improvement_threshold: f64,

    /// Iteration cap per run
    pub max_iterations: u32,

    /// Improvement below which an iteration counts as stalled
    pub convergence_rate: f64,

    /// Iterations each active run performs per cycle
    pub iterations_per_cycle: u32,

    /// Objective capacity
    pub max_objectives: usize,

    /// Finished runs retained
    pub max_history: usize,

    /// Seed for the search; entropy when unset
    pub seed: Option<u64>,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            optimization_interval_secs: 300,
            improvement_threshold: 0.05,
            max_iterations: 100,
            convergence_rate: 0.001,
            iterations_per_cycle: 25,
            max_objectives: 32,
            max_history: 200,
            seed: None,
        }
    }
}

impl OptimizationConfig {
    /// Check the configuration for impossible values.
    pub fn validate(&self) -> Result<()> {
        if !(self.improvement_threshold > 0.0 && self.improvement_threshold.is_finite()) {
            return Err(MorphosError::config("improvement_threshold must be positive"));
        }
        if !(self.convergence_rate >= 0.0 && self.convergence_rate.is_finite()) {
            return Err(MorphosError::config("convergence_rate must not be negative"));
        }
        if self.max_iterations == 0 || self.iterations_per_cycle == 0 {
            return Err(MorphosError::config("max_iterations and iterations_per_cycle must be positive"));
        }
        if self.max_objectives == 0 || self.max_history == 0 {
            return Err(MorphosError::config("max_objectives and max_history must be positive"));
        }
        Ok(())
    }

    /// Optimize interval as a chrono duration.
    pub fn optimization_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.optimization_interval_secs as i64)
    }
}
