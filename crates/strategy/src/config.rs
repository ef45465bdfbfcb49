//! Strategy manager configuration.

use morphos_core::{MorphosError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the strategy manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Minimum seconds between effectiveness recomputations
    pub update_interval_secs: u64,

    /// Catalog capacity
    pub max_strategies: usize,

    /// Effectiveness below which a strategy is re-tuned
    pub min_effectiveness: f64,

    /// Execution records and audit events retained
    pub max_history: usize,

    /// Effectiveness below which a well-exercised strategy is evicted
    pub collapse_floor: f64,

    /// Executions a strategy needs before it can be evicted for low effectiveness
    pub min_executions_for_eviction: u64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: 60,
            max_strategies: 50,
            min_effectiveness: 0.3,
            max_history: 1000,
            collapse_floor: 0.1,
            min_executions_for_eviction: 5,
        }
    }
}

impl StrategyConfig {
    /// Check the configuration for impossible values.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_effectiveness) {
            return Err(MorphosError::config("min_effectiveness must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.collapse_floor) || self.collapse_floor > self.min_effectiveness {
            return Err(MorphosError::config(
                "collapse_floor must be in [0, min_effectiveness]",
            ));
        }
        if self.max_strategies == 0 || self.max_history == 0 {
            return Err(MorphosError::config("max_strategies and max_history must be positive"));
        }
        Ok(())
    }

    /// Update interval as a chrono duration.
    pub fn update_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.update_interval_secs as i64)
    }
}
