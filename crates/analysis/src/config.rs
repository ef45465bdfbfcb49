//! Analyzer configuration.

use morphos_core::{MorphosError, Result};
use serde::{Deserialize, Serialize};

/// Weights blended into a correlation strength.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationWeights {
    /// Temporal proximity
    pub time: f64,
    /// Shared changed properties
    pub features: f64,
    /// Shared causal factors
    pub causal: f64,
}

impl Default for CorrelationWeights {
    fn default() -> Self {
        Self {
            time: 0.3,
            features: 0.4,
            causal: 0.3,
        }
    }
}

/// Configuration for the mutation analyzer.
///
/// The correlation and prediction thresholds are heuristics kept
/// configurable rather than derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Minimum strength for a correlation to be reported
    pub correlation_threshold: f64,

    /// Temporal grouping window in seconds
    pub pattern_window_secs: u64,

    /// Mutations a group needs before it becomes a pattern
    pub min_pattern_support: usize,

    /// How far ahead predictions look, in seconds
    pub prediction_horizon_secs: u64,

    /// Composite score required for a high-probability prediction to count as accurate
    pub accuracy_threshold: f64,

    /// Predictions at or above this probability use the composite check
    pub high_probability_threshold: f64,

    /// Condition-satisfaction ratio required for a prediction to count as accurate
    pub condition_match_threshold: f64,

    /// Correlation blend weights
    pub correlation_weights: CorrelationWeights,

    /// Mutation history retained for pattern mining
    pub max_history: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            correlation_threshold: 0.7,
            pattern_window_secs: 3600,
            min_pattern_support: 2,
            prediction_horizon_secs: 3600,
            accuracy_threshold: 0.85,
            high_probability_threshold: 0.7,
            condition_match_threshold: 0.7,
            correlation_weights: CorrelationWeights::default(),
            max_history: 1000,
        }
    }
}

impl AnalysisConfig {
    /// Check the configuration for impossible values.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("correlation_threshold", self.correlation_threshold),
            ("accuracy_threshold", self.accuracy_threshold),
            ("high_probability_threshold", self.high_probability_threshold),
            ("condition_match_threshold", self.condition_match_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(MorphosError::config(format!("{} must be in [0, 1]", name)));
            }
        }
        let w = &self.correlation_weights;
        if w.time < 0.0 || w.features < 0.0 || w.causal < 0.0 {
            return Err(MorphosError::config("correlation weights must be non-negative"));
        }
        if (w.time + w.features + w.causal - 1.0).abs() > 1e-6 {
            return Err(MorphosError::config("correlation weights must sum to 1"));
        }
        if self.pattern_window_secs == 0 || self.prediction_horizon_secs == 0 {
            return Err(MorphosError::config("windows must be positive"));
        }
        if self.min_pattern_support == 0 || self.max_history == 0 {
            return Err(MorphosError::config("min_pattern_support and max_history must be positive"));
        }
        Ok(())
    }

    /// Pattern window as a chrono duration.
    pub fn pattern_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.pattern_window_secs as i64)
    }
}
