//! Learning configuration.

use morphos_core::{MorphosError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the learning component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Gradient step size
    pub learning_rate: f64,

    /// Experiences retained (oldest dropped first)
    pub memory_capacity: usize,

    /// Scale of the random initial weight of a newly seen feature
    pub exploration_rate: f64,

    /// Confidence multiplier applied on each failed validation
    pub decay_factor: f64,

    /// Momentum coefficient of the weight update
    pub momentum: f64,

    /// L2 regularization strength
    pub l2_lambda: f64,

    /// Minimum confidence of a mined pattern, and the floor below which
    /// knowledge units are removed
    pub min_confidence: f64,

    /// Share of an outcome group a context key must correlate with to
    /// become a pre-condition
    pub correlation_floor: f64,

    /// Confidence a success pattern needs before it updates strategy parameters
    pub high_confidence: f64,

    /// Age after which knowledge units are decayed on failed validation
    pub validation_age_hours: u64,

    /// Experiences an outcome group needs to be mined
    pub min_support: usize,

    /// Training epochs per learning cycle
    pub epochs_per_cycle: usize,

    /// Seed for weight initialization; entropy when unset
    pub seed: Option<u64>,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.05,
            memory_capacity: 1000,
            exploration_rate: 0.1,
            decay_factor: 0.9,
            momentum: 0.9,
            l2_lambda: 0.01,
            min_confidence: 0.3,
            correlation_floor: 0.7,
            high_confidence: 0.8,
            validation_age_hours: 24,
            min_support: 3,
            epochs_per_cycle: 10,
            seed: None,
        }
    }
}

impl LearningConfig {
    /// Check the configuration for impossible values.
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(MorphosError::config("learning_rate must be in (0, 1]"));
        }
        if self.memory_capacity == 0 {
            return Err(MorphosError::config("memory_capacity must be positive"));
        }
        for (name, value) in [
            ("exploration_rate", self.exploration_rate),
            ("momentum", self.momentum),
            ("min_confidence", self.min_confidence),
            ("correlation_floor", self.correlation_floor),
            ("high_confidence", self.high_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(MorphosError::config(format!("{} must be in [0, 1]", name)));
            }
        }
        if !(self.decay_factor > 0.0 && self.decay_factor < 1.0) {
            return Err(MorphosError::config("decay_factor must be in (0, 1)"));
        }
        if self.l2_lambda < 0.0 {
            return Err(MorphosError::config("l2_lambda must not be negative"));
        }
        if self.min_support == 0 || self.epochs_per_cycle == 0 {
            return Err(MorphosError::config("min_support and epochs_per_cycle must be positive"));
        }
        Ok(())
    }

    /// Validation age as a chrono duration.
    pub fn validation_age(&self) -> chrono::Duration {
        chrono::Duration::hours(self.validation_age_hours as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(LearningConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_non_decaying_factor() {
        let config = LearningConfig {
            decay_factor: 1.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(MorphosError::Config(_))));
    }
}
