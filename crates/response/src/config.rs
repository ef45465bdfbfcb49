//! Handler configuration.

use morphos_core::{MorphosError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the mutation handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseConfig {
    /// Selection score a strategy must exceed to be used
    pub response_threshold: f64,

    /// Retry budget for strategies that do not set their own
    pub max_retries: u32,

    /// Stability the derived system state is balanced against
    pub stability_target: f64,

    /// Responses that may execute at once
    pub max_concurrent_responses: usize,

    /// Timeout for direct actions, in seconds
    pub default_action_timeout_secs: u64,

    /// Finished responses and direct actions retained
    pub max_history: usize,

    /// Registered strategy capacity
    pub max_strategies: usize,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            response_threshold: 0.3,
            max_retries: 3,
            stability_target: 0.8,
            max_concurrent_responses: 10,
            default_action_timeout_secs: 30,
            max_history: 500,
            max_strategies: 64,
        }
    }
}

impl ResponseConfig {
    /// Check the configuration for impossible values.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.response_threshold) || self.response_threshold <= 0.0 {
            return Err(MorphosError::config("response_threshold must be in (0, 1)"));
        }
        if !(0.0..=1.0).contains(&self.stability_target) {
            return Err(MorphosError::config("stability_target must be in [0, 1]"));
        }
        if self.max_retries == 0 {
            return Err(MorphosError::config("max_retries must be positive"));
        }
        if self.max_concurrent_responses == 0 || self.max_strategies == 0 || self.max_history == 0 {
            return Err(MorphosError::config(
                "max_concurrent_responses, max_strategies and max_history must be positive",
            ));
        }
        if self.default_action_timeout_secs == 0 {
            return Err(MorphosError::config("default_action_timeout_secs must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(ResponseConfig::default().validate().is_ok());
    }

    #[test]
    fn test_floor_must_be_nonzero() {
        let config = ResponseConfig {
            response_threshold: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
