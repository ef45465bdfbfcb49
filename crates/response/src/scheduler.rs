//! Response capacity and action budgets.

use std::num::NonZeroUsize;
use std::time::Duration;

use crate::config::ResponseConfig;

/// Budget for response execution.
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    /// Timeout for actions that do not carry their own
    pub action_timeout: Duration,
    /// Max concurrent responses
    pub max_concurrent: NonZeroUsize,
}

impl Budget {
    /// Derive a budget from handler configuration.
    pub fn from_config(config: &ResponseConfig) -> Self {
        Self {
            action_timeout: Duration::from_secs(config.default_action_timeout_secs),
            max_concurrent: NonZeroUsize::new(config.max_concurrent_responses).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

/// Tracks how many responses are in flight.
#[derive(Debug)]
pub struct ResourceScheduler {
    budget: Budget,
    active: usize,
}

impl ResourceScheduler {
    /// Create a new scheduler.
    pub fn new(budget: Budget) -> Self {
        Self { budget, active: 0 }
    }

    /// Budget in force.
    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    /// Check if another response can start.
    pub fn can_start(&self) -> bool {
        self.active < self.budget.max_concurrent.get()
    }

    /// Register a response start.
    pub fn response_started(&mut self) {
        self.active += 1;
    }

    /// Register a response reaching a terminal state.
    pub fn response_finished(&mut self) {
        self.active = self.active.saturating_sub(1);
    }

    /// Responses in flight.
    pub fn active(&self) -> usize {
        self.active
    }

    /// Fraction of capacity in use, in [0, 1].
    pub fn load(&self) -> f64 {
        (self.active as f64 / self.budget.max_concurrent.get() as f64).min(1.0)
    }

    /// Available-resource fit: 1.0 when idle, 0.0 at capacity.
    pub fn fit(&self) -> f64 {
        1.0 - self.load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_and_fit() {
        let config = ResponseConfig {
            max_concurrent_responses: 2,
            ..ResponseConfig::default()
        };
        let mut scheduler = ResourceScheduler::new(Budget::from_config(&config));
        assert_eq!(scheduler.fit(), 1.0);

        scheduler.response_started();
        assert!(scheduler.can_start());
        assert!((scheduler.load() - 0.5).abs() < 1e-12);

        scheduler.response_started();
        assert!(!scheduler.can_start());
        assert_eq!(scheduler.fit(), 0.0);

        scheduler.response_finished();
        scheduler.response_finished();
        scheduler.response_finished();
        assert_eq!(scheduler.active(), 0);
    }
}
