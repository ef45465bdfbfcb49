//! Learning experiences - outcomes fed back into the learning layer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::context::Context;
use crate::id::{ExperienceId, ObjectiveId, StrategyId};
use crate::Time;

/// Outcome type recorded for strategy executions.
pub const STRATEGY_OUTCOME: &str = "strategy_execution";

/// Outcome type recorded for optimization runs.
pub const OPTIMIZATION_OUTCOME: &str = "optimization";

/// Where an experience came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum ExperienceSource {
    /// A strategy execution
    Strategy(StrategyId),
    /// A finished optimization run
    Optimization(ObjectiveId),
    /// Anything else
    External(String),
}

impl ExperienceSource {
    /// Strategy that produced the experience, if any.
    pub fn strategy(&self) -> Option<&StrategyId> {
        match self {
            ExperienceSource::Strategy(id) => Some(id),
            _ => None,
        }
    }

    /// Stable key used for grouping.
    pub fn key(&self) -> String {
        match self {
            ExperienceSource::Strategy(id) => format!("strategy:{}", id),
            ExperienceSource::Optimization(id) => format!("optimization:{}", id),
            ExperienceSource::External(name) => format!("external:{}", name),
        }
    }
}

/// One observed outcome, the raw material for pattern mining.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningExperience {
    /// Unique identifier
    pub id: ExperienceId,

    /// Producer of the experience
    pub source: ExperienceSource,

    /// Outcome type (one predictive model per type)
    pub outcome_type: String,

    /// Context at the time of the attempt
    pub context: Context,

    /// Whether the attempt succeeded
    pub success: bool,

    /// Outcome metrics
    pub metrics: HashMap<String, f64>,

    /// Scalar reward in [-1, 1]
    pub reward: f64,

    /// When it happened
    pub timestamp: Time,
}

impl LearningExperience {
    /// Create an experience.
    pub fn new(
        source: ExperienceSource,
        outcome_type: impl Into<String>,
        context: Context,
        success: bool,
    ) -> Self {
        Self {
            id: ExperienceId::new(),
            source,
            outcome_type: outcome_type.into(),
            context,
            success,
            metrics: HashMap::new(),
            reward: if success { 1.0 } else { -1.0 },
            timestamp: chrono::Utc::now(),
        }
    }

    /// Attach outcome metrics.
    pub fn with_metrics(mut self, metrics: HashMap<String, f64>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Override the reward.
    pub fn with_reward(mut self, reward: f64) -> Self {
        self.reward = reward.clamp(-1.0, 1.0);
        self
    }

    /// Override the timestamp.
    pub fn at(mut self, timestamp: Time) -> Self {
        self.timestamp = timestamp;
        self
    }
}
