//! Response strategies and how one is chosen for a mutation.

use morphos_core::{
    match_ratio, ActionTemplate, Condition, Context, MorphosError, Result, StrategyId,
};
use serde::{Deserialize, Serialize};

/// Highest allowed strategy priority.
pub const MAX_PRIORITY: u8 = 100;

/// Weight of priority in the selection score.
const PRIORITY_WEIGHT: f64 = 0.3;
/// Weight of historical success rate.
const SUCCESS_WEIGHT: f64 = 0.25;
/// Weight of the condition-match ratio.
const MATCH_WEIGHT: f64 = 0.25;
/// Weight of available-resource fit.
const RESOURCE_WEIGHT: f64 = 0.2;

/// A registered bundle of trigger conditions and corrective actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseStrategy {
    /// Unique identifier
    pub id: StrategyId,

    /// Display name
    pub name: String,

    /// Priority in [0, 100]
    pub priority: u8,

    /// Trigger conditions over the mutation context
    pub conditions: Vec<Condition>,

    /// Actions instantiated for each response
    pub actions: Vec<ActionTemplate>,

    /// Retry budget; `None` uses the handler default
    pub max_retries: Option<u32>,

    /// Finished responses that used this strategy
    pub attempts: u64,

    /// Completed responses that used this strategy
    pub successes: u64,
}

impl ResponseStrategy {
    /// Create a strategy with no conditions or actions.
    pub fn new(id: impl Into<StrategyId>, name: impl Into<String>, priority: u8) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            priority,
            conditions: Vec::new(),
            actions: Vec::new(),
            max_retries: None,
            attempts: 0,
            successes: 0,
        }
    }

    /// Add a trigger condition.
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Add an action template.
    pub fn with_action(mut self, action: ActionTemplate) -> Self {
        self.actions.push(action);
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Historical success rate; 0.5 before any attempt.
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.5
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }

    /// Longest per-action timeout among the templates, in seconds.
    pub fn max_action_timeout_secs(&self) -> u64 {
        self.actions.iter().map(|a| a.timeout_secs).max().unwrap_or(0)
    }

    /// Reject malformed strategies before they are stored.
    pub fn validate(&self) -> Result<()> {
        if self.id.as_str().trim().is_empty() {
            return Err(MorphosError::validation("strategy id is empty"));
        }
        if self.actions.is_empty() {
            return Err(MorphosError::validation(format!("strategy {} has no actions", self.id)));
        }
        if self.priority > MAX_PRIORITY {
            return Err(MorphosError::validation(format!(
                "strategy {} priority {} exceeds {}",
                self.id, self.priority, MAX_PRIORITY
            )));
        }
        if let Some(action) = self.actions.iter().find(|a| a.timeout_secs == 0) {
            return Err(MorphosError::validation(format!(
                "strategy {} action {} on {} has no timeout",
                self.id, action.kind, action.target
            )));
        }
        if self.max_retries == Some(0) {
            return Err(MorphosError::validation(format!("strategy {} has a zero retry budget", self.id)));
        }
        Ok(())
    }
}

/// The strategy picked for a mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// Chosen strategy
    pub strategy_id: StrategyId,
    /// Weighted score
    pub score: f64,
    /// Fraction of its conditions the context satisfied
    pub match_ratio: f64,
}

/// Chooses the best-fit strategy for a mutation context.
pub trait StrategySelector: Send + Sync {
    /// Pick a strategy scoring above `floor`, or none.
    fn select(
        &self,
        strategies: &[&ResponseStrategy],
        context: &Context,
        fit: f64,
        floor: f64,
    ) -> Option<Selection>;
}

/// Default selector: priority 30%, success rate 25%, condition match 25%,
/// resource fit 20%.
///
/// Strategies whose conditions are all unmet are never candidates.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedSelector;

impl WeightedSelector {
    /// Create a new weighted selector.
    pub fn new() -> Self {
        Self
    }

    /// Score one strategy; returns (score, match ratio).
    pub fn score(&self, strategy: &ResponseStrategy, context: &Context, fit: f64) -> (f64, f64) {
        let matched = match_ratio(&strategy.conditions, context);
        let score = PRIORITY_WEIGHT * f64::from(strategy.priority.min(MAX_PRIORITY)) / f64::from(MAX_PRIORITY)
            + SUCCESS_WEIGHT * strategy.success_rate()
            + MATCH_WEIGHT * matched
            + RESOURCE_WEIGHT * fit.clamp(0.0, 1.0);
        (score, matched)
    }
}

impl StrategySelector for WeightedSelector {
    fn select(
        &self,
        strategies: &[&ResponseStrategy],
        context: &Context,
        fit: f64,
        floor: f64,
    ) -> Option<Selection> {
        strategies
            .iter()
            .filter_map(|strategy| {
                let (score, matched) = self.score(strategy, context, fit);
                (matched > 0.0 && score > floor).then(|| Selection {
                    strategy_id: strategy.id.clone(),
                    score,
                    match_ratio: matched,
                })
            })
            .max_by(|a, b| {
                a.score
                    .partial_cmp(&b.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.strategy_id.as_str().cmp(a.strategy_id.as_str()))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use morphos_core::{ActionKind, ConditionOp};

    fn context() -> Context {
        Context::from([
            ("severity".to_string(), serde_json::json!(4.0)),
            ("type".to_string(), serde_json::json!("energetic")),
        ])
    }

    fn strategy(id: &str, priority: u8, attempts: u64, successes: u64) -> ResponseStrategy {
        let mut s = ResponseStrategy::new(id, id, priority)
            .with_action(ActionTemplate::new(ActionKind::AdjustParameter, "damping", 5));
        s.attempts = attempts;
        s.successes = successes;
        s
    }

    #[test]
    fn test_scenario_strong_strategy_beats_weak_one() {
        let strong = strategy("strong", 90, 10, 9)
            .with_condition(Condition::new("severity", ConditionOp::Gt, 1.0))
            .with_condition(Condition::equals("type", serde_json::json!("energetic")));
        let weak = strategy("weak", 50, 10, 5)
            .with_condition(Condition::new("severity", ConditionOp::Gt, 1.0))
            .with_condition(Condition::equals("type", serde_json::json!("structural")));

        let selection = WeightedSelector::new()
            .select(&[&weak, &strong], &context(), 1.0, 0.3)
            .unwrap();
        assert_eq!(selection.strategy_id.as_str(), "strong");
        assert_eq!(selection.match_ratio, 1.0);
        // 0.27 + 0.225 + 0.25 + 0.2
        assert!((selection.score - 0.945).abs() < 1e-9);
    }

    #[test]
    fn test_nothing_clears_floor() {
        let s = strategy("s", 0, 10, 0).with_condition(Condition::new("severity", ConditionOp::Gt, 1.0));
        // 0 + 0 + 0.25 + 0 = 0.25
        assert!(WeightedSelector::new().select(&[&s], &context(), 0.0, 0.3).is_none());
    }

    #[test]
    fn test_unmatched_strategy_is_not_a_candidate() {
        let s = strategy("s", 100, 10, 10).with_condition(Condition::new("severity", ConditionOp::Lt, 1.0));
        assert!(WeightedSelector::new().select(&[&s], &context(), 1.0, 0.3).is_none());
    }

    #[test]
    fn test_success_rate_defaults_to_half() {
        assert_eq!(strategy("s", 50, 0, 0).success_rate(), 0.5);
    }

    #[test]
    fn test_validation() {
        assert!(strategy("ok", 50, 0, 0).validate().is_ok());
        assert!(ResponseStrategy::new("empty", "empty", 50).validate().is_err());
        assert!(strategy("loud", 101, 0, 0).validate().is_err());
        let no_timeout = ResponseStrategy::new("t", "t", 10)
            .with_action(ActionTemplate::new(ActionKind::Transform, "mesh", 0));
        assert!(no_timeout.validate().is_err());
    }
}
