//! Strategy model - reusable bundles of conditions, actions and rules.

use morphos_core::{
    all_match, match_ratio, ActionTemplate, Condition, Context, ExecutionId, MorphosError, Result,
    RuleId, StrategyId, Time,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Highest allowed strategy priority.
pub const MAX_PRIORITY: u8 = 100;

/// Effectiveness assigned to a strategy with no execution history.
pub const INITIAL_EFFECTIVENESS: f64 = 0.5;

/// Broad role of a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    /// Reacts to an observed deviation
    Corrective,
    /// Acts ahead of an expected deviation
    Preventive,
    /// Tunes the system continuously
    Adaptive,
    /// Synthesized from learned knowledge
    Learned,
}

impl StrategyType {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyType::Corrective => "corrective",
            StrategyType::Preventive => "preventive",
            StrategyType::Adaptive => "adaptive",
            StrategyType::Learned => "learned",
        }
    }
}

/// Where a rule came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSource {
    /// Registered alongside the strategy
    Manual,
    /// Mined from successful executions
    Success,
    /// Mined from failed executions
    Failure,
    /// Mined from adaptation outcomes
    Adaptation,
}

/// A conditional extension of a strategy.
///
/// A rule fires when the fraction of its conditions satisfied by the
/// execution context reaches its threshold; a fired rule contributes its
/// action to the execution. A fired failure rule may instead veto the
/// execution, see [`Strategy::suppressing_rule`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRule {
    /// Unique identifier
    pub id: RuleId,

    /// Name, unique within a strategy
    pub name: String,

    /// Conditions over the execution context
    pub conditions: Vec<Condition>,

    /// Fraction of conditions required to fire, in [0, 1]
    pub threshold: f64,

    /// Action contributed when the rule fires
    pub action: Option<ActionTemplate>,

    /// Relative weight
    pub weight: f64,

    /// Confidence in [0, 1]
    pub confidence: f64,

    /// Origin
    pub source: RuleSource,
}

impl StrategyRule {
    /// Create a manual rule that fires when every condition holds.
    pub fn new(name: impl Into<String>, conditions: Vec<Condition>) -> Self {
        Self {
            id: RuleId::new(),
            name: name.into(),
            conditions,
            threshold: 1.0,
            action: None,
            weight: 1.0,
            confidence: 1.0,
            source: RuleSource::Manual,
        }
    }

    /// Set the action contributed when the rule fires.
    pub fn with_action(mut self, action: ActionTemplate) -> Self {
        self.action = Some(action);
        self
    }

    /// Set the firing threshold.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set weight and confidence.
    pub fn with_weight(mut self, weight: f64, confidence: f64) -> Self {
        self.weight = weight;
        self.confidence = confidence;
        self
    }

    /// Set the origin.
    pub fn with_source(mut self, source: RuleSource) -> Self {
        self.source = source;
        self
    }

    /// Whether the rule fires for the context.
    pub fn fires(&self, context: &Context) -> bool {
        !self.conditions.is_empty() && match_ratio(&self.conditions, context) >= self.threshold
    }

    /// Weight scaled by confidence.
    pub fn score(&self) -> f64 {
        self.weight * self.confidence
    }

    /// Reject malformed rules.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(MorphosError::validation("rule name is empty"));
        }
        if self.conditions.is_empty() {
            return Err(MorphosError::validation(format!("rule {} has no conditions", self.name)));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(MorphosError::validation(format!(
                "rule {} threshold {} is outside [0, 1]",
                self.name, self.threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence) || !self.weight.is_finite() || self.weight < 0.0 {
            return Err(MorphosError::validation(format!(
                "rule {} has an invalid weight or confidence",
                self.name
            )));
        }
        if self.action.as_ref().is_some_and(|a| a.timeout_secs == 0) {
            return Err(MorphosError::validation(format!("rule {} action has no timeout", self.name)));
        }
        Ok(())
    }
}

/// A named, reusable bundle of trigger conditions and corrective actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    /// Unique identifier
    pub id: StrategyId,

    /// Display name
    pub name: String,

    /// Role
    pub strategy_type: StrategyType,

    /// Priority in [0, 100]; higher runs first
    pub priority: u8,

    /// Applicability conditions over the execution context
    pub conditions: Vec<Condition>,

    /// Actions run on every execution
    pub actions: Vec<ActionTemplate>,

    /// Tunable parameters, exposed to action templates by name
    pub parameters: HashMap<String, f64>,

    /// Conditional extensions
    pub rules: Vec<StrategyRule>,

    /// Recency-weighted success rate in [0, 1]
    pub effectiveness: f64,

    /// Registration time
    pub created_at: Time,

    /// Last execution
    pub last_used: Option<Time>,

    /// Executions so far
    pub usage_count: u64,
}

impl Strategy {
    /// Create a strategy with no conditions, actions or rules.
    pub fn new(
        id: impl Into<StrategyId>,
        name: impl Into<String>,
        strategy_type: StrategyType,
        priority: u8,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            strategy_type,
            priority,
            conditions: Vec::new(),
            actions: Vec::new(),
            parameters: HashMap::new(),
            rules: Vec::new(),
            effectiveness: INITIAL_EFFECTIVENESS,
            created_at: chrono::Utc::now(),
            last_used: None,
            usage_count: 0,
        }
    }

    /// Add an applicability condition.
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Add an action template.
    pub fn with_action(mut self, action: ActionTemplate) -> Self {
        self.actions.push(action);
        self
    }

    /// Set a parameter.
    pub fn with_parameter(mut self, name: impl Into<String>, value: f64) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    /// Add a rule.
    pub fn with_rule(mut self, rule: StrategyRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Whether every applicability condition holds.
    pub fn is_applicable(&self, context: &Context) -> bool {
        all_match(&self.conditions, context)
    }

    /// Execution context: the given context plus this strategy's parameters.
    pub fn execution_context(&self, base: &Context) -> Context {
        let mut context = base.clone();
        for (name, value) in &self.parameters {
            context.insert(name.clone(), serde_json::json!(value));
        }
        context
    }

    /// Action templates for one execution: own actions, then fired rules by weight.
    pub fn planned_actions(&self, context: &Context) -> Vec<&ActionTemplate> {
        let mut fired: Vec<&StrategyRule> = self.rules.iter().filter(|r| r.fires(context)).collect();
        fired.sort_by(|a, b| b.score().partial_cmp(&a.score()).unwrap_or(Ordering::Equal));

        self.actions
            .iter()
            .chain(fired.into_iter().filter_map(|r| r.action.as_ref()))
            .collect()
    }

    /// The failure rule that vetoes an execution in this context, if any.
    ///
    /// A fired [`RuleSource::Failure`] rule vetoes when its score beats the
    /// strategy's effectiveness and every other fired rule. The strongest
    /// such rule is returned.
    pub fn suppressing_rule(&self, context: &Context) -> Option<&StrategyRule> {
        let (failures, others): (Vec<&StrategyRule>, Vec<&StrategyRule>) = self
            .rules
            .iter()
            .filter(|r| r.fires(context))
            .partition(|r| r.source == RuleSource::Failure);
        let bar = others.iter().map(|r| r.score()).fold(self.effectiveness, f64::max);

        failures
            .into_iter()
            .filter(|r| r.score() > bar)
            .max_by(|a, b| a.score().partial_cmp(&b.score()).unwrap_or(Ordering::Equal))
    }

    /// Find a rule by id.
    pub fn rule_mut(&mut self, id: RuleId) -> Option<&mut StrategyRule> {
        self.rules.iter_mut().find(|r| r.id == id)
    }

    /// Reject malformed strategies before they are stored.
    pub fn validate(&self) -> Result<()> {
        if self.id.as_str().trim().is_empty() {
            return Err(MorphosError::validation("strategy id is empty"));
        }
        if self.name.trim().is_empty() {
            return Err(MorphosError::validation(format!("strategy {} has no name", self.id)));
        }
        if self.priority > MAX_PRIORITY {
            return Err(MorphosError::validation(format!(
                "strategy {} priority {} exceeds {}",
                self.id, self.priority, MAX_PRIORITY
            )));
        }
        if self.actions.is_empty() && self.rules.iter().all(|r| r.action.is_none()) {
            return Err(MorphosError::validation(format!("strategy {} has no actions", self.id)));
        }
        if self.actions.iter().any(|a| a.timeout_secs == 0) {
            return Err(MorphosError::validation(format!(
                "strategy {} has an action without a timeout",
                self.id
            )));
        }
        if let Some((name, _)) = self.parameters.iter().find(|(_, v)| !v.is_finite()) {
            return Err(MorphosError::validation(format!(
                "strategy {} parameter {} is not finite",
                self.id, name
            )));
        }
        for rule in &self.rules {
            rule.validate()?;
        }
        Ok(())
    }
}

/// Outcome of one strategy execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Unique identifier
    pub id: ExecutionId,

    /// Strategy executed
    pub strategy_id: StrategyId,

    /// Dispatch start
    pub started_at: Time,

    /// Dispatch end
    pub finished_at: Time,

    /// Whether every action succeeded
    pub success: bool,

    /// Actions dispatched
    pub actions_run: usize,

    /// Actions that failed or timed out
    pub actions_failed: usize,

    /// First failure, if any
    pub error: Option<String>,

    /// Context the strategy ran in
    pub context: Context,

    /// Metrics reported back by the executor
    pub metrics: HashMap<String, f64>,
}

/// What an audit event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyEventKind {
    /// Strategy added to the catalog
    Registered,
    /// Strategy removed on request
    Removed,
    /// Execution succeeded
    Executed,
    /// Execution failed
    Failed,
    /// Execution vetoed by a learned failure rule
    Suppressed,
    /// Thresholds or parameters re-tuned
    Retuned,
    /// Strategy evicted (capacity or collapse)
    Evicted,
    /// Parameters updated from outside
    Updated,
    /// Rule added or refreshed
    RuleAdded,
}

/// One entry of the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyEvent {
    /// When it happened
    pub timestamp: Time,

    /// Strategy concerned
    pub strategy_id: StrategyId,

    /// What happened
    pub kind: StrategyEventKind,

    /// Details
    pub detail: String,
}

impl StrategyEvent {
    /// Create a new event.
    pub fn new(
        strategy_id: StrategyId,
        kind: StrategyEventKind,
        detail: impl Into<String>,
        timestamp: Time,
    ) -> Self {
        Self {
            timestamp,
            strategy_id,
            kind,
            detail: detail.into(),
        }
    }
}
