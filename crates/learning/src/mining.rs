//! Success, failure and adaptation pattern mining over experiences.

use morphos_core::{
    numeric, stats, Condition, ConditionOp, Context, ExperienceId, ExperienceSource,
    LearningExperience,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// What an experience pattern describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    /// Conditions under which attempts succeed
    Success,
    /// Conditions under which attempts fail
    Failure,
    /// Recoveries: successes that follow a failure
    Adaptation,
}

impl PatternKind {
    /// Stable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::Success => "success",
            PatternKind::Failure => "failure",
            PatternKind::Adaptation => "adaptation",
        }
    }

    /// Weight multiplier of rules synthesized from this kind.
    pub fn rule_weight(&self) -> f64 {
        match self {
            PatternKind::Success => 1.2,
            PatternKind::Failure => 0.8,
            PatternKind::Adaptation => 1.1,
        }
    }

    /// Outcome the pattern predicts.
    pub fn predicts_success(&self) -> bool {
        !matches!(self, PatternKind::Failure)
    }
}

/// A regularity mined from a group of experiences sharing source and outcome type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperiencePattern {
    /// Kind
    pub kind: PatternKind,

    /// Outcome type of the group
    pub outcome_type: String,

    /// Source of the group
    pub source: ExperienceSource,

    /// Experiences supporting the pattern
    pub support: usize,

    /// Share of the group (recovery rate for adaptation patterns)
    pub frequency: f64,

    /// Frequency scaled by sample sufficiency
    pub confidence: f64,

    /// Context shared by every supporting experience (numeric keys averaged)
    pub common_context: Context,

    /// Pre-conditions correlated with the outcome
    pub conditions: Vec<Condition>,

    /// Significant outcome metrics (mean over supporting experiences)
    pub outcomes: HashMap<String, f64>,

    /// Supporting experiences
    pub experience_ids: Vec<ExperienceId>,
}

impl ExperiencePattern {
    /// Whether the pattern is strong enough to become knowledge.
    pub fn is_valid(&self, min_confidence: f64) -> bool {
        self.confidence >= min_confidence && !self.conditions.is_empty() && !self.outcomes.is_empty()
    }

    /// Keys referenced by the pre-conditions.
    pub fn condition_keys(&self) -> HashSet<String> {
        self.conditions.iter().map(|c| c.key.clone()).collect()
    }

    /// Identity used to merge repeated discoveries of the same pattern.
    pub fn signature(&self) -> String {
        format!("{}|{}|{}", self.kind.as_str(), self.source.key(), self.outcome_type)
    }
}

/// Thresholds applied while mining.
#[derive(Debug, Clone, Copy)]
pub struct MiningThresholds {
    /// Experiences a group needs before it is mined
    pub min_support: usize,
    /// Share a pre-condition must correlate with the outcome
    pub correlation_floor: f64,
}

/// Mine every source/outcome group of the given experiences (oldest first).
///
/// Returns all patterns found, valid or not; callers filter with
/// [`ExperiencePattern::is_valid`].
pub fn mine(experiences: &[&LearningExperience], thresholds: MiningThresholds) -> Vec<ExperiencePattern> {
    let mut groups: BTreeMap<(String, String), Vec<&LearningExperience>> = BTreeMap::new();
    for experience in experiences {
        groups
            .entry((experience.outcome_type.clone(), experience.source.key()))
            .or_default()
            .push(experience);
    }

    let mut patterns = Vec::new();
    for group in groups.into_values() {
        if group.len() < thresholds.min_support {
            continue;
        }

        let successes: Vec<&LearningExperience> = group.iter().copied().filter(|e| e.success).collect();
        let failures: Vec<&LearningExperience> = group.iter().copied().filter(|e| !e.success).collect();
        let recoveries: Vec<&LearningExperience> = group
            .windows(2)
            .filter(|pair| !pair[0].success && pair[1].success)
            .map(|pair| pair[1])
            .collect();
        let followed_failures = group[..group.len() - 1].iter().filter(|e| !e.success).count();

        let candidates = [
            (PatternKind::Success, successes, group.len()),
            (PatternKind::Failure, failures, group.len()),
            (PatternKind::Adaptation, recoveries, followed_failures),
        ];
        for (kind, subset, base) in candidates {
            if subset.is_empty() || base == 0 {
                continue;
            }
            patterns.push(build_pattern(kind, &group, &subset, base, thresholds));
        }
    }
    patterns
}

fn build_pattern(
    kind: PatternKind,
    group: &[&LearningExperience],
    subset: &[&LearningExperience],
    base: usize,
    thresholds: MiningThresholds,
) -> ExperiencePattern {
    let ids: HashSet<ExperienceId> = subset.iter().map(|e| e.id).collect();
    let rest: Vec<&LearningExperience> = group.iter().copied().filter(|e| !ids.contains(&e.id)).collect();

    let frequency = stats::clamp_unit(subset.len() as f64 / base as f64);
    let sufficiency = (subset.len() as f64 / thresholds.min_support as f64).min(1.0);

    ExperiencePattern {
        kind,
        outcome_type: subset[0].outcome_type.clone(),
        source: subset[0].source.clone(),
        support: subset.len(),
        frequency,
        confidence: stats::clamp_unit(frequency * sufficiency),
        common_context: common_context(subset),
        conditions: preconditions(kind, group, subset, &rest, thresholds.correlation_floor),
        outcomes: significant_outcomes(subset, &rest),
        experience_ids: subset.iter().map(|e| e.id).collect(),
    }
}

/// Keys present in every experience: numeric values averaged, others kept when identical.
pub fn common_context(experiences: &[&LearningExperience]) -> Context {
    let Some(first) = experiences.first() else {
        return Context::new();
    };

    let mut common = Context::new();
    for (key, value) in &first.context {
        let values: Vec<&serde_json::Value> = experiences.iter().filter_map(|e| e.context.get(key)).collect();
        if values.len() != experiences.len() {
            continue;
        }
        let numbers: Vec<f64> = values.iter().filter_map(|v| numeric(v)).collect();
        if numbers.len() == values.len() && !value.is_boolean() {
            common.insert(key.clone(), serde_json::json!(stats::mean(&numbers)));
        } else if values.iter().all(|v| *v == value) {
            common.insert(key.clone(), value.clone());
        }
    }
    common
}

fn values_of(experiences: &[&LearningExperience], key: &str) -> Vec<f64> {
    experiences
        .iter()
        .filter_map(|e| e.context.get(key))
        .filter_map(numeric)
        .collect()
}

/// Candidate condition for one key, bounding the subset's values away from the rest.
fn candidate_condition(
    key: &str,
    subset: &[&LearningExperience],
    rest: &[&LearningExperience],
) -> Option<Condition> {
    let values: Vec<&serde_json::Value> = subset.iter().filter_map(|e| e.context.get(key)).collect();
    let first = values.first()?;

    let numbers = values_of(subset, key);
    if numbers.len() == values.len() && !first.is_boolean() {
        let low = numbers.iter().copied().fold(f64::INFINITY, f64::min);
        let high = numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let others = values_of(rest, key);
        let condition = if !others.is_empty() && stats::mean(&numbers) < stats::mean(&others) {
            Condition::new(key, ConditionOp::Le, high)
        } else {
            Condition::new(key, ConditionOp::Ge, low)
        };
        return Some(condition);
    }

    if values.iter().all(|v| v == first) {
        Some(Condition::equals(key, (*first).clone()))
    } else {
        Some(Condition::exists(key))
    }
}

/// Context keys whose condition correlates with the pattern's outcome.
///
/// A key qualifies when it is present in at least `floor` of the subset and,
/// among the group's experiences satisfying its condition, at least `floor`
/// share the pattern's outcome.
fn preconditions(
    kind: PatternKind,
    group: &[&LearningExperience],
    subset: &[&LearningExperience],
    rest: &[&LearningExperience],
    floor: f64,
) -> Vec<Condition> {
    let mut keys: Vec<&String> = subset.iter().flat_map(|e| e.context.keys()).collect();
    keys.sort();
    keys.dedup();

    let mut conditions = Vec::new();
    for key in keys {
        let present = subset.iter().filter(|e| e.context.contains_key(key)).count();
        if (present as f64) / (subset.len() as f64) < floor {
            continue;
        }
        let Some(condition) = candidate_condition(key, subset, rest) else {
            continue;
        };

        let holding: Vec<&&LearningExperience> =
            group.iter().filter(|e| condition.evaluate(&e.context)).collect();
        if holding.is_empty() {
            continue;
        }
        let agreeing = holding
            .iter()
            .filter(|e| e.success == kind.predicts_success())
            .count();
        if (agreeing as f64) / (holding.len() as f64) >= floor {
            conditions.push(condition);
        }
    }
    conditions
}

/// Outcome metrics whose subset mean stands out by more than one standard deviation.
///
/// The subset mean is compared against the rest of the group, or against
/// zero when the subset is the whole group.
fn significant_outcomes(
    subset: &[&LearningExperience],
    rest: &[&LearningExperience],
) -> HashMap<String, f64> {
    let mut outcomes = HashMap::new();
    let Some(first) = subset.first() else {
        return outcomes;
    };

    for key in first.metrics.keys() {
        let values: Vec<f64> = subset.iter().filter_map(|e| e.metrics.get(key).copied()).collect();
        if values.len() != subset.len() {
            continue;
        }
        let others: Vec<f64> = rest.iter().filter_map(|e| e.metrics.get(key).copied()).collect();
        let mean = stats::mean(&values);
        let reference = if others.is_empty() { 0.0 } else { stats::mean(&others) };
        if (mean - reference).abs() > stats::std_dev(&values) {
            outcomes.insert(key.clone(), mean);
        }
    }
    outcomes
}
