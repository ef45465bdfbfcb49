//! Recurring mutation patterns and the predictions made from them.

use chrono::Duration;
use morphos_core::{
    match_ratio, stats, Condition, ConditionOp, Identifiable, Mutation, MutationId, MutationType,
    PatternId, PredictionId, Scored, Time, Timestamped,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Fraction of a group's members that must share a property for it to enter the signature.
const SIGNATURE_SUPPORT: f64 = 0.5;
/// Weight of the short-term trend when adjusting a prediction's probability.
const TREND_WEIGHT: f64 = 0.5;

/// A recurring shape of mutation extracted from temporally grouped history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationPattern {
    /// Unique identifier, stable across mining passes
    pub id: PatternId,

    /// Shared mutation type
    pub mutation_type: MutationType,

    /// Properties shared by at least half of each supporting group, sorted
    pub signature: Vec<String>,

    /// Supporting mutations
    pub mutation_ids: Vec<MutationId>,

    /// Estimated recurrence per hour
    pub frequency: f64,

    /// Change in occurrences between the last two windows, relative to the earlier one
    pub trend: f64,

    /// Conditions a mutation context must satisfy to match this pattern
    pub trigger_conditions: Vec<Condition>,

    /// Mean normalized severity of supporting mutations
    pub strength: f64,

    /// Mean detection probability of supporting mutations
    pub stability: f64,

    /// Earliest supporting detection
    pub first_seen: Time,

    /// Latest supporting detection
    pub last_seen: Time,
}

impl MutationPattern {
    /// Number of supporting mutations.
    pub fn occurrences(&self) -> usize {
        self.mutation_ids.len()
    }

    /// Fraction of trigger conditions the mutation satisfies.
    pub fn condition_match(&self, mutation: &Mutation) -> f64 {
        match_ratio(&self.trigger_conditions, &mutation.context())
    }
}

impl Identifiable for MutationPattern {
    type Id = PatternId;

    fn id(&self) -> &PatternId {
        &self.id
    }
}

impl Scored for MutationPattern {
    fn strength(&self) -> f64 {
        self.strength
    }

    fn stability(&self) -> f64 {
        self.stability
    }
}

impl Timestamped for MutationPattern {
    fn first_seen(&self) -> Time {
        self.first_seen
    }

    fn last_seen(&self) -> Time {
        self.last_seen
    }
}

/// Outcome of a prediction once its time frame elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionStatus {
    /// Time frame still open
    Pending,
    /// A matching mutation occurred
    Accurate,
    /// No sufficiently matching mutation occurred
    Inaccurate,
}

/// Expected recurrence of a pattern within a time frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    /// Unique identifier
    pub id: PredictionId,

    /// Pattern the prediction was made from
    pub pattern_id: PatternId,

    /// Expected mutation type
    pub mutation_type: MutationType,

    /// Conditions the recurring mutation is expected to satisfy
    pub expected_conditions: Vec<Condition>,

    /// Probability of recurrence within the time frame
    pub probability: f64,

    /// When the prediction was made
    pub predicted_at: Time,

    /// Length of the time frame in seconds
    pub time_frame_secs: i64,

    /// Verification outcome
    pub status: PredictionStatus,

    /// Best score observed during verification
    pub score: Option<f64>,

    /// When the prediction was verified
    pub verified_at: Option<Time>,
}

impl Prediction {
    /// End of the time frame.
    pub fn deadline(&self) -> Time {
        self.predicted_at + Duration::seconds(self.time_frame_secs)
    }

    /// Whether the prediction is due for verification at `now`.
    pub fn is_due(&self, now: Time) -> bool {
        self.status == PredictionStatus::Pending && now >= self.deadline()
    }
}

/// Split items into groups whose members fall within `window` of the group's first member.
pub fn temporal_groups<'a, T: Timestamped>(items: &'a [T], window: Duration) -> Vec<Vec<&'a T>> {
    let mut sorted: Vec<&T> = items.iter().collect();
    sorted.sort_by_key(|item| item.first_seen());

    let mut groups: Vec<Vec<&T>> = Vec::new();
    for item in sorted {
        match groups.last_mut() {
            Some(group) if item.first_seen() - group[0].first_seen() <= window => group.push(item),
            _ => groups.push(vec![item]),
        }
    }
    groups
}

/// Properties present in at least half of the group's mutations.
pub fn signature(group: &[&Mutation]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for mutation in group {
        let unique: BTreeSet<&str> = mutation.properties().collect();
        for property in unique {
            *counts.entry(property).or_default() += 1;
        }
    }

    let needed = group.len() as f64 * SIGNATURE_SUPPORT;
    let mut signature: Vec<String> = counts
        .into_iter()
        .filter(|(_, count)| *count as f64 >= needed)
        .map(|(property, _)| property.to_string())
        .collect();
    signature.sort();
    signature
}

/// Accumulates supporting groups for one (type, signature) key.
struct PatternBuilder<'a> {
    mutation_type: MutationType,
    signature: Vec<String>,
    members: Vec<&'a Mutation>,
}

impl PatternBuilder<'_> {
    fn trigger_conditions(&self) -> Vec<Condition> {
        let mut conditions = vec![Condition::equals(
            "type",
            serde_json::json!(self.mutation_type.as_str()),
        )];
        for property in &self.signature {
            let deltas: Vec<f64> = self
                .members
                .iter()
                .filter_map(|m| m.change(property))
                .map(|c| c.delta)
                .collect();
            let op = if stats::mean(&deltas) >= 0.0 {
                ConditionOp::Gt
            } else {
                ConditionOp::Lt
            };
            conditions.push(Condition::new(format!("delta.{}", property), op, 0.0));
        }
        conditions
    }

    fn build(self, id: PatternId, window: Duration, now: Time) -> MutationPattern {
        let first_seen = self.members.iter().map(|m| m.detected_at).min().unwrap_or(now);
        let last_seen = self.members.iter().map(|m| m.detected_at).max().unwrap_or(now);

        let span_hours = (last_seen - first_seen).max(window).num_seconds() as f64 / 3600.0;
        let frequency = self.members.len() as f64 / span_hours.max(f64::EPSILON);

        let recent = self
            .members
            .iter()
            .filter(|m| m.detected_at > now - window)
            .count() as f64;
        let previous = self
            .members
            .iter()
            .filter(|m| m.detected_at <= now - window && m.detected_at > now - window * 2)
            .count() as f64;
        let trend = (recent - previous) / previous.max(1.0);

        let strengths: Vec<f64> = self.members.iter().map(|m| m.strength()).collect();
        let stabilities: Vec<f64> = self.members.iter().map(|m| m.stability()).collect();

        MutationPattern {
            id,
            mutation_type: self.mutation_type,
            trigger_conditions: self.trigger_conditions(),
            signature: self.signature,
            mutation_ids: self.members.iter().map(|m| m.id).collect(),
            frequency,
            trend,
            strength: stats::mean(&strengths),
            stability: stats::mean(&stabilities),
            first_seen,
            last_seen,
        }
    }
}

/// Mine patterns from mutation history.
///
/// History is grouped by temporal proximity, then by type; each group with at
/// least `min_support` members contributes to the pattern keyed by its type
/// and signature. Ids of previously known patterns are preserved.
pub fn mine_patterns(
    history: &[Mutation],
    known: &HashMap<(MutationType, Vec<String>), PatternId>,
    window: Duration,
    min_support: usize,
    now: Time,
) -> Vec<MutationPattern> {
    let mut builders: HashMap<(MutationType, Vec<String>), PatternBuilder<'_>> = HashMap::new();

    for group in temporal_groups(history, window) {
        let mut by_type: HashMap<MutationType, Vec<&Mutation>> = HashMap::new();
        for mutation in group {
            by_type.entry(mutation.mutation_type).or_default().push(mutation);
        }

        for (mutation_type, members) in by_type {
            if members.len() < min_support {
                continue;
            }
            let signature = signature(&members);
            if signature.is_empty() {
                continue;
            }
            let builder = builders
                .entry((mutation_type, signature.clone()))
                .or_insert_with(|| PatternBuilder {
                    mutation_type,
                    signature,
                    members: Vec::new(),
                });
            builder.members.extend(members);
        }
    }

    let mut patterns: Vec<MutationPattern> = builders
        .into_iter()
        .map(|(key, builder)| {
            let id = known.get(&key).copied().unwrap_or_default();
            builder.build(id, window, now)
        })
        .collect();
    patterns.sort_by_key(|p| p.first_seen);
    patterns
}

/// Predict recurrence of a pattern within `horizon`.
///
/// The base probability follows a Poisson arrival at the pattern's frequency,
/// adjusted by the short-term trend.
pub fn predict(pattern: &MutationPattern, horizon: Duration, now: Time) -> Prediction {
    let expected = pattern.frequency * horizon.num_seconds() as f64 / 3600.0;
    let base = 1.0 - (-expected).exp();
    let probability = stats::clamp_unit(base * (1.0 + TREND_WEIGHT * pattern.trend));

    Prediction {
        id: PredictionId::new(),
        pattern_id: pattern.id,
        mutation_type: pattern.mutation_type,
        expected_conditions: pattern.trigger_conditions.clone(),
        probability,
        predicted_at: now,
        time_frame_secs: horizon.num_seconds(),
        status: PredictionStatus::Pending,
        score: None,
        verified_at: None,
    }
}

/// Thresholds used when judging a prediction.
#[derive(Debug, Clone, Copy)]
pub struct VerificationThresholds {
    /// Probability at or above which the composite check applies
    pub high_probability: f64,
    /// Minimum composite score for high-probability predictions
    pub composite: f64,
    /// Minimum condition match otherwise
    pub condition_match: f64,
}

/// Composite score: time decay × condition match × stability.
pub fn composite_score(prediction: &Prediction, mutation: &Mutation, condition_match: f64) -> f64 {
    let frame = prediction.time_frame_secs.max(1) as f64;
    let offset = (mutation.detected_at - prediction.predicted_at).num_seconds().max(0) as f64;
    let time_decay = 1.0 - 0.5 * (offset / frame).min(1.0);
    time_decay * condition_match * mutation.stability()
}

/// Judge a due prediction against mutations detected after it was made and
/// before its deadline.
///
/// Returns the resolved status and the best score seen.
pub fn verify(
    prediction: &Prediction,
    history: &[Mutation],
    thresholds: VerificationThresholds,
) -> (PredictionStatus, f64) {
    let deadline = prediction.deadline();
    let high_probability = prediction.probability >= thresholds.high_probability;

    let best = history
        .iter()
        .filter(|m| m.mutation_type == prediction.mutation_type)
        .filter(|m| m.detected_at > prediction.predicted_at && m.detected_at <= deadline)
        .map(|m| {
            let matched = match_ratio(&prediction.expected_conditions, &m.context());
            if high_probability {
                composite_score(prediction, m, matched)
            } else {
                matched
            }
        })
        .fold(0.0_f64, f64::max);

    let required = if high_probability {
        thresholds.composite
    } else {
        thresholds.condition_match
    };

    let status = if best >= required {
        PredictionStatus::Accurate
    } else {
        PredictionStatus::Inaccurate
    };
    (status, best)
}

#[cfg(test)]
mod tests {
    use super::*;
    use morphos_core::{EntityId, MutationStatus, PropertyChange};

    fn mutation(props: &[&str], at: Time, probability: f64) -> Mutation {
        Mutation {
            id: MutationId::new(),
            mutation_type: MutationType::Energetic,
            source: EntityId::new("core"),
            changes: props.iter().map(|p| PropertyChange::new(*p, 10.0, 12.0)).collect(),
            severity: 2.0,
            probability,
            detected_at: at,
            updated_at: at,
            status: MutationStatus::Detected,
        }
    }

    fn thresholds() -> VerificationThresholds {
        VerificationThresholds {
            high_probability: 0.7,
            composite: 0.85,
            condition_match: 0.7,
        }
    }

    #[test]
    fn test_temporal_grouping_splits_on_window() {
        let now = chrono::Utc::now();
        let history = vec![
            mutation(&["energy"], now, 0.8),
            mutation(&["energy"], now + Duration::minutes(30), 0.8),
            mutation(&["energy"], now + Duration::hours(3), 0.8),
        ];
        let groups = temporal_groups(&history, Duration::hours(1));
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);
    }

    #[test]
    fn test_signature_keeps_majority_properties() {
        let now = chrono::Utc::now();
        let a = mutation(&["energy", "power"], now, 0.8);
        let b = mutation(&["energy", "amplitude"], now, 0.8);
        let c = mutation(&["energy", "power"], now, 0.8);
        assert_eq!(signature(&[&a, &b, &c]), vec!["energy", "power"]);
    }

    #[test]
    fn test_mining_requires_support_and_preserves_ids() {
        let now = chrono::Utc::now();
        let history = vec![
            mutation(&["energy"], now - Duration::minutes(40), 0.8),
            mutation(&["energy"], now - Duration::minutes(20), 0.8),
        ];

        let patterns = mine_patterns(&history, &HashMap::new(), Duration::hours(1), 3, now);
        assert!(patterns.is_empty());

        let patterns = mine_patterns(&history, &HashMap::new(), Duration::hours(1), 2, now);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].occurrences(), 2);
        assert!((patterns[0].frequency - 2.0).abs() < 1e-9);

        let known = HashMap::from([(
            (MutationType::Energetic, vec!["energy".to_string()]),
            patterns[0].id,
        )]);
        let again = mine_patterns(&history, &known, Duration::hours(1), 2, now);
        assert_eq!(again[0].id, patterns[0].id);
    }

    #[test]
    fn test_prediction_probability_is_bounded() {
        let now = chrono::Utc::now();
        let history = vec![
            mutation(&["energy"], now - Duration::minutes(40), 0.8),
            mutation(&["energy"], now - Duration::minutes(20), 0.8),
        ];
        let pattern = mine_patterns(&history, &HashMap::new(), Duration::hours(1), 2, now).remove(0);
        let prediction = predict(&pattern, Duration::hours(1), now);
        assert!((0.0..=1.0).contains(&prediction.probability));
        assert_eq!(prediction.status, PredictionStatus::Pending);
        assert!(!prediction.is_due(now));
        assert!(prediction.is_due(now + Duration::hours(1)));
    }

    #[test]
    fn test_low_probability_prediction_uses_condition_match() {
        let now = chrono::Utc::now();
        let history = vec![
            mutation(&["energy"], now - Duration::minutes(40), 0.8),
            mutation(&["energy"], now - Duration::minutes(20), 0.8),
        ];
        let pattern = mine_patterns(&history, &HashMap::new(), Duration::hours(1), 2, now).remove(0);
        let mut prediction = predict(&pattern, Duration::hours(1), now);
        prediction.probability = 0.3;

        let recurrence = vec![mutation(&["energy"], now + Duration::minutes(50), 0.2)];
        let (status, score) = verify(&prediction, &recurrence, thresholds());
        assert_eq!(status, PredictionStatus::Accurate);
        assert!((score - 1.0).abs() < 1e-9);

        let (status, _) = verify(&prediction, &[], thresholds());
        assert_eq!(status, PredictionStatus::Inaccurate);
    }

    #[test]
    fn test_high_probability_prediction_needs_composite() {
        let now = chrono::Utc::now();
        let history = vec![
            mutation(&["energy"], now - Duration::minutes(40), 0.95),
            mutation(&["energy"], now - Duration::minutes(20), 0.95),
        ];
        let pattern = mine_patterns(&history, &HashMap::new(), Duration::hours(1), 2, now).remove(0);
        let mut prediction = predict(&pattern, Duration::hours(1), now);
        prediction.probability = 0.9;

        // Early, stable recurrence passes the composite check.
        let early = vec![mutation(&["energy"], now + Duration::minutes(5), 0.95)];
        assert_eq!(verify(&prediction, &early, thresholds()).0, PredictionStatus::Accurate);

        // A late, unstable recurrence matches conditions but fails the composite.
        let late = vec![mutation(&["energy"], now + Duration::minutes(55), 0.6)];
        let (status, score) = verify(&prediction, &late, thresholds());
        assert_eq!(status, PredictionStatus::Inaccurate);
        assert!(score < 0.85);
    }
}
