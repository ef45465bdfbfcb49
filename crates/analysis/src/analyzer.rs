//! Analyzes individual mutations: causes, effects, correlations and risk.

use chrono::Duration;
use morphos_core::{stats, Mutation, MutationId, MutationType, Time};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::config::CorrelationWeights;

/// Severity at or above which risk is at least medium.
pub const MEDIUM_RISK_SEVERITY: f64 = 0.5;
/// Severity at or above which risk is high.
pub const HIGH_RISK_SEVERITY: f64 = 0.8;
/// Relative change below which an effect is considered reversible.
const REVERSIBLE_RELATIVE_CHANGE: f64 = 0.5;
/// Weight given to the mutation-type causal factor.
const TYPE_FACTOR_WEIGHT: f64 = 0.5;

/// A weighted cause of a mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalFactor {
    /// Factor name (`source:<entity>`, `type:<kind>`, `property:<metric>`)
    pub factor: String,
    /// Weight in [0, 1]
    pub weight: f64,
    /// Supporting evidence
    pub evidence: Vec<String>,
}

/// A downstream effect of a mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    /// Affected property
    pub target: String,
    /// |delta|
    pub magnitude: f64,
    /// |delta| / |old|
    pub relative_change: f64,
    /// Whether the effect is expected to revert on its own
    pub reversible: bool,
}

/// Whether two correlated mutations move together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationDirection {
    /// Shared properties trend the same way
    Positive,
    /// Shared properties trend opposite ways
    Negative,
    /// Mixed or no shared properties
    Neutral,
}

/// Relationship between two analyzed mutations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    /// The other mutation
    pub mutation_id: MutationId,
    /// Strength in [0, 1]
    pub strength: f64,
    /// Trend direction
    pub direction: CorrelationDirection,
    /// other.detected_at - this.detected_at, in seconds
    pub time_offset_secs: i64,
    /// Properties both mutations changed
    pub shared_features: Vec<String>,
}

/// Risk bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// severity < 0.5
    Low,
    /// 0.5 <= severity < 0.8
    Medium,
    /// severity >= 0.8
    High,
}

impl RiskLevel {
    /// Bucket a severity.
    pub fn from_severity(severity: f64) -> Self {
        if severity >= HIGH_RISK_SEVERITY {
            RiskLevel::High
        } else if severity >= MEDIUM_RISK_SEVERITY {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// Risk assessment for one mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Bucket
    pub level: RiskLevel,
    /// severity × probability
    pub score: f64,
    /// Suggested mitigations
    pub mitigations: Vec<String>,
}

/// Derived explanation of one mutation, superseded every cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationAnalysis {
    /// Analyzed mutation
    pub mutation_id: MutationId,
    /// Mutation classification
    pub mutation_type: MutationType,
    /// When the analysis was produced
    pub analyzed_at: Time,
    /// Causes, heaviest first
    pub causal_factors: Vec<CausalFactor>,
    /// Effects, one per property change
    pub effects: Vec<Effect>,
    /// Correlations above the threshold, strongest first
    pub correlations: Vec<Correlation>,
    /// Risk
    pub risk: RiskAssessment,
}

/// Derive causal factors from a mutation's source, type and changes.
pub fn causal_factors(mutation: &Mutation) -> Vec<CausalFactor> {
    let mut factors = vec![
        CausalFactor {
            factor: format!("source:{}", mutation.source),
            weight: stats::clamp_unit(mutation.probability),
            evidence: vec![format!("deviation observed on {}", mutation.source)],
        },
        CausalFactor {
            factor: format!("type:{}", mutation.mutation_type),
            weight: TYPE_FACTOR_WEIGHT,
            evidence: vec![format!("{} metrics fired", mutation.mutation_type)],
        },
    ];

    let total: f64 = mutation.changes.iter().map(|c| c.delta.abs()).sum();
    for change in &mutation.changes {
        let weight = if total > 0.0 {
            change.delta.abs() / total
        } else {
            1.0 / mutation.changes.len() as f64
        };
        factors.push(CausalFactor {
            factor: format!("property:{}", change.property),
            weight,
            evidence: vec![format!(
                "{} moved from {:.3} to {:.3}",
                change.property, change.old_value, change.new_value
            )],
        });
    }

    factors.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal));
    factors
}

/// Derive effects from a mutation's property changes.
pub fn effects(mutation: &Mutation) -> Vec<Effect> {
    mutation
        .changes
        .iter()
        .map(|change| {
            let relative_change = change.relative_change();
            Effect {
                target: change.property.clone(),
                magnitude: change.delta.abs(),
                relative_change,
                reversible: relative_change < REVERSIBLE_RELATIVE_CHANGE,
            }
        })
        .collect()
}

/// Time proximity: 1.0 within the window, decaying as window/Δt beyond it.
pub fn time_proximity(a: Time, b: Time, window: Duration) -> f64 {
    let dt = (a - b).num_seconds().abs() as f64;
    let w = window.num_seconds().max(1) as f64;
    if dt <= w {
        1.0
    } else {
        w / dt
    }
}

fn factor_names(mutation: &Mutation) -> HashSet<String> {
    causal_factors(mutation).into_iter().map(|f| f.factor).collect()
}

/// Correlate two mutations; `None` when they are the same mutation.
pub fn correlate(
    a: &Mutation,
    b: &Mutation,
    weights: &CorrelationWeights,
    window: Duration,
) -> Option<Correlation> {
    if a.id == b.id {
        return None;
    }

    let features_a: HashSet<&str> = a.properties().collect();
    let features_b: HashSet<&str> = b.properties().collect();
    let feature_overlap = stats::overlap_ratio(&features_a, &features_b);
    let causal_overlap = stats::overlap_ratio(&factor_names(a), &factor_names(b));
    let time = time_proximity(a.detected_at, b.detected_at, window);

    let strength = stats::clamp_unit(
        weights.time * time + weights.features * feature_overlap + weights.causal * causal_overlap,
    );

    let mut shared_features: Vec<String> = features_a
        .intersection(&features_b)
        .map(|s| s.to_string())
        .collect();
    shared_features.sort();

    Some(Correlation {
        mutation_id: b.id,
        strength,
        direction: direction(a, b, &shared_features),
        time_offset_secs: (b.detected_at - a.detected_at).num_seconds(),
        shared_features,
    })
}

fn direction(a: &Mutation, b: &Mutation, shared: &[String]) -> CorrelationDirection {
    let mut same = 0usize;
    let mut opposite = 0usize;
    for property in shared {
        let (Some(ca), Some(cb)) = (a.change(property), b.change(property)) else {
            continue;
        };
        if ca.delta == 0.0 || cb.delta == 0.0 {
            continue;
        }
        if ca.delta.signum() == cb.delta.signum() {
            same += 1;
        } else {
            opposite += 1;
        }
    }
    match (same, opposite) {
        (s, 0) if s > 0 => CorrelationDirection::Positive,
        (0, o) if o > 0 => CorrelationDirection::Negative,
        _ => CorrelationDirection::Neutral,
    }
}

/// Assess risk from severity and probability, picking mitigations by level and type.
pub fn assess_risk(mutation: &Mutation) -> RiskAssessment {
    let level = RiskLevel::from_severity(mutation.severity);
    let type_specific = match mutation.mutation_type {
        MutationType::Energetic => "dampen energy input",
        MutationType::Structural => "reinforce structural links",
        MutationType::Behavioral => "reset behavioral parameters",
        MutationType::Compound => "stage stabilization across subsystems",
    };

    let mitigations = match level {
        RiskLevel::Low => vec!["monitor".to_string()],
        RiskLevel::Medium => vec!["increase sampling rate".to_string(), type_specific.to_string()],
        RiskLevel::High => vec![
            format!("isolate {}", mutation.source),
            type_specific.to_string(),
            "prepare parameter rollback".to_string(),
        ],
    };

    RiskAssessment {
        level,
        score: mutation.severity * mutation.probability,
        mitigations,
    }
}
