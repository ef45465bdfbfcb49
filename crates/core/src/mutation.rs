//! Mutation model - detected deviations from baseline behavior.

use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::id::{EntityId, MutationId};
use crate::traits::{Identifiable, Scored, Timestamped};
use crate::Time;

/// Classification of a mutation by which metrics fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationType {
    /// Only energy-like metrics changed
    Energetic,
    /// Only structural metrics changed
    Structural,
    /// Neither energy-like nor structural metrics changed
    Behavioral,
    /// Both energy-like and structural metrics changed
    Compound,
}

impl MutationType {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationType::Energetic => "energetic",
            MutationType::Structural => "structural",
            MutationType::Behavioral => "behavioral",
            MutationType::Compound => "compound",
        }
    }
}

impl std::fmt::Display for MutationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a tracked mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    /// Freshly detected or re-observed
    Detected,
    /// An analysis exists for it
    Analyzed,
    /// A response is executing against it
    Responding,
    /// A response completed
    Resolved,
    /// Not re-observed within the time window
    Expired,
}

/// One metric's change relative to its baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyChange {
    /// Metric name
    pub property: String,

    /// Baseline mean before the change
    pub old_value: f64,

    /// Observed value
    pub new_value: f64,

    /// new_value - old_value
    pub delta: f64,
}

impl PropertyChange {
    /// Create a change record.
    pub fn new(property: impl Into<String>, old_value: f64, new_value: f64) -> Self {
        Self {
            property: property.into(),
            old_value,
            new_value,
            delta: new_value - old_value,
        }
    }

    /// |delta| / |old_value|, or |delta| when the baseline is zero.
    pub fn relative_change(&self) -> f64 {
        if self.old_value.abs() < f64::EPSILON {
            self.delta.abs()
        } else {
            self.delta.abs() / self.old_value.abs()
        }
    }
}

/// A detected, currently-tracked deviation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mutation {
    /// Unique identifier
    pub id: MutationId,

    /// Classification
    pub mutation_type: MutationType,

    /// Monitored entity the deviation was seen on
    pub source: EntityId,

    /// Property changes (never empty)
    pub changes: Vec<PropertyChange>,

    /// Mean absolute delta across changes
    pub severity: f64,

    /// Detection probability in [0, 1]
    pub probability: f64,

    /// First detection
    pub detected_at: Time,

    /// Last re-observation
    pub updated_at: Time,

    /// Lifecycle status
    pub status: MutationStatus,
}

impl Mutation {
    /// Names of the changed properties.
    pub fn properties(&self) -> impl Iterator<Item = &str> {
        self.changes.iter().map(|c| c.property.as_str())
    }

    /// Look up the change for a property.
    pub fn change(&self, property: &str) -> Option<&PropertyChange> {
        self.changes.iter().find(|c| c.property == property)
    }

    /// Context used for condition matching against this mutation.
    ///
    /// Keys: `severity`, `probability`, `type`, `source`, every changed
    /// property (new value) and `delta.<property>`.
    pub fn context(&self) -> Context {
        let mut context = Context::new();
        context.insert("severity".to_string(), serde_json::json!(self.severity));
        context.insert("probability".to_string(), serde_json::json!(self.probability));
        context.insert("type".to_string(), serde_json::json!(self.mutation_type.as_str()));
        context.insert("source".to_string(), serde_json::json!(self.source.as_str()));
        context.insert("mutation_id".to_string(), serde_json::json!(self.id.to_string()));
        for change in &self.changes {
            context.insert(change.property.clone(), serde_json::json!(change.new_value));
            context.insert(format!("delta.{}", change.property), serde_json::json!(change.delta));
        }
        context
    }
}

impl Identifiable for Mutation {
    type Id = MutationId;

    fn id(&self) -> &MutationId {
        &self.id
    }
}

impl Scored for Mutation {
    fn strength(&self) -> f64 {
        self.severity / (1.0 + self.severity)
    }

    fn stability(&self) -> f64 {
        self.probability
    }
}

impl Timestamped for Mutation {
    fn first_seen(&self) -> Time {
        self.detected_at
    }

    fn last_seen(&self) -> Time {
        self.updated_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Mutation {
        let now = chrono::Utc::now();
        Mutation {
            id: MutationId::new(),
            mutation_type: MutationType::Energetic,
            source: EntityId::new("core-1"),
            changes: vec![PropertyChange::new("energy", 10.0, 14.0)],
            severity: 4.0,
            probability: 0.7,
            detected_at: now,
            updated_at: now,
            status: MutationStatus::Detected,
        }
    }

    #[test]
    fn test_property_change_delta() {
        let change = PropertyChange::new("energy", 10.0, 14.0);
        assert_eq!(change.delta, 4.0);
        assert!((change.relative_change() - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_context_includes_properties_and_deltas() {
        let context = sample().context();
        assert_eq!(context["energy"], serde_json::json!(14.0));
        assert_eq!(context["delta.energy"], serde_json::json!(4.0));
        assert_eq!(context["type"], serde_json::json!("energetic"));
    }

    #[test]
    fn test_scored_strength_is_bounded() {
        let m = sample();
        assert!(m.strength() > 0.0 && m.strength() < 1.0);
    }
}
