//! Inbound contract with the pattern-recognition subsystem.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::id::EntityId;
use crate::state::SystemState;
use crate::traits::{Identifiable, Scored, Timestamped};
use crate::Time;

/// A pattern the recognition subsystem currently sees on one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizedPattern {
    /// Pattern identifier assigned by the recognizer
    pub id: String,

    /// Entity the pattern was observed on
    pub entity_id: EntityId,

    /// Recognizer-specific kind
    pub kind: String,

    /// Strength in [0, 1]
    pub strength: f64,

    /// Stability in [0, 1]
    pub stability: f64,

    /// Current metric values
    pub metrics: HashMap<String, f64>,

    /// Anomaly names the recognizer already flagged
    pub anomalies: Vec<String>,

    /// When the snapshot was taken
    pub observed_at: Time,
}

impl RecognizedPattern {
    /// Create a pattern snapshot with neutral scores.
    pub fn new(entity_id: impl Into<String>, metrics: HashMap<String, f64>, observed_at: Time) -> Self {
        let entity_id = EntityId::new(entity_id);
        Self {
            id: format!("pattern:{}", entity_id),
            entity_id,
            kind: "metric".to_string(),
            strength: 1.0,
            stability: 1.0,
            metrics,
            anomalies: Vec::new(),
            observed_at,
        }
    }
}

impl Identifiable for RecognizedPattern {
    type Id = String;

    fn id(&self) -> &String {
        &self.id
    }
}

impl Scored for RecognizedPattern {
    fn strength(&self) -> f64 {
        self.strength
    }

    fn stability(&self) -> f64 {
        self.stability
    }
}

impl Timestamped for RecognizedPattern {
    fn first_seen(&self) -> Time {
        self.observed_at
    }

    fn last_seen(&self) -> Time {
        self.observed_at
    }
}

/// Source of pattern snapshots and system state.
#[async_trait]
pub trait SystemObserver: Send + Sync {
    /// Patterns currently recognized on monitored entities.
    async fn current_patterns(&self) -> anyhow::Result<Vec<RecognizedPattern>>;

    /// Current aggregate state of the monitored system.
    async fn current_state(&self) -> anyhow::Result<SystemState>;
}
