//! Mutation detector - baselines entity metrics and flags deviations.

use chrono::Utc;
use morphos_core::{
    EntityId, MorphosError, Mutation, MutationId, MutationStatus, MutationType, PropertyChange,
    RecognizedPattern, Result, SystemObserver, Time,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::baseline::{MutationBaseline, MutationObservation};
use crate::config::DetectionConfig;

/// Weight of baseline confidence in detection probability.
const CONFIDENCE_WEIGHT: f64 = 0.4;
/// Weight of inverse severity in detection probability.
const INVERSE_SEVERITY_WEIGHT: f64 = 0.3;
/// Weight of the configured stability factor in detection probability.
const STABILITY_WEIGHT: f64 = 0.3;

/// Detection counters exposed for observability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionMetrics {
    /// Detection cycles run
    pub cycles: u64,
    /// Observations ingested
    pub observations: u64,
    /// New mutations stored
    pub mutations_detected: u64,
    /// Existing mutations refreshed by a re-observation
    pub mutations_updated: u64,
    /// Candidate mutations discarded as invalid
    pub mutations_discarded: u64,
    /// Mutations purged after the time window
    pub mutations_expired: u64,
    /// Patterns skipped because of malformed input
    pub rejected_patterns: u64,
    /// Entities currently tracked
    pub entities_tracked: usize,
    /// Stored / (stored + discarded)
    pub accuracy: f64,
    /// Entities with a usable baseline / entities tracked
    pub coverage: f64,
}

#[derive(Default)]
struct DetectorState {
    observations: HashMap<EntityId, VecDeque<MutationObservation>>,
    baselines: HashMap<EntityId, HashMap<String, MutationBaseline>>,
    mutations: HashMap<MutationId, Mutation>,
    by_entity: HashMap<EntityId, MutationId>,
    metrics: DetectionMetrics,
}

/// Candidate produced while scanning one entity.
struct Candidate {
    changes: Vec<PropertyChange>,
    confidence: f64,
}

/// Watches entity metrics and tracks mutations.
pub struct MutationDetector {
    observer: Arc<dyn SystemObserver>,
    config: DetectionConfig,
    state: RwLock<DetectorState>,
}

impl MutationDetector {
    /// Create a detector with the default configuration.
    pub fn new(observer: Arc<dyn SystemObserver>) -> Self {
        Self {
            observer,
            config: DetectionConfig::default(),
            state: RwLock::new(DetectorState::default()),
        }
    }

    /// Create a detector with a validated configuration.
    pub fn try_new(observer: Arc<dyn SystemObserver>, config: DetectionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            observer,
            config,
            state: RwLock::new(DetectorState::default()),
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Run one detection cycle against the observer's current patterns.
    pub async fn detect(&self) -> Result<Vec<Mutation>> {
        let patterns = self
            .observer
            .current_patterns()
            .await
            .map_err(|e| MorphosError::operation("fetch recognized patterns", &e))?;
        Ok(self.detect_patterns(&patterns, Utc::now()).await)
    }

    /// Run one detection cycle over the given snapshot.
    ///
    /// Returns the mutations stored or refreshed by this cycle. Malformed
    /// patterns are skipped and counted; they never abort the cycle.
    pub async fn detect_patterns(&self, patterns: &[RecognizedPattern], now: Time) -> Vec<Mutation> {
        let mut state = self.state.write().await;
        state.metrics.cycles += 1;

        let mut touched = Vec::new();
        let mut seen = HashSet::new();

        for pattern in patterns {
            match self.process_pattern(&mut state, pattern, now) {
                Ok(Some(mutation)) => touched.push(mutation),
                Ok(None) => {}
                Err(e) => {
                    state.metrics.rejected_patterns += 1;
                    warn!("Skipping pattern {}: {}", pattern.id, e);
                }
            }
            seen.insert(pattern.entity_id.clone());
        }

        self.purge_expired(&mut state, now);
        self.evict_departed(&mut state, &seen, now);
        self.refresh_metrics(&mut state);

        info!(
            "Detection cycle {}: {} patterns, {} mutations touched, {} active",
            state.metrics.cycles,
            patterns.len(),
            touched.len(),
            state.mutations.len()
        );

        touched
    }

    fn process_pattern(
        &self,
        state: &mut DetectorState,
        pattern: &RecognizedPattern,
        now: Time,
    ) -> Result<Option<Mutation>> {
        if pattern.entity_id.as_str().is_empty() {
            return Err(MorphosError::validation("pattern has an empty entity id"));
        }

        let metrics: HashMap<String, f64> = pattern
            .metrics
            .iter()
            .filter(|(name, value)| {
                let finite = value.is_finite();
                if !finite {
                    debug!("Ignoring non-finite metric {} on {}", name, pattern.entity_id);
                }
                finite
            })
            .map(|(k, v)| (k.clone(), *v))
            .collect();

        if metrics.is_empty() {
            return Err(MorphosError::validation(format!(
                "pattern for {} carries no usable metrics",
                pattern.entity_id
            )));
        }

        let candidate = self.scan(state, &pattern.entity_id, &metrics);

        let mut anomalies: Vec<String> = candidate.changes.iter().map(|c| c.property.clone()).collect();
        anomalies.extend(pattern.anomalies.iter().cloned());
        anomalies.sort();
        anomalies.dedup();

        self.record_observation(
            state,
            MutationObservation {
                timestamp: pattern.observed_at,
                entity_id: pattern.entity_id.clone(),
                metrics,
                anomalies,
            },
            now,
        );

        if candidate.changes.is_empty() {
            return Ok(None);
        }

        Ok(self.store_candidate(state, pattern, candidate, now))
    }

    /// Compare metrics against the entity's existing baselines.
    fn scan(&self, state: &DetectorState, entity: &EntityId, metrics: &HashMap<String, f64>) -> Candidate {
        let mut changes = Vec::new();
        let mut confidences = Vec::new();

        let Some(baselines) = state.baselines.get(entity) else {
            return Candidate { changes, confidence: 0.0 };
        };

        let mut names: Vec<&String> = metrics.keys().collect();
        names.sort();

        for name in names {
            let value = metrics[name];
            let Some(baseline) = baselines.get(name) else {
                continue;
            };
            if baseline.sample_count() < self.config.min_observations {
                continue;
            }
            if baseline.is_deviation(value, self.config.deviation_ratio()) {
                changes.push(PropertyChange::new(name.clone(), baseline.mean, value));
                confidences.push(baseline.confidence);
            }
        }

        let confidence = morphos_core::stats::mean(&confidences);
        Candidate { changes, confidence }
    }

    /// Append an observation, prune the window and rebuild the entity's baselines.
    fn record_observation(&self, state: &mut DetectorState, observation: MutationObservation, now: Time) {
        let entity = observation.entity_id.clone();
        let window = state.observations.entry(entity.clone()).or_default();
        window.push_back(observation);

        let cutoff = now - self.config.time_window();
        while window.front().is_some_and(|o| o.timestamp < cutoff) {
            window.pop_front();
        }
        while window.len() > self.config.max_observations {
            window.pop_front();
        }

        let mut series: HashMap<String, Vec<f64>> = HashMap::new();
        for obs in window.iter() {
            for (name, value) in &obs.metrics {
                series.entry(name.clone()).or_default().push(*value);
            }
        }

        let full_confidence_at = self.config.min_observations * 2;
        let baselines = series
            .into_iter()
            .map(|(name, samples)| {
                let baseline = MutationBaseline::from_samples(name.clone(), samples, full_confidence_at, now);
                (name, baseline)
            })
            .collect();
        state.baselines.insert(entity, baselines);
        state.metrics.observations += 1;
    }

    fn store_candidate(
        &self,
        state: &mut DetectorState,
        pattern: &RecognizedPattern,
        candidate: Candidate,
        now: Time,
    ) -> Option<Mutation> {
        let mutation_type = self.classify(&candidate.changes);
        let severity = candidate.changes.iter().map(|c| c.delta.abs()).sum::<f64>()
            / candidate.changes.len() as f64;
        let probability = self.probability(candidate.confidence, severity);

        let within_window = now - pattern.observed_at <= self.config.time_window();
        if probability < self.config.detection_threshold || !within_window {
            state.metrics.mutations_discarded += 1;
            debug!(
                "Discarding candidate on {} (probability {:.3}, within window: {})",
                pattern.entity_id, probability, within_window
            );
            return None;
        }

        let existing = state
            .by_entity
            .get(&pattern.entity_id)
            .and_then(|id| state.mutations.get_mut(id));

        if let Some(mutation) = existing {
            mutation.mutation_type = mutation_type;
            mutation.changes = candidate.changes;
            mutation.severity = severity;
            mutation.probability = probability;
            mutation.updated_at = pattern.observed_at.max(mutation.updated_at);
            mutation.status = MutationStatus::Detected;
            state.metrics.mutations_updated += 1;
            debug!("Refreshed mutation {} on {}", mutation.id, mutation.source);
            return Some(mutation.clone());
        }

        let mutation = Mutation {
            id: MutationId::new(),
            mutation_type,
            source: pattern.entity_id.clone(),
            changes: candidate.changes,
            severity,
            probability,
            detected_at: pattern.observed_at,
            updated_at: pattern.observed_at,
            status: MutationStatus::Detected,
        };

        info!(
            "Detected {} mutation {} on {} (severity {:.3}, probability {:.3})",
            mutation.mutation_type, mutation.id, mutation.source, severity, probability
        );

        state.by_entity.insert(mutation.source.clone(), mutation.id);
        state.mutations.insert(mutation.id, mutation.clone());
        state.metrics.mutations_detected += 1;
        Some(mutation)
    }

    /// Classify a mutation from the metrics that fired.
    pub fn classify(&self, changes: &[PropertyChange]) -> MutationType {
        let matches_any = |name: &str, fragments: &[String]| {
            let lower = name.to_lowercase();
            fragments.iter().any(|f| lower.contains(&f.to_lowercase()))
        };

        let energetic = changes
            .iter()
            .any(|c| matches_any(&c.property, &self.config.energy_metrics));
        let structural = changes
            .iter()
            .any(|c| matches_any(&c.property, &self.config.structural_metrics));

        match (energetic, structural) {
            (true, true) => MutationType::Compound,
            (true, false) => MutationType::Energetic,
            (false, true) => MutationType::Structural,
            (false, false) => MutationType::Behavioral,
        }
    }

    /// Detection probability blended from confidence, inverse severity and stability.
    pub fn probability(&self, confidence: f64, severity: f64) -> f64 {
        let inverse_severity = 1.0 / (1.0 + severity.max(0.0));
        morphos_core::stats::clamp_unit(
            CONFIDENCE_WEIGHT * confidence
                + INVERSE_SEVERITY_WEIGHT * inverse_severity
                + STABILITY_WEIGHT * self.config.stability_factor,
        )
    }

    fn purge_expired(&self, state: &mut DetectorState, now: Time) {
        let window = self.config.time_window();
        let expired: Vec<MutationId> = state
            .mutations
            .values()
            .filter(|m| now - m.updated_at > window)
            .map(|m| m.id)
            .collect();

        for id in expired {
            if let Some(mutation) = state.mutations.remove(&id) {
                state.by_entity.remove(&mutation.source);
                state.metrics.mutations_expired += 1;
                debug!("Expired mutation {} on {}", mutation.id, mutation.source);
            }
        }
    }

    /// Drop windows and baselines of entities no longer reported whose window has emptied.
    fn evict_departed(&self, state: &mut DetectorState, seen: &HashSet<EntityId>, now: Time) {
        let cutoff = now - self.config.time_window();
        let mut departed = Vec::new();

        for (entity, window) in state.observations.iter_mut() {
            if seen.contains(entity) {
                continue;
            }
            while window.front().is_some_and(|o| o.timestamp < cutoff) {
                window.pop_front();
            }
            if window.is_empty() {
                departed.push(entity.clone());
            }
        }

        for entity in departed {
            state.observations.remove(&entity);
            state.baselines.remove(&entity);
            debug!("Evicted baselines for departed entity {}", entity);
        }
    }

    fn refresh_metrics(&self, state: &mut DetectorState) {
        let tracked = state.observations.len();
        let ready = state
            .baselines
            .values()
            .filter(|metrics| {
                metrics
                    .values()
                    .any(|b| b.sample_count() >= self.config.min_observations)
            })
            .count();

        let stored = state.metrics.mutations_detected + state.metrics.mutations_updated;
        let attempts = stored + state.metrics.mutations_discarded;

        state.metrics.entities_tracked = tracked;
        state.metrics.coverage = if tracked == 0 { 0.0 } else { ready as f64 / tracked as f64 };
        state.metrics.accuracy = if attempts == 0 { 1.0 } else { stored as f64 / attempts as f64 };
    }

    /// Point-in-time copy of the active mutations.
    pub async fn active_mutations(&self) -> Vec<Mutation> {
        let state = self.state.read().await;
        let mut mutations: Vec<Mutation> = state.mutations.values().cloned().collect();
        mutations.sort_by_key(|m| m.detected_at);
        mutations
    }

    /// Look up a mutation.
    pub async fn mutation(&self, id: MutationId) -> Result<Mutation> {
        self.state
            .read()
            .await
            .mutations
            .get(&id)
            .cloned()
            .ok_or_else(|| MorphosError::not_found("Mutation", id))
    }

    /// Move a tracked mutation to a new lifecycle status.
    pub async fn set_status(&self, id: MutationId, status: MutationStatus) -> Result<()> {
        let mut state = self.state.write().await;
        let mutation = state
            .mutations
            .get_mut(&id)
            .ok_or_else(|| MorphosError::not_found("Mutation", id))?;
        if mutation.status != status {
            debug!("Mutation {} {:?} -> {:?}", id, mutation.status, status);
            mutation.status = status;
        }
        Ok(())
    }

    /// Current baseline for one entity metric.
    pub async fn baseline(&self, entity: &EntityId, metric: &str) -> Option<MutationBaseline> {
        self.state
            .read()
            .await
            .baselines
            .get(entity)
            .and_then(|m| m.get(metric))
            .cloned()
    }

    /// Retained observations for an entity, oldest first.
    pub async fn observations(&self, entity: &EntityId) -> Vec<MutationObservation> {
        self.state
            .read()
            .await
            .observations
            .get(entity)
            .map(|w| w.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Detection counters.
    pub async fn metrics(&self) -> DetectionMetrics {
        self.state.read().await.metrics.clone()
    }
}
