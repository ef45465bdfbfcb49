//! Analysis engine - turns detector output into analyses, patterns and predictions.

use chrono::{Duration, Utc};
use morphos_core::{
    MorphosError, Mutation, MutationId, MutationStatus, MutationType, PatternId, Result, Time,
};
use morphos_detection::MutationDetector;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::analyzer::{self, MutationAnalysis};
use crate::config::AnalysisConfig;
use crate::patterns::{self, MutationPattern, Prediction, PredictionStatus, VerificationThresholds};

/// Running analysis counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisMetrics {
    /// Analysis cycles run
    pub cycles: u64,
    /// Mutations seen across all cycles
    pub mutations_seen: u64,
    /// Mutations successfully analyzed across all cycles
    pub mutations_analyzed: u64,
    /// Correlations reported in the latest cycle
    pub correlations: usize,
    /// Patterns currently known
    pub patterns: usize,
    /// Predictions made
    pub predictions_made: u64,
    /// Predictions verified
    pub predictions_verified: u64,
    /// Verified predictions judged accurate
    pub predictions_accurate: u64,
    /// Accurate / verified
    pub accuracy: f64,
    /// Analyzed / seen
    pub coverage: f64,
}

#[derive(Default)]
struct AnalyzerState {
    history: VecDeque<Mutation>,
    analyses: HashMap<MutationId, MutationAnalysis>,
    patterns: HashMap<PatternId, MutationPattern>,
    predictions: Vec<Prediction>,
    metrics: AnalysisMetrics,
}

/// Consumes the detector's active mutations and explains them.
pub struct MutationAnalyzer {
    detector: Arc<MutationDetector>,
    config: AnalysisConfig,
    state: RwLock<AnalyzerState>,
}

impl MutationAnalyzer {
    /// Create an analyzer with the default configuration.
    pub fn new(detector: Arc<MutationDetector>) -> Self {
        Self {
            detector,
            config: AnalysisConfig::default(),
            state: RwLock::new(AnalyzerState::default()),
        }
    }

    /// Create an analyzer with a validated configuration.
    pub fn try_new(detector: Arc<MutationDetector>, config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            detector,
            config,
            state: RwLock::new(AnalyzerState::default()),
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Run one analysis cycle over the detector's current snapshot.
    pub async fn analyze(&self) -> Result<Vec<MutationAnalysis>> {
        let snapshot = self.detector.active_mutations().await;
        let analyses = self.analyze_mutations(&snapshot, Utc::now()).await;

        for mutation in snapshot.iter().filter(|m| m.status == MutationStatus::Detected) {
            if !analyses.iter().any(|a| a.mutation_id == mutation.id) {
                continue;
            }
            // The mutation may have expired since the snapshot was taken.
            if let Err(e) = self.detector.set_status(mutation.id, MutationStatus::Analyzed).await {
                debug!("Could not mark {} analyzed: {}", mutation.id, e);
            }
        }

        Ok(analyses)
    }

    /// Run one analysis cycle over the given mutations.
    ///
    /// Analyses from earlier cycles are superseded. A mutation that cannot be
    /// analyzed is skipped and lowers coverage.
    pub async fn analyze_mutations(&self, mutations: &[Mutation], now: Time) -> Vec<MutationAnalysis> {
        let mut state = self.state.write().await;
        state.metrics.cycles += 1;

        self.fold_history(&mut state, mutations);

        let window = self.config.pattern_window();
        let mut analyses = Vec::with_capacity(mutations.len());
        let mut correlations = 0usize;

        for mutation in mutations {
            state.metrics.mutations_seen += 1;
            match self.analyze_one(mutation, mutations, window, now) {
                Ok(analysis) => {
                    correlations += analysis.correlations.len();
                    state.metrics.mutations_analyzed += 1;
                    analyses.push(analysis);
                }
                Err(e) => warn!("Skipping analysis of {}: {}", mutation.id, e),
            }
        }

        state.analyses = analyses.iter().map(|a| (a.mutation_id, a.clone())).collect();
        state.metrics.correlations = correlations;

        self.refresh_patterns(&mut state, now);
        self.verify_predictions(&mut state, now);
        self.make_predictions(&mut state, now);
        self.refresh_metrics(&mut state);

        info!(
            "Analysis cycle {}: {} analyzed, {} correlations, {} patterns, {} pending predictions",
            state.metrics.cycles,
            analyses.len(),
            correlations,
            state.patterns.len(),
            state
                .predictions
                .iter()
                .filter(|p| p.status == PredictionStatus::Pending)
                .count()
        );

        analyses
    }

    fn analyze_one(
        &self,
        mutation: &Mutation,
        others: &[Mutation],
        window: Duration,
        now: Time,
    ) -> Result<MutationAnalysis> {
        if mutation.changes.is_empty() {
            return Err(MorphosError::validation(format!(
                "mutation {} carries no property changes",
                mutation.id
            )));
        }

        let mut correlations: Vec<_> = others
            .iter()
            .filter(|other| !other.changes.is_empty())
            .filter_map(|other| {
                analyzer::correlate(mutation, other, &self.config.correlation_weights, window)
            })
            .filter(|c| c.strength >= self.config.correlation_threshold)
            .collect();
        correlations.sort_by(|a, b| {
            b.strength
                .partial_cmp(&a.strength)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(MutationAnalysis {
            mutation_id: mutation.id,
            mutation_type: mutation.mutation_type,
            analyzed_at: now,
            causal_factors: analyzer::causal_factors(mutation),
            effects: analyzer::effects(mutation),
            correlations,
            risk: analyzer::assess_risk(mutation),
        })
    }

    /// Replace re-observed mutations in the history and append new ones.
    fn fold_history(&self, state: &mut AnalyzerState, mutations: &[Mutation]) {
        for mutation in mutations.iter().filter(|m| !m.changes.is_empty()) {
            match state.history.iter_mut().find(|h| h.id == mutation.id) {
                Some(existing) => *existing = mutation.clone(),
                None => state.history.push_back(mutation.clone()),
            }
        }
        while state.history.len() > self.config.max_history {
            state.history.pop_front();
        }
    }

    fn refresh_patterns(&self, state: &mut AnalyzerState, now: Time) {
        let known: HashMap<(MutationType, Vec<String>), PatternId> = state
            .patterns
            .values()
            .map(|p| ((p.mutation_type, p.signature.clone()), p.id))
            .collect();

        let history: Vec<Mutation> = state.history.iter().cloned().collect();
        let mined = patterns::mine_patterns(
            &history,
            &known,
            self.config.pattern_window(),
            self.config.min_pattern_support,
            now,
        );

        for pattern in &mined {
            if !state.patterns.contains_key(&pattern.id) {
                info!(
                    "New {} pattern {} over [{}] ({} occurrences)",
                    pattern.mutation_type,
                    pattern.id,
                    pattern.signature.join(", "),
                    pattern.occurrences()
                );
            }
        }
        state.patterns = mined.into_iter().map(|p| (p.id, p)).collect();
    }

    fn verify_predictions(&self, state: &mut AnalyzerState, now: Time) {
        let thresholds = VerificationThresholds {
            high_probability: self.config.high_probability_threshold,
            composite: self.config.accuracy_threshold,
            condition_match: self.config.condition_match_threshold,
        };
        let history: Vec<Mutation> = state.history.iter().cloned().collect();

        let mut verified = 0u64;
        let mut accurate = 0u64;
        for prediction in state.predictions.iter_mut().filter(|p| p.is_due(now)) {
            let (status, score) = patterns::verify(prediction, &history, thresholds);
            prediction.status = status;
            prediction.score = Some(score);
            prediction.verified_at = Some(now);
            verified += 1;
            if status == PredictionStatus::Accurate {
                accurate += 1;
            }
            debug!(
                "Prediction {} for pattern {} judged {:?} (score {:.3})",
                prediction.id, prediction.pattern_id, status, score
            );
        }

        state.metrics.predictions_verified += verified;
        state.metrics.predictions_accurate += accurate;

        // Keep resolved predictions no longer than the history bound.
        let excess = state.predictions.len().saturating_sub(self.config.max_history);
        if excess > 0 {
            let mut dropped = 0;
            state.predictions.retain(|p| {
                if dropped < excess && p.status != PredictionStatus::Pending {
                    dropped += 1;
                    false
                } else {
                    true
                }
            });
        }
    }

    fn make_predictions(&self, state: &mut AnalyzerState, now: Time) {
        let horizon = Duration::seconds(self.config.prediction_horizon_secs as i64);
        let mut made = Vec::new();

        for pattern in state.patterns.values() {
            let pending = state
                .predictions
                .iter()
                .any(|p| p.pattern_id == pattern.id && p.status == PredictionStatus::Pending);
            if pending {
                continue;
            }
            let prediction = patterns::predict(pattern, horizon, now);
            debug!(
                "Predicted recurrence of pattern {} with probability {:.3}",
                pattern.id, prediction.probability
            );
            made.push(prediction);
        }

        state.metrics.predictions_made += made.len() as u64;
        state.predictions.extend(made);
    }

    fn refresh_metrics(&self, state: &mut AnalyzerState) {
        let m = &mut state.metrics;
        m.patterns = state.patterns.len();
        m.accuracy = if m.predictions_verified == 0 {
            0.0
        } else {
            m.predictions_accurate as f64 / m.predictions_verified as f64
        };
        m.coverage = if m.mutations_seen == 0 {
            1.0
        } else {
            m.mutations_analyzed as f64 / m.mutations_seen as f64
        };
    }

    /// Latest analysis for a mutation.
    pub async fn analysis(&self, id: MutationId) -> Result<MutationAnalysis> {
        self.state
            .read()
            .await
            .analyses
            .get(&id)
            .cloned()
            .ok_or_else(|| MorphosError::not_found("MutationAnalysis", id))
    }

    /// Analyses produced by the latest cycle.
    pub async fn analyses(&self) -> Vec<MutationAnalysis> {
        let state = self.state.read().await;
        let mut analyses: Vec<MutationAnalysis> = state.analyses.values().cloned().collect();
        analyses.sort_by_key(|a| a.mutation_id);
        analyses
    }

    /// Known patterns, oldest first.
    pub async fn patterns(&self) -> Vec<MutationPattern> {
        let state = self.state.read().await;
        let mut patterns: Vec<MutationPattern> = state.patterns.values().cloned().collect();
        patterns.sort_by_key(|p| p.first_seen);
        patterns
    }

    /// All retained predictions, oldest first.
    pub async fn predictions(&self) -> Vec<Prediction> {
        self.state.read().await.predictions.clone()
    }

    /// Running counters.
    pub async fn metrics(&self) -> AnalysisMetrics {
        self.state.read().await.metrics.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use morphos_core::{EntityId, PropertyChange, RecognizedPattern, SystemObserver, SystemState};

    struct QuietObserver;

    #[async_trait]
    impl SystemObserver for QuietObserver {
        async fn current_patterns(&self) -> anyhow::Result<Vec<RecognizedPattern>> {
            Ok(Vec::new())
        }

        async fn current_state(&self) -> anyhow::Result<SystemState> {
            Ok(SystemState::calm())
        }
    }

    fn analyzer() -> MutationAnalyzer {
        let detector = Arc::new(MutationDetector::new(Arc::new(QuietObserver)));
        MutationAnalyzer::new(detector)
    }

    fn mutation(source: &str, props: &[&str], at: Time) -> Mutation {
        Mutation {
            id: MutationId::new(),
            mutation_type: MutationType::Energetic,
            source: EntityId::new(source),
            changes: props.iter().map(|p| PropertyChange::new(*p, 10.0, 12.0)).collect(),
            severity: 2.0,
            probability: 0.8,
            detected_at: at,
            updated_at: at,
            status: MutationStatus::Detected,
        }
    }

    #[tokio::test]
    async fn test_cycle_produces_correlated_analyses() {
        let analyzer = analyzer();
        let now = Utc::now();
        let a = mutation("core", &["energy", "power", "frequency", "amplitude"], now);
        let b = mutation("edge", &["energy", "power", "frequency", "latency"], now + Duration::minutes(30));

        let analyses = analyzer.analyze_mutations(&[a.clone(), b.clone()], now).await;
        assert_eq!(analyses.len(), 2);

        let analysis = analyzer.analysis(a.id).await.unwrap();
        assert_eq!(analysis.correlations.len(), 1);
        assert_eq!(analysis.correlations[0].mutation_id, b.id);
        assert!(analysis.correlations[0].strength >= 0.7);
        assert_eq!(analysis.effects.len(), 4);

        let metrics = analyzer.metrics().await;
        assert_eq!(metrics.correlations, 2);
        assert_eq!(metrics.coverage, 1.0);
    }

    #[tokio::test]
    async fn test_analyses_are_superseded_each_cycle() {
        let analyzer = analyzer();
        let now = Utc::now();
        let a = mutation("core", &["energy"], now);
        analyzer.analyze_mutations(&[a.clone()], now).await;
        analyzer.analyze_mutations(&[], now).await;

        assert!(analyzer.analyses().await.is_empty());
        assert!(matches!(
            analyzer.analysis(a.id).await,
            Err(MorphosError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_malformed_mutation_lowers_coverage() {
        let analyzer = analyzer();
        let now = Utc::now();
        let good = mutation("core", &["energy"], now);
        let mut bad = mutation("edge", &["energy"], now);
        bad.changes.clear();

        let analyses = analyzer.analyze_mutations(&[good, bad], now).await;
        assert_eq!(analyses.len(), 1);
        assert!((analyzer.metrics().await.coverage - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_patterns_and_predictions_flow() {
        let analyzer = analyzer();
        let start = Utc::now();
        let first = mutation("core", &["energy"], start);
        let second = mutation("edge", &["energy"], start + Duration::minutes(10));

        analyzer.analyze_mutations(&[first.clone()], start).await;
        assert!(analyzer.patterns().await.is_empty());

        let t = start + Duration::minutes(10);
        analyzer.analyze_mutations(&[first, second], t).await;
        let patterns = analyzer.patterns().await;
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].signature, vec!["energy"]);

        let predictions = analyzer.predictions().await;
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].status, PredictionStatus::Pending);

        // A second cycle inside the time frame adds no duplicate prediction.
        analyzer.analyze_mutations(&[], t + Duration::minutes(1)).await;
        assert_eq!(analyzer.predictions().await.len(), 1);

        // After the frame elapses with no recurrence the prediction is judged.
        analyzer.analyze_mutations(&[], t + Duration::hours(2)).await;
        let predictions = analyzer.predictions().await;
        assert_eq!(predictions[0].status, PredictionStatus::Inaccurate);
        let metrics = analyzer.metrics().await;
        assert_eq!(metrics.predictions_verified, 1);
        assert_eq!(metrics.accuracy, 0.0);
    }

    #[tokio::test]
    async fn test_invalid_config_fails_construction() {
        let detector = Arc::new(MutationDetector::new(Arc::new(QuietObserver)));
        let config = AnalysisConfig {
            correlation_threshold: 1.5,
            ..Default::default()
        };
        assert!(MutationAnalyzer::try_new(detector, config).is_err());
    }
}
