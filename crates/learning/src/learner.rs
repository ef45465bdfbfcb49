//! Learner - turns strategy outcomes into knowledge and feeds it back.

use chrono::Utc;
use morphos_core::{
    match_ratio, numeric, stats, ActionTemplate, Context, ExecutionId, ExperienceSource,
    LearningExperience, MorphosError, Result, StrategyId, Time, CONTEXT_SENTINEL, STRATEGY_OUTCOME,
};
use morphos_strategy::{ExecutionRecord, RuleSource, Strategy, StrategyManager, StrategyRule};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::LearningConfig;
use crate::knowledge::{KnowledgeStore, KnowledgeUnit};
use crate::memory::ExperienceMemory;
use crate::mining::{self, ExperiencePattern, MiningThresholds, PatternKind};
use crate::model::{LearningModel, TrainingParams};

/// Training summary of one model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelMetrics {
    /// Samples in the last training cycle
    pub samples: usize,
    /// Loss after the last cycle
    pub loss: f64,
    /// Training-set accuracy after the last cycle
    pub accuracy: f64,
}

/// Learning counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningMetrics {
    /// Learn cycles run
    pub cycles: u64,
    /// Experiences recorded in total
    pub experiences: u64,
    /// Experiences currently held
    pub memory: usize,
    /// Valid patterns mined in total
    pub patterns_mined: u64,
    /// Knowledge units held
    pub knowledge_units: usize,
    /// Units removed after decaying below the floor
    pub units_removed: u64,
    /// Share of successful experiences in memory
    pub success_rate: f64,
    /// New units in the last cycle relative to the units held before it
    pub knowledge_growth_rate: f64,
    /// Strategy parameter updates pushed
    pub parameters_updated: u64,
    /// Strategy rules newly added
    pub rules_added: u64,
    /// Strategy rule thresholds re-tuned
    pub rules_retuned: u64,
    /// Per outcome type
    pub models: BTreeMap<String, ModelMetrics>,
}

/// What one learn cycle did.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningReport {
    /// Strategy executions converted into experiences
    pub experiences_ingested: usize,
    /// Valid patterns found
    pub patterns: usize,
    /// Units created
    pub units_created: usize,
    /// Patterns merged into existing units
    pub units_merged: usize,
    /// Units whose confidence decayed
    pub units_decayed: usize,
    /// Units removed
    pub units_removed: usize,
    /// Parameter updates pushed
    pub parameters_updated: usize,
    /// Rules newly added
    pub rules_added: usize,
    /// Rule thresholds re-tuned
    pub rules_retuned: usize,
}

struct LearnerState {
    memory: ExperienceMemory,
    knowledge: KnowledgeStore,
    models: HashMap<String, LearningModel>,
    rng: StdRng,
    last_seen: Option<ExecutionId>,
    metrics: LearningMetrics,
}

/// Mines experiences into knowledge and feeds it back into the strategy manager.
pub struct Learner {
    strategies: Arc<StrategyManager>,
    config: LearningConfig,
    state: RwLock<LearnerState>,
}

impl Learner {
    /// Create a learner with the default configuration.
    pub fn new(strategies: Arc<StrategyManager>) -> Self {
        Self::build(strategies, LearningConfig::default())
    }

    /// Create a learner with a validated configuration.
    pub fn try_new(strategies: Arc<StrategyManager>, config: LearningConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(strategies, config))
    }

    fn build(strategies: Arc<StrategyManager>, config: LearningConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            strategies,
            state: RwLock::new(LearnerState {
                memory: ExperienceMemory::new(config.memory_capacity),
                knowledge: KnowledgeStore::new(),
                models: HashMap::new(),
                rng,
                last_seen: None,
                metrics: LearningMetrics::default(),
            }),
            config,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    /// Store an experience produced outside the strategy manager.
    pub async fn record_experience(&self, experience: LearningExperience) -> Result<()> {
        if experience.outcome_type.trim().is_empty() {
            return Err(MorphosError::validation("experience has no outcome type"));
        }
        if !experience.reward.is_finite() || experience.metrics.values().any(|v| !v.is_finite()) {
            return Err(MorphosError::validation(format!(
                "experience {} carries non-finite values",
                experience.id
            )));
        }

        let mut state = self.state.write().await;
        debug!("Recorded {} experience {}", experience.outcome_type, experience.id);
        state.memory.push(experience);
        state.metrics.experiences += 1;
        state.metrics.memory = state.memory.len();
        Ok(())
    }

    /// Run one learn cycle now.
    pub async fn learn(&self) -> LearningReport {
        self.learn_at(Utc::now()).await
    }

    /// Run one learn cycle at `now`.
    ///
    /// Ingests new strategy executions, mines patterns into knowledge,
    /// validates and decays existing knowledge, retrains the models and
    /// pushes parameters, rules and re-tuned thresholds back to the
    /// strategy manager. A rejected feedback call is logged and skipped.
    pub async fn learn_at(&self, now: Time) -> LearningReport {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let mut report = LearningReport::default();
        state.metrics.cycles += 1;

        report.experiences_ingested = self.ingest(state).await;

        let experiences: Vec<LearningExperience> = state.memory.iter().cloned().collect();
        let refs: Vec<&LearningExperience> = experiences.iter().collect();

        let patterns: Vec<ExperiencePattern> = mining::mine(
            &refs,
            MiningThresholds {
                min_support: self.config.min_support,
                correlation_floor: self.config.correlation_floor,
            },
        )
        .into_iter()
        .filter(|p| p.is_valid(self.config.min_confidence))
        .collect();
        report.patterns = patterns.len();

        let units_before = state.knowledge.len();
        let mut learned = Vec::with_capacity(patterns.len());
        for pattern in &patterns {
            let (id, created) = state.knowledge.upsert(pattern.clone(), now);
            if created {
                report.units_created += 1;
            } else {
                report.units_merged += 1;
            }
            learned.push((id, pattern));
        }
        state.knowledge.relink();

        report.units_decayed = state.knowledge.check_all(
            &refs,
            now,
            self.config.validation_age(),
            self.config.decay_factor,
        );
        let removed = state.knowledge.prune(self.config.min_confidence);
        for unit in &removed {
            info!(
                "Dropped knowledge {} ({}) at confidence {:.3}",
                unit.id,
                unit.signature,
                unit.confidence()
            );
        }
        report.units_removed = removed.len();

        self.train_models(state, &refs);

        for (id, pattern) in learned {
            let Some(strategy_id) = pattern.source.strategy() else {
                continue;
            };
            if state.knowledge.get(id).is_none() {
                continue;
            }
            let mut used = false;
            if pattern.kind == PatternKind::Success && pattern.confidence >= self.config.high_confidence {
                if self.push_parameters(strategy_id, pattern).await {
                    report.parameters_updated += 1;
                    used = true;
                }
            }
            if self.push_rule(strategy_id, pattern).await {
                report.rules_added += 1;
                used = true;
            }
            if used {
                state.knowledge.record_usage(id);
            }
        }

        report.rules_retuned = self.retune_rules(&refs).await;

        let metrics = &mut state.metrics;
        metrics.patterns_mined += report.patterns as u64;
        metrics.units_removed += report.units_removed as u64;
        metrics.parameters_updated += report.parameters_updated as u64;
        metrics.rules_added += report.rules_added as u64;
        metrics.rules_retuned += report.rules_retuned as u64;
        metrics.memory = state.memory.len();
        metrics.knowledge_units = state.knowledge.len();
        metrics.success_rate = state.memory.success_rate();
        metrics.knowledge_growth_rate = report.units_created as f64 / units_before.max(1) as f64;

        info!(
            "Learn cycle {}: {} ingested, {} patterns, {} units ({} new, {} removed)",
            metrics.cycles,
            report.experiences_ingested,
            report.patterns,
            metrics.knowledge_units,
            report.units_created,
            report.units_removed
        );
        report
    }

    /// Pull strategy executions stored since the last one ingested.
    async fn ingest(&self, state: &mut LearnerState) -> usize {
        let records = self.strategies.executions_after(state.last_seen).await;

        for record in &records {
            state.memory.push(experience_from(record));
            state.metrics.experiences += 1;
        }
        if let Some(last) = records.last() {
            state.last_seen = Some(last.id);
        }
        records.len()
    }

    fn train_models(&self, state: &mut LearnerState, experiences: &[&LearningExperience]) {
        let params = TrainingParams {
            learning_rate: self.config.learning_rate,
            momentum: self.config.momentum,
            l2_lambda: self.config.l2_lambda,
            epochs: self.config.epochs_per_cycle,
        };

        for outcome_type in state.memory.outcome_types() {
            let samples: Vec<&LearningExperience> = experiences
                .iter()
                .copied()
                .filter(|e| e.outcome_type == outcome_type)
                .collect();
            let mut features: Vec<String> = samples
                .iter()
                .flat_map(|e| e.context.iter())
                .filter(|(_, v)| numeric(v).is_some())
                .map(|(k, _)| k.clone())
                .collect();
            features.sort();
            features.dedup();

            let model = state
                .models
                .entry(outcome_type.clone())
                .or_insert_with(|| LearningModel::new(outcome_type.clone()));
            model.ensure_features(&features, &mut state.rng, self.config.exploration_rate);
            let (loss, accuracy) = model.train(&samples, params);
            debug!("Model {}: loss {:.4}, accuracy {:.2}", outcome_type, loss, accuracy);

            state.metrics.models.insert(
                outcome_type,
                ModelMetrics {
                    samples: samples.len(),
                    loss,
                    accuracy,
                },
            );
        }
    }

    /// Move strategy parameters to the values shared by its successes.
    async fn push_parameters(&self, strategy_id: &StrategyId, pattern: &ExperiencePattern) -> bool {
        let strategy = match self.strategies.get(strategy_id).await {
            Ok(strategy) => strategy,
            Err(e) => {
                debug!("Skipping parameter feedback: {}", e);
                return false;
            }
        };

        let updates: HashMap<String, f64> = strategy
            .parameters
            .iter()
            .filter_map(|(name, current)| {
                let learned = pattern.common_context.get(name).and_then(numeric)?;
                ((learned - current).abs() > f64::EPSILON).then(|| (name.clone(), learned))
            })
            .collect();
        if updates.is_empty() {
            return false;
        }

        match self.strategies.update_parameters(strategy_id, updates).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Parameter feedback for {} rejected: {}", strategy_id, e);
                false
            }
        }
    }

    /// Synthesize a rule from a pattern; returns whether it was new.
    ///
    /// Success and adaptation rules replay one of the strategy's actions
    /// with the values the pattern's experiences shared. Failure rules carry
    /// no action; the manager uses them to veto executions.
    async fn push_rule(&self, strategy_id: &StrategyId, pattern: &ExperiencePattern) -> bool {
        let source = match pattern.kind {
            PatternKind::Success => RuleSource::Success,
            PatternKind::Failure => RuleSource::Failure,
            PatternKind::Adaptation => RuleSource::Adaptation,
        };
        let mut rule = StrategyRule::new(format!("learned:{}", pattern.kind.as_str()), pattern.conditions.clone())
            .with_weight(pattern.kind.rule_weight(), pattern.confidence)
            .with_source(source);

        if pattern.kind.predicts_success() {
            match self.strategies.get(strategy_id).await {
                Ok(strategy) => {
                    if let Some(action) = learned_action(&strategy, &pattern.common_context) {
                        rule = rule.with_action(action);
                    }
                }
                Err(e) => {
                    debug!("Skipping rule feedback: {}", e);
                    return false;
                }
            }
        }

        match self.strategies.add_rule(strategy_id, rule).await {
            Ok(added) => added,
            Err(e) => {
                warn!("Rule feedback for {} rejected: {}", strategy_id, e);
                false
            }
        }
    }

    /// Re-tune rule thresholds of low-effectiveness strategies to the match
    /// ratios seen in their successful experiences.
    async fn retune_rules(&self, experiences: &[&LearningExperience]) -> usize {
        let mut retuned = 0;
        for strategy in self.strategies.low_effectiveness().await {
            let source = ExperienceSource::Strategy(strategy.id.clone());
            let successes: Vec<&LearningExperience> = experiences
                .iter()
                .copied()
                .filter(|e| e.success && e.source == source)
                .collect();
            if successes.is_empty() {
                continue;
            }

            for rule in &strategy.rules {
                let ratios: Vec<f64> = successes
                    .iter()
                    .map(|e| match_ratio(&rule.conditions, &e.context))
                    .collect();
                let Some(threshold) = stats::optimal_threshold(&ratios).map(stats::clamp_unit) else {
                    continue;
                };
                if (threshold - rule.threshold).abs() <= f64::EPSILON {
                    continue;
                }
                match self.strategies.retune_rule(&strategy.id, rule.id, threshold).await {
                    Ok(()) => {
                        debug!("Rule {} of {} re-tuned to {:.3}", rule.name, strategy.id, threshold);
                        retuned += 1;
                    }
                    Err(e) => warn!("Re-tune of rule {} rejected: {}", rule.name, e),
                }
            }
        }
        retuned
    }

    /// Predicted success probability for a context.
    pub async fn predict(&self, outcome_type: &str, context: &Context) -> Result<f64> {
        self.state
            .read()
            .await
            .models
            .get(outcome_type)
            .map(|m| m.predict(context))
            .ok_or_else(|| MorphosError::not_found("LearningModel", outcome_type))
    }

    /// Trained model for an outcome type.
    pub async fn model(&self, outcome_type: &str) -> Option<LearningModel> {
        self.state.read().await.models.get(outcome_type).cloned()
    }

    /// Knowledge units, most confident first.
    pub async fn knowledge(&self) -> Vec<KnowledgeUnit> {
        self.state.read().await.knowledge.list().into_iter().cloned().collect()
    }

    /// Experiences in memory, oldest first.
    pub async fn experiences(&self) -> Vec<LearningExperience> {
        self.state.read().await.memory.iter().cloned().collect()
    }

    /// Learning counters.
    pub async fn metrics(&self) -> LearningMetrics {
        self.state.read().await.metrics.clone()
    }
}

/// One of the strategy's actions with its parameters pinned to shared values.
///
/// A parameter is pinned when the context holds a numeric value for the key
/// it references (`$key`) or for its own name. The first action with a
/// pinned parameter wins; otherwise the first action is replayed as is.
fn learned_action(strategy: &Strategy, common: &Context) -> Option<ActionTemplate> {
    let mut fallback = None;
    for template in &strategy.actions {
        let mut action = template.clone();
        let mut pinned = 0;
        for (name, value) in action.parameters.iter_mut() {
            let key = value
                .as_str()
                .and_then(|s| s.strip_prefix(CONTEXT_SENTINEL))
                .unwrap_or(name)
                .to_string();
            if let Some(learned) = common.get(&key).and_then(numeric) {
                *value = serde_json::json!(learned);
                pinned += 1;
            }
        }
        if pinned > 0 {
            return Some(action);
        }
        fallback.get_or_insert(action);
    }
    fallback
}

fn experience_from(record: &ExecutionRecord) -> LearningExperience {
    let mut metrics = record.metrics.clone();
    metrics.insert("failed_actions".to_string(), record.actions_failed as f64);

    LearningExperience::new(
        ExperienceSource::Strategy(record.strategy_id.clone()),
        STRATEGY_OUTCOME,
        record.context.clone(),
        record.success,
    )
    .with_metrics(metrics)
    .at(record.finished_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use morphos_core::{
        ActionExecutor, ActionKind, ActionOutcome, ActionTemplate, Condition, Context,
        RecognizedPattern, ResponseAction, SystemObserver, SystemState,
    };
    use morphos_strategy::{Strategy, StrategyConfig, StrategyType};
    use serde_json::json;

    struct CalmObserver;

    #[async_trait]
    impl SystemObserver for CalmObserver {
        async fn current_patterns(&self) -> anyhow::Result<Vec<RecognizedPattern>> {
            Ok(Vec::new())
        }

        async fn current_state(&self) -> anyhow::Result<SystemState> {
            Ok(SystemState::calm())
        }
    }

    /// Succeeds while the dispatched entropy stays low.
    struct EntropyExecutor;

    #[async_trait]
    impl ActionExecutor for EntropyExecutor {
        async fn execute(&self, action: &ResponseAction) -> anyhow::Result<ActionOutcome> {
            let entropy = action.numeric_parameters().get("entropy").copied().unwrap_or(0.0);
            if entropy > 0.5 {
                return Ok(ActionOutcome::rejected("too turbulent"));
            }
            let mut outcome = ActionOutcome::ok("damped");
            outcome.metrics.insert("gain".to_string(), 1.0);
            Ok(outcome)
        }
    }

    fn strategy() -> Strategy {
        Strategy::new("damping", "Damping", StrategyType::Corrective, 50).with_action(
            ActionTemplate::new(ActionKind::AdjustParameter, "damping", 5)
                .with_parameter("entropy", json!("$entropy")),
        )
    }

    fn context(entropy: f64) -> Context {
        Context::from([
            ("entropy".to_string(), json!(entropy)),
            ("phase".to_string(), json!("stable")),
        ])
    }

    async fn manager(config: StrategyConfig, strategy: Strategy) -> Arc<StrategyManager> {
        let manager = StrategyManager::try_new(Arc::new(EntropyExecutor), Arc::new(CalmObserver), config).unwrap();
        manager.register(strategy).await.unwrap();
        Arc::new(manager)
    }

    fn learning_config() -> LearningConfig {
        LearningConfig {
            seed: Some(11),
            ..Default::default()
        }
    }

    async fn run(manager: &StrategyManager, entropies: &[f64]) {
        let start = Utc::now();
        for (i, entropy) in entropies.iter().enumerate() {
            manager
                .execute_in(&context(*entropy), start + chrono::Duration::milliseconds(i as i64))
                .await;
        }
    }

    #[tokio::test]
    async fn test_learns_rules_from_strategy_outcomes() {
        let manager = manager(StrategyConfig::default(), strategy()).await;
        run(&manager, &[0.1, 0.8, 0.2, 0.15, 0.9, 0.12]).await;

        let learner = Learner::try_new(manager.clone(), learning_config()).unwrap();
        let report = learner.learn().await;

        assert_eq!(report.experiences_ingested, 6);
        // success (4/6) and adaptation (2 recoveries of 2 failures)
        assert_eq!(report.patterns, 2);
        assert_eq!(report.units_created, 2);
        assert_eq!(report.rules_added, 2);

        let stored = manager.get(&StrategyId::new("damping")).await.unwrap();
        let success = stored.rules.iter().find(|r| r.name == "learned:success").unwrap();
        assert_eq!(success.weight, 1.2);
        assert_eq!(success.source, RuleSource::Success);
        assert_eq!(success.conditions, vec![Condition::new("entropy", morphos_core::ConditionOp::Le, 0.2)]);
        let adaptation = stored.rules.iter().find(|r| r.name == "learned:adaptation").unwrap();
        assert_eq!(adaptation.weight, 1.1);
        assert!(adaptation.action.is_some());

        // The success rule replays the damping action at the mean entropy of the successes.
        let replay = success.action.as_ref().unwrap();
        assert_eq!(replay.target, "damping");
        assert!((replay.parameters["entropy"].as_f64().unwrap() - 0.1425).abs() < 1e-9);

        let low = learner.predict(STRATEGY_OUTCOME, &context(0.1)).await.unwrap();
        assert!((0.0..=1.0).contains(&low));
        assert!(learner.predict("unknown", &context(0.1)).await.is_err());

        // Nothing new to ingest; patterns merge into existing units
        let again = learner.learn().await;
        assert_eq!(again.experiences_ingested, 0);
        assert_eq!(again.units_created, 0);
        assert_eq!(again.units_merged, 2);
        assert_eq!(again.rules_added, 0);

        let metrics = learner.metrics().await;
        assert_eq!(metrics.cycles, 2);
        assert_eq!(metrics.knowledge_units, 2);
        assert!(metrics.models.contains_key(STRATEGY_OUTCOME));

        // A calm context now fires the success rule on top of the base action.
        let records = manager
            .execute_in(&context(0.1), Utc::now() + chrono::Duration::seconds(1))
            .await;
        assert!(records[0].actions_run >= 2);
        assert!(records[0].success);
    }

    #[tokio::test]
    async fn test_ingests_executions_sharing_a_finish_time() {
        let manager = manager(StrategyConfig::default(), strategy()).await;
        let learner = Learner::try_new(manager.clone(), learning_config()).unwrap();

        // Executions at a future instant all finish at that instant.
        let later = Utc::now() + chrono::Duration::hours(1);
        manager.execute_in(&context(0.1), later).await;
        manager.execute_in(&context(0.2), later).await;
        assert_eq!(learner.learn().await.experiences_ingested, 2);

        manager.execute_in(&context(0.3), later).await;
        assert_eq!(learner.learn().await.experiences_ingested, 1);
        assert_eq!(learner.learn().await.experiences_ingested, 0);
        assert_eq!(learner.metrics().await.experiences, 3);
    }

    #[tokio::test]
    async fn test_confident_success_updates_parameters() {
        let manager = manager(StrategyConfig::default(), strategy().with_parameter("gain", 0.5)).await;
        run(&manager, &[0.1, 0.2]).await;
        let id = StrategyId::new("damping");
        manager
            .update_parameters(&id, HashMap::from([("gain".to_string(), 0.7)]))
            .await
            .unwrap();
        run(&manager, &[0.1, 0.2]).await;

        let learner = Learner::try_new(manager.clone(), learning_config()).unwrap();
        let report = learner.learn().await;
        assert_eq!(report.parameters_updated, 1);
        assert!((manager.get(&id).await.unwrap().parameters["gain"] - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_retunes_rules_of_weak_strategies() {
        let config = StrategyConfig {
            update_interval_secs: 0,
            min_executions_for_eviction: 100,
            ..Default::default()
        };
        let rule = StrategyRule::new(
            "calm-and-loaded",
            vec![Condition::equals("phase", json!("stable")), Condition::exists("load")],
        );
        let manager = manager(config, strategy().with_rule(rule)).await;
        run(&manager, &[0.1, 0.9, 0.9, 0.9, 0.9, 0.9]).await;
        assert_eq!(manager.low_effectiveness().await.len(), 1);

        let learner = Learner::try_new(manager.clone(), learning_config()).unwrap();
        let report = learner.learn().await;
        // the freshly learned failure rule half-matches the lone success as well
        assert_eq!(report.rules_added, 1);
        assert_eq!(report.rules_retuned, 2);

        let stored = manager.get(&StrategyId::new("damping")).await.unwrap();
        let rule = stored.rules.iter().find(|r| r.name == "calm-and-loaded").unwrap();
        assert!((rule.threshold - 0.5).abs() < 1e-9);
        let failure = stored.rules.iter().find(|r| r.source == RuleSource::Failure).unwrap();
        assert!(failure.action.is_none());
    }

    #[tokio::test]
    async fn test_record_experience_validates() {
        let manager = manager(StrategyConfig::default(), strategy()).await;
        let learner = Learner::new(manager);

        let bad = LearningExperience::new(ExperienceSource::External("x".to_string()), "", Context::new(), true);
        assert!(matches!(
            learner.record_experience(bad).await,
            Err(MorphosError::Validation(_))
        ));

        let good = LearningExperience::new(ExperienceSource::External("x".to_string()), "calibration", Context::new(), true);
        learner.record_experience(good).await.unwrap();
        assert_eq!(learner.experiences().await.len(), 1);
        assert_eq!(learner.metrics().await.experiences, 1);
    }
}
