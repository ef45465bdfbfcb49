//! Closed-loop scenarios driven through the public engine API.

use async_trait::async_trait;
use chrono::Utc;
use morphos_core::{
    ActionExecutor, ActionKind, ActionOutcome, ActionTemplate, Condition, ConditionOp, ExperienceSource,
    MorphosError, MutationStatus, ObjectiveId, RecognizedPattern, ResponseAction, StrategyId, SystemObserver,
    SystemState, OPTIMIZATION_OUTCOME,
};
use morphos_engine::{AdaptationEngine, EngineConfig};
use morphos_optimization::{Objective, ObjectiveKind, ParameterSpec};
use morphos_response::{ResponseStatus, ResponseStrategy, SYSTEM_TARGET};
use morphos_strategy::{RuleSource, Strategy, StrategyType};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Replays queued `energy` readings for one entity, then holds at 10.
#[derive(Default)]
struct ScriptedObserver {
    energy: Mutex<VecDeque<f64>>,
    offline: AtomicBool,
}

impl ScriptedObserver {
    fn with_energy(values: &[f64]) -> Self {
        Self {
            energy: Mutex::new(values.iter().copied().collect()),
            offline: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl SystemObserver for ScriptedObserver {
    async fn current_patterns(&self) -> anyhow::Result<Vec<RecognizedPattern>> {
        if self.offline.load(Ordering::SeqCst) {
            anyhow::bail!("recognizer offline")
        }
        let value = self.energy.lock().unwrap().pop_front().unwrap_or(10.0);
        Ok(vec![RecognizedPattern::new(
            "core",
            HashMap::from([("energy".to_string(), value)]),
            Utc::now(),
        )])
    }

    async fn current_state(&self) -> anyhow::Result<SystemState> {
        if self.offline.load(Ordering::SeqCst) {
            anyhow::bail!("simulation offline")
        }
        Ok(SystemState::calm())
    }
}

#[derive(Default)]
struct RecordingExecutor {
    seen: Mutex<Vec<ResponseAction>>,
}

impl RecordingExecutor {
    fn seen(&self) -> Vec<ResponseAction> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionExecutor for RecordingExecutor {
    async fn execute(&self, action: &ResponseAction) -> anyhow::Result<ActionOutcome> {
        self.seen.lock().unwrap().push(action.clone());
        Ok(ActionOutcome::ok("applied"))
    }
}

fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.learning.seed = Some(1);
    config.optimization.seed = Some(5);
    config.optimization.iterations_per_cycle = 100;
    config.optimization.max_iterations = 100;
    config
}

fn engine(observer: Arc<ScriptedObserver>, executor: Arc<RecordingExecutor>) -> AdaptationEngine {
    AdaptationEngine::new(observer, executor, config()).unwrap()
}

#[tokio::test]
async fn test_mutation_is_detected_handled_and_resolved() {
    init_tracing();
    let observer = Arc::new(ScriptedObserver::with_energy(&[9.0, 11.0, 9.0, 11.0, 9.0, 11.0, 14.0]));
    let executor = Arc::new(RecordingExecutor::default());
    let engine = engine(observer, executor.clone());

    engine
        .handler()
        .register_strategy(
            ResponseStrategy::new("damp", "Damp energy", 80)
                .with_condition(Condition::new("severity", ConditionOp::Gt, 1.0))
                .with_action(
                    ActionTemplate::new(ActionKind::AdjustParameter, "damping", 10)
                        .with_parameter("level", json!("$severity")),
                ),
        )
        .await
        .unwrap();

    for _ in 0..6 {
        let report = engine.run_cycle().await;
        assert!(report.is_clean(), "{:?}", report.errors);
        assert_eq!(report.mutations, 0);
        assert_eq!(report.responses, 0);
    }

    let report = engine.run_cycle().await;
    assert_eq!(report.cycle, 7);
    assert_eq!(report.mutations, 1);
    assert!(report.analyses >= 1);
    assert_eq!(report.responses, 1);

    let seen = executor.seen();
    let damping: Vec<&ResponseAction> = seen.iter().filter(|a| a.target == "damping").collect();
    assert_eq!(damping.len(), 1);
    assert_eq!(damping[0].parameters["level"], json!(4.0));

    let history = engine.handler().history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ResponseStatus::Completed);
    let mutation = engine.detector().mutation(history[0].mutation_id).await.unwrap();
    assert_eq!(mutation.status, MutationStatus::Resolved);

    let metrics = engine.metrics().await;
    assert_eq!(metrics.cycles, 7);
    assert_eq!(metrics.detection.mutations_detected, 1);
    assert_eq!(metrics.response.responses_completed, 1);
}

#[tokio::test]
async fn test_strategy_executions_feed_learning_back_into_rules() {
    init_tracing();
    let observer = Arc::new(ScriptedObserver::default());
    let executor = Arc::new(RecordingExecutor::default());
    let engine = engine(observer, executor.clone());

    engine
        .strategies()
        .register(
            Strategy::new("steady-gain", "Keep gain steady", StrategyType::Adaptive, 50)
                .with_condition(Condition::new("stability", ConditionOp::Ge, 0.5))
                .with_parameter("level", 0.3)
                .with_action(
                    ActionTemplate::new(ActionKind::AdjustParameter, "gain", 10)
                        .with_parameter("level", json!("$level")),
                ),
        )
        .await
        .unwrap();

    let mut ingested = 0;
    for _ in 0..4 {
        let report = engine.run_cycle().await;
        assert!(report.is_clean(), "{:?}", report.errors);
        assert_eq!(report.executions, 1);
        assert_eq!(report.failed_executions, 0);
        ingested += report.learning.experiences_ingested;
    }
    assert_eq!(ingested, 4);

    // Strategy actions go through the handler before reaching the system.
    let parameters = engine.handler().parameters().await;
    assert_eq!(parameters["gain"]["level"], 0.3);
    // Cycles 1-4 run the base action; the rule learned in cycle 3 replays it in cycle 4.
    assert_eq!(executor.seen().iter().filter(|a| a.target == "gain").count(), 5);

    let strategy = engine.strategies().get(&StrategyId::new("steady-gain")).await.unwrap();
    let learned: Vec<_> = strategy
        .rules
        .iter()
        .filter(|r| r.source == RuleSource::Success)
        .collect();
    assert_eq!(learned.len(), 1);
    assert_eq!(learned[0].name, "learned:success");
    let replay = learned[0].action.as_ref().unwrap();
    assert_eq!(replay.target, "gain");
    assert_eq!(replay.parameters["level"], json!(0.3));

    let metrics = engine.metrics().await;
    assert_eq!(metrics.learning.experiences, 4);
    assert!(metrics.learning.knowledge_units >= 1);
    assert_eq!(metrics.strategy.executions, 4);
    assert_eq!(metrics.learning.success_rate, 1.0);
}

#[tokio::test]
async fn test_optimization_is_applied_and_recorded() {
    init_tracing();
    let observer = Arc::new(ScriptedObserver::default());
    let executor = Arc::new(RecordingExecutor::default());
    let engine = engine(observer, executor.clone());

    engine
        .optimizer()
        .register_objective(
            Objective::new(
                "gain-target",
                "Gain target",
                ObjectiveKind::System,
                0.8,
                |_: &SystemState, p: &HashMap<String, f64>| p.get("gain").copied().unwrap_or(0.0),
            )
            .with_parameter(ParameterSpec::new("gain", 0.2, 0.0, 1.0, 0.1)),
        )
        .await
        .unwrap();

    let report = engine.run_cycle().await;
    assert_eq!(report.optimizations, 1);

    // Gated by the optimization interval.
    let report = engine.run_cycle().await;
    assert_eq!(report.optimizations, 0);

    let metrics = engine.metrics().await.optimization;
    assert_eq!(metrics.completed, 1);
    assert_eq!(metrics.applied, metrics.successful);

    let optimize_actions = executor
        .seen()
        .iter()
        .filter(|a| a.kind == ActionKind::Optimize && a.target == SYSTEM_TARGET)
        .count();
    assert_eq!(optimize_actions as u64, metrics.applied);

    let experiences = engine.learner().experiences().await;
    let recorded: Vec<_> = experiences
        .iter()
        .filter(|e| e.outcome_type == OPTIMIZATION_OUTCOME)
        .collect();
    assert_eq!(recorded.len(), 1);
    assert_eq!(
        recorded[0].source,
        ExperienceSource::Optimization(ObjectiveId::new("gain-target"))
    );
}

#[tokio::test]
async fn test_failing_steps_do_not_abort_the_cycle() {
    init_tracing();
    let observer = Arc::new(ScriptedObserver::default());
    observer.offline.store(true, Ordering::SeqCst);
    let engine = engine(observer.clone(), Arc::new(RecordingExecutor::default()));

    let report = engine.run_cycle().await;
    assert_eq!(report.errors.len(), 2);
    assert!(report.errors[0].starts_with("detect:"));
    assert!(report.errors[1].starts_with("execute:"));

    observer.offline.store(false, Ordering::SeqCst);
    let report = engine.run_cycle().await;
    assert!(report.is_clean());

    let metrics = engine.metrics().await;
    assert_eq!(metrics.cycles, 2);
    assert_eq!(metrics.failed_steps, 2);
    assert_eq!(metrics.learning.cycles, 2);
    assert!(metrics.last_cycle_at.is_some());

    let snapshot = serde_json::to_value(&metrics).unwrap();
    assert_eq!(snapshot["cycles"], json!(2));
}

#[tokio::test]
async fn test_invalid_configuration_fails_construction() {
    let mut config = EngineConfig::default();
    config.strategy.max_strategies = 0;

    let result = AdaptationEngine::new(
        Arc::new(ScriptedObserver::default()),
        Arc::new(RecordingExecutor::default()),
        config,
    );
    assert!(matches!(result, Err(MorphosError::Config(_))));
}
