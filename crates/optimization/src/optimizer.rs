//! Optimizer - drives objectives toward their targets and applies the results.

use chrono::Utc;
use morphos_core::{
    Context, ExperienceSource, LearningExperience, MorphosError, ObjectiveId, Result,
    SystemState, Time, OPTIMIZATION_OUTCOME,
};
use morphos_learning::Learner;
use morphos_response::MutationHandler;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::OptimizationConfig;
use crate::objective::{Objective, ObjectiveKind};
use crate::search::{Optimization, OptimizationStatus};

/// Optimizer counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptimizationMetrics {
    /// Optimize cycles run (interval-skipped calls excluded)
    pub cycles: u64,
    /// Runs started
    pub started: u64,
    /// Runs finished
    pub completed: u64,
    /// Finished runs meeting the success criterion
    pub successful: u64,
    /// Successful runs applied through the handler
    pub applied: u64,
    /// Runs currently active
    pub active: usize,
    /// Successful / completed
    pub success_rate: f64,
    /// Mean distance gained per finished run
    pub average_improvement: f64,
}

struct OptimizerState {
    objectives: BTreeMap<ObjectiveId, Objective>,
    active: HashMap<ObjectiveId, Optimization>,
    history: VecDeque<Optimization>,
    last_run: Option<Time>,
    rng: StdRng,
    improvement_total: f64,
    metrics: OptimizationMetrics,
}

/// Runs bounded random local search for every objective that drifts from its target.
pub struct Optimizer {
    handler: Arc<MutationHandler>,
    learner: Arc<Learner>,
    config: OptimizationConfig,
    state: RwLock<OptimizerState>,
}

impl Optimizer {
    /// Create an optimizer with the default configuration.
    pub fn new(handler: Arc<MutationHandler>, learner: Arc<Learner>) -> Self {
        Self::build(handler, learner, OptimizationConfig::default())
    }

    /// Create an optimizer with a validated configuration.
    pub fn try_new(
        handler: Arc<MutationHandler>,
        learner: Arc<Learner>,
        config: OptimizationConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(handler, learner, config))
    }

    fn build(handler: Arc<MutationHandler>, learner: Arc<Learner>, config: OptimizationConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            handler,
            learner,
            state: RwLock::new(OptimizerState {
                objectives: BTreeMap::new(),
                active: HashMap::new(),
                history: VecDeque::new(),
                last_run: None,
                rng,
                improvement_total: 0.0,
                metrics: OptimizationMetrics::default(),
            }),
            config,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &OptimizationConfig {
        &self.config
    }

    /// Register an objective; refused when invalid, duplicate or at capacity.
    pub async fn register_objective(&self, objective: Objective) -> Result<()> {
        objective.validate()?;
        let mut state = self.state.write().await;
        if state.objectives.contains_key(&objective.id) {
            return Err(MorphosError::validation(format!(
                "objective {} is already registered",
                objective.id
            )));
        }
        if state.objectives.len() >= self.config.max_objectives {
            return Err(MorphosError::capacity("objective registry", self.config.max_objectives));
        }
        info!("Registered objective {} (target {})", objective.id, objective.target);
        state.objectives.insert(objective.id.clone(), objective);
        Ok(())
    }

    /// Remove an objective and abandon its active run.
    pub async fn unregister_objective(&self, id: &ObjectiveId) -> Result<Objective> {
        let mut state = self.state.write().await;
        let objective = state
            .objectives
            .remove(id)
            .ok_or_else(|| MorphosError::not_found("Objective", id))?;
        if state.active.remove(id).is_some() {
            debug!("Abandoned active optimization of {}", id);
        }
        state.metrics.active = state.active.len();
        Ok(objective)
    }

    /// Registered objectives, by id.
    pub async fn objectives(&self) -> Vec<Objective> {
        self.state.read().await.objectives.values().cloned().collect()
    }

    /// Run one cycle against the handler's current system state.
    pub async fn optimize(&self) -> Vec<Optimization> {
        let system = self.handler.system_state().await;
        self.optimize_in(&system, Utc::now()).await
    }

    /// Run one cycle against `system` at `now`; returns the runs finished in it.
    ///
    /// Skipped when the previous cycle ran less than the optimization
    /// interval ago.
    pub async fn optimize_in(&self, system: &SystemState, now: Time) -> Vec<Optimization> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        if let Some(last) = state.last_run {
            if now - last < self.config.optimization_interval() {
                return Vec::new();
            }
        }
        state.last_run = Some(now);
        state.metrics.cycles += 1;

        for objective in state.objectives.values() {
            if state.active.contains_key(&objective.id) {
                continue;
            }
            let current = objective.evaluate(system, &objective.parameter_values());
            if !current.is_finite() || (current - objective.target).abs() <= self.config.improvement_threshold {
                continue;
            }
            debug!(
                "Starting optimization of {}: {:.4} vs target {:.4}",
                objective.id, current, objective.target
            );
            state
                .active
                .insert(objective.id.clone(), Optimization::start(objective, current, now));
            state.metrics.started += 1;
        }

        let mut finished = Vec::new();
        let mut ids: Vec<ObjectiveId> = state.active.keys().cloned().collect();
        ids.sort();
        for id in ids {
            let (Some(objective), Some(run)) = (state.objectives.get(&id), state.active.get_mut(&id)) else {
                continue;
            };
            for _ in 0..self.config.iterations_per_cycle {
                run.step(objective, system, &mut state.rng);
                let status = run.evaluate_status(
                    self.config.improvement_threshold,
                    self.config.convergence_rate,
                    self.config.max_iterations,
                );
                if status != OptimizationStatus::Running {
                    run.finish(status, self.config.improvement_threshold, now);
                    break;
                }
            }
            if run.status != OptimizationStatus::Running {
                if let Some(run) = state.active.remove(&id) {
                    finished.push(run);
                }
            }
        }

        for run in finished.iter_mut() {
            self.complete(state, run).await;
        }

        state.metrics.active = state.active.len();
        state.metrics.success_rate = if state.metrics.completed == 0 {
            0.0
        } else {
            state.metrics.successful as f64 / state.metrics.completed as f64
        };
        state.metrics.average_improvement = if state.metrics.completed == 0 {
            0.0
        } else {
            state.improvement_total / state.metrics.completed as f64
        };
        finished
    }

    /// Apply a finished run if it succeeded, record it as an experience and archive it.
    async fn complete(&self, state: &mut OptimizerState, run: &mut Optimization) {
        state.metrics.completed += 1;
        state.improvement_total += run.improvement;

        if run.success {
            state.metrics.successful += 1;
            let parameters = run.parameter_values();
            if let Some(objective) = state.objectives.get_mut(&run.objective_id) {
                let applied = match &objective.kind {
                    ObjectiveKind::Parameter { target } => {
                        self.handler.adjust_parameter(target, parameters).await
                    }
                    ObjectiveKind::System => self.handler.optimize(parameters).await,
                };
                match applied {
                    Ok(action_id) => {
                        run.applied = true;
                        state.metrics.applied += 1;
                        objective.parameters = run.parameters.clone();
                        info!(
                            "Applied optimization of {} as action {} ({:.4} -> {:.4})",
                            run.objective_id, action_id, run.initial_value, run.best_value
                        );
                    }
                    Err(e) => warn!("Could not apply optimization of {}: {}", run.objective_id, e),
                }
            }
        } else {
            info!(
                "Optimization of {} ended {} without success ({:.4} -> {:.4}, target {:.4})",
                run.objective_id,
                run.status.as_str(),
                run.initial_value,
                run.best_value,
                run.target
            );
        }

        if let Err(e) = self.learner.record_experience(experience_from(run)).await {
            warn!("Could not record optimization of {}: {}", run.objective_id, e);
        }

        state.history.push_back(run.clone());
        while state.history.len() > self.config.max_history {
            state.history.pop_front();
        }
    }

    /// Runs in progress.
    pub async fn active(&self) -> Vec<Optimization> {
        let state = self.state.read().await;
        let mut runs: Vec<Optimization> = state.active.values().cloned().collect();
        runs.sort_by(|a, b| a.objective_id.cmp(&b.objective_id));
        runs
    }

    /// Finished runs, oldest first.
    pub async fn history(&self) -> Vec<Optimization> {
        self.state.read().await.history.iter().cloned().collect()
    }

    /// Optimizer counters.
    pub async fn metrics(&self) -> OptimizationMetrics {
        self.state.read().await.metrics.clone()
    }
}

fn experience_from(run: &Optimization) -> LearningExperience {
    let mut context: Context = run
        .parameter_values()
        .into_iter()
        .map(|(name, value)| (name, serde_json::json!(value)))
        .collect();
    context.insert("initial_value".to_string(), serde_json::json!(run.initial_value));
    context.insert("target".to_string(), serde_json::json!(run.target));
    context.insert("status".to_string(), serde_json::json!(run.status.as_str()));

    let distance = (run.initial_value - run.target).abs();
    let reward = if distance > 0.0 { run.improvement / distance } else { 0.0 };

    LearningExperience::new(
        ExperienceSource::Optimization(run.objective_id.clone()),
        OPTIMIZATION_OUTCOME,
        context,
        run.success,
    )
    .with_metrics(HashMap::from([
        ("improvement".to_string(), run.improvement),
        ("iterations".to_string(), f64::from(run.iterations)),
        ("final_value".to_string(), run.best_value),
    ]))
    .with_reward(reward)
    .at(run.finished_at.unwrap_or(run.started_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objective::ParameterSpec;
    use async_trait::async_trait;
    use morphos_core::{
        ActionExecutor, ActionOutcome, RecognizedPattern, ResponseAction, SystemObserver,
    };
    use morphos_detection::MutationDetector;
    use morphos_strategy::StrategyManager;

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

    struct Executor {
        accept: bool,
    }

    #[async_trait]
    impl ActionExecutor for Executor {
        async fn execute(&self, _action: &ResponseAction) -> anyhow::Result<ActionOutcome> {
            if self.accept {
                Ok(ActionOutcome::ok("applied"))
            } else {
                Ok(ActionOutcome::rejected("read-only"))
            }
        }
    }

    struct Fixture {
        optimizer: Optimizer,
        handler: Arc<MutationHandler>,
        learner: Arc<Learner>,
    }

    fn fixture(accept: bool, config: OptimizationConfig) -> Fixture {
        let observer: Arc<dyn SystemObserver> = Arc::new(QuietObserver);
        let executor: Arc<dyn ActionExecutor> = Arc::new(Executor { accept });
        let detector = Arc::new(MutationDetector::new(observer.clone()));
        let handler = Arc::new(MutationHandler::new(detector, executor.clone()));
        let strategies = Arc::new(StrategyManager::new(executor, observer));
        let learner = Arc::new(Learner::new(strategies));
        let optimizer = Optimizer::try_new(handler.clone(), learner.clone(), config).unwrap();
        Fixture {
            optimizer,
            handler,
            learner,
        }
    }

    fn config() -> OptimizationConfig {
        OptimizationConfig {
            optimization_interval_secs: 0,
            iterations_per_cycle: 100,
            seed: Some(42),
            ..Default::default()
        }
    }

    fn gain_objective(kind: ObjectiveKind, start: f64) -> Objective {
        Objective::new(
            "gain",
            "Gain",
            kind,
            0.8,
            |_: &SystemState, p: &HashMap<String, f64>| p.get("gain").copied().unwrap_or(0.0),
        )
        .with_parameter(ParameterSpec::new("gain", start, 0.0, 1.0, 0.1))
    }

    #[tokio::test]
    async fn test_successful_run_is_applied_and_recorded() {
        let f = fixture(true, config());
        f.optimizer
            .register_objective(gain_objective(ObjectiveKind::Parameter { target: "damping".to_string() }, 0.2))
            .await
            .unwrap();

        let finished = f.optimizer.optimize().await;
        assert_eq!(finished.len(), 1);
        let run = &finished[0];
        assert_ne!(run.status, OptimizationStatus::Running);
        assert!(run.success);
        assert!(run.applied);
        assert!(run.improvement > 0.0);

        let applied = f.handler.parameters().await;
        assert_eq!(applied["damping"]["gain"], run.best_value);

        let experiences = f.learner.experiences().await;
        assert_eq!(experiences.len(), 1);
        assert_eq!(experiences[0].outcome_type, OPTIMIZATION_OUTCOME);
        assert!(experiences[0].success);

        let objectives = f.optimizer.objectives().await;
        assert_eq!(objectives[0].parameters[0].value, run.best_value);

        let metrics = f.optimizer.metrics().await;
        assert_eq!((metrics.started, metrics.completed, metrics.successful), (1, 1, 1));
        assert_eq!(metrics.success_rate, 1.0);
        assert_eq!(f.optimizer.history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_objective_on_target_starts_nothing() {
        let f = fixture(true, config());
        f.optimizer
            .register_objective(gain_objective(ObjectiveKind::System, 0.78))
            .await
            .unwrap();

        assert!(f.optimizer.optimize().await.is_empty());
        assert!(f.optimizer.active().await.is_empty());
        assert_eq!(f.optimizer.metrics().await.started, 0);
    }

    #[tokio::test]
    async fn test_rejected_application_is_still_recorded() {
        let f = fixture(false, config());
        f.optimizer
            .register_objective(gain_objective(ObjectiveKind::System, 0.2))
            .await
            .unwrap();

        let finished = f.optimizer.optimize().await;
        assert!(finished[0].success);
        assert!(!finished[0].applied);
        assert_eq!(f.optimizer.objectives().await[0].parameters[0].value, 0.2);
        assert_eq!(f.learner.experiences().await.len(), 1);
        assert_eq!(f.optimizer.metrics().await.applied, 0);
    }

    #[tokio::test]
    async fn test_runs_span_cycles_until_capped() {
        let f = fixture(
            true,
            OptimizationConfig {
                iterations_per_cycle: 4,
                max_iterations: 8,
                ..config()
            },
        );
        // out of reach: the best the search can do is 1.0
        let unreachable = Objective::new(
            "unreachable",
            "Unreachable",
            ObjectiveKind::System,
            5.0,
            |_: &SystemState, p: &HashMap<String, f64>| p.get("gain").copied().unwrap_or(0.0),
        )
        .with_parameter(ParameterSpec::new("gain", 1.0, 0.0, 1.0, 0.1));
        f.optimizer.register_objective(unreachable).await.unwrap();

        let state = SystemState::calm();
        let now = Utc::now();
        assert!(f.optimizer.optimize_in(&state, now).await.is_empty());
        assert_eq!(f.optimizer.active().await[0].iterations, 4);

        let finished = f.optimizer.optimize_in(&state, now).await;
        assert_eq!(finished[0].status, OptimizationStatus::MaxIterations);
        assert!(!finished[0].success);
        assert!(f.handler.parameters().await.is_empty());
    }

    #[tokio::test]
    async fn test_interval_gates_cycles() {
        let f = fixture(
            true,
            OptimizationConfig {
                optimization_interval_secs: 300,
                ..config()
            },
        );
        let state = SystemState::calm();
        let now = Utc::now();
        f.optimizer.optimize_in(&state, now).await;
        f.optimizer.optimize_in(&state, now + chrono::Duration::seconds(10)).await;
        assert_eq!(f.optimizer.metrics().await.cycles, 1);
        f.optimizer.optimize_in(&state, now + chrono::Duration::seconds(300)).await;
        assert_eq!(f.optimizer.metrics().await.cycles, 2);
    }

    #[tokio::test]
    async fn test_registration_errors() {
        let f = fixture(
            true,
            OptimizationConfig {
                max_objectives: 1,
                ..config()
            },
        );
        f.optimizer
            .register_objective(gain_objective(ObjectiveKind::System, 0.2))
            .await
            .unwrap();
        assert!(matches!(
            f.optimizer.register_objective(gain_objective(ObjectiveKind::System, 0.2)).await,
            Err(MorphosError::Validation(_))
        ));

        let other = Objective::new(
            "other",
            "Other",
            ObjectiveKind::System,
            1.0,
            |_: &SystemState, _: &HashMap<String, f64>| 0.0,
        )
        .with_parameter(ParameterSpec::new("x", 0.0, 0.0, 1.0, 0.1));
        assert!(matches!(
            f.optimizer.register_objective(other).await,
            Err(MorphosError::Capacity { .. })
        ));
        assert!(matches!(
            f.optimizer.unregister_objective(&ObjectiveId::new("missing")).await,
            Err(MorphosError::NotFound { .. })
        ));
        f.optimizer.unregister_objective(&ObjectiveId::new("gain")).await.unwrap();
        assert!(f.optimizer.objectives().await.is_empty());
    }
}
