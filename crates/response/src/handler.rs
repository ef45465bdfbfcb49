//! Mutation handler - selects strategies, runs responses, and exposes direct actions.

use chrono::Utc;
use morphos_core::{
    stats, ActionExecutor, ActionId, ActionKind, ActionStatus, MorphosError, Mutation, MutationId,
    MutationStatus, ResponseAction, ResponseId, Result, StrategyId, SystemPhase, SystemState, Time,
};
use morphos_detection::MutationDetector;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::ResponseConfig;
use crate::response::{MutationResponse, ResponseStatus};
use crate::scheduler::{Budget, ResourceScheduler};
use crate::selector::{ResponseStrategy, StrategySelector, WeightedSelector};

/// Target recorded for system-level direct actions.
pub const SYSTEM_TARGET: &str = "system";

/// Handler counters exposed for observability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMetrics {
    /// Handle cycles run
    pub cycles: u64,
    /// Responses created
    pub responses_started: u64,
    /// Responses that completed
    pub responses_completed: u64,
    /// Responses that failed
    pub responses_failed: u64,
    /// Responses that timed out
    pub responses_timed_out: u64,
    /// Mutation-cycles left without a response (no strategy or no capacity)
    pub unhandled: u64,
    /// Action dispatches, including direct actions
    pub actions_executed: u64,
    /// Action dispatches that did not complete
    pub actions_failed: u64,
    /// Direct actions requested
    pub direct_actions: u64,
    /// Responses currently pending or executing
    pub active_responses: usize,
    /// Completed / finished responses
    pub success_rate: f64,
}

impl ResponseMetrics {
    fn finished(&self) -> u64 {
        self.responses_completed + self.responses_failed + self.responses_timed_out
    }
}

struct HandlerState {
    strategies: HashMap<StrategyId, ResponseStrategy>,
    active: HashMap<MutationId, MutationResponse>,
    history: VecDeque<MutationResponse>,
    last_finished: HashMap<MutationId, Time>,
    action_history: VecDeque<ResponseAction>,
    parameters: HashMap<String, HashMap<String, f64>>,
    scheduler: ResourceScheduler,
    metrics: ResponseMetrics,
}

impl HandlerState {
    fn new(budget: Budget) -> Self {
        Self {
            strategies: HashMap::new(),
            active: HashMap::new(),
            history: VecDeque::new(),
            last_finished: HashMap::new(),
            action_history: VecDeque::new(),
            parameters: HashMap::new(),
            scheduler: ResourceScheduler::new(budget),
            metrics: ResponseMetrics::default(),
        }
    }
}

/// Dispatch one action through the executor, enforcing its timeout.
///
/// Returns whether the action completed.
async fn run_action(executor: &dyn ActionExecutor, action: &mut ResponseAction, now: Time) -> bool {
    action.attempts += 1;
    action.status = ActionStatus::Running;
    action.started_at.get_or_insert(now);

    let limit = std::time::Duration::from_secs(action.timeout_secs);
    let result = tokio::time::timeout(limit, executor.execute(action)).await;

    match result {
        Ok(Ok(outcome)) if outcome.success => {
            action.status = ActionStatus::Completed;
            action.completed_at = Some(now);
            action.error = None;
        }
        Ok(Ok(outcome)) => {
            action.status = ActionStatus::Failed;
            action.error = Some(outcome.message);
        }
        Ok(Err(e)) => {
            action.status = ActionStatus::Failed;
            action.error = Some(format!("{:#}", e));
        }
        Err(_) => {
            action.status = ActionStatus::TimedOut;
            action.error = Some(format!("timed out after {}s", action.timeout_secs));
        }
    }

    action.is_completed()
}

/// Applies strategies to active mutations and tracks the resulting responses.
pub struct MutationHandler {
    detector: Arc<MutationDetector>,
    executor: Arc<dyn ActionExecutor>,
    selector: Box<dyn StrategySelector>,
    config: ResponseConfig,
    state: RwLock<HandlerState>,
}

impl MutationHandler {
    /// Create a handler with the default configuration.
    pub fn new(detector: Arc<MutationDetector>, executor: Arc<dyn ActionExecutor>) -> Self {
        let config = ResponseConfig::default();
        Self {
            detector,
            executor,
            selector: Box::new(WeightedSelector::new()),
            state: RwLock::new(HandlerState::new(Budget::from_config(&config))),
            config,
        }
    }

    /// Create a handler with a validated configuration.
    pub fn try_new(
        detector: Arc<MutationDetector>,
        executor: Arc<dyn ActionExecutor>,
        config: ResponseConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            detector,
            executor,
            selector: Box::new(WeightedSelector::new()),
            state: RwLock::new(HandlerState::new(Budget::from_config(&config))),
            config,
        })
    }

    /// Set the strategy selector.
    pub fn with_selector(mut self, selector: Box<dyn StrategySelector>) -> Self {
        self.selector = selector;
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &ResponseConfig {
        &self.config
    }

    /// Register a strategy.
    pub async fn register_strategy(&self, strategy: ResponseStrategy) -> Result<()> {
        strategy.validate()?;

        let mut state = self.state.write().await;
        if state.strategies.contains_key(&strategy.id) {
            return Err(MorphosError::validation(format!(
                "strategy {} is already registered",
                strategy.id
            )));
        }
        if state.strategies.len() >= self.config.max_strategies {
            return Err(MorphosError::capacity("response strategies", self.config.max_strategies));
        }

        info!("Registered response strategy {} ({})", strategy.id, strategy.name);
        state.strategies.insert(strategy.id.clone(), strategy);
        Ok(())
    }

    /// Remove a strategy that no active response uses.
    pub async fn unregister_strategy(&self, id: &StrategyId) -> Result<ResponseStrategy> {
        let mut state = self.state.write().await;
        if !state.strategies.contains_key(id) {
            return Err(MorphosError::not_found("ResponseStrategy", id));
        }
        if state.active.values().any(|r| &r.strategy_id == id) {
            return Err(MorphosError::validation(format!(
                "strategy {} is in use by an active response",
                id
            )));
        }
        let removed = state
            .strategies
            .remove(id)
            .ok_or_else(|| MorphosError::not_found("ResponseStrategy", id))?;
        info!("Unregistered response strategy {}", id);
        Ok(removed)
    }

    /// Look up a registered strategy.
    pub async fn strategy(&self, id: &StrategyId) -> Result<ResponseStrategy> {
        self.state
            .read()
            .await
            .strategies
            .get(id)
            .cloned()
            .ok_or_else(|| MorphosError::not_found("ResponseStrategy", id))
    }

    /// Run one handle cycle against the detector's active mutations.
    ///
    /// Also moves handled mutations to `Responding` / `Resolved` in the detector.
    pub async fn handle(&self) -> Result<Vec<MutationResponse>> {
        let snapshot = self.detector.active_mutations().await;
        let touched = self.handle_mutations(&snapshot, Utc::now()).await;

        for response in &touched {
            let status = match response.status {
                ResponseStatus::Executing => MutationStatus::Responding,
                ResponseStatus::Completed => MutationStatus::Resolved,
                _ => continue,
            };
            // The mutation may have expired since the snapshot was taken.
            if let Err(e) = self.detector.set_status(response.mutation_id, status).await {
                debug!("Could not update mutation {}: {}", response.mutation_id, e);
            }
        }

        Ok(touched)
    }

    /// Run one handle cycle over the given mutations.
    ///
    /// Returns every response advanced or finalized this cycle.
    pub async fn handle_mutations(&self, mutations: &[Mutation], now: Time) -> Vec<MutationResponse> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        state.metrics.cycles += 1;

        let mut touched = self.finalize_vanished(state, mutations, now);
        self.start_responses(state, mutations, now);

        let mut ids: Vec<MutationId> = state.active.keys().copied().collect();
        ids.sort();
        for id in ids {
            let Some(mut response) = state.active.remove(&id) else {
                continue;
            };
            self.advance(state, &mut response, now).await;
            touched.push(response.clone());
            if response.status.is_terminal() {
                self.finish(state, response);
            } else {
                state.active.insert(id, response);
            }
        }

        self.refresh_metrics(state);
        info!(
            "Handle cycle {}: {} mutations, {} responses touched, {} active",
            state.metrics.cycles,
            mutations.len(),
            touched.len(),
            state.active.len()
        );

        touched
    }

    /// Finalize responses whose mutation is no longer active.
    fn finalize_vanished(
        &self,
        state: &mut HandlerState,
        mutations: &[Mutation],
        now: Time,
    ) -> Vec<MutationResponse> {
        let live: HashSet<MutationId> = mutations.iter().map(|m| m.id).collect();
        state.last_finished.retain(|id, _| live.contains(id));

        let vanished: Vec<MutationId> = state
            .active
            .keys()
            .filter(|id| !live.contains(id))
            .copied()
            .collect();

        let mut finalized = Vec::new();
        for id in vanished {
            let Some(mut response) = state.active.remove(&id) else {
                continue;
            };
            let next = if response.status == ResponseStatus::Executing && response.all_completed() {
                ResponseStatus::Completed
            } else {
                response.error = Some("mutation is no longer active".to_string());
                ResponseStatus::Failed
            };
            if let Err(e) = response.transition(next, now) {
                warn!("Finalizing response {}: {}", response.id, e);
                continue;
            }
            debug!("Response {} finalized as {} after its mutation vanished", response.id, next);
            finalized.push(response.clone());
            self.finish(state, response);
        }
        finalized
    }

    /// Create responses for mutations that have none.
    fn start_responses(&self, state: &mut HandlerState, mutations: &[Mutation], now: Time) {
        let mut ordered: Vec<&Mutation> = mutations.iter().collect();
        ordered.sort_by(|a, b| {
            b.severity
                .partial_cmp(&a.severity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        for mutation in ordered {
            if state.active.contains_key(&mutation.id) {
                continue;
            }
            // Already handled unless re-observed since.
            if state
                .last_finished
                .get(&mutation.id)
                .is_some_and(|finished| *finished >= mutation.updated_at)
            {
                continue;
            }
            if mutation.changes.is_empty() {
                warn!("Skipping mutation {} with no property changes", mutation.id);
                continue;
            }
            if !state.scheduler.can_start() {
                state.metrics.unhandled += 1;
                debug!("No capacity for mutation {}", mutation.id);
                continue;
            }

            let context = mutation.context();
            let candidates: Vec<&ResponseStrategy> = state.strategies.values().collect();
            let selection = self.selector.select(
                &candidates,
                &context,
                state.scheduler.fit(),
                self.config.response_threshold,
            );
            let Some(selection) = selection else {
                state.metrics.unhandled += 1;
                debug!("No strategy clears the floor for mutation {}", mutation.id);
                continue;
            };
            let Some(strategy) = state.strategies.get(&selection.strategy_id) else {
                continue;
            };

            let mut response_context = context;
            response_context.insert(
                "strategy_id".to_string(),
                serde_json::json!(strategy.id.as_str()),
            );
            let response = MutationResponse::new(
                mutation.id,
                strategy,
                &response_context,
                self.config.max_retries,
                now,
            );

            info!(
                "Responding to mutation {} with strategy {} (score {:.3})",
                mutation.id, selection.strategy_id, selection.score
            );
            state.scheduler.response_started();
            state.metrics.responses_started += 1;
            state.active.insert(mutation.id, response);
        }
    }

    /// Dispatch a response's incomplete actions and apply the resulting transition.
    async fn advance(&self, state: &mut HandlerState, response: &mut MutationResponse, now: Time) {
        if response.status == ResponseStatus::Pending {
            if let Err(e) = response.transition(ResponseStatus::Executing, now) {
                warn!("Starting response {}: {}", response.id, e);
                return;
            }
        }

        if response.is_timed_out(now) {
            response.error = Some(format!("exceeded {}s", response.timeout_secs));
            if let Err(e) = response.transition(ResponseStatus::Timeout, now) {
                warn!("Timing out response {}: {}", response.id, e);
            }
            return;
        }

        for action in response.actions.iter_mut().filter(|a| !a.is_completed()) {
            let completed = run_action(self.executor.as_ref(), action, now).await;
            state.metrics.actions_executed += 1;
            if !completed {
                state.metrics.actions_failed += 1;
                debug!(
                    "Action {} ({} on {}) did not complete: {}",
                    action.id,
                    action.kind,
                    action.target,
                    action.error.as_deref().unwrap_or("unknown")
                );
            }
        }
        response.update_progress();

        let next = if response.all_completed() {
            Some(ResponseStatus::Completed)
        } else {
            response.retry_count += 1;
            response.retries_exhausted().then(|| {
                response.error = Some(format!("retry budget of {} exhausted", response.max_retries));
                ResponseStatus::Failed
            })
        };

        if let Some(next) = next {
            if let Err(e) = response.transition(next, now) {
                warn!("Finishing response {}: {}", response.id, e);
            }
        }
    }

    /// Record a terminal response in history and strategy statistics.
    fn finish(&self, state: &mut HandlerState, response: MutationResponse) {
        state.scheduler.response_finished();
        match response.status {
            ResponseStatus::Completed => state.metrics.responses_completed += 1,
            ResponseStatus::Timeout => state.metrics.responses_timed_out += 1,
            _ => state.metrics.responses_failed += 1,
        }

        if let Some(strategy) = state.strategies.get_mut(&response.strategy_id) {
            strategy.attempts += 1;
            if response.status == ResponseStatus::Completed {
                strategy.successes += 1;
            }
        }

        info!(
            "Response {} for mutation {} finished as {}",
            response.id, response.mutation_id, response.status
        );

        state
            .last_finished
            .insert(response.mutation_id, response.completed_at.unwrap_or_else(Utc::now));
        state.history.push_back(response);
        while state.history.len() > self.config.max_history {
            state.history.pop_front();
        }
    }

    fn refresh_metrics(&self, state: &mut HandlerState) {
        let finished = state.metrics.finished();
        state.metrics.active_responses = state.active.len();
        state.metrics.success_rate = if finished == 0 {
            0.0
        } else {
            state.metrics.responses_completed as f64 / finished as f64
        };
    }

    /// Push a parameter change to a target.
    pub async fn adjust_parameter(&self, target: &str, parameters: HashMap<String, f64>) -> Result<ActionId> {
        self.direct(ActionKind::AdjustParameter, target, parameters).await
    }

    /// Trigger a broader optimization pass with the given parameters.
    pub async fn optimize(&self, parameters: HashMap<String, f64>) -> Result<ActionId> {
        self.direct(ActionKind::Optimize, SYSTEM_TARGET, parameters).await
    }

    /// Request a structural transform.
    pub async fn transform(&self, parameters: HashMap<String, f64>) -> Result<ActionId> {
        self.direct(ActionKind::Transform, SYSTEM_TARGET, parameters).await
    }

    /// Wrap a change as a synthetic action, execute it and record it.
    ///
    /// Each call creates a new action id. The executor runs outside the state lock.
    async fn direct(&self, kind: ActionKind, target: &str, parameters: HashMap<String, f64>) -> Result<ActionId> {
        if target.trim().is_empty() {
            return Err(MorphosError::validation("action target is empty"));
        }
        if parameters.is_empty() {
            return Err(MorphosError::validation(format!("{} on {} carries no parameters", kind, target)));
        }
        if let Some((name, _)) = parameters.iter().find(|(_, v)| !v.is_finite()) {
            return Err(MorphosError::validation(format!("parameter {} is not finite", name)));
        }

        let timeout_secs = self.state.read().await.scheduler.budget().action_timeout.as_secs();
        let json = parameters
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::json!(v)))
            .collect();
        let mut action = ResponseAction::new(kind.clone(), target, json, timeout_secs);
        let now = Utc::now();
        let completed = run_action(self.executor.as_ref(), &mut action, now).await;

        let mut state = self.state.write().await;
        state.metrics.direct_actions += 1;
        state.metrics.actions_executed += 1;

        let id = action.id;
        let error = action.error.clone();

        if completed {
            if matches!(kind, ActionKind::AdjustParameter | ActionKind::Optimize) {
                state
                    .parameters
                    .entry(target.to_string())
                    .or_default()
                    .extend(parameters);
            }
            info!("Applied {} on {} as action {}", kind, target, id);
        } else {
            state.metrics.actions_failed += 1;
        }

        state.action_history.push_back(action);
        while state.action_history.len() > self.config.max_history {
            state.action_history.pop_front();
        }

        if completed {
            Ok(id)
        } else {
            let reason = error.unwrap_or_else(|| "action did not complete".to_string());
            warn!("{} on {} failed: {}", kind, target, reason);
            Err(MorphosError::Operation {
                context: format!("{} on {}", kind, target),
                reason,
            })
        }
    }

    /// Aggregate state derived from response load and success.
    pub async fn system_state(&self) -> SystemState {
        let state = self.state.read().await;
        let load = state.scheduler.load();
        let finished = state.metrics.finished();
        let success = if finished == 0 {
            1.0
        } else {
            state.metrics.responses_completed as f64 / finished as f64
        };
        let stability = stats::clamp_unit(0.5 * success + 0.5 * (1.0 - load));

        SystemState {
            energy: load,
            entropy: 1.0 - success,
            harmony: success,
            balance: stats::clamp_unit(1.0 - (stability - self.config.stability_target).abs()),
            stability,
            phase: SystemPhase::from_stability(stability),
            timestamp: Utc::now(),
        }
    }

    /// Responses currently pending or executing.
    pub async fn responses(&self) -> Vec<MutationResponse> {
        let state = self.state.read().await;
        let mut responses: Vec<MutationResponse> = state.active.values().cloned().collect();
        responses.sort_by_key(|r| r.created_at);
        responses
    }

    /// Look up a response, active or finished.
    pub async fn response(&self, id: ResponseId) -> Result<MutationResponse> {
        let state = self.state.read().await;
        state
            .active
            .values()
            .chain(state.history.iter())
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| MorphosError::not_found("MutationResponse", id))
    }

    /// Finished responses, oldest first.
    pub async fn history(&self) -> Vec<MutationResponse> {
        self.state.read().await.history.iter().cloned().collect()
    }

    /// Direct actions, oldest first.
    pub async fn action_history(&self) -> Vec<ResponseAction> {
        self.state.read().await.action_history.iter().cloned().collect()
    }

    /// Last applied parameter values, per target.
    pub async fn parameters(&self) -> HashMap<String, HashMap<String, f64>> {
        self.state.read().await.parameters.clone()
    }

    /// Handler counters.
    pub async fn metrics(&self) -> ResponseMetrics {
        self.state.read().await.metrics.clone()
    }
}
