//! Strategy manager - owns the catalog, runs applicable strategies and keeps the audit log.

use chrono::Utc;
use morphos_core::{
    ActionExecutor, Context, ExecutionId, MorphosError, Result, RuleId, StrategyId, SystemObserver,
    Time,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::catalog::StrategyCatalog;
use crate::config::StrategyConfig;
use crate::strategy::{ExecutionRecord, Strategy, StrategyEvent, StrategyEventKind, StrategyRule};
use crate::tuning;

/// Strategy manager counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyMetrics {
    /// Execute cycles run
    pub cycles: u64,
    /// Strategy executions
    pub executions: u64,
    /// Successful executions
    pub successes: u64,
    /// Failed executions
    pub failures: u64,
    /// Executions vetoed by failure rules
    pub suppressed: u64,
    /// Automatic and requested re-tunes
    pub retunes: u64,
    /// Strategies evicted
    pub evictions: u64,
    /// Rules newly added
    pub rules_added: u64,
    /// Strategies in the catalog
    pub strategies: usize,
    /// Successes / executions
    pub success_rate: f64,
    /// Mean effectiveness across the catalog
    pub mean_effectiveness: f64,
}

struct ManagerState {
    catalog: StrategyCatalog,
    executions: VecDeque<ExecutionRecord>,
    events: VecDeque<StrategyEvent>,
    last_update: Option<Time>,
    metrics: StrategyMetrics,
}

impl ManagerState {
    fn new(capacity: usize) -> Self {
        Self {
            catalog: StrategyCatalog::new(capacity),
            executions: VecDeque::new(),
            events: VecDeque::new(),
            last_update: None,
            metrics: StrategyMetrics::default(),
        }
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, max: usize) {
    queue.push_back(item);
    while queue.len() > max {
        queue.pop_front();
    }
}

/// Holds the strategy catalog and executes applicable strategies each cycle.
pub struct StrategyManager {
    executor: Arc<dyn ActionExecutor>,
    observer: Arc<dyn SystemObserver>,
    config: StrategyConfig,
    state: RwLock<ManagerState>,
}

impl StrategyManager {
    /// Create a manager with the default configuration.
    pub fn new(executor: Arc<dyn ActionExecutor>, observer: Arc<dyn SystemObserver>) -> Self {
        let config = StrategyConfig::default();
        Self {
            executor,
            observer,
            state: RwLock::new(ManagerState::new(config.max_strategies)),
            config,
        }
    }

    /// Create a manager with a validated configuration.
    pub fn try_new(
        executor: Arc<dyn ActionExecutor>,
        observer: Arc<dyn SystemObserver>,
        config: StrategyConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            executor,
            observer,
            state: RwLock::new(ManagerState::new(config.max_strategies)),
            config,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    fn record_event(&self, state: &mut ManagerState, event: StrategyEvent) {
        push_bounded(&mut state.events, event, self.config.max_history);
    }

    /// Register a strategy; refused when invalid, duplicate or at capacity.
    pub async fn register(&self, strategy: Strategy) -> Result<()> {
        let mut state = self.state.write().await;
        let id = strategy.id.clone();
        state.catalog.register(strategy)?;
        info!("Registered strategy {}", id);
        self.record_event(
            &mut state,
            StrategyEvent::new(id, StrategyEventKind::Registered, "registered", Utc::now()),
        );
        state.metrics.strategies = state.catalog.len();
        Ok(())
    }

    /// Register a strategy, evicting the least effective one when full.
    pub async fn adopt_strategy(&self, strategy: Strategy) -> Result<StrategyId> {
        let mut state = self.state.write().await;
        let id = strategy.id.clone();
        let now = Utc::now();
        let evicted = state.catalog.register_evicting(strategy)?;

        if let Some(evicted) = evicted {
            info!("Evicted strategy {} to adopt {}", evicted.id, id);
            state.metrics.evictions += 1;
            self.record_event(
                &mut state,
                StrategyEvent::new(
                    evicted.id,
                    StrategyEventKind::Evicted,
                    format!("replaced by {}", id),
                    now,
                ),
            );
        }
        info!("Adopted strategy {}", id);
        self.record_event(
            &mut state,
            StrategyEvent::new(id.clone(), StrategyEventKind::Registered, "adopted", now),
        );
        state.metrics.strategies = state.catalog.len();
        Ok(id)
    }

    /// Remove a strategy.
    pub async fn remove(&self, id: &StrategyId) -> Result<Strategy> {
        let mut state = self.state.write().await;
        let removed = state
            .catalog
            .unregister(id)
            .ok_or_else(|| MorphosError::not_found("Strategy", id))?;
        self.record_event(
            &mut state,
            StrategyEvent::new(id.clone(), StrategyEventKind::Removed, "removed", Utc::now()),
        );
        state.metrics.strategies = state.catalog.len();
        Ok(removed)
    }

    /// Look up a strategy.
    pub async fn get(&self, id: &StrategyId) -> Result<Strategy> {
        self.state
            .read()
            .await
            .catalog
            .get(id)
            .cloned()
            .ok_or_else(|| MorphosError::not_found("Strategy", id))
    }

    /// All strategies, highest priority first.
    pub async fn list(&self) -> Vec<Strategy> {
        self.state.read().await.catalog.list().into_iter().cloned().collect()
    }

    /// Run one cycle against the observer's current system state.
    pub async fn execute(&self) -> Result<Vec<ExecutionRecord>> {
        let system = self
            .observer
            .current_state()
            .await
            .map_err(|e| MorphosError::operation("fetch system state", &e))?;
        Ok(self.execute_in(&system.as_context(), Utc::now()).await)
    }

    /// Run one cycle in the given context.
    ///
    /// Effectiveness is recomputed (and weak strategies re-tuned or evicted)
    /// at most once per update interval; applicable strategies then run in
    /// descending priority. A strategy vetoed by a fired failure rule is
    /// skipped and audited. A failing strategy never stops the others.
    pub async fn execute_in(&self, context: &Context, now: Time) -> Vec<ExecutionRecord> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        state.metrics.cycles += 1;

        let due = state
            .last_update
            .map_or(true, |last| now - last >= self.config.update_interval());
        if due {
            self.update_effectiveness(state, now);
            state.last_update = Some(now);
        }

        let applicable: Vec<Strategy> = state
            .catalog
            .list()
            .into_iter()
            .filter(|s| s.is_applicable(context))
            .cloned()
            .collect();

        let mut records = Vec::with_capacity(applicable.len());
        for strategy in applicable {
            if let Some(rule) = strategy.suppressing_rule(&strategy.execution_context(context)) {
                state.metrics.suppressed += 1;
                info!(
                    "Strategy {} suppressed by rule {} (score {:.3})",
                    strategy.id,
                    rule.name,
                    rule.score()
                );
                let detail = format!("{} scored {:.3}", rule.name, rule.score());
                self.record_event(
                    state,
                    StrategyEvent::new(strategy.id.clone(), StrategyEventKind::Suppressed, detail, now),
                );
                continue;
            }

            let record = self.run_strategy(&strategy, context, now).await;

            if let Some(stored) = state.catalog.get_mut(&strategy.id) {
                stored.usage_count += 1;
                stored.last_used = Some(now);
            }

            state.metrics.executions += 1;
            let (kind, detail) = if record.success {
                state.metrics.successes += 1;
                (StrategyEventKind::Executed, format!("{} actions", record.actions_run))
            } else {
                state.metrics.failures += 1;
                let reason = record.error.clone().unwrap_or_default();
                warn!("Strategy {} failed: {}", strategy.id, reason);
                (StrategyEventKind::Failed, reason)
            };
            self.record_event(state, StrategyEvent::new(strategy.id.clone(), kind, detail, now));
            push_bounded(&mut state.executions, record.clone(), self.config.max_history);
            records.push(record);
        }

        self.refresh_metrics(state);
        info!(
            "Strategy cycle {}: {} executed, {} in catalog",
            state.metrics.cycles,
            records.len(),
            state.catalog.len()
        );
        records
    }

    async fn run_strategy(&self, strategy: &Strategy, context: &Context, now: Time) -> ExecutionRecord {
        let context = strategy.execution_context(context);
        let templates = strategy.planned_actions(&context);

        let mut failed = 0usize;
        let mut error = None;
        let mut metrics = HashMap::new();

        for template in &templates {
            let action = template.instantiate(&context);
            let limit = std::time::Duration::from_secs(action.timeout_secs);
            let failure = match tokio::time::timeout(limit, self.executor.execute(&action)).await {
                Ok(Ok(outcome)) if outcome.success => {
                    metrics.extend(outcome.metrics);
                    None
                }
                Ok(Ok(outcome)) => Some(outcome.message),
                Ok(Err(e)) => Some(format!("{:#}", e)),
                Err(_) => Some(format!("{} on {} timed out", action.kind, action.target)),
            };
            if let Some(reason) = failure {
                debug!("Strategy {} action {} failed: {}", strategy.id, action.id, reason);
                failed += 1;
                error.get_or_insert(reason);
            }
        }

        ExecutionRecord {
            id: ExecutionId::new(),
            strategy_id: strategy.id.clone(),
            started_at: now,
            finished_at: Utc::now().max(now),
            success: failed == 0,
            actions_run: templates.len(),
            actions_failed: failed,
            error,
            context,
            metrics,
        }
    }

    /// Recompute effectiveness, re-tune weak strategies and evict collapsed ones.
    fn update_effectiveness(&self, state: &mut ManagerState, now: Time) {
        let ManagerState {
            catalog,
            executions,
            events,
            metrics,
            ..
        } = state;

        let mut collapsed = Vec::new();
        for strategy in catalog.iter_mut() {
            let records: Vec<&ExecutionRecord> = executions
                .iter()
                .rev()
                .filter(|r| r.strategy_id == strategy.id)
                .collect();
            let Some(effectiveness) = tuning::effectiveness(&records) else {
                continue;
            };
            strategy.effectiveness = effectiveness;

            if effectiveness >= self.config.min_effectiveness {
                continue;
            }

            let adjusted = tuning::retune_strategy(strategy, &records);
            if adjusted > 0 {
                metrics.retunes += 1;
                info!(
                    "Re-tuned strategy {} ({} adjustments, effectiveness {:.3})",
                    strategy.id, adjusted, effectiveness
                );
                push_bounded(
                    events,
                    StrategyEvent::new(
                        strategy.id.clone(),
                        StrategyEventKind::Retuned,
                        format!("{} adjustments at effectiveness {:.3}", adjusted, effectiveness),
                        now,
                    ),
                    self.config.max_history,
                );
            }

            if effectiveness < self.config.collapse_floor
                && strategy.usage_count >= self.config.min_executions_for_eviction
            {
                collapsed.push(strategy.id.clone());
            }
        }

        for id in collapsed {
            if catalog.unregister(&id).is_some() {
                metrics.evictions += 1;
                warn!("Evicted collapsed strategy {}", id);
                push_bounded(
                    events,
                    StrategyEvent::new(id, StrategyEventKind::Evicted, "effectiveness collapsed", now),
                    self.config.max_history,
                );
            }
        }
    }

    fn refresh_metrics(&self, state: &mut ManagerState) {
        let list = state.catalog.list();
        let effectiveness: Vec<f64> = list.iter().map(|s| s.effectiveness).collect();
        state.metrics.strategies = list.len();
        state.metrics.mean_effectiveness = morphos_core::stats::mean(&effectiveness);
        state.metrics.success_rate = if state.metrics.executions == 0 {
            0.0
        } else {
            state.metrics.successes as f64 / state.metrics.executions as f64
        };
    }

    /// Merge parameter values into a strategy.
    pub async fn update_parameters(&self, id: &StrategyId, parameters: HashMap<String, f64>) -> Result<()> {
        if let Some((name, _)) = parameters.iter().find(|(_, v)| !v.is_finite()) {
            return Err(MorphosError::validation(format!("parameter {} is not finite", name)));
        }

        let mut state = self.state.write().await;
        let strategy = state
            .catalog
            .get_mut(id)
            .ok_or_else(|| MorphosError::not_found("Strategy", id))?;
        let names: Vec<String> = parameters.keys().cloned().collect();
        strategy.parameters.extend(parameters);

        debug!("Updated parameters of {}: {:?}", id, names);
        self.record_event(
            &mut state,
            StrategyEvent::new(id.clone(), StrategyEventKind::Updated, names.join(", "), Utc::now()),
        );
        Ok(())
    }

    /// Add a rule to a strategy; a rule with the same name is refreshed instead.
    ///
    /// Returns whether the rule was new.
    pub async fn add_rule(&self, id: &StrategyId, rule: StrategyRule) -> Result<bool> {
        rule.validate()?;

        let mut state = self.state.write().await;
        let strategy = state
            .catalog
            .get_mut(id)
            .ok_or_else(|| MorphosError::not_found("Strategy", id))?;

        let name = rule.name.clone();
        let added = match strategy.rules.iter_mut().find(|r| r.name == rule.name) {
            Some(existing) => {
                let rule_id = existing.id;
                *existing = StrategyRule { id: rule_id, ..rule };
                false
            }
            None => {
                strategy.rules.push(rule);
                true
            }
        };

        if added {
            state.metrics.rules_added += 1;
        }
        let detail = if added { "added" } else { "refreshed" };
        debug!("Rule {} {} on {}", name, detail, id);
        self.record_event(
            &mut state,
            StrategyEvent::new(
                id.clone(),
                StrategyEventKind::RuleAdded,
                format!("{} {}", name, detail),
                Utc::now(),
            ),
        );
        Ok(added)
    }

    /// Set a rule's firing threshold.
    pub async fn retune_rule(&self, id: &StrategyId, rule_id: RuleId, threshold: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(MorphosError::validation(format!(
                "rule threshold {} is outside [0, 1]",
                threshold
            )));
        }

        let mut state = self.state.write().await;
        let strategy = state
            .catalog
            .get_mut(id)
            .ok_or_else(|| MorphosError::not_found("Strategy", id))?;
        let rule = strategy
            .rule_mut(rule_id)
            .ok_or_else(|| MorphosError::not_found("StrategyRule", rule_id))?;
        let previous = rule.threshold;
        rule.threshold = threshold;

        state.metrics.retunes += 1;
        self.record_event(
            &mut state,
            StrategyEvent::new(
                id.clone(),
                StrategyEventKind::Retuned,
                format!("rule {} threshold {:.3} -> {:.3}", rule_id, previous, threshold),
                Utc::now(),
            ),
        );
        Ok(())
    }

    /// Strategies below the effectiveness floor.
    pub async fn low_effectiveness(&self) -> Vec<Strategy> {
        self.state
            .read()
            .await
            .catalog
            .list()
            .into_iter()
            .filter(|s| s.effectiveness < self.config.min_effectiveness)
            .cloned()
            .collect()
    }

    /// Execution records stored after the one with id `last`, oldest first.
    ///
    /// Returns the whole history when `last` is `None` or has already
    /// aged out of it.
    pub async fn executions_after(&self, last: Option<ExecutionId>) -> Vec<ExecutionRecord> {
        let state = self.state.read().await;
        let start = last
            .and_then(|id| state.executions.iter().position(|r| r.id == id))
            .map_or(0, |pos| pos + 1);
        state.executions.iter().skip(start).cloned().collect()
    }

    /// Audit log, oldest first.
    pub async fn events(&self) -> Vec<StrategyEvent> {
        self.state.read().await.events.iter().cloned().collect()
    }

    /// Manager counters.
    pub async fn metrics(&self) -> StrategyMetrics {
        self.state.read().await.metrics.clone()
    }
}
