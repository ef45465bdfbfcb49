//! The adaptation engine - runs the closed loop.

use chrono::Utc;
use morphos_analysis::{AnalysisMetrics, MutationAnalyzer};
use morphos_core::{ActionExecutor, Result, SystemObserver, Time};
use morphos_detection::{DetectionMetrics, MutationDetector};
use morphos_learning::{Learner, LearningMetrics, LearningReport};
use morphos_optimization::{OptimizationMetrics, Optimizer};
use morphos_response::{MutationHandler, ResponseMetrics};
use morphos_strategy::{StrategyManager, StrategyMetrics};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::actuator::HandlerActuator;
use crate::config::EngineConfig;

/// What one pass through the loop did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    /// Cycle number, starting at 1
    pub cycle: u64,
    /// Mutations detected or refreshed
    pub mutations: usize,
    /// Analyses produced
    pub analyses: usize,
    /// Responses advanced or finalized
    pub responses: usize,
    /// Strategies executed
    pub executions: usize,
    /// Strategy executions that failed
    pub failed_executions: usize,
    /// Learning summary
    pub learning: LearningReport,
    /// Optimization runs finished
    pub optimizations: usize,
    /// Steps that failed, as `step: reason`
    pub errors: Vec<String>,
    /// Start time
    pub started_at: Time,
    /// Finish time
    pub finished_at: Time,
}

impl CycleReport {
    /// Whether every step ran without error.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Telemetry snapshot across all components.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineMetrics {
    /// Cycles run
    pub cycles: u64,
    /// Steps that failed across all cycles
    pub failed_steps: u64,
    /// Start of the last cycle
    pub last_cycle_at: Option<Time>,
    /// Detector counters
    pub detection: DetectionMetrics,
    /// Analyzer counters
    pub analysis: AnalysisMetrics,
    /// Handler counters
    pub response: ResponseMetrics,
    /// Strategy manager counters
    pub strategy: StrategyMetrics,
    /// Learner counters
    pub learning: LearningMetrics,
    /// Optimizer counters
    pub optimization: OptimizationMetrics,
}

#[derive(Default)]
struct EngineState {
    cycles: u64,
    failed_steps: u64,
    last_cycle_at: Option<Time>,
}

/// The six components wired into one loop.
///
/// Runs:
/// ```text
/// Detect → Analyze → Handle → Execute strategies → Learn → Optimize
/// ```
pub struct AdaptationEngine {
    detector: Arc<MutationDetector>,
    analyzer: Arc<MutationAnalyzer>,
    handler: Arc<MutationHandler>,
    strategies: Arc<StrategyManager>,
    learner: Arc<Learner>,
    optimizer: Arc<Optimizer>,
    state: Mutex<EngineState>,
}

impl AdaptationEngine {
    /// Build every component from one configuration.
    ///
    /// Responses act through `executor`; strategies act through the handler,
    /// so their changes land in the same parameter history.
    pub fn new(
        observer: Arc<dyn SystemObserver>,
        executor: Arc<dyn ActionExecutor>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;

        let detector = Arc::new(MutationDetector::try_new(observer.clone(), config.detection)?);
        let analyzer = Arc::new(MutationAnalyzer::try_new(detector.clone(), config.analysis)?);
        let handler = Arc::new(MutationHandler::try_new(detector.clone(), executor, config.response)?);
        let strategies = Arc::new(StrategyManager::try_new(
            Arc::new(HandlerActuator::new(handler.clone())),
            observer,
            config.strategy,
        )?);
        let learner = Arc::new(Learner::try_new(strategies.clone(), config.learning)?);
        let optimizer = Arc::new(Optimizer::try_new(handler.clone(), learner.clone(), config.optimization)?);

        Ok(Self {
            detector,
            analyzer,
            handler,
            strategies,
            learner,
            optimizer,
            state: Mutex::new(EngineState::default()),
        })
    }

    /// Run one cycle. A failing step is logged and reported; later steps still run.
    ///
    /// Cycles are serialized: a second caller waits for the running cycle.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut state = self.state.lock().await;
        state.cycles += 1;
        let cycle = state.cycles;
        let started_at = Utc::now();
        state.last_cycle_at = Some(started_at);
        info!("Starting adaptation cycle {}", cycle);

        let mut errors = Vec::new();

        let mutations = match self.detector.detect().await {
            Ok(mutations) => mutations.len(),
            Err(e) => {
                error!("Detection failed: {}", e);
                errors.push(format!("detect: {}", e));
                0
            }
        };

        let analyses = match self.analyzer.analyze().await {
            Ok(analyses) => analyses.len(),
            Err(e) => {
                error!("Analysis failed: {}", e);
                errors.push(format!("analyze: {}", e));
                0
            }
        };

        let responses = match self.handler.handle().await {
            Ok(responses) => responses.len(),
            Err(e) => {
                error!("Response handling failed: {}", e);
                errors.push(format!("handle: {}", e));
                0
            }
        };

        let (executions, failed_executions) = match self.strategies.execute().await {
            Ok(records) => (records.len(), records.iter().filter(|r| !r.success).count()),
            Err(e) => {
                error!("Strategy execution failed: {}", e);
                errors.push(format!("execute: {}", e));
                (0, 0)
            }
        };

        let learning = self.learner.learn().await;
        let optimizations = self.optimizer.optimize().await.len();

        state.failed_steps += errors.len() as u64;
        let report = CycleReport {
            cycle,
            mutations,
            analyses,
            responses,
            executions,
            failed_executions,
            learning,
            optimizations,
            errors,
            started_at,
            finished_at: Utc::now(),
        };

        debug!("Cycle {} report: {:?}", cycle, report);
        info!(
            "Cycle {} done: {} mutations, {} responses, {} executions, {} optimizations, {} errors",
            cycle,
            report.mutations,
            report.responses,
            report.executions,
            report.optimizations,
            report.errors.len()
        );
        report
    }

    /// Snapshot of every component's counters.
    pub async fn metrics(&self) -> EngineMetrics {
        let (cycles, failed_steps, last_cycle_at) = {
            let state = self.state.lock().await;
            (state.cycles, state.failed_steps, state.last_cycle_at)
        };
        EngineMetrics {
            cycles,
            failed_steps,
            last_cycle_at,
            detection: self.detector.metrics().await,
            analysis: self.analyzer.metrics().await,
            response: self.handler.metrics().await,
            strategy: self.strategies.metrics().await,
            learning: self.learner.metrics().await,
            optimization: self.optimizer.metrics().await,
        }
    }

    /// Mutation detector.
    pub fn detector(&self) -> &Arc<MutationDetector> {
        &self.detector
    }

    /// Mutation analyzer.
    pub fn analyzer(&self) -> &Arc<MutationAnalyzer> {
        &self.analyzer
    }

    /// Mutation handler; register response strategies here.
    pub fn handler(&self) -> &Arc<MutationHandler> {
        &self.handler
    }

    /// Strategy manager; register adaptation strategies here.
    pub fn strategies(&self) -> &Arc<StrategyManager> {
        &self.strategies
    }

    /// Learner.
    pub fn learner(&self) -> &Arc<Learner> {
        &self.learner
    }

    /// Optimizer; register objectives here.
    pub fn optimizer(&self) -> &Arc<Optimizer> {
        &self.optimizer
    }
}
