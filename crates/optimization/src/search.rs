//! Bounded random local search.

use morphos_core::{ObjectiveId, OptimizationId, SystemState, Time};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::objective::{values_of, Objective, ParameterSpec};

/// Improvements considered when judging convergence.
pub const CONVERGENCE_WINDOW: usize = 3;

/// Lifecycle of an optimization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStatus {
    /// Still searching
    Running,
    /// Improvements stalled close to the target
    Converged,
    /// Distance to target became negligible
    TargetReached,
    /// Iteration cap hit
    MaxIterations,
}

impl OptimizationStatus {
    /// Stable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationStatus::Running => "running",
            OptimizationStatus::Converged => "converged",
            OptimizationStatus::TargetReached => "target_reached",
            OptimizationStatus::MaxIterations => "max_iterations",
        }
    }
}

/// Random neighbour of a parameter point: each value moves by up to
/// `step × weight` in either direction, clamped to its bounds.
pub fn perturb<R: Rng>(parameters: &[ParameterSpec], rng: &mut R) -> Vec<ParameterSpec> {
    parameters
        .iter()
        .map(|p| {
            let delta = p.step * p.weight * rng.gen_range(-1.0..=1.0);
            ParameterSpec {
                value: p.clamp(p.value + delta),
                ..p.clone()
            }
        })
        .collect()
}

/// Whether a run has converged: at least three iterations, the last three
/// improvements all below `rate`, and the error below `threshold`.
pub fn has_converged(improvements: &[f64], error: f64, rate: f64, threshold: f64) -> bool {
    if improvements.len() < CONVERGENCE_WINDOW {
        return false;
    }
    let stalled = improvements[improvements.len() - CONVERGENCE_WINDOW..]
        .iter()
        .all(|i| *i < rate);
    stalled && error < threshold
}

/// Whether a finished run counts as successful: its final value is within
/// `threshold` of the target or strictly between the initial value and target.
pub fn is_successful(initial: f64, final_value: f64, target: f64, threshold: f64) -> bool {
    if (final_value - target).abs() <= threshold {
        return true;
    }
    let (low, high) = if initial < target { (initial, target) } else { (target, initial) };
    low < final_value && final_value < high
}

/// One in-progress or finished search for an objective's target value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Optimization {
    /// Unique identifier
    pub id: OptimizationId,

    /// Objective searched
    pub objective_id: ObjectiveId,

    /// Best parameter point so far
    pub parameters: Vec<ParameterSpec>,

    /// Target value
    pub target: f64,

    /// Value at the starting point
    pub initial_value: f64,

    /// Value at the best point
    pub best_value: f64,

    /// Distance to target gained so far
    pub improvement: f64,

    /// Iterations performed
    pub iterations: u32,

    /// Status
    pub status: OptimizationStatus,

    /// Distance gained per iteration (0 when the candidate was rejected)
    pub improvements: Vec<f64>,

    /// Best value after each iteration
    pub curve: Vec<f64>,

    /// Whether the finished run met the success criterion
    pub success: bool,

    /// Whether the result was pushed to the system
    pub applied: bool,

    /// Start time
    pub started_at: Time,

    /// Finish time
    pub finished_at: Option<Time>,
}

impl Optimization {
    /// Start a run from the objective's current parameters.
    pub fn start(objective: &Objective, initial_value: f64, now: Time) -> Self {
        Self {
            id: OptimizationId::new(),
            objective_id: objective.id.clone(),
            parameters: objective.parameters.clone(),
            target: objective.target,
            initial_value,
            best_value: initial_value,
            improvement: 0.0,
            iterations: 0,
            status: OptimizationStatus::Running,
            improvements: Vec::new(),
            curve: vec![initial_value],
            success: false,
            applied: false,
            started_at: now,
            finished_at: None,
        }
    }

    /// Distance of the best value from the target.
    pub fn error(&self) -> f64 {
        (self.best_value - self.target).abs()
    }

    /// Best parameter values by name.
    pub fn parameter_values(&self) -> HashMap<String, f64> {
        values_of(&self.parameters)
    }

    /// Evaluate one random neighbour and keep it if it is closer to the target.
    pub fn step<R: Rng>(&mut self, objective: &Objective, state: &SystemState, rng: &mut R) {
        let candidate = perturb(&self.parameters, rng);
        let value = objective.evaluate(state, &values_of(&candidate));

        let error = (value - self.target).abs();
        let gained = if value.is_finite() && error < self.error() {
            let gained = self.error() - error;
            self.parameters = candidate;
            self.best_value = value;
            gained
        } else {
            0.0
        };

        self.iterations += 1;
        self.improvements.push(gained);
        self.curve.push(self.best_value);
        self.improvement = (self.initial_value - self.target).abs() - self.error();
    }

    /// Status after the latest iteration.
    pub fn evaluate_status(&self, threshold: f64, rate: f64, max_iterations: u32) -> OptimizationStatus {
        let error = self.error();
        if has_converged(&self.improvements, error, rate, threshold) {
            OptimizationStatus::Converged
        } else if error <= rate {
            OptimizationStatus::TargetReached
        } else if self.iterations >= max_iterations {
            OptimizationStatus::MaxIterations
        } else {
            OptimizationStatus::Running
        }
    }

    /// Close the run with a terminal status.
    pub fn finish(&mut self, status: OptimizationStatus, threshold: f64, now: Time) {
        self.status = status;
        self.success = is_successful(self.initial_value, self.best_value, self.target, threshold);
        self.finished_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objective::ObjectiveKind;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn objective() -> Objective {
        Objective::new(
            "gain",
            "Gain",
            ObjectiveKind::System,
            0.8,
            |_: &SystemState, p: &HashMap<String, f64>| p.get("gain").copied().unwrap_or(0.0),
        )
        .with_parameter(ParameterSpec::new("gain", 0.2, 0.0, 1.0, 0.1))
    }

    #[test]
    fn test_perturb_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut point = vec![ParameterSpec::new("x", 0.95, 0.0, 1.0, 0.5)];
        for _ in 0..200 {
            point = perturb(&point, &mut rng);
            assert!((0.0..=1.0).contains(&point[0].value));
        }
    }

    #[test]
    fn test_converged_scenario() {
        let objective = objective();
        let mut run = Optimization::start(&objective, 0.2, chrono::Utc::now());
        run.best_value = 0.78;
        run.iterations = 12;
        run.improvements = vec![0.1, 0.05, 0.0005, 0.0, 0.0002];

        assert_eq!(run.evaluate_status(0.05, 0.001, 100), OptimizationStatus::Converged);

        run.improvements.push(0.01);
        assert_eq!(run.evaluate_status(0.05, 0.001, 100), OptimizationStatus::Running);
        assert_eq!(run.evaluate_status(0.05, 0.001, 12), OptimizationStatus::MaxIterations);
    }

    #[test]
    fn test_success_criterion() {
        assert!(is_successful(0.2, 0.78, 0.8, 0.05));
        assert!(is_successful(0.2, 0.5, 0.8, 0.05));
        assert!(!is_successful(0.2, 0.2, 0.8, 0.05));
        assert!(!is_successful(0.2, 0.9, 0.8, 0.05));
        assert!(is_successful(1.0, 0.9, 0.8, 0.05));
    }

    #[test]
    fn test_steps_never_move_away_from_target() {
        let objective = objective();
        let state = SystemState::calm();
        let mut rng = StdRng::seed_from_u64(5);
        let mut run = Optimization::start(&objective, 0.2, chrono::Utc::now());

        let mut last_error = run.error();
        for _ in 0..50 {
            run.step(&objective, &state, &mut rng);
            assert!(run.error() <= last_error);
            last_error = run.error();
        }
        assert_eq!(run.iterations, 50);
        assert_eq!(run.curve.len(), 51);
        assert!(run.improvement > 0.0);
        assert!(run.parameters.iter().all(|p| (0.0..=1.0).contains(&p.value)));
    }
}
