//! Objectives: target values over system state and the parameters that move them.

use morphos_core::{MorphosError, ObjectiveId, Result, SystemState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Evaluates an objective at a parameter point.
pub trait ObjectiveEvaluator: Send + Sync {
    /// Objective value for the given state and candidate parameters.
    fn evaluate(&self, state: &SystemState, parameters: &HashMap<String, f64>) -> f64;
}

impl<F> ObjectiveEvaluator for F
where
    F: Fn(&SystemState, &HashMap<String, f64>) -> f64 + Send + Sync,
{
    fn evaluate(&self, state: &SystemState, parameters: &HashMap<String, f64>) -> f64 {
        self(state, parameters)
    }
}

/// How a successful run is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObjectiveKind {
    /// Push the parameters to one target
    Parameter {
        /// Target receiving the adjustment
        target: String,
    },
    /// Trigger a system-level optimization pass
    System,
}

/// A tunable parameter with its search range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Name
    pub name: String,

    /// Current value
    pub value: f64,

    /// Lower bound
    pub min: f64,

    /// Upper bound
    pub max: f64,

    /// Largest perturbation per iteration
    pub step: f64,

    /// Relative scale of the perturbation
    pub weight: f64,
}

impl ParameterSpec {
    /// Create a parameter with unit weight.
    pub fn new(name: impl Into<String>, value: f64, min: f64, max: f64, step: f64) -> Self {
        Self {
            name: name.into(),
            value,
            min,
            max,
            step,
            weight: 1.0,
        }
    }

    /// Set the perturbation weight.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Clamp a value into the declared range.
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    fn validate(&self) -> Result<()> {
        let finite = [self.value, self.min, self.max, self.step, self.weight]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.min > self.max {
            return Err(MorphosError::validation(format!(
                "parameter {} has an invalid range",
                self.name
            )));
        }
        if !(self.min..=self.max).contains(&self.value) {
            return Err(MorphosError::validation(format!(
                "parameter {} value {} is outside [{}, {}]",
                self.name, self.value, self.min, self.max
            )));
        }
        if self.step <= 0.0 || self.weight <= 0.0 {
            return Err(MorphosError::validation(format!(
                "parameter {} needs a positive step and weight",
                self.name
            )));
        }
        Ok(())
    }
}

/// A named target value for some measurable aspect of the system.
#[derive(Clone)]
pub struct Objective {
    /// Unique identifier
    pub id: ObjectiveId,

    /// Display name
    pub name: String,

    /// How results are applied
    pub kind: ObjectiveKind,

    /// Value to reach
    pub target: f64,

    /// Relative importance
    pub weight: f64,

    /// Parameters searched
    pub parameters: Vec<ParameterSpec>,

    evaluator: Arc<dyn ObjectiveEvaluator>,
}

impl std::fmt::Debug for Objective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Objective")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("target", &self.target)
            .field("weight", &self.weight)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

impl Objective {
    /// Create an objective with no parameters.
    pub fn new(
        id: impl Into<ObjectiveId>,
        name: impl Into<String>,
        kind: ObjectiveKind,
        target: f64,
        evaluator: impl ObjectiveEvaluator + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            target,
            weight: 1.0,
            parameters: Vec::new(),
            evaluator: Arc::new(evaluator),
        }
    }

    /// Add a searched parameter.
    pub fn with_parameter(mut self, parameter: ParameterSpec) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Set the weight.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Current parameter values by name.
    pub fn parameter_values(&self) -> HashMap<String, f64> {
        values_of(&self.parameters)
    }

    /// Evaluate at the given parameters.
    pub fn evaluate(&self, state: &SystemState, parameters: &HashMap<String, f64>) -> f64 {
        self.evaluator.evaluate(state, parameters)
    }

    /// Reject malformed objectives before they are stored.
    pub fn validate(&self) -> Result<()> {
        if self.id.as_str().trim().is_empty() {
            return Err(MorphosError::validation("objective id is empty"));
        }
        if !self.target.is_finite() || !(self.weight.is_finite() && self.weight > 0.0) {
            return Err(MorphosError::validation(format!(
                "objective {} needs a finite target and positive weight",
                self.id
            )));
        }
        if self.parameters.is_empty() {
            return Err(MorphosError::validation(format!("objective {} has no parameters", self.id)));
        }
        if let ObjectiveKind::Parameter { target } = &self.kind {
            if target.trim().is_empty() {
                return Err(MorphosError::validation(format!("objective {} has an empty target", self.id)));
            }
        }
        for parameter in &self.parameters {
            parameter.validate()?;
        }
        Ok(())
    }
}

/// Parameter values by name.
pub fn values_of(parameters: &[ParameterSpec]) -> HashMap<String, f64> {
    parameters.iter().map(|p| (p.name.clone(), p.value)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn objective() -> Objective {
        Objective::new(
            "harmony",
            "Harmony",
            ObjectiveKind::System,
            0.9,
            |state: &SystemState, p: &HashMap<String, f64>| state.harmony * p.get("gain").copied().unwrap_or(0.0),
        )
        .with_parameter(ParameterSpec::new("gain", 0.5, 0.0, 1.0, 0.1))
    }

    #[test]
    fn test_closure_evaluator() {
        let objective = objective();
        let value = objective.evaluate(&SystemState::calm(), &objective.parameter_values());
        assert!((value - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_validation() {
        assert!(objective().validate().is_ok());

        let out_of_range = objective().with_parameter(ParameterSpec::new("bias", 2.0, 0.0, 1.0, 0.1));
        assert!(matches!(out_of_range.validate(), Err(MorphosError::Validation(_))));

        let mut no_target = objective();
        no_target.kind = ObjectiveKind::Parameter { target: " ".to_string() };
        assert!(no_target.validate().is_err());

        let mut bare = objective();
        bare.parameters.clear();
        assert!(bare.validate().is_err());
    }
}
