//! Aggregate system state consumed by objective evaluators and strategies.

use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::Time;

/// Coarse phase of the monitored system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemPhase {
    /// Steady operation
    Stable,
    /// Corrections in progress, system still healthy
    Adapting,
    /// Frequent failures or high load
    Turbulent,
    /// Adaptation is not keeping up
    Critical,
}

impl SystemPhase {
    /// Classify a stability score in [0, 1].
    pub fn from_stability(stability: f64) -> Self {
        if stability >= 0.8 {
            SystemPhase::Stable
        } else if stability >= 0.5 {
            SystemPhase::Adapting
        } else if stability >= 0.2 {
            SystemPhase::Turbulent
        } else {
            SystemPhase::Critical
        }
    }

    /// Numeric encoding for evaluators and condition matching.
    pub fn as_value(&self) -> f64 {
        match self {
            SystemPhase::Stable => 0.0,
            SystemPhase::Adapting => 1.0,
            SystemPhase::Turbulent => 2.0,
            SystemPhase::Critical => 3.0,
        }
    }

    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemPhase::Stable => "stable",
            SystemPhase::Adapting => "adapting",
            SystemPhase::Turbulent => "turbulent",
            SystemPhase::Critical => "critical",
        }
    }
}

/// Point-in-time view of the monitored system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemState {
    /// Activity level in [0, 1]
    pub energy: f64,

    /// Disorder in [0, 1]
    pub entropy: f64,

    /// How well corrections are landing, in [0, 1]
    pub harmony: f64,

    /// Closeness to the stability target, in [0, 1]
    pub balance: f64,

    /// Overall stability in [0, 1]
    pub stability: f64,

    /// Phase derived from stability
    pub phase: SystemPhase,

    /// When the state was captured
    pub timestamp: Time,
}

impl SystemState {
    /// A calm state: full stability, no load.
    pub fn calm() -> Self {
        Self {
            energy: 0.0,
            entropy: 0.0,
            harmony: 1.0,
            balance: 1.0,
            stability: 1.0,
            phase: SystemPhase::Stable,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Expose the state as a condition context.
    pub fn as_context(&self) -> Context {
        let mut context = Context::new();
        context.insert("energy".to_string(), serde_json::json!(self.energy));
        context.insert("entropy".to_string(), serde_json::json!(self.entropy));
        context.insert("harmony".to_string(), serde_json::json!(self.harmony));
        context.insert("balance".to_string(), serde_json::json!(self.balance));
        context.insert("stability".to_string(), serde_json::json!(self.stability));
        context.insert("phase".to_string(), serde_json::json!(self.phase.as_str()));
        context.insert("phase_level".to_string(), serde_json::json!(self.phase.as_value()));
        context
    }
}

impl Default for SystemState {
    fn default() -> Self {
        Self::calm()
    }
}
