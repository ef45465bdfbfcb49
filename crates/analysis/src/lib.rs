//! Mutation analysis: causal factors, effects, correlations, risk,
//! recurring patterns and short-horizon predictions.

#![warn(missing_docs, unused_crate_dependencies)]

pub mod analyzer;
mod config;
mod engine;
pub mod patterns;

pub use analyzer::{
    CausalFactor, Correlation, CorrelationDirection, Effect, MutationAnalysis, RiskAssessment,
    RiskLevel,
};
pub use config::{AnalysisConfig, CorrelationWeights};
pub use engine::{AnalysisMetrics, MutationAnalyzer};
pub use patterns::{MutationPattern, Prediction, PredictionStatus};
