//! Morphos optimizer.
//!
//! Holds objectives over system state, searches their parameters with
//! bounded random local search and applies successful results through the
//! mutation handler, recording every finished run as a learning experience.

#![warn(missing_docs, unused_crate_dependencies)]

mod config;
pub mod objective;
pub mod optimizer;
pub mod search;

pub use config::OptimizationConfig;
pub use objective::{Objective, ObjectiveEvaluator, ObjectiveKind, ParameterSpec};
pub use optimizer::{OptimizationMetrics, Optimizer};
pub use search::{Optimization, OptimizationStatus};
