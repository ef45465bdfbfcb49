//! Closed-loop self-adaptation engine.
//!
//! Wires detection, analysis, response handling, strategy management,
//! learning and optimization into one cycle.

#![warn(missing_docs)]

mod actuator;
mod config;
mod engine;

pub use actuator::HandlerActuator;
pub use config::EngineConfig;
pub use engine::{AdaptationEngine, CycleReport, EngineMetrics};
