//! Mutation detection (Layer 1)
//!
//! Per-entity rolling baselines and deviation flagging.

#![warn(missing_docs)]

pub mod config;
pub mod baseline;
pub mod detector;

pub use config::DetectionConfig;
pub use baseline::{MutationBaseline, MutationObservation};
pub use detector::{MutationDetector, DetectionMetrics};
