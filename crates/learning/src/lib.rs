//! Morphos learning layer.
//!
//! Converts strategy outcomes into experiences, mines them into decaying
//! knowledge units, trains a small predictor per outcome type and feeds
//! parameters, rules and re-tuned thresholds back into the strategy manager.

#![warn(missing_docs)]

mod config;
pub mod knowledge;
pub mod learner;
pub mod memory;
pub mod mining;
pub mod model;

pub use config::LearningConfig;
pub use knowledge::{KnowledgeStore, KnowledgeUnit};
pub use learner::{Learner, LearningMetrics, LearningReport, ModelMetrics};
pub use memory::ExperienceMemory;
pub use mining::{ExperiencePattern, MiningThresholds, PatternKind};
pub use model::{LearningModel, TrainingParams};
