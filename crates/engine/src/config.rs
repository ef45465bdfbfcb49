//! Aggregate configuration for the whole loop.

use morphos_analysis::AnalysisConfig;
use morphos_core::Result;
use morphos_detection::DetectionConfig;
use morphos_learning::LearningConfig;
use morphos_optimization::OptimizationConfig;
use morphos_response::ResponseConfig;
use morphos_strategy::StrategyConfig;
use serde::{Deserialize, Serialize};

/// Configuration of every component, deserializable from one document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Detector settings
    pub detection: DetectionConfig,
    /// Analyzer settings
    pub analysis: AnalysisConfig,
    /// Handler settings
    pub response: ResponseConfig,
    /// Strategy manager settings
    pub strategy: StrategyConfig,
    /// Learner settings
    pub learning: LearningConfig,
    /// Optimizer settings
    pub optimization: OptimizationConfig,
}

impl EngineConfig {
    /// Validate every section; the first invalid one wins.
    pub fn validate(&self) -> Result<()> {
        self.detection.validate()?;
        self.analysis.validate()?;
        self.response.validate()?;
        self.strategy.validate()?;
        self.learning.validate()?;
        self.optimization.validate()
    }
}
