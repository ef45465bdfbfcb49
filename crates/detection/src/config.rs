//! Detector configuration.

use morphos_core::{MorphosError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the mutation detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum probability for a mutation to be stored
    pub detection_threshold: f64,

    /// Observation / mutation retention window in seconds
    pub time_window_secs: u64,

    /// Higher values flag smaller relative deviations (flag above `1 - sensitivity`)
    pub sensitivity: f64,

    /// Stability factor blended into detection probability
    pub stability_factor: f64,

    /// Observations required before a baseline is used for flagging
    pub min_observations: usize,

    /// Maximum observations retained per entity
    pub max_observations: usize,

    /// Metric name fragments classified as energy-like
    pub energy_metrics: Vec<String>,

    /// Metric name fragments classified as structural
    pub structural_metrics: Vec<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            detection_threshold: 0.5,
            time_window_secs: 3600,
            sensitivity: 0.8,
            stability_factor: 0.8,
            min_observations: 3,
            max_observations: 100,
            energy_metrics: ["energy", "power", "intensity", "frequency", "amplitude"]
                .into_iter()
                .map(String::from)
                .collect(),
            structural_metrics: ["structure", "complexity", "connectivity", "density", "coherence"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl DetectionConfig {
    /// Check the configuration for impossible values.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.detection_threshold) {
            return Err(MorphosError::config("detection_threshold must be in [0, 1]"));
        }
        if !(0.0..1.0).contains(&self.sensitivity) {
            return Err(MorphosError::config("sensitivity must be in [0, 1)"));
        }
        if !(0.0..=1.0).contains(&self.stability_factor) {
            return Err(MorphosError::config("stability_factor must be in [0, 1]"));
        }
        if self.time_window_secs == 0 {
            return Err(MorphosError::config("time_window_secs must be positive"));
        }
        if self.min_observations < 2 {
            return Err(MorphosError::config("min_observations must be at least 2"));
        }
        if self.max_observations < self.min_observations {
            return Err(MorphosError::config(
                "max_observations must be at least min_observations",
            ));
        }
        Ok(())
    }

    /// Relative deviation a metric must exceed to fire.
    pub fn deviation_ratio(&self) -> f64 {
        1.0 - self.sensitivity
    }

    /// Retention window as a chrono duration.
    pub fn time_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.time_window_secs as i64)
    }
}
