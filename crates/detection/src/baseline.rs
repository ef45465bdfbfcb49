//! Rolling statistical baselines and the observations they are built from.

use morphos_core::{stats, EntityId, Time};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One snapshot of an entity's metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationObservation {
    /// When the snapshot was taken
    pub timestamp: Time,

    /// Entity observed
    pub entity_id: EntityId,

    /// Metric values
    pub metrics: HashMap<String, f64>,

    /// Metrics flagged as anomalous in this snapshot
    pub anomalies: Vec<String>,
}

/// Rolling statistical profile of one metric for one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationBaseline {
    /// Metric name
    pub metric: String,

    /// Mean of the retained samples
    pub mean: f64,

    /// Population standard deviation
    pub std_dev: f64,

    /// mean - 2σ
    pub lower_bound: f64,

    /// mean + 2σ
    pub upper_bound: f64,

    /// Retained sample history, oldest first
    pub samples: Vec<f64>,

    /// Confidence in [0, 1]
    pub confidence: f64,

    /// When the baseline was last recomputed
    pub updated_at: Time,
}

impl MutationBaseline {
    /// Build a baseline from samples.
    ///
    /// `full_confidence_at` is the sample count at which sample sufficiency
    /// stops limiting confidence.
    pub fn from_samples(
        metric: impl Into<String>,
        samples: Vec<f64>,
        full_confidence_at: usize,
        now: Time,
    ) -> Self {
        let mean = stats::mean(&samples);
        let std_dev = stats::std_dev(&samples);
        let confidence = Self::confidence_for(&samples, mean, std_dev, full_confidence_at);
        Self {
            metric: metric.into(),
            mean,
            std_dev,
            lower_bound: mean - 2.0 * std_dev,
            upper_bound: mean + 2.0 * std_dev,
            samples,
            confidence,
            updated_at: now,
        }
    }

    fn confidence_for(samples: &[f64], mean: f64, std_dev: f64, full_confidence_at: usize) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let sufficiency = (samples.len() as f64 / full_confidence_at.max(1) as f64).min(1.0);
        let cv = if mean.abs() < f64::EPSILON {
            std_dev
        } else {
            std_dev / mean.abs()
        };
        stats::clamp_unit(sufficiency / (1.0 + cv))
    }

    /// Number of samples behind this baseline.
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Whether the value lies within the 2σ bounds.
    pub fn within_bounds(&self, value: f64) -> bool {
        value >= self.lower_bound && value <= self.upper_bound
    }

    /// |value - mean| / |mean| (absolute deviation when the mean is zero).
    pub fn relative_deviation(&self, value: f64) -> f64 {
        let diff = (value - self.mean).abs();
        if self.mean.abs() < f64::EPSILON {
            diff
        } else {
            diff / self.mean.abs()
        }
    }

    /// Whether the value deviates from this baseline enough to fire.
    ///
    /// A value must lie strictly outside mean ± 1σ and its relative deviation
    /// must exceed `ratio`.
    pub fn is_deviation(&self, value: f64, ratio: f64) -> bool {
        (value - self.mean).abs() > self.std_dev && self.relative_deviation(value) > ratio
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn baseline(samples: Vec<f64>) -> MutationBaseline {
        MutationBaseline::from_samples("energy", samples, 6, chrono::Utc::now())
    }

    #[test]
    fn test_bounds_are_two_sigma() {
        let b = baseline(vec![9.0, 11.0, 9.0, 11.0]);
        assert_eq!(b.mean, 10.0);
        assert!((b.std_dev - 1.0).abs() < 1e-12);
        assert!((b.lower_bound - 8.0).abs() < 1e-12);
        assert!((b.upper_bound - 12.0).abs() < 1e-12);
        assert!(b.within_bounds(11.5));
        assert!(!b.within_bounds(14.0));
    }

    #[test]
    fn test_within_one_sigma_never_fires() {
        let b = baseline(vec![9.0, 11.0, 9.0, 11.0]);
        // Relative deviation of 0.1 is below any sensible ratio, and inside 1σ.
        assert!(!b.is_deviation(11.0, 0.0));
        assert!(!b.is_deviation(9.2, 0.0));
    }

    #[test]
    fn test_large_deviation_fires() {
        let b = baseline(vec![9.0, 11.0, 9.0, 11.0]);
        assert!(b.is_deviation(14.0, 0.2));
        assert!(!b.is_deviation(14.0, 0.5));
    }

    #[test]
    fn test_confidence_grows_with_samples() {
        let few = baseline(vec![10.0, 10.0]);
        let many = baseline(vec![10.0; 6]);
        assert!(few.confidence < many.confidence);
        assert!((many.confidence - 1.0).abs() < 1e-12);
    }
}
