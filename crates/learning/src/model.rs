//! Per-outcome-type predictive model.
//!
//! A logistic unit over the numeric context features of an experience,
//! trained with squared-error loss. [`forward`], [`backward`] and [`update`]
//! are plain functions over an explicit weight vector whose last element is
//! the bias.

use morphos_core::{numeric_features, Context, LearningExperience};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Loss and accuracy points kept per model.
pub const HISTORY_LEN: usize = 100;

/// Logistic function.
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Predicted probability of success for one feature vector.
pub fn forward(weights: &[f64], features: &[f64]) -> f64 {
    let bias = weights.last().copied().unwrap_or(0.0);
    let sum: f64 = weights.iter().zip(features).map(|(w, x)| w * x).sum();
    sigmoid(sum + bias)
}

/// Mean loss and per-weight gradients over a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Gradients {
    /// Mean of 0.5 × (prediction - label)²
    pub loss: f64,
    /// One gradient per weight, bias last
    pub weights: Vec<f64>,
}

/// Gradients of the mean squared-error loss.
pub fn backward(weights: &[f64], samples: &[(Vec<f64>, f64)]) -> Gradients {
    let mut gradients = vec![0.0; weights.len()];
    if samples.is_empty() || weights.is_empty() {
        return Gradients { loss: 0.0, weights: gradients };
    }

    let bias = weights.len() - 1;
    let mut loss = 0.0;
    for (features, label) in samples {
        let prediction = forward(weights, features);
        let error = prediction - label;
        loss += 0.5 * error * error;

        let delta = error * prediction * (1.0 - prediction);
        for (g, x) in gradients[..bias].iter_mut().zip(features) {
            *g += delta * x;
        }
        gradients[bias] += delta;
    }

    let n = samples.len() as f64;
    for g in gradients.iter_mut() {
        *g /= n;
    }
    Gradients {
        loss: loss / n,
        weights: gradients,
    }
}

/// Momentum step with L2 regularization (the bias is not regularized).
pub fn update(
    weights: &mut [f64],
    velocity: &mut [f64],
    gradients: &[f64],
    learning_rate: f64,
    momentum: f64,
    l2_lambda: f64,
) {
    let bias = weights.len().saturating_sub(1);
    for (i, ((w, v), g)) in weights
        .iter_mut()
        .zip(velocity.iter_mut())
        .zip(gradients)
        .enumerate()
    {
        let penalty = if i == bias { 0.0 } else { l2_lambda * *w };
        *v = momentum * *v - learning_rate * (g + penalty);
        *w += *v;
    }
}

/// Training hyper-parameters.
#[derive(Debug, Clone, Copy)]
pub struct TrainingParams {
    /// Gradient step size
    pub learning_rate: f64,
    /// Momentum coefficient
    pub momentum: f64,
    /// L2 strength
    pub l2_lambda: f64,
    /// Passes over the training set
    pub epochs: usize,
}

/// Trainable predictor of one outcome type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningModel {
    /// Outcome type predicted
    pub outcome_type: String,

    /// Feature names, in weight order
    pub features: Vec<String>,

    /// Weights, bias last
    pub weights: Vec<f64>,

    velocity: Vec<f64>,

    /// Training samples seen in the last cycle
    pub samples: usize,

    /// Loss after the last training cycle
    pub last_loss: f64,

    /// Gradients of the last step
    pub last_gradients: Vec<f64>,

    /// Loss per cycle, oldest first
    pub loss_history: VecDeque<f64>,

    /// Training-set accuracy per cycle, oldest first
    pub accuracy_history: VecDeque<f64>,
}

impl LearningModel {
    /// Create an untrained model (bias only).
    pub fn new(outcome_type: impl Into<String>) -> Self {
        Self {
            outcome_type: outcome_type.into(),
            features: Vec::new(),
            weights: vec![0.0],
            velocity: vec![0.0],
            samples: 0,
            last_loss: 0.0,
            last_gradients: Vec::new(),
            loss_history: VecDeque::new(),
            accuracy_history: VecDeque::new(),
        }
    }

    /// Accuracy after the last training cycle.
    pub fn accuracy(&self) -> f64 {
        self.accuracy_history.back().copied().unwrap_or(0.0)
    }

    /// Add weights for features not seen before, drawn from ±`scale`.
    pub fn ensure_features<R: Rng>(&mut self, names: &[String], rng: &mut R, scale: f64) {
        for name in names {
            if self.features.contains(name) {
                continue;
            }
            let initial = if scale > 0.0 { rng.gen_range(-scale..=scale) } else { 0.0 };
            let at = self.features.len();
            self.features.push(name.clone());
            self.weights.insert(at, initial);
            self.velocity.insert(at, 0.0);
        }
    }

    /// Feature vector of a context in weight order (missing features are 0).
    pub fn vectorize(&self, context: &Context) -> Vec<f64> {
        let values = numeric_features(context);
        self.features
            .iter()
            .map(|name| values.get(name).copied().unwrap_or(0.0))
            .collect()
    }

    /// Predicted success probability for a context.
    pub fn predict(&self, context: &Context) -> f64 {
        forward(&self.weights, &self.vectorize(context))
    }

    /// Train on experiences; returns the loss and accuracy after training.
    pub fn train(&mut self, experiences: &[&LearningExperience], params: TrainingParams) -> (f64, f64) {
        let samples: Vec<(Vec<f64>, f64)> = experiences
            .iter()
            .map(|e| (self.vectorize(&e.context), if e.success { 1.0 } else { 0.0 }))
            .collect();
        self.samples = samples.len();
        if samples.is_empty() {
            return (self.last_loss, self.accuracy());
        }

        for _ in 0..params.epochs {
            let gradients = backward(&self.weights, &samples);
            update(
                &mut self.weights,
                &mut self.velocity,
                &gradients.weights,
                params.learning_rate,
                params.momentum,
                params.l2_lambda,
            );
            self.last_gradients = gradients.weights;
        }

        let loss = backward(&self.weights, &samples).loss;
        let correct = samples
            .iter()
            .filter(|(x, y)| (forward(&self.weights, x) >= 0.5) == (*y >= 0.5))
            .count();
        let accuracy = correct as f64 / samples.len() as f64;

        self.last_loss = loss;
        self.loss_history.push_back(loss);
        self.accuracy_history.push_back(accuracy);
        while self.loss_history.len() > HISTORY_LEN {
            self.loss_history.pop_front();
        }
        while self.accuracy_history.len() > HISTORY_LEN {
            self.accuracy_history.pop_front();
        }
        (loss, accuracy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use morphos_core::ExperienceSource;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    fn experience(entropy: f64, success: bool) -> LearningExperience {
        LearningExperience::new(
            ExperienceSource::External("test".to_string()),
            "calibration",
            Context::from([
                ("entropy".to_string(), json!(entropy)),
                ("phase".to_string(), json!("stable")),
            ]),
            success,
        )
    }

    #[test]
    fn test_forward_of_zero_weights_is_half() {
        assert_eq!(forward(&[0.0, 0.0], &[3.0]), 0.5);
    }

    #[test]
    fn test_backward_matches_finite_differences() {
        let weights = vec![0.3, -0.7, 0.1];
        let samples = vec![(vec![0.5, 1.0], 1.0), (vec![-0.2, 0.4], 0.0)];
        let analytic = backward(&weights, &samples);

        let h = 1e-6;
        for i in 0..weights.len() {
            let mut plus = weights.clone();
            plus[i] += h;
            let mut minus = weights.clone();
            minus[i] -= h;
            let numeric = (backward(&plus, &samples).loss - backward(&minus, &samples).loss) / (2.0 * h);
            assert!((numeric - analytic.weights[i]).abs() < 1e-6, "weight {}", i);
        }
    }

    #[test]
    fn test_update_applies_momentum_and_l2() {
        let mut weights = vec![1.0, 1.0];
        let mut velocity = vec![0.5, 0.5];
        update(&mut weights, &mut velocity, &[0.2, 0.2], 0.1, 0.9, 0.01);

        // v = 0.9*0.5 - 0.1*(0.2 + 0.01*1.0)
        assert!((velocity[0] - 0.429).abs() < 1e-12);
        assert!((weights[0] - 1.429).abs() < 1e-12);
        // bias is not regularized
        assert!((velocity[1] - 0.43).abs() < 1e-12);
    }

    #[test]
    fn test_training_separates_outcomes() {
        let experiences = [
            experience(0.1, true),
            experience(0.2, true),
            experience(0.8, false),
            experience(0.9, false),
        ];
        let refs: Vec<&LearningExperience> = experiences.iter().collect();

        let mut model = LearningModel::new("calibration");
        let mut rng = StdRng::seed_from_u64(7);
        model.ensure_features(&["entropy".to_string()], &mut rng, 0.1);
        assert_eq!(model.weights.len(), 2);

        let params = TrainingParams {
            learning_rate: 0.5,
            momentum: 0.9,
            l2_lambda: 0.01,
            epochs: 300,
        };
        let (first_loss, _) = model.train(&refs, TrainingParams { epochs: 1, ..params });
        let (loss, accuracy) = model.train(&refs, params);

        assert!(loss < first_loss);
        assert_eq!(accuracy, 1.0);
        assert!(model.predict(&experiences[0].context) > model.predict(&experiences[3].context));
        assert_eq!(model.loss_history.len(), 2);
    }
}
