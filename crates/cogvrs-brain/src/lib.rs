//! Neural evaluators that turn agent perception vectors into action weights.
//!
//! The engine only talks to [`NeuralEvaluator`]; [`FeedForwardNet`] is the
//! baseline implementation. Alternative strategies can be plugged in by
//! implementing the trait and handing boxed instances to the world.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use thiserror::Error;

mod feedforward;

pub use feedforward::{DenseLayer, FeedForwardNet};

/// Errors raised while building or combining evaluators.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvaluatorError {
    #[error("network input size must be non-zero")]
    ZeroInput,
    #[error("network output size must be non-zero")]
    ZeroOutput,
    #[error("hidden layer {index} has zero width")]
    EmptyLayer { index: usize },
    #[error("layer {index} expected {expected} inputs but found {actual}")]
    MismatchedTopology {
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("networks have different depths ({left} vs {right})")]
    MismatchedDepth { left: usize, right: usize },
    #[error("learning rate must be finite and within (0, 1], got {0}")]
    InvalidLearningRate(f32),
}

/// Supported activation functions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum ActivationKind {
    #[default]
    Tanh,
    Sigmoid,
    Relu,
    Identity,
}

impl ActivationKind {
    /// Apply the activation to a pre-activation value.
    #[must_use]
    pub fn apply(self, value: f32) -> f32 {
        match self {
            Self::Tanh => value.tanh(),
            Self::Sigmoid => 1.0 / (1.0 + (-value).exp()),
            Self::Relu => value.max(0.0),
            Self::Identity => value,
        }
    }

    /// Derivative expressed in terms of the activation's output.
    #[must_use]
    pub fn derivative_from_output(self, output: f32) -> f32 {
        match self {
            Self::Tanh => 1.0 - output * output,
            Self::Sigmoid => output * (1.0 - output),
            Self::Relu => {
                if output > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Identity => 1.0,
        }
    }
}

/// Shape and learning parameters for a feed-forward evaluator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkLayout {
    pub input_size: usize,
    pub hidden: Vec<usize>,
    pub output_size: usize,
    pub hidden_activation: ActivationKind,
    pub output_activation: ActivationKind,
    pub learning_rate: f32,
}

impl Default for NetworkLayout {
    fn default() -> Self {
        Self {
            input_size: 20,
            hidden: vec![32, 16],
            output_size: 8,
            hidden_activation: ActivationKind::Tanh,
            output_activation: ActivationKind::Sigmoid,
            learning_rate: 0.01,
        }
    }
}

impl NetworkLayout {
    /// Check that every layer has a usable width.
    pub fn validate(&self) -> Result<(), EvaluatorError> {
        if self.input_size == 0 {
            return Err(EvaluatorError::ZeroInput);
        }
        if self.output_size == 0 {
            return Err(EvaluatorError::ZeroOutput);
        }
        if let Some(index) = self.hidden.iter().position(|&width| width == 0) {
            return Err(EvaluatorError::EmptyLayer { index });
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 || self.learning_rate > 1.0
        {
            return Err(EvaluatorError::InvalidLearningRate(self.learning_rate));
        }
        Ok(())
    }

    /// Total number of weighted connections in the layout.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        let mut previous = self.input_size;
        let mut total = 0;
        for &width in self.hidden.iter().chain(std::iter::once(&self.output_size)) {
            total += previous * width;
            previous = width;
        }
        total
    }
}

/// Mutation knobs applied to a genome's weights.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MutationParams {
    /// Per-parameter probability of additive Gaussian noise.
    pub rate: f32,
    /// Standard deviation of that noise.
    pub strength: f32,
    /// Share of `rate` that zeroes an existing connection or introduces a new one;
    /// the per-weight probability is `rate * structural_rate`.
    pub structural_rate: f32,
}

impl Default for MutationParams {
    fn default() -> Self {
        Self {
            rate: 0.1,
            strength: 0.05,
            structural_rate: 0.01,
        }
    }
}

/// Counts of what a mutation pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationReport {
    pub perturbed: usize,
    pub zeroed: usize,
    pub introduced: usize,
}

impl MutationReport {
    /// Total number of parameters touched.
    #[must_use]
    pub fn total(&self) -> usize {
        self.perturbed + self.zeroed + self.introduced
    }
}

/// Feedback handed to an evaluator after its last evaluation was acted upon.
#[derive(Debug, Clone, Copy)]
pub enum TrainingSignal<'a> {
    /// Move the last outputs toward an explicit target vector.
    Supervised { target: &'a [f32] },
    /// No target is known; nudge by `reward - baseline`.
    Reinforce { advantage: f32 },
}

/// Pluggable decision strategy owned by each agent.
pub trait NeuralEvaluator: Send + Sync + fmt::Debug {
    /// Stable identifier for the evaluator family.
    fn kind(&self) -> &'static str;

    /// Expected perception vector length.
    fn input_size(&self) -> usize;

    /// Length of the vector returned by [`NeuralEvaluator::evaluate`].
    fn output_size(&self) -> usize;

    /// Map a perception vector to an output vector. Missing inputs read as zero.
    fn evaluate(&mut self, inputs: &[f32]) -> Vec<f32>;

    /// Structural complexity used to charge metabolic upkeep.
    fn cost(&self) -> f32;

    /// Apply one online learning step using the most recent evaluation.
    fn train(&mut self, signal: TrainingSignal<'_>, rng: &mut dyn RngCore);

    /// Mutate parameters in place.
    fn mutate(&mut self, rng: &mut dyn RngCore, params: &MutationParams) -> MutationReport;

    /// Produce a child from `self` and `other`; `None` if the two are incompatible.
    fn crossover(
        &self,
        other: &dyn NeuralEvaluator,
        rng: &mut dyn RngCore,
    ) -> Option<Box<dyn NeuralEvaluator>>;

    /// Flattened copy of all trainable parameters.
    fn parameters(&self) -> Vec<f32>;

    /// A freshly initialised evaluator with the same shape as `self`.
    fn fresh(&self, rng: &mut dyn RngCore) -> Box<dyn NeuralEvaluator>;

    fn box_clone(&self) -> Box<dyn NeuralEvaluator>;

    fn as_any(&self) -> &(dyn Any + Send + Sync);
}

impl Clone for Box<dyn NeuralEvaluator> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// Standard normal sample via Box-Muller.
pub fn gaussian(rng: &mut dyn RngCore) -> f32 {
    const TWO_PI: f32 = std::f32::consts::TAU;
    let u1 = rng.random::<f32>().clamp(f32::MIN_POSITIVE, 1.0);
    let u2 = rng.random::<f32>();
    (-2.0 * u1.ln()).sqrt() * (TWO_PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    #[test]
    fn layout_validation_flags_bad_dimensions() {
        let layout = NetworkLayout {
            input_size: 0,
            ..NetworkLayout::default()
        };
        assert_eq!(layout.validate(), Err(EvaluatorError::ZeroInput));

        let layout = NetworkLayout {
            hidden: vec![8, 0, 4],
            ..NetworkLayout::default()
        };
        assert_eq!(
            layout.validate(),
            Err(EvaluatorError::EmptyLayer { index: 1 })
        );

        let layout = NetworkLayout {
            learning_rate: 0.0,
            ..NetworkLayout::default()
        };
        assert!(matches!(
            layout.validate(),
            Err(EvaluatorError::InvalidLearningRate(_))
        ));
    }

    #[test]
    fn connection_count_sums_layers() {
        let layout = NetworkLayout::default();
        assert_eq!(layout.connection_count(), 20 * 32 + 32 * 16 + 16 * 8);
    }

    #[test]
    fn gaussian_samples_are_centered() {
        let mut rng = SmallRng::seed_from_u64(7);
        let n = 4_000;
        let mean: f32 = (0..n).map(|_| gaussian(&mut rng)).sum::<f32>() / n as f32;
        assert!(mean.abs() < 0.1, "mean {mean}");
    }

    #[test]
    fn activation_derivatives_match_outputs() {
        let y = ActivationKind::Sigmoid.apply(0.0);
        assert!((y - 0.5).abs() < 1e-6);
        assert!((ActivationKind::Sigmoid.derivative_from_output(y) - 0.25).abs() < 1e-6);
        assert_eq!(ActivationKind::Relu.derivative_from_output(0.0), 0.0);
        assert_eq!(ActivationKind::Tanh.derivative_from_output(0.0), 1.0);
    }
}
