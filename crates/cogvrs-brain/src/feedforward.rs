//! Dense feed-forward evaluator with Xavier initialisation and last-layer online learning.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::any::Any;

use crate::{
    ActivationKind, EvaluatorError, MutationParams, MutationReport, NetworkLayout,
    NeuralEvaluator, TrainingSignal, gaussian,
};

const WEIGHT_DECAY: f32 = 0.9999;
const REINFORCE_NOISE: f32 = 0.01;

/// One fully connected layer; weights are stored row-major (`outputs x inputs`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DenseLayer {
    inputs: usize,
    outputs: usize,
    activation: ActivationKind,
    weights: Vec<f32>,
    biases: Vec<f32>,
}

impl DenseLayer {
    fn xavier(
        inputs: usize,
        outputs: usize,
        activation: ActivationKind,
        rng: &mut dyn RngCore,
    ) -> Self {
        let limit = xavier_limit(inputs, outputs);
        let weights = (0..inputs * outputs)
            .map(|_| rng.random_range(-limit..=limit))
            .collect();
        Self {
            inputs,
            outputs,
            activation,
            weights,
            biases: vec![0.0; outputs],
        }
    }

    /// Number of inputs consumed.
    #[must_use]
    pub fn inputs(&self) -> usize {
        self.inputs
    }

    /// Number of outputs produced.
    #[must_use]
    pub fn outputs(&self) -> usize {
        self.outputs
    }

    /// Row-major weight matrix.
    #[must_use]
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    #[must_use]
    pub fn biases(&self) -> &[f32] {
        &self.biases
    }

    fn forward(&self, input: &[f32]) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.outputs);
        for row in 0..self.outputs {
            let weights = &self.weights[row * self.inputs..(row + 1) * self.inputs];
            let mut acc = self.biases[row];
            for (w, x) in weights.iter().zip(input) {
                acc += w * x;
            }
            out.push(self.activation.apply(acc));
        }
        out
    }

    fn same_shape(&self, other: &Self) -> bool {
        self.inputs == other.inputs && self.outputs == other.outputs
    }

    fn blend(primary: &Self, secondary: &Self, alpha: f32) -> Self {
        let mix = |a: &f32, b: &f32| alpha * a + (1.0 - alpha) * b;
        Self {
            inputs: primary.inputs,
            outputs: primary.outputs,
            activation: primary.activation,
            weights: primary
                .weights
                .iter()
                .zip(&secondary.weights)
                .map(|(a, b)| mix(a, b))
                .collect(),
            biases: primary
                .biases
                .iter()
                .zip(&secondary.biases)
                .map(|(a, b)| mix(a, b))
                .collect(),
        }
    }
}

fn xavier_limit(inputs: usize, outputs: usize) -> f32 {
    (6.0 / (inputs + outputs).max(1) as f32).sqrt()
}

/// Baseline multi-layer perceptron evaluator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedForwardNet {
    layers: Vec<DenseLayer>,
    learning_rate: f32,
    /// Activations from the latest `evaluate`: the input followed by each layer's output.
    #[serde(skip)]
    trace: Vec<Vec<f32>>,
}

impl FeedForwardNet {
    /// Identifier reported through [`NeuralEvaluator::kind`].
    pub const KIND: &'static str = "feedforward.mlp";

    /// Build a randomly initialised network for `layout`.
    pub fn random(layout: &NetworkLayout, rng: &mut dyn RngCore) -> Result<Self, EvaluatorError> {
        layout.validate()?;
        let mut layers = Vec::with_capacity(layout.hidden.len() + 1);
        let mut previous = layout.input_size;
        for &width in &layout.hidden {
            layers.push(DenseLayer::xavier(
                previous,
                width,
                layout.hidden_activation,
                rng,
            ));
            previous = width;
        }
        layers.push(DenseLayer::xavier(
            previous,
            layout.output_size,
            layout.output_activation,
            rng,
        ));
        Ok(Self {
            layers,
            learning_rate: layout.learning_rate,
            trace: Vec::new(),
        })
    }

    /// Boxed variant for storage behind the evaluator trait.
    pub fn boxed(
        layout: &NetworkLayout,
        rng: &mut dyn RngCore,
    ) -> Result<Box<dyn NeuralEvaluator>, EvaluatorError> {
        Ok(Box::new(Self::random(layout, rng)?))
    }

    #[must_use]
    pub fn layers(&self) -> &[DenseLayer] {
        &self.layers
    }

    #[must_use]
    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    /// Check that `other` has identical layer dimensions.
    pub fn check_compatible(&self, other: &Self) -> Result<(), EvaluatorError> {
        if self.layers.len() != other.layers.len() {
            return Err(EvaluatorError::MismatchedDepth {
                left: self.layers.len(),
                right: other.layers.len(),
            });
        }
        for (index, (a, b)) in self.layers.iter().zip(&other.layers).enumerate() {
            if !a.same_shape(b) {
                return Err(EvaluatorError::MismatchedTopology {
                    index,
                    expected: a.inputs * a.outputs,
                    actual: b.inputs * b.outputs,
                });
            }
        }
        Ok(())
    }

    /// Deterministic recombination: for each layer, `primaries[i]` selects whether
    /// `self` (true) or `other` (false) is the primary parent, and the child layer is
    /// `alpha * primary + (1 - alpha) * secondary`.
    pub fn blend(
        &self,
        other: &Self,
        primaries: &[bool],
        alpha: f32,
    ) -> Result<Self, EvaluatorError> {
        self.check_compatible(other)?;
        let alpha = alpha.clamp(0.0, 1.0);
        let layers = self
            .layers
            .iter()
            .zip(&other.layers)
            .enumerate()
            .map(|(idx, (mine, theirs))| {
                if primaries.get(idx).copied().unwrap_or(true) {
                    DenseLayer::blend(mine, theirs, alpha)
                } else {
                    DenseLayer::blend(theirs, mine, alpha)
                }
            })
            .collect();
        Ok(Self {
            layers,
            learning_rate: self.learning_rate,
            trace: Vec::new(),
        })
    }

    fn forward(&mut self, inputs: &[f32]) -> Vec<f32> {
        let width = self.layers.first().map_or(0, DenseLayer::inputs);
        let mut current: Vec<f32> = (0..width)
            .map(|idx| inputs.get(idx).copied().unwrap_or(0.0))
            .collect();
        self.trace.clear();
        for layer in &self.layers {
            let next = layer.forward(&current);
            self.trace.push(std::mem::replace(&mut current, next));
        }
        self.trace.push(current.clone());
        current
    }

    /// Gradient step on the output layer toward `target`.
    fn supervised_step(&mut self, target: &[f32]) {
        let lr = self.learning_rate;
        let Some(layer_idx) = self.layers.len().checked_sub(1) else {
            return;
        };
        let (Some(hidden), Some(output)) = (self.trace.get(layer_idx), self.trace.get(layer_idx + 1))
        else {
            return;
        };
        let layer = &mut self.layers[layer_idx];
        for row in 0..layer.outputs {
            let Some(&goal) = target.get(row) else {
                break;
            };
            let y = output[row];
            let grad = (goal - y) * layer.activation.derivative_from_output(y);
            let weights = &mut layer.weights[row * layer.inputs..(row + 1) * layer.inputs];
            for (w, h) in weights.iter_mut().zip(hidden) {
                *w = *w * WEIGHT_DECAY + lr * grad * h;
            }
            layer.biases[row] += lr * grad;
        }
    }

    /// Reward-modulated Hebbian nudge on the output layer plus scaled exploration noise.
    fn reinforce_step(&mut self, advantage: f32, rng: &mut dyn RngCore) {
        if advantage == 0.0 || !advantage.is_finite() {
            return;
        }
        let lr = self.learning_rate;
        let Some(layer_idx) = self.layers.len().checked_sub(1) else {
            return;
        };
        let (Some(hidden), Some(output)) = (self.trace.get(layer_idx), self.trace.get(layer_idx + 1))
        else {
            return;
        };
        let layer = &mut self.layers[layer_idx];
        for row in 0..layer.outputs {
            let centered = output[row] - 0.5;
            let weights = &mut layer.weights[row * layer.inputs..(row + 1) * layer.inputs];
            for (w, h) in weights.iter_mut().zip(hidden) {
                let noise = gaussian(rng) * REINFORCE_NOISE;
                *w += lr * advantage * (centered * h + noise);
            }
        }
    }
}

impl NeuralEvaluator for FeedForwardNet {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn input_size(&self) -> usize {
        self.layers.first().map_or(0, DenseLayer::inputs)
    }

    fn output_size(&self) -> usize {
        self.layers.last().map_or(0, DenseLayer::outputs)
    }

    fn evaluate(&mut self, inputs: &[f32]) -> Vec<f32> {
        self.forward(inputs)
    }

    fn cost(&self) -> f32 {
        self.layers
            .iter()
            .flat_map(|layer| layer.weights.iter())
            .map(|w| w.abs())
            .sum()
    }

    fn train(&mut self, signal: TrainingSignal<'_>, rng: &mut dyn RngCore) {
        if self.trace.is_empty() {
            return;
        }
        match signal {
            TrainingSignal::Supervised { target } => self.supervised_step(target),
            TrainingSignal::Reinforce { advantage } => self.reinforce_step(advantage, rng),
        }
    }

    fn mutate(&mut self, rng: &mut dyn RngCore, params: &MutationParams) -> MutationReport {
        let mut report = MutationReport::default();
        let sigma = params.strength.max(0.0);
        let structural = params.rate * params.structural_rate;
        for layer in &mut self.layers {
            let limit = xavier_limit(layer.inputs, layer.outputs);
            for w in &mut layer.weights {
                if rng.random::<f32>() < params.rate {
                    *w += gaussian(rng) * sigma;
                    report.perturbed += 1;
                }
                if rng.random::<f32>() < structural {
                    if *w != 0.0 {
                        *w = 0.0;
                        report.zeroed += 1;
                    } else {
                        *w = rng.random_range(-limit..=limit);
                        report.introduced += 1;
                    }
                }
            }
            for b in &mut layer.biases {
                if rng.random::<f32>() < params.rate {
                    *b += gaussian(rng) * sigma;
                    report.perturbed += 1;
                }
            }
        }
        report
    }

    fn crossover(
        &self,
        other: &dyn NeuralEvaluator,
        rng: &mut dyn RngCore,
    ) -> Option<Box<dyn NeuralEvaluator>> {
        if other.kind() != Self::KIND {
            return None;
        }
        let other = other.as_any().downcast_ref::<Self>()?;
        let primaries: Vec<bool> = (0..self.layers.len())
            .map(|_| rng.random_bool(0.5))
            .collect();
        let alpha = rng.random::<f32>();
        match self.blend(other, &primaries, alpha) {
            Ok(child) => Some(Box::new(child)),
            Err(err) => {
                tracing::debug!(%err, "crossover rejected incompatible parents");
                None
            }
        }
    }

    fn parameters(&self) -> Vec<f32> {
        self.layers
            .iter()
            .flat_map(|layer| layer.weights.iter().chain(layer.biases.iter()))
            .copied()
            .collect()
    }

    fn fresh(&self, rng: &mut dyn RngCore) -> Box<dyn NeuralEvaluator> {
        let layers = self
            .layers
            .iter()
            .map(|layer| DenseLayer::xavier(layer.inputs, layer.outputs, layer.activation, rng))
            .collect();
        Box::new(Self {
            layers,
            learning_rate: self.learning_rate,
            trace: Vec::new(),
        })
    }

    fn box_clone(&self) -> Box<dyn NeuralEvaluator> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    fn small_layout() -> NetworkLayout {
        NetworkLayout {
            input_size: 6,
            hidden: vec![5, 4],
            output_size: 3,
            ..NetworkLayout::default()
        }
    }

    #[test]
    fn random_net_has_expected_structure() {
        let mut rng = SmallRng::seed_from_u64(0xDEADBEEF);
        let net = FeedForwardNet::random(&small_layout(), &mut rng).expect("net");
        assert_eq!(net.layers().len(), 3);
        assert_eq!(net.input_size(), 6);
        assert_eq!(net.output_size(), 3);
        assert_eq!(
            net.layers().iter().map(|l| l.weights().len()).sum::<usize>(),
            small_layout().connection_count()
        );
        let limit = xavier_limit(6, 5);
        assert!(net.layers()[0].weights().iter().all(|w| w.abs() <= limit));
    }

    #[test]
    fn fresh_keeps_shape_with_new_weights() {
        let mut rng = SmallRng::seed_from_u64(0xF00D);
        let net = FeedForwardNet::random(&small_layout(), &mut rng).expect("net");
        let other = net.fresh(&mut rng);
        assert_eq!(other.kind(), FeedForwardNet::KIND);
        assert_eq!(other.input_size(), 6);
        assert_eq!(other.output_size(), 3);
        assert_eq!(other.parameters().len(), net.parameters().len());
        assert_ne!(other.parameters(), net.parameters());
    }

    #[test]
    fn evaluate_is_bounded_by_sigmoid() {
        let mut rng = SmallRng::seed_from_u64(123);
        let mut net = FeedForwardNet::random(&small_layout(), &mut rng).expect("net");
        let outputs = net.evaluate(&[1.0, -1.0, 0.5, 0.0, 0.25]);
        assert_eq!(outputs.len(), 3);
        assert!(outputs.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn cost_is_sum_of_absolute_weights() {
        let mut rng = SmallRng::seed_from_u64(9);
        let net = FeedForwardNet::random(&small_layout(), &mut rng).expect("net");
        let expected: f32 = net
            .layers()
            .iter()
            .flat_map(|l| l.weights().iter())
            .map(|w| w.abs())
            .sum();
        assert!((net.cost() - expected).abs() < 1e-5);
        assert!(net.cost() > 0.0);
    }

    #[test]
    fn full_rate_mutation_perturbs_every_weight() {
        let mut rng = SmallRng::seed_from_u64(456);
        let mut net = FeedForwardNet::random(&small_layout(), &mut rng).expect("net");
        let before = net.parameters();
        let params = MutationParams {
            rate: 1.0,
            strength: 0.5,
            structural_rate: 0.0,
        };
        let report = net.mutate(&mut rng, &params);
        let after = net.parameters();
        assert_eq!(report.perturbed, before.len());
        assert_eq!(report.zeroed + report.introduced, 0);
        assert!(before.iter().zip(&after).all(|(a, b)| a != b));
    }

    #[test]
    fn zero_rate_mutation_is_identity() {
        let mut rng = SmallRng::seed_from_u64(457);
        let mut net = FeedForwardNet::random(&small_layout(), &mut rng).expect("net");
        let before = net.parameters();
        let params = MutationParams {
            rate: 0.0,
            strength: 0.5,
            structural_rate: 0.0,
        };
        assert_eq!(net.mutate(&mut rng, &params).total(), 0);
        assert_eq!(before, net.parameters());
    }

    #[test]
    fn zero_rate_disables_structural_changes() {
        let mut rng = SmallRng::seed_from_u64(459);
        let mut net = FeedForwardNet::random(&small_layout(), &mut rng).expect("net");
        let before = net.parameters();
        let params = MutationParams {
            rate: 0.0,
            strength: 0.5,
            structural_rate: 1.0,
        };
        for _ in 0..20 {
            assert_eq!(net.mutate(&mut rng, &params).total(), 0);
        }
        assert_eq!(before, net.parameters());
    }

    #[test]
    fn structural_mutation_toggles_connections() {
        let mut rng = SmallRng::seed_from_u64(458);
        let mut net = FeedForwardNet::random(&small_layout(), &mut rng).expect("net");
        let params = MutationParams {
            rate: 1.0,
            strength: 0.0,
            structural_rate: 1.0,
        };
        let report = net.mutate(&mut rng, &params);
        assert_eq!(report.zeroed, small_layout().connection_count());
        assert!(net.layers().iter().all(|l| l.weights().iter().all(|w| *w == 0.0)));
        let report = net.mutate(&mut rng, &params);
        assert_eq!(report.introduced, small_layout().connection_count());
    }

    #[test]
    fn blend_is_convex_combination() {
        let mut rng = SmallRng::seed_from_u64(789);
        let a = FeedForwardNet::random(&small_layout(), &mut rng).expect("a");
        let b = FeedForwardNet::random(&small_layout(), &mut rng).expect("b");
        let child = a.blend(&b, &[true, false, true], 0.25).expect("blend");
        for (idx, layer) in child.layers().iter().enumerate() {
            let (primary, secondary) = if idx == 1 {
                (&b.layers()[idx], &a.layers()[idx])
            } else {
                (&a.layers()[idx], &b.layers()[idx])
            };
            for ((c, p), s) in layer
                .weights()
                .iter()
                .zip(primary.weights())
                .zip(secondary.weights())
            {
                assert!((c - (0.25 * p + 0.75 * s)).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn crossover_rejects_mismatched_topology() {
        let mut rng = SmallRng::seed_from_u64(101);
        let a = FeedForwardNet::random(&small_layout(), &mut rng).expect("a");
        let b = FeedForwardNet::random(
            &NetworkLayout {
                hidden: vec![7],
                ..small_layout()
            },
            &mut rng,
        )
        .expect("b");
        assert!(a.crossover(&b, &mut rng).is_none());
        assert!(matches!(
            a.blend(&b, &[], 0.5),
            Err(EvaluatorError::MismatchedDepth { .. })
        ));
    }

    #[test]
    fn crossover_child_lies_between_parents() {
        let mut rng = SmallRng::seed_from_u64(101112);
        let a = FeedForwardNet::random(&small_layout(), &mut rng).expect("a");
        let b = FeedForwardNet::random(&small_layout(), &mut rng).expect("b");
        let child = a.crossover(&b, &mut rng).expect("child");
        assert_eq!(child.kind(), FeedForwardNet::KIND);
        for ((c, x), y) in child
            .parameters()
            .iter()
            .zip(a.parameters())
            .zip(b.parameters())
        {
            let (lo, hi) = if x < y { (x, y) } else { (y, x) };
            assert!(*c >= lo - 1e-6 && *c <= hi + 1e-6);
        }
    }

    #[test]
    fn supervised_training_moves_output_toward_target() {
        let mut rng = SmallRng::seed_from_u64(42);
        let mut net = FeedForwardNet::random(
            &NetworkLayout {
                learning_rate: 0.5,
                ..small_layout()
            },
            &mut rng,
        )
        .expect("net");
        let inputs = [0.5, 0.2, 0.9, 0.1, 0.3, 0.7];
        let before = net.evaluate(&inputs);
        let target = vec![1.0; before.len()];
        for _ in 0..50 {
            net.evaluate(&inputs);
            net.train(TrainingSignal::Supervised { target: &target }, &mut rng);
        }
        let after = net.evaluate(&inputs);
        for (b, a) in before.iter().zip(&after) {
            assert!(a > b, "{a} should exceed {b}");
        }
    }

    #[test]
    fn training_without_evaluation_is_a_no_op() {
        let mut rng = SmallRng::seed_from_u64(43);
        let mut net = FeedForwardNet::random(&small_layout(), &mut rng).expect("net");
        let before = net.parameters();
        net.train(TrainingSignal::Reinforce { advantage: 1.0 }, &mut rng);
        assert_eq!(before, net.parameters());
        net.evaluate(&[1.0; 6]);
        net.train(TrainingSignal::Reinforce { advantage: 1.0 }, &mut rng);
        assert_ne!(before, net.parameters());
    }
}
