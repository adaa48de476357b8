//! One-step error backpropagation.
//!
//! Errors are propagated a single layer back from the outputs: a hidden
//! neuron's error is the weighted sum of its downstream output errors.

use super::activation;
use super::network::Network;
use super::neuron::NeuronId;
use crate::evaluation::Sample;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Learning rate used when the supplied one is outside (0, 0.1]
pub const FALLBACK_LEARNING_RATE: f64 = 0.001;

/// Configuration for gradient training
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub learning_rate: f64,
    pub clamp_min: f64,
    pub clamp_max: f64,
    pub epochs: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            clamp_min: -5.0,
            clamp_max: 5.0,
            epochs: 1,
        }
    }
}

fn effective_learning_rate(lr: f64) -> f64 {
    if lr > 0.0 && lr <= 0.1 {
        lr
    } else {
        log::debug!("Learning rate {} out of range, using {}", lr, FALLBACK_LEARNING_RATE);
        FALLBACK_LEARNING_RATE
    }
}

impl Network {
    /// One forward pass and one update of every non-input neuron
    pub fn train_network(
        &mut self,
        inputs: &HashMap<NeuronId, f64>,
        expected: &HashMap<NeuronId, f64>,
        learning_rate: f64,
        clamp_min: f64,
        clamp_max: f64,
    ) {
        self.train_step(inputs, expected, learning_rate, clamp_min, clamp_max, None);
    }

    /// Like [`Network::train_network`], but only neurons in `trainable` are
    /// updated. Error terms are still computed for every neuron.
    pub fn train_network_targeted(
        &mut self,
        inputs: &HashMap<NeuronId, f64>,
        expected: &HashMap<NeuronId, f64>,
        learning_rate: f64,
        clamp_min: f64,
        clamp_max: f64,
        trainable: &[NeuronId],
    ) {
        let set: HashSet<NeuronId> = trainable.iter().copied().collect();
        self.train_step(inputs, expected, learning_rate, clamp_min, clamp_max, Some(&set));
    }

    /// Per-neuron error terms from the current values and weights
    pub fn error_terms(&self, expected: &HashMap<NeuronId, f64>) -> HashMap<NeuronId, f64> {
        let output_errors: HashMap<NeuronId, f64> = expected
            .iter()
            .filter_map(|(id, target)| self.neurons.get(id).map(|n| (*id, target - n.value)))
            .collect();

        let mut terms = HashMap::with_capacity(self.neurons.len());
        for neuron in self.neurons.values().filter(|n| !n.is_input()) {
            let derivative = activation::derivative(&neuron.activation, neuron.value);
            let term = match output_errors.get(&neuron.id) {
                Some(err) => err * derivative,
                None => {
                    let downstream: f64 = self
                        .downstream_of(neuron.id)
                        .into_iter()
                        .filter_map(|d| output_errors.get(&d).map(|err| err * self.weight(neuron.id, d)))
                        .sum();
                    downstream * derivative
                }
            };
            terms.insert(neuron.id, term);
        }
        terms
    }

    fn train_step(
        &mut self,
        inputs: &HashMap<NeuronId, f64>,
        expected: &HashMap<NeuronId, f64>,
        learning_rate: f64,
        clamp_min: f64,
        clamp_max: f64,
        trainable: Option<&HashSet<NeuronId>>,
    ) {
        let lr = effective_learning_rate(learning_rate);
        let (lo, hi) = if clamp_min > clamp_max {
            (clamp_max, clamp_min)
        } else {
            (clamp_min, clamp_max)
        };

        self.forward(inputs, 1);
        let terms = self.error_terms(expected);

        // Source values before any update
        let values: HashMap<NeuronId, f64> = self.neurons.iter().map(|(id, n)| (*id, n.value)).collect();

        for (id, term) in terms {
            if trainable.map_or(false, |set| !set.contains(&id)) {
                continue;
            }
            let Some(neuron) = self.neurons.get_mut(&id) else {
                continue;
            };

            for conn in &mut neuron.connections {
                let source_value = values.get(&conn.source).copied().unwrap_or(0.0);
                let gradient = term * source_value;
                if gradient.is_finite() {
                    conn.weight = (conn.weight + lr * gradient).clamp(lo, hi);
                }
            }
            if term.is_finite() {
                neuron.bias = (neuron.bias + lr * term).clamp(lo, hi);
            }
        }
    }

    /// Train on labelled samples with one-hot targets over the outputs.
    ///
    /// A non-empty `trainable_neurons` restricts the updates to those
    /// neurons, as in [`Network::train_network_targeted`].
    pub fn train_on_samples(&mut self, samples: &[Sample], config: &TrainingConfig) {
        let trainable: Option<HashSet<NeuronId>> = if self.trainable_neurons.is_empty() {
            None
        } else {
            Some(self.trainable_neurons.iter().copied().collect())
        };
        for epoch in 0..config.epochs {
            for sample in samples {
                let expected = sample.one_hot(&self.output_nodes);
                self.train_step(
                    &sample.inputs,
                    &expected,
                    config.learning_rate,
                    config.clamp_min,
                    config.clamp_max,
                    trainable.as_ref(),
                );
            }
            log::debug!("Training epoch {} done ({} samples)", epoch + 1, samples.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::{Connection, Neuron};

    /// input 0 -> hidden 1 -> output 2, all linear
    fn chain(w_in: f64, w_out: f64) -> Network {
        let mut net = Network::new();
        net.insert_neuron(Neuron::input(0));
        let mut hidden = Neuron::dense(1, "linear", 0.0);
        hidden.connections.push(Connection::new(0, w_in));
        net.insert_neuron(hidden);
        let mut out = Neuron::dense(2, "linear", 0.0);
        out.connections.push(Connection::new(1, w_out));
        net.insert_neuron(out);
        net.input_nodes = vec![0];
        net.output_nodes = vec![2];
        net
    }

    #[test]
    fn test_single_step_updates() {
        let mut net = chain(0.5, 0.5);
        let inputs = HashMap::from([(0, 1.0)]);
        let expected = HashMap::from([(2, 1.0)]);

        // hidden = 0.5, output = 0.25, error = 0.75
        net.train_network(&inputs, &expected, 0.1, -5.0, 5.0);

        let out = &net.neurons[&2];
        assert!((out.connections[0].weight - (0.5 + 0.1 * 0.75 * 0.5)).abs() < 1e-12);
        assert!((out.bias - 0.075).abs() < 1e-12);

        // Hidden error uses the pre-update output weight
        let hidden = &net.neurons[&1];
        assert!((hidden.connections[0].weight - (0.5 + 0.1 * 0.75 * 0.5 * 1.0)).abs() < 1e-12);
        assert!((hidden.bias - 0.1 * 0.375).abs() < 1e-12);
    }

    #[test]
    fn test_learning_rate_fallback() {
        let mut a = chain(0.5, 0.5);
        let mut b = chain(0.5, 0.5);
        let inputs = HashMap::from([(0, 1.0)]);
        let expected = HashMap::from([(2, 1.0)]);

        a.train_network(&inputs, &expected, 5.0, -5.0, 5.0);
        b.train_network(&inputs, &expected, FALLBACK_LEARNING_RATE, -5.0, 5.0);
        assert_eq!(a.neurons, b.neurons);
    }

    #[test]
    fn test_clamped_and_inverted_range() {
        let mut net = chain(0.5, 0.5);
        let inputs = HashMap::from([(0, 1.0)]);
        let expected = HashMap::from([(2, 1000.0)]);
        net.train_network(&inputs, &expected, 0.1, 0.6, -0.6);
        for n in net.neurons.values() {
            assert!(n.bias.abs() <= 0.6);
            assert!(n.connections.iter().all(|c| c.weight.abs() <= 0.6));
        }
    }

    #[test]
    fn test_non_finite_gradient_skipped() {
        let mut net = chain(0.5, 0.5);
        let inputs = HashMap::from([(0, 1.0)]);
        let expected = HashMap::from([(2, f64::NAN)]);
        net.train_network(&inputs, &expected, 0.1, -5.0, 5.0);
        assert_eq!(net.neurons[&2].connections[0].weight, 0.5);
        assert_eq!(net.neurons[&2].bias, 0.0);
        assert!(net.is_valid());
    }

    #[test]
    fn test_targeted_only_updates_trainable() {
        let mut net = chain(0.5, 0.5);
        let inputs = HashMap::from([(0, 1.0)]);
        let expected = HashMap::from([(2, 1.0)]);
        net.train_network_targeted(&inputs, &expected, 0.1, -5.0, 5.0, &[1]);

        assert_eq!(net.neurons[&2].connections[0].weight, 0.5);
        assert_eq!(net.neurons[&2].bias, 0.0);
        assert!(net.neurons[&1].connections[0].weight > 0.5);
    }

    #[test]
    fn test_samples_respect_trainable_neurons() {
        let mut net = chain(0.5, 0.5);
        net.trainable_neurons = vec![2];
        let samples = vec![Sample::new(HashMap::from([(0, 1.0)]), 0)];
        net.train_on_samples(&samples, &TrainingConfig::default());

        assert_eq!(net.neurons[&1].connections[0].weight, 0.5);
        assert_eq!(net.neurons[&1].bias, 0.0);
        assert!(net.neurons[&2].connections[0].weight > 0.5);

        // Empty list: every non-input neuron is trained
        let mut all = chain(0.5, 0.5);
        all.train_on_samples(&samples, &TrainingConfig::default());
        assert!(all.neurons[&1].connections[0].weight > 0.5);
    }

    #[test]
    fn test_training_reduces_error() {
        let mut net = chain(0.2, 0.2);
        let inputs = HashMap::from([(0, 1.0)]);
        let expected = HashMap::from([(2, 1.0)]);

        net.forward(&inputs, 1);
        let before = (1.0 - net.outputs()[&2]).abs();
        for _ in 0..50 {
            net.train_network(&inputs, &expected, 0.1, -5.0, 5.0);
        }
        net.forward(&inputs, 1);
        let after = (1.0 - net.outputs()[&2]).abs();
        assert!(after < before);
    }
}
