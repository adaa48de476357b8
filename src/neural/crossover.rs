//! Genetic crossover between networks.

use super::network::Network;
use super::neuron::{Neuron, NeuronId};
use rand::Rng;

/// Strategy for merging shared connections
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CrossoverStrategy {
    /// Take each shared weight from either parent at random
    #[default]
    Uniform,
    /// Average shared weights and biases of both parents
    Average,
}

impl Network {
    /// Crossover with another network
    pub fn crossover<R: Rng + ?Sized>(&self, other: &Self, rng: &mut R) -> Self {
        self.crossover_with_strategy(other, CrossoverStrategy::default(), rng)
    }

    /// Crossover with specified strategy.
    ///
    /// The offspring holds the union of both parents' neurons. For an ID
    /// present in both, the neuron (type and state) is taken from a random
    /// parent, then shared connections and the activation are merged.
    /// Input and output layouts follow `self`.
    pub fn crossover_with_strategy<R: Rng + ?Sized>(
        &self,
        other: &Self,
        strategy: CrossoverStrategy,
        rng: &mut R,
    ) -> Self {
        let mut child = Network {
            id: self.id.max(other.id) + 1,
            input_nodes: self.input_nodes.clone(),
            output_nodes: self.output_nodes.clone(),
            trainable_neurons: self.trainable_neurons.clone(),
            dropout_seed: self.dropout_seed,
            activations: self.activations.clone(),
            ..Network::new()
        };

        for (id, a) in &self.neurons {
            let neuron = match other.neurons.get(id) {
                Some(b) => merge_neurons(a, b, strategy, rng),
                None => a.clone(),
            };
            child.neurons.insert(*id, neuron);
        }
        for (id, b) in &other.neurons {
            child.neurons.entry(*id).or_insert_with(|| b.clone());
        }

        child.quantum_neurons = self.quantum_neurons.clone();
        for (id, q) in &other.quantum_neurons {
            if !child.neurons.contains_key(id) {
                child.quantum_neurons.entry(*id).or_insert_with(|| q.clone());
            }
        }

        child.ensure_output_neurons();
        log::debug!(
            "Crossover {} x {} -> {} neurons",
            self.id,
            other.id,
            child.neuron_count()
        );
        child
    }

    /// Insert a plain dense/linear neuron for every missing output ID
    pub fn ensure_output_neurons(&mut self) {
        let missing: Vec<NeuronId> = self
            .output_nodes
            .iter()
            .copied()
            .filter(|id| !self.neurons.contains_key(id))
            .collect();
        for id in missing {
            log::debug!("Adding missing output neuron {}", id);
            self.insert_neuron(Neuron::dense(id, "linear", 0.0));
        }
    }
}

fn merge_neurons<R: Rng + ?Sized>(
    a: &Neuron,
    b: &Neuron,
    strategy: CrossoverStrategy,
    rng: &mut R,
) -> Neuron {
    let (primary, secondary) = if rng.gen_bool(0.5) { (a, b) } else { (b, a) };
    let mut child = primary.clone();

    // Inputs stay untouched
    if child.is_input() {
        return child;
    }

    for conn in &mut child.connections {
        let Some(other) = secondary.connections.iter().find(|c| c.source == conn.source) else {
            continue;
        };
        conn.weight = match strategy {
            CrossoverStrategy::Uniform if rng.gen_bool(0.5) => other.weight,
            CrossoverStrategy::Uniform => conn.weight,
            CrossoverStrategy::Average => (conn.weight + other.weight) / 2.0,
        };
    }

    if strategy == CrossoverStrategy::Average {
        child.bias = (primary.bias + secondary.bias) / 2.0;
    }

    child.activation = if rng.gen_bool(0.5) {
        a.activation.clone()
    } else {
        b.activation.clone()
    };
    child
}
