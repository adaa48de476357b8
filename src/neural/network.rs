//! Network graph and two-pass forward propagation.

use super::activation::{self, ActivationRegistry};
use super::neuron::{finite_or_zero, Connection, Neuron, NeuronId, NeuronKind, NeuronType, ProcessContext};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Secondary neuron kind kept in its own map.
///
/// Not processed by the forward pass; it shares the ID space with regular
/// neurons and is carried through persistence untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantumNeuron {
    pub id: NeuronId,
    #[serde(default)]
    pub amplitudes: Vec<f64>,
}

/// Graph of typed neurons and weighted connections
#[derive(Clone, Debug)]
pub struct Network {
    /// Lineage identifier
    pub id: u64,
    pub neurons: BTreeMap<NeuronId, Neuron>,
    pub quantum_neurons: BTreeMap<NeuronId, QuantumNeuron>,
    /// Order defines the input vector layout
    pub input_nodes: Vec<NeuronId>,
    /// Order defines class index -> output neuron
    pub output_nodes: Vec<NeuronId>,
    /// Neurons [`Network::train_on_samples`] updates; empty means all
    pub trainable_neurons: Vec<NeuronId>,
    /// Seeds the dropout stream of each forward pass
    pub dropout_seed: u64,
    pub activations: ActivationRegistry,
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

impl Network {
    /// Create an empty network
    pub fn new() -> Self {
        Self {
            id: 0,
            neurons: BTreeMap::new(),
            quantum_neurons: BTreeMap::new(),
            input_nodes: Vec::new(),
            output_nodes: Vec::new(),
            trainable_neurons: Vec::new(),
            dropout_seed: 0,
            activations: ActivationRegistry::default(),
        }
    }

    /// Fully connected feed-forward network.
    ///
    /// `layer_sizes[0]` input neurons get IDs `0..n`; every following layer is
    /// dense and connected to all neurons of the previous one with weights in
    /// [-1, 1) and biases in [-0.05, 0.05). The last layer is the output layer.
    pub fn build_layered<R: Rng + ?Sized>(
        layer_sizes: &[usize],
        hidden_activation: &str,
        output_activation: &str,
        rng: &mut R,
    ) -> Self {
        let mut net = Self::new();
        let mut next_id: NeuronId = 0;

        let Some((&n_inputs, rest)) = layer_sizes.split_first() else {
            return net;
        };

        for _ in 0..n_inputs {
            net.neurons.insert(next_id, Neuron::input(next_id));
            net.input_nodes.push(next_id);
            next_id += 1;
        }

        let mut prev_layer: Vec<NeuronId> = net.input_nodes.clone();
        for (layer_idx, &size) in rest.iter().enumerate() {
            let is_output = layer_idx == rest.len() - 1;
            let act = if is_output { output_activation } else { hidden_activation };

            let mut layer = Vec::with_capacity(size);
            for _ in 0..size {
                let mut neuron = Neuron::dense(next_id, act, rng.gen_range(-0.05..0.05));
                neuron.connections = prev_layer
                    .iter()
                    .map(|&src| Connection::new(src, rng.gen_range(-1.0..1.0)))
                    .collect();
                net.neurons.insert(next_id, neuron);
                layer.push(next_id);
                next_id += 1;
            }

            if is_output {
                net.output_nodes = layer.clone();
            }
            prev_layer = layer;
        }

        net.dropout_seed = rng.gen();
        net
    }

    /// One more than the largest ID in either neuron map, never below 1
    pub fn next_neuron_id(&self) -> NeuronId {
        let max_regular = self.neurons.keys().next_back().copied();
        let max_quantum = self.quantum_neurons.keys().next_back().copied();
        match max_regular.max(max_quantum) {
            Some(max) => max + 1,
            None => 1,
        }
    }

    #[inline]
    pub fn neuron(&self, id: NeuronId) -> Option<&Neuron> {
        self.neurons.get(&id)
    }

    #[inline]
    pub fn neuron_mut(&mut self, id: NeuronId) -> Option<&mut Neuron> {
        self.neurons.get_mut(&id)
    }

    /// Insert (or replace) a neuron under its own ID
    pub fn insert_neuron(&mut self, neuron: Neuron) {
        self.neurons.insert(neuron.id, neuron);
    }

    pub fn neuron_count(&self) -> usize {
        self.neurons.len()
    }

    pub fn neuron_ids(&self) -> Vec<NeuronId> {
        self.neurons.keys().copied().collect()
    }

    pub fn non_input_ids(&self) -> Vec<NeuronId> {
        self.neurons
            .values()
            .filter(|n| !n.is_input())
            .map(|n| n.id)
            .collect()
    }

    #[inline]
    pub fn is_output(&self, id: NeuronId) -> bool {
        self.output_nodes.contains(&id)
    }

    /// Non-input, non-output neurons in ascending ID order
    pub fn hidden_ids(&self) -> Vec<NeuronId> {
        let outputs: HashSet<NeuronId> = self.output_nodes.iter().copied().collect();
        self.neurons
            .values()
            .filter(|n| !n.is_input() && !outputs.contains(&n.id))
            .map(|n| n.id)
            .collect()
    }

    /// True if `target` has an incoming connection from `source`
    pub fn connection_exists(&self, source: NeuronId, target: NeuronId) -> bool {
        self.neurons
            .get(&target)
            .map_or(false, |n| n.has_connection_from(source))
    }

    /// Weight of the `source -> target` edge, 0 if absent
    pub fn weight(&self, source: NeuronId, target: NeuronId) -> f64 {
        self.neurons
            .get(&target)
            .and_then(|n| n.connections.iter().find(|c| c.source == source))
            .map_or(0.0, |c| c.weight)
    }

    /// Neurons holding a connection from `id`
    pub fn downstream_of(&self, id: NeuronId) -> Vec<NeuronId> {
        self.neurons
            .values()
            .filter(|n| n.has_connection_from(id))
            .map(|n| n.id)
            .collect()
    }

    /// Zero value and cell state of every non-input neuron
    pub fn reset_neuron_values(&mut self) {
        for neuron in self.neurons.values_mut() {
            neuron.reset_state();
        }
    }

    /// Assign external inputs; unknown IDs are ignored
    pub fn set_inputs(&mut self, inputs: &HashMap<NeuronId, f64>) {
        for (&id, &value) in inputs {
            if let Some(neuron) = self.neurons.get_mut(&id) {
                neuron.value = value;
            }
        }
    }

    /// Fresh dropout stream for one pass
    pub(crate) fn pass_rng(&self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.dropout_seed)
    }

    /// Values a neuron consumes this step.
    ///
    /// Weighted source values for most types, a missing source contributing
    /// zero. NCA neurons read their neighbourhood's raw values instead.
    pub fn gather_inputs(&self, id: NeuronId) -> Vec<f64> {
        let Some(neuron) = self.neurons.get(&id) else {
            return Vec::new();
        };

        if let NeuronKind::Nca { neighborhood, .. } = &neuron.kind {
            return neighborhood
                .iter()
                .filter_map(|nid| self.neurons.get(nid).map(|n| n.value))
                .collect();
        }

        neuron
            .connections
            .iter()
            .map(|conn| match self.neurons.get(&conn.source) {
                Some(src) => src.value * conn.weight,
                None => {
                    log::debug!("Source neuron {} missing for neuron {}", conn.source, id);
                    0.0
                }
            })
            .collect()
    }

    /// Gather inputs for `id` and run its type-specific update
    pub(crate) fn process_neuron(&mut self, id: NeuronId, timestep: usize, rng: &mut ChaCha8Rng) {
        let inputs = self.gather_inputs(id);
        if let Some(neuron) = self.neurons.get_mut(&id) {
            let mut ctx = ProcessContext {
                activations: &self.activations,
                rng,
            };
            neuron.process(&inputs, timestep, &mut ctx);
        }
    }

    /// Propagate `inputs` for `timesteps` steps.
    ///
    /// Each step processes hidden neurons in ascending ID order, then the
    /// output neurons in `output_nodes` order.
    pub fn forward(&mut self, inputs: &HashMap<NeuronId, f64>, timesteps: usize) {
        self.reset_neuron_values();
        self.set_inputs(inputs);

        let hidden = self.hidden_ids();
        let outputs = self.output_nodes.clone();
        let mut rng = self.pass_rng();

        for t in 0..timesteps {
            for &id in &hidden {
                self.process_neuron(id, t, &mut rng);
            }
            for &id in &outputs {
                self.process_neuron(id, t, &mut rng);
            }
        }
    }

    /// Current value of each output neuron
    pub fn outputs(&self) -> BTreeMap<NeuronId, f64> {
        self.output_nodes
            .iter()
            .filter_map(|id| self.neurons.get(id).map(|n| (*id, n.value)))
            .collect()
    }

    /// Output values in `output_nodes` order, non-finite values as zero
    pub fn output_values(&self) -> Vec<f64> {
        self.output_nodes
            .iter()
            .map(|id| self.neurons.get(id).map_or(0.0, |n| finite_or_zero(n.value)))
            .collect()
    }

    /// Softmax across all output neurons jointly
    pub fn apply_softmax(&mut self) {
        let values = self.output_values();
        let normalized = activation::softmax(&values);
        for (id, value) in self.output_nodes.iter().zip(normalized) {
            if let Some(neuron) = self.neurons.get_mut(id) {
                neuron.value = value;
            }
        }
    }

    /// True when the first output neuron's activation is `"softmax"`
    pub fn has_softmax_outputs(&self) -> bool {
        self.output_nodes
            .first()
            .and_then(|id| self.neurons.get(id))
            .map_or(false, |n| n.activation == "softmax")
    }

    /// [`Network::apply_softmax`] if the outputs are softmax outputs
    pub fn normalize_outputs(&mut self) {
        if self.has_softmax_outputs() {
            self.apply_softmax();
        }
    }

    /// Clamp values and LSTM cell states, non-finite values become 0
    pub fn clamp_neuron_values(&mut self, min: f64, max: f64) {
        let (min, max) = ordered_range(min, max);
        for neuron in self.neurons.values_mut() {
            neuron.value = clamp_finite(neuron.value, min, max);
            if let Some(cell) = neuron.cell_state() {
                neuron.set_cell_state(clamp_finite(cell, min, max));
            }
        }
    }

    pub fn clamp_biases(&mut self, min: f64, max: f64) {
        let (min, max) = ordered_range(min, max);
        for neuron in self.neurons.values_mut() {
            neuron.bias = clamp_finite(neuron.bias, min, max);
        }
    }

    pub fn clamp_weights(&mut self, min: f64, max: f64) {
        let (min, max) = ordered_range(min, max);
        for neuron in self.neurons.values_mut() {
            for conn in &mut neuron.connections {
                conn.weight = clamp_finite(conn.weight, min, max);
            }
        }
    }

    /// True if every output is reachable from some input
    pub fn validate_connections(&self) -> bool {
        // Forward adjacency: source -> targets
        let mut forward: HashMap<NeuronId, Vec<NeuronId>> = HashMap::new();
        for neuron in self.neurons.values() {
            for conn in &neuron.connections {
                forward.entry(conn.source).or_default().push(neuron.id);
            }
        }

        let mut visited: HashSet<NeuronId> = HashSet::new();
        let mut stack: Vec<NeuronId> = self.input_nodes.clone();
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            if let Some(targets) = forward.get(&id) {
                stack.extend(targets.iter().copied().filter(|t| !visited.contains(t)));
            }
        }

        for &out in &self.output_nodes {
            if !visited.contains(&out) {
                log::warn!("Output neuron {} is not connected to any input", out);
                return false;
            }
        }
        true
    }

    /// Check that no weight, bias or value is NaN/Inf
    pub fn is_valid(&self) -> bool {
        self.neurons.values().all(|n| {
            n.bias.is_finite()
                && n.value.is_finite()
                && n.connections.iter().all(|c| c.weight.is_finite())
        })
    }

    pub fn connection_count(&self) -> usize {
        self.neurons.values().map(|n| n.connections.len()).sum()
    }

    /// Weights + biases of non-input neurons
    pub fn parameter_count(&self) -> usize {
        self.neurons
            .values()
            .filter(|n| !n.is_input())
            .map(|n| n.connections.len() + 1)
            .sum()
    }

    pub fn type_counts(&self) -> BTreeMap<NeuronType, usize> {
        let mut counts = BTreeMap::new();
        for neuron in self.neurons.values() {
            *counts.entry(neuron.neuron_type()).or_insert(0) += 1;
        }
        counts
    }
}

fn ordered_range(min: f64, max: f64) -> (f64, f64) {
    if min > max {
        log::warn!("Clamp range inverted ({} > {}), swapping", min, max);
        (max, min)
    } else {
        (min, max)
    }
}

fn clamp_finite(v: f64, min: f64, max: f64) -> f64 {
    if v.is_finite() {
        v.clamp(min, max)
    } else {
        0.0
    }
}
