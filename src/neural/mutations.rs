//! Structural and parametric network mutations.
//!
//! Every operator is a no-op when the network has no eligible neuron or
//! connection. Input neurons are never targeted.

use super::activation::MUTABLE_ACTIVATIONS;
use super::network::Network;
use super::neuron::{gaussian, Connection, KernelLayout, Neuron, NeuronId, NeuronKind, NeuronType};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Std-dev of weights and biases given to new neurons and edges
pub const INIT_SIGMA: f64 = 0.1;

/// Std-dev of single-neuron weight/bias perturbations
pub const ADJUST_SIGMA: f64 = 0.05;

/// What happens to existing output connections when a new neuron is wired in
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewirePolicy {
    /// Keep every existing output connection, append the new one
    #[default]
    Preserve,
    /// Outputs keep only connections from `is_new` neurons
    NewOnly,
}

/// Configuration for mutation operations
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationConfig {
    /// Minimum incoming connections of a new neuron
    pub min_connections: usize,
    /// Maximum incoming connections of a new neuron
    pub max_connections: usize,
    pub rewire_policy: RewirePolicy,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 5,
            rewire_policy: RewirePolicy::Preserve,
        }
    }
}

/// Connection count in `[min, max]`, at least one, at most `available`
fn connection_count<R: Rng + ?Sized>(min: usize, max: usize, available: usize, rng: &mut R) -> usize {
    let min = min.max(1);
    let max = max.max(min);
    rng.gen_range(min..=max).min(available)
}

impl Network {
    /// Build a neuron of `neuron_type` fed by `sources`
    fn spawn_neuron<R: Rng + ?Sized>(
        &self,
        neuron_type: NeuronType,
        activation: &str,
        sources: &[NeuronId],
        layout: KernelLayout,
        rng: &mut R,
    ) -> Neuron {
        let id = self.next_neuron_id();
        let bias = gaussian(rng, INIT_SIGMA);
        let mut neuron = Neuron::new(id, NeuronKind::Dense, activation, bias);
        for &src in sources {
            neuron.connections.push(Connection::new(src, gaussian(rng, INIT_SIGMA)));
        }
        neuron.kind = NeuronKind::fresh(neuron_type, sources, layout, rng);
        neuron
    }

    /// Add a neuron fed by random existing neurons.
    ///
    /// Unspecified type or activation are drawn uniformly. The connection
    /// count is drawn from `[min_connections, max_connections]` and capped by
    /// the number of existing neurons; an empty network gets an unconnected
    /// neuron.
    pub fn add_random_neuron<R: Rng + ?Sized>(
        &mut self,
        neuron_type: Option<NeuronType>,
        activation: Option<&str>,
        min_connections: usize,
        max_connections: usize,
        rng: &mut R,
    ) -> NeuronId {
        let neuron_type = neuron_type.unwrap_or_else(|| random_type(rng));
        let activation = activation.map_or_else(|| random_activation(rng), str::to_string);

        let mut candidates = self.neuron_ids();
        candidates.shuffle(rng);
        let count = if candidates.is_empty() {
            0
        } else {
            connection_count(min_connections, max_connections, candidates.len(), rng)
        };
        candidates.truncate(count);

        let neuron = self.spawn_neuron(neuron_type, &activation, &candidates, KernelLayout::Pairs, rng);
        let id = neuron.id;
        log::debug!(
            "Added {} neuron {} ({}) with {} connections",
            neuron_type,
            id,
            activation,
            candidates.len()
        );
        self.insert_neuron(neuron);
        id
    }

    /// Add an `is_new` neuron fed by pre-output neurons and wire it to every
    /// output according to `policy`.
    ///
    /// Returns `None` when no neuron feeds an output.
    pub fn add_neuron_from_pre_outputs<R: Rng + ?Sized>(
        &mut self,
        neuron_type: Option<NeuronType>,
        activation: Option<&str>,
        min_connections: usize,
        max_connections: usize,
        policy: RewirePolicy,
        rng: &mut R,
    ) -> Option<NeuronId> {
        let neuron_type = neuron_type.unwrap_or_else(|| random_type(rng));
        let activation = activation.map_or_else(|| random_activation(rng), str::to_string);

        let mut candidates: Vec<NeuronId> = self.pre_output_neurons().into_iter().collect();
        if candidates.is_empty() {
            log::debug!("No pre-output neurons, nothing to grow from");
            return None;
        }
        candidates.shuffle(rng);
        let count = connection_count(min_connections, max_connections, candidates.len(), rng);
        candidates.truncate(count);

        let mut neuron =
            self.spawn_neuron(neuron_type, &activation, &candidates, KernelLayout::Squares, rng);
        neuron.is_new = true;
        let id = neuron.id;
        self.insert_neuron(neuron);

        self.rewire_outputs(id, policy, rng);
        Some(id)
    }

    /// Connect `new_id` to every output that lacks an edge from it
    pub fn add_new_neuron_to_output<R: Rng + ?Sized>(&mut self, new_id: NeuronId, rng: &mut R) {
        let outputs = self.output_nodes.clone();
        for out in outputs {
            if self.connection_exists(new_id, out) {
                continue;
            }
            if let Some(neuron) = self.neurons.get_mut(&out) {
                let weight = gaussian(rng, INIT_SIGMA);
                neuron.push_connection(new_id, weight, rng);
                log::debug!("Connected new neuron {} to output {} (w={:.4})", new_id, out, weight);
            }
        }
    }

    /// Wire `new_id` into the outputs under `policy`
    pub fn rewire_outputs<R: Rng + ?Sized>(&mut self, new_id: NeuronId, policy: RewirePolicy, rng: &mut R) {
        if policy == RewirePolicy::NewOnly {
            let keep: Vec<NeuronId> = self
                .neurons
                .values()
                .filter(|n| n.is_new)
                .map(|n| n.id)
                .collect();
            let outputs = self.output_nodes.clone();
            for out in outputs {
                if let Some(neuron) = self.neurons.get_mut(&out) {
                    // Walk backwards so removal indices stay valid
                    for idx in (0..neuron.connections.len()).rev() {
                        if !keep.contains(&neuron.connections[idx].source) {
                            neuron.remove_connection_at(idx);
                        }
                    }
                }
            }
        }
        self.add_new_neuron_to_output(new_id, rng);
    }

    /// Add one edge between a random unconnected `(source, target)` pair
    pub fn add_connection<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<(NeuronId, NeuronId)> {
        let mut ids = self.neuron_ids();
        if ids.len() < 2 {
            return None;
        }
        ids.shuffle(rng);

        let pair = ids.iter().find_map(|&source| {
            ids.iter()
                .find(|&&target| {
                    target != source
                        && self.neurons.get(&target).map_or(false, |n| !n.is_input())
                        && !self.connection_exists(source, target)
                })
                .map(|&target| (source, target))
        })?;

        let weight = gaussian(rng, INIT_SIGMA);
        if let Some(target) = self.neurons.get_mut(&pair.1) {
            target.push_connection(pair.0, weight, rng);
        }
        log::debug!("Added connection {} -> {} (w={:.4})", pair.0, pair.1, weight);
        Some(pair)
    }

    /// Remove one random edge from a random neuron that has any
    pub fn remove_connection<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<(NeuronId, NeuronId)> {
        let candidates: Vec<NeuronId> = self
            .neurons
            .values()
            .filter(|n| !n.is_input() && !n.connections.is_empty())
            .map(|n| n.id)
            .collect();
        let &target = candidates.choose(rng)?;
        let neuron = self.neurons.get_mut(&target)?;
        let index = rng.gen_range(0..neuron.connections.len());
        let removed = neuron.remove_connection_at(index)?;
        log::debug!("Removed connection {} -> {}", removed.source, target);
        Some((removed.source, target))
    }

    fn random_non_input<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<NeuronId> {
        self.non_input_ids().choose(rng).copied()
    }

    /// Perturb every incoming weight of one random neuron by N(0, 0.05)
    pub fn adjust_weights<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let candidates: Vec<NeuronId> = self
            .neurons
            .values()
            .filter(|n| !n.is_input() && !n.connections.is_empty())
            .map(|n| n.id)
            .collect();
        let Some(&id) = candidates.choose(rng) else {
            return;
        };
        if let Some(neuron) = self.neurons.get_mut(&id) {
            for conn in &mut neuron.connections {
                conn.weight += gaussian(rng, ADJUST_SIGMA);
            }
        }
    }

    /// Perturb the bias of one random neuron by N(0, 0.05)
    pub fn adjust_biases<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let Some(id) = self.random_non_input(rng) else {
            return;
        };
        if let Some(neuron) = self.neurons.get_mut(&id) {
            neuron.bias += gaussian(rng, ADJUST_SIGMA);
        }
    }

    /// Shift every weight by `delta`
    pub fn adjust_all_weights(&mut self, delta: f64) {
        for neuron in self.neurons.values_mut().filter(|n| !n.is_input()) {
            for conn in &mut neuron.connections {
                conn.weight += delta;
            }
        }
    }

    /// Shift every non-input bias by `delta`
    pub fn adjust_all_biases(&mut self, delta: f64) {
        for neuron in self.neurons.values_mut().filter(|n| !n.is_input()) {
            neuron.bias += delta;
        }
    }

    /// Give one random neuron a different activation
    pub fn change_activation_function<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<NeuronId> {
        let id = self.random_non_input(rng)?;
        let neuron = self.neurons.get_mut(&id)?;
        let choices: Vec<&str> = MUTABLE_ACTIVATIONS
            .iter()
            .copied()
            .filter(|a| *a != neuron.activation)
            .collect();
        let &activation = choices.choose(rng)?;
        log::debug!("Neuron {}: activation {} -> {}", id, neuron.activation, activation);
        neuron.activation = activation.to_string();
        Some(id)
    }

    /// Switch neuron `id` to a random different type
    pub fn change_neuron_type<R: Rng + ?Sized>(&mut self, id: NeuronId, rng: &mut R) -> bool {
        let Some(current) = self.neurons.get(&id).map(Neuron::neuron_type) else {
            return false;
        };
        let choices: Vec<NeuronType> = NeuronType::MUTABLE
            .iter()
            .copied()
            .filter(|t| *t != current)
            .collect();
        match choices.choose(rng) {
            Some(&new_type) => self.change_neuron_type_to(id, new_type, rng),
            None => false,
        }
    }

    /// Switch neuron `id` to `new_type`, reinitialising its type state.
    ///
    /// Returns false for missing or input neurons and for an input target type.
    pub fn change_neuron_type_to<R: Rng + ?Sized>(
        &mut self,
        id: NeuronId,
        new_type: NeuronType,
        rng: &mut R,
    ) -> bool {
        if new_type == NeuronType::Input {
            return false;
        }
        let Some(neuron) = self.neurons.get_mut(&id) else {
            return false;
        };
        if neuron.is_input() {
            return false;
        }

        let sources: Vec<NeuronId> = neuron.connections.iter().map(|c| c.source).collect();
        log::debug!("Neuron {}: type {} -> {}", id, neuron.neuron_type(), new_type);
        neuron.kind = NeuronKind::fresh(new_type, &sources, KernelLayout::Pairs, rng);
        neuron.value = 0.0;
        true
    }
}

fn random_type<R: Rng + ?Sized>(rng: &mut R) -> NeuronType {
    NeuronType::MUTABLE[rng.gen_range(0..NeuronType::MUTABLE.len())]
}

fn random_activation<R: Rng + ?Sized>(rng: &mut R) -> String {
    MUTABLE_ACTIVATIONS[rng.gen_range(0..MUTABLE_ACTIVATIONS.len())].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::neuron::GateWeights;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::HashSet;

    fn layered(seed: u64) -> (Network, ChaCha8Rng) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let net = Network::build_layered(&[3, 4, 2], "relu", "linear", &mut rng);
        (net, rng)
    }

    #[test]
    fn test_add_connection_two_neurons() {
        let mut net = Network::new();
        net.insert_neuron(Neuron::dense(0, "linear", 0.0));
        net.insert_neuron(Neuron::dense(1, "linear", 0.0));
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let (src, dst) = net.add_connection(&mut rng).unwrap();
        assert_ne!(src, dst);
        assert_eq!(net.connection_count(), 1);
        assert!(net.connection_exists(src, dst));
    }

    #[test]
    fn test_add_connection_saturated_is_noop() {
        let mut net = Network::new();
        net.insert_neuron(Neuron::input(0));
        let mut out = Neuron::dense(1, "linear", 0.0);
        out.connections.push(Connection::new(0, 1.0));
        net.insert_neuron(out);
        let mut rng = ChaCha8Rng::seed_from_u64(2);

        // 1 -> 0 would target an input
        assert!(net.add_connection(&mut rng).is_none());
        assert!(Network::new().add_connection(&mut rng).is_none());
    }

    #[test]
    fn test_add_random_neuron_ids_unique() {
        let (mut net, mut rng) = layered(3);
        let mut seen: HashSet<NeuronId> = net.neuron_ids().into_iter().collect();
        for _ in 0..20 {
            let before = net.next_neuron_id();
            let id = net.add_random_neuron(None, None, 1, 4, &mut rng);
            assert_eq!(id, before);
            assert!(seen.insert(id));
            let n = &net.neurons[&id];
            assert!((1..=4).contains(&n.connections.len()));
            if let NeuronKind::Lstm { gates, .. } = &n.kind {
                assert_eq!(gates.len(), n.connections.len());
            }
        }
    }

    #[test]
    fn test_add_random_neuron_empty_network() {
        let mut net = Network::new();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let id = net.add_random_neuron(Some(NeuronType::Dense), Some("relu"), 2, 3, &mut rng);
        assert_eq!(id, 1);
        assert!(net.neurons[&1].connections.is_empty());
    }

    #[test]
    fn test_pre_output_neuron_preserve() {
        let (mut net, mut rng) = layered(5);
        let before = net.connection_count();
        let pre = net.pre_output_neurons();

        let id = net
            .add_neuron_from_pre_outputs(Some(NeuronType::Cnn), None, 1, 3, RewirePolicy::Preserve, &mut rng)
            .unwrap();

        let n = &net.neurons[&id];
        assert!(n.is_new);
        assert!(n.connections.iter().all(|c| pre.contains(&c.source)));
        match &n.kind {
            NeuronKind::Cnn { kernels } => assert!(kernels.iter().all(|k| k.len() == 4)),
            other => panic!("unexpected {:?}", other),
        }
        for out in &net.output_nodes {
            assert!(net.connection_exists(id, *out));
        }
        assert_eq!(net.connection_count(), before + n.connections.len() + 2);
    }

    #[test]
    fn test_pre_output_neuron_new_only() {
        let (mut net, mut rng) = layered(6);
        let id = net
            .add_neuron_from_pre_outputs(None, None, 1, 2, RewirePolicy::NewOnly, &mut rng)
            .unwrap();
        for out in &net.output_nodes {
            let conns = &net.neurons[out].connections;
            assert_eq!(conns.len(), 1);
            assert_eq!(conns[0].source, id);
        }
    }

    #[test]
    fn test_pre_output_requires_feeding_neurons() {
        let mut net = Network::new();
        net.insert_neuron(Neuron::dense(0, "linear", 0.0));
        net.output_nodes.push(0);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        assert!(net
            .add_neuron_from_pre_outputs(None, None, 1, 2, RewirePolicy::Preserve, &mut rng)
            .is_none());
    }

    #[test]
    fn test_lstm_output_gates_follow_new_edge() {
        let (mut net, mut rng) = layered(8);
        let out = net.output_nodes[0];
        let sources: Vec<NeuronId> = net.neurons[&out].connections.iter().map(|c| c.source).collect();
        if let Some(n) = net.neuron_mut(out) {
            n.kind = NeuronKind::Lstm {
                cell_state: 0.0,
                gates: GateWeights::random(sources.len(), &mut rng),
            };
        }
        let id = net.add_random_neuron(Some(NeuronType::Dense), None, 1, 1, &mut rng);
        net.add_new_neuron_to_output(id, &mut rng);

        match &net.neurons[&out].kind {
            NeuronKind::Lstm { gates, .. } => assert_eq!(gates.len(), sources.len() + 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_remove_connection() {
        let (mut net, mut rng) = layered(9);
        let before = net.connection_count();
        let (src, dst) = net.remove_connection(&mut rng).unwrap();
        assert_eq!(net.connection_count(), before - 1);
        assert!(!net.connection_exists(src, dst));
    }

    #[test]
    fn test_adjust_all() {
        let (mut net, _) = layered(10);
        let reference = net.clone();
        net.adjust_all_weights(0.5);
        net.adjust_all_biases(-0.25);
        for (id, n) in &net.neurons {
            let r = &reference.neurons[id];
            if n.is_input() {
                assert_eq!(n.bias, r.bias);
                continue;
            }
            assert!((n.bias - (r.bias - 0.25)).abs() < 1e-12);
            for (c, rc) in n.connections.iter().zip(&r.connections) {
                assert!((c.weight - (rc.weight + 0.5)).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_adjust_single_neuron() {
        let (mut net, mut rng) = layered(11);
        let reference = net.clone();
        net.adjust_weights(&mut rng);
        net.adjust_biases(&mut rng);

        let changed = net
            .neurons
            .iter()
            .filter(|(id, n)| *n != &reference.neurons[*id])
            .count();
        assert!((1..=2).contains(&changed));
        for id in &net.input_nodes {
            assert_eq!(net.neurons[id], reference.neurons[id]);
        }
    }

    #[test]
    fn test_change_activation_and_type() {
        let (mut net, mut rng) = layered(12);
        let reference = net.clone();

        let id = net.change_activation_function(&mut rng).unwrap();
        assert_ne!(net.neurons[&id].activation, reference.neurons[&id].activation);

        let target = net.output_nodes[0];
        assert!(net.change_neuron_type(target, &mut rng));
        assert_ne!(net.neurons[&target].neuron_type(), NeuronType::Dense);

        assert!(net.change_neuron_type_to(target, NeuronType::Lstm, &mut rng));
        match &net.neurons[&target].kind {
            NeuronKind::Lstm { gates, cell_state } => {
                assert_eq!(gates.len(), net.neurons[&target].connections.len());
                assert_eq!(*cell_state, 0.0);
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(!net.change_neuron_type(0, &mut rng));
        assert!(!net.change_neuron_type_to(target, NeuronType::Input, &mut rng));
        assert!(!net.change_neuron_type(999, &mut rng));
    }
}
