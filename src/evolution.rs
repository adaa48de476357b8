//! Growth and selection.
//!
//! A growth run hill-climbs network structure: each iteration copies the
//! best network, wires a batch of new neurons between the pre-output layer
//! and the outputs, scores the copy against cached pre-output checkpoints
//! and keeps it only if the composite improvement is positive.

use crate::checkpoint::CheckpointStore;
use crate::evaluation::Metrics;
use crate::neural::{gaussian, MutationConfig, Network, NeuronId, NeuronType};
use crate::parallel::WorkerPool;
use crate::stats::{GrowthHistory, GrowthRecord};
use ndarray::Array1;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Weights of the composite improvement score
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImprovementWeights {
    pub exact: f64,
    pub closeness: f64,
    pub approx: f64,
}

impl Default for ImprovementWeights {
    fn default() -> Self {
        Self {
            exact: 0.3,
            closeness: 0.4,
            approx: 0.3,
        }
    }
}

/// Weighted sum of the per-metric deltas, each scaled from percent to [0, 1]
pub fn compute_total_improvement(current: &Metrics, candidate: &Metrics, weights: &ImprovementWeights) -> f64 {
    let exact = (candidate.exact_accuracy - current.exact_accuracy) / 100.0;
    let closeness = (candidate.closeness_quality() - current.closeness_quality()) / 100.0;
    let approx = (candidate.approx_score - current.approx_score) / 100.0;
    weights.exact * exact + weights.closeness * closeness + weights.approx * approx
}

/// True when no metric of `candidate` is below `current`
pub fn no_metric_regressed(current: &Metrics, candidate: &Metrics) -> bool {
    candidate.exact_accuracy >= current.exact_accuracy
        && candidate.closeness_quality() >= current.closeness_quality()
        && candidate.approx_score >= current.approx_score
}

/// Outcome of a growth or optimization run
#[derive(Clone, Debug)]
pub struct ModelResult {
    pub network: Network,
    pub metrics: Metrics,
    /// Neurons added across accepted steps
    pub neurons_added: usize,
    pub history: GrowthHistory,
}

/// Labelled checkpoints a candidate is scored against
#[derive(Clone, Copy, Debug)]
pub struct EvaluationSet<'a> {
    pub store: &'a CheckpointStore,
    pub labels: &'a [usize],
}

impl<'a> EvaluationSet<'a> {
    pub fn new(store: &'a CheckpointStore, labels: &'a [usize]) -> Self {
        Self { store, labels }
    }

    pub fn evaluate(&self, network: &Network, pool: Option<&WorkerPool>) -> Metrics {
        match pool {
            Some(pool) => network.evaluate_with_checkpoints_parallel(self.store, self.labels, pool),
            None => network.evaluate_with_checkpoints(self.store, self.labels),
        }
    }
}

/// Configuration for growth runs
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrowthConfig {
    pub max_iterations: usize,
    pub max_consecutive_failures: usize,
    pub min_neurons_per_iteration: usize,
    pub max_neurons_per_iteration: usize,
    /// Type of grown neurons, random if unset
    pub neuron_type: Option<NeuronType>,
    /// Activation of grown neurons, random if unset
    pub activation: Option<String>,
    pub weights: ImprovementWeights,
    /// Also reject candidates that lower any single metric
    pub strict_monotonic: bool,
    /// Independent runs in [`Network::grow_population`]
    pub sandboxes: usize,
    pub tournament_size: usize,
}

impl Default for GrowthConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            max_consecutive_failures: 10,
            min_neurons_per_iteration: 5,
            max_neurons_per_iteration: 14,
            neuron_type: Some(NeuronType::Dense),
            activation: None,
            weights: ImprovementWeights::default(),
            strict_monotonic: true,
            sandboxes: 4,
            tournament_size: 3,
        }
    }
}

impl GrowthConfig {
    fn neurons_per_iteration<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let min = self.min_neurons_per_iteration;
        let max = self.max_neurons_per_iteration.max(min);
        rng.gen_range(min..=max)
    }

    fn accepts(&self, best: &Metrics, candidate: &Metrics, improvement: f64) -> bool {
        improvement > 0.0 && (!self.strict_monotonic || no_metric_regressed(best, candidate))
    }
}

/// Configuration for the perturbation search
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerturbationConfig {
    pub iterations: usize,
    pub perturbations: usize,
    pub sigma: f64,
}

impl Default for PerturbationConfig {
    fn default() -> Self {
        Self {
            iterations: 20,
            perturbations: 8,
            sigma: 0.05,
        }
    }
}

/// Pick the result with the highest improvement over `baseline` among a
/// random subset of `size` results. Ties go to the first one drawn.
pub fn tournament_selection<'a, R: Rng + ?Sized>(
    results: &'a [ModelResult],
    baseline: &Metrics,
    size: usize,
    weights: &ImprovementWeights,
    rng: &mut R,
) -> Option<&'a ModelResult> {
    tournament_index(results, baseline, size, weights, rng).map(|i| &results[i])
}

fn tournament_index<R: Rng + ?Sized>(
    results: &[ModelResult],
    baseline: &Metrics,
    size: usize,
    weights: &ImprovementWeights,
    rng: &mut R,
) -> Option<usize> {
    if results.is_empty() {
        return None;
    }
    let size = size.clamp(1, results.len());

    let mut best: Option<(usize, f64)> = None;
    for i in index::sample(rng, results.len(), size).into_iter() {
        let improvement = compute_total_improvement(baseline, &results[i].metrics, weights);
        match best {
            Some((_, b)) if improvement <= b => {}
            _ => best = Some((i, improvement)),
        }
    }
    best.map(|(i, _)| i)
}

impl Network {
    /// Hill-climb by adding neurons from the pre-output layer.
    ///
    /// Stops after `max_iterations` iterations or `max_consecutive_failures`
    /// rejected candidates in a row, and always returns the best network.
    pub fn grow<R: Rng + ?Sized>(
        &self,
        data: &EvaluationSet<'_>,
        config: &GrowthConfig,
        mutation: &MutationConfig,
        pool: Option<&WorkerPool>,
        sandbox: usize,
        rng: &mut R,
    ) -> ModelResult {
        let mut best = self.clone();
        let mut best_metrics = data.evaluate(&best, pool);
        let mut history = GrowthHistory::new(best_metrics);
        let mut consecutive_failures = 0;
        let mut iterations = 0;
        let mut neurons_added = 0;

        while consecutive_failures < config.max_consecutive_failures && iterations < config.max_iterations {
            iterations += 1;
            let mut candidate = best.clone();

            let mut added = 0;
            for _ in 0..config.neurons_per_iteration(rng) {
                let grown = candidate.add_neuron_from_pre_outputs(
                    config.neuron_type,
                    config.activation.as_deref(),
                    mutation.min_connections,
                    mutation.max_connections,
                    mutation.rewire_policy,
                    rng,
                );
                if grown.is_some() {
                    added += 1;
                }
            }

            let metrics = data.evaluate(&candidate, pool);
            let improvement = compute_total_improvement(&best_metrics, &metrics, &config.weights);
            let accepted = added > 0 && config.accepts(&best_metrics, &metrics, improvement);
            log::debug!(
                "Sandbox {}, iter {}: eA={:.4}, cQ={:.4}, aS={:.4}, neurons={}",
                sandbox,
                iterations,
                metrics.exact_accuracy,
                metrics.closeness_quality(),
                metrics.approx_score,
                neurons_added + added
            );

            history.record(GrowthRecord {
                iteration: iterations,
                metrics,
                improvement,
                accepted,
                neurons_added: added,
                neuron_count: candidate.neuron_count(),
            });

            if accepted {
                neurons_added += added;
                log::info!(
                    "Sandbox {}: improvement {:.6} at iter {}: eA={:.4}, cQ={:.4}, aS={:.4}, neurons={}",
                    sandbox,
                    improvement,
                    iterations,
                    metrics.exact_accuracy,
                    metrics.closeness_quality(),
                    metrics.approx_score,
                    neurons_added
                );
                best = candidate;
                best_metrics = metrics;
                consecutive_failures = 0;
            } else {
                consecutive_failures += 1;
            }
        }

        log::info!(
            "Sandbox {}: exited after {} iterations, {} consecutive failures, {}",
            sandbox,
            iterations,
            consecutive_failures,
            best_metrics
        );

        ModelResult {
            network: best,
            metrics: best_metrics,
            neurons_added,
            history,
        }
    }

    /// Run `config.sandboxes` independent growth runs, sandbox `i` seeded
    /// with `base_seed + i`, and pick one by tournament against this
    /// network's own metrics
    pub fn grow_population<R: Rng + ?Sized>(
        &self,
        data: &EvaluationSet<'_>,
        config: &GrowthConfig,
        mutation: &MutationConfig,
        pool: Option<&WorkerPool>,
        base_seed: u64,
        rng: &mut R,
    ) -> Option<ModelResult> {
        let baseline = data.evaluate(self, pool);
        let sandboxes = config.sandboxes.max(1);

        let run = |i: usize| {
            let mut sandbox_rng = ChaCha8Rng::seed_from_u64(base_seed.wrapping_add(i as u64));
            self.grow(data, config, mutation, None, i, &mut sandbox_rng)
        };
        let mut results: Vec<ModelResult> = match pool {
            Some(pool) => pool.install(|| (0..sandboxes).into_par_iter().map(run).collect()),
            None => (0..sandboxes).map(run).collect(),
        };

        let winner = tournament_index(&results, &baseline, config.tournament_size, &config.weights, rng)?;
        log::info!(
            "Tournament winner: sandbox {} ({}, +{} neurons)",
            winner,
            results[winner].metrics,
            results[winner].neurons_added
        );
        Some(results.swap_remove(winner))
    }

    /// Ids of the outputs `id` feeds, in output order
    fn fed_outputs(&self, id: NeuronId) -> Vec<NeuronId> {
        self.output_nodes
            .iter()
            .copied()
            .filter(|&out| out != id && self.connection_exists(id, out))
            .collect()
    }

    /// Incoming weights, then bias, then the weights of `id`'s edges into
    /// the outputs
    pub fn neuron_parameters(&self, id: NeuronId) -> Option<Array1<f64>> {
        let neuron = self.neurons.get(&id).filter(|n| !n.is_input())?;
        let mut params: Vec<f64> = neuron.connections.iter().map(|c| c.weight).collect();
        params.push(neuron.bias);
        params.extend(self.fed_outputs(id).into_iter().map(|out| self.weight(id, out)));
        Some(Array1::from(params))
    }

    /// Inverse of [`Network::neuron_parameters`]; false on a length mismatch
    pub fn set_neuron_parameters(&mut self, id: NeuronId, params: &Array1<f64>) -> bool {
        let outputs = self.fed_outputs(id);
        let Some(neuron) = self.neurons.get_mut(&id).filter(|n| !n.is_input()) else {
            return false;
        };
        let incoming = neuron.connections.len();
        if params.len() != incoming + 1 + outputs.len() {
            return false;
        }

        for (conn, &w) in neuron.connections.iter_mut().zip(params.iter()) {
            conn.weight = w;
        }
        neuron.bias = params[incoming];

        for (out, &w) in outputs.iter().zip(params.iter().skip(incoming + 1)) {
            if let Some(target) = self.neurons.get_mut(out) {
                for conn in target.connections.iter_mut().filter(|c| c.source == id) {
                    conn.weight = w;
                }
            }
        }
        true
    }

    /// Random-perturbation search over one neuron's parameters.
    ///
    /// Each iteration scores `perturbations` Gaussian offsets of the current
    /// best vector and moves to the best one if it improves; the search halts
    /// on the first iteration without improvement. Returns `None` for an
    /// unknown or input neuron.
    pub fn optimize_neuron<R: Rng + ?Sized>(
        &self,
        id: NeuronId,
        data: &EvaluationSet<'_>,
        config: &PerturbationConfig,
        weights: &ImprovementWeights,
        pool: Option<&WorkerPool>,
        rng: &mut R,
    ) -> Option<ModelResult> {
        let mut best_params = self.neuron_parameters(id)?;
        let mut best = self.clone();
        let mut best_metrics = data.evaluate(&best, pool);
        let mut history = GrowthHistory::new(best_metrics);
        let mut candidate = self.clone();

        for iteration in 1..=config.iterations {
            let mut round_best: Option<(Array1<f64>, Metrics, f64)> = None;

            for _ in 0..config.perturbations {
                let noise = Array1::from_shape_fn(best_params.len(), |_| gaussian(rng, config.sigma));
                let params = &best_params + &noise;
                candidate.set_neuron_parameters(id, &params);
                let metrics = data.evaluate(&candidate, pool);
                let improvement = compute_total_improvement(&best_metrics, &metrics, weights);
                if round_best.as_ref().map_or(true, |(_, _, b)| improvement > *b) {
                    round_best = Some((params, metrics, improvement));
                }
            }

            let Some((params, metrics, improvement)) = round_best else {
                break;
            };
            let accepted = improvement > 0.0;
            history.record(GrowthRecord {
                iteration,
                metrics,
                improvement,
                accepted,
                neurons_added: 0,
                neuron_count: best.neuron_count(),
            });
            if !accepted {
                log::debug!("Neuron {}: no improving perturbation at iter {}, stopping", id, iteration);
                break;
            }

            log::debug!("Neuron {}: iter {} improved by {:.6} ({})", id, iteration, improvement, metrics);
            best.set_neuron_parameters(id, &params);
            best_params = params;
            best_metrics = metrics;
        }

        Some(ModelResult {
            network: best,
            metrics: best_metrics,
            neurons_added: 0,
            history,
        })
    }
}

/// Mean absolute difference of biases and positional connection weights
/// over neurons present in both networks; infinite when none are shared
pub fn network_distance(a: &Network, b: &Network) -> f64 {
    let mut total = 0.0;
    let mut count = 0usize;

    for (id, na) in &a.neurons {
        let Some(nb) = b.neurons.get(id) else {
            continue;
        };
        total += (na.bias - nb.bias).abs();
        count += 1;
        for (ca, cb) in na.connections.iter().zip(&nb.connections) {
            total += (ca.weight - cb.weight).abs();
            count += 1;
        }
    }

    if count == 0 {
        f64::INFINITY
    } else {
        total / count as f64
    }
}

/// A group of similar networks
#[derive(Clone, Debug, PartialEq)]
pub struct Species {
    pub id: usize,
    /// Index of the first member, used for distance checks
    pub representative: usize,
    pub members: Vec<usize>,
}

/// Groups networks whose distance to a species representative is below
/// the threshold
#[derive(Clone, Debug)]
pub struct SpeciationManager {
    pub threshold: f64,
    species: Vec<Species>,
}

impl SpeciationManager {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            species: Vec::new(),
        }
    }

    /// Assign every network to the first species within the threshold,
    /// founding a new species otherwise
    pub fn cluster(&mut self, networks: &[Network]) -> &[Species] {
        self.species.clear();

        for (i, net) in networks.iter().enumerate() {
            let threshold = self.threshold;
            let found = self
                .species
                .iter_mut()
                .find(|s| network_distance(net, &networks[s.representative]) < threshold);
            match found {
                Some(species) => species.members.push(i),
                None => {
                    let id = self.species.len() + 1;
                    self.species.push(Species {
                        id,
                        representative: i,
                        members: vec![i],
                    });
                }
            }
        }

        log::debug!("Clustered {} networks into {} species", networks.len(), self.species.len());
        &self.species
    }

    pub fn species(&self) -> &[Species] {
        &self.species
    }

    pub fn species_count(&self) -> usize {
        self.species.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::{argmax, Sample, CLOSENESS_BINS};
    use std::collections::HashMap;

    fn metrics(exact: f64, bin0: f64, approx: f64) -> Metrics {
        let mut closeness_bins = [0.0; CLOSENESS_BINS];
        closeness_bins[0] = bin0;
        Metrics {
            exact_accuracy: exact,
            closeness_bins,
            approx_score: approx,
            evaluated: 10,
            skipped: 0,
        }
    }

    fn result(m: Metrics) -> ModelResult {
        ModelResult {
            network: Network::new(),
            metrics: m,
            neurons_added: 0,
            history: GrowthHistory::default(),
        }
    }

    /// Samples whose label is the argmax of the first three inputs
    fn dataset(count: usize, rng: &mut ChaCha8Rng) -> Vec<Sample> {
        (0..count)
            .map(|_| {
                let values: Vec<f64> = (0..4).map(|_| rng.gen_range(0.0..1.0)).collect();
                let label = argmax(&values[..3]).unwrap_or(0);
                let inputs: HashMap<NeuronId, f64> = values.iter().enumerate().map(|(i, v)| (i as NeuronId, *v)).collect();
                Sample::new(inputs, label)
            })
            .collect()
    }

    fn setup(seed: u64) -> (Network, CheckpointStore, Vec<usize>, ChaCha8Rng) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let net = Network::build_layered(&[4, 5, 3], "relu", "linear", &mut rng);
        let samples = dataset(30, &mut rng);
        let inputs: Vec<_> = samples.iter().map(|s| s.inputs.clone()).collect();
        let labels = samples.iter().map(|s| s.label).collect();
        let store = net.generate_checkpoints(&inputs, 1, None).unwrap();
        (net, store, labels, rng)
    }

    #[test]
    fn test_improvement_weights() {
        let w = ImprovementWeights::default();
        let base = metrics(50.0, 0.0, 50.0);
        let better = metrics(60.0, 10.0, 50.0);
        let expected = 0.3 * 0.1 + 0.4 * 0.1;
        assert!((compute_total_improvement(&base, &better, &w) - expected).abs() < 1e-12);
        assert!(compute_total_improvement(&better, &base, &w) < 0.0);
        assert_eq!(compute_total_improvement(&base, &base, &w), 0.0);
    }

    #[test]
    fn test_no_metric_regressed() {
        let base = metrics(50.0, 20.0, 50.0);
        assert!(no_metric_regressed(&base, &metrics(50.0, 20.0, 60.0)));
        assert!(!no_metric_regressed(&base, &metrics(90.0, 10.0, 90.0)));
    }

    #[test]
    fn test_tournament_picks_best_of_all() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let baseline = metrics(0.0, 0.0, 0.0);
        let results = vec![
            result(metrics(10.0, 0.0, 0.0)),
            result(metrics(80.0, 0.0, 0.0)),
            result(metrics(40.0, 0.0, 0.0)),
        ];
        let w = ImprovementWeights::default();
        for size in [3, 10] {
            let winner = tournament_selection(&results, &baseline, size, &w, &mut rng).unwrap();
            assert_eq!(winner.metrics.exact_accuracy, 80.0);
        }
        assert!(tournament_selection(&[], &baseline, 3, &w, &mut rng).is_none());
        assert!(tournament_selection(&results, &baseline, 0, &w, &mut rng).is_some());
    }

    #[test]
    fn test_tournament_tie_goes_to_first_drawn() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let baseline = metrics(0.0, 0.0, 0.0);
        let results: Vec<ModelResult> = (0..5).map(|_| result(metrics(30.0, 0.0, 0.0))).collect();
        let w = ImprovementWeights::default();

        let first = index::sample(&mut ChaCha8Rng::seed_from_u64(2), 5, 5).index(0);
        assert_eq!(tournament_index(&results, &baseline, 5, &w, &mut rng), Some(first));
    }

    #[test]
    fn test_growth_is_monotonic() {
        let (net, store, labels, mut rng) = setup(11);
        let data = EvaluationSet::new(&store, &labels);
        let config = GrowthConfig {
            max_iterations: 8,
            max_consecutive_failures: 4,
            ..GrowthConfig::default()
        };

        let result = net.grow(&data, &config, &MutationConfig::default(), None, 0, &mut rng);

        let mut best = result.history.baseline;
        for record in result.history.accepted() {
            assert!(record.metrics.exact_accuracy >= best.exact_accuracy);
            assert!(record.metrics.closeness_quality() >= best.closeness_quality());
            assert!(record.metrics.approx_score >= best.approx_score);
            best = record.metrics;
        }
        assert_eq!(result.metrics, result.history.best_metrics());
        assert_eq!(result.neurons_added, result.history.neurons_added());
        assert_eq!(result.network.neuron_count(), net.neuron_count() + result.neurons_added);
        assert!(result.history.len() <= 8);
    }

    #[test]
    fn test_growth_metrics_match_full_evaluation() {
        let (net, store, labels, mut rng) = setup(12);
        let data = EvaluationSet::new(&store, &labels);
        let config = GrowthConfig {
            max_iterations: 3,
            strict_monotonic: false,
            ..GrowthConfig::default()
        };
        let result = net.grow(&data, &config, &MutationConfig::default(), None, 0, &mut rng);

        // Grown neurons only read checkpointed pre-output values
        assert_eq!(data.evaluate(&result.network, None), result.metrics);
    }

    #[test]
    fn test_growth_stops_on_failure_budget() {
        let (net, store, labels, mut rng) = setup(13);
        let data = EvaluationSet::new(&store, &labels);
        let config = GrowthConfig {
            max_consecutive_failures: 0,
            ..GrowthConfig::default()
        };
        let result = net.grow(&data, &config, &MutationConfig::default(), None, 0, &mut rng);
        assert!(result.history.is_empty());
        assert_eq!(result.neurons_added, 0);
        assert_eq!(result.network.neurons, net.neurons);
    }

    #[test]
    fn test_growth_is_reproducible() {
        let (net, store, labels, _) = setup(14);
        let data = EvaluationSet::new(&store, &labels);
        let config = GrowthConfig {
            max_iterations: 4,
            ..GrowthConfig::default()
        };
        let mutation = MutationConfig::default();
        let a = net.grow(&data, &config, &mutation, None, 0, &mut ChaCha8Rng::seed_from_u64(5));
        let b = net.grow(&data, &config, &mutation, None, 0, &mut ChaCha8Rng::seed_from_u64(5));
        assert_eq!(a.metrics, b.metrics);
        assert_eq!(a.network.neurons, b.network.neurons);
    }

    #[test]
    fn test_grow_population() {
        let (net, store, labels, mut rng) = setup(15);
        let data = EvaluationSet::new(&store, &labels);
        let config = GrowthConfig {
            max_iterations: 3,
            sandboxes: 3,
            tournament_size: 3,
            ..GrowthConfig::default()
        };
        let pool = WorkerPool::new(Some(2)).unwrap();
        let mutation = MutationConfig::default();

        let winner = net.grow_population(&data, &config, &mutation, Some(&pool), 100, &mut rng).unwrap();
        let baseline = data.evaluate(&net, None);
        assert!(compute_total_improvement(&baseline, &winner.metrics, &config.weights) >= 0.0);

        let sequential = net
            .grow_population(&data, &config, &mutation, None, 100, &mut ChaCha8Rng::seed_from_u64(0))
            .unwrap();
        assert!(sequential.network.is_valid());
    }

    #[test]
    fn test_parameter_vector_roundtrip() {
        let mut rng = ChaCha8Rng::seed_from_u64(6);
        let mut net = Network::build_layered(&[2, 3, 2], "relu", "linear", &mut rng);
        let id = net
            .add_neuron_from_pre_outputs(Some(NeuronType::Dense), Some("tanh"), 2, 2, Default::default(), &mut rng)
            .unwrap();

        let params = net.neuron_parameters(id).unwrap();
        // 2 incoming, bias, 2 outputs
        assert_eq!(params.len(), 5);

        let shifted = &params + 1.0;
        assert!(net.set_neuron_parameters(id, &shifted));
        assert_eq!(net.neuron_parameters(id).unwrap(), shifted);
        assert!((net.weight(id, net.output_nodes[1]) - (params[4] + 1.0)).abs() < 1e-12);

        assert!(!net.set_neuron_parameters(id, &Array1::zeros(3)));
        assert!(net.neuron_parameters(0).is_none());
    }

    #[test]
    fn test_optimize_neuron_never_worse() {
        let (mut net, _, _, mut rng) = setup(16);
        let id = net
            .add_neuron_from_pre_outputs(Some(NeuronType::Dense), Some("relu"), 1, 3, Default::default(), &mut rng)
            .unwrap();
        let samples = dataset(20, &mut rng);
        let inputs: Vec<_> = samples.iter().map(|s| s.inputs.clone()).collect();
        let labels: Vec<usize> = samples.iter().map(|s| s.label).collect();
        let store = net.generate_checkpoints(&inputs, 1, None).unwrap();
        let data = EvaluationSet::new(&store, &labels);

        let before = data.evaluate(&net, None);
        let weights = ImprovementWeights::default();
        let config = PerturbationConfig {
            iterations: 5,
            perturbations: 4,
            sigma: 0.2,
        };
        let result = net.optimize_neuron(id, &data, &config, &weights, None, &mut rng).unwrap();

        assert!(compute_total_improvement(&before, &result.metrics, &weights) >= 0.0);
        assert_eq!(data.evaluate(&result.network, None), result.metrics);
        assert_eq!(result.network.neuron_count(), net.neuron_count());
        assert!(net.optimize_neuron(9999, &data, &config, &weights, None, &mut rng).is_none());
    }

    #[test]
    fn test_network_distance() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let a = Network::build_layered(&[2, 3, 1], "relu", "linear", &mut rng);
        assert_eq!(network_distance(&a, &a), 0.0);

        let mut b = a.clone();
        b.adjust_all_biases(0.5);
        assert!(network_distance(&a, &b) > 0.0);
        assert_eq!(network_distance(&a, &Network::new()), f64::INFINITY);
    }

    #[test]
    fn test_speciation() {
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let a = Network::build_layered(&[2, 3, 1], "relu", "linear", &mut rng);
        let mut near = a.clone();
        near.adjust_all_weights(0.001);
        let mut far = a.clone();
        far.adjust_all_weights(5.0);
        far.adjust_all_biases(5.0);

        let mut manager = SpeciationManager::new(0.5);
        let species = manager.cluster(&[a, near, far]).to_vec();
        assert_eq!(species.len(), 2);
        assert_eq!(species[0].members, vec![0, 1]);
        assert_eq!(species[1].members, vec![2]);
        assert_eq!(species[1].id, 2);
        assert_eq!(manager.species_count(), 2);
    }
}
