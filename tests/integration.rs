//! Integration tests for phasegraph

use phasegraph::evaluation::calculate_percentage_match;
use phasegraph::evolution::{compute_total_improvement, SpeciationManager};
use phasegraph::neural::{softmax, GateWeights, Neuron, NeuronKind};
use phasegraph::{
    Checkpoint, Config, EvaluationSet, GrowthConfig, MutationConfig, Network, NeuronType, RewirePolicy, Sample,
    WorkerPool,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;

fn samples(count: usize, n_inputs: u32, n_labels: usize, rng: &mut ChaCha8Rng) -> Vec<Sample> {
    (0..count)
        .map(|_| {
            let inputs = (0..n_inputs).map(|id| (id, rng.gen_range(0.0..1.0))).collect();
            Sample::new(inputs, rng.gen_range(0..n_labels))
        })
        .collect()
}

#[test]
fn test_layered_forward_scenario() {
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let mut net = Network::build_layered(&[2, 3, 2], "relu", "linear", &mut rng);
    let inputs = HashMap::from([(0, 1.0), (1, 0.0)]);

    net.forward(&inputs, 1);
    let outputs = net.outputs();
    assert_eq!(outputs.len(), 2);
    assert!(outputs.keys().all(|id| net.output_nodes.contains(id)));
    assert!(outputs.values().all(|v| v.is_finite()));

    // Forward determinism
    net.forward(&inputs, 1);
    assert_eq!(net.outputs(), outputs);
}

#[test]
fn test_empty_lstm_scenario() {
    let mut net = Network::new();
    net.insert_neuron(Neuron::input(0));
    let lstm = NeuronKind::Lstm {
        cell_state: 0.7,
        gates: GateWeights::default(),
    };
    net.insert_neuron(Neuron::new(1, lstm, "tanh", 0.3));
    net.input_nodes = vec![0];
    net.output_nodes = vec![1];

    net.forward(&HashMap::from([(0, 1.0)]), 2);
    let neuron = net.neuron(1).unwrap();
    assert_eq!(neuron.value, 0.0);
    assert_eq!(neuron.cell_state(), Some(0.0));
}

#[test]
fn test_percentage_match_scenario() {
    assert_eq!(calculate_percentage_match(5.0, 5.0), 100.0);
    assert_eq!(calculate_percentage_match(0.0, 0.0), 100.0);
    assert!(calculate_percentage_match(10.0, 0.0) < 100.0);
}

#[test]
fn test_add_connection_scenario() {
    let mut net = Network::new();
    net.insert_neuron(Neuron::dense(0, "relu", 0.0));
    net.insert_neuron(Neuron::dense(1, "relu", 0.0));
    let mut rng = ChaCha8Rng::seed_from_u64(2);

    let (source, target) = net.add_connection(&mut rng).unwrap();
    assert_ne!(source, target);
    assert_eq!(net.connection_count(), 1);
    assert!(net.connection_exists(source, target));
}

#[test]
fn test_mutation_ids_unique() {
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let mut net = Network::build_layered(&[3, 4, 2], "relu", "linear", &mut rng);

    for i in 0..30 {
        let next = net.next_neuron_id();
        assert!(net.neurons.keys().all(|&id| id < next));
        let id = if i % 2 == 0 {
            net.add_random_neuron(None, None, 1, 4, &mut rng)
        } else {
            net.add_neuron_from_pre_outputs(None, None, 1, 4, RewirePolicy::Preserve, &mut rng)
                .unwrap()
        };
        assert_eq!(id, next);
    }
    assert_eq!(net.neuron_count(), 3 + 4 + 2 + 30);
}

#[test]
fn test_softmax_normalization() {
    for values in [vec![1.0, 2.0, 3.0], vec![-1000.0, 0.0, 1000.0], vec![1e-9; 5]] {
        let out = softmax(&values);
        let sum: f64 = out.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(out.iter().all(|v| *v >= 0.0));
    }
}

#[test]
fn test_network_json_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("net.json");
    let mut rng = ChaCha8Rng::seed_from_u64(4);
    let mut net = Network::build_layered(&[3, 5, 2], "tanh", "linear", &mut rng);
    net.change_neuron_type_to(4, NeuronType::Lstm, &mut rng);
    net.change_neuron_type_to(5, NeuronType::Cnn, &mut rng);
    if let Some(n) = net.neuron_mut(6) {
        n.bias = f64::NAN;
    }

    net.save_json(&path).unwrap();
    let loaded = Network::load_json(&path).unwrap();

    assert_eq!(loaded.neuron(6).map(|n| n.bias), Some(0.0));
    for (id, neuron) in &net.neurons {
        let other = loaded.neuron(*id).unwrap();
        assert_eq!(other.neuron_type(), neuron.neuron_type());
        assert_eq!(other.connections, neuron.connections);
        if *id != 6 {
            assert_eq!(other.bias.to_bits(), neuron.bias.to_bits());
        }
    }
    assert_eq!(loaded.output_nodes, net.output_nodes);
}

#[test]
fn test_checkpoint_growth_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    let net = Network::build_layered(&[4, 6, 3], "relu", "linear", &mut rng);
    let data_set = samples(40, 4, 3, &mut rng);
    let inputs: Vec<_> = data_set.iter().map(|s| s.inputs.clone()).collect();
    let labels: Vec<usize> = data_set.iter().map(|s| s.label).collect();

    let pool = WorkerPool::new(Some(2)).unwrap();
    let folder = dir.path().join("checkpoints");
    let store = net
        .generate_checkpoints_parallel(&inputs, 1, Some(&folder), &pool)
        .unwrap();
    assert_eq!(store.len(), 40);
    assert_eq!(Checkpoint::load(&folder, 0).unwrap().len(), 6);

    // Checkpoint scoring agrees with full forward passes
    let baseline = net.evaluate_metrics(&data_set, 1);
    assert_eq!(net.evaluate_with_checkpoints(&store, &labels), baseline);

    let data = EvaluationSet::new(&store, &labels);
    let config = GrowthConfig {
        max_iterations: 6,
        max_consecutive_failures: 3,
        ..GrowthConfig::default()
    };
    let result = net.grow(&data, &config, &MutationConfig::default(), Some(&pool), 0, &mut rng);
    assert!(compute_total_improvement(&baseline, &result.metrics, &config.weights) >= 0.0);
    assert_eq!(result.network.neuron_count(), net.neuron_count() + result.neurons_added);

    // Grown network scores the same after a save/load cycle
    let path = dir.path().join("grown.json");
    result.network.save_json(&path).unwrap();
    let loaded = Network::load_json(&path).unwrap();
    assert_eq!(loaded.evaluate_metrics(&data_set, 1), result.network.evaluate_metrics(&data_set, 1));
}

#[test]
fn test_training_keeps_network_valid() {
    let mut rng = ChaCha8Rng::seed_from_u64(6);
    let mut net = Network::build_layered(&[3, 4, 2], "sigmoid", "linear", &mut rng);
    let data_set = samples(20, 3, 2, &mut rng);

    let config = Config::default();
    net.train_on_samples(&data_set, &config.training);
    assert!(net.is_valid());
    for neuron in net.neurons.values() {
        assert!(neuron.bias.abs() <= config.training.clamp_max);
        assert!(neuron.connections.iter().all(|c| c.weight.abs() <= config.training.clamp_max));
    }
}

#[test]
fn test_crossover_children_cluster() {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let a = Network::build_layered(&[2, 3, 2], "relu", "linear", &mut rng);
    let mut b = a.clone();
    b.adjust_all_weights(0.01);
    let child = a.crossover(&b, &mut rng);
    assert!(child.output_nodes.iter().all(|id| child.neuron(*id).is_some()));

    let mut manager = SpeciationManager::new(0.5);
    assert_eq!(manager.cluster(&[a, b, child]).len(), 1);
}

#[test]
fn test_config_drives_build() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    let mut config = Config::default();
    config.network.layer_sizes = vec![5, 7, 4];
    config.save(&path).unwrap();

    let loaded = Config::from_file(&path).unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(loaded.logging.seed);
    let net = Network::build_layered(
        &loaded.network.layer_sizes,
        &loaded.network.hidden_activation,
        &loaded.network.output_activation,
        &mut rng,
    );
    assert_eq!(net.input_nodes.len(), 5);
    assert_eq!(net.output_nodes.len(), 4);
    assert_eq!(net.neuron_count(), 16);
}

#[test]
fn test_config_drives_output_optimization() {
    let mut config = Config::default();
    config.perturbation.iterations = 4;
    config.perturbation.perturbations = 3;
    let mut rng = ChaCha8Rng::seed_from_u64(config.logging.seed);
    let mut net = Network::build_layered(&[3, 4, 2], "tanh", "linear", &mut rng);
    let data_set = samples(16, 3, 2, &mut rng);
    let inputs: Vec<_> = data_set.iter().map(|s| s.inputs.clone()).collect();
    let labels: Vec<usize> = data_set.iter().map(|s| s.label).collect();

    let store = net.generate_checkpoints(&inputs, 1, None).unwrap();
    let data = EvaluationSet::new(&store, &labels);
    let baseline = data.evaluate(&net, None);

    let mut previous = baseline;
    for id in net.output_nodes.clone() {
        let result = net
            .optimize_neuron(id, &data, &config.perturbation, &config.growth.weights, None, &mut rng)
            .unwrap();
        assert!(result.history.len() <= config.perturbation.iterations);
        assert!(compute_total_improvement(&previous, &result.metrics, &config.growth.weights) >= 0.0);
        previous = result.metrics;
        net = result.network;
    }

    // Input neurons have no parameters to tune
    assert!(net
        .optimize_neuron(0, &data, &config.perturbation, &config.growth.weights, None, &mut rng)
        .is_none());
    assert_eq!(data.evaluate(&net, None), previous);
}
