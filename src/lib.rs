//! # phasegraph
//!
//! Typed-neuron graph networks that grow by hill climbing, scored from
//! cached pre-output checkpoints instead of full forward passes.
//!
//! ## Features
//!
//! - **Typed neurons**: dense, RNN, LSTM, CNN, batch-norm, dropout, attention, NCA
//! - **Partial recompute**: snapshot the layer feeding the outputs once, then
//!   score grown candidates by recomputing only new neurons and outputs
//! - **Parallel**: per-sample work on a bounded Rayon pool
//! - **Configurable**: YAML configuration files
//! - **Reproducible**: seeded random number generation
//!
//! ## Quick Start
//!
//! ```rust
//! use phasegraph::{EvaluationSet, GrowthConfig, MutationConfig, Network, Sample};
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//! use std::collections::HashMap;
//!
//! let mut rng = ChaCha8Rng::seed_from_u64(42);
//! let net = Network::build_layered(&[2, 4, 2], "relu", "linear", &mut rng);
//!
//! let samples = vec![
//!     Sample::new(HashMap::from([(0, 1.0), (1, 0.0)]), 0),
//!     Sample::new(HashMap::from([(0, 0.0), (1, 1.0)]), 1),
//! ];
//! let inputs: Vec<_> = samples.iter().map(|s| s.inputs.clone()).collect();
//! let labels: Vec<usize> = samples.iter().map(|s| s.label).collect();
//!
//! // Snapshot the pre-output layer once
//! let store = net.generate_checkpoints(&inputs, 1, None).unwrap();
//! let data = EvaluationSet::new(&store, &labels);
//!
//! let config = GrowthConfig { max_iterations: 5, ..GrowthConfig::default() };
//! let result = net.grow(&data, &config, &MutationConfig::default(), None, 0, &mut rng);
//! println!("{} ({} neurons added)", result.metrics, result.neurons_added);
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use phasegraph::Config;
//!
//! let mut config = Config::default();
//! config.network.layer_sizes = vec![784, 64, 10];
//! config.growth.max_iterations = 100;
//! assert!(config.validate().is_ok());
//! ```

pub mod checkpoint;
pub mod config;
pub mod evaluation;
pub mod evolution;
pub mod export;
pub mod neural;
pub mod parallel;
pub mod stats;

// Re-export main types
pub use checkpoint::{Checkpoint, CheckpointError, CheckpointStore};
pub use config::{Config, ConfigError};
pub use evaluation::{Metrics, Sample};
pub use evolution::{EvaluationSet, GrowthConfig, ImprovementWeights, ModelResult, PerturbationConfig};
pub use neural::{MutationConfig, Network, NeuronId, NeuronType, RewirePolicy, TrainingConfig};
pub use parallel::WorkerPool;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Time full-forward evaluation against checkpoint evaluation on `samples`
pub fn benchmark(network: &Network, samples: &[Sample], timesteps: usize) -> Result<BenchmarkResult, CheckpointError> {
    use std::time::Instant;

    let inputs: Vec<_> = samples.iter().map(|s| s.inputs.clone()).collect();
    let labels: Vec<usize> = samples.iter().map(|s| s.label).collect();

    let start = Instant::now();
    let full = network.evaluate_metrics(samples, timesteps);
    let full_secs = start.elapsed().as_secs_f64();

    let start = Instant::now();
    let store = network.generate_checkpoints(&inputs, timesteps, None)?;
    let generation_secs = start.elapsed().as_secs_f64();

    let start = Instant::now();
    let partial = network.evaluate_with_checkpoints(&store, &labels);
    let checkpoint_secs = start.elapsed().as_secs_f64();

    Ok(BenchmarkResult {
        samples: samples.len(),
        neurons: network.neuron_count(),
        full_secs,
        generation_secs,
        checkpoint_secs,
        metrics_match: full == partial,
    })
}

/// Benchmark result
#[derive(Debug, Clone)]
pub struct BenchmarkResult {
    pub samples: usize,
    pub neurons: usize,
    pub full_secs: f64,
    pub generation_secs: f64,
    pub checkpoint_secs: f64,
    /// Both paths produced identical metrics
    pub metrics_match: bool,
}

impl std::fmt::Display for BenchmarkResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Benchmark Results ===")?;
        writeln!(f, "Samples: {} ({} neurons)", self.samples, self.neurons)?;
        writeln!(f, "Full forward: {:.3}s", self.full_secs)?;
        writeln!(f, "Checkpoint generation: {:.3}s", self.generation_secs)?;
        writeln!(f, "Checkpoint evaluation: {:.3}s", self.checkpoint_secs)?;
        writeln!(f, "Metrics match: {}", self.metrics_match)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_benchmark() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let net = Network::build_layered(&[3, 5, 2], "tanh", "linear", &mut rng);
        let samples: Vec<Sample> = (0..10)
            .map(|_| {
                let inputs = (0..3).map(|id| (id, rng.gen_range(-1.0..1.0))).collect();
                Sample::new(inputs, rng.gen_range(0..2))
            })
            .collect();

        let result = benchmark(&net, &samples, 1).unwrap();
        assert_eq!(result.samples, 10);
        assert!(result.metrics_match);
        assert!(result.to_string().contains("Metrics match: true"));
    }
}
