//! phasegraph - CLI Entry Point
//!
//! Build, grow, train and score typed-neuron networks.

use clap::{Parser, Subcommand};
use phasegraph::export::ExportSystem;
use phasegraph::{benchmark, Config, EvaluationSet, Network, NeuronId, Sample, WorkerPool};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "phasegraph")]
#[command(version)]
#[command(about = "Grow neural graphs with checkpoint-based partial recompute")]
struct Cli {
    /// Configuration file (YAML); defaults are used if it does not exist
    #[arg(short, long, global = true, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate default configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },

    /// Build a layered network from the configuration
    Build {
        /// Output network file (JSON)
        #[arg(short, long, default_value = "network.json")]
        output: PathBuf,
    },

    /// Grow a network against labelled samples
    Grow {
        /// Network file (JSON)
        #[arg(short, long)]
        network: PathBuf,

        /// Samples file (JSON array)
        #[arg(short, long)]
        samples: PathBuf,

        /// Output network file
        #[arg(short, long, default_value = "grown.json")]
        output: PathBuf,

        /// Write the growth history as CSV
        #[arg(long)]
        history: Option<PathBuf>,

        /// Run independent sandboxes and pick one by tournament
        #[arg(long)]
        population: bool,
    },

    /// Tune neuron weights and bias by random perturbation search
    Optimize {
        /// Network file (JSON)
        #[arg(short, long)]
        network: PathBuf,

        /// Samples file (JSON array)
        #[arg(short, long)]
        samples: PathBuf,

        /// Neuron to tune (default: every output neuron in turn)
        #[arg(long)]
        neuron: Option<NeuronId>,

        /// Output network file
        #[arg(short, long, default_value = "optimized.json")]
        output: PathBuf,
    },

    /// Score a network
    Evaluate {
        /// Network file (JSON)
        #[arg(short, long)]
        network: PathBuf,

        /// Samples file (JSON array)
        #[arg(short, long)]
        samples: PathBuf,

        /// Score from pre-output checkpoints instead of full forward passes
        #[arg(long)]
        checkpoints: bool,

        /// Write full checkpoints to this directory and score from it
        #[arg(long)]
        batch_dir: Option<PathBuf>,
    },

    /// One-step backpropagation over the samples
    Train {
        /// Network file (JSON)
        #[arg(short, long)]
        network: PathBuf,

        /// Samples file (JSON array)
        #[arg(short, long)]
        samples: PathBuf,

        /// Output network file
        #[arg(short, long, default_value = "trained.json")]
        output: PathBuf,
    },

    /// Export per-sample inputs, targets and outputs to CSV
    Export {
        /// Network file (JSON)
        #[arg(short, long)]
        network: PathBuf,

        /// Samples file (JSON array)
        #[arg(short, long)]
        samples: PathBuf,

        /// Output CSV file
        #[arg(short, long, default_value = "samples.csv")]
        output: PathBuf,
    },

    /// Compare full and checkpoint evaluation speed
    Benchmark {
        /// Network file (JSON)
        #[arg(short, long)]
        network: PathBuf,

        /// Samples file (JSON array)
        #[arg(short, long)]
        samples: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        Config::from_file(&cli.config)?
    } else {
        Config::default()
    };

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.logging.log_level.as_str()))
        .init();

    if cli.config.exists() {
        log::info!("Loaded config from {}", cli.config.display());
    }

    match cli.command {
        Commands::Init { output } => generate_config(output),

        Commands::Build { output } => build_network(&config, output),

        Commands::Grow {
            network,
            samples,
            output,
            history,
            population,
        } => grow_network(&config, network, samples, output, history, population),

        Commands::Optimize {
            network,
            samples,
            neuron,
            output,
        } => optimize_network(&config, network, samples, neuron, output),

        Commands::Evaluate {
            network,
            samples,
            checkpoints,
            batch_dir,
        } => evaluate_network(&config, network, samples, checkpoints, batch_dir),

        Commands::Train {
            network,
            samples,
            output,
        } => train_network(&config, network, samples, output),

        Commands::Export {
            network,
            samples,
            output,
        } => {
            let net = Network::load_json(&network)?;
            let samples = Sample::load_all(&samples)?;
            ExportSystem::export_samples_csv(&net, &samples, config.network.timesteps, &output)?;
            println!("CSV saved to: {:?}", output);
            Ok(())
        }

        Commands::Benchmark { network, samples } => {
            let net = Network::load_json(&network)?;
            let samples = Sample::load_all(&samples)?;
            println!("{}", benchmark(&net, &samples, config.network.timesteps)?);
            Ok(())
        }
    }
}

fn generate_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();
    config.save(&output)?;
    println!("Configuration saved to: {:?}", output);
    Ok(())
}

fn build_network(config: &Config, output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let mut rng = ChaCha8Rng::seed_from_u64(config.logging.seed);
    let net = Network::build_layered(
        &config.network.layer_sizes,
        &config.network.hidden_activation,
        &config.network.output_activation,
        &mut rng,
    );
    net.save_json(&output)?;

    println!("Built network {:?}", config.network.layer_sizes);
    println!("  Neurons: {}", net.neuron_count());
    println!("  Connections: {}", net.connection_count());
    println!("  Saved to: {:?}", output);
    Ok(())
}

fn worker_pool(config: &Config) -> Result<WorkerPool, Box<dyn std::error::Error>> {
    Ok(WorkerPool::new(config.evaluation.workers)?)
}

fn split(samples: &[Sample]) -> (Vec<std::collections::HashMap<phasegraph::NeuronId, f64>>, Vec<usize>) {
    let inputs = samples.iter().map(|s| s.inputs.clone()).collect();
    let labels = samples.iter().map(|s| s.label).collect();
    (inputs, labels)
}

fn generate_store(
    config: &Config,
    net: &Network,
    inputs: &[std::collections::HashMap<NeuronId, f64>],
    pool: &WorkerPool,
) -> Result<phasegraph::CheckpointStore, Box<dyn std::error::Error>> {
    let folder = config.evaluation.checkpoint_folder.as_deref();
    let start = Instant::now();
    let store = net.generate_checkpoints_parallel(inputs, config.network.timesteps, folder, pool)?;
    println!("Checkpoints: {} in {:.2}s", store.len(), start.elapsed().as_secs_f64());
    Ok(store)
}

fn grow_network(
    config: &Config,
    network_path: PathBuf,
    samples_path: PathBuf,
    output: PathBuf,
    history_path: Option<PathBuf>,
    population: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let net = Network::load_json(&network_path)?;
    let samples = Sample::load_all(&samples_path)?;
    let pool = worker_pool(config)?;
    let mut rng = ChaCha8Rng::seed_from_u64(config.logging.seed);

    let (inputs, labels) = split(&samples);
    let store = generate_store(config, &net, &inputs, &pool)?;

    let data = EvaluationSet::new(&store, &labels);
    let start = Instant::now();
    let result = if population {
        net.grow_population(&data, &config.growth, &config.mutation, Some(&pool), config.logging.seed, &mut rng)
    } else {
        Some(net.grow(&data, &config.growth, &config.mutation, Some(&pool), 0, &mut rng))
    };
    let Some(result) = result else {
        println!("No growth result");
        return Ok(());
    };

    println!();
    println!("=== Growth Complete ===");
    println!("Time: {:.2}s", start.elapsed().as_secs_f64());
    println!("{}", result.history);
    println!("Final: {}", result.metrics);

    result.network.save_json(&output)?;
    println!("Network saved to: {:?}", output);
    if let Some(path) = history_path {
        ExportSystem::export_growth_csv(&result.history, &path)?;
        println!("History saved to: {:?}", path);
    }
    Ok(())
}

fn optimize_network(
    config: &Config,
    network_path: PathBuf,
    samples_path: PathBuf,
    neuron: Option<NeuronId>,
    output: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut net = Network::load_json(&network_path)?;
    let samples = Sample::load_all(&samples_path)?;
    let pool = worker_pool(config)?;
    let mut rng = ChaCha8Rng::seed_from_u64(config.logging.seed);

    let (inputs, labels) = split(&samples);
    let store = generate_store(config, &net, &inputs, &pool)?;
    let data = EvaluationSet::new(&store, &labels);

    let targets = match neuron {
        Some(id) => vec![id],
        None => net.output_nodes.clone(),
    };
    let start = Instant::now();
    for id in targets {
        let Some(result) = net.optimize_neuron(
            id,
            &data,
            &config.perturbation,
            &config.growth.weights,
            Some(&pool),
            &mut rng,
        ) else {
            println!("Neuron {}: not tunable, skipped", id);
            continue;
        };
        println!(
            "Neuron {}: {} accepted steps, {}",
            id,
            result.history.accepted_count(),
            result.metrics
        );
        net = result.network;
    }

    println!("Time: {:.2}s", start.elapsed().as_secs_f64());
    net.save_json(&output)?;
    println!("Network saved to: {:?}", output);
    Ok(())
}

fn evaluate_network(
    config: &Config,
    network_path: PathBuf,
    samples_path: PathBuf,
    checkpoints: bool,
    batch_dir: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let net = Network::load_json(&network_path)?;
    let samples = Sample::load_all(&samples_path)?;
    let pool = worker_pool(config)?;
    let timesteps = config.network.timesteps;
    let start = Instant::now();

    let metrics = match batch_dir {
        Some(dir) => {
            let (inputs, labels) = split(&samples);
            net.save_checkpoints_to_directory(&inputs, timesteps, &dir)?;
            net.evaluate_from_checkpoint_dir(&dir, &labels, config.evaluation.batch_size)?
        }
        None if checkpoints => {
            let (inputs, labels) = split(&samples);
            let folder: Option<&Path> = config.evaluation.checkpoint_folder.as_deref();
            let store = net.generate_checkpoints_parallel(&inputs, timesteps, folder, &pool)?;
            net.evaluate_with_checkpoints_parallel(&store, &labels, &pool)
        }
        None => net.evaluate_metrics_parallel(&samples, timesteps, &pool),
    };

    println!("=== Evaluation ===");
    println!("Samples: {} evaluated, {} skipped", metrics.evaluated, metrics.skipped);
    println!("Exact accuracy: {:.2}%", metrics.exact_accuracy);
    println!("Closeness quality: {:.2}", metrics.closeness_quality());
    println!("Approx score: {:.2}", metrics.approx_score);
    let bins: Vec<String> = metrics.closeness_bins.iter().map(|b| format!("{:.1}", b)).collect();
    println!("Closeness bins: [{}]", bins.join(", "));
    println!("Time: {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}

fn train_network(
    config: &Config,
    network_path: PathBuf,
    samples_path: PathBuf,
    output: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut net = Network::load_json(&network_path)?;
    let samples = Sample::load_all(&samples_path)?;
    let timesteps = config.network.timesteps;

    let before = net.evaluate_metrics(&samples, timesteps);
    net.train_on_samples(&samples, &config.training);
    let after = net.evaluate_metrics(&samples, timesteps);

    println!("Before: {}", before);
    println!("After:  {}", after);
    net.save_json(&output)?;
    println!("Network saved to: {:?}", output);
    Ok(())
}
