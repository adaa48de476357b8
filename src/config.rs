//! Configuration for network construction, growth and evaluation.
//!
//! Supports YAML configuration files with sensible defaults.

use crate::evolution::{GrowthConfig, PerturbationConfig};
use crate::neural::{MutationConfig, TrainingConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub mutation: MutationConfig,
    #[serde(default)]
    pub growth: GrowthConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub perturbation: PerturbationConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Layered network construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Input layer first, output layer last
    pub layer_sizes: Vec<usize>,
    pub hidden_activation: String,
    pub output_activation: String,
    /// Forward passes per sample
    pub timesteps: usize,
}

/// Evaluation and checkpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Worker threads, 80% of the hardware threads if unset
    pub workers: Option<usize>,
    /// Where per-sample checkpoints go; kept in memory if unset
    pub checkpoint_folder: Option<PathBuf>,
    /// Files loaded per batch when evaluating a checkpoint directory
    pub batch_size: usize,
}

/// Logging and randomness
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub log_level: String,
    /// Seed of every random stream
    pub seed: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            layer_sizes: vec![4, 8, 3],
            hidden_activation: "relu".to_string(),
            output_activation: "linear".to_string(),
            timesteps: 1,
        }
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            workers: None,
            checkpoint_folder: None,
            batch_size: 64,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            seed: 42,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Reject settings nothing can run with. Out-of-range learning rates
    /// and inverted clamp ranges are corrected where they are used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.network.layer_sizes.len() < 2 {
            return invalid("layer_sizes needs an input and an output layer");
        }
        if self.network.layer_sizes.iter().any(|&n| n == 0) {
            return invalid("layer sizes must be > 0");
        }
        if self.network.timesteps == 0 {
            return invalid("timesteps must be > 0");
        }
        if self.evaluation.batch_size == 0 {
            return invalid("batch_size must be > 0");
        }
        if self.evaluation.workers == Some(0) {
            return invalid("workers must be > 0");
        }
        if self.growth.min_neurons_per_iteration > self.growth.max_neurons_per_iteration {
            return invalid("min_neurons_per_iteration cannot exceed max_neurons_per_iteration");
        }
        if self.mutation.min_connections > self.mutation.max_connections {
            return invalid("min_connections cannot exceed max_connections");
        }
        if !(self.perturbation.sigma.is_finite() && self.perturbation.sigma > 0.0) {
            return invalid("perturbation sigma must be finite and > 0");
        }
        Ok(())
    }
}
