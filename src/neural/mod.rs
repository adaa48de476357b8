//! Graph neural network model.
//!
//! Implements typed-neuron networks with:
//! - Per-type forward computation (dense, RNN, LSTM, CNN, NCA, ...)
//! - Two-pass forward propagation over the neuron graph
//! - Structural mutations and crossover
//! - One-step backpropagation
//! - JSON persistence

pub mod activation;
mod crossover;
mod mutations;
mod network;
mod neuron;
mod persist;
mod training;

pub use activation::{softmax, ActivationFn, ActivationRegistry};
pub use crossover::CrossoverStrategy;
pub use mutations::{MutationConfig, RewirePolicy};
pub use network::{Network, QuantumNeuron};
pub use neuron::{
    finite_or_zero, gaussian, BatchNormParams, Connection, GateWeights, KernelLayout, Neuron, NeuronId, NeuronKind,
    NeuronType, UpdateRule,
};
pub use persist::PersistError;
pub use training::TrainingConfig;
