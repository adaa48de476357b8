//! JSON persistence of whole networks.
//!
//! Non-finite floats are written as 0. Fields missing from older documents
//! are rebuilt from type defaults on load.

use super::network::{Network, QuantumNeuron};
use super::neuron::{
    finite_or_zero, BatchNormParams, Connection, GateWeights, Neuron, NeuronId, NeuronKind,
    NeuronType, UpdateRule, DEFAULT_KERNELS,
};
use super::activation::{ActivationRegistry, LINEAR};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors raised while saving or loading a network
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Flat wire form of a neuron
#[derive(Serialize, Deserialize)]
struct NeuronRecord {
    id: NeuronId,
    #[serde(rename = "type")]
    neuron_type: NeuronType,
    #[serde(default)]
    value: f64,
    #[serde(default)]
    bias: f64,
    #[serde(default)]
    activation: String,
    #[serde(default)]
    connections: Vec<Connection>,
    #[serde(default)]
    is_new: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cell_state: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    gate_weights: Option<GateWeights>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kernels: Option<Vec<Vec<f64>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    batch_norm_params: Option<BatchNormParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dropout_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attention_weights: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    neighborhood: Option<Vec<NeuronId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    update_rule: Option<UpdateRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nca_state: Option<Vec<f64>>,
}

fn sanitized(values: &[f64]) -> Vec<f64> {
    values.iter().copied().map(finite_or_zero).collect()
}

impl From<&Neuron> for NeuronRecord {
    fn from(n: &Neuron) -> Self {
        let mut record = NeuronRecord {
            id: n.id,
            neuron_type: n.neuron_type(),
            value: finite_or_zero(n.value),
            bias: finite_or_zero(n.bias),
            activation: n.activation.clone(),
            connections: n
                .connections
                .iter()
                .map(|c| Connection::new(c.source, finite_or_zero(c.weight)))
                .collect(),
            is_new: n.is_new,
            cell_state: None,
            gate_weights: None,
            kernels: None,
            batch_norm_params: None,
            dropout_rate: None,
            attention_weights: None,
            neighborhood: None,
            update_rule: None,
            nca_state: None,
        };

        match &n.kind {
            NeuronKind::Input | NeuronKind::Dense | NeuronKind::Rnn => {}
            NeuronKind::Lstm { cell_state, gates } => {
                record.cell_state = Some(finite_or_zero(*cell_state));
                record.gate_weights = Some(GateWeights {
                    input: sanitized(&gates.input),
                    forget: sanitized(&gates.forget),
                    output: sanitized(&gates.output),
                    cell: sanitized(&gates.cell),
                });
            }
            NeuronKind::Cnn { kernels } => {
                record.kernels = Some(kernels.iter().map(|k| sanitized(k)).collect());
            }
            NeuronKind::BatchNorm(p) => {
                record.batch_norm_params = Some(BatchNormParams {
                    gamma: finite_or_zero(p.gamma),
                    beta: finite_or_zero(p.beta),
                    mean: finite_or_zero(p.mean),
                    var: finite_or_zero(p.var),
                });
            }
            NeuronKind::Dropout { rate } => record.dropout_rate = Some(finite_or_zero(*rate)),
            NeuronKind::Attention { weights } => record.attention_weights = Some(sanitized(weights)),
            NeuronKind::Nca {
                neighborhood,
                rule,
                state,
            } => {
                record.neighborhood = Some(neighborhood.clone());
                record.update_rule = Some(*rule);
                record.nca_state = Some(sanitized(state));
            }
        }

        record
    }
}

impl From<NeuronRecord> for Neuron {
    fn from(r: NeuronRecord) -> Self {
        let mut activation = r.activation;
        let kind = match r.neuron_type {
            NeuronType::Input => NeuronKind::Input,
            NeuronType::Dense => NeuronKind::Dense,
            NeuronType::Rnn => NeuronKind::Rnn,
            NeuronType::Lstm => {
                let gates = match r.gate_weights {
                    Some(g) if !g.is_empty() || r.connections.is_empty() => g,
                    _ => {
                        log::debug!("LSTM neuron {}: regenerating gate weights", r.id);
                        let mut rng = ChaCha8Rng::seed_from_u64(u64::from(r.id));
                        GateWeights::random(r.connections.len(), &mut rng)
                    }
                };
                NeuronKind::Lstm {
                    cell_state: r.cell_state.unwrap_or(0.0),
                    gates,
                }
            }
            NeuronType::Cnn => {
                if activation.is_empty() {
                    activation = "relu".to_string();
                }
                let kernels = match r.kernels {
                    Some(k) if !k.is_empty() => k,
                    _ => {
                        log::debug!("CNN neuron {}: using default kernels", r.id);
                        DEFAULT_KERNELS.iter().map(|k| k.to_vec()).collect()
                    }
                };
                NeuronKind::Cnn { kernels }
            }
            NeuronType::BatchNorm => NeuronKind::BatchNorm(r.batch_norm_params.unwrap_or_default()),
            NeuronType::Dropout => NeuronKind::Dropout {
                rate: r.dropout_rate.unwrap_or(0.0),
            },
            NeuronType::Attention => NeuronKind::Attention {
                weights: r.attention_weights.unwrap_or_default(),
            },
            NeuronType::Nca => NeuronKind::Nca {
                neighborhood: r.neighborhood.unwrap_or_default(),
                rule: r.update_rule.unwrap_or_default(),
                state: r.nca_state.unwrap_or_default(),
            },
        };

        if activation.is_empty() {
            activation = LINEAR.to_string();
        }

        Neuron {
            id: r.id,
            kind,
            activation,
            bias: r.bias,
            value: r.value,
            connections: r.connections,
            is_new: r.is_new,
        }
    }
}

impl Serialize for Neuron {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        NeuronRecord::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Neuron {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        NeuronRecord::deserialize(deserializer).map(Neuron::from)
    }
}

/// Wire form of a whole network
#[derive(Serialize, Deserialize)]
struct NetworkDocument {
    #[serde(default)]
    id: u64,
    neurons: BTreeMap<NeuronId, Neuron>,
    #[serde(default, rename = "quant")]
    quantum_neurons: BTreeMap<NeuronId, QuantumNeuron>,
    input_nodes: Vec<NeuronId>,
    output_nodes: Vec<NeuronId>,
    #[serde(default)]
    trainable_neurons: Vec<NeuronId>,
    #[serde(default)]
    dropout_seed: u64,
}

impl Serialize for Network {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let quantum_neurons = self
            .quantum_neurons
            .iter()
            .map(|(id, q)| {
                (
                    *id,
                    QuantumNeuron {
                        id: q.id,
                        amplitudes: sanitized(&q.amplitudes),
                    },
                )
            })
            .collect();

        NetworkDocument {
            id: self.id,
            neurons: self.neurons.clone(),
            quantum_neurons,
            input_nodes: self.input_nodes.clone(),
            output_nodes: self.output_nodes.clone(),
            trainable_neurons: self.trainable_neurons.clone(),
            dropout_seed: self.dropout_seed,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Network {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let doc = NetworkDocument::deserialize(deserializer)?;

        // Map keys are authoritative
        let neurons: BTreeMap<NeuronId, Neuron> = doc
            .neurons
            .into_iter()
            .map(|(id, mut n)| {
                n.id = id;
                (id, n)
            })
            .collect();

        for id in doc.input_nodes.iter().chain(&doc.output_nodes) {
            if !neurons.contains_key(id) {
                log::warn!("Network document references missing neuron {}", id);
            }
        }

        Ok(Network {
            id: doc.id,
            neurons,
            quantum_neurons: doc.quantum_neurons,
            input_nodes: doc.input_nodes,
            output_nodes: doc.output_nodes,
            trainable_neurons: doc.trainable_neurons,
            dropout_seed: doc.dropout_seed,
            activations: ActivationRegistry::default(),
        })
    }
}

impl Network {
    pub fn to_json(&self) -> Result<String, PersistError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(data: &str) -> Result<Self, PersistError> {
        Ok(serde_json::from_str(data)?)
    }

    /// Write the network as indented JSON
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), PersistError> {
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), data)?;
        log::info!("Network saved to {}", path.as_ref().display());
        Ok(())
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, PersistError> {
        let data = fs::read_to_string(path)?;
        Self::from_json(&data)
    }
}
