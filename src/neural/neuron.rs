//! Typed neurons and their per-type forward computation.

use super::activation::{self, ActivationRegistry};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable neuron identifier, unique within a network
pub type NeuronId = u32;

/// Epsilon added to the variance in batch normalization
pub const BATCH_NORM_EPSILON: f64 = 1e-7;

/// Dropout rate given to freshly created dropout neurons
pub const DEFAULT_DROPOUT_RATE: f64 = 0.1;

/// Kernels used when a persisted CNN neuron carries none
pub const DEFAULT_KERNELS: [[f64; 2]; 2] = [[0.2, 0.5], [0.3, 0.4]];

/// Draw from N(0, sigma)
#[inline]
pub fn gaussian<R: Rng + ?Sized>(rng: &mut R, sigma: f64) -> f64 {
    let z: f64 = rng.sample(StandardNormal);
    z * sigma
}

/// Replace NaN/Inf with zero
#[inline]
pub fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

/// Neuron type tag
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NeuronType {
    Input,
    Dense,
    Rnn,
    Lstm,
    Cnn,
    BatchNorm,
    Dropout,
    Attention,
    Nca,
}

impl NeuronType {
    /// Types the mutation operators may create or switch to
    pub const MUTABLE: [NeuronType; 7] = [
        NeuronType::Dense,
        NeuronType::Rnn,
        NeuronType::Lstm,
        NeuronType::Cnn,
        NeuronType::BatchNorm,
        NeuronType::Dropout,
        NeuronType::Nca,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NeuronType::Input => "input",
            NeuronType::Dense => "dense",
            NeuronType::Rnn => "rnn",
            NeuronType::Lstm => "lstm",
            NeuronType::Cnn => "cnn",
            NeuronType::BatchNorm => "batch_norm",
            NeuronType::Dropout => "dropout",
            NeuronType::Attention => "attention",
            NeuronType::Nca => "nca",
        }
    }
}

impl fmt::Display for NeuronType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NeuronType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "input" => Ok(NeuronType::Input),
            "dense" => Ok(NeuronType::Dense),
            "rnn" => Ok(NeuronType::Rnn),
            "lstm" => Ok(NeuronType::Lstm),
            "cnn" => Ok(NeuronType::Cnn),
            "batch_norm" => Ok(NeuronType::BatchNorm),
            "dropout" => Ok(NeuronType::Dropout),
            "attention" => Ok(NeuronType::Attention),
            "nca" => Ok(NeuronType::Nca),
            other => Err(format!("unknown neuron type '{}'", other)),
        }
    }
}

/// Weighted incoming edge, stored on the target neuron
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub source: NeuronId,
    pub weight: f64,
}

impl Connection {
    pub fn new(source: NeuronId, weight: f64) -> Self {
        Self { source, weight }
    }
}

/// LSTM gate weights, one weight per incoming connection (by position)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GateWeights {
    pub input: Vec<f64>,
    pub forget: Vec<f64>,
    pub output: Vec<f64>,
    pub cell: Vec<f64>,
}

impl GateWeights {
    /// Random gate weights drawn from N(0, 0.5)
    pub fn random<R: Rng + ?Sized>(size: usize, rng: &mut R) -> Self {
        fn draw<R: Rng + ?Sized>(size: usize, rng: &mut R) -> Vec<f64> {
            (0..size).map(|_| gaussian(rng, 0.5)).collect()
        }

        let input = draw(size, rng);
        let forget = draw(size, rng);
        let output = draw(size, rng);
        let cell = draw(size, rng);
        Self {
            input,
            forget,
            output,
            cell,
        }
    }

    /// Number of positions usable by every gate
    pub fn len(&self) -> usize {
        self.input
            .len()
            .min(self.forget.len())
            .min(self.output.len())
            .min(self.cell.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append one random weight to every gate (new connection)
    pub fn push_random<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for gate in self.gates_mut() {
            gate.push(gaussian(rng, 0.5));
        }
    }

    /// Drop the weights at `index` (removed connection)
    pub fn remove(&mut self, index: usize) {
        for gate in self.gates_mut() {
            if index < gate.len() {
                gate.remove(index);
            }
        }
    }

    pub fn gates_mut(&mut self) -> [&mut Vec<f64>; 4] {
        [
            &mut self.input,
            &mut self.forget,
            &mut self.output,
            &mut self.cell,
        ]
    }
}

/// Static affine normalization parameters
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchNormParams {
    pub gamma: f64,
    pub beta: f64,
    pub mean: f64,
    pub var: f64,
}

impl Default for BatchNormParams {
    fn default() -> Self {
        Self {
            gamma: 1.0,
            beta: 0.0,
            mean: 0.0,
            var: 1.0,
        }
    }
}

/// How an NCA neuron aggregates its neighbourhood
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateRule {
    Sum,
    #[default]
    Average,
}

/// Shape of the kernels given to a new CNN neuron
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum KernelLayout {
    /// Two kernels of two elements
    #[default]
    Pairs,
    /// One to ten 2x2 kernels (four elements each)
    Squares,
}

/// Type-specific neuron state
#[derive(Clone, Debug, PartialEq)]
pub enum NeuronKind {
    Input,
    Dense,
    Rnn,
    Lstm {
        cell_state: f64,
        gates: GateWeights,
    },
    Cnn {
        kernels: Vec<Vec<f64>>,
    },
    BatchNorm(BatchNormParams),
    Dropout {
        rate: f64,
    },
    Attention {
        weights: Vec<f64>,
    },
    Nca {
        neighborhood: Vec<NeuronId>,
        rule: UpdateRule,
        state: Vec<f64>,
    },
}

impl NeuronKind {
    pub fn neuron_type(&self) -> NeuronType {
        match self {
            NeuronKind::Input => NeuronType::Input,
            NeuronKind::Dense => NeuronType::Dense,
            NeuronKind::Rnn => NeuronType::Rnn,
            NeuronKind::Lstm { .. } => NeuronType::Lstm,
            NeuronKind::Cnn { .. } => NeuronType::Cnn,
            NeuronKind::BatchNorm(_) => NeuronType::BatchNorm,
            NeuronKind::Dropout { .. } => NeuronType::Dropout,
            NeuronKind::Attention { .. } => NeuronType::Attention,
            NeuronKind::Nca { .. } => NeuronType::Nca,
        }
    }

    /// Freshly initialised state for `neuron_type`.
    ///
    /// `sources` are the neuron's incoming connection sources; LSTM gates are
    /// sized to them and NCA neurons use them as their neighbourhood.
    pub fn fresh<R: Rng + ?Sized>(
        neuron_type: NeuronType,
        sources: &[NeuronId],
        layout: KernelLayout,
        rng: &mut R,
    ) -> Self {
        match neuron_type {
            NeuronType::Input => NeuronKind::Input,
            NeuronType::Dense => NeuronKind::Dense,
            NeuronType::Rnn => NeuronKind::Rnn,
            NeuronType::Lstm => NeuronKind::Lstm {
                cell_state: 0.0,
                gates: GateWeights::random(sources.len(), rng),
            },
            NeuronType::Cnn => {
                let kernels = match layout {
                    KernelLayout::Pairs => (0..2)
                        .map(|_| vec![rng.gen::<f64>(), rng.gen::<f64>()])
                        .collect(),
                    KernelLayout::Squares => {
                        let count = rng.gen_range(1..=10);
                        (0..count)
                            .map(|_| (0..4).map(|_| rng.gen::<f64>()).collect())
                            .collect()
                    }
                };
                NeuronKind::Cnn { kernels }
            }
            NeuronType::BatchNorm => NeuronKind::BatchNorm(BatchNormParams::default()),
            NeuronType::Dropout => NeuronKind::Dropout {
                rate: DEFAULT_DROPOUT_RATE,
            },
            NeuronType::Attention => NeuronKind::Attention {
                weights: Vec::new(),
            },
            NeuronType::Nca => NeuronKind::Nca {
                neighborhood: sources.to_vec(),
                rule: UpdateRule::default(),
                state: Vec::new(),
            },
        }
    }
}

/// Shared state a neuron needs while being processed
pub struct ProcessContext<'a> {
    pub activations: &'a ActivationRegistry,
    pub rng: &'a mut ChaCha8Rng,
}

/// A computational node of the network graph
#[derive(Clone, Debug, PartialEq)]
pub struct Neuron {
    pub id: NeuronId,
    pub kind: NeuronKind,
    pub activation: String,
    pub bias: f64,
    /// Current output, reset at the start of every pass
    pub value: f64,
    pub connections: Vec<Connection>,
    /// Marks structurally recent neurons
    pub is_new: bool,
}

impl Neuron {
    pub fn new(id: NeuronId, kind: NeuronKind, activation: impl Into<String>, bias: f64) -> Self {
        Self {
            id,
            kind,
            activation: activation.into(),
            bias,
            value: 0.0,
            connections: Vec::new(),
            is_new: false,
        }
    }

    pub fn input(id: NeuronId) -> Self {
        Self::new(id, NeuronKind::Input, activation::LINEAR, 0.0)
    }

    pub fn dense(id: NeuronId, activation: impl Into<String>, bias: f64) -> Self {
        Self::new(id, NeuronKind::Dense, activation, bias)
    }

    #[inline]
    pub fn neuron_type(&self) -> NeuronType {
        self.kind.neuron_type()
    }

    #[inline]
    pub fn is_input(&self) -> bool {
        matches!(self.kind, NeuronKind::Input)
    }

    pub fn has_connection_from(&self, source: NeuronId) -> bool {
        self.connections.iter().any(|c| c.source == source)
    }

    /// LSTM cell state, if any
    pub fn cell_state(&self) -> Option<f64> {
        match &self.kind {
            NeuronKind::Lstm { cell_state, .. } => Some(*cell_state),
            _ => None,
        }
    }

    pub fn set_cell_state(&mut self, value: f64) {
        if let NeuronKind::Lstm { cell_state, .. } = &mut self.kind {
            *cell_state = value;
        }
    }

    /// Zero the dynamic state of a non-input neuron
    pub fn reset_state(&mut self) {
        if self.is_input() {
            return;
        }
        self.value = 0.0;
        self.set_cell_state(0.0);
    }

    /// Append an incoming connection, keeping LSTM gates aligned
    pub fn push_connection<R: Rng + ?Sized>(&mut self, source: NeuronId, weight: f64, rng: &mut R) {
        self.connections.push(Connection::new(source, weight));
        if let NeuronKind::Lstm { gates, .. } = &mut self.kind {
            gates.push_random(rng);
        }
    }

    /// Remove the connection at `index`, keeping LSTM gates aligned
    pub fn remove_connection_at(&mut self, index: usize) -> Option<Connection> {
        if index >= self.connections.len() {
            return None;
        }
        if let NeuronKind::Lstm { gates, .. } = &mut self.kind {
            gates.remove(index);
        }
        Some(self.connections.remove(index))
    }

    /// Compute the neuron's new value from its gathered inputs.
    ///
    /// For most types `inputs` are the weighted incoming values; NCA neurons
    /// receive their neighbours' raw values instead. Input neurons are left
    /// untouched. Non-finite results are replaced by zero.
    pub fn process(&mut self, inputs: &[f64], timestep: usize, ctx: &mut ProcessContext<'_>) {
        let activations = ctx.activations;
        let bias = self.bias;

        match &mut self.kind {
            NeuronKind::Input => return,
            NeuronKind::Dense => {
                let sum = bias + inputs.iter().sum::<f64>();
                self.value = activations.apply(&self.activation, sum);
            }
            NeuronKind::Rnn => {
                // Self-recurrence with implicit unit weight
                let sum = bias + inputs.iter().sum::<f64>() + self.value;
                self.value = activations.apply(&self.activation, sum);
            }
            NeuronKind::Lstm { cell_state, gates } => {
                let size = inputs.len().min(gates.len());
                if size == 0 {
                    self.value = 0.0;
                    *cell_state = 0.0;
                    log::debug!("LSTM neuron {}: empty inputs or gate weights", self.id);
                    return;
                }
                if inputs.len() != gates.len() {
                    log::debug!(
                        "LSTM neuron {}: {} inputs vs {} gate weights, using {}",
                        self.id,
                        inputs.len(),
                        gates.len(),
                        size
                    );
                }

                let (mut i_gate, mut f_gate, mut o_gate, mut c_in) = (0.0, 0.0, 0.0, 0.0);
                for (k, &x) in inputs.iter().take(size).enumerate() {
                    i_gate += x * gates.input[k];
                    f_gate += x * gates.forget[k];
                    o_gate += x * gates.output[k];
                    c_in += x * gates.cell[k];
                }
                let i_gate = activation::sigmoid(i_gate + bias);
                let f_gate = activation::sigmoid(f_gate + bias);
                let o_gate = activation::sigmoid(o_gate + bias);
                let c_in = activation::tanh(c_in + bias);

                *cell_state = finite_or_zero(*cell_state * f_gate + c_in * i_gate);
                self.value = cell_state.tanh() * o_gate;
            }
            NeuronKind::Cnn { kernels } => {
                let mut total = 0.0;
                let mut count = 0usize;
                for (k, kernel) in kernels.iter().enumerate() {
                    let width = kernel.len();
                    if width == 0 || inputs.len() < width {
                        log::trace!("CNN neuron {}: skipping kernel {}", self.id, k);
                        continue;
                    }
                    for window in inputs.windows(width) {
                        let sum = bias + window.iter().zip(kernel).map(|(x, w)| x * w).sum::<f64>();
                        total += activations.apply(&self.activation, sum);
                        count += 1;
                    }
                }
                self.value = if count == 0 { 0.0 } else { total / count as f64 };
            }
            NeuronKind::Dropout { rate } => {
                // Not rescaled on retention
                if ctx.rng.gen::<f64>() < *rate {
                    self.value = 0.0;
                }
            }
            NeuronKind::BatchNorm(params) => {
                let normalized = (self.value - params.mean) / (params.var + BATCH_NORM_EPSILON).sqrt();
                self.value = normalized * params.gamma + params.beta;
            }
            NeuronKind::Attention { weights } => {
                let scores: Vec<f64> = inputs.iter().map(|x| x * x).collect();
                *weights = activation::softmax(&scores);
                let sum = bias + inputs.iter().zip(weights.iter()).map(|(x, w)| x * w).sum::<f64>();
                self.value = activations.apply(&self.activation, sum);
            }
            NeuronKind::Nca { rule, state, .. } => {
                let aggregate = match rule {
                    UpdateRule::Sum => inputs.iter().sum::<f64>(),
                    UpdateRule::Average if inputs.is_empty() => 0.0,
                    UpdateRule::Average => inputs.iter().sum::<f64>() / inputs.len() as f64,
                };
                state.clear();
                state.extend_from_slice(inputs);
                self.value = activations.apply(&self.activation, aggregate + bias);
            }
        }

        self.value = finite_or_zero(self.value);
        log::trace!("t={} neuron {} ({}): value={}", timestep, self.id, self.neuron_type(), self.value);
    }
}
