//! Scalar activation functions and the per-network activation registry.

use std::collections::HashMap;
use std::f64::consts::PI;

/// A pure scalar activation function
pub type ActivationFn = fn(f64) -> f64;

/// Name used when an activation is unknown or unset
pub const LINEAR: &str = "linear";

/// Activations the mutation operators draw from
pub const MUTABLE_ACTIVATIONS: [&str; 6] = ["relu", "sigmoid", "tanh", "leaky_relu", "elu", "linear"];

pub fn relu(x: f64) -> f64 {
    x.max(0.0)
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

pub fn tanh(x: f64) -> f64 {
    x.tanh()
}

pub fn leaky_relu(x: f64) -> f64 {
    if x > 0.0 {
        x
    } else {
        0.01 * x
    }
}

pub fn elu(x: f64) -> f64 {
    if x >= 0.0 {
        x
    } else {
        x.exp() - 1.0
    }
}

pub fn linear(x: f64) -> f64 {
    x
}

/// x * sigmoid(x)
pub fn smooth_relu(x: f64) -> f64 {
    x / (1.0 + (-x).exp())
}

/// Mexican-hat wavelet
pub fn wavelet(x: f64) -> f64 {
    (1.0 - x * x) * (-x * x / 2.0).exp()
}

/// Cauchy CDF, maps to (0, 1)
pub fn cauchy(x: f64) -> f64 {
    x.atan() / PI + 0.5
}

/// Identity above zero, scaled square below
pub fn asym(x: f64) -> f64 {
    if x > 0.0 {
        x
    } else {
        0.1 * x * x
    }
}

/// Derivative of a named activation, expressed in terms of the neuron's
/// activated output `y` (the only value the network keeps after a pass).
pub fn derivative(activation: &str, y: f64) -> f64 {
    match activation {
        "sigmoid" => y * (1.0 - y),
        "tanh" => 1.0 - y * y,
        "relu" => {
            if y > 0.0 {
                1.0
            } else {
                0.0
            }
        }
        "leaky_relu" => {
            if y > 0.0 {
                1.0
            } else {
                0.01
            }
        }
        "elu" => {
            if y >= 0.0 {
                1.0
            } else {
                y + 1.0
            }
        }
        _ => 1.0,
    }
}

/// Numerically stable softmax (max subtraction).
///
/// Returns an empty vector for empty input.
pub fn softmax(inputs: &[f64]) -> Vec<f64> {
    let max = inputs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        if inputs.is_empty() {
            return Vec::new();
        }
        let uniform = 1.0 / inputs.len() as f64;
        return vec![uniform; inputs.len()];
    }

    let exps: Vec<f64> = inputs.iter().map(|&v| (v - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Mapping from activation name to scalar function.
///
/// Unknown names resolve to [`linear`] with a warning, never an error.
#[derive(Clone, Debug)]
pub struct ActivationRegistry {
    functions: HashMap<String, ActivationFn>,
}

impl Default for ActivationRegistry {
    fn default() -> Self {
        let builtin: [(&str, ActivationFn); 11] = [
            ("relu", relu),
            ("sigmoid", sigmoid),
            ("tanh", tanh),
            ("leaky_relu", leaky_relu),
            ("elu", elu),
            ("linear", linear),
            ("smooth_relu", smooth_relu),
            ("wavelet_act", wavelet),
            ("cauchy_act", cauchy),
            ("asym_act", asym),
            // Per neuron this is the identity; the joint step is
            // Network::normalize_outputs
            ("softmax", linear),
        ];

        Self {
            functions: builtin
                .into_iter()
                .map(|(name, f)| (name.to_string(), f))
                .collect(),
        }
    }
}

impl ActivationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an activation
    pub fn register(&mut self, name: impl Into<String>, f: ActivationFn) {
        self.functions.insert(name.into(), f);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Apply the named activation to `x`
    #[inline]
    pub fn apply(&self, name: &str, x: f64) -> f64 {
        match self.functions.get(name) {
            Some(f) => f(x),
            None => {
                log::warn!("Undefined activation '{}', using linear", name);
                x
            }
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }
}
