//! Scoring a network against labelled samples.
//!
//! Three signals are produced per evaluation: exact (argmax) accuracy, a
//! 10-bin histogram of how close the labelled output is to 1.0, and an
//! approximate score that rewards numerically close wrong classes.
//! Samples with an out-of-range label or an unloadable checkpoint are
//! skipped and do not count towards the denominator.

use crate::checkpoint::{list_batch_checkpoints, Checkpoint, CheckpointError, CheckpointStore};
use crate::neural::{finite_or_zero, Network, NeuronId, PersistError};
use crate::parallel::WorkerPool;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

/// Number of closeness bins
pub const CLOSENESS_BINS: usize = 10;

/// One labelled example
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub inputs: HashMap<NeuronId, f64>,
    /// Index into the network's output nodes
    pub label: usize,
}

impl Sample {
    pub fn new(inputs: HashMap<NeuronId, f64>, label: usize) -> Self {
        Self { inputs, label }
    }

    /// Target map with 1.0 on the labelled output and 0.0 elsewhere
    pub fn one_hot(&self, outputs: &[NeuronId]) -> HashMap<NeuronId, f64> {
        outputs
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, if i == self.label { 1.0 } else { 0.0 }))
            .collect()
    }

    /// Read a JSON array of samples
    pub fn load_all<P: AsRef<Path>>(path: P) -> Result<Vec<Sample>, PersistError> {
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn save_all<P: AsRef<Path>>(samples: &[Sample], path: P) -> Result<(), PersistError> {
        fs::write(path, serde_json::to_string_pretty(samples)?)?;
        Ok(())
    }
}

/// Closeness of two class indices in [0, 100].
///
/// Both values are taken by magnitude. Equal zeros score 100; a single zero
/// scores `100 * max(0, 1 - |diff| / (max + 1))`; otherwise the ratio of
/// the smaller to the larger.
pub fn calculate_percentage_match(expected: f64, actual: f64) -> f64 {
    let expected = expected.abs();
    let actual = actual.abs();

    if expected == 0.0 && actual == 0.0 {
        return 100.0;
    }
    if expected == 0.0 || actual == 0.0 {
        let max = expected.max(actual);
        let closeness = 1.0 - (expected - actual).abs() / (max + 1.0);
        return (closeness * 100.0).max(0.0);
    }

    expected.min(actual) / expected.max(actual) * 100.0
}

/// Index of the largest value, the first one on ties
pub fn argmax(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Bin of `|value - 1|` clamped to [0, 1]: bin k holds ratios up to
/// (k+1)/10, the last bin everything above 0.9
pub fn closeness_bin(value: f64) -> usize {
    let ratio = (value - 1.0).abs().min(1.0);
    (0..CLOSENESS_BINS - 1)
        .find(|&k| ratio <= (k + 1) as f64 / 10.0)
        .unwrap_or(CLOSENESS_BINS - 1)
}

/// Weighted sum of the nine lower bins, weights falling linearly from 1.0
/// to 0.1. The catch-all bin is ignored.
pub fn compute_closeness_quality(bins: &[f64; CLOSENESS_BINS]) -> f64 {
    bins.iter()
        .take(CLOSENESS_BINS - 1)
        .enumerate()
        .map(|(k, b)| b * (1.0 - 0.9 * k as f64 / 8.0))
        .sum()
}

/// Result of one evaluation run
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Argmax accuracy in [0, 100]
    pub exact_accuracy: f64,
    /// Percentage of evaluated samples per bin
    pub closeness_bins: [f64; CLOSENESS_BINS],
    /// Mean class closeness in [0, 100]
    pub approx_score: f64,
    pub evaluated: usize,
    pub skipped: usize,
}

impl Metrics {
    pub fn closeness_quality(&self) -> f64 {
        compute_closeness_quality(&self.closeness_bins)
    }
}

impl std::fmt::Display for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "exact={:.2}% closeness={:.2} approx={:.2} (n={}, skipped={})",
            self.exact_accuracy,
            self.closeness_quality(),
            self.approx_score,
            self.evaluated,
            self.skipped
        )
    }
}

/// Running per-sample counts; merging is commutative
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MetricTally {
    exact_matches: usize,
    bin_counts: [usize; CLOSENESS_BINS],
    approx_sum: f64,
    evaluated: usize,
    skipped: usize,
}

impl MetricTally {
    /// Score one sample's output values (in `output_nodes` order)
    pub fn record(&mut self, label: usize, outputs: &[f64]) {
        if label >= outputs.len() {
            log::debug!("Label {} out of range 0..{}, skipping", label, outputs.len());
            self.skipped += 1;
            return;
        }
        let values: Vec<f64> = outputs.iter().copied().map(finite_or_zero).collect();
        let predicted = argmax(&values).unwrap_or(0);

        if predicted == label {
            self.exact_matches += 1;
        }
        self.bin_counts[closeness_bin(values[label])] += 1;
        self.approx_sum += calculate_percentage_match(label as f64, predicted as f64) / 100.0;
        self.evaluated += 1;
    }

    pub fn skip(&mut self) {
        self.skipped += 1;
    }

    pub fn merge(mut self, other: Self) -> Self {
        self.exact_matches += other.exact_matches;
        for (a, b) in self.bin_counts.iter_mut().zip(other.bin_counts) {
            *a += b;
        }
        self.approx_sum += other.approx_sum;
        self.evaluated += other.evaluated;
        self.skipped += other.skipped;
        self
    }

    pub fn finish(self) -> Metrics {
        let mut metrics = Metrics {
            evaluated: self.evaluated,
            skipped: self.skipped,
            ..Metrics::default()
        };
        if self.evaluated == 0 {
            return metrics;
        }
        let n = self.evaluated as f64;
        metrics.exact_accuracy = self.exact_matches as f64 / n * 100.0;
        for (bin, count) in metrics.closeness_bins.iter_mut().zip(self.bin_counts) {
            *bin = count as f64 / n * 100.0;
        }
        metrics.approx_score = self.approx_sum / n * 100.0;
        metrics
    }
}

fn output_vector(network: &Network, outputs: &BTreeMap<NeuronId, f64>) -> Vec<f64> {
    network
        .output_nodes
        .iter()
        .map(|id| outputs.get(id).copied().unwrap_or(0.0))
        .collect()
}

impl Network {
    /// Full forward pass per sample on a private copy.
    ///
    /// Softmax outputs are normalized jointly before scoring, as in the
    /// checkpoint evaluators.
    pub fn evaluate_metrics(&self, samples: &[Sample], timesteps: usize) -> Metrics {
        let mut net = self.clone();
        let mut tally = MetricTally::default();
        for sample in samples {
            net.forward(&sample.inputs, timesteps);
            net.normalize_outputs();
            tally.record(sample.label, &net.output_values());
        }
        tally.finish()
    }

    /// Parallel [`Network::evaluate_metrics`]
    pub fn evaluate_metrics_parallel(&self, samples: &[Sample], timesteps: usize, pool: &WorkerPool) -> Metrics {
        pool.install(|| {
            samples
                .par_iter()
                .fold(
                    || (self.clone(), MetricTally::default()),
                    |(mut net, mut tally), sample| {
                        net.forward(&sample.inputs, timesteps);
                        net.normalize_outputs();
                        tally.record(sample.label, &net.output_values());
                        (net, tally)
                    },
                )
                .map(|(_, tally)| tally)
                .reduce(MetricTally::default, MetricTally::merge)
        })
        .finish()
    }

    fn score_checkpoint(&mut self, checkpoint: &Checkpoint, label: usize, tally: &mut MetricTally) {
        let outputs = self.compute_partial_outputs_from_checkpoint(checkpoint);
        let values = output_vector(self, &outputs);
        tally.record(label, &values);
    }

    fn score_stored(&mut self, store: &CheckpointStore, index: usize, label: usize, tally: &mut MetricTally) {
        if label >= self.output_nodes.len() {
            log::debug!("Sample {}: label {} out of range, skipping", index, label);
            tally.skip();
            return;
        }
        match store.fetch(index) {
            Ok(checkpoint) => self.score_checkpoint(&checkpoint, label, tally),
            Err(e) => {
                log::warn!("Sample {}: failed to load checkpoint: {}, skipping", index, e);
                tally.skip();
            }
        }
    }

    /// Score from precomputed pre-output checkpoints.
    ///
    /// `labels[i]` belongs to checkpoint `i`; a length mismatch yields
    /// empty metrics.
    pub fn evaluate_with_checkpoints(&self, store: &CheckpointStore, labels: &[usize]) -> Metrics {
        if store.len() != labels.len() || self.output_nodes.is_empty() {
            log::warn!(
                "Cannot evaluate: {} checkpoints, {} labels, {} outputs",
                store.len(),
                labels.len(),
                self.output_nodes.len()
            );
            return Metrics::default();
        }

        let mut net = self.clone();
        let mut tally = MetricTally::default();
        for (index, &label) in labels.iter().enumerate() {
            net.score_stored(store, index, label, &mut tally);
        }
        tally.finish()
    }

    /// Parallel [`Network::evaluate_with_checkpoints`]
    pub fn evaluate_with_checkpoints_parallel(
        &self,
        store: &CheckpointStore,
        labels: &[usize],
        pool: &WorkerPool,
    ) -> Metrics {
        if store.len() != labels.len() || self.output_nodes.is_empty() {
            log::warn!(
                "Cannot evaluate: {} checkpoints, {} labels, {} outputs",
                store.len(),
                labels.len(),
                self.output_nodes.len()
            );
            return Metrics::default();
        }

        pool.install(|| {
            labels
                .par_iter()
                .enumerate()
                .fold(
                    || (self.clone(), MetricTally::default()),
                    |(mut net, mut tally), (index, &label)| {
                        net.score_stored(store, index, label, &mut tally);
                        (net, tally)
                    },
                )
                .map(|(_, tally)| tally)
                .reduce(MetricTally::default, MetricTally::merge)
        })
        .finish()
    }

    /// Score from a directory of full checkpoints, loading `batch_size`
    /// files at a time.
    ///
    /// Fails when the directory cannot be listed or holds fewer checkpoints
    /// than there are labels. Unreadable files are skipped.
    pub fn evaluate_from_checkpoint_dir(
        &self,
        dir: &Path,
        labels: &[usize],
        batch_size: usize,
    ) -> Result<Metrics, CheckpointError> {
        let files = list_batch_checkpoints(dir)?;
        if files.len() < labels.len() {
            return Err(CheckpointError::MissingSample(files.len()));
        }
        if files.len() > labels.len() {
            log::warn!(
                "{} checkpoint files but {} labels, ignoring the rest",
                files.len(),
                labels.len()
            );
        }

        let mut net = self.clone();
        let mut tally = MetricTally::default();
        let batch_size = batch_size.max(1);

        for (batch_files, batch_labels) in files[..labels.len()]
            .chunks(batch_size)
            .zip(labels.chunks(batch_size))
        {
            let loaded: Vec<Option<Checkpoint>> = batch_files
                .iter()
                .map(|(index, path)| match Checkpoint::load_file(path) {
                    Ok(checkpoint) => Some(checkpoint),
                    Err(e) => {
                        log::warn!("Sample {}: failed to load {}: {}", index, path.display(), e);
                        None
                    }
                })
                .collect();

            for (checkpoint, &label) in loaded.iter().zip(batch_labels) {
                match checkpoint {
                    Some(checkpoint) => {
                        net.compute_outputs_from_checkpoint(checkpoint);
                        net.normalize_outputs();
                        tally.record(label, &net.output_values());
                    }
                    None => tally.skip(),
                }
            }
        }

        Ok(tally.finish())
    }
}
