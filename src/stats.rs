//! Per-iteration records of a growth run.

use crate::evaluation::Metrics;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One growth iteration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GrowthRecord {
    pub iteration: usize,
    /// Candidate metrics
    pub metrics: Metrics,
    /// Composite improvement of the candidate over the best so far
    pub improvement: f64,
    pub accepted: bool,
    /// Neurons the candidate added on top of the best
    pub neurons_added: usize,
    /// Candidate size
    pub neuron_count: usize,
}

/// Track a growth run over time
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GrowthHistory {
    /// Metrics of the starting network
    pub baseline: Metrics,
    pub records: Vec<GrowthRecord>,
}

impl GrowthHistory {
    pub fn new(baseline: Metrics) -> Self {
        Self {
            baseline,
            records: Vec::new(),
        }
    }

    pub fn record(&mut self, record: GrowthRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Get latest record
    pub fn latest(&self) -> Option<&GrowthRecord> {
        self.records.last()
    }

    pub fn accepted(&self) -> impl Iterator<Item = &GrowthRecord> {
        self.records.iter().filter(|r| r.accepted)
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted().count()
    }

    /// Metrics of the last accepted candidate, or the baseline
    pub fn best_metrics(&self) -> Metrics {
        self.accepted().last().map_or(self.baseline, |r| r.metrics)
    }

    /// Neurons added across accepted iterations
    pub fn neurons_added(&self) -> usize {
        self.accepted().map(|r| r.neurons_added).sum()
    }

    /// Export to CSV format
    pub fn to_csv(&self) -> String {
        let mut csv = String::from("iteration,exact,closeness_quality,approx,improvement,accepted,neurons_added,neurons\n");

        for r in &self.records {
            csv.push_str(&format!(
                "{},{:.4},{:.4},{:.4},{:.6},{},{},{}\n",
                r.iteration,
                r.metrics.exact_accuracy,
                r.metrics.closeness_quality(),
                r.metrics.approx_score,
                r.improvement,
                r.accepted,
                r.neurons_added,
                r.neuron_count,
            ));
        }

        csv
    }
}

impl fmt::Display for GrowthHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let best = self.best_metrics();
        write!(
            f,
            "{} iterations, {} accepted, {} neurons added: eA {:.2} -> {:.2}, cQ {:.2} -> {:.2}, aS {:.2} -> {:.2}",
            self.len(),
            self.accepted_count(),
            self.neurons_added(),
            self.baseline.exact_accuracy,
            best.exact_accuracy,
            self.baseline.closeness_quality(),
            best.closeness_quality(),
            self.baseline.approx_score,
            best.approx_score,
        )
    }
}
