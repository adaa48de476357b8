//! CSV export for offline inspection.

use crate::evaluation::Sample;
use crate::neural::{Network, NeuronId};
use crate::stats::GrowthHistory;
use std::fs::File;
use std::io::{BufWriter, Result, Write};
use std::path::Path;

/// Export system for saving per-sample results
pub struct ExportSystem;

impl ExportSystem {
    /// One row per sample: index, every input in `input_nodes` order (absent
    /// keys as 0), one-hot expected outputs and current outputs, both sorted
    /// by output ID. Returns the number of rows written.
    pub fn write_samples_csv<W: Write>(
        network: &Network,
        samples: &[Sample],
        timesteps: usize,
        mut out: W,
    ) -> Result<usize> {
        let mut net = network.clone();
        let mut output_ids: Vec<NeuronId> = net.output_nodes.clone();
        output_ids.sort_unstable();

        let mut header = vec!["sample".to_string()];
        header.extend(net.input_nodes.iter().map(|id| format!("in_{}", id)));
        header.extend(output_ids.iter().map(|id| format!("expected_{}", id)));
        header.extend(output_ids.iter().map(|id| format!("out_{}", id)));
        writeln!(out, "{}", header.join(","))?;

        for (index, sample) in samples.iter().enumerate() {
            net.forward(&sample.inputs, timesteps);
            let expected = sample.one_hot(&net.output_nodes);
            let current = net.outputs();

            let mut row = vec![index.to_string()];
            row.extend(
                net.input_nodes
                    .iter()
                    .map(|id| format!("{:.6}", sample.inputs.get(id).copied().unwrap_or(0.0))),
            );
            row.extend(
                output_ids
                    .iter()
                    .map(|id| format!("{:.1}", expected.get(id).copied().unwrap_or(0.0))),
            );
            row.extend(
                output_ids
                    .iter()
                    .map(|id| format!("{:.6}", current.get(id).copied().unwrap_or(0.0))),
            );
            writeln!(out, "{}", row.join(","))?;
        }

        out.flush()?;
        Ok(samples.len())
    }

    /// [`ExportSystem::write_samples_csv`] into a file
    pub fn export_samples_csv<P: AsRef<Path>>(
        network: &Network,
        samples: &[Sample],
        timesteps: usize,
        path: P,
    ) -> Result<usize> {
        let path = path.as_ref();
        let rows = Self::write_samples_csv(network, samples, timesteps, BufWriter::new(File::create(path)?))?;
        log::info!("Exported {} samples to {}", rows, path.display());
        Ok(rows)
    }

    /// Export a growth history to CSV
    pub fn export_growth_csv<P: AsRef<Path>>(history: &GrowthHistory, path: P) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(history.to_csv().as_bytes())?;
        Ok(())
    }
}
