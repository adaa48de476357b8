//! Checkpoints of neuron state for partial recomputation.
//!
//! A checkpoint holds the computed state of the pre-output neurons (or of
//! every hidden neuron) for one sample. Restoring it and processing only the
//! neurons it lacks plus the outputs reproduces the full forward pass, so
//! newly grown neurons can be scored without recomputing the whole graph.

use crate::neural::{finite_or_zero, Network, NeuronId};
use crate::parallel::WorkerPool;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during checkpoint operations
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no checkpoint for sample {0}")]
    MissingSample(usize),
}

/// Dynamic state of one neuron
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NeuronState {
    #[serde(rename = "Value")]
    pub value: f64,
    #[serde(rename = "CellState", default, skip_serializing_if = "Option::is_none")]
    pub cell_state: Option<f64>,
}

/// Neuron ID -> captured state, for one sample
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checkpoint {
    pub states: BTreeMap<NeuronId, NeuronState>,
}

/// File holding the pre-output checkpoint of sample `index`
pub fn checkpoint_file(folder: &Path, index: usize) -> PathBuf {
    folder.join(format!("sample_{}.json", index))
}

/// File holding the full checkpoint of sample `index` in a batch directory
pub fn batch_checkpoint_file(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("checkpoint_sample_{}.json", index))
}

impl Checkpoint {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn contains(&self, id: NeuronId) -> bool {
        self.states.contains_key(&id)
    }

    pub fn get(&self, id: NeuronId) -> Option<&NeuronState> {
        self.states.get(&id)
    }

    /// Write as `sample_<index>.json` under `folder`, creating it if needed
    pub fn save(&self, folder: &Path, index: usize) -> Result<PathBuf, CheckpointError> {
        fs::create_dir_all(folder)?;
        let path = checkpoint_file(folder, index);
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        log::debug!("Saved checkpoint for sample {} to {}", index, path.display());
        Ok(path)
    }

    pub fn load(folder: &Path, index: usize) -> Result<Self, CheckpointError> {
        Self::load_file(&checkpoint_file(folder, index))
    }

    pub fn load_file(path: &Path) -> Result<Self, CheckpointError> {
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

/// Per-sample checkpoints, held in memory or as one file per sample
#[derive(Clone, Debug)]
pub enum CheckpointStore {
    InMemory(Vec<Checkpoint>),
    OnDisk { folder: PathBuf, count: usize },
}

impl CheckpointStore {
    /// Number of samples covered
    pub fn len(&self) -> usize {
        match self {
            CheckpointStore::InMemory(list) => list.len(),
            CheckpointStore::OnDisk { count, .. } => *count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checkpoint of sample `index`, borrowed when in memory
    pub fn fetch(&self, index: usize) -> Result<Cow<'_, Checkpoint>, CheckpointError> {
        match self {
            CheckpointStore::InMemory(list) => list
                .get(index)
                .map(Cow::Borrowed)
                .ok_or(CheckpointError::MissingSample(index)),
            CheckpointStore::OnDisk { folder, count } => {
                if index >= *count {
                    return Err(CheckpointError::MissingSample(index));
                }
                Checkpoint::load(folder, index).map(Cow::Owned)
            }
        }
    }
}

/// `(index, path)` of every `checkpoint_sample_<i>.json` in `dir`, by index
pub fn list_batch_checkpoints(dir: &Path) -> Result<Vec<(usize, PathBuf)>, CheckpointError> {
    let mut files: Vec<(usize, PathBuf)> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            let index = name
                .strip_prefix("checkpoint_sample_")?
                .strip_suffix(".json")?
                .parse::<usize>()
                .ok()?;
            Some((index, entry.path()))
        })
        .collect();
    files.sort_by_key(|(index, _)| *index);
    Ok(files)
}

impl Network {
    /// Value (and LSTM cell state) of neuron `id`, non-finite values as 0
    pub fn neuron_state(&self, id: NeuronId) -> Option<NeuronState> {
        self.neurons.get(&id).map(|n| NeuronState {
            value: finite_or_zero(n.value),
            cell_state: n.cell_state().map(finite_or_zero),
        })
    }

    /// Overwrite the dynamic state of neuron `id`; missing IDs are ignored
    pub fn restore_state(&mut self, id: NeuronId, state: &NeuronState) {
        if let Some(neuron) = self.neurons.get_mut(&id) {
            neuron.value = state.value;
            if let Some(cell) = state.cell_state {
                neuron.set_cell_state(cell);
            }
        }
    }

    fn restore_checkpoint(&mut self, checkpoint: &Checkpoint) {
        for (id, state) in &checkpoint.states {
            self.restore_state(*id, state);
        }
    }

    /// Direct sources of any output neuron's connections
    pub fn pre_output_neurons(&self) -> BTreeSet<NeuronId> {
        self.output_nodes
            .iter()
            .filter_map(|id| self.neurons.get(id))
            .flat_map(|n| n.connections.iter().map(|c| c.source))
            .filter(|id| self.neurons.contains_key(id))
            .collect()
    }

    /// Forward propagation that never processes the neurons in `exclude`
    pub fn forward_up_to(&mut self, inputs: &HashMap<NeuronId, f64>, timesteps: usize, exclude: &[NeuronId]) {
        self.reset_neuron_values();
        self.set_inputs(inputs);

        let excluded: HashSet<NeuronId> = exclude.iter().copied().collect();
        let order: Vec<NeuronId> = self
            .neurons
            .values()
            .filter(|n| !n.is_input() && !excluded.contains(&n.id))
            .map(|n| n.id)
            .collect();
        let mut rng = self.pass_rng();

        for t in 0..timesteps {
            for &id in &order {
                self.process_neuron(id, t, &mut rng);
            }
        }
    }

    /// Capture the state of `ids`
    pub fn capture_checkpoint(&self, ids: impl IntoIterator<Item = NeuronId>) -> Checkpoint {
        Checkpoint {
            states: ids
                .into_iter()
                .filter_map(|id| self.neuron_state(id).map(|s| (id, s)))
                .collect(),
        }
    }

    /// Run up to the pre-output boundary and capture it
    pub fn checkpoint_sample(&mut self, inputs: &HashMap<NeuronId, f64>, timesteps: usize) -> Checkpoint {
        let outputs = self.output_nodes.clone();
        self.forward_up_to(inputs, timesteps, &outputs);
        self.capture_checkpoint(self.pre_output_neurons())
    }

    /// Outputs after restoring `checkpoint`.
    ///
    /// Every non-input, non-output neuron missing from the checkpoint is
    /// processed once in ascending ID order, then each output neuron is
    /// processed once with its full connection list.
    pub fn compute_outputs_from_checkpoint(&mut self, checkpoint: &Checkpoint) -> BTreeMap<NeuronId, f64> {
        self.reset_neuron_values();
        self.restore_checkpoint(checkpoint);

        let fresh: Vec<NeuronId> = self
            .hidden_ids()
            .into_iter()
            .filter(|id| !checkpoint.contains(*id))
            .collect();
        let outputs = self.output_nodes.clone();
        let mut rng = self.pass_rng();

        for id in fresh {
            self.process_neuron(id, 0, &mut rng);
        }
        for id in outputs {
            self.process_neuron(id, 0, &mut rng);
        }
        self.outputs()
    }

    /// [`Network::compute_outputs_from_checkpoint`], then a joint softmax
    /// when the first output neuron's activation is `"softmax"`
    pub fn compute_partial_outputs_from_checkpoint(&mut self, checkpoint: &Checkpoint) -> BTreeMap<NeuronId, f64> {
        self.compute_outputs_from_checkpoint(checkpoint);
        self.normalize_outputs();
        self.outputs()
    }

    /// Full forward pass per sample, capturing every neuron including the
    /// inputs
    pub fn checkpoint_all_hidden(&self, inputs: &[HashMap<NeuronId, f64>], timesteps: usize) -> Vec<Checkpoint> {
        let mut net = self.clone();
        inputs
            .iter()
            .map(|sample| {
                net.forward(sample, timesteps);
                let ids = net.neuron_ids();
                net.capture_checkpoint(ids)
            })
            .collect()
    }

    /// Outputs as restored from a full checkpoint, nothing recomputed
    pub fn compute_outputs_from_full_checkpoint(&mut self, checkpoint: &Checkpoint) -> BTreeMap<NeuronId, f64> {
        self.reset_neuron_values();
        self.restore_checkpoint(checkpoint);
        self.outputs()
    }

    /// Restore inputs and `checkpoint`, then for each timestep process the
    /// `is_new` neurons followed by the outputs
    pub fn compute_outputs_with_new_neurons(
        &mut self,
        checkpoint: &Checkpoint,
        inputs: &HashMap<NeuronId, f64>,
        timesteps: usize,
    ) -> BTreeMap<NeuronId, f64> {
        self.reset_neuron_values();
        self.set_inputs(inputs);
        self.restore_checkpoint(checkpoint);

        let new_ids: Vec<NeuronId> = self
            .neurons
            .values()
            .filter(|n| n.is_new && !n.is_input() && !self.is_output(n.id))
            .map(|n| n.id)
            .collect();
        let outputs = self.output_nodes.clone();
        let mut rng = self.pass_rng();

        for t in 0..timesteps {
            for &id in &new_ids {
                self.process_neuron(id, t, &mut rng);
            }
            for &id in &outputs {
                self.process_neuron(id, t, &mut rng);
            }
        }
        self.outputs()
    }

    /// Pre-output checkpoints for every sample, computed on a private copy.
    ///
    /// With a folder each checkpoint is written to `sample_<i>.json` and the
    /// first write error aborts generation.
    pub fn generate_checkpoints(
        &self,
        inputs: &[HashMap<NeuronId, f64>],
        timesteps: usize,
        folder: Option<&Path>,
    ) -> Result<CheckpointStore, CheckpointError> {
        let mut net = self.clone();
        let mut kept = Vec::new();

        for (index, sample) in inputs.iter().enumerate() {
            let checkpoint = net.checkpoint_sample(sample, timesteps);
            log::trace!("Checkpoint {} has {} neuron states", index, checkpoint.len());
            match folder {
                Some(folder) => {
                    checkpoint.save(folder, index)?;
                }
                None => kept.push(checkpoint),
            }
        }

        Ok(store_for(folder, inputs.len(), kept))
    }

    /// Parallel [`Network::generate_checkpoints`]; each worker uses its own
    /// clone and writes only its own sample files
    pub fn generate_checkpoints_parallel(
        &self,
        inputs: &[HashMap<NeuronId, f64>],
        timesteps: usize,
        folder: Option<&Path>,
        pool: &WorkerPool,
    ) -> Result<CheckpointStore, CheckpointError> {
        if let Some(folder) = folder {
            fs::create_dir_all(folder)?;
        }

        let results: Result<Vec<Option<Checkpoint>>, CheckpointError> = pool.install(|| {
            inputs
                .par_iter()
                .enumerate()
                .map_init(
                    || self.clone(),
                    |net, (index, sample)| {
                        let checkpoint = net.checkpoint_sample(sample, timesteps);
                        match folder {
                            Some(folder) => checkpoint.save(folder, index).map(|_| None),
                            None => Ok(Some(checkpoint)),
                        }
                    },
                )
                .collect()
        });

        let kept: Vec<Checkpoint> = results?.into_iter().flatten().collect();
        log::debug!("Generated {} checkpoints on {} workers", inputs.len(), pool.workers());
        Ok(store_for(folder, inputs.len(), kept))
    }

    /// Clear `dir` and write a full checkpoint per sample as
    /// `checkpoint_sample_<i>.json`. Returns the number of files written.
    pub fn save_checkpoints_to_directory(
        &self,
        inputs: &[HashMap<NeuronId, f64>],
        timesteps: usize,
        dir: &Path,
    ) -> Result<usize, CheckpointError> {
        match fs::remove_dir_all(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(dir)?;

        let checkpoints = self.checkpoint_all_hidden(inputs, timesteps);
        for (index, checkpoint) in checkpoints.iter().enumerate() {
            fs::write(batch_checkpoint_file(dir, index), serde_json::to_string(checkpoint)?)?;
        }
        log::info!("Wrote {} checkpoints to {}", checkpoints.len(), dir.display());
        Ok(checkpoints.len())
    }
}

fn store_for(folder: Option<&Path>, count: usize, kept: Vec<Checkpoint>) -> CheckpointStore {
    match folder {
        Some(folder) => CheckpointStore::OnDisk {
            folder: folder.to_path_buf(),
            count,
        },
        None => CheckpointStore::InMemory(kept),
    }
}
