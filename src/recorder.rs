//! Observation of a running simulation.
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::SNNError;

/// Receives the activity of a network while it is simulated.
/// Recorders are never called in fast mode.
pub trait SpikeRecorder {
    /// Called once per spike, after the timestep during which the neuron fired has been fully processed.
    fn record_spike(&mut self, population_id: usize, neuron_id: usize, timestep: usize);

    /// Called with the weights of all synapses (in arena order) whenever a snapshot is due.
    fn record_weights(&mut self, _timestep: usize, _weights: &[f64]) {}
}

/// A recorder ignoring everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRecorder;

impl SpikeRecorder for NullRecorder {
    fn record_spike(&mut self, _population_id: usize, _neuron_id: usize, _timestep: usize) {}
}

/// An in-memory record of the spikes of every population.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct SpikeLog {
    dt: f64,
    /// Pairs of neuron ID and timestep, for each population.
    spikes: Vec<Vec<(usize, usize)>>,
    /// Weight snapshots, with the timestep at which they were taken.
    weights: Vec<(usize, Vec<f64>)>,
}

impl SpikeLog {
    pub fn new(dt: f64) -> Self {
        SpikeLog {
            dt,
            spikes: vec![],
            weights: vec![],
        }
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Returns the recorded spikes of a population, in the order they were emitted.
    pub fn spikes(&self, population_id: usize) -> &[(usize, usize)] {
        self.spikes
            .get(population_id)
            .map(|spikes| spikes.as_slice())
            .unwrap_or(&[])
    }

    /// Returns the firing times (in time units) of the recorded spikes of a population.
    pub fn firing_times(&self, population_id: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let dt = self.dt;
        self.spikes(population_id)
            .iter()
            .map(move |&(neuron_id, timestep)| (neuron_id, timestep as f64 * dt))
    }

    pub fn num_spikes(&self, population_id: usize) -> usize {
        self.spikes(population_id).len()
    }

    /// Returns the mean firing rate (in Hz) of a population of the given size over the given number of timesteps.
    pub fn firing_rate(&self, population_id: usize, size: usize, num_steps: usize) -> f64 {
        if size == 0 || num_steps == 0 {
            return 0.0;
        }
        self.num_spikes(population_id) as f64 / (size as f64 * num_steps as f64 * self.dt)
    }

    pub fn weight_snapshots(&self) -> &[(usize, Vec<f64>)] {
        &self.weights
    }

    /// Forget everything recorded so far.
    pub fn clear(&mut self) {
        self.spikes.clear();
        self.weights.clear();
    }

    /// Save the log to a file, as JSON.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), SNNError> {
        let file = File::create(path).map_err(|e| SNNError::IOError(e.to_string()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self).map_err(|e| SNNError::IOError(e.to_string()))?;
        writer.flush().map_err(|e| SNNError::IOError(e.to_string()))
    }

    /// Load a log from a file.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, SNNError> {
        let file = File::open(path).map_err(|e| SNNError::IOError(e.to_string()))?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| SNNError::IOError(e.to_string()))
    }
}

impl SpikeRecorder for SpikeLog {
    fn record_spike(&mut self, population_id: usize, neuron_id: usize, timestep: usize) {
        if self.spikes.len() <= population_id {
            self.spikes.resize_with(population_id + 1, Vec::new);
        }
        self.spikes[population_id].push((neuron_id, timestep));
    }

    fn record_weights(&mut self, timestep: usize, weights: &[f64]) {
        self.weights.push((timestep, weights.to_vec()));
    }
}
