//! The simulation loop.
//!
//! Every timestep `t` is processed in a fixed order:
//! 1. every population is advanced, consuming the synaptic input delivered at `t - 1`;
//! 2. the deliveries due at `t` are applied to the synaptic input, and the spikes emitted during step 1
//!    are scheduled along the outgoing synapses of their sources;
//! 3. plasticity traces and weights are updated;
//! 4. the recorder is notified of the spikes (not in fast mode).
use serde::{Deserialize, Serialize};

use crate::error::SNNError;
use crate::network::Network;
use crate::recorder::SpikeRecorder;
use crate::router::RouterStats;
use crate::utils::to_timesteps;

/// Options of a simulation run.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SimulationOptions {
    duration: f64,
    fast: bool,
    stop_after: Option<usize>,
    weight_snapshot_interval: Option<usize>,
}

impl SimulationOptions {
    /// Create options for a run of the given duration (in time units).
    /// In fast mode, the simulation is numerically identical but nothing is recorded.
    /// The function returns an error if the duration is negative or not finite.
    pub fn build(duration: f64, fast: bool) -> Result<Self, SNNError> {
        if !(duration.is_finite() && duration >= 0.0) {
            return Err(SNNError::InvalidParameters(format!(
                "The simulation duration must be non-negative and finite, got {}",
                duration
            )));
        }
        Ok(SimulationOptions {
            duration,
            fast,
            stop_after: None,
            weight_snapshot_interval: None,
        })
    }

    /// Stop the run after the given number of timesteps, if it is not over before.
    pub fn with_stop_after(mut self, num_steps: usize) -> Self {
        self.stop_after = Some(num_steps);
        self
    }

    /// Hand the weights to the recorder every `interval` timesteps.
    pub fn with_weight_snapshots(mut self, interval: usize) -> Result<Self, SNNError> {
        if interval == 0 {
            return Err(SNNError::InvalidParameters(
                "The weight snapshot interval must be positive".to_string(),
            ));
        }
        self.weight_snapshot_interval = Some(interval);
        Ok(self)
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn fast(&self) -> bool {
        self.fast
    }

    pub fn stop_after(&self) -> Option<usize> {
        self.stop_after
    }

    pub fn weight_snapshot_interval(&self) -> Option<usize> {
        self.weight_snapshot_interval
    }

    /// Returns the number of timesteps to simulate.
    pub fn num_steps(&self, dt: f64) -> usize {
        let num_steps = to_timesteps(self.duration, dt);
        match self.stop_after {
            Some(stop_after) => num_steps.min(stop_after),
            None => num_steps,
        }
    }
}

/// Summary of a simulation run.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SimulationReport {
    /// Number of timesteps executed.
    pub steps: usize,
    /// Number of spikes emitted by each population.
    pub spike_counts: Vec<usize>,
    pub router: RouterStats,
}

impl SimulationReport {
    /// Returns the mean firing rate (in Hz) of a population of the given size.
    pub fn firing_rate(&self, population_id: usize, size: usize, dt: f64) -> f64 {
        match self.spike_counts.get(population_id) {
            Some(&count) if size > 0 && self.steps > 0 => {
                count as f64 / (size as f64 * self.steps as f64 * dt)
            }
            _ => 0.0,
        }
    }
}

impl Network {
    /// Simulate one timestep and notify the recorder of the spikes.
    /// Returns the IDs of the neurons which fired, in increasing order.
    pub fn step(&mut self, recorder: &mut dyn SpikeRecorder) -> Result<Vec<usize>, SNNError> {
        let timestep = self.timestep;
        let spiked = self.advance()?;
        self.record(timestep, &spiked, recorder);
        Ok(spiked)
    }

    /// Start a new simulation from the initial state (weights excluded) and run it to completion.
    pub fn run(
        &mut self,
        options: &SimulationOptions,
        recorder: &mut dyn SpikeRecorder,
    ) -> Result<SimulationReport, SNNError> {
        self.reset_state();
        let num_steps = options.num_steps(self.dt);
        let progress_interval = (num_steps / 100).max(1);

        log::info!(
            "Simulation started: {} timesteps of {} s ({} mode)",
            num_steps,
            self.dt,
            if options.fast() { "fast" } else { "recorded" }
        );

        let mut weights = vec![];
        for _ in 0..num_steps {
            let timestep = self.timestep;
            let spiked = self.advance()?;

            if !options.fast() {
                self.record(timestep, &spiked, recorder);
                if let Some(interval) = options.weight_snapshot_interval() {
                    if (timestep + 1) % interval == 0 {
                        weights.clear();
                        weights.extend(self.synapses.iter().map(|synapse| synapse.weight()));
                        recorder.record_weights(timestep, &weights);
                    }
                }
            }

            if (timestep + 1) % progress_interval == 0 {
                log::debug!(
                    "Simulation progress: {}% (timestep {})",
                    (timestep + 1) * 100 / num_steps,
                    timestep
                );
            }
        }

        let report = SimulationReport {
            steps: self.timestep,
            spike_counts: self.store.spike_counts().to_vec(),
            router: self.router.stats(),
        };
        log::info!(
            "Simulation done: {} timesteps, {} spikes",
            report.steps,
            report.spike_counts.iter().sum::<usize>()
        );
        Ok(report)
    }

    /// Advance the network by one timestep, without recording anything.
    fn advance(&mut self) -> Result<Vec<usize>, SNNError> {
        let timestep = self.timestep;
        let spiked = self
            .store
            .integrate(timestep, self.dt, &self.input, &mut self.rng)?;
        self.input.end_step();

        let synapses = &self.synapses;
        let effects = &self.effects;
        let input = &mut self.input;
        self.router.advance(timestep, &spiked, |index| {
            let synapse = &synapses[index];
            effects[synapse.group_id()].apply(synapse, input);
        });

        self.plasticity.update(&spiked, &mut self.synapses);
        self.timestep += 1;
        Ok(spiked)
    }

    fn record(&self, timestep: usize, spiked: &[usize], recorder: &mut dyn SpikeRecorder) {
        for &neuron_id in spiked {
            if let Some(population_id) = self.store.population_of(neuron_id) {
                recorder.record_spike(population_id, neuron_id, timestep);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectivityPolicy, SynapseParameters};
    use crate::network::NetworkBuilder;
    use crate::neuron::{LifParameters, PoissonParameters};
    use crate::recorder::{NullRecorder, SpikeLog};
    use crate::synapse::SynapseModel;
    use crate::utils::ValueRange;

    const DT: f64 = 1e-4;

    #[test]
    fn test_options() {
        assert!(SimulationOptions::build(-1.0, false).is_err());
        assert!(SimulationOptions::build(f64::INFINITY, true).is_err());
        assert!(SimulationOptions::build(1.0, false)
            .unwrap()
            .with_weight_snapshots(0)
            .is_err());

        let options = SimulationOptions::build(0.1, false).unwrap();
        assert_eq!(options.num_steps(DT), 1000);
        assert_eq!(options.with_stop_after(10).num_steps(DT), 10);
        assert_eq!(SimulationOptions::build(0.0, true).unwrap().num_steps(DT), 0);
    }

    /// A single neuron kicked by a single input unit firing at every step, through a synapse of the given delay.
    fn relay(delay: usize, model: SynapseModel, scaling: f64, weight: f64) -> Network {
        let mut builder = NetworkBuilder::new(DT).unwrap();
        let input = builder
            .add_input_population(PoissonParameters::new(1, 1.0 / DT))
            .unwrap();
        let neuron = builder.add_population(LifParameters::new(1)).unwrap();
        let mut params = SynapseParameters::new(
            ConnectivityPolicy::AllToAll,
            ValueRange::constant(weight),
            ValueRange::constant(delay as f64 * DT),
        );
        params.model = model;
        params.scaling = scaling;
        builder.add_synapse_group(input, neuron, params).unwrap();
        builder.finalize(0).unwrap()
    }

    #[test]
    fn test_delivery_is_consumed_at_next_step() {
        // the input fires at every step; the first delivery happens at timestep 3 and moves
        // the membrane at timestep 4
        let mut network = relay(3, SynapseModel::Voltage, 1e-3, 1.0);
        for t in 0..4 {
            network.step(&mut NullRecorder).unwrap();
            assert_eq!(network.potential(1), Some(0.0), "timestep {}", t);
        }
        network.step(&mut NullRecorder).unwrap();
        assert!((network.potential(1).unwrap() - 1e-3).abs() < 1e-12);
        assert_eq!(network.router_stats().delivered, 2);
    }

    #[test]
    fn test_current_synapses() {
        // 1 nA during one step of 0.1 ms on 200 pF: 0.5 mV
        let mut network = relay(1, SynapseModel::Current, 1e-9, 1.0);
        network.step(&mut NullRecorder).unwrap();
        network.step(&mut NullRecorder).unwrap();
        assert_eq!(network.potential(1), Some(0.0));
        network.step(&mut NullRecorder).unwrap();
        assert!((network.potential(1).unwrap() - 0.5e-3).abs() < 1e-12);
    }

    #[test]
    fn test_conductance_synapses_drive_towards_reversal() {
        let model = SynapseModel::Conductance {
            tau: 5e-3,
            reversal_potential: -10e-3,
        };
        let mut network = relay(1, model, 1e-9, 1.0);
        for _ in 0..5000 {
            network.step(&mut NullRecorder).unwrap();
            let potential = network.potential(1).unwrap();
            assert!(potential <= 0.0 && potential >= -10e-3);
        }
        assert!(network.potential(1).unwrap() < -5e-3);
    }

    #[test]
    fn test_run_records_spikes_and_weights() {
        let mut network = relay(1, SynapseModel::Voltage, 1e-3, 25.0);
        let options = SimulationOptions::build(0.01, false)
            .unwrap()
            .with_weight_snapshots(20)
            .unwrap();
        let mut log = SpikeLog::new(DT);
        let report = network.run(&options, &mut log).unwrap();

        assert_eq!(report.steps, 100);
        assert_eq!(report.spike_counts[0], 100);
        assert_eq!(log.num_spikes(0), 100);
        // the relay neuron fires once per refractory period
        assert!(report.spike_counts[1] > 0);
        assert_eq!(log.num_spikes(1), report.spike_counts[1]);
        assert!(log.spikes(1).windows(2).all(|w| w[1].1 - w[0].1 > 20));
        assert_eq!(log.weight_snapshots().len(), 5);
        assert_eq!(log.weight_snapshots()[0], (19, vec![25.0]));
        assert!((report.firing_rate(0, 1, DT) - 1.0 / DT).abs() < 1e-6);
    }

    #[test]
    fn test_fast_mode_skips_recording() {
        let mut network = relay(2, SynapseModel::Voltage, 1e-3, 25.0);
        let mut log = SpikeLog::new(DT);
        let recorded = network
            .run(&SimulationOptions::build(0.01, false).unwrap(), &mut log)
            .unwrap();
        let mut silent = SpikeLog::new(DT);
        let fast = network
            .run(&SimulationOptions::build(0.01, true).unwrap(), &mut silent)
            .unwrap();
        assert_eq!(recorded, fast);
        assert!(log.num_spikes(1) > 0);
        assert_eq!(silent, SpikeLog::new(DT));
    }

    #[test]
    fn test_null_recorder_leaves_the_run_unchanged() {
        let options = SimulationOptions::build(0.01, false)
            .unwrap()
            .with_weight_snapshots(10)
            .unwrap();
        let mut network = relay(2, SynapseModel::Voltage, 1e-3, 25.0);
        let mut log = SpikeLog::new(DT);
        let recorded = network.run(&options, &mut log).unwrap();
        let ignored = network.run(&options, &mut NullRecorder).unwrap();
        assert_eq!(recorded, ignored);
        assert!(ignored.spike_counts[1] > 0);
        assert_eq!(log.weight_snapshots().len(), 10);
    }

    #[test]
    fn test_stop_after() {
        let mut network = relay(1, SynapseModel::Voltage, 1e-3, 1.0);
        let options = SimulationOptions::build(1.0, true)
            .unwrap()
            .with_stop_after(25);
        let report = network.run(&options, &mut NullRecorder).unwrap();
        assert_eq!(report.steps, 25);
        assert_eq!(network.timestep(), 25);
    }
}
