//! Postsynaptic models turning delivered spikes into membrane input.
//!
//! Every delivered spike contributes `weight × λ` to its target neuron, where λ is the biological scaling
//! constant of the synapse group. Excitation and inhibition are encoded by the sign of the weight only.
//! Depending on the [`SynapseModel`] of the group, the contribution is
//! - a voltage jump added to the membrane potential right after the next integration step,
//! - a current entering the membrane equation during the next integration step,
//! - an increment of an exponentially decaying conductance, driving a current `g (E_rev - V)`.
//!
//! All contributions are accumulated additively, so deliveries into the same neuron can be applied in any order.
use serde::{Deserialize, Serialize};

use crate::connection::Synapse;
use crate::error::SNNError;

/// The way a synapse group acts on its target neurons.
#[derive(Debug, Default, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub enum SynapseModel {
    /// Instantaneous jump of the membrane potential.
    #[default]
    Voltage,
    /// Current injected during the next integration step.
    Current,
    /// Conductance with exponential decay (time constant `tau`) and reversal potential.
    Conductance { tau: f64, reversal_potential: f64 },
}

impl SynapseModel {
    pub fn validate(&self) -> Result<(), SNNError> {
        if let SynapseModel::Conductance {
            tau,
            reversal_potential,
        } = self
        {
            if !(tau.is_finite() && *tau > 0.0) {
                return Err(SNNError::ConfigurationError(
                    "The conductance time constant must be positive and finite".to_string(),
                ));
            }
            if !reversal_potential.is_finite() {
                return Err(SNNError::ConfigurationError(
                    "The reversal potential must be finite".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// The input buffer receiving the contributions of a synapse group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputTarget {
    Voltage,
    Current,
    Channel(usize),
}

/// The resolved effect of one synapse group on its targets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostsynapticEffect {
    target: InputTarget,
    scaling: f64,
}

impl PostsynapticEffect {
    pub fn new(target: InputTarget, scaling: f64) -> Self {
        PostsynapticEffect { target, scaling }
    }

    pub fn target(&self) -> InputTarget {
        self.target
    }

    /// The biological scaling constant λ.
    pub fn scaling(&self) -> f64 {
        self.scaling
    }

    /// Add the contribution of a delivered spike to the input of the synapse's target neuron.
    pub fn apply(&self, synapse: &Synapse, input: &mut SynapticInput) {
        input.accumulate(
            self.target,
            synapse.target_id(),
            synapse.weight() * self.scaling,
        );
    }
}

/// An exponentially decaying conductance per neuron, shared by all synapse groups with the same kinetics.
#[derive(Debug, Clone, PartialEq)]
pub struct ConductanceChannel {
    tau: f64,
    reversal_potential: f64,
    decay: f64,
    conductance: Vec<f64>,
}

impl ConductanceChannel {
    pub fn tau(&self) -> f64 {
        self.tau
    }

    pub fn reversal_potential(&self) -> f64 {
        self.reversal_potential
    }

    pub fn conductance(&self) -> &[f64] {
        &self.conductance
    }
}

/// Accumulated synaptic input of every neuron for the next integration step.
#[derive(Debug, Clone, PartialEq)]
pub struct SynapticInput {
    voltage: Vec<f64>,
    current: Vec<f64>,
    channels: Vec<ConductanceChannel>,
}

impl SynapticInput {
    pub fn new(num_neurons: usize) -> Self {
        SynapticInput {
            voltage: vec![0.0; num_neurons],
            current: vec![0.0; num_neurons],
            channels: vec![],
        }
    }

    /// Returns the buffer receiving the contributions of the given model.
    /// Conductance channels are created on demand and shared between models with identical kinetics.
    pub fn resolve(&mut self, model: &SynapseModel, dt: f64) -> InputTarget {
        match model {
            SynapseModel::Voltage => InputTarget::Voltage,
            SynapseModel::Current => InputTarget::Current,
            SynapseModel::Conductance {
                tau,
                reversal_potential,
            } => {
                if let Some(id) = self.channels.iter().position(|channel| {
                    channel.tau == *tau && channel.reversal_potential == *reversal_potential
                }) {
                    return InputTarget::Channel(id);
                }
                self.channels.push(ConductanceChannel {
                    tau: *tau,
                    reversal_potential: *reversal_potential,
                    decay: (-dt / tau).exp(),
                    conductance: vec![0.0; self.voltage.len()],
                });
                InputTarget::Channel(self.channels.len() - 1)
            }
        }
    }

    /// Add a contribution to the input of a neuron.
    pub fn accumulate(&mut self, target: InputTarget, neuron_id: usize, value: f64) {
        match target {
            InputTarget::Voltage => self.voltage[neuron_id] += value,
            InputTarget::Current => self.current[neuron_id] += value,
            InputTarget::Channel(id) => self.channels[id].conductance[neuron_id] += value,
        }
    }

    /// A read-only view on the input of the neurons in the provided range of IDs.
    pub fn view(&self, start: usize, end: usize) -> InputView<'_> {
        InputView {
            voltage: &self.voltage[start..end],
            current: &self.current[start..end],
            channels: self
                .channels
                .iter()
                .map(|channel| (channel.reversal_potential, &channel.conductance[start..end]))
                .collect(),
        }
    }

    /// Discard the consumed voltage and current input and let every conductance decay by one timestep.
    pub fn end_step(&mut self) {
        self.voltage.iter_mut().for_each(|v| *v = 0.0);
        self.current.iter_mut().for_each(|i| *i = 0.0);
        for channel in self.channels.iter_mut() {
            let decay = channel.decay;
            channel.conductance.iter_mut().for_each(|g| *g *= decay);
        }
    }

    /// Clear all pending input and conductances.
    pub fn reset(&mut self) {
        self.voltage.iter_mut().for_each(|v| *v = 0.0);
        self.current.iter_mut().for_each(|i| *i = 0.0);
        for channel in self.channels.iter_mut() {
            channel.conductance.iter_mut().for_each(|g| *g = 0.0);
        }
    }

    pub fn channels(&self) -> &[ConductanceChannel] {
        &self.channels
    }

    /// Returns the pending voltage input of a neuron.
    pub fn pending_voltage(&self, neuron_id: usize) -> f64 {
        self.voltage[neuron_id]
    }

    /// Returns the pending current input of a neuron.
    pub fn pending_current(&self, neuron_id: usize) -> f64 {
        self.current[neuron_id]
    }
}

/// Input of a contiguous range of neurons, indexed relative to the start of the range.
#[derive(Debug)]
pub struct InputView<'a> {
    voltage: &'a [f64],
    current: &'a [f64],
    channels: Vec<(f64, &'a [f64])>,
}

impl<'a> InputView<'a> {
    /// The voltage jump to apply after the integration step.
    pub fn voltage_jump(&self, index: usize) -> f64 {
        self.voltage[index]
    }

    /// The total synaptic current at the provided membrane potential.
    pub fn current(&self, index: usize, potential: f64) -> f64 {
        self.channels
            .iter()
            .fold(self.current[index], |acc, (reversal_potential, conductance)| {
                acc + conductance[index] * (reversal_potential - potential)
            })
    }
}
