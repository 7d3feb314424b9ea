//! This module provides the neuron populations composing a network and the store holding their state.
//!
//! Two kinds of populations share the same update contract (see [`Population::update`]):
//! - leaky integrate-and-fire populations, integrating `Cm dV/dt = -g0 (V - V0) + I_syn + I_background`
//!   with a forward Euler step,
//! - Poisson input populations, whose units fire independently with a prescribed rate.
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Geometric};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::SNNError;
use crate::synapse::{InputView, SynapticInput};
use crate::{MIN_NEURONS_PAR, TIME_RESOLUTION};

/// Parameters shared by all neurons of a leaky integrate-and-fire population (SI units).
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct LifParameters {
    /// Number of neurons in the population.
    pub size: usize,
    /// Membrane capacitance `Cm`.
    pub capacitance: f64,
    /// Leak conductance `g0`.
    pub leak_conductance: f64,
    /// Resting potential `V0`.
    pub resting_potential: f64,
    /// Potential right after a spike.
    pub reset_potential: f64,
    /// Potential at which the neuron fires.
    pub threshold: f64,
    /// Absolute refractory period.
    pub refractory_period: f64,
    /// Constant current injected into every neuron.
    pub background_current: f64,
}

impl Default for LifParameters {
    fn default() -> Self {
        LifParameters {
            size: 1,
            capacitance: 200e-12,
            leak_conductance: 10e-9,
            resting_potential: 0.0,
            reset_potential: 0.0,
            threshold: 20e-3,
            refractory_period: 2e-3,
            background_current: 0.0,
        }
    }
}

impl LifParameters {
    /// Default parameters for a population of the given size.
    pub fn new(size: usize) -> Self {
        LifParameters {
            size,
            ..Default::default()
        }
    }

    /// Returns the membrane time constant `Cm / g0`.
    pub fn membrane_time_constant(&self) -> f64 {
        self.capacitance / self.leak_conductance
    }

    pub fn validate(&self) -> Result<(), SNNError> {
        if self.size == 0 {
            return Err(SNNError::ConfigurationError(
                "A population must contain at least one neuron".to_string(),
            ));
        }
        let values = [
            self.capacitance,
            self.leak_conductance,
            self.resting_potential,
            self.reset_potential,
            self.threshold,
            self.refractory_period,
            self.background_current,
        ];
        if values.iter().any(|value| !value.is_finite()) {
            return Err(SNNError::ConfigurationError(
                "Neuron parameters must be finite".to_string(),
            ));
        }
        if self.capacitance <= 0.0 {
            return Err(SNNError::ConfigurationError(
                "The membrane capacitance must be positive".to_string(),
            ));
        }
        if self.leak_conductance < 0.0 {
            return Err(SNNError::ConfigurationError(
                "The leak conductance must be non-negative".to_string(),
            ));
        }
        if self.threshold <= self.reset_potential {
            return Err(SNNError::ConfigurationError(
                "The firing threshold must be above the reset potential".to_string(),
            ));
        }
        if self.refractory_period < 0.0 {
            return Err(SNNError::ConfigurationError(
                "The refractory period must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parameters of a population of Poisson input units.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct PoissonParameters {
    /// Number of input units.
    pub size: usize,
    /// Firing rate (in Hz) of every unit.
    pub rate: f64,
    /// Optional firing rate of each unit, overriding `rate`.
    pub rates: Option<Vec<f64>>,
}

impl PoissonParameters {
    pub fn new(size: usize, rate: f64) -> Self {
        PoissonParameters {
            size,
            rate,
            rates: None,
        }
    }

    /// Set one firing rate per unit.
    pub fn with_rates(mut self, rates: Vec<f64>) -> Self {
        self.rates = Some(rates);
        self
    }

    /// Returns the firing rate of the unit at the provided index within the population, if any.
    pub fn rate_of(&self, index: usize) -> Option<f64> {
        match &self.rates {
            Some(rates) => rates.get(index).copied(),
            None if index < self.size => Some(self.rate),
            None => None,
        }
    }

    pub fn validate(&self, dt: f64) -> Result<(), SNNError> {
        if self.size == 0 {
            return Err(SNNError::ConfigurationError(
                "A population must contain at least one neuron".to_string(),
            ));
        }
        if let Some(rates) = &self.rates {
            if rates.len() != self.size {
                return Err(SNNError::ConfigurationError(format!(
                    "Expected {} input rates, got {}",
                    self.size,
                    rates.len()
                )));
            }
        }
        let rates = self.rates.as_deref().unwrap_or(std::slice::from_ref(&self.rate));
        if rates
            .iter()
            .any(|rate| !rate.is_finite() || *rate < 0.0 || rate * dt > 1.0)
        {
            return Err(SNNError::ConfigurationError(
                "Input rates must be finite, non-negative and at most one spike per timestep"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// The dynamical state of a leaky integrate-and-fire neuron.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct NeuronState {
    potential: f64,
    refractory_remaining: f64,
    last_spike: Option<usize>,
}

/// Outcome of the integration of a single neuron over one timestep.
enum StepOutcome {
    Quiet,
    Spiked,
    Unstable,
}

impl NeuronState {
    pub fn new(potential: f64) -> Self {
        NeuronState {
            potential,
            refractory_remaining: 0.0,
            last_spike: None,
        }
    }

    /// Returns the membrane potential.
    pub fn potential(&self) -> f64 {
        self.potential
    }

    /// Returns the remaining refractory time.
    pub fn refractory_remaining(&self) -> f64 {
        self.refractory_remaining
    }

    /// Returns the timestep of the last spike, if any.
    pub fn last_spike(&self) -> Option<usize> {
        self.last_spike
    }

    pub fn is_refractory(&self) -> bool {
        self.refractory_remaining > TIME_RESOLUTION
    }

    /// Advance the neuron by one timestep.
    /// While refractory, the potential is clamped to the reset value and the input is discarded.
    fn step(
        &mut self,
        params: &LifParameters,
        dt: f64,
        timestep: usize,
        input: &InputView,
        index: usize,
    ) -> StepOutcome {
        if self.is_refractory() {
            self.refractory_remaining = (self.refractory_remaining - dt).max(0.0);
            self.potential = params.reset_potential;
            return StepOutcome::Quiet;
        }

        let current = input.current(index, self.potential);
        let leak = -params.leak_conductance * (self.potential - params.resting_potential);
        self.potential += dt / params.capacitance * (leak + current + params.background_current)
            + input.voltage_jump(index);

        if !self.potential.is_finite() {
            return StepOutcome::Unstable;
        }

        if self.potential >= params.threshold {
            self.potential = params.reset_potential;
            self.refractory_remaining = params.refractory_period;
            self.last_spike = Some(timestep);
            return StepOutcome::Spiked;
        }
        StepOutcome::Quiet
    }
}

/// A population of leaky integrate-and-fire neurons.
#[derive(Debug, Clone)]
pub struct LifPopulation {
    id: usize,
    start: usize,
    params: LifParameters,
    states: Vec<NeuronState>,
}

impl LifPopulation {
    pub fn new(id: usize, start: usize, params: LifParameters) -> Self {
        let states = vec![NeuronState::new(params.resting_potential); params.size];
        LifPopulation {
            id,
            start,
            params,
            states,
        }
    }

    pub fn params(&self) -> &LifParameters {
        &self.params
    }

    pub fn states(&self) -> &[NeuronState] {
        &self.states
    }

    /// Integrate all neurons over one timestep, using parallel computation if the population is large.
    /// Returns the (global) IDs of the neurons which fired, in increasing order.
    fn integrate(
        &mut self,
        timestep: usize,
        dt: f64,
        input: &SynapticInput,
    ) -> Result<Vec<usize>, SNNError> {
        let start = self.start;
        let params = &self.params;
        let view = input.view(start, start + params.size);

        let outcome = |(index, state): (usize, &mut NeuronState)| {
            match state.step(params, dt, timestep, &view, index) {
                StepOutcome::Quiet => None,
                StepOutcome::Spiked => Some(Ok(start + index)),
                StepOutcome::Unstable => Some(Err(SNNError::NumericalInstability {
                    neuron_id: start + index,
                    timestep,
                })),
            }
        };

        if self.states.len() >= MIN_NEURONS_PAR {
            self.states
                .par_iter_mut()
                .enumerate()
                .filter_map(outcome)
                .collect()
        } else {
            self.states
                .iter_mut()
                .enumerate()
                .filter_map(outcome)
                .collect()
        }
    }

    fn reset(&mut self) {
        let rest = self.params.resting_potential;
        self.states
            .iter_mut()
            .for_each(|state| *state = NeuronState::new(rest));
    }
}

/// The way a Poisson population draws its spikes at every timestep.
#[derive(Debug, Clone)]
enum SpikeSampler {
    Silent,
    Always,
    /// Identical rates: the gap between two consecutive firing units is geometric.
    Geometric(Geometric),
    /// One firing probability per unit.
    Bernoulli(Vec<f64>),
}

/// A population of independent Poisson input units.
#[derive(Debug, Clone)]
pub struct PoissonPopulation {
    id: usize,
    start: usize,
    params: PoissonParameters,
    sampler: SpikeSampler,
}

impl PoissonPopulation {
    /// The parameters must have been validated for the provided timestep.
    pub fn new(id: usize, start: usize, params: PoissonParameters, dt: f64) -> Result<Self, SNNError> {
        let sampler = match &params.rates {
            Some(rates) => SpikeSampler::Bernoulli(rates.iter().map(|rate| rate * dt).collect()),
            None => {
                let p = params.rate * dt;
                if p <= 0.0 {
                    SpikeSampler::Silent
                } else if p >= 1.0 {
                    SpikeSampler::Always
                } else {
                    SpikeSampler::Geometric(Geometric::new(p).map_err(|e| {
                        SNNError::ConfigurationError(format!("Invalid input rate: {}", e))
                    })?)
                }
            }
        };
        Ok(PoissonPopulation {
            id,
            start,
            params,
            sampler,
        })
    }

    pub fn params(&self) -> &PoissonParameters {
        &self.params
    }

    /// Draw the units firing during the current timestep.
    /// Returns their (global) IDs in increasing order.
    fn sample<R: Rng>(&self, rng: &mut R) -> Vec<usize> {
        let size = self.params.size;
        match &self.sampler {
            SpikeSampler::Silent => vec![],
            SpikeSampler::Always => (self.start..self.start + size).collect(),
            SpikeSampler::Geometric(gaps) => {
                let mut spiked = vec![];
                let mut index = gaps.sample(rng);
                while index < size as u64 {
                    spiked.push(self.start + index as usize);
                    index = index.saturating_add(1).saturating_add(gaps.sample(rng));
                }
                spiked
            }
            SpikeSampler::Bernoulli(probabilities) => probabilities
                .iter()
                .enumerate()
                .filter(|(_, p)| rng.gen::<f64>() < **p)
                .map(|(index, _)| self.start + index)
                .collect(),
        }
    }
}

/// A population of neurons, occupying a contiguous range of global neuron IDs.
#[derive(Debug, Clone)]
pub enum Population {
    Lif(LifPopulation),
    Poisson(PoissonPopulation),
}

impl Population {
    /// Returns the population ID, i.e., its rank of creation.
    pub fn id(&self) -> usize {
        match self {
            Population::Lif(population) => population.id,
            Population::Poisson(population) => population.id,
        }
    }

    /// Returns the global ID of the first neuron of the population.
    pub fn start(&self) -> usize {
        match self {
            Population::Lif(population) => population.start,
            Population::Poisson(population) => population.start,
        }
    }

    /// Returns the number of neurons of the population.
    pub fn size(&self) -> usize {
        match self {
            Population::Lif(population) => population.params.size,
            Population::Poisson(population) => population.params.size,
        }
    }

    /// Returns the global ID following the last neuron of the population.
    pub fn end(&self) -> usize {
        self.start() + self.size()
    }

    pub fn contains(&self, neuron_id: usize) -> bool {
        (self.start()..self.end()).contains(&neuron_id)
    }

    /// Returns true for input populations, which cannot receive synapses.
    pub fn is_input(&self) -> bool {
        matches!(self, Population::Poisson(_))
    }

    /// Returns the membrane state of the neurons, if the population has one.
    pub fn states(&self) -> Option<&[NeuronState]> {
        match self {
            Population::Lif(population) => Some(population.states()),
            Population::Poisson(_) => None,
        }
    }

    /// Advance the population by one timestep and return the IDs of the neurons which fired.
    pub fn update(
        &mut self,
        timestep: usize,
        dt: f64,
        input: &SynapticInput,
        rng: &mut ChaCha8Rng,
    ) -> Result<Vec<usize>, SNNError> {
        match self {
            Population::Lif(population) => population.integrate(timestep, dt, input),
            Population::Poisson(population) => Ok(population.sample(rng)),
        }
    }

    /// Restore the initial state of the population.
    pub fn reset(&mut self) {
        if let Population::Lif(population) = self {
            population.reset();
        }
    }
}

/// The state of all neurons of a network, organized in populations.
#[derive(Debug, Clone)]
pub struct NeuronStore {
    populations: Vec<Population>,
    spike_counts: Vec<usize>,
}

impl NeuronStore {
    pub fn new(populations: Vec<Population>) -> Self {
        let spike_counts = vec![0; populations.len()];
        NeuronStore {
            populations,
            spike_counts,
        }
    }

    pub fn populations(&self) -> &[Population] {
        &self.populations
    }

    pub fn population(&self, population_id: usize) -> Option<&Population> {
        self.populations.get(population_id)
    }

    /// The total number of neurons, input units included.
    pub fn num_neurons(&self) -> usize {
        self.populations.last().map_or(0, |population| population.end())
    }

    /// Returns the ID of the population containing the provided neuron.
    pub fn population_of(&self, neuron_id: usize) -> Option<usize> {
        let index = self
            .populations
            .partition_point(|population| population.end() <= neuron_id);
        self.populations
            .get(index)
            .filter(|population| population.contains(neuron_id))
            .map(|population| population.id())
    }

    /// Number of spikes emitted by each population since the last reset.
    pub fn spike_counts(&self) -> &[usize] {
        &self.spike_counts
    }

    /// Advance every population by one timestep.
    /// Returns the IDs of all neurons which fired, in increasing order.
    pub fn integrate(
        &mut self,
        timestep: usize,
        dt: f64,
        input: &SynapticInput,
        rng: &mut ChaCha8Rng,
    ) -> Result<Vec<usize>, SNNError> {
        let mut spiked = vec![];
        for population in self.populations.iter_mut() {
            let new_spikes = population.update(timestep, dt, input, rng)?;
            self.spike_counts[population.id()] += new_spikes.len();
            spiked.extend(new_spikes);
        }
        Ok(spiked)
    }

    pub fn reset(&mut self) {
        self.populations
            .iter_mut()
            .for_each(|population| population.reset());
        self.spike_counts.iter_mut().for_each(|count| *count = 0);
    }
}
