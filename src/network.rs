//! Construction of networks and access to their state.
//!
//! A network is described incrementally with a [`NetworkBuilder`], which validates every population,
//! synapse group and plasticity rule as soon as it is added. [`NetworkBuilder::finalize`] then generates
//! the connectivity and returns a [`Network`] whose structure (neurons, synapse endpoints and delays)
//! is fixed for good; only the state and the plastic weights evolve during simulation.
use derivative::Derivative;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::connection::{Synapse, SynapseGroup, SynapseParameters, MAX_SYNAPSES, MAX_SYNAPSE_GROUPS};
use crate::error::SNNError;
use crate::neuron::{
    LifParameters, LifPopulation, NeuronStore, PoissonParameters, PoissonPopulation, Population,
};
use crate::plasticity::{PlasticityEngine, PlasticityRule};
use crate::router::{RouterStats, SpikeRouter};
use crate::synapse::{PostsynapticEffect, SynapticInput};

/// ChaCha stream used to generate the connectivity.
const CONSTRUCTION_STREAM: u64 = 0;
/// ChaCha stream used to draw the input spikes during simulation.
const SIMULATION_STREAM: u64 = 1;

/// A population as declared to the builder.
#[derive(Debug, Clone, PartialEq)]
enum PopulationSpec {
    Lif(LifParameters),
    Poisson(PoissonParameters),
}

impl PopulationSpec {
    fn size(&self) -> usize {
        match self {
            PopulationSpec::Lif(params) => params.size,
            PopulationSpec::Poisson(params) => params.size,
        }
    }
}

/// A synapse group as declared to the builder.
#[derive(Debug, Clone, PartialEq)]
struct GroupSpec {
    source: usize,
    target: usize,
    params: SynapseParameters,
}

/// Incremental description of a network.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkBuilder {
    dt: f64,
    populations: Vec<PopulationSpec>,
    groups: Vec<GroupSpec>,
    rules: Vec<PlasticityRule>,
    buffer_depth: Option<usize>,
}

impl NetworkBuilder {
    /// Create an empty network description with the provided timestep.
    /// The function returns an error if the timestep is not positive.
    pub fn new(dt: f64) -> Result<Self, SNNError> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(SNNError::ConfigurationError(format!(
                "The timestep must be positive and finite, got {}",
                dt
            )));
        }
        Ok(NetworkBuilder {
            dt,
            populations: vec![],
            groups: vec![],
            rules: vec![],
            buffer_depth: None,
        })
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// The total number of neurons declared so far.
    pub fn num_neurons(&self) -> usize {
        self.populations.iter().map(|population| population.size()).sum()
    }

    /// Add a population of leaky integrate-and-fire neurons and return its ID.
    pub fn add_population(&mut self, params: LifParameters) -> Result<usize, SNNError> {
        params.validate()?;
        self.populations.push(PopulationSpec::Lif(params));
        Ok(self.populations.len() - 1)
    }

    /// Add a population of Poisson input units and return its ID.
    pub fn add_input_population(&mut self, params: PoissonParameters) -> Result<usize, SNNError> {
        params.validate(self.dt)?;
        self.populations.push(PopulationSpec::Poisson(params));
        Ok(self.populations.len() - 1)
    }

    /// Register a plasticity rule and return its ID, to be referenced by plastic synapse groups.
    pub fn add_plasticity_rule(&mut self, rule: PlasticityRule) -> Result<usize, SNNError> {
        rule.validate()?;
        self.rules.push(rule);
        Ok(self.rules.len() - 1)
    }

    /// Declare a synapse group from the `source` to the `target` population and return its ID.
    /// Nothing is generated before finalization.
    pub fn add_synapse_group(
        &mut self,
        source: usize,
        target: usize,
        params: SynapseParameters,
    ) -> Result<usize, SNNError> {
        let source_population = self.populations.get(source).ok_or_else(|| {
            SNNError::ConfigurationError(format!("Unknown source population {}", source))
        })?;
        let target_population = self.populations.get(target).ok_or_else(|| {
            SNNError::ConfigurationError(format!("Unknown target population {}", target))
        })?;
        if let PopulationSpec::Poisson(_) = target_population {
            return Err(SNNError::ConfigurationError(format!(
                "Population {} is an input population and cannot receive synapses",
                target
            )));
        }
        if self.groups.len() >= MAX_SYNAPSE_GROUPS {
            return Err(SNNError::ConfigurationError(format!(
                "A network holds at most {} synapse groups",
                MAX_SYNAPSE_GROUPS
            )));
        }

        params.validate(self.dt)?;
        params.policy.validate(
            source_population.size(),
            target_population.size(),
            source == target,
            params.allow_self_loops,
        )?;
        if let Some(rule_id) = params.plasticity {
            let rule = self.rules.get(rule_id).ok_or_else(|| {
                SNNError::ConfigurationError(format!("Unknown plasticity rule {}", rule_id))
            })?;
            let magnitude = params.weight_range.bottom.abs().max(params.weight_range.top.abs());
            if magnitude > rule.w_max() {
                return Err(SNNError::ConfigurationError(format!(
                    "Initial weights up to {} exceed the bound {} of plasticity rule {}",
                    magnitude,
                    rule.w_max(),
                    rule_id
                )));
            }
        }

        self.groups.push(GroupSpec {
            source,
            target,
            params,
        });
        Ok(self.groups.len() - 1)
    }

    /// Request a delay buffer of the given depth instead of the smallest one holding every delay.
    pub fn with_buffer_depth(mut self, depth: usize) -> Self {
        self.buffer_depth = Some(depth);
        self
    }

    /// Upper bound on the number of synapses of the network, saturating at `usize::MAX`.
    pub fn max_synapses(&self) -> usize {
        self.groups.iter().fold(0usize, |acc, group| {
            acc.saturating_add(group.params.policy.max_synapses(
                self.populations[group.source].size(),
                self.populations[group.target].size(),
            ))
        })
    }

    /// Generate the connectivity and build the network.
    ///
    /// The function returns an error if the synapses could exceed the addressable range of the network
    /// (checked before anything is generated), or if a delay does not fit in the requested delay buffer.
    pub fn finalize(self, seed: u64) -> Result<Network, SNNError> {
        let bound = self.max_synapses();
        if bound > MAX_SYNAPSES {
            return Err(SNNError::ConfigurationError(format!(
                "The synapse groups may generate up to {} synapses, more than the maximum of {}",
                bound, MAX_SYNAPSES
            )));
        }

        let dt = self.dt;
        let mut start = 0;
        let mut populations = Vec::with_capacity(self.populations.len());
        for (id, spec) in self.populations.into_iter().enumerate() {
            let size = spec.size();
            populations.push(match spec {
                PopulationSpec::Lif(params) => Population::Lif(LifPopulation::new(id, start, params)),
                PopulationSpec::Poisson(params) => {
                    Population::Poisson(PoissonPopulation::new(id, start, params, dt)?)
                }
            });
            start += size;
        }
        let num_neurons = start;

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(CONSTRUCTION_STREAM);
        let mut synapses = Vec::new();
        let mut groups = Vec::with_capacity(self.groups.len());
        for (id, spec) in self.groups.into_iter().enumerate() {
            groups.push(SynapseGroup::generate(
                id,
                &populations[spec.source],
                &populations[spec.target],
                spec.params,
                dt,
                &mut synapses,
                &mut rng,
            )?);
        }

        let depth = self
            .buffer_depth
            .unwrap_or_else(|| SpikeRouter::min_depth(&synapses));
        let router = SpikeRouter::new(num_neurons, &synapses, depth)?;

        let mut input = SynapticInput::new(num_neurons);
        let effects = groups
            .iter()
            .map(|group| {
                PostsynapticEffect::new(
                    input.resolve(&group.params().model, dt),
                    group.params().scaling,
                )
            })
            .collect();
        let plasticity = PlasticityEngine::new(num_neurons, &self.rules, &synapses, &groups, dt);

        log::info!(
            "Network finalized: {} neurons in {} populations, {} synapses in {} groups, delay buffer of depth {}",
            num_neurons,
            populations.len(),
            synapses.len(),
            groups.len(),
            depth
        );

        Ok(Network {
            dt,
            seed,
            store: NeuronStore::new(populations),
            groups,
            synapses,
            effects,
            input,
            router,
            rules: self.rules,
            plasticity,
            rng: simulation_rng(seed),
            timestep: 0,
        })
    }
}

fn simulation_rng(seed: u64) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(SIMULATION_STREAM);
    rng
}

/// A finalized spiking neural network, ready to be simulated.
#[derive(Derivative, Clone)]
#[derivative(Debug)]
pub struct Network {
    pub(crate) dt: f64,
    pub(crate) seed: u64,
    pub(crate) store: NeuronStore,
    pub(crate) groups: Vec<SynapseGroup>,
    #[derivative(Debug = "ignore")]
    pub(crate) synapses: Vec<Synapse>,
    #[derivative(Debug = "ignore")]
    pub(crate) effects: Vec<PostsynapticEffect>,
    #[derivative(Debug = "ignore")]
    pub(crate) input: SynapticInput,
    #[derivative(Debug = "ignore")]
    pub(crate) router: SpikeRouter,
    pub(crate) rules: Vec<PlasticityRule>,
    #[derivative(Debug = "ignore")]
    pub(crate) plasticity: PlasticityEngine,
    #[derivative(Debug = "ignore")]
    pub(crate) rng: ChaCha8Rng,
    pub(crate) timestep: usize,
}

impl Network {
    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Returns the index of the next timestep to be simulated.
    pub fn timestep(&self) -> usize {
        self.timestep
    }

    /// The total number of neurons, input units included.
    pub fn num_neurons(&self) -> usize {
        self.store.num_neurons()
    }

    pub fn num_synapses(&self) -> usize {
        self.synapses.len()
    }

    pub fn populations(&self) -> &[Population] {
        self.store.populations()
    }

    pub fn population(&self, population_id: usize) -> Option<&Population> {
        self.store.population(population_id)
    }

    /// Returns the ID of the population containing the provided neuron.
    pub fn population_of(&self, neuron_id: usize) -> Option<usize> {
        self.store.population_of(neuron_id)
    }

    pub fn groups(&self) -> &[SynapseGroup] {
        &self.groups
    }

    /// Returns all synapses, grouped by synapse group in order of creation.
    pub fn synapses(&self) -> &[Synapse] {
        &self.synapses
    }

    /// Returns the synapses of a group.
    pub fn group_synapses(&self, group_id: usize) -> Option<&[Synapse]> {
        self.groups
            .get(group_id)
            .map(|group| &self.synapses[group.synapses()])
    }

    /// Returns the current weight of every synapse.
    pub fn weights(&self) -> Vec<f64> {
        self.synapses.iter().map(|synapse| synapse.weight()).collect()
    }

    pub fn plasticity_rules(&self) -> &[PlasticityRule] {
        &self.rules
    }

    /// Returns the membrane potential of a neuron, or `None` for input units and unknown IDs.
    pub fn potential(&self, neuron_id: usize) -> Option<f64> {
        let population = self.store.population(self.store.population_of(neuron_id)?)?;
        population
            .states()
            .map(|states| states[neuron_id - population.start()].potential())
    }

    /// Returns the membrane potentials of the neurons of a population, or `None` for input populations.
    pub fn potentials(&self, population_id: usize) -> Option<Vec<f64>> {
        self.store
            .population(population_id)?
            .states()
            .map(|states| states.iter().map(|state| state.potential()).collect())
    }

    /// Returns the number of spikes emitted by each population since the start of the simulation.
    pub fn spike_counts(&self) -> &[usize] {
        self.store.spike_counts()
    }

    pub fn router_stats(&self) -> RouterStats {
        self.router.stats()
    }

    /// Returns the number of spike deliveries still in flight.
    pub fn pending_events(&self) -> usize {
        self.router.pending()
    }

    pub fn buffer_depth(&self) -> usize {
        self.router.depth()
    }

    /// Returns the presynaptic and postsynaptic traces of a neuron for a plasticity rule.
    pub fn traces(&self, rule_id: usize, neuron_id: usize) -> Option<(f64, f64)> {
        Some((
            self.plasticity.pre_trace(rule_id, neuron_id)?,
            self.plasticity.post_trace(rule_id, neuron_id)?,
        ))
    }

    /// Restore the initial dynamical state: membrane potentials, refractory timers, pending deliveries,
    /// synaptic input, plasticity traces, clock and input spike generator. Weights are kept.
    pub fn reset_state(&mut self) {
        self.store.reset();
        self.input.reset();
        self.router.reset();
        self.plasticity.reset();
        self.rng = simulation_rng(self.seed);
        self.timestep = 0;
    }
}
