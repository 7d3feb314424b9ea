//! Module implementing the synapses of a network and their random generation between populations.
use itertools::iproduct;
use rand::Rng;
use rand_distr::{Distribution, Geometric};
use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::error::SNNError;
use crate::neuron::Population;
use crate::synapse::SynapseModel;
use crate::utils::{delay_to_timesteps, RangeSampler, ValueRange};

/// Maximum number of synapses of a network, bounded by the indices stored in the spike router.
pub const MAX_SYNAPSES: usize = u32::MAX as usize;
/// Maximum number of synapse groups of a network.
pub const MAX_SYNAPSE_GROUPS: usize = u16::MAX as usize;
/// Maximum conduction delay, in timesteps, bounding the depth of the delay buffer.
pub const MAX_DELAY_TIMESTEPS: usize = 1 << 20;

/// Represents a synapse between two neurons.
/// The source, the target and the delay are fixed once created; only the weight can evolve.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct Synapse {
    source_id: u32,
    target_id: u32,
    /// Conduction delay, in timesteps (at least one).
    delay: u32,
    group_id: u16,
    plastic: bool,
    weight: f64,
}

impl Synapse {
    pub fn new(
        source_id: usize,
        target_id: usize,
        delay: usize,
        weight: f64,
        plastic: bool,
        group_id: usize,
    ) -> Self {
        Synapse {
            source_id: source_id as u32,
            target_id: target_id as u32,
            // out-of-range delays saturate and are rejected by the router, never wrapped
            delay: u32::try_from(delay).unwrap_or(u32::MAX),
            group_id: group_id as u16,
            plastic,
            weight,
        }
    }

    /// Returns the ID of the source (presynaptic) neuron.
    pub fn source_id(&self) -> usize {
        self.source_id as usize
    }

    /// Returns the ID of the target (postsynaptic) neuron.
    pub fn target_id(&self) -> usize {
        self.target_id as usize
    }

    /// Returns the delay of the synapse, in timesteps.
    pub fn delay(&self) -> usize {
        self.delay as usize
    }

    /// Returns the ID of the group the synapse belongs to.
    pub fn group_id(&self) -> usize {
        self.group_id as usize
    }

    /// Returns true if the weight of the synapse is subject to plasticity.
    pub fn is_plastic(&self) -> bool {
        self.plastic
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn set_weight(&mut self, weight: f64) {
        self.weight = weight;
    }
}

/// The rule deciding which pairs of neurons are connected.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub enum ConnectivityPolicy {
    /// Every source is connected to every target.
    AllToAll,
    /// The i-th source is connected to the i-th target; both populations must have the same size.
    OneToOne,
    /// Every ordered pair is connected independently with the given probability.
    Random { probability: f64 },
    /// Every target receives exactly this number of inputs, from sources drawn uniformly with replacement.
    FixedInDegree(usize),
    /// Every source sends exactly this number of outputs, to targets drawn uniformly with replacement.
    FixedOutDegree(usize),
}

impl ConnectivityPolicy {
    /// Check that the policy is compatible with the populations it connects.
    pub fn validate(
        &self,
        num_sources: usize,
        num_targets: usize,
        recurrent: bool,
        allow_self_loops: bool,
    ) -> Result<(), SNNError> {
        match self {
            ConnectivityPolicy::AllToAll => Ok(()),
            ConnectivityPolicy::OneToOne => {
                if num_sources != num_targets {
                    return Err(SNNError::ConfigurationError(format!(
                        "One-to-one connectivity requires populations of equal sizes, got {} and {}",
                        num_sources, num_targets
                    )));
                }
                if recurrent && !allow_self_loops {
                    return Err(SNNError::ConfigurationError(
                        "One-to-one connectivity within a population requires self-loops"
                            .to_string(),
                    ));
                }
                Ok(())
            }
            ConnectivityPolicy::Random { probability } => {
                if !(0.0..=1.0).contains(probability) {
                    return Err(SNNError::ConfigurationError(format!(
                        "The connection probability must lie in [0, 1], got {}",
                        probability
                    )));
                }
                Ok(())
            }
            ConnectivityPolicy::FixedInDegree(degree) | ConnectivityPolicy::FixedOutDegree(degree) => {
                if *degree > 0 && recurrent && !allow_self_loops && num_sources < 2 {
                    return Err(SNNError::ConfigurationError(
                        "A fixed degree within a single-neuron population requires self-loops"
                            .to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Upper bound on the number of synapses generated by the policy.
    pub fn max_synapses(&self, num_sources: usize, num_targets: usize) -> usize {
        match self {
            ConnectivityPolicy::AllToAll => num_sources.saturating_mul(num_targets),
            ConnectivityPolicy::OneToOne => num_sources.min(num_targets),
            ConnectivityPolicy::Random { probability } => {
                if *probability > 0.0 {
                    num_sources.saturating_mul(num_targets)
                } else {
                    0
                }
            }
            ConnectivityPolicy::FixedInDegree(degree) => num_targets.saturating_mul(*degree),
            ConnectivityPolicy::FixedOutDegree(degree) => num_sources.saturating_mul(*degree),
        }
    }
}

/// Parameters of a synapse group.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SynapseParameters {
    pub policy: ConnectivityPolicy,
    /// Initial weights are drawn uniformly in this range.
    pub weight_range: ValueRange,
    /// Delays (in time units) are drawn uniformly in this range, then rounded to whole timesteps.
    pub delay_range: ValueRange,
    pub model: SynapseModel,
    /// Biological scaling constant λ applied to the weights upon delivery.
    pub scaling: f64,
    /// ID of the plasticity rule acting on the group, if any.
    pub plasticity: Option<usize>,
    /// Whether a neuron may connect to itself when the group is recurrent.
    pub allow_self_loops: bool,
}

impl Default for SynapseParameters {
    fn default() -> Self {
        SynapseParameters {
            policy: ConnectivityPolicy::AllToAll,
            weight_range: ValueRange::constant(1.0),
            delay_range: ValueRange::constant(0.0),
            model: SynapseModel::default(),
            scaling: 1.0,
            plasticity: None,
            allow_self_loops: true,
        }
    }
}

impl SynapseParameters {
    pub fn new(policy: ConnectivityPolicy, weight_range: ValueRange, delay_range: ValueRange) -> Self {
        SynapseParameters {
            policy,
            weight_range,
            delay_range,
            ..Default::default()
        }
    }

    pub fn validate(&self, dt: f64) -> Result<(), SNNError> {
        self.weight_range.validate("weight")?;
        self.delay_range.validate("delay")?;
        if self.delay_range.bottom < 0.0 {
            return Err(SNNError::ConfigurationError(
                "Delays must be non-negative".to_string(),
            ));
        }
        let max_delay = delay_to_timesteps(self.delay_range.top, dt);
        if max_delay > MAX_DELAY_TIMESTEPS {
            return Err(SNNError::ConfigurationError(format!(
                "A delay of {} timesteps exceeds the maximum of {} timesteps",
                max_delay, MAX_DELAY_TIMESTEPS
            )));
        }
        if !self.scaling.is_finite() {
            return Err(SNNError::ConfigurationError(
                "The biological scaling constant must be finite".to_string(),
            ));
        }
        if self.plasticity.is_some() && self.weight_range.straddles_zero() {
            return Err(SNNError::ConfigurationError(
                "The weights of a plastic synapse group must share the same sign".to_string(),
            ));
        }
        self.model.validate()
    }
}

/// The set of synapses between a source and a target population.
/// The synapses themselves are stored contiguously in the synapse arena of the network.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SynapseGroup {
    id: usize,
    source_population: usize,
    target_population: usize,
    params: SynapseParameters,
    synapses: Range<usize>,
    max_delay: usize,
}

impl SynapseGroup {
    /// Generate the synapses between two populations and append them to the arena.
    /// The parameters must have been validated beforehand.
    pub fn generate<R: Rng>(
        id: usize,
        source: &Population,
        target: &Population,
        params: SynapseParameters,
        dt: f64,
        arena: &mut Vec<Synapse>,
        rng: &mut R,
    ) -> Result<Self, SNNError> {
        let first = arena.len();
        let recurrent = source.id() == target.id();
        let excluded = |s: usize, t: usize| recurrent && !params.allow_self_loops && s == t;
        let (num_sources, num_targets) = (source.size(), target.size());

        let pairs: Vec<(usize, usize)> = match params.policy {
            ConnectivityPolicy::AllToAll => iproduct!(0..num_sources, 0..num_targets)
                .filter(|&(s, t)| !excluded(s, t))
                .collect(),
            ConnectivityPolicy::OneToOne => (0..num_sources).map(|i| (i, i)).collect(),
            ConnectivityPolicy::Random { probability } => {
                random_pairs(num_sources, num_targets, probability, rng)?
                    .into_iter()
                    .filter(|&(s, t)| !excluded(s, t))
                    .collect()
            }
            ConnectivityPolicy::FixedInDegree(degree) => {
                let mut pairs = Vec::with_capacity(num_targets * degree);
                for t in 0..num_targets {
                    for _ in 0..degree {
                        let s = loop {
                            let s = rng.gen_range(0..num_sources);
                            if !excluded(s, t) {
                                break s;
                            }
                        };
                        pairs.push((s, t));
                    }
                }
                pairs
            }
            ConnectivityPolicy::FixedOutDegree(degree) => {
                let mut pairs = Vec::with_capacity(num_sources * degree);
                for s in 0..num_sources {
                    for _ in 0..degree {
                        let t = loop {
                            let t = rng.gen_range(0..num_targets);
                            if !excluded(s, t) {
                                break t;
                            }
                        };
                        pairs.push((s, t));
                    }
                }
                pairs
            }
        };

        let weight_sampler = RangeSampler::new(&params.weight_range);
        let delay_sampler = RangeSampler::new(&params.delay_range);
        let plastic = params.plasticity.is_some();
        let mut max_delay = 0;

        arena.reserve(pairs.len());
        for (s, t) in pairs {
            let weight = weight_sampler.sample(rng);
            let delay = delay_to_timesteps(delay_sampler.sample(rng), dt);
            max_delay = max_delay.max(delay);
            arena.push(Synapse::new(
                source.start() + s,
                target.start() + t,
                delay,
                weight,
                plastic,
                id,
            ));
        }

        log::debug!(
            "Synapse group {} generated: {} synapses from population {} to population {}",
            id,
            arena.len() - first,
            source.id(),
            target.id()
        );

        Ok(SynapseGroup {
            id,
            source_population: source.id(),
            target_population: target.id(),
            params,
            synapses: first..arena.len(),
            max_delay,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn source_population(&self) -> usize {
        self.source_population
    }

    pub fn target_population(&self) -> usize {
        self.target_population
    }

    pub fn params(&self) -> &SynapseParameters {
        &self.params
    }

    /// Returns the range of indices of the group's synapses in the network arena.
    pub fn synapses(&self) -> Range<usize> {
        self.synapses.clone()
    }

    pub fn num_synapses(&self) -> usize {
        self.synapses.len()
    }

    /// Returns the largest delay (in timesteps) of the group, zero if the group is empty.
    pub fn max_delay(&self) -> usize {
        self.max_delay
    }

    pub fn is_plastic(&self) -> bool {
        self.params.plasticity.is_some()
    }

    /// Returns -1 for inhibitory groups (non-positive weights) and +1 otherwise.
    pub fn sign(&self) -> f64 {
        if self.params.weight_range.top <= 0.0 && self.params.weight_range.bottom < 0.0 {
            -1.0
        } else {
            1.0
        }
    }
}

/// Draw the connected pairs of a random policy, ordered by source then target.
/// The gaps between consecutive connected pairs (in the flattened pair space) are geometric,
/// which is equivalent to an independent draw per pair.
fn random_pairs<R: Rng>(
    num_sources: usize,
    num_targets: usize,
    probability: f64,
    rng: &mut R,
) -> Result<Vec<(usize, usize)>, SNNError> {
    let num_pairs = (num_sources as u64).saturating_mul(num_targets as u64);
    if probability <= 0.0 {
        return Ok(vec![]);
    }
    if probability >= 1.0 {
        return Ok(iproduct!(0..num_sources, 0..num_targets).collect());
    }

    let gaps = Geometric::new(probability).map_err(|e| {
        SNNError::ConfigurationError(format!("Invalid connection probability: {}", e))
    })?;
    let mut pairs = Vec::with_capacity((num_pairs as f64 * probability) as usize);
    let mut index = gaps.sample(rng);
    while index < num_pairs {
        pairs.push((
            (index / num_targets as u64) as usize,
            (index % num_targets as u64) as usize,
        ));
        index = index.saturating_add(1).saturating_add(gaps.sample(rng));
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neuron::{LifParameters, LifPopulation};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    const DT: f64 = 1e-4;

    fn population(id: usize, start: usize, size: usize) -> Population {
        Population::Lif(LifPopulation::new(id, start, LifParameters::new(size)))
    }

    fn generate(
        source: &Population,
        target: &Population,
        params: SynapseParameters,
        seed: u64,
    ) -> (SynapseGroup, Vec<Synapse>) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut arena = vec![];
        let group =
            SynapseGroup::generate(0, source, target, params, DT, &mut arena, &mut rng).unwrap();
        (group, arena)
    }

    #[test]
    fn test_synapse_accessors() {
        let mut synapse = Synapse::new(3, 7, 2, -0.5, true, 4);
        assert_eq!(synapse.source_id(), 3);
        assert_eq!(synapse.target_id(), 7);
        assert_eq!(synapse.delay(), 2);
        assert_eq!(synapse.group_id(), 4);
        assert!(synapse.is_plastic());
        assert_eq!(synapse.weight(), -0.5);
        synapse.set_weight(-0.25);
        assert_eq!(synapse.weight(), -0.25);
    }

    #[test]
    fn test_parameters_validation() {
        let params = SynapseParameters::new(
            ConnectivityPolicy::AllToAll,
            ValueRange::new(1.0, 0.5),
            ValueRange::constant(DT),
        );
        assert!(params.validate(DT).is_err());

        let params = SynapseParameters::new(
            ConnectivityPolicy::AllToAll,
            ValueRange::new(0.0, 0.5),
            ValueRange::new(2e-3, 1e-3),
        );
        assert!(params.validate(DT).is_err());

        let mut params = SynapseParameters::new(
            ConnectivityPolicy::AllToAll,
            ValueRange::new(-0.5, 0.5),
            ValueRange::constant(DT),
        );
        assert!(params.validate(DT).is_ok());
        params.plasticity = Some(0);
        assert!(params.validate(DT).is_err());

        let mut params = SynapseParameters::new(
            ConnectivityPolicy::AllToAll,
            ValueRange::constant(0.1),
            ValueRange::constant(MAX_DELAY_TIMESTEPS as f64 * DT),
        );
        assert!(params.validate(DT).is_ok());
        params.delay_range = ValueRange::constant((MAX_DELAY_TIMESTEPS + 1) as f64 * DT);
        assert!(matches!(
            params.validate(DT),
            Err(SNNError::ConfigurationError(_))
        ));
        // would wrap around to a delay of 3 timesteps if truncated to 32 bits
        params.delay_range = ValueRange::constant(((1u64 << 32) + 3) as f64 * DT);
        assert!(matches!(
            params.validate(DT),
            Err(SNNError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_policy_validation() {
        assert!(ConnectivityPolicy::OneToOne.validate(3, 4, false, true).is_err());
        assert!(ConnectivityPolicy::OneToOne.validate(3, 3, true, false).is_err());
        assert!(ConnectivityPolicy::Random { probability: 1.5 }
            .validate(3, 3, false, true)
            .is_err());
        assert!(ConnectivityPolicy::Random { probability: f64::NAN }
            .validate(3, 3, false, true)
            .is_err());
        assert!(ConnectivityPolicy::FixedInDegree(2)
            .validate(1, 1, true, false)
            .is_err());
        assert!(ConnectivityPolicy::FixedInDegree(2)
            .validate(1, 1, true, true)
            .is_ok());
    }

    #[test]
    fn test_max_synapses() {
        assert_eq!(ConnectivityPolicy::AllToAll.max_synapses(10, 20), 200);
        assert_eq!(ConnectivityPolicy::OneToOne.max_synapses(10, 10), 10);
        assert_eq!(
            ConnectivityPolicy::Random { probability: 0.1 }.max_synapses(10, 20),
            200
        );
        assert_eq!(
            ConnectivityPolicy::Random { probability: 0.0 }.max_synapses(10, 20),
            0
        );
        assert_eq!(ConnectivityPolicy::FixedInDegree(3).max_synapses(10, 20), 60);
        assert_eq!(ConnectivityPolicy::FixedOutDegree(3).max_synapses(10, 20), 30);
        assert_eq!(
            ConnectivityPolicy::AllToAll.max_synapses(usize::MAX, 2),
            usize::MAX
        );
    }

    #[test]
    fn test_all_to_all() {
        let source = population(0, 0, 4);
        let target = population(1, 4, 3);
        let params = SynapseParameters::new(
            ConnectivityPolicy::AllToAll,
            ValueRange::constant(0.5),
            ValueRange::constant(2.0 * DT),
        );
        let (group, arena) = generate(&source, &target, params, 42);

        assert_eq!(group.num_synapses(), 12);
        assert_eq!(group.synapses(), 0..12);
        assert_eq!(group.max_delay(), 2);
        assert!(arena.iter().all(|synapse| synapse.weight() == 0.5));
        assert!(arena.iter().all(|synapse| synapse.delay() == 2));
        assert!(arena
            .iter()
            .all(|synapse| source.contains(synapse.source_id())
                && target.contains(synapse.target_id())));
    }

    #[test]
    fn test_self_loops_exclusion() {
        let pop = population(0, 0, 5);
        let mut params = SynapseParameters::new(
            ConnectivityPolicy::AllToAll,
            ValueRange::constant(0.5),
            ValueRange::constant(DT),
        );
        let (group, _) = generate(&pop, &pop, params.clone(), 42);
        assert_eq!(group.num_synapses(), 25);

        params.allow_self_loops = false;
        let (group, arena) = generate(&pop, &pop, params.clone(), 42);
        assert_eq!(group.num_synapses(), 20);
        assert!(arena.iter().all(|s| s.source_id() != s.target_id()));

        params.policy = ConnectivityPolicy::FixedInDegree(4);
        let (_, arena) = generate(&pop, &pop, params, 42);
        assert_eq!(arena.len(), 20);
        assert!(arena.iter().all(|s| s.source_id() != s.target_id()));
    }

    #[test]
    fn test_one_to_one() {
        let source = population(0, 0, 6);
        let target = population(1, 6, 6);
        let params = SynapseParameters::new(
            ConnectivityPolicy::OneToOne,
            ValueRange::constant(1.0),
            ValueRange::constant(DT),
        );
        let (_, arena) = generate(&source, &target, params, 42);
        assert_eq!(arena.len(), 6);
        assert!(arena.iter().all(|s| s.target_id() == s.source_id() + 6));
    }

    #[test]
    fn test_fixed_degrees() {
        let source = population(0, 0, 10);
        let target = population(1, 10, 20);

        let params = SynapseParameters::new(
            ConnectivityPolicy::FixedInDegree(3),
            ValueRange::constant(1.0),
            ValueRange::constant(DT),
        );
        let (_, arena) = generate(&source, &target, params, 1);
        for t in 10..30 {
            assert_eq!(arena.iter().filter(|s| s.target_id() == t).count(), 3);
        }

        let params = SynapseParameters::new(
            ConnectivityPolicy::FixedOutDegree(4),
            ValueRange::constant(1.0),
            ValueRange::constant(DT),
        );
        let (_, arena) = generate(&source, &target, params, 1);
        for s in 0..10 {
            assert_eq!(arena.iter().filter(|syn| syn.source_id() == s).count(), 4);
        }
    }

    #[test]
    fn test_random_connection_count() {
        let source = population(0, 0, 200);
        let target = population(1, 200, 300);
        let probability = 0.1;
        let params = SynapseParameters::new(
            ConnectivityPolicy::Random { probability },
            ValueRange::constant(1.0),
            ValueRange::constant(DT),
        );

        // expected count 6000 with standard deviation ~73 per seed
        let expected = probability * 200.0 * 300.0;
        let counts: Vec<usize> = (0..20)
            .map(|seed| generate(&source, &target, params.clone(), seed).1.len())
            .collect();
        assert!(counts
            .iter()
            .all(|&count| (count as f64 - expected).abs() < 6.0 * 73.0));
        let mean = counts.iter().sum::<usize>() as f64 / counts.len() as f64;
        assert!((mean - expected).abs() < 100.0);
    }

    #[test]
    fn test_random_pairs_are_sorted_and_unique() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let pairs = random_pairs(50, 40, 0.3, &mut rng).unwrap();
        assert!(pairs.windows(2).all(|w| w[0] < w[1]));
        assert!(pairs.iter().all(|&(s, t)| s < 50 && t < 40));

        assert!(random_pairs(50, 40, 0.0, &mut rng).unwrap().is_empty());
        assert_eq!(random_pairs(5, 4, 1.0, &mut rng).unwrap().len(), 20);
    }

    #[test]
    fn test_random_generation_is_reproducible() {
        let source = population(0, 0, 50);
        let target = population(1, 50, 50);
        let params = SynapseParameters::new(
            ConnectivityPolicy::Random { probability: 0.2 },
            ValueRange::new(0.1, 0.2),
            ValueRange::new(DT, 10.0 * DT),
        );
        let (_, first) = generate(&source, &target, params.clone(), 42);
        let (_, second) = generate(&source, &target, params.clone(), 42);
        let (_, third) = generate(&source, &target, params, 43);
        assert_eq!(first, second);
        assert_ne!(first, third);
    }

    #[test]
    fn test_weight_and_delay_ranges() {
        let source = population(0, 0, 30);
        let target = population(1, 30, 30);
        let params = SynapseParameters::new(
            ConnectivityPolicy::AllToAll,
            ValueRange::new(-0.5, -0.1),
            ValueRange::new(DT, 5.0 * DT),
        );
        let (group, arena) = generate(&source, &target, params, 42);
        assert_eq!(group.sign(), -1.0);
        assert!(arena
            .iter()
            .all(|s| (-0.5..=-0.1).contains(&s.weight())));
        assert!(arena.iter().all(|s| (1..=5).contains(&s.delay())));
        // all delays of the range are represented
        for d in 1..=5 {
            assert!(arena.iter().any(|s| s.delay() == d));
        }
    }

    #[test]
    fn test_collapsed_delay_range() {
        let source = population(0, 0, 40);
        let target = population(1, 40, 40);
        let params = SynapseParameters::new(
            ConnectivityPolicy::Random { probability: 0.5 },
            ValueRange::new(0.0, 1.0),
            ValueRange::constant(3.0 * DT),
        );
        let (group, arena) = generate(&source, &target, params, 42);
        assert!(!arena.is_empty());
        assert!(arena.iter().all(|s| s.delay() == 3));
        assert_eq!(group.max_delay(), 3);
        assert_eq!(group.sign(), 1.0);
    }
}
