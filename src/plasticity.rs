//! Spike-timing-dependent plasticity.
//!
//! Every rule keeps one presynaptic and one postsynaptic exponential trace per neuron, incremented by one
//! at every spike. Weight changes act on the magnitude of the synaptic efficacy: the sign of a synapse is
//! set by its group (excitatory or inhibitory) and never flips, the magnitude being clipped to `[0, w_max]`.
//!
//! Within a timestep, presynaptic spikes are processed before postsynaptic ones:
//! 1. all traces decay by one timestep,
//! 2. synapses leaving a spiking neuron are updated with the postsynaptic traces of the previous timesteps,
//! 3. the presynaptic traces of the spiking neurons are incremented,
//! 4. synapses reaching a spiking neuron are updated with the presynaptic traces, current timestep included,
//! 5. the postsynaptic traces of the spiking neurons are incremented.
//!
//! Simultaneous pre- and postsynaptic spikes are therefore treated as causal (potentiation).
use serde::{Deserialize, Serialize};

use crate::connection::{Synapse, SynapseGroup};
use crate::error::SNNError;

/// A timing-dependent plasticity rule.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub enum PlasticityRule {
    /// Additive pair-based STDP: potentiation by `a_plus` times the presynaptic trace on postsynaptic spikes,
    /// depression by `a_minus` times the postsynaptic trace on presynaptic spikes.
    Stdp {
        a_plus: f64,
        a_minus: f64,
        tau_plus: f64,
        tau_minus: f64,
        w_max: f64,
    },
    /// Inhibitory plasticity of Vogels et al. (2011), balancing the postsynaptic firing rate towards `target_rate` (Hz).
    Vogels {
        learning_rate: f64,
        target_rate: f64,
        tau: f64,
        w_max: f64,
    },
}

impl PlasticityRule {
    pub fn validate(&self) -> Result<(), SNNError> {
        let (values, taus): (Vec<f64>, [f64; 2]) = match *self {
            PlasticityRule::Stdp {
                a_plus,
                a_minus,
                tau_plus,
                tau_minus,
                w_max,
            } => (vec![a_plus, a_minus, w_max], [tau_plus, tau_minus]),
            PlasticityRule::Vogels {
                learning_rate,
                target_rate,
                tau,
                w_max,
            } => (vec![learning_rate, target_rate, w_max], [tau, tau]),
        };
        if values.iter().any(|value| !value.is_finite() || *value < 0.0) {
            return Err(SNNError::ConfigurationError(
                "Plasticity amplitudes, rates and bounds must be finite and non-negative".to_string(),
            ));
        }
        if taus.iter().any(|tau| !tau.is_finite() || *tau <= 0.0) {
            return Err(SNNError::ConfigurationError(
                "Plasticity time constants must be finite and positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the upper bound of the efficacy magnitude.
    pub fn w_max(&self) -> f64 {
        match *self {
            PlasticityRule::Stdp { w_max, .. } => w_max,
            PlasticityRule::Vogels { w_max, .. } => w_max,
        }
    }

    fn pre_tau(&self) -> f64 {
        match *self {
            PlasticityRule::Stdp { tau_plus, .. } => tau_plus,
            PlasticityRule::Vogels { tau, .. } => tau,
        }
    }

    fn post_tau(&self) -> f64 {
        match *self {
            PlasticityRule::Stdp { tau_minus, .. } => tau_minus,
            PlasticityRule::Vogels { tau, .. } => tau,
        }
    }

    /// Change of the efficacy magnitude when the presynaptic neuron fires.
    fn on_pre(&self, post_trace: f64) -> f64 {
        match *self {
            PlasticityRule::Stdp { a_minus, .. } => -a_minus * post_trace,
            PlasticityRule::Vogels {
                learning_rate,
                target_rate,
                tau,
                ..
            } => learning_rate * (post_trace - 2.0 * target_rate * tau),
        }
    }

    /// Change of the efficacy magnitude when the postsynaptic neuron fires.
    fn on_post(&self, pre_trace: f64) -> f64 {
        match *self {
            PlasticityRule::Stdp { a_plus, .. } => a_plus * pre_trace,
            PlasticityRule::Vogels { learning_rate, .. } => learning_rate * pre_trace,
        }
    }
}

/// Synapse indices grouped by neuron, in compressed sparse row form.
#[derive(Debug, Clone, PartialEq)]
struct Adjacency {
    offsets: Vec<usize>,
    indices: Vec<usize>,
}

impl Adjacency {
    fn new<F: Fn(&Synapse) -> usize>(num_neurons: usize, synapses: &[Synapse], members: &[usize], key: F) -> Self {
        let mut offsets = vec![0; num_neurons + 1];
        for &index in members {
            offsets[key(&synapses[index]) + 1] += 1;
        }
        for i in 0..num_neurons {
            offsets[i + 1] += offsets[i];
        }
        let mut cursors = offsets.clone();
        let mut indices = vec![0; members.len()];
        for &index in members {
            let cursor = &mut cursors[key(&synapses[index])];
            indices[*cursor] = index;
            *cursor += 1;
        }
        Adjacency { offsets, indices }
    }

    fn of(&self, neuron_id: usize) -> &[usize] {
        &self.indices[self.offsets[neuron_id]..self.offsets[neuron_id + 1]]
    }
}

/// A plasticity rule with its traces and the synapses it acts on.
#[derive(Debug, Clone, PartialEq)]
struct RuleState {
    rule: PlasticityRule,
    pre_decay: f64,
    post_decay: f64,
    pre_trace: Vec<f64>,
    post_trace: Vec<f64>,
    outgoing: Adjacency,
    incoming: Adjacency,
}

/// Applies every plasticity rule of a network.
#[derive(Debug, Clone, PartialEq)]
pub struct PlasticityEngine {
    rules: Vec<RuleState>,
    /// Sign of the synapses of each group.
    signs: Vec<f64>,
}

impl PlasticityEngine {
    pub fn new(
        num_neurons: usize,
        rules: &[PlasticityRule],
        synapses: &[Synapse],
        groups: &[SynapseGroup],
        dt: f64,
    ) -> Self {
        let rules = rules
            .iter()
            .enumerate()
            .map(|(rule_id, rule)| {
                let members: Vec<usize> = groups
                    .iter()
                    .filter(|group| group.params().plasticity == Some(rule_id))
                    .flat_map(|group| group.synapses())
                    .collect();
                RuleState {
                    rule: *rule,
                    pre_decay: (-dt / rule.pre_tau()).exp(),
                    post_decay: (-dt / rule.post_tau()).exp(),
                    pre_trace: vec![0.0; num_neurons],
                    post_trace: vec![0.0; num_neurons],
                    outgoing: Adjacency::new(num_neurons, synapses, &members, |s| s.source_id()),
                    incoming: Adjacency::new(num_neurons, synapses, &members, |s| s.target_id()),
                }
            })
            .collect();
        let signs = groups.iter().map(|group| group.sign()).collect();
        PlasticityEngine { rules, signs }
    }

    pub fn num_rules(&self) -> usize {
        self.rules.len()
    }

    /// Returns the presynaptic trace of a neuron for the given rule.
    pub fn pre_trace(&self, rule_id: usize, neuron_id: usize) -> Option<f64> {
        self.rules
            .get(rule_id)
            .and_then(|state| state.pre_trace.get(neuron_id).copied())
    }

    /// Returns the postsynaptic trace of a neuron for the given rule.
    pub fn post_trace(&self, rule_id: usize, neuron_id: usize) -> Option<f64> {
        self.rules
            .get(rule_id)
            .and_then(|state| state.post_trace.get(neuron_id).copied())
    }

    /// Update traces and weights after the neurons in `spiked` fired during the current timestep.
    pub fn update(&mut self, spiked: &[usize], synapses: &mut [Synapse]) {
        let signs = &self.signs;
        for state in self.rules.iter_mut() {
            let (pre_decay, post_decay) = (state.pre_decay, state.post_decay);
            state.pre_trace.iter_mut().for_each(|x| *x *= pre_decay);
            state.post_trace.iter_mut().for_each(|y| *y *= post_decay);

            let w_max = state.rule.w_max();
            let apply = |synapse: &mut Synapse, delta: f64| {
                let sign = signs[synapse.group_id()];
                let magnitude = (sign * synapse.weight() + delta).clamp(0.0, w_max);
                synapse.set_weight(sign * magnitude);
            };

            for &neuron_id in spiked {
                for &index in state.outgoing.of(neuron_id) {
                    let synapse = &mut synapses[index];
                    let delta = state.rule.on_pre(state.post_trace[synapse.target_id()]);
                    apply(synapse, delta);
                }
            }
            for &neuron_id in spiked {
                state.pre_trace[neuron_id] += 1.0;
            }

            for &neuron_id in spiked {
                for &index in state.incoming.of(neuron_id) {
                    let synapse = &mut synapses[index];
                    let delta = state.rule.on_post(state.pre_trace[synapse.source_id()]);
                    apply(synapse, delta);
                }
            }
            for &neuron_id in spiked {
                state.post_trace[neuron_id] += 1.0;
            }
        }
    }

    /// Clear all traces.
    pub fn reset(&mut self) {
        for state in self.rules.iter_mut() {
            state.pre_trace.iter_mut().for_each(|x| *x = 0.0);
            state.post_trace.iter_mut().for_each(|y| *y = 0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectivityPolicy, SynapseParameters};
    use crate::neuron::{LifParameters, LifPopulation, Population};
    use crate::utils::ValueRange;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    const DT: f64 = 1e-4;
    const TAU: f64 = 20e-3;

    fn stdp() -> PlasticityRule {
        PlasticityRule::Stdp {
            a_plus: 0.01,
            a_minus: 0.012,
            tau_plus: TAU,
            tau_minus: TAU,
            w_max: 1.0,
        }
    }

    /// Potentiation only.
    fn hebbian() -> PlasticityRule {
        PlasticityRule::Stdp {
            a_plus: 0.01,
            a_minus: 0.0,
            tau_plus: TAU,
            tau_minus: TAU,
            w_max: 1.0,
        }
    }

    /// Two neurons (0 -> 1) connected by a single plastic synapse of the given initial weight.
    fn pair(rule: PlasticityRule, weight: f64) -> (PlasticityEngine, Vec<Synapse>) {
        let source = Population::Lif(LifPopulation::new(0, 0, LifParameters::new(1)));
        let target = Population::Lif(LifPopulation::new(1, 1, LifParameters::new(1)));
        let mut params = SynapseParameters::new(
            ConnectivityPolicy::AllToAll,
            ValueRange::constant(weight),
            ValueRange::constant(DT),
        );
        params.plasticity = Some(0);
        let mut synapses = vec![];
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let group =
            SynapseGroup::generate(0, &source, &target, params, DT, &mut synapses, &mut rng)
                .unwrap();
        let engine = PlasticityEngine::new(2, &[rule], &synapses, &[group], DT);
        (engine, synapses)
    }

    #[test]
    fn test_rule_validation() {
        assert!(stdp().validate().is_ok());
        assert!(PlasticityRule::Stdp {
            a_plus: 0.01,
            a_minus: 0.01,
            tau_plus: 0.0,
            tau_minus: TAU,
            w_max: 1.0
        }
        .validate()
        .is_err());
        assert!(PlasticityRule::Vogels {
            learning_rate: -1.0,
            target_rate: 5.0,
            tau: TAU,
            w_max: 1.0
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_simultaneous_spikes_potentiate() {
        let (mut engine, mut synapses) = pair(stdp(), 0.5);
        engine.update(&[0, 1], &mut synapses);
        assert_eq!(synapses[0].weight(), 0.5 + 0.01);
        assert_eq!(engine.pre_trace(0, 0), Some(1.0));
        assert_eq!(engine.post_trace(0, 1), Some(1.0));
    }

    #[test]
    fn test_causal_pair_potentiates() {
        let (mut engine, mut synapses) = pair(stdp(), 0.5);
        engine.update(&[0], &mut synapses);
        assert_eq!(synapses[0].weight(), 0.5);
        for _ in 0..9 {
            engine.update(&[], &mut synapses);
        }
        engine.update(&[1], &mut synapses);
        let expected = 0.5 + 0.01 * (-10.0 * DT / TAU).exp();
        assert!((synapses[0].weight() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_anticausal_pair_depresses() {
        let (mut engine, mut synapses) = pair(stdp(), 0.5);
        engine.update(&[1], &mut synapses);
        for _ in 0..9 {
            engine.update(&[], &mut synapses);
        }
        engine.update(&[0], &mut synapses);
        let expected = 0.5 - 0.012 * (-10.0 * DT / TAU).exp();
        assert!((synapses[0].weight() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_excitatory_weights_stay_non_negative() {
        let (mut engine, mut synapses) = pair(stdp(), 0.005);
        // postsynaptic bursts followed by presynaptic spikes: depression only
        for _ in 0..100 {
            engine.update(&[1], &mut synapses);
            engine.update(&[0], &mut synapses);
            for _ in 0..30 {
                engine.update(&[], &mut synapses);
            }
            assert!(synapses[0].weight() >= 0.0);
        }
        assert_eq!(synapses[0].weight(), 0.0);
    }

    #[test]
    fn test_weights_bounded_by_w_max() {
        let (mut engine, mut synapses) = pair(hebbian(), 0.95);
        for _ in 0..100 {
            engine.update(&[0], &mut synapses);
            engine.update(&[1], &mut synapses);
            for _ in 0..30 {
                engine.update(&[], &mut synapses);
            }
            assert!(synapses[0].weight() <= 1.0);
        }
        assert_eq!(synapses[0].weight(), 1.0);
    }

    #[test]
    fn test_vogels_inhibitory_weights_stay_non_positive() {
        let rule = PlasticityRule::Vogels {
            learning_rate: 0.01,
            target_rate: 5.0,
            tau: TAU,
            w_max: 1.0,
        };
        let (mut engine, mut synapses) = pair(rule, -0.1);

        // a presynaptic spike on a silent target depresses the magnitude by η α
        engine.update(&[0], &mut synapses);
        let alpha = 2.0 * 5.0 * TAU;
        assert!((synapses[0].weight() - (-0.1 + 0.01 * alpha)).abs() < 1e-12);

        // repeated presynaptic spikes on a silent target drive the weight to zero, never above
        for _ in 0..1000 {
            engine.update(&[0], &mut synapses);
            assert!(synapses[0].weight() <= 0.0);
        }
        assert_eq!(synapses[0].weight(), 0.0);

        // correlated activity strengthens the inhibition
        for _ in 0..100 {
            engine.update(&[0, 1], &mut synapses);
            assert!(synapses[0].weight() <= 0.0);
        }
        assert!(synapses[0].weight() < 0.0);
    }

    #[test]
    fn test_non_plastic_synapses_are_untouched() {
        let source = Population::Lif(LifPopulation::new(0, 0, LifParameters::new(3)));
        let target = Population::Lif(LifPopulation::new(1, 3, LifParameters::new(3)));
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut synapses = vec![];
        let mut plastic = SynapseParameters::new(
            ConnectivityPolicy::AllToAll,
            ValueRange::constant(0.5),
            ValueRange::constant(DT),
        );
        plastic.plasticity = Some(0);
        let frozen = SynapseParameters::new(
            ConnectivityPolicy::AllToAll,
            ValueRange::constant(0.5),
            ValueRange::constant(DT),
        );
        let groups = vec![
            SynapseGroup::generate(0, &source, &target, plastic, DT, &mut synapses, &mut rng)
                .unwrap(),
            SynapseGroup::generate(1, &source, &target, frozen, DT, &mut synapses, &mut rng)
                .unwrap(),
        ];
        let mut engine = PlasticityEngine::new(6, &[hebbian()], &synapses, &groups, DT);

        for _ in 0..50 {
            engine.update(&[0, 1, 2, 3, 4, 5], &mut synapses);
        }
        assert!(synapses[groups[0].synapses()]
            .iter()
            .all(|synapse| synapse.weight() > 0.5));
        assert!(synapses[groups[1].synapses()]
            .iter()
            .all(|synapse| synapse.weight() == 0.5));

        engine.reset();
        assert_eq!(engine.pre_trace(0, 0), Some(0.0));
        assert_eq!(engine.post_trace(0, 5), Some(0.0));
    }
}
