//! Delay-buffered routing of spikes from source neurons to synapses.
//!
//! Pending deliveries are kept in a ring buffer of `depth` slots, one per timestep modulo `depth`.
//! A spike emitted at timestep `t` along a synapse with delay `d` is stored in slot `(t + d) mod depth`
//! and delivered exactly once, at timestep `t + d`. Events are plain synapse indices into the synapse arena
//! of the network, and slots keep their allocation from one round of the ring to the next.
use serde::{Deserialize, Serialize};

use crate::connection::{Synapse, MAX_DELAY_TIMESTEPS};
use crate::error::SNNError;

/// Counters describing the traffic through the router.
#[derive(Debug, Default, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct RouterStats {
    pub scheduled: u64,
    pub delivered: u64,
}

#[derive(Debug, Clone)]
pub struct SpikeRouter {
    depth: usize,
    slots: Vec<Vec<u32>>,
    /// Outgoing synapses of neuron `i` are `outgoing[offsets[i]..offsets[i + 1]]`.
    offsets: Vec<usize>,
    /// Pairs of synapse index and delay, grouped by source neuron.
    outgoing: Vec<(u32, u32)>,
    stats: RouterStats,
}

impl SpikeRouter {
    /// Returns the smallest depth able to hold every delay of the provided synapses.
    pub fn min_depth(synapses: &[Synapse]) -> usize {
        synapses
            .iter()
            .map(|synapse| synapse.delay())
            .max()
            .unwrap_or(0)
            + 1
    }

    /// Create a router for the provided synapses.
    /// The function returns an error if the depth is zero or too large, or if a delay does not fit in a ring buffer of the given depth.
    pub fn new(num_neurons: usize, synapses: &[Synapse], depth: usize) -> Result<Self, SNNError> {
        if depth == 0 || depth > MAX_DELAY_TIMESTEPS + 1 {
            return Err(SNNError::CapacityError(format!(
                "The depth of the delay buffer must lie in [1, {}], got {}",
                MAX_DELAY_TIMESTEPS + 1,
                depth
            )));
        }
        if let Some(synapse) = synapses
            .iter()
            .find(|synapse| synapse.delay() == 0 || synapse.delay() >= depth)
        {
            return Err(SNNError::CapacityError(format!(
                "A delay of {} timesteps does not fit in a delay buffer of depth {}",
                synapse.delay(),
                depth
            )));
        }
        if let Some(synapse) = synapses.iter().find(|synapse| {
            synapse.source_id() >= num_neurons || synapse.target_id() >= num_neurons
        }) {
            return Err(SNNError::ConfigurationError(format!(
                "Synapse from {} to {} references a neuron out of the {} neurons of the network",
                synapse.source_id(),
                synapse.target_id(),
                num_neurons
            )));
        }

        // Counting sort of the synapses by source neuron, preserving the arena order within each source.
        let mut offsets = vec![0; num_neurons + 1];
        for synapse in synapses {
            offsets[synapse.source_id() + 1] += 1;
        }
        for i in 0..num_neurons {
            offsets[i + 1] += offsets[i];
        }
        let mut cursors = offsets.clone();
        let mut outgoing = vec![(0, 0); synapses.len()];
        for (index, synapse) in synapses.iter().enumerate() {
            let cursor = &mut cursors[synapse.source_id()];
            outgoing[*cursor] = (index as u32, synapse.delay() as u32);
            *cursor += 1;
        }

        Ok(SpikeRouter {
            depth,
            slots: vec![vec![]; depth],
            offsets,
            outgoing,
            stats: RouterStats::default(),
        })
    }

    /// Returns the number of slots of the ring buffer.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Returns the number of synapses leaving the provided neuron.
    pub fn num_outgoing(&self, neuron_id: usize) -> usize {
        self.offsets[neuron_id + 1] - self.offsets[neuron_id]
    }

    /// Returns the indices of the synapses leaving the provided neuron.
    pub fn outgoing(&self, neuron_id: usize) -> impl Iterator<Item = usize> + '_ {
        self.outgoing[self.offsets[neuron_id]..self.offsets[neuron_id + 1]]
            .iter()
            .map(|&(index, _)| index as usize)
    }

    pub fn stats(&self) -> RouterStats {
        self.stats
    }

    /// Returns the number of events waiting for delivery.
    pub fn pending(&self) -> usize {
        self.slots.iter().map(|slot| slot.len()).sum()
    }

    /// Returns the synapse indices due at the provided timestep, in emission order.
    /// Only timesteps less than `depth` steps ahead of the last advanced one are meaningful.
    pub fn due(&self, timestep: usize) -> &[u32] {
        &self.slots[timestep % self.depth]
    }

    /// Advance the router by one timestep:
    /// 1. every event due at `timestep` is handed to `deliver`, in emission order, and removed;
    /// 2. one event per outgoing synapse of every spiking neuron is scheduled at `timestep + delay`.
    pub fn advance<F: FnMut(usize)>(&mut self, timestep: usize, spiked: &[usize], mut deliver: F) {
        let slot = timestep % self.depth;
        let mut due = std::mem::take(&mut self.slots[slot]);
        for &index in due.iter() {
            deliver(index as usize);
        }
        self.stats.delivered += due.len() as u64;
        due.clear();
        self.slots[slot] = due;

        for &neuron_id in spiked {
            let outgoing = &self.outgoing[self.offsets[neuron_id]..self.offsets[neuron_id + 1]];
            for &(index, delay) in outgoing {
                self.slots[(timestep + delay as usize) % self.depth].push(index);
            }
            self.stats.scheduled += outgoing.len() as u64;
        }
    }

    /// Drop every pending event and the traffic counters.
    pub fn reset(&mut self) {
        self.slots.iter_mut().for_each(|slot| slot.clear());
        self.stats = RouterStats::default();
    }
}
