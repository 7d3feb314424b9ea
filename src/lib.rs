//! This crate provides a fixed-timestep, event-driven engine for simulating spiking neural networks (SNNs) in Rust.
//!
//! # Creating Networks
//!
//! Networks are made of populations of neurons connected by synapse groups, declared on a
//! [`NetworkBuilder`](network::NetworkBuilder) and generated at random when the network is finalized.
//!
//! ```rust
//! use rusty_spike::connection::{ConnectivityPolicy, SynapseParameters};
//! use rusty_spike::network::NetworkBuilder;
//! use rusty_spike::neuron::{LifParameters, PoissonParameters};
//! use rusty_spike::utils::ValueRange;
//!
//! let mut builder = NetworkBuilder::new(1e-4).unwrap();
//! let input = builder.add_input_population(PoissonParameters::new(100, 20.0)).unwrap();
//! let neurons = builder.add_population(LifParameters::new(80)).unwrap();
//!
//! // Each input unit reaches each neuron with probability 0.1, after 1 to 2 ms
//! let mut params = SynapseParameters::new(
//!     ConnectivityPolicy::Random { probability: 0.1 },
//!     ValueRange::constant(0.5),
//!     ValueRange::new(1e-3, 2e-3),
//! );
//! params.scaling = 1e-3;
//! builder.add_synapse_group(input, neurons, params).unwrap();
//!
//! let network = builder.finalize(42).unwrap();
//! assert_eq!(network.num_neurons(), 180);
//! assert!(network.synapses().iter().all(|synapse| (10..=20).contains(&synapse.delay())));
//! ```
//!
//! # Simulating Networks
//!
//! ```rust
//! use rusty_spike::connection::{ConnectivityPolicy, SynapseParameters};
//! use rusty_spike::network::NetworkBuilder;
//! use rusty_spike::neuron::{LifParameters, PoissonParameters};
//! use rusty_spike::recorder::SpikeLog;
//! use rusty_spike::simulator::SimulationOptions;
//! use rusty_spike::utils::ValueRange;
//!
//! let mut builder = NetworkBuilder::new(1e-4).unwrap();
//! let input = builder.add_input_population(PoissonParameters::new(100, 50.0)).unwrap();
//! let neurons = builder.add_population(LifParameters::new(10)).unwrap();
//! let mut params = SynapseParameters::new(
//!     ConnectivityPolicy::AllToAll,
//!     ValueRange::constant(2.0),
//!     ValueRange::constant(1e-3),
//! );
//! params.scaling = 1e-3;
//! builder.add_synapse_group(input, neurons, params).unwrap();
//! let mut network = builder.finalize(42).unwrap();
//!
//! // Simulate 100 ms and record every spike
//! let mut log = SpikeLog::new(network.dt());
//! let options = SimulationOptions::build(0.1, false).unwrap();
//! let report = network.run(&options, &mut log).unwrap();
//!
//! assert_eq!(report.steps, 1000);
//! assert_eq!(log.num_spikes(neurons), report.spike_counts[neurons]);
//! ```

pub mod connection;
pub mod error;
pub mod network;
pub mod neuron;
pub mod plasticity;
pub mod recorder;
pub mod router;
pub mod simulator;
pub mod synapse;
pub mod utils;

/// Minimum number of neurons of a population to parallelize its integration.
pub const MIN_NEURONS_PAR: usize = 1000;
/// Tolerance on durations, e.g., for a refractory period to be considered over.
pub const TIME_RESOLUTION: f64 = 1e-12;
