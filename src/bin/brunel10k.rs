use clap::Parser;
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::fs;
use std::time::Instant;

use rusty_spike::connection::{ConnectivityPolicy, SynapseParameters};
use rusty_spike::error::SNNError;
use rusty_spike::network::NetworkBuilder;
use rusty_spike::neuron::{LifParameters, PoissonParameters};
use rusty_spike::recorder::SpikeLog;
use rusty_spike::simulator::SimulationOptions;
use rusty_spike::utils::ValueRange;

const TIMESTEP: f64 = 1e-4;
const NUM_EXCITATORY: usize = 8000;
const NUM_INHIBITORY: usize = 2000;
const NUM_INPUTS: usize = 10_000;
const INPUT_RATE: f64 = 20.0;
const CONNECTION_PROBABILITY: f64 = 0.1;
/// Synaptic efficacy, in mV.
const WEIGHT: f64 = 0.1;
/// Relative strength of inhibition.
const GAMMA: f64 = 5.0;
/// Converts the weights from mV to V.
const SCALING: f64 = 1e-3;

/// The Brunel 10K benchmark: 8000 excitatory and 2000 inhibitory neurons driven by 10000 Poisson inputs.
#[derive(Parser, Debug)]
struct Args {
    /// The simulated time, in seconds
    #[arg(long, default_value = "20.0")]
    simtime: f64,
    /// Run without collecting spikes and save the wall-clock time instead
    #[arg(long)]
    fast: bool,
    /// The minimum synaptic delay, in timesteps
    #[arg(long, default_value = "1")]
    num_timesteps_min_delay: usize,
    /// The maximum synaptic delay, in timesteps (raised to the minimum delay if lower)
    #[arg(long)]
    num_timesteps_max_delay: Option<usize>,
    /// The seed used for network sampling and input spikes
    #[arg(long, default_value = "0")]
    seed: u64,
    /// The file receiving the recorded spikes
    #[arg(long, default_value = "spikes.json")]
    output: String,
    /// The file receiving the simulation time in fast mode
    #[arg(long, default_value = "timefile.dat")]
    timefile: String,
}

fn main() -> Result<(), SNNError> {
    let args = Args::parse();

    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{l} - {m}\n")))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info))
        .map_err(|e| SNNError::IOError(e.to_string()))?;
    log4rs::init_config(config).map_err(|e| SNNError::IOError(e.to_string()))?;

    log::info!("{:?}", args);

    let min_delay = args.num_timesteps_min_delay;
    let max_delay = match args.num_timesteps_max_delay {
        Some(max_delay) if max_delay < min_delay => {
            return Err(SNNError::InvalidParameters(format!(
                "The maximum delay ({} timesteps) is smaller than the minimum delay ({} timesteps)",
                max_delay, min_delay
            )));
        }
        Some(max_delay) => max_delay,
        None => min_delay,
    };
    let delay_range = ValueRange::new(min_delay as f64 * TIMESTEP, max_delay as f64 * TIMESTEP);
    let synapse_params = |weight: f64| {
        let mut params = SynapseParameters::new(
            ConnectivityPolicy::Random {
                probability: CONNECTION_PROBABILITY,
            },
            ValueRange::constant(weight),
            delay_range,
        );
        params.scaling = SCALING;
        params
    };

    let mut builder = NetworkBuilder::new(TIMESTEP)?;
    let input = builder.add_input_population(PoissonParameters::new(NUM_INPUTS, INPUT_RATE))?;
    let exc = builder.add_population(LifParameters::new(NUM_EXCITATORY))?;
    let inh = builder.add_population(LifParameters::new(NUM_INHIBITORY))?;
    builder.add_synapse_group(exc, exc, synapse_params(WEIGHT))?;
    builder.add_synapse_group(exc, inh, synapse_params(WEIGHT))?;
    builder.add_synapse_group(inh, exc, synapse_params(-GAMMA * WEIGHT))?;
    builder.add_synapse_group(inh, inh, synapse_params(-GAMMA * WEIGHT))?;
    builder.add_synapse_group(input, exc, synapse_params(WEIGHT))?;
    builder.add_synapse_group(input, inh, synapse_params(WEIGHT))?;
    let mut network = builder.finalize(args.seed)?;
    log::info!("Network construction: done!");

    let options = SimulationOptions::build(args.simtime, args.fast)?;
    let mut log = SpikeLog::new(TIMESTEP);
    let start = Instant::now();
    let report = network.run(&options, &mut log)?;
    let elapsed = start.elapsed().as_secs_f64();

    for (population_id, name) in [(exc, "excitatory"), (inh, "inhibitory")] {
        let size = network.populations()[population_id].size();
        log::info!(
            "Mean firing rate of the {} population: {:.2} Hz",
            name,
            report.firing_rate(population_id, size, TIMESTEP)
        );
    }
    log::info!("Simulation time: {:.3} s", elapsed);

    if args.fast {
        fs::write(&args.timefile, format!("{:.10}", elapsed))
            .map_err(|e| SNNError::IOError(e.to_string()))?;
        log::info!("Timing saved to {}", args.timefile);
    } else {
        log.save_to(&args.output)?;
        log::info!("Spikes saved to {}", args.output);
    }
    Ok(())
}
