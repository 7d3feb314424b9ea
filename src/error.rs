//! Error module for the Rusty Spike library.
use std::error::Error;
use std::fmt;

/// Error types for the library.
#[derive(Debug, PartialEq, Clone)]
pub enum SNNError {
    /// Error for an invalid combination of construction parameters, e.g., an inverted weight range or an unknown population.
    ConfigurationError(String),
    /// Error for a spike delivery that does not fit in the delay buffer.
    CapacityError(String),
    /// Error for a membrane potential that became NaN or infinite.
    NumericalInstability { neuron_id: usize, timestep: usize },
    /// Error for invalid simulation parameters, e.g., a negative duration.
    InvalidParameters(String),
    /// Error for I/O operations.
    IOError(String),
}

impl fmt::Display for SNNError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SNNError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            SNNError::CapacityError(e) => write!(f, "Capacity error: {}", e),
            SNNError::NumericalInstability {
                neuron_id,
                timestep,
            } => write!(
                f,
                "Numerical instability: membrane potential of neuron {} is not finite at timestep {}",
                neuron_id, timestep
            ),
            SNNError::InvalidParameters(e) => write!(f, "Invalid parameters: {}", e),
            SNNError::IOError(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl Error for SNNError {}
