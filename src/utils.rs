//! Sampling and time discretization utilities.
use rand::Rng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};

use crate::error::SNNError;

/// A closed interval `[bottom, top]` of real values, e.g., the range of initial weights of a synapse group.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct ValueRange {
    pub bottom: f64,
    pub top: f64,
}

impl ValueRange {
    pub fn new(bottom: f64, top: f64) -> Self {
        ValueRange { bottom, top }
    }

    /// A degenerate range always yielding the same value.
    pub fn constant(value: f64) -> Self {
        ValueRange {
            bottom: value,
            top: value,
        }
    }

    /// Check that the range is finite and not inverted.
    pub fn validate(&self, name: &str) -> Result<(), SNNError> {
        if !(self.bottom.is_finite() && self.top.is_finite()) {
            return Err(SNNError::ConfigurationError(format!(
                "The {} range must be finite",
                name
            )));
        }
        if self.bottom > self.top {
            return Err(SNNError::ConfigurationError(format!(
                "The {} range is inverted: {} > {}",
                name, self.bottom, self.top
            )));
        }
        Ok(())
    }

    pub fn is_degenerate(&self) -> bool {
        self.bottom == self.top
    }

    /// Returns true if the range contains both strictly negative and strictly positive values.
    pub fn straddles_zero(&self) -> bool {
        self.bottom < 0.0 && self.top > 0.0
    }
}

/// Uniform sampler over a validated [`ValueRange`].
#[derive(Debug, Clone)]
pub enum RangeSampler {
    Constant(f64),
    Uniform(Uniform<f64>),
}

impl RangeSampler {
    /// The range must have been validated beforehand.
    pub fn new(range: &ValueRange) -> Self {
        if range.is_degenerate() {
            RangeSampler::Constant(range.bottom)
        } else {
            RangeSampler::Uniform(Uniform::new_inclusive(range.bottom, range.top))
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match self {
            RangeSampler::Constant(value) => *value,
            RangeSampler::Uniform(dist) => dist.sample(rng),
        }
    }
}

/// Number of whole timesteps covering the provided duration.
pub fn to_timesteps(duration: f64, dt: f64) -> usize {
    (duration / dt).round() as usize
}

/// Discretize a conduction delay to the nearest whole number of timesteps, with a floor of one timestep.
pub fn delay_to_timesteps(delay: f64, dt: f64) -> usize {
    to_timesteps(delay, dt).max(1)
}
