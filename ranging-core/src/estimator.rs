//! Distance estimation seam.
//!
//! The session hands a matched pair of step sets to a [`DistanceEstimator`]
//! exactly once per aligned procedure. The numeric methods live behind this
//! trait; nothing in this crate interprets the step bytes.

use core::fmt;

use crate::procedure::Role;

/// Distance figures produced for one procedure, in metres.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct DistanceEstimate {
    /// Inverse-FFT based estimate.
    pub ifft: Option<f32>,
    /// Phase-slope based estimate.
    pub phase_slope: Option<f32>,
    /// Round-trip-time based estimate.
    pub rtt: Option<f32>,
}

impl DistanceEstimate {
    /// Returns `true` when no method produced a figure.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.ifft.is_none() && self.phase_slope.is_none() && self.rtt.is_none()
    }
}

impl fmt::Display for DistanceEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_figure(f, "ifft", self.ifft)?;
        f.write_str(", ")?;
        write_figure(f, "phase_slope", self.phase_slope)?;
        f.write_str(", ")?;
        write_figure(f, "rtt", self.rtt)
    }
}

fn write_figure(f: &mut fmt::Formatter<'_>, label: &str, value: Option<f32>) -> fmt::Result {
    match value {
        Some(metres) => write!(f, "{label}: {metres:.2} m"),
        None => write!(f, "{label}: n/a"),
    }
}

/// Reasons an estimator declined to produce figures.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EstimateError {
    /// One of the step sets was empty.
    NoSteps,
    /// The step data could not be decoded.
    Malformed,
    /// The antenna path count is outside what the estimator supports.
    UnsupportedAntennaPaths(u8),
}

impl fmt::Display for EstimateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EstimateError::NoSteps => f.write_str("no step data"),
            EstimateError::Malformed => f.write_str("malformed step data"),
            EstimateError::UnsupportedAntennaPaths(paths) => {
                write!(f, "unsupported antenna path count {paths}")
            }
        }
    }
}

/// Computes distance from the local and peer step sets of one procedure.
pub trait DistanceEstimator {
    fn estimate(
        &mut self,
        local_steps: &[u8],
        peer_steps: &[u8],
        antenna_paths: u8,
        role: Role,
    ) -> Result<DistanceEstimate, EstimateError>;
}
