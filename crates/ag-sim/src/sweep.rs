//! Parameter sweeps over a base configuration.
//!
//! Each point clones the base configuration, overrides one parameter and
//! runs independently, so points are evaluated in parallel on the rayon pool.

use crate::error::{SimError, SimResult};
use crate::model::GunConfig;
use crate::sim::Summary;
use rayon::prelude::*;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Type of sweep progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SweepType {
    /// Uniformly spaced points
    Linear,
    /// Logarithmically spaced points
    Logarithmic,
}

/// Configuration field a sweep varies. Values are SI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SweepParameter {
    /// Chamber pressure (precompressed) or initial pressure (spring-piston), Pa
    ChargePressure,
    SpringRate,
    SpringPrecompression,
    PistonMass,
    ProjectileMass,
    BoreDiameter,
    BarrelLength,
    Stroke,
    ChamberVolume,
    ExpansionVolume,
    ValveOpeningTime,
}

impl SweepParameter {
    pub const ALL: [SweepParameter; 11] = [
        SweepParameter::ChargePressure,
        SweepParameter::SpringRate,
        SweepParameter::SpringPrecompression,
        SweepParameter::PistonMass,
        SweepParameter::ProjectileMass,
        SweepParameter::BoreDiameter,
        SweepParameter::BarrelLength,
        SweepParameter::Stroke,
        SweepParameter::ChamberVolume,
        SweepParameter::ExpansionVolume,
        SweepParameter::ValveOpeningTime,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SweepParameter::ChargePressure => "charge-pressure",
            SweepParameter::SpringRate => "spring-rate",
            SweepParameter::SpringPrecompression => "spring-precompression",
            SweepParameter::PistonMass => "piston-mass",
            SweepParameter::ProjectileMass => "projectile-mass",
            SweepParameter::BoreDiameter => "bore-diameter",
            SweepParameter::BarrelLength => "barrel-length",
            SweepParameter::Stroke => "stroke",
            SweepParameter::ChamberVolume => "chamber-volume",
            SweepParameter::ExpansionVolume => "expansion-volume",
            SweepParameter::ValveOpeningTime => "valve-opening-time",
        }
    }

    /// Error for a parameter the driver does not have.
    pub(crate) fn not_applicable(self, value: f64) -> SimError {
        SimError::config(
            "sweep.parameter",
            value,
            format!("{} does not apply to this driver", self.name()),
        )
    }
}

impl fmt::Display for SweepParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SweepParameter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SweepParameter::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| {
                let names: Vec<_> = SweepParameter::ALL.iter().map(|p| p.name()).collect();
                format!("unknown parameter '{s}' (expected one of: {})", names.join(", "))
            })
    }
}

/// A configuration that can have one named parameter overridden.
pub trait Sweepable: GunConfig {
    /// Copy of `self` with `parameter` set to `value`.
    ///
    /// # Errors
    /// `Configuration` when the parameter does not exist for this driver.
    fn with_parameter(&self, parameter: SweepParameter, value: f64) -> SimResult<Self>;
}

/// Definition of a single parameter sweep.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SweepDefinition {
    pub parameter: SweepParameter,
    /// Start value in SI units
    pub start: f64,
    /// End value in SI units
    pub end: f64,
    pub num_points: usize,
    pub sweep_type: SweepType,
}

impl SweepDefinition {
    pub fn new(
        parameter: SweepParameter,
        start: f64,
        end: f64,
        num_points: usize,
        sweep_type: SweepType,
    ) -> SimResult<Self> {
        let definition = Self {
            parameter,
            start,
            end,
            num_points,
            sweep_type,
        };
        definition.validate()?;
        Ok(definition)
    }

    /// Check a definition that may have been built field by field or deserialized.
    pub fn validate(&self) -> SimResult<()> {
        if !self.start.is_finite() || !self.end.is_finite() {
            return Err(SimError::InvalidArg {
                what: "sweep endpoints must be finite",
            });
        }
        if self.num_points < 2 {
            return Err(SimError::InvalidArg {
                what: "sweep must have at least 2 points",
            });
        }
        if (self.start - self.end).abs() < 1e-12 {
            return Err(SimError::InvalidArg {
                what: "sweep start and end must differ",
            });
        }
        if self.sweep_type == SweepType::Logarithmic && (self.start <= 0.0 || self.end <= 0.0) {
            return Err(SimError::InvalidArg {
                what: "logarithmic sweep needs positive endpoints",
            });
        }
        Ok(())
    }

    /// Generate all points in the sweep.
    ///
    /// An unvalidated definition with fewer than 2 points yields at most the
    /// start value.
    pub fn generate_points(&self) -> Vec<f64> {
        if self.num_points < 2 {
            return vec![self.start; self.num_points];
        }
        let last = self.num_points - 1;
        let mut points: Vec<f64> = match self.sweep_type {
            SweepType::Linear => {
                let delta = (self.end - self.start) / last as f64;
                (0..self.num_points)
                    .map(|i| self.start + i as f64 * delta)
                    .collect()
            }
            SweepType::Logarithmic => {
                let log_start = self.start.ln();
                let log_delta = (self.end.ln() - log_start) / last as f64;
                (0..self.num_points)
                    .map(|i| (log_start + i as f64 * log_delta).exp())
                    .collect()
            }
        };
        // Ensure exact endpoints
        points[0] = self.start;
        points[last] = self.end;
        points
    }
}

impl fmt::Display for SweepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Sweep {} from {} to {} ({} points, {:?})",
            self.parameter, self.start, self.end, self.num_points, self.sweep_type
        )
    }
}

/// Outcome of one sweep point. Failed runs keep their error message.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SweepPoint {
    pub value: f64,
    pub outcome: Result<Summary, String>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SweepResult {
    pub definition: SweepDefinition,
    /// In the same order as `definition.generate_points()`
    pub points: Vec<SweepPoint>,
}

impl SweepResult {
    pub fn successes(&self) -> impl Iterator<Item = (f64, &Summary)> {
        self.points
            .iter()
            .filter_map(|p| p.outcome.as_ref().ok().map(|s| (p.value, s)))
    }
}

/// Run `base` once per sweep point, in parallel.
///
/// A parameter that does not apply to the driver fails the whole sweep up
/// front. Individual runs that fail (e.g. divergence) are reported per point.
pub fn run_sweep<C: Sweepable>(base: &C, definition: &SweepDefinition) -> SimResult<SweepResult> {
    definition.validate()?;
    base.with_parameter(definition.parameter, definition.start)?;
    let values = definition.generate_points();
    debug!(
        driver = %base.kind(),
        parameter = %definition.parameter,
        points = values.len(),
        "starting sweep"
    );

    let points = values
        .into_par_iter()
        .map(|value| {
            let outcome = base
                .with_parameter(definition.parameter, value)
                .and_then(|config| config.simulate())
                .map(|series| series.summary)
                .map_err(|e| e.to_string());
            SweepPoint { value, outcome }
        })
        .collect();

    Ok(SweepResult {
        definition: definition.clone(),
        points,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::precompressed::PrecompressedAirConfig;

    #[test]
    fn linear_sweep_generation() {
        let sweep =
            SweepDefinition::new(SweepParameter::SpringRate, 500.0, 1500.0, 5, SweepType::Linear)
                .unwrap();
        let points = sweep.generate_points();
        assert_eq!(points.len(), 5);
        assert!((points[0] - 500.0).abs() < 1e-9);
        assert!((points[2] - 1000.0).abs() < 1e-9);
        assert_eq!(points[4], 1500.0);
    }

    #[test]
    fn logarithmic_sweep_generation() {
        let sweep = SweepDefinition::new(
            SweepParameter::ChargePressure,
            1e5,
            1e6,
            3,
            SweepType::Logarithmic,
        )
        .unwrap();
        let points = sweep.generate_points();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0], 1e5);
        assert_eq!(points[2], 1e6);
        let expected_mid = (1e5_f64 * 1e6_f64).sqrt();
        assert!((points[1] - expected_mid).abs() / expected_mid < 1e-6);
    }

    #[test]
    fn degenerate_sweeps_rejected() {
        let p = SweepParameter::ProjectileMass;
        assert!(SweepDefinition::new(p, 1.0, 2.0, 1, SweepType::Linear).is_err());
        assert!(SweepDefinition::new(p, 1.0, 1.0, 5, SweepType::Linear).is_err());
        assert!(SweepDefinition::new(p, 0.0, 2.0, 5, SweepType::Logarithmic).is_err());
        assert!(SweepDefinition::new(p, f64::NAN, 2.0, 5, SweepType::Linear).is_err());
    }

    #[test]
    fn hand_built_definitions_are_checked_before_running() {
        let mut definition = SweepDefinition {
            parameter: SweepParameter::ChargePressure,
            start: 3e5,
            end: 9e5,
            num_points: 0,
            sweep_type: SweepType::Linear,
        };
        assert!(definition.generate_points().is_empty());
        let base = PrecompressedAirConfig::default();
        assert!(matches!(
            run_sweep(&base, &definition),
            Err(SimError::InvalidArg { .. })
        ));

        definition.num_points = 1;
        assert_eq!(definition.generate_points(), vec![3e5]);
        assert!(matches!(
            run_sweep(&base, &definition),
            Err(SimError::InvalidArg { .. })
        ));
    }

    #[test]
    fn parameter_names_round_trip() {
        for p in SweepParameter::ALL {
            assert_eq!(p.name().parse::<SweepParameter>(), Ok(p));
        }
        let err = "muzzle-brake".parse::<SweepParameter>().unwrap_err();
        assert!(err.contains("spring-rate"));
    }
}
