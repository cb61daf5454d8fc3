//! What a gun driver provides to the shared run loop.

use crate::error::SimResult;
use crate::events::{Signal, Trigger};
use crate::phase::Phase;
use crate::sim::{ResultSeries, SimOptions};
use crate::state::{Kinematics, SimulationState};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DriverKind {
    SpringPiston,
    PrecompressedAir,
}

impl DriverKind {
    pub fn label(self) -> &'static str {
        match self {
            DriverKind::SpringPiston => "spring-piston",
            DriverKind::PrecompressedAir => "precompressed-air",
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A lumped-parameter gun whose state can be integrated in time.
///
/// The integrated state is a driver-specific struct. Everything that depends
/// on the phase (force laws, armed thresholds) takes the phase explicitly, so
/// the model itself only changes inside [`GunModel::enter_phase`].
pub trait GunModel {
    /// Integrated state (positions and velocities).
    type State: Clone;

    fn kind(&self) -> DriverKind;

    /// Return the state at t = 0.
    fn initial_state(&self) -> Self::State;

    /// Compute the state derivative in `phase`.
    ///
    /// Fails with `InvalidState` when the state is outside the model's
    /// domain (e.g. zero gas volume).
    fn rhs(&self, phase: Phase, t: f64, x: &Self::State) -> SimResult<Self::State>;

    /// Add two states element-wise: result = a + b.
    fn add(&self, a: &Self::State, b: &Self::State) -> Self::State;

    /// Scale a state by a scalar: result = scale * a.
    fn scale(&self, a: &Self::State, scale: f64) -> Self::State;

    /// Thresholds armed while in `phase`.
    fn triggers(&self, phase: Phase) -> Vec<Trigger>;

    fn signal(&self, signal: Signal, t: f64, x: &Self::State) -> SimResult<f64>;

    /// Hook run once when the run moves from `from` to `to` at time `t`.
    fn enter_phase(&mut self, from: Phase, to: Phase, t: f64, x: &mut Self::State)
    -> SimResult<()>;

    fn snapshot(&self, phase: Phase, t: f64, x: &Self::State) -> SimResult<SimulationState>;

    /// True when every live body is (and will stay) effectively motionless.
    fn is_settled(
        &self,
        phase: Phase,
        t: f64,
        x: &Self::State,
        dt: f64,
        settle_speed_mps: f64,
    ) -> SimResult<bool>;

    /// Energy available to the bodies at t = 0 (J).
    fn stored_energy_j(&self) -> SimResult<f64>;

    fn projectile_mass_kg(&self) -> f64;
}

/// A driver configuration that can build and run its own model.
pub trait GunConfig: Clone + Send + Sync {
    fn kind(&self) -> DriverKind;

    fn validate(&self) -> SimResult<()>;

    fn numerics(&self) -> &SimOptions;

    fn numerics_mut(&mut self) -> &mut SimOptions;

    /// Validate, build the model and run it to completion.
    fn simulate(&self) -> SimResult<ResultSeries>;
}

/// Shared settling test over `(kinematics, derivative)` pairs of the live bodies.
pub(crate) fn bodies_settled(
    bodies: &[(Kinematics, Kinematics)],
    dt: f64,
    settle_speed_mps: f64,
) -> bool {
    bodies.iter().all(|(k, d)| {
        k.speed() < settle_speed_mps && (d.velocity_mps * dt).abs() < settle_speed_mps
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settling_needs_slow_and_steady() {
        let still = Kinematics::AT_REST;
        let coasting = Kinematics {
            position_m: 0.1,
            velocity_mps: 5.0,
        };
        assert!(bodies_settled(&[(still, still.derivative(0.0))], 1e-6, 1e-3));
        assert!(!bodies_settled(&[(coasting, coasting.derivative(0.0))], 1e-6, 1e-3));
        // At rest but about to be kicked hard.
        assert!(!bodies_settled(&[(still, still.derivative(1e4))], 1e-6, 1e-3));
    }

    #[test]
    fn driver_labels() {
        assert_eq!(DriverKind::SpringPiston.to_string(), "spring-piston");
        assert_eq!(DriverKind::PrecompressedAir.label(), "precompressed-air");
    }
}
