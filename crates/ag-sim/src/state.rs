//! Snapshot types shared by both drivers.

use crate::phase::Phase;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Position and velocity of a body moving along the bore axis.
///
/// Driver derivatives reuse this shape: `position_m` then carries the
/// velocity and `velocity_mps` carries the acceleration.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Kinematics {
    /// Travel from the rest position (m), positive toward the muzzle
    pub position_m: f64,
    /// Velocity (m/s), positive toward the muzzle
    pub velocity_mps: f64,
}

impl Kinematics {
    pub const AT_REST: Kinematics = Kinematics {
        position_m: 0.0,
        velocity_mps: 0.0,
    };

    /// Time derivative given the current acceleration.
    pub fn derivative(&self, acceleration: f64) -> Kinematics {
        Kinematics {
            position_m: self.velocity_mps,
            velocity_mps: acceleration,
        }
    }

    pub fn add(&self, other: &Kinematics) -> Kinematics {
        Kinematics {
            position_m: self.position_m + other.position_m,
            velocity_mps: self.velocity_mps + other.velocity_mps,
        }
    }

    pub fn scale(&self, factor: f64) -> Kinematics {
        Kinematics {
            position_m: self.position_m * factor,
            velocity_mps: self.velocity_mps * factor,
        }
    }

    pub fn speed(&self) -> f64 {
        self.velocity_mps.abs()
    }

    pub fn is_finite(&self) -> bool {
        self.position_m.is_finite() && self.velocity_mps.is_finite()
    }
}

/// One recorded instant of a run.
///
/// `pressure_pa` and `volume_m3` describe the gas driving the projectile
/// (the sealed chamber before a precompressed valve opens).
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SimulationState {
    pub time_s: f64,
    pub phase: Phase,
    /// Absolute gas pressure (Pa)
    pub pressure_pa: f64,
    /// Gas volume (m³)
    pub volume_m3: f64,
    pub projectile: Kinematics,
    /// Spring-piston only
    pub piston: Option<Kinematics>,
    /// Spring-piston only (N)
    pub spring_force_n: Option<f64>,
    /// Precompressed-air only, 0 (shut) to 1 (full lift)
    pub valve_lift: Option<f64>,
}

impl SimulationState {
    /// Largest speed among the moving bodies.
    pub fn max_speed(&self) -> f64 {
        let piston = self.piston.map(|p| p.speed()).unwrap_or(0.0);
        self.projectile.speed().max(piston)
    }

    /// True when every recorded value is a finite number.
    pub fn is_finite(&self) -> bool {
        self.time_s.is_finite()
            && self.pressure_pa.is_finite()
            && self.volume_m3.is_finite()
            && self.projectile.is_finite()
            && self.piston.is_none_or(|p| p.is_finite())
            && self.spring_force_n.is_none_or(f64::is_finite)
            && self.valve_lift.is_none_or(f64::is_finite)
    }
}
