//! Rigid bodies moving along the bore: pistons and projectiles.
//!
//! All functions here are pure. They turn a drive force and the current
//! kinematics into an acceleration, so they can be evaluated at every RK
//! stage without side effects.

use crate::error::SimResult;
use crate::state::Kinematics;
use ag_core::ensure_non_negative;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Speeds at or below this count as "at rest" for stiction (m/s).
pub const REST_SPEED_MPS: f64 = 1e-9;

/// Sliding resistance between a body and its bore.
///
/// ```text
/// coulomb = static_n   while position <= breakaway_length_m
///         = dynamic_n  beyond it
/// moving:  F_net = drive - (coulomb + viscous * |v|) * sign(v)
/// at rest: F_net = 0 when |drive| <= coulomb, else drive - coulomb * sign(drive)
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct Friction {
    /// Coulomb force near the start of travel (N)
    pub static_n: f64,
    /// Coulomb force past the breakaway length (N)
    pub dynamic_n: f64,
    /// Viscous coefficient (N·s/m)
    pub viscous_n_s_per_m: f64,
    /// Travel over which `static_n` applies (m)
    pub breakaway_length_m: f64,
}

impl Friction {
    pub const NONE: Friction = Friction {
        static_n: 0.0,
        dynamic_n: 0.0,
        viscous_n_s_per_m: 0.0,
        breakaway_length_m: 0.0,
    };

    /// Check every term is finite and non-negative.
    ///
    /// `fields` names the four terms in declaration order so errors point at
    /// the owning configuration field.
    pub(crate) fn validate(&self, fields: [&'static str; 4]) -> SimResult<()> {
        ensure_non_negative(self.static_n, fields[0])?;
        ensure_non_negative(self.dynamic_n, fields[1])?;
        ensure_non_negative(self.viscous_n_s_per_m, fields[2])?;
        ensure_non_negative(self.breakaway_length_m, fields[3])?;
        Ok(())
    }

    /// Coulomb magnitude at `position_m`.
    pub fn coulomb_n(&self, position_m: f64) -> f64 {
        if position_m <= self.breakaway_length_m {
            self.static_n
        } else {
            self.dynamic_n
        }
    }
}

/// A piston or projectile.
#[derive(Clone, Debug, PartialEq)]
pub struct Body {
    pub mass_kg: f64,
    /// Face area the gas acts on (m²)
    pub area_m2: f64,
    pub friction: Friction,
}

impl Body {
    /// Force from a pressure difference across the face, positive toward the muzzle.
    pub fn gas_force(&self, pressure_pa: f64, back_pressure_pa: f64) -> f64 {
        (pressure_pa - back_pressure_pa) * self.area_m2
    }

    /// Drive force after friction and stiction.
    pub fn net_force(&self, drive_n: f64, k: &Kinematics) -> f64 {
        let coulomb = self.friction.coulomb_n(k.position_m);
        if k.velocity_mps.abs() <= REST_SPEED_MPS {
            if drive_n.abs() <= coulomb {
                return 0.0;
            }
            return drive_n - coulomb * drive_n.signum();
        }
        let resisting = coulomb + self.friction.viscous_n_s_per_m * k.velocity_mps.abs();
        drive_n - resisting * k.velocity_mps.signum()
    }

    pub fn acceleration(&self, drive_n: f64, k: &Kinematics) -> f64 {
        self.net_force(drive_n, k) / self.mass_kg
    }

    pub fn kinetic_energy(&self, velocity_mps: f64) -> f64 {
        0.5 * self.mass_kg * velocity_mps * velocity_mps
    }
}

/// Coil spring behind a piston.
///
/// The piston starts cocked at position 0 with the spring compressed by
/// `precompression_m + stroke_m`. At the stop (`x = stroke_m`) only the
/// precompression remains.
#[derive(Clone, Debug, PartialEq)]
pub struct Spring {
    pub rate_n_per_m: f64,
    pub precompression_m: f64,
    pub stroke_m: f64,
}

impl Spring {
    /// Force on the piston at `piston_position_m`; zero past the free length.
    pub fn force(&self, piston_position_m: f64) -> f64 {
        let compression = self.precompression_m + self.stroke_m - piston_position_m;
        if compression > 0.0 {
            self.rate_n_per_m * compression
        } else {
            0.0
        }
    }

    pub fn preload_n(&self) -> f64 {
        self.rate_n_per_m * self.precompression_m
    }

    /// Energy given up by the spring over the full stroke.
    pub fn released_energy(&self) -> f64 {
        let cocked = self.precompression_m + self.stroke_m;
        0.5 * self.rate_n_per_m * (cocked * cocked - self.precompression_m * self.precompression_m)
    }
}

/// Derivative of a projectile that has left the barrel: coasting, no gas force.
pub fn free_flight(k: &Kinematics) -> Kinematics {
    k.derivative(0.0)
}

/// Orifice pressure drop ½ρ(Q/A_eff)² across a partially open valve.
///
/// Zero for non-positive flow. A shut valve (`effective_area_m2 <= 0`) with
/// positive flow gives an infinite drop, which callers clamp to the available
/// pressure difference.
pub fn valve_throttle_loss(
    density_kg_m3: f64,
    flow_rate_m3_s: f64,
    effective_area_m2: f64,
) -> f64 {
    if flow_rate_m3_s <= 0.0 {
        return 0.0;
    }
    if effective_area_m2 <= 0.0 {
        return f64::INFINITY;
    }
    let throat_velocity = flow_rate_m3_s / effective_area_m2;
    0.5 * density_kg_m3 * throat_velocity * throat_velocity
}
