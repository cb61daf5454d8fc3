//! Polytropic gas volume shared by both drivers.

use crate::error::{SimError, SimResult};
use ag_core::constants::{GAMMA_AIR, R_AIR, ROOM_TEMPERATURE_K, STANDARD_ATMOSPHERE_PA};
use ag_core::{ensure_finite, ensure_positive};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Exponents closer to 1 than this use the isothermal (logarithmic) forms.
const ISOTHERMAL_EPS: f64 = 1e-9;

/// Gas properties and surroundings shared by every configuration.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct GasConfig {
    /// Absolute pressure outside the gun (Pa)
    pub ambient_pressure_pa: f64,
    /// Temperature of all gas at t = 0 (K)
    pub initial_temperature_k: f64,
    /// Process exponent n in P·Vⁿ = const (1.0 isothermal, 1.4 adiabatic air)
    pub polytropic_exponent: f64,
    /// Specific gas constant (J/(kg·K))
    pub gas_constant_j_per_kg_k: f64,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            ambient_pressure_pa: STANDARD_ATMOSPHERE_PA,
            initial_temperature_k: ROOM_TEMPERATURE_K,
            polytropic_exponent: GAMMA_AIR,
            gas_constant_j_per_kg_k: R_AIR,
        }
    }
}

impl GasConfig {
    pub fn validate(&self) -> SimResult<()> {
        ensure_positive(self.ambient_pressure_pa, "gas.ambient_pressure_pa")?;
        ensure_positive(self.initial_temperature_k, "gas.initial_temperature_k")?;
        ensure_positive(self.gas_constant_j_per_kg_k, "gas.gas_constant_j_per_kg_k")?;
        let n = ensure_finite(self.polytropic_exponent, "gas.polytropic_exponent")?;
        if n < 1.0 {
            return Err(SimError::config(
                "gas.polytropic_exponent",
                n,
                "must be at least 1.0 (isothermal)",
            ));
        }
        Ok(())
    }

    /// Gas at `pressure_pa` filling `volume_m3` at the configured temperature.
    pub fn gas_at(&self, pressure_pa: f64, volume_m3: f64) -> SimResult<PolytropicGas> {
        PolytropicGas::new(
            pressure_pa,
            volume_m3,
            self.initial_temperature_k,
            self.polytropic_exponent,
            self.gas_constant_j_per_kg_k,
        )
    }
}

/// A fixed mass of ideal gas following P·Vⁿ = const from a reference state.
///
/// ```text
/// P(V) = P_ref · (V_ref / V)^n
/// T(V) = T_ref · (V_ref / V)^(n-1)
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct PolytropicGas {
    pub reference_pressure_pa: f64,
    pub reference_volume_m3: f64,
    pub reference_temperature_k: f64,
    pub exponent: f64,
    pub gas_constant: f64,
}

impl PolytropicGas {
    pub fn new(
        pressure_pa: f64,
        volume_m3: f64,
        temperature_k: f64,
        exponent: f64,
        gas_constant: f64,
    ) -> SimResult<Self> {
        Ok(Self {
            reference_pressure_pa: ensure_positive(pressure_pa, "reference pressure")?,
            reference_volume_m3: ensure_positive(volume_m3, "reference volume")?,
            reference_temperature_k: ensure_positive(temperature_k, "reference temperature")?,
            exponent: ensure_positive(exponent, "polytropic exponent")?,
            gas_constant: ensure_positive(gas_constant, "gas constant")?,
        })
    }

    /// Instantaneous pressure (Pa) at `volume_m3`.
    ///
    /// # Errors
    /// `InvalidState` when the volume is zero, negative or not finite.
    pub fn pressure(&self, volume_m3: f64) -> SimResult<f64> {
        let v = check_volume(volume_m3)?;
        Ok(self.reference_pressure_pa * (self.reference_volume_m3 / v).powf(self.exponent))
    }

    /// Instantaneous temperature (K) at `volume_m3`.
    pub fn temperature(&self, volume_m3: f64) -> SimResult<f64> {
        let v = check_volume(volume_m3)?;
        Ok(self.reference_temperature_k
            * (self.reference_volume_m3 / v).powf(self.exponent - 1.0))
    }

    pub fn mass_kg(&self) -> f64 {
        self.reference_pressure_pa * self.reference_volume_m3
            / (self.gas_constant * self.reference_temperature_k)
    }

    pub fn density(&self, volume_m3: f64) -> SimResult<f64> {
        let v = check_volume(volume_m3)?;
        Ok(self.mass_kg() / v)
    }

    /// Work done by the gas, ∫P dV, going from `v1` to `v2`.
    pub fn expansion_work(&self, v1: f64, v2: f64) -> SimResult<f64> {
        let v1 = check_volume(v1)?;
        let v2 = check_volume(v2)?;
        let pv = self.reference_pressure_pa * self.reference_volume_m3;
        let n = self.exponent;
        if (n - 1.0).abs() < ISOTHERMAL_EPS {
            return Ok(pv * (v2 / v1).ln());
        }
        let vr = self.reference_volume_m3;
        Ok(pv / (1.0 - n) * ((v2 / vr).powf(1.0 - n) - (v1 / vr).powf(1.0 - n)))
    }

    /// Volume at which the gas has relaxed to `pressure_pa`.
    pub fn volume_at_pressure(&self, pressure_pa: f64) -> SimResult<f64> {
        let p = ensure_positive(pressure_pa, "pressure")?;
        Ok(self.reference_volume_m3 * (self.reference_pressure_pa / p).powf(1.0 / self.exponent))
    }

    /// Most useful work the gas can deliver expanding from `v_from` against `ambient_pa`.
    ///
    /// Maximum of ∫(P − P_amb) dV, reached where the gas pressure falls to
    /// ambient; zero if the gas is not above ambient to begin with.
    pub fn available_work(&self, v_from: f64, ambient_pa: f64) -> SimResult<f64> {
        let p_from = self.pressure(v_from)?;
        if p_from <= ambient_pa {
            return Ok(0.0);
        }
        let v_eq = self.volume_at_pressure(ambient_pa)?;
        let work = self.expansion_work(v_from, v_eq)? - ambient_pa * (v_eq - v_from);
        Ok(work.max(0.0))
    }

    /// Adiabatic, work-free mixing with a second gas volume.
    ///
    /// Mass and internal energy `Σ Pᵢ·Vᵢ / (γ − 1)` are conserved, giving
    /// `P = Σ Pᵢ·Vᵢ / Σ Vᵢ` at the combined volume. The result keeps this
    /// gas's process exponent.
    pub fn merge(&self, v_self: f64, other: &PolytropicGas, v_other: f64) -> SimResult<Self> {
        let p_a = self.pressure(v_self)?;
        let p_b = other.pressure(v_other)?;
        let m_a = self.mass_kg();
        let m_b = other.mass_kg();

        let volume = v_self + v_other;
        let pressure = (p_a * v_self + p_b * v_other) / volume;
        let gas_constant = (m_a * self.gas_constant + m_b * other.gas_constant) / (m_a + m_b);
        let temperature = pressure * volume / ((m_a + m_b) * gas_constant);

        PolytropicGas::new(pressure, volume, temperature, self.exponent, gas_constant)
    }
}

fn check_volume(volume_m3: f64) -> SimResult<f64> {
    if volume_m3.is_finite() && volume_m3 > 0.0 {
        Ok(volume_m3)
    } else {
        Err(SimError::invalid_state(format!(
            "gas volume must be positive, got {volume_m3:e} m^3"
        )))
    }
}
