//! Precompressed-air driver.
//!
//! A charged chamber sits behind a valve. While the valve is shut the
//! projectile is at rest with ambient air on both sides. The valve stem
//! follows a fixed opening profile; once it cracks, the chamber and the
//! air behind the projectile become one volume:
//!
//! ```text
//! V       = V_c + V_e + x·A_b
//! m·a     = (p(V) - Δp_valve - p_amb)·A_b - friction
//! Δp_valve = ½ρ(A_b·v / A_eff(t))²,  clamped to p - p_amb
//! ```

use crate::body::{Body, Friction, free_flight, valve_throttle_loss};
use crate::error::{SimError, SimResult};
use crate::events::{Signal, Trigger};
use crate::gas::{GasConfig, PolytropicGas};
use crate::model::{DriverKind, GunConfig, GunModel, bodies_settled};
use crate::phase::Phase;
use crate::sim::{ResultSeries, RunControl, SimOptions, run, run_with_control};
use crate::state::{Kinematics, SimulationState};
use crate::sweep::{SweepParameter, Sweepable};
use ag_core::{circle_area, ensure_positive};
use tracing::debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How the open flow area grows with stem lift.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ValveLaw {
    /// area ∝ lift
    #[default]
    Linear,
    /// area ∝ lift² (poppet seat uncovering gradually)
    Quadratic,
}

impl ValveLaw {
    pub fn area_fraction(self, lift: f64) -> f64 {
        let u = lift.clamp(0.0, 1.0);
        match self {
            ValveLaw::Linear => u,
            ValveLaw::Quadratic => u * u,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct ValveConfig {
    /// Discharge coefficient × throat area at full lift (m²)
    pub effective_area_m2: f64,
    /// Time from trigger to full lift (s)
    pub opening_time_s: f64,
    /// Lift at which gas first passes, in (0, 1)
    pub crack_fraction: f64,
    pub law: ValveLaw,
}

impl Default for ValveConfig {
    fn default() -> Self {
        Self {
            effective_area_m2: 8e-5,
            opening_time_s: 5e-4,
            crack_fraction: 0.1,
            law: ValveLaw::Linear,
        }
    }
}

impl ValveConfig {
    pub fn validate(&self) -> SimResult<()> {
        ensure_positive(self.effective_area_m2, "valve.effective_area_m2")?;
        ensure_positive(self.opening_time_s, "valve.opening_time_s")?;
        let crack = self.crack_fraction;
        if !(crack > 0.0 && crack < 1.0) {
            return Err(SimError::config(
                "valve.crack_fraction",
                crack,
                "must lie strictly between 0 and 1",
            ));
        }
        Ok(())
    }

    /// Unclamped opening progress `t / opening_time`.
    pub fn travel(&self, t: f64) -> f64 {
        t / self.opening_time_s
    }

    /// Stem lift in [0, 1].
    pub fn lift(&self, t: f64) -> f64 {
        self.travel(t).clamp(0.0, 1.0)
    }

    pub fn effective_area(&self, t: f64) -> f64 {
        self.effective_area_m2 * self.law.area_fraction(self.lift(t))
    }
}

/// Everything needed to simulate one precompressed-air shot.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct PrecompressedAirConfig {
    pub bore_diameter_m: f64,
    pub chamber_volume_m3: f64,
    /// Volume between the valve and the seated projectile (m³)
    pub expansion_volume_m3: f64,
    pub barrel_length_m: f64,
    pub projectile_mass_kg: f64,
    /// Absolute charge pressure (Pa)
    pub chamber_pressure_pa: f64,
    pub gas: GasConfig,
    pub valve: ValveConfig,
    pub projectile_friction: Friction,
    pub numerics: SimOptions,
}

impl Default for PrecompressedAirConfig {
    fn default() -> Self {
        Self {
            bore_diameter_m: 0.013,
            chamber_volume_m3: 1.74e-5,
            expansion_volume_m3: 0.5e-5,
            barrel_length_m: 0.3,
            projectile_mass_kg: 0.0012,
            chamber_pressure_pa: 583_633.0,
            gas: GasConfig::default(),
            valve: ValveConfig::default(),
            projectile_friction: Friction {
                static_n: 4.0,
                dynamic_n: 0.2,
                viscous_n_s_per_m: 0.0,
                breakaway_length_m: 0.03,
            },
            numerics: SimOptions::default(),
        }
    }
}

impl PrecompressedAirConfig {
    pub fn validate(&self) -> SimResult<()> {
        ensure_positive(self.bore_diameter_m, "bore_diameter_m")?;
        ensure_positive(self.chamber_volume_m3, "chamber_volume_m3")?;
        ensure_positive(self.expansion_volume_m3, "expansion_volume_m3")?;
        ensure_positive(self.barrel_length_m, "barrel_length_m")?;
        ensure_positive(self.projectile_mass_kg, "projectile_mass_kg")?;
        ensure_positive(self.chamber_pressure_pa, "chamber_pressure_pa")?;
        self.gas.validate()?;
        self.valve.validate()?;
        self.projectile_friction.validate([
            "projectile_friction.static_n",
            "projectile_friction.dynamic_n",
            "projectile_friction.viscous_n_s_per_m",
            "projectile_friction.breakaway_length_m",
        ])?;
        self.numerics.validate()
    }
}

/// Integrated state. Gas pressure follows from the projectile position.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PrecompressedAirState {
    pub projectile: Kinematics,
}

/// Precompressed-air model built from a validated configuration.
///
/// The merged gas is created when the valve cracks and replaced on every
/// new run, so one model can be run repeatedly.
#[derive(Clone, Debug)]
pub struct PrecompressedAir {
    config: PrecompressedAirConfig,
    projectile: Body,
    chamber: PolytropicGas,
    merged: Option<PolytropicGas>,
}

impl PrecompressedAir {
    pub fn new(config: PrecompressedAirConfig) -> SimResult<Self> {
        config.validate()?;
        let projectile = Body {
            mass_kg: config.projectile_mass_kg,
            area_m2: circle_area(config.bore_diameter_m),
            friction: config.projectile_friction,
        };
        let chamber = config
            .gas
            .gas_at(config.chamber_pressure_pa, config.chamber_volume_m3)?;
        Ok(Self {
            config,
            projectile,
            chamber,
            merged: None,
        })
    }

    pub fn config(&self) -> &PrecompressedAirConfig {
        &self.config
    }

    /// Combined chamber and barrel volume once the valve is open (m³).
    pub fn open_volume(&self, x: &PrecompressedAirState) -> f64 {
        self.config.chamber_volume_m3
            + self.config.expansion_volume_m3
            + x.projectile.position_m * self.projectile.area_m2
    }

    fn merged(&self) -> SimResult<&PolytropicGas> {
        self.merged
            .as_ref()
            .ok_or_else(|| SimError::invalid_state("valve gas evaluated before the valve opened"))
    }

    fn ambient_pa(&self) -> f64 {
        self.config.gas.ambient_pressure_pa
    }

    /// Net gas drive on the projectile with the valve open (N).
    fn open_drive(&self, t: f64, x: &PrecompressedAirState) -> SimResult<f64> {
        let gas = self.merged()?;
        let volume = self.open_volume(x);
        let p = gas.pressure(volume)?;
        let ambient = self.ambient_pa();
        let flow = self.projectile.area_m2 * x.projectile.velocity_mps;
        let loss = valve_throttle_loss(
            gas.density(volume)?,
            flow,
            self.config.valve.effective_area(t),
        )
        .min((p - ambient).max(0.0));
        Ok(self.projectile.gas_force(p - loss, ambient))
    }
}

impl GunModel for PrecompressedAir {
    type State = PrecompressedAirState;

    fn kind(&self) -> DriverKind {
        DriverKind::PrecompressedAir
    }

    fn initial_state(&self) -> PrecompressedAirState {
        PrecompressedAirState::default()
    }

    fn rhs(
        &self,
        phase: Phase,
        t: f64,
        x: &PrecompressedAirState,
    ) -> SimResult<PrecompressedAirState> {
        let k = &x.projectile;
        let projectile = match phase {
            // Ambient air on both sides of the projectile.
            Phase::Compressing => k.derivative(self.projectile.acceleration(0.0, k)),
            Phase::ValveOpen | Phase::Expanding => {
                k.derivative(self.projectile.acceleration(self.open_drive(t, x)?, k))
            }
            Phase::BottomedOut => {
                return Err(SimError::invalid_state(
                    "precompressed-air gun has no piston stop",
                ));
            }
            Phase::Exited | Phase::Stopped => free_flight(k),
        };
        Ok(PrecompressedAirState { projectile })
    }

    fn add(&self, a: &PrecompressedAirState, b: &PrecompressedAirState) -> PrecompressedAirState {
        PrecompressedAirState {
            projectile: a.projectile.add(&b.projectile),
        }
    }

    fn scale(&self, a: &PrecompressedAirState, scale: f64) -> PrecompressedAirState {
        PrecompressedAirState {
            projectile: a.projectile.scale(scale),
        }
    }

    fn triggers(&self, phase: Phase) -> Vec<Trigger> {
        let exit = Trigger::rising(
            Signal::ProjectilePosition,
            self.config.barrel_length_m,
            Phase::Exited,
        );
        match phase {
            Phase::Compressing => vec![Trigger::rising(
                Signal::ValveTravel,
                self.config.valve.crack_fraction,
                Phase::ValveOpen,
            )],
            Phase::ValveOpen => vec![
                Trigger::rising(Signal::ValveTravel, 1.0, Phase::Expanding),
                exit,
            ],
            Phase::Expanding => vec![exit],
            _ => Vec::new(),
        }
    }

    fn signal(&self, signal: Signal, t: f64, x: &PrecompressedAirState) -> SimResult<f64> {
        match signal {
            Signal::ValveTravel => Ok(self.config.valve.travel(t)),
            Signal::ProjectilePosition => Ok(x.projectile.position_m),
            Signal::GasVolumeRate => Ok(x.projectile.velocity_mps * self.projectile.area_m2),
            Signal::PistonPosition => Err(SimError::InvalidArg {
                what: "precompressed-air gun has no piston",
            }),
        }
    }

    fn enter_phase(
        &mut self,
        from: Phase,
        to: Phase,
        t: f64,
        x: &mut PrecompressedAirState,
    ) -> SimResult<()> {
        if to == Phase::Stopped && from == Phase::Compressing {
            // Timed out before the valve cracked: the chamber is still sealed.
            self.merged = None;
            return Ok(());
        }
        if to != Phase::ValveOpen {
            return Ok(());
        }
        let behind = self.config.expansion_volume_m3
            + x.projectile.position_m * self.projectile.area_m2;
        let barrel_air = self.config.gas.gas_at(self.ambient_pa(), behind)?;
        let merged = self
            .chamber
            .merge(self.config.chamber_volume_m3, &barrel_air, behind)?;
        debug!(
            time_s = t,
            pressure_pa = merged.reference_pressure_pa,
            volume_m3 = merged.reference_volume_m3,
            "valve cracked, chamber merged with barrel air"
        );
        self.merged = Some(merged);
        Ok(())
    }

    fn snapshot(
        &self,
        phase: Phase,
        t: f64,
        x: &PrecompressedAirState,
    ) -> SimResult<SimulationState> {
        let (pressure_pa, volume_m3) = match (&self.merged, phase) {
            (Some(gas), p) if p != Phase::Compressing => {
                let v = self.open_volume(x);
                (gas.pressure(v)?, v)
            }
            _ => {
                let v = self.config.chamber_volume_m3;
                (self.chamber.pressure(v)?, v)
            }
        };
        Ok(SimulationState {
            time_s: t,
            phase,
            pressure_pa,
            volume_m3,
            projectile: x.projectile,
            piston: None,
            spring_force_n: None,
            valve_lift: Some(self.config.valve.lift(t)),
        })
    }

    fn is_settled(
        &self,
        phase: Phase,
        t: f64,
        x: &PrecompressedAirState,
        dt: f64,
        settle_speed_mps: f64,
    ) -> SimResult<bool> {
        if !phase.can_settle() {
            return Ok(false);
        }
        let d = self.rhs(phase, t, x)?;
        Ok(bodies_settled(
            &[(x.projectile, d.projectile)],
            dt,
            settle_speed_mps,
        ))
    }

    fn stored_energy_j(&self) -> SimResult<f64> {
        self.chamber
            .available_work(self.config.chamber_volume_m3, self.ambient_pa())
    }

    fn projectile_mass_kg(&self) -> f64 {
        self.projectile.mass_kg
    }
}

impl GunConfig for PrecompressedAirConfig {
    fn kind(&self) -> DriverKind {
        DriverKind::PrecompressedAir
    }

    fn validate(&self) -> SimResult<()> {
        PrecompressedAirConfig::validate(self)
    }

    fn numerics(&self) -> &SimOptions {
        &self.numerics
    }

    fn numerics_mut(&mut self) -> &mut SimOptions {
        &mut self.numerics
    }

    fn simulate(&self) -> SimResult<ResultSeries> {
        simulate(self)
    }
}

impl Sweepable for PrecompressedAirConfig {
    fn with_parameter(&self, parameter: SweepParameter, value: f64) -> SimResult<Self> {
        let mut config = self.clone();
        let field = match parameter {
            SweepParameter::ChargePressure => &mut config.chamber_pressure_pa,
            SweepParameter::ProjectileMass => &mut config.projectile_mass_kg,
            SweepParameter::BoreDiameter => &mut config.bore_diameter_m,
            SweepParameter::BarrelLength => &mut config.barrel_length_m,
            SweepParameter::ChamberVolume => &mut config.chamber_volume_m3,
            SweepParameter::ExpansionVolume => &mut config.expansion_volume_m3,
            SweepParameter::ValveOpeningTime => &mut config.valve.opening_time_s,
            SweepParameter::SpringRate
            | SweepParameter::SpringPrecompression
            | SweepParameter::PistonMass
            | SweepParameter::Stroke => return Err(parameter.not_applicable(value)),
        };
        *field = value;
        Ok(config)
    }
}

/// Validate `config`, build the model and run it with `config.numerics`.
pub fn simulate(config: &PrecompressedAirConfig) -> SimResult<ResultSeries> {
    let mut model = PrecompressedAir::new(config.clone())?;
    run(&mut model, &config.numerics)
}

/// [`simulate`] with cancellation and progress hooks.
pub fn simulate_with_control(
    config: &PrecompressedAirConfig,
    control: RunControl<'_>,
) -> SimResult<ResultSeries> {
    let mut model = PrecompressedAir::new(config.clone())?;
    run_with_control(&mut model, &config.numerics, control)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ag_core::constants::STANDARD_ATMOSPHERE_PA;

    fn model() -> PrecompressedAir {
        PrecompressedAir::new(PrecompressedAirConfig::default()).unwrap()
    }

    #[test]
    fn crack_fraction_must_be_inside_unit_interval() {
        for crack in [0.0, 1.0, 1.5, -0.1] {
            let config = PrecompressedAirConfig {
                valve: ValveConfig {
                    crack_fraction: crack,
                    ..ValveConfig::default()
                },
                ..PrecompressedAirConfig::default()
            };
            match config.validate() {
                Err(SimError::Configuration { field, .. }) => {
                    assert_eq!(field, "valve.crack_fraction")
                }
                other => panic!("crack {crack}: unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn valve_profile() {
        let valve = ValveConfig::default();
        assert_eq!(valve.lift(-1.0), 0.0);
        assert!((valve.lift(2.5e-4) - 0.5).abs() < 1e-12);
        assert_eq!(valve.lift(1.0), 1.0);
        assert!((valve.travel(1e-3) - 2.0).abs() < 1e-12);

        let quad = ValveConfig {
            law: ValveLaw::Quadratic,
            ..ValveConfig::default()
        };
        assert!((quad.effective_area(2.5e-4) - 0.25 * quad.effective_area_m2).abs() < 1e-18);
    }

    #[test]
    fn sealed_chamber_holds_projectile() {
        let m = model();
        let x = m.initial_state();
        let d = m.rhs(Phase::Compressing, 1e-5, &x).unwrap();
        assert_eq!(d.projectile, Kinematics::default());
        let snap = m.snapshot(Phase::Compressing, 1e-5, &x).unwrap();
        assert_eq!(snap.pressure_pa, 583_633.0);
        assert_eq!(snap.volume_m3, 1.74e-5);
    }

    #[test]
    fn valve_open_before_merge_is_invalid() {
        let m = model();
        assert!(matches!(
            m.rhs(Phase::ValveOpen, 1e-4, &m.initial_state()),
            Err(SimError::InvalidState { .. })
        ));
    }

    #[test]
    fn merge_at_crack_conserves_pv() {
        let mut m = model();
        let mut x = m.initial_state();
        m.enter_phase(Phase::Compressing, Phase::ValveOpen, 5e-5, &mut x)
            .unwrap();
        let snap = m.snapshot(Phase::ValveOpen, 5e-5, &x).unwrap();
        let expected =
            (583_633.0 * 1.74e-5 + STANDARD_ATMOSPHERE_PA * 0.5e-5) / (1.74e-5 + 0.5e-5);
        assert!((snap.pressure_pa - expected).abs() < 1e-6 * expected);
        assert!((snap.volume_m3 - 2.24e-5).abs() < 1e-15);

        // Static friction (4 N) is far below the gas drive once open.
        let d = m.rhs(Phase::ValveOpen, 5e-5, &x).unwrap();
        assert!(d.projectile.velocity_mps > 0.0);
    }

    #[test]
    fn timeout_before_crack_reports_sealed_chamber() {
        let mut config = PrecompressedAirConfig::default();
        config.numerics.t_end = 2e-5;
        let series = simulate(&config).unwrap();
        assert_eq!(series.phase_sequence(), vec![Phase::Compressing, Phase::Stopped]);
        let last = series.snapshots.last().unwrap();
        assert_eq!(last.pressure_pa, 583_633.0);
        assert_eq!(last.volume_m3, config.chamber_volume_m3);
    }

    #[test]
    fn throttle_loss_never_reverses_drive() {
        let mut m = model();
        let mut x = m.initial_state();
        m.enter_phase(Phase::Compressing, Phase::ValveOpen, 5e-5, &mut x)
            .unwrap();
        x.projectile.velocity_mps = 1e4;
        assert!(m.open_drive(5e-5, &x).unwrap() > -1e-9);
    }

    #[test]
    fn stored_energy_is_chamber_available_work() {
        let e = model().stored_energy_j().unwrap();
        assert!(e > 5.5 && e < 5.7, "stored energy {e}");
    }

    #[test]
    fn spring_parameters_do_not_apply() {
        assert!(
            PrecompressedAirConfig::default()
                .with_parameter(SweepParameter::Stroke, 0.1)
                .is_err()
        );
        let c = PrecompressedAirConfig::default()
            .with_parameter(SweepParameter::ValveOpeningTime, 1e-3)
            .unwrap();
        assert_eq!(c.valve.opening_time_s, 1e-3);
    }
}
