//! Spring-piston driver.
//!
//! A cocked spring throws a piston forward, compressing the air column in
//! front of it. The air pushes the projectile down the barrel.
//!
//! ```text
//! V        = V_dead + (stroke - x_p)·A_p + x_d·A_b
//! m_p·a_p  = F_spring(x_p) + (p_amb - p)·A_p - friction
//! m_d·a_d  = (p - p_amb)·A_b - friction
//! ```
//!
//! The gas is polytropic from its initial state, so pressure is a function of
//! volume alone and the integrated state holds only the two bodies.

use crate::body::{Body, Friction, Spring, free_flight};
use crate::error::{SimError, SimResult};
use crate::events::{Signal, Trigger};
use crate::gas::{GasConfig, PolytropicGas};
use crate::model::{DriverKind, GunConfig, GunModel, bodies_settled};
use crate::phase::Phase;
use crate::sim::{ResultSeries, RunControl, SimOptions, run, run_with_control};
use crate::state::{Kinematics, SimulationState};
use crate::sweep::{SweepParameter, Sweepable};
use ag_core::constants::STANDARD_ATMOSPHERE_PA;
use ag_core::{circle_area, ensure_non_negative, ensure_positive};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Everything needed to simulate one spring-piston shot.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct SpringPistonConfig {
    /// Barrel bore (m)
    pub bore_diameter_m: f64,
    pub piston_diameter_m: f64,
    /// Initial air column length, also the piston travel to the stop (m)
    pub stroke_m: f64,
    /// Transfer port and other unswept volume (m³)
    pub dead_volume_m3: f64,
    pub barrel_length_m: f64,
    pub piston_mass_kg: f64,
    pub projectile_mass_kg: f64,
    /// Absolute pressure of the air column before firing (Pa)
    pub initial_pressure_pa: f64,
    pub gas: GasConfig,
    pub spring_rate_n_per_m: f64,
    /// Spring compression left when the piston rests on the stop (m)
    pub spring_precompression_m: f64,
    pub piston_friction: Friction,
    pub projectile_friction: Friction,
    pub numerics: SimOptions,
}

impl Default for SpringPistonConfig {
    fn default() -> Self {
        Self {
            bore_diameter_m: 0.0127,
            piston_diameter_m: 0.035052,
            stroke_m: 0.1016,
            dead_volume_m3: 0.0,
            barrel_length_m: 0.35,
            piston_mass_kg: 0.06,
            projectile_mass_kg: 0.0012,
            initial_pressure_pa: STANDARD_ATMOSPHERE_PA,
            gas: GasConfig::default(),
            spring_rate_n_per_m: 523.0 * 11.0 / 5.0,
            spring_precompression_m: 0.0254,
            piston_friction: Friction::NONE,
            projectile_friction: Friction::NONE,
            numerics: SimOptions::default(),
        }
    }
}

impl SpringPistonConfig {
    pub fn validate(&self) -> SimResult<()> {
        ensure_positive(self.bore_diameter_m, "bore_diameter_m")?;
        ensure_positive(self.piston_diameter_m, "piston_diameter_m")?;
        ensure_positive(self.stroke_m, "stroke_m")?;
        ensure_non_negative(self.dead_volume_m3, "dead_volume_m3")?;
        ensure_positive(self.barrel_length_m, "barrel_length_m")?;
        ensure_positive(self.piston_mass_kg, "piston_mass_kg")?;
        ensure_positive(self.projectile_mass_kg, "projectile_mass_kg")?;
        ensure_positive(self.initial_pressure_pa, "initial_pressure_pa")?;
        ensure_positive(self.spring_rate_n_per_m, "spring_rate_n_per_m")?;
        ensure_non_negative(self.spring_precompression_m, "spring_precompression_m")?;
        self.gas.validate()?;
        self.piston_friction.validate([
            "piston_friction.static_n",
            "piston_friction.dynamic_n",
            "piston_friction.viscous_n_s_per_m",
            "piston_friction.breakaway_length_m",
        ])?;
        self.projectile_friction.validate([
            "projectile_friction.static_n",
            "projectile_friction.dynamic_n",
            "projectile_friction.viscous_n_s_per_m",
            "projectile_friction.breakaway_length_m",
        ])?;
        self.numerics.validate()
    }

    /// Air column volume with the piston cocked and the projectile seated (m³).
    pub fn initial_volume_m3(&self) -> f64 {
        self.dead_volume_m3 + self.stroke_m * circle_area(self.piston_diameter_m)
    }
}

/// Integrated state: piston and projectile.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SpringPistonState {
    pub piston: Kinematics,
    pub projectile: Kinematics,
}

/// Spring-piston model built from a validated configuration.
#[derive(Clone, Debug)]
pub struct SpringPiston {
    config: SpringPistonConfig,
    piston: Body,
    projectile: Body,
    spring: Spring,
    gas: PolytropicGas,
}

impl SpringPiston {
    pub fn new(config: SpringPistonConfig) -> SimResult<Self> {
        config.validate()?;
        let piston = Body {
            mass_kg: config.piston_mass_kg,
            area_m2: circle_area(config.piston_diameter_m),
            friction: config.piston_friction,
        };
        let projectile = Body {
            mass_kg: config.projectile_mass_kg,
            area_m2: circle_area(config.bore_diameter_m),
            friction: config.projectile_friction,
        };
        let spring = Spring {
            rate_n_per_m: config.spring_rate_n_per_m,
            precompression_m: config.spring_precompression_m,
            stroke_m: config.stroke_m,
        };
        let gas = config
            .gas
            .gas_at(config.initial_pressure_pa, config.initial_volume_m3())?;
        Ok(Self {
            config,
            piston,
            projectile,
            spring,
            gas,
        })
    }

    pub fn config(&self) -> &SpringPistonConfig {
        &self.config
    }

    pub fn gas_volume(&self, x: &SpringPistonState) -> f64 {
        self.config.dead_volume_m3
            + (self.config.stroke_m - x.piston.position_m) * self.piston.area_m2
            + x.projectile.position_m * self.projectile.area_m2
    }

    fn gas_volume_rate(&self, x: &SpringPistonState) -> f64 {
        x.projectile.velocity_mps * self.projectile.area_m2
            - x.piston.velocity_mps * self.piston.area_m2
    }

    fn ambient_pa(&self) -> f64 {
        self.config.gas.ambient_pressure_pa
    }
}

impl GunModel for SpringPiston {
    type State = SpringPistonState;

    fn kind(&self) -> DriverKind {
        DriverKind::SpringPiston
    }

    fn initial_state(&self) -> SpringPistonState {
        SpringPistonState::default()
    }

    fn rhs(&self, phase: Phase, _t: f64, x: &SpringPistonState) -> SimResult<SpringPistonState> {
        if phase.is_terminal() {
            return Ok(SpringPistonState {
                piston: Kinematics::default(),
                projectile: free_flight(&x.projectile),
            });
        }

        let p = self.gas.pressure(self.gas_volume(x))?;
        let ambient = self.ambient_pa();

        let piston = if phase == Phase::BottomedOut {
            Kinematics::default()
        } else {
            let drive = self.spring.force(x.piston.position_m)
                + self.piston.gas_force(ambient, p);
            x.piston
                .derivative(self.piston.acceleration(drive, &x.piston))
        };
        let drive = self.projectile.gas_force(p, ambient);
        let projectile = x
            .projectile
            .derivative(self.projectile.acceleration(drive, &x.projectile));

        Ok(SpringPistonState { piston, projectile })
    }

    fn add(&self, a: &SpringPistonState, b: &SpringPistonState) -> SpringPistonState {
        SpringPistonState {
            piston: a.piston.add(&b.piston),
            projectile: a.projectile.add(&b.projectile),
        }
    }

    fn scale(&self, a: &SpringPistonState, scale: f64) -> SpringPistonState {
        SpringPistonState {
            piston: a.piston.scale(scale),
            projectile: a.projectile.scale(scale),
        }
    }

    fn triggers(&self, phase: Phase) -> Vec<Trigger> {
        let exit = Trigger::rising(
            Signal::ProjectilePosition,
            self.config.barrel_length_m,
            Phase::Exited,
        );
        let stop = Trigger::rising(
            Signal::PistonPosition,
            self.config.stroke_m,
            Phase::BottomedOut,
        );
        match phase {
            Phase::Compressing => vec![
                Trigger::rising(Signal::GasVolumeRate, 0.0, Phase::Expanding),
                stop,
                exit,
            ],
            Phase::Expanding => vec![stop, exit],
            Phase::BottomedOut => vec![exit],
            _ => Vec::new(),
        }
    }

    fn signal(&self, signal: Signal, _t: f64, x: &SpringPistonState) -> SimResult<f64> {
        match signal {
            Signal::GasVolumeRate => Ok(self.gas_volume_rate(x)),
            Signal::PistonPosition => Ok(x.piston.position_m),
            Signal::ProjectilePosition => Ok(x.projectile.position_m),
            Signal::ValveTravel => Err(SimError::InvalidArg {
                what: "spring-piston gun has no valve",
            }),
        }
    }

    fn enter_phase(
        &mut self,
        _from: Phase,
        to: Phase,
        _t: f64,
        x: &mut SpringPistonState,
    ) -> SimResult<()> {
        if to == Phase::BottomedOut {
            x.piston = Kinematics {
                position_m: self.config.stroke_m,
                velocity_mps: 0.0,
            };
        }
        Ok(())
    }

    fn snapshot(&self, phase: Phase, t: f64, x: &SpringPistonState) -> SimResult<SimulationState> {
        let volume_m3 = self.gas_volume(x);
        Ok(SimulationState {
            time_s: t,
            phase,
            pressure_pa: self.gas.pressure(volume_m3)?,
            volume_m3,
            projectile: x.projectile,
            piston: Some(x.piston),
            spring_force_n: Some(self.spring.force(x.piston.position_m)),
            valve_lift: None,
        })
    }

    fn is_settled(
        &self,
        phase: Phase,
        t: f64,
        x: &SpringPistonState,
        dt: f64,
        settle_speed_mps: f64,
    ) -> SimResult<bool> {
        if !phase.can_settle() {
            return Ok(false);
        }
        let d = self.rhs(phase, t, x)?;
        let mut bodies = vec![(x.projectile, d.projectile)];
        if phase != Phase::BottomedOut {
            bodies.push((x.piston, d.piston));
        }
        Ok(bodies_settled(&bodies, dt, settle_speed_mps))
    }

    fn stored_energy_j(&self) -> SimResult<f64> {
        let gas = self
            .gas
            .available_work(self.config.initial_volume_m3(), self.ambient_pa())?;
        Ok(self.spring.released_energy() + gas)
    }

    fn projectile_mass_kg(&self) -> f64 {
        self.projectile.mass_kg
    }
}

impl GunConfig for SpringPistonConfig {
    fn kind(&self) -> DriverKind {
        DriverKind::SpringPiston
    }

    fn validate(&self) -> SimResult<()> {
        SpringPistonConfig::validate(self)
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

impl Sweepable for SpringPistonConfig {
    fn with_parameter(&self, parameter: SweepParameter, value: f64) -> SimResult<Self> {
        let mut config = self.clone();
        let field = match parameter {
            SweepParameter::ChargePressure => &mut config.initial_pressure_pa,
            SweepParameter::SpringRate => &mut config.spring_rate_n_per_m,
            SweepParameter::SpringPrecompression => &mut config.spring_precompression_m,
            SweepParameter::PistonMass => &mut config.piston_mass_kg,
            SweepParameter::ProjectileMass => &mut config.projectile_mass_kg,
            SweepParameter::BoreDiameter => &mut config.bore_diameter_m,
            SweepParameter::BarrelLength => &mut config.barrel_length_m,
            SweepParameter::Stroke => &mut config.stroke_m,
            SweepParameter::ChamberVolume
            | SweepParameter::ExpansionVolume
            | SweepParameter::ValveOpeningTime => return Err(parameter.not_applicable(value)),
        };
        *field = value;
        Ok(config)
    }
}

/// Validate `config`, build the model and run it with `config.numerics`.
pub fn simulate(config: &SpringPistonConfig) -> SimResult<ResultSeries> {
    let mut model = SpringPiston::new(config.clone())?;
    run(&mut model, &config.numerics)
}

/// [`simulate`] with cancellation and progress hooks.
pub fn simulate_with_control(
    config: &SpringPistonConfig,
    control: RunControl<'_>,
) -> SimResult<ResultSeries> {
    let mut model = SpringPiston::new(config.clone())?;
    run_with_control(&mut model, &config.numerics, control)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ag_core::{Tolerances, nearly_equal};

    fn model() -> SpringPiston {
        SpringPiston::new(SpringPistonConfig::default()).unwrap()
    }

    #[test]
    fn defaults_are_valid() {
        assert!(SpringPistonConfig::default().validate().is_ok());
    }

    #[test]
    fn invalid_mass_names_field() {
        let config = SpringPistonConfig {
            piston_mass_kg: 0.0,
            ..SpringPistonConfig::default()
        };
        match SpringPiston::new(config) {
            Err(SimError::Configuration { field, .. }) => assert_eq!(field, "piston_mass_kg"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn initial_state_is_ambient_and_at_rest() {
        let m = model();
        let x = m.initial_state();
        let snap = m.snapshot(Phase::Compressing, 0.0, &x).unwrap();
        assert_eq!(snap.pressure_pa, STANDARD_ATMOSPHERE_PA);
        assert!(nearly_equal(
            snap.volume_m3,
            m.config().initial_volume_m3(),
            Tolerances::default()
        ));
        assert_eq!(snap.max_speed(), 0.0);
    }

    #[test]
    fn cocked_spring_drives_piston_forward() {
        let m = model();
        let d = m.rhs(Phase::Compressing, 0.0, &m.initial_state()).unwrap();
        let expected = m.spring.force(0.0) / m.piston.mass_kg;
        assert!(nearly_equal(d.piston.velocity_mps, expected, Tolerances::default()));
        assert_eq!(d.projectile.velocity_mps, 0.0);
    }

    #[test]
    fn piston_frozen_on_stop() {
        let mut m = model();
        let mut x = SpringPistonState {
            piston: Kinematics {
                position_m: 0.1,
                velocity_mps: 12.0,
            },
            projectile: Kinematics {
                position_m: 0.05,
                velocity_mps: 40.0,
            },
        };
        m.enter_phase(Phase::Expanding, Phase::BottomedOut, 0.01, &mut x)
            .unwrap();
        assert_eq!(x.piston.position_m, m.config().stroke_m);
        assert_eq!(x.piston.velocity_mps, 0.0);
        let d = m.rhs(Phase::BottomedOut, 0.01, &x).unwrap();
        assert_eq!(d.piston, Kinematics::default());
    }

    #[test]
    fn crushed_air_column_is_invalid_state() {
        let m = model();
        let x = SpringPistonState {
            piston: Kinematics {
                position_m: 0.2,
                velocity_mps: 0.0,
            },
            projectile: Kinematics::AT_REST,
        };
        assert!(matches!(
            m.rhs(Phase::Compressing, 0.0, &x),
            Err(SimError::InvalidState { .. })
        ));
    }

    #[test]
    fn stored_energy_is_spring_release_for_ambient_air() {
        let m = model();
        let e = m.stored_energy_j().unwrap();
        assert!(nearly_equal(e, m.spring.released_energy(), Tolerances::default()));
        assert!(e > 8.8 && e < 9.0, "stored energy {e}");
    }

    #[test]
    fn valve_parameters_do_not_apply() {
        let err = SpringPistonConfig::default()
            .with_parameter(SweepParameter::ChamberVolume, 1e-5)
            .unwrap_err();
        assert!(matches!(
            err,
            SimError::Configuration {
                field: "sweep.parameter",
                ..
            }
        ));
        let c = SpringPistonConfig::default()
            .with_parameter(SweepParameter::SpringRate, 900.0)
            .unwrap();
        assert_eq!(c.spring_rate_n_per_m, 900.0);
    }
}
