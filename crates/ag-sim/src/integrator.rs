//! Fixed-step time integrators.

use crate::error::{SimError, SimResult};
use crate::model::GunModel;
use crate::phase::Phase;

/// Trait for time integrators.
pub trait Integrator {
    /// Advance `x` by one step of `dt` in `phase`.
    ///
    /// The first derivative is taken at the accepted state, so its errors
    /// pass through unchanged. An `InvalidState` from any later evaluation
    /// means the step itself left the model's domain and is reported as
    /// `NumericalDivergence`.
    fn step<M: GunModel>(
        &self,
        model: &M,
        phase: Phase,
        t: f64,
        x: &M::State,
        dt: f64,
    ) -> SimResult<M::State>;
}

/// Classical RK4 (Runge-Kutta 4th order) integrator.
#[derive(Clone, Debug)]
pub struct RK4;

impl Integrator for RK4 {
    fn step<M: GunModel>(
        &self,
        model: &M,
        phase: Phase,
        t: f64,
        x: &M::State,
        dt: f64,
    ) -> SimResult<M::State> {
        let k1 = model.rhs(phase, t, x)?;
        let stage = |tau: f64, xs: &M::State| {
            model
                .rhs(phase, tau, xs)
                .map_err(|e| escalate(model, phase, t, x, e))
        };

        let x2 = model.add(x, &model.scale(&k1, 0.5 * dt));
        let k2 = stage(t + 0.5 * dt, &x2)?;

        let x3 = model.add(x, &model.scale(&k2, 0.5 * dt));
        let k3 = stage(t + 0.5 * dt, &x3)?;

        let x4 = model.add(x, &model.scale(&k3, dt));
        let k4 = stage(t + dt, &x4)?;

        // x_new = x + (dt/6) * (k1 + 2*k2 + 2*k3 + k4)
        let k_sum = model.add(
            &model.add(&k1, &model.scale(&k2, 2.0)),
            &model.add(&model.scale(&k3, 2.0), &k4),
        );

        Ok(model.add(x, &model.scale(&k_sum, dt / 6.0)))
    }
}

/// Forward Euler (explicit, 1st order, one rhs call per step).
#[derive(Clone, Debug)]
pub struct ForwardEuler;

impl Integrator for ForwardEuler {
    fn step<M: GunModel>(
        &self,
        model: &M,
        phase: Phase,
        t: f64,
        x: &M::State,
        dt: f64,
    ) -> SimResult<M::State> {
        let xdot = model.rhs(phase, t, x)?;
        Ok(model.add(x, &model.scale(&xdot, dt)))
    }
}

/// Turn an intermediate-stage `InvalidState` into a divergence pinned to the
/// accepted state the step started from.
pub(crate) fn escalate<M: GunModel>(
    model: &M,
    phase: Phase,
    t: f64,
    x: &M::State,
    err: SimError,
) -> SimError {
    match err {
        SimError::InvalidState { what } => match model.snapshot(phase, t, x) {
            Ok(last) => SimError::NumericalDivergence {
                what: format!("{what} (time step too coarse?)"),
                last_state: Box::new(last),
            },
            Err(_) => SimError::InvalidState { what },
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Signal, Trigger};
    use crate::model::DriverKind;
    use crate::state::{Kinematics, SimulationState};

    /// Body under constant acceleration; positions past `wall` are invalid.
    struct Falling {
        accel: f64,
        wall: f64,
    }

    impl GunModel for Falling {
        type State = Kinematics;

        fn kind(&self) -> DriverKind {
            DriverKind::SpringPiston
        }

        fn initial_state(&self) -> Kinematics {
            Kinematics::AT_REST
        }

        fn rhs(&self, _phase: Phase, _t: f64, x: &Kinematics) -> SimResult<Kinematics> {
            if x.position_m > self.wall {
                return Err(SimError::invalid_state("through the wall"));
            }
            Ok(x.derivative(self.accel))
        }

        fn add(&self, a: &Kinematics, b: &Kinematics) -> Kinematics {
            a.add(b)
        }

        fn scale(&self, a: &Kinematics, s: f64) -> Kinematics {
            a.scale(s)
        }

        fn triggers(&self, _phase: Phase) -> Vec<Trigger> {
            Vec::new()
        }

        fn signal(&self, _signal: Signal, _t: f64, x: &Kinematics) -> SimResult<f64> {
            Ok(x.position_m)
        }

        fn enter_phase(&mut self, _: Phase, _: Phase, _: f64, _: &mut Kinematics) -> SimResult<()> {
            Ok(())
        }

        fn snapshot(&self, phase: Phase, t: f64, x: &Kinematics) -> SimResult<SimulationState> {
            Ok(SimulationState {
                time_s: t,
                phase,
                projectile: *x,
                ..SimulationState::default()
            })
        }

        fn is_settled(&self, _: Phase, _: f64, _: &Kinematics, _: f64, _: f64) -> SimResult<bool> {
            Ok(false)
        }

        fn stored_energy_j(&self) -> SimResult<f64> {
            Ok(0.0)
        }

        fn projectile_mass_kg(&self) -> f64 {
            1.0
        }
    }

    #[test]
    fn rk4_exact_for_constant_acceleration() {
        let model = Falling {
            accel: 2.0,
            wall: f64::INFINITY,
        };
        let x = RK4
            .step(&model, Phase::Compressing, 0.0, &Kinematics::AT_REST, 0.5)
            .unwrap();
        assert!((x.position_m - 0.25).abs() < 1e-15);
        assert!((x.velocity_mps - 1.0).abs() < 1e-15);
    }

    #[test]
    fn euler_is_first_order() {
        let model = Falling {
            accel: 2.0,
            wall: f64::INFINITY,
        };
        let x = ForwardEuler
            .step(&model, Phase::Compressing, 0.0, &Kinematics::AT_REST, 0.5)
            .unwrap();
        assert_eq!(x.position_m, 0.0);
        assert_eq!(x.velocity_mps, 1.0);
    }

    #[test]
    fn intermediate_stage_failure_is_divergence() {
        let model = Falling {
            accel: 100.0,
            wall: 1.0,
        };
        let start = Kinematics {
            position_m: 0.5,
            velocity_mps: 10.0,
        };
        let err = RK4
            .step(&model, Phase::Expanding, 0.2, &start, 0.5)
            .unwrap_err();
        let last = err.last_valid_state().expect("divergence carries a state");
        assert_eq!(last.time_s, 0.2);
        assert_eq!(last.projectile, start);
    }

    #[test]
    fn first_stage_failure_passes_through() {
        let model = Falling {
            accel: 1.0,
            wall: 1.0,
        };
        let start = Kinematics {
            position_m: 2.0,
            velocity_mps: 0.0,
        };
        let err = RK4
            .step(&model, Phase::Compressing, 0.0, &start, 0.1)
            .unwrap_err();
        assert!(matches!(err, SimError::InvalidState { .. }));
    }
}
