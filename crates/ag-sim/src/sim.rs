//! Shared run loop: stepping, event alignment, divergence checks and result assembly.

use crate::error::{SimError, SimResult};
use crate::events::{PhaseEvent, crossings, locate};
use crate::integrator::{ForwardEuler, Integrator, RK4, escalate};
use crate::model::{DriverKind, GunModel};
use crate::phase::{Phase, check_transition};
use crate::state::SimulationState;
use ag_core::{ensure_non_negative, ensure_positive};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Remaining time below `dt * TIME_EPS` counts as having reached `t_end`.
const TIME_EPS: f64 = 1e-9;

/// Integrator selection for simulation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum IntegratorType {
    /// 4th-order Runge-Kutta (default, 4 rhs calls per step).
    #[default]
    RK4,
    /// Forward Euler (1st-order, 1 rhs call per step).
    ForwardEuler,
}

/// Sanity bounds checked after every accepted step.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct DivergenceLimits {
    pub max_pressure_pa: f64,
    pub max_speed_mps: f64,
    /// Largest relative change of gas volume allowed in one step
    pub max_step_volume_change: f64,
}

impl Default for DivergenceLimits {
    fn default() -> Self {
        Self {
            max_pressure_pa: 1e9,
            max_speed_mps: 5_000.0,
            max_step_volume_change: 0.25,
        }
    }
}

impl DivergenceLimits {
    /// Compare a freshly accepted snapshot with the previous one.
    ///
    /// On failure the error carries `prev`, the last state that passed.
    pub fn check(&self, snap: &SimulationState, prev: &SimulationState) -> SimResult<()> {
        let problem = if !snap.is_finite() {
            Some("state is not finite".to_string())
        } else if snap.pressure_pa <= 0.0 || snap.volume_m3 <= 0.0 {
            Some(format!(
                "gas left the physical range (p = {:.3e} Pa, V = {:.3e} m^3)",
                snap.pressure_pa, snap.volume_m3
            ))
        } else if snap.pressure_pa > self.max_pressure_pa {
            Some(format!(
                "pressure {:.3e} Pa exceeds limit {:.3e} Pa",
                snap.pressure_pa, self.max_pressure_pa
            ))
        } else if snap.max_speed() > self.max_speed_mps {
            Some(format!(
                "speed {:.3e} m/s exceeds limit {:.3e} m/s",
                snap.max_speed(),
                self.max_speed_mps
            ))
        } else {
            let change = (snap.volume_m3 - prev.volume_m3).abs() / prev.volume_m3;
            (change > self.max_step_volume_change).then(|| {
                format!(
                    "gas volume changed by {:.1}% in one step (limit {:.1}%)",
                    100.0 * change,
                    100.0 * self.max_step_volume_change
                )
            })
        };
        match problem {
            None => Ok(()),
            Some(what) => Err(SimError::NumericalDivergence {
                what,
                last_state: Box::new(prev.clone()),
            }),
        }
    }
}

/// Options for simulation runs.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct SimOptions {
    /// Fixed time step (seconds)
    pub dt: f64,
    /// Maximum simulated time (seconds)
    pub t_end: f64,
    /// Maximum number of steps (safety limit)
    pub max_steps: usize,
    /// Record every N-th step (decimation); event steps are always recorded
    pub record_every: usize,
    /// Integrator type (default: RK4)
    pub integrator: IntegratorType,
    pub limits: DivergenceLimits,
    /// Bodies slower than this (m/s) count as at rest when checking for a stall
    pub settle_speed_mps: f64,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            dt: 1e-6,
            t_end: 0.02,
            max_steps: 1_000_000,
            record_every: 10,
            integrator: IntegratorType::default(),
            limits: DivergenceLimits::default(),
            settle_speed_mps: 1e-3,
        }
    }
}

impl SimOptions {
    pub fn validate(&self) -> SimResult<()> {
        ensure_positive(self.dt, "numerics.dt")?;
        ensure_positive(self.t_end, "numerics.t_end")?;
        if self.max_steps == 0 {
            return Err(SimError::config("numerics.max_steps", 0.0, "must be positive"));
        }
        if self.record_every == 0 {
            return Err(SimError::config("numerics.record_every", 0.0, "must be positive"));
        }
        ensure_positive(self.limits.max_pressure_pa, "numerics.limits.max_pressure_pa")?;
        ensure_positive(self.limits.max_speed_mps, "numerics.limits.max_speed_mps")?;
        ensure_positive(
            self.limits.max_step_volume_change,
            "numerics.limits.max_step_volume_change",
        )?;
        ensure_non_negative(self.settle_speed_mps, "numerics.settle_speed_mps")?;
        Ok(())
    }
}

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Completion {
    /// A terminal phase was reached.
    Finished,
    StepBudgetExhausted,
    Cancelled,
}

impl Completion {
    pub fn is_complete(self) -> bool {
        self == Completion::Finished
    }
}

/// Headline numbers of a run.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Summary {
    pub peak_pressure_pa: f64,
    pub peak_pressure_time_s: f64,
    pub peak_projectile_velocity_mps: f64,
    /// Spring-piston only
    pub peak_piston_velocity_mps: Option<f64>,
    pub muzzle_velocity_mps: Option<f64>,
    pub muzzle_energy_j: Option<f64>,
    pub exit_time_s: Option<f64>,
    pub total_time_s: f64,
    pub final_phase: Phase,
    pub steps: usize,
    /// Energy available at t = 0 (J)
    pub stored_energy_j: f64,
    /// Muzzle energy over stored energy
    pub efficiency: Option<f64>,
}

/// Everything a run produced.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ResultSeries {
    pub driver: DriverKind,
    pub snapshots: Vec<SimulationState>,
    pub events: Vec<PhaseEvent>,
    pub summary: Summary,
    pub completion: Completion,
}

impl ResultSeries {
    /// Phases visited, in order, starting with the initial one.
    pub fn phase_sequence(&self) -> Vec<Phase> {
        let mut phases = vec![Phase::Compressing];
        phases.extend(self.events.iter().map(|e| e.to));
        phases
    }
}

/// Periodic progress report.
#[derive(Clone, Debug, PartialEq)]
pub struct SimProgress {
    pub step: usize,
    pub time_s: f64,
    pub t_end_s: f64,
    pub fraction_complete: f64,
    pub phase: Phase,
}

/// Caller hooks for a run: cooperative cancellation and progress reporting.
#[derive(Default)]
pub struct RunControl<'a> {
    /// Polled once per step; when set the run returns what it has so far.
    pub cancel: Option<&'a AtomicBool>,
    /// Called at most every `record_every` steps.
    pub progress: Option<&'a mut dyn FnMut(&SimProgress)>,
}

impl RunControl<'_> {
    fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    fn report(&mut self, progress: SimProgress) {
        if let Some(callback) = self.progress.as_mut() {
            callback(&progress);
        }
    }
}

/// Run a model to completion with default hooks.
pub fn run<M: GunModel>(model: &mut M, opts: &SimOptions) -> SimResult<ResultSeries> {
    run_with_control(model, opts, RunControl::default())
}

/// Run a model, polling `control` for cancellation and reporting progress.
pub fn run_with_control<M: GunModel>(
    model: &mut M,
    opts: &SimOptions,
    control: RunControl<'_>,
) -> SimResult<ResultSeries> {
    opts.validate()?;
    match opts.integrator {
        IntegratorType::RK4 => Run::start(model, opts, &RK4)?.finish(control),
        IntegratorType::ForwardEuler => Run::start(model, opts, &ForwardEuler)?.finish(control),
    }
}

/// Peak tracking and decimated recording.
struct Recorder {
    snapshots: Vec<SimulationState>,
    peak_pressure_pa: f64,
    peak_pressure_time_s: f64,
    peak_projectile_velocity_mps: f64,
    peak_piston_velocity_mps: Option<f64>,
    exit: Option<SimulationState>,
}

impl Recorder {
    fn new(initial: SimulationState) -> Self {
        Self {
            peak_pressure_pa: initial.pressure_pa,
            peak_pressure_time_s: initial.time_s,
            peak_projectile_velocity_mps: initial.projectile.speed(),
            peak_piston_velocity_mps: initial.piston.map(|p| p.speed()),
            exit: None,
            snapshots: vec![initial],
        }
    }

    fn observe(&mut self, snap: &SimulationState, keep: bool) {
        if snap.pressure_pa > self.peak_pressure_pa {
            self.peak_pressure_pa = snap.pressure_pa;
            self.peak_pressure_time_s = snap.time_s;
        }
        self.peak_projectile_velocity_mps =
            self.peak_projectile_velocity_mps.max(snap.projectile.speed());
        if let Some(piston) = snap.piston {
            let peak = self.peak_piston_velocity_mps.get_or_insert(0.0);
            *peak = peak.max(piston.speed());
        }
        if snap.phase == Phase::Exited && self.exit.is_none() {
            self.exit = Some(snap.clone());
        }
        if keep {
            self.snapshots.push(snap.clone());
        }
    }
}

/// Mutable state of one run.
struct Run<'m, 'o, M: GunModel, I: Integrator> {
    model: &'m mut M,
    opts: &'o SimOptions,
    integrator: &'o I,
    phase: Phase,
    t: f64,
    x: M::State,
    last: SimulationState,
    events: Vec<PhaseEvent>,
    recorder: Recorder,
    steps: usize,
    stored_energy_j: f64,
}

impl<'m, 'o, M: GunModel, I: Integrator> Run<'m, 'o, M, I> {
    fn start(model: &'m mut M, opts: &'o SimOptions, integrator: &'o I) -> SimResult<Self> {
        let stored_energy_j = model.stored_energy_j()?;
        let x = model.initial_state();
        let last = model.snapshot(Phase::Compressing, 0.0, &x)?;
        if !last.is_finite() {
            return Err(SimError::invalid_state("initial state is not finite"));
        }
        debug!(
            driver = %model.kind(),
            dt = opts.dt,
            t_end = opts.t_end,
            stored_energy_j,
            "starting run"
        );
        Ok(Self {
            model,
            opts,
            integrator,
            phase: Phase::Compressing,
            t: 0.0,
            x,
            recorder: Recorder::new(last.clone()),
            last,
            events: Vec::new(),
            steps: 0,
            stored_energy_j,
        })
    }

    fn finish(mut self, mut control: RunControl<'_>) -> SimResult<ResultSeries> {
        let completion = loop {
            if self.phase.is_terminal() {
                break Completion::Finished;
            }
            if control.is_cancelled() {
                warn!(time_s = self.t, step = self.steps, "run cancelled");
                break Completion::Cancelled;
            }
            if self.steps >= self.opts.max_steps {
                warn!(
                    time_s = self.t,
                    max_steps = self.opts.max_steps,
                    "step budget exhausted"
                );
                break Completion::StepBudgetExhausted;
            }

            let remaining = self.opts.t_end - self.t;
            if remaining <= self.opts.dt * TIME_EPS {
                self.transition(Phase::Stopped, 1.0)?;
                continue;
            }

            self.step(remaining)?;

            if self.phase.can_settle()
                && self.model.is_settled(
                    self.phase,
                    self.t,
                    &self.x,
                    self.opts.dt,
                    self.opts.settle_speed_mps,
                )?
            {
                self.transition(Phase::Stopped, 1.0)?;
            }

            if self.steps % self.opts.record_every == 0 {
                control.report(SimProgress {
                    step: self.steps,
                    time_s: self.t,
                    t_end_s: self.opts.t_end,
                    fraction_complete: (self.t / self.opts.t_end).min(1.0),
                    phase: self.phase,
                });
            }
        };

        if self.recorder.snapshots.last() != Some(&self.last) {
            self.recorder.snapshots.push(self.last.clone());
        }
        let summary = self.summary();
        debug!(
            driver = %self.model.kind(),
            ?completion,
            final_phase = %summary.final_phase,
            steps = summary.steps,
            muzzle_velocity_mps = ?summary.muzzle_velocity_mps,
            "run finished"
        );
        Ok(ResultSeries {
            driver: self.model.kind(),
            snapshots: self.recorder.snapshots,
            events: self.events,
            summary,
            completion,
        })
    }

    /// Advance one step, truncating it at the earliest armed crossing.
    ///
    /// Each crossing found over the full step is located on the re-integrated
    /// trajectory, so the event state sits on its threshold however coarse
    /// the step.
    fn step(&mut self, remaining: f64) -> SimResult<()> {
        let h = self.opts.dt.min(remaining);
        let t_next = if h == remaining { self.opts.t_end } else { self.t + h };
        let x_next = self
            .integrator
            .step(&*self.model, self.phase, self.t, &self.x, h)?;
        self.steps += 1;

        let found = crossings(
            &*self.model,
            self.phase,
            (self.t, &self.x),
            (t_next, &x_next),
        )
        .map_err(|e| escalate(&*self.model, self.phase, self.t, &self.x, e))?;

        if found.is_empty() {
            let keep = self.steps % self.opts.record_every == 0;
            return self.accept(t_next, x_next, keep);
        }

        let (model, integrator) = (&*self.model, self.integrator);
        let (phase, t0, x0) = (self.phase, self.t, &self.x);
        let mut earliest: Option<(f64, Phase, M::State)> = None;
        for crossing in &found {
            let located = locate(crossing, |s| {
                let x = if s <= 0.0 {
                    x0.clone()
                } else if s >= 1.0 {
                    x_next.clone()
                } else {
                    integrator.step(model, phase, t0, x0, s * h)?
                };
                let g = model.signal(crossing.trigger.signal, t0 + s * h, &x)?
                    - crossing.trigger.threshold;
                Ok((g, x))
            })?;
            let Some((fraction, x_event)) = located else {
                return Err(SimError::NumericalDivergence {
                    what: format!(
                        "could not place the {phase} -> {} event inside the step \
                         (time step too coarse?)",
                        crossing.trigger.target
                    ),
                    last_state: Box::new(self.last.clone()),
                });
            };
            if earliest.as_ref().is_none_or(|(best, _, _)| fraction < *best) {
                earliest = Some((fraction, crossing.trigger.target, x_event));
            }
        }
        let Some((fraction, target, x_event)) = earliest else {
            return Err(SimError::invalid_state("crossing vanished while locating"));
        };

        trace!(fraction, target = %target, "step truncated at event");
        self.accept(self.t + fraction * h, x_event, true)?;
        self.transition(target, fraction)
    }

    fn accept(&mut self, t: f64, x: M::State, keep: bool) -> SimResult<()> {
        let snap = self
            .model
            .snapshot(self.phase, t, &x)
            .map_err(|e| escalate(&*self.model, self.phase, self.t, &self.x, e))?;
        self.opts.limits.check(&snap, &self.last)?;
        self.recorder.observe(&snap, keep);
        self.t = t;
        self.x = x;
        self.last = snap;
        Ok(())
    }

    fn transition(&mut self, to: Phase, step_fraction: f64) -> SimResult<()> {
        let from = self.phase;
        check_transition(from, to)?;
        self.model.enter_phase(from, to, self.t, &mut self.x)?;
        debug!(%from, %to, time_s = self.t, "phase transition");
        self.events.push(PhaseEvent {
            time_s: self.t,
            step_fraction,
            from,
            to,
        });
        self.phase = to;
        let snap = self.model.snapshot(to, self.t, &self.x)?;
        self.recorder.observe(&snap, true);
        self.last = snap;
        Ok(())
    }

    fn summary(&self) -> Summary {
        let rec = &self.recorder;
        let mass = self.model.projectile_mass_kg();
        let muzzle_velocity_mps = rec.exit.as_ref().map(|s| s.projectile.velocity_mps);
        let muzzle_energy_j = muzzle_velocity_mps.map(|v| 0.5 * mass * v * v);
        let efficiency = muzzle_energy_j
            .filter(|_| self.stored_energy_j > 0.0)
            .map(|e| e / self.stored_energy_j);
        Summary {
            peak_pressure_pa: rec.peak_pressure_pa,
            peak_pressure_time_s: rec.peak_pressure_time_s,
            peak_projectile_velocity_mps: rec.peak_projectile_velocity_mps,
            peak_piston_velocity_mps: rec.peak_piston_velocity_mps,
            muzzle_velocity_mps,
            muzzle_energy_j,
            exit_time_s: rec.exit.as_ref().map(|s| s.time_s),
            total_time_s: self.t,
            final_phase: self.phase,
            steps: self.steps,
            stored_energy_j: self.stored_energy_j,
            efficiency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Kinematics;

    fn gas_state(pressure_pa: f64, volume_m3: f64, speed: f64) -> SimulationState {
        SimulationState {
            pressure_pa,
            volume_m3,
            projectile: Kinematics {
                position_m: 0.0,
                velocity_mps: speed,
            },
            ..SimulationState::default()
        }
    }

    #[test]
    fn sim_options_defaults() {
        let opts = SimOptions::default();
        assert_eq!(opts.dt, 1e-6);
        assert_eq!(opts.t_end, 0.02);
        assert_eq!(opts.record_every, 10);
        assert_eq!(opts.integrator, IntegratorType::RK4);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn sim_options_invalid_fields_are_named() {
        let opts = SimOptions {
            dt: 0.0,
            ..SimOptions::default()
        };
        assert!(matches!(
            opts.validate(),
            Err(SimError::Configuration {
                field: "numerics.dt",
                ..
            })
        ));

        let opts = SimOptions {
            record_every: 0,
            ..SimOptions::default()
        };
        assert!(matches!(
            opts.validate(),
            Err(SimError::Configuration {
                field: "numerics.record_every",
                ..
            })
        ));
    }

    #[test]
    fn limits_accept_small_changes() {
        let limits = DivergenceLimits::default();
        let prev = gas_state(2e5, 1e-5, 10.0);
        let next = gas_state(1.9e5, 1.05e-5, 12.0);
        assert!(limits.check(&next, &prev).is_ok());
    }

    #[test]
    fn limits_reject_jumps_and_keep_previous_state() {
        let limits = DivergenceLimits::default();
        let prev = gas_state(2e5, 1e-5, 10.0);

        let err = limits.check(&gas_state(2e5, 2e-5, 10.0), &prev).unwrap_err();
        assert_eq!(err.last_valid_state(), Some(&prev));

        assert!(limits.check(&gas_state(2e10, 1e-5, 10.0), &prev).is_err());
        assert!(limits.check(&gas_state(2e5, 1e-5, 1e5), &prev).is_err());
        assert!(limits.check(&gas_state(f64::NAN, 1e-5, 10.0), &prev).is_err());
        assert!(limits.check(&gas_state(2e5, -1e-6, 10.0), &prev).is_err());
    }

    #[test]
    fn only_finished_runs_are_complete() {
        assert!(Completion::Finished.is_complete());
        assert!(!Completion::Cancelled.is_complete());
        assert!(!Completion::StepBudgetExhausted.is_complete());
    }
}
