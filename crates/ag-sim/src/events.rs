//! Threshold crossings that move a run from one phase to the next.

use crate::error::{SimError, SimResult};
use crate::model::GunModel;
use crate::phase::Phase;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Scalar a driver exposes for phase detection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    /// dV/dt of the driving gas (m³/s)
    GasVolumeRate,
    /// Piston travel from the cocked position (m)
    PistonPosition,
    /// Projectile travel from its seat (m)
    ProjectilePosition,
    /// Valve opening progress, 0 shut to 1 at full lift (may exceed 1)
    ValveTravel,
}

/// Arms a transition to `target` when `signal` rises through `threshold`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Trigger {
    pub signal: Signal,
    pub threshold: f64,
    pub target: Phase,
}

impl Trigger {
    pub fn rising(signal: Signal, threshold: f64, target: Phase) -> Self {
        Self {
            signal,
            threshold,
            target,
        }
    }
}

/// One phase transition in a run.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PhaseEvent {
    pub time_s: f64,
    /// Where inside the step the crossing happened, 0 at the start, 1 at the end
    pub step_fraction: f64,
    pub from: Phase,
    pub to: Phase,
}

/// Residual accepted at a located event, relative to the threshold plus the
/// residual at the step start.
const EVENT_TOL: f64 = 1e-9;

/// Refinement iterations before an event is declared unlocatable.
const MAX_EVENT_ITERATIONS: usize = 200;

/// Linear estimate of the step fraction at which `g` rises through zero.
///
/// `g0` and `g1` are signal minus threshold at the step start and end. A
/// value that starts exactly on the threshold only counts if it then rises.
pub(crate) fn crossing_fraction(g0: f64, g1: f64) -> Option<f64> {
    let crossed = (g0 < 0.0 && g1 >= 0.0) || (g0 == 0.0 && g1 > 0.0);
    if !crossed {
        return None;
    }
    Some((g0 / (g0 - g1)).clamp(0.0, 1.0))
}

/// A trigger whose signal crossed its threshold somewhere inside a step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Crossing {
    pub trigger: Trigger,
    /// Signal minus threshold at the step start
    pub g0: f64,
    /// Signal minus threshold at the step end
    pub g1: f64,
    /// Linear first guess of the crossing fraction
    pub estimate: f64,
}

impl Crossing {
    fn tolerance(&self) -> f64 {
        EVENT_TOL * (self.trigger.threshold.abs() + self.g0.abs())
    }
}

/// Every trigger armed in `phase` that crossed between two states, in the
/// order the model lists them.
pub(crate) fn crossings<M: GunModel>(
    model: &M,
    phase: Phase,
    (t0, x0): (f64, &M::State),
    (t1, x1): (f64, &M::State),
) -> SimResult<Vec<Crossing>> {
    let mut found = Vec::new();
    for trigger in model.triggers(phase) {
        if !phase.can_transition_to(trigger.target) {
            return Err(SimError::invalid_state(format!(
                "trigger armed for illegal transition {phase} -> {}",
                trigger.target
            )));
        }
        let g0 = model.signal(trigger.signal, t0, x0)? - trigger.threshold;
        let g1 = model.signal(trigger.signal, t1, x1)? - trigger.threshold;
        if let Some(estimate) = crossing_fraction(g0, g1) {
            found.push(Crossing {
                trigger,
                g0,
                g1,
                estimate,
            });
        }
    }
    Ok(found)
}

/// Find the step fraction at which `crossing` actually lands on its threshold.
///
/// `eval(s)` re-integrates the step over the fraction `s` and returns the
/// residual (signal minus threshold) with the state reached. The bracket
/// `[0, 1]` is narrowed by false position, falling back to bisection when
/// the same end moves twice in a row. Returns `None` if the residual turns
/// non-finite or the iteration budget runs out.
pub(crate) fn locate<S>(
    crossing: &Crossing,
    mut eval: impl FnMut(f64) -> SimResult<(f64, S)>,
) -> SimResult<Option<(f64, S)>> {
    let tol = crossing.tolerance();
    let (mut lo, mut g_lo) = (0.0, crossing.g0);
    let (mut hi, mut g_hi) = (1.0, crossing.g1);
    let mut s = crossing.estimate;
    let mut last_moved_hi: Option<bool> = None;

    for _ in 0..MAX_EVENT_ITERATIONS {
        let (g, x) = eval(s)?;
        if !g.is_finite() {
            return Ok(None);
        }
        if g.abs() <= tol || hi - lo <= 4.0 * f64::EPSILON {
            return Ok(Some((s, x)));
        }
        let moved_hi = g > 0.0;
        if moved_hi {
            hi = s;
            g_hi = g;
        } else {
            lo = s;
            g_lo = g;
        }
        let secant = lo - g_lo * (hi - lo) / (g_hi - g_lo);
        s = if last_moved_hi != Some(moved_hi) && secant > lo && secant < hi {
            secant
        } else {
            0.5 * (lo + hi)
        };
        last_moved_hi = Some(moved_hi);
    }
    Ok(None)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn fraction_stays_in_unit_interval(g0 in -1e6_f64..1e6, g1 in -1e6_f64..1e6) {
            if let Some(f) = crossing_fraction(g0, g1) {
                prop_assert!((0.0..=1.0).contains(&f));
            }
        }

        #[test]
        fn interpolated_point_is_on_threshold(g0 in -1e3_f64..-1e-3, g1 in 1e-3_f64..1e3) {
            let f = crossing_fraction(g0, g1).unwrap();
            let g = g0 + f * (g1 - g0);
            prop_assert!(g.abs() < 1e-9 * (g0.abs() + g1.abs()));
        }

        #[test]
        fn located_cubic_root_sits_on_threshold(root in 0.01_f64..0.99, scale in 1e-3_f64..1e3) {
            let g = move |s: f64| scale * (s * s * s - root * root * root);
            let c = Crossing {
                trigger: Trigger::rising(Signal::PistonPosition, 0.1, Phase::BottomedOut),
                g0: g(0.0),
                g1: g(1.0),
                estimate: crossing_fraction(g(0.0), g(1.0)).unwrap(),
            };
            let (s, _) = locate(&c, |s| Ok((g(s), ()))).unwrap().unwrap();
            prop_assert!(g(s).abs() <= c.tolerance() || (s - root).abs() < 1e-12);
        }
    }
}
