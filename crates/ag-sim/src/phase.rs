//! Discrete regimes of a shot and their legal ordering.

use crate::error::{SimError, SimResult};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Regime of the simulation governing which force laws and thresholds apply.
///
/// Phases are ranked. A run only ever moves to a higher rank, so optional
/// phases may be skipped but never revisited.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Phase {
    /// Initial regime: piston compressing air, or valve still shut.
    #[default]
    Compressing,
    /// Precompressed-air only: chamber merged with the expansion volume.
    ValveOpen,
    /// Gas pushing back / expanding behind the projectile.
    Expanding,
    /// Spring-piston only: piston resting on its mechanical stop.
    BottomedOut,
    /// Projectile left the barrel (terminal).
    Exited,
    /// Time limit reached or motion settled (terminal).
    Stopped,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Compressing,
        Phase::ValveOpen,
        Phase::Expanding,
        Phase::BottomedOut,
        Phase::Exited,
        Phase::Stopped,
    ];

    pub fn rank(self) -> u8 {
        match self {
            Phase::Compressing => 0,
            Phase::ValveOpen => 1,
            Phase::Expanding => 2,
            Phase::BottomedOut => 3,
            Phase::Exited => 4,
            Phase::Stopped => 5,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Exited | Phase::Stopped)
    }

    /// Phases in which a motionless system counts as finished.
    pub fn can_settle(self) -> bool {
        matches!(self, Phase::Expanding | Phase::BottomedOut)
    }

    pub fn can_transition_to(self, next: Phase) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::Compressing => "compressing",
            Phase::ValveOpen => "valve-open",
            Phase::Expanding => "expanding",
            Phase::BottomedOut => "bottomed-out",
            Phase::Exited => "exited",
            Phase::Stopped => "stopped",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Reject transitions that would skip backwards or leave a terminal phase.
pub(crate) fn check_transition(from: Phase, to: Phase) -> SimResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(SimError::invalid_state(format!(
            "illegal phase transition {from} -> {to}"
        )))
    }
}
