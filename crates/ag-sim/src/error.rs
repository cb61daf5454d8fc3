//! Error types for simulation operations.

use crate::state::SimulationState;
use ag_core::CoreError;
use thiserror::Error;

/// Errors encountered while configuring or running a simulation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    /// Rejected before integration starts; `field` names the offending input.
    #[error("Invalid configuration: {field} = {value} ({reason})")]
    Configuration {
        field: &'static str,
        value: f64,
        reason: String,
    },

    /// Integration produced a non-physical state. Usually the time step is too coarse.
    #[error("Numerical divergence after t = {:.6e} s: {what}", .last_state.time_s)]
    NumericalDivergence {
        what: String,
        last_state: Box<SimulationState>,
    },

    /// A model was evaluated at an impossible point (e.g. zero gas volume).
    #[error("Invalid state: {what}")]
    InvalidState { what: String },

    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },
}

pub type SimResult<T> = Result<T, SimError>;

impl SimError {
    pub(crate) fn invalid_state(what: impl Into<String>) -> Self {
        SimError::InvalidState { what: what.into() }
    }

    pub(crate) fn config(field: &'static str, value: f64, reason: impl Into<String>) -> Self {
        SimError::Configuration {
            field,
            value,
            reason: reason.into(),
        }
    }

    /// True for errors that carry a partial trajectory worth showing.
    pub fn last_valid_state(&self) -> Option<&SimulationState> {
        match self {
            SimError::NumericalDivergence { last_state, .. } => Some(last_state),
            _ => None,
        }
    }
}

impl From<CoreError> for SimError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::NonFinite { what, value } => SimError::config(what, value, "not finite"),
            CoreError::NonPositive { what, value } => {
                SimError::config(what, value, "must be positive")
            }
            CoreError::Negative { what, value } => {
                SimError::config(what, value, "must not be negative")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ag_core::ensure_positive;

    #[test]
    fn core_errors_name_the_field() {
        let err: SimError = ensure_positive(-2.0, "projectile_mass_kg")
            .map_err(SimError::from)
            .unwrap_err();
        match err {
            SimError::Configuration { field, value, .. } => {
                assert_eq!(field, "projectile_mass_kg");
                assert_eq!(value, -2.0);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn divergence_message_includes_time() {
        let err = SimError::NumericalDivergence {
            what: "speed limit exceeded".to_string(),
            last_state: Box::new(SimulationState {
                time_s: 1.5e-3,
                ..SimulationState::default()
            }),
        };
        let msg = err.to_string();
        assert!(msg.contains("1.500000e-3"));
        assert!(msg.contains("speed limit exceeded"));
        assert!(err.last_valid_state().is_some());
    }
}
