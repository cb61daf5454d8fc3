use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Non-finite numeric value for {what}: {value}")]
    NonFinite { what: &'static str, value: f64 },

    #[error("Expected a positive value for {what}, got {value}")]
    NonPositive { what: &'static str, value: f64 },

    #[error("Expected a non-negative value for {what}, got {value}")]
    Negative { what: &'static str, value: f64 },
}
