//! ag-core: shared foundation for the airgun simulators.
//!
//! Contains:
//! - units (uom SI types, constructors, display conversions)
//! - numeric (Real + tolerances + float checks)
//! - error (shared error types)

pub mod error;
pub mod numeric;
pub mod units;

// Re-exports: nice ergonomics for downstream crates
pub use error::{CoreError, CoreResult};
pub use numeric::*;
pub use units::*;
