//! Lumped-parameter interior ballistics for spring-piston and precompressed-air guns.
//!
//! Provides:
//! - Polytropic gas model with energy-consistent volume merging
//! - Piston/projectile body model (spring, friction, stiction, valve throttling)
//! - Phase state machine with interpolated threshold crossings
//! - Fixed-step RK4 integrator with event-aligned steps
//! - Spring-piston and precompressed-air drivers
//! - Parallel parameter sweeps

pub mod body;
pub mod error;
pub mod gas;
pub mod integrator;
pub mod model;
pub mod phase;
pub mod precompressed;
pub mod sim;
pub mod spring_piston;
pub mod state;
pub mod sweep;

// Internal modules
mod events;

// Re-exports for public API
pub use body::{Body, Friction, Spring};
pub use error::{SimError, SimResult};
pub use events::{PhaseEvent, Signal, Trigger};
pub use gas::{GasConfig, PolytropicGas};
pub use integrator::{ForwardEuler, Integrator, RK4};
pub use model::{DriverKind, GunConfig, GunModel};
pub use phase::Phase;
pub use precompressed::{
    PrecompressedAir, PrecompressedAirConfig, PrecompressedAirState, ValveConfig, ValveLaw,
};
pub use sim::{
    Completion, DivergenceLimits, IntegratorType, ResultSeries, RunControl, SimOptions,
    SimProgress, Summary, run, run_with_control,
};
pub use spring_piston::{SpringPiston, SpringPistonConfig, SpringPistonState};
pub use state::{Kinematics, SimulationState};
pub use sweep::{
    SweepDefinition, SweepParameter, SweepPoint, SweepResult, SweepType, Sweepable, run_sweep,
};
