//! FleetRun runner: configuration, per-target executor and fleet
//! orchestration behind the `fleetrun` binary.
//!
//! Exposed as a library so `fr-e2e-tests` can drive `FleetRunner` against
//! the scripted `MockConnector`.

pub mod cancel;
pub mod capture;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod fleet;
pub mod report;

pub use cancel::CancelToken;
pub use error::FleetError;
pub use executor::execute;
pub use fleet::{FleetPlan, FleetRunner, LeaderPhase, PlannedRun, select_targets};
