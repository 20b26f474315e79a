//! MutGate simulator
//!
//! Drives a [`MutationPipeline`](mutgate_core::MutationPipeline) with many
//! concurrent operators against a seeded flaky backend and checks that no
//! request id is applied twice, no target sees overlapping remote calls and
//! every replay agrees with the first definitive answer.

#![warn(missing_docs)]

pub mod simulator;
pub mod stress;

pub use simulator::{run_simulator, SimulatorConfig, SimulatorReport, SimulatorStats, Violation};
pub use stress::{run_stress, StressReport};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
