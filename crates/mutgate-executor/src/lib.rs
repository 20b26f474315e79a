//! MutGate remote execution
//!
//! [`RemoteExecutor`] is the seam the pipeline calls exactly once per
//! admitted request. It never persists state and never resolves ambiguity on
//! its own: a lost connection is reported as
//! `ConnectionInterrupted { can_retry: true }` and left for the caller to
//! retry under the same request id.
//!
//! [`ClassifyingExecutor`] adapts any [`RemoteBackend`] to that contract;
//! [`SimulatedBackend`] is a seeded flaky backend for tests and the
//! simulator.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod backend;
mod classify;
mod error;
mod simulated;

pub use backend::{RemoteAck, RemoteBackend};
pub use classify::{ClassifyingExecutor, ExecutorOptions};
pub use error::BackendError;
pub use simulated::{FaultProfile, SimulatedBackend, SimulationStats};

use mutgate_request::{MutationRequest, Outcome};

/// Executes one mutation against the remote-dependent store
///
/// Implementations classify every result into an [`Outcome`]:
/// - confirmed mutation: `Success`
/// - business refusal: `Rejected`
/// - payload refused as invalid: `ValidationError`
/// - transport loss before a definitive answer: `ConnectionInterrupted { can_retry: true }`
#[async_trait::async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Execute `request` once
    async fn execute(&self, request: &MutationRequest) -> Outcome;
}
