//! Pipeline errors
//!
//! Business results are [`Outcome`](mutgate_request::Outcome) values and
//! never appear here. These types cover programmer misuse and caller-side
//! deadlines only.

use mutgate_gate::GateError;
use mutgate_store::StoreError;
use std::time::Duration;

/// Broken pipeline invariant: a bug, not a business outcome
#[derive(Debug, thiserror::Error)]
pub enum PipelineFault {
    /// Gate released by a request that did not hold it
    #[error("gate misuse: {0}")]
    Gate(#[from] GateError),

    /// Record completed outside its `Pending` state
    #[error("record lifecycle violated: {0}")]
    Record(StoreError),
}

impl PipelineFault {
    /// Check if the fault came from the gate
    #[inline]
    #[must_use]
    pub fn is_gate(&self) -> bool {
        matches!(self, Self::Gate(_))
    }
}

/// Errors from [`MutationPipeline::submit_within`](crate::MutationPipeline::submit_within)
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// Caller deadline passed; the attempt keeps running in the background
    #[error("no outcome within {0:?}; try again later")]
    DeadlineElapsed(Duration),

    /// The attempt task was cancelled or panicked outside the executor
    #[error("attempt aborted: {0}")]
    Aborted(String),

    /// Pipeline invariant broken
    #[error(transparent)]
    Fault(#[from] PipelineFault),
}

impl SubmitError {
    /// Caller should retry later with the same request id
    #[inline]
    #[must_use]
    pub fn is_deadline(&self) -> bool {
        matches!(self, Self::DeadlineElapsed(_))
    }
}
