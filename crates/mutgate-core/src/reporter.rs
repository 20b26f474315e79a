//! Presentation-side reporting contract

use crate::error::SubmitError;
use mutgate_request::Outcome;

/// Message shown for a confirmed mutation
pub const SUCCESS_MESSAGE: &str = "Operation completed successfully.";

/// Message shown for a retryable connection loss
pub const RETRY_MESSAGE: &str = "Connection to the server interrupted. Please try again.";

/// Message shown for a non-retryable connection loss
pub const INTERRUPTED_MESSAGE: &str = "Connection to the server interrupted.";

/// Message shown when the caller deadline elapsed
pub const TRY_LATER_MESSAGE: &str = "The operation is still in progress. Please try again later.";

/// Message shown for a pipeline fault
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal error. The operation was not completed.";

/// Sink the caller hands the final result to
pub trait OutcomeReporter {
    /// Mutation succeeded
    fn show_success(&self, message: &str);
    /// Mutation failed or must be retried
    fn show_error(&self, message: &str);
    /// Operator backed out
    fn show_cancelled(&self);
}

/// Report `outcome`; returns `false` if nothing was shown
///
/// A `DuplicateRequest` without a prior result is invisible: the original
/// attempt reports its own result.
pub fn report(outcome: &Outcome, reporter: &dyn OutcomeReporter) -> bool {
    match outcome {
        Outcome::Success { .. } => reporter.show_success(SUCCESS_MESSAGE),
        Outcome::ValidationError { details } => reporter.show_error(details),
        Outcome::Rejected { reason } => reporter.show_error(reason),
        Outcome::ConnectionInterrupted { can_retry: true } => reporter.show_error(RETRY_MESSAGE),
        Outcome::ConnectionInterrupted { can_retry: false } => {
            reporter.show_error(INTERRUPTED_MESSAGE);
        }
        Outcome::DuplicateRequest {
            prior_result: Some(prior),
        } => return report(prior, reporter),
        Outcome::DuplicateRequest { prior_result: None } => return false,
    }
    true
}

/// Report the result of [`submit_within`](crate::MutationPipeline::submit_within)
pub fn report_submission(
    result: &Result<Outcome, SubmitError>,
    reporter: &dyn OutcomeReporter,
) -> bool {
    match result {
        Ok(outcome) => report(outcome, reporter),
        Err(SubmitError::DeadlineElapsed(_)) => {
            reporter.show_error(TRY_LATER_MESSAGE);
            true
        }
        Err(SubmitError::Aborted(_)) => {
            reporter.show_cancelled();
            true
        }
        Err(SubmitError::Fault(_)) => {
            reporter.show_error(INTERNAL_ERROR_MESSAGE);
            true
        }
    }
}

/// Reporter that writes to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl OutcomeReporter for TracingReporter {
    fn show_success(&self, message: &str) {
        tracing::info!(text = message, "reported success");
    }

    fn show_error(&self, message: &str) {
        tracing::warn!(text = message, "reported error");
    }

    fn show_cancelled(&self) {
        tracing::info!("reported cancellation");
    }
}
