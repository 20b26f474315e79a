//! Pipeline outcomes
//!
//! [`Outcome`] is immutable once built. It is what `submit` returns and what
//! an idempotency record stores, so a replay hands back the identical value.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reason used when a target is already held by another request
pub const TARGET_LOCKED: &str = "target locked";

/// Details used when a request id is replayed with a different body
pub const PAYLOAD_MISMATCH: &str = "request id reused with a different payload";

/// Final result of a mutation attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    /// The remote side confirmed the mutation took effect
    Success {
        /// Data returned by the remote side
        #[serde(default)]
        data: serde_json::Value,
    },

    /// Caller or input fault; never retried
    ValidationError {
        /// What was wrong with the request
        details: String,
    },

    /// The request id is already being processed
    DuplicateRequest {
        /// Result of the original attempt, once known
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prior_result: Option<Box<Outcome>>,
    },

    /// The connection dropped before a definitive answer
    ///
    /// The remote mutation may or may not have applied. Retrying is only
    /// safe by resubmitting the same request id.
    ConnectionInterrupted {
        /// Whether resubmitting the same request id is allowed
        can_retry: bool,
    },

    /// Business-level refusal (not found, constraint, target locked)
    Rejected {
        /// Human-readable refusal reason
        reason: String,
    },
}

/// Discriminant of [`Outcome`], handy for counters and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// [`Outcome::Success`]
    Success,
    /// [`Outcome::ValidationError`]
    ValidationError,
    /// [`Outcome::DuplicateRequest`]
    DuplicateRequest,
    /// [`Outcome::ConnectionInterrupted`]
    ConnectionInterrupted,
    /// [`Outcome::Rejected`]
    Rejected,
}

impl OutcomeKind {
    /// Stable snake_case name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::ValidationError => "validation_error",
            Self::DuplicateRequest => "duplicate_request",
            Self::ConnectionInterrupted => "connection_interrupted",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Outcome {
    /// Success with data
    #[inline]
    #[must_use]
    pub fn success(data: serde_json::Value) -> Self {
        Self::Success { data }
    }

    /// Validation error
    #[inline]
    #[must_use]
    pub fn validation_error(details: impl Into<String>) -> Self {
        Self::ValidationError {
            details: details.into(),
        }
    }

    /// Business rejection
    #[inline]
    #[must_use]
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    /// Rejection because another request holds the target
    #[inline]
    #[must_use]
    pub fn target_locked() -> Self {
        Self::rejected(TARGET_LOCKED)
    }

    /// Ambiguous loss of connection
    #[inline]
    #[must_use]
    pub fn interrupted(can_retry: bool) -> Self {
        Self::ConnectionInterrupted { can_retry }
    }

    /// Duplicate of an in-flight or finished attempt
    #[inline]
    #[must_use]
    pub fn duplicate(prior_result: Option<Outcome>) -> Self {
        Self::DuplicateRequest {
            prior_result: prior_result.map(Box::new),
        }
    }

    /// Discriminant
    #[must_use]
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Success { .. } => OutcomeKind::Success,
            Self::ValidationError { .. } => OutcomeKind::ValidationError,
            Self::DuplicateRequest { .. } => OutcomeKind::DuplicateRequest,
            Self::ConnectionInterrupted { .. } => OutcomeKind::ConnectionInterrupted,
            Self::Rejected { .. } => OutcomeKind::Rejected,
        }
    }

    /// Check if the remote mutation is known to have applied
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Check if resubmitting the same request id is meaningful
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionInterrupted { can_retry: true } | Self::DuplicateRequest { .. }
        )
    }

    /// Check if this is the target-locked rejection
    #[inline]
    #[must_use]
    pub fn is_target_locked(&self) -> bool {
        matches!(self, Self::Rejected { reason } if reason == TARGET_LOCKED)
    }

    /// Follow `DuplicateRequest` links down to the original result, if known
    #[must_use]
    pub fn resolved(&self) -> Option<&Outcome> {
        match self {
            Self::DuplicateRequest { prior_result } => {
                prior_result.as_deref().and_then(Outcome::resolved)
            }
            other => Some(other),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { .. } => f.write_str("success"),
            Self::ValidationError { details } => write!(f, "validation error: {details}"),
            Self::DuplicateRequest { prior_result: None } => {
                f.write_str("duplicate request (original still in flight)")
            }
            Self::DuplicateRequest {
                prior_result: Some(prior),
            } => write!(f, "duplicate request (original: {prior})"),
            Self::ConnectionInterrupted { can_retry } => {
                write!(f, "connection interrupted (retry allowed: {can_retry})")
            }
            Self::Rejected { reason } => write!(f, "rejected: {reason}"),
        }
    }
}
