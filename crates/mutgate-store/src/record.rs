//! Idempotency records

use chrono::{DateTime, Duration, Utc};
use mutgate_request::{Fingerprint, Outcome, RequestId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a record
///
/// `Pending` transitions exactly once to one of the terminal statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    /// Admitted, outcome not yet known
    Pending,
    /// Remote mutation confirmed
    Committed,
    /// Closed with a non-success outcome
    Failed,
    /// Abandoned attempt closed by recovery
    RolledBack,
}

impl RecordStatus {
    /// Status a `Pending` record takes when completed with `outcome`
    #[must_use]
    pub fn for_outcome(outcome: &Outcome) -> Self {
        if outcome.is_success() {
            Self::Committed
        } else {
            Self::Failed
        }
    }

    /// Anything but `Pending`
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Lowercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Committed => "committed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable outcome of one request id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Request id
    pub request_id: RequestId,
    /// Fingerprint of the admitted request body
    pub fingerprint: Fingerprint,
    /// Lifecycle status
    pub status: RecordStatus,
    /// Stored outcome (set once terminal)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Outcome>,
    /// When the request was admitted
    pub created_at: DateTime<Utc>,
    /// When a terminal record becomes purgeable
    ///
    /// Reset to completion time plus retention when the record closes, so a
    /// long-running attempt is still retained for the full window.
    pub expires_at: DateTime<Utc>,
    /// When the record left `Pending`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl IdempotencyRecord {
    /// New `Pending` record
    #[must_use]
    pub fn pending(
        request_id: RequestId,
        fingerprint: Fingerprint,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Self {
        Self {
            request_id,
            fingerprint,
            status: RecordStatus::Pending,
            result: None,
            created_at: now,
            expires_at: now + retention,
            completed_at: None,
        }
    }

    /// Close the record with `status` and `outcome`
    ///
    /// Callers check `status` is terminal and the record is still pending.
    pub(crate) fn close(
        &mut self,
        status: RecordStatus,
        outcome: Outcome,
        now: DateTime<Utc>,
        retention: Duration,
    ) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.result = Some(outcome);
        self.completed_at = Some(now);
        self.expires_at = now + retention;
    }

    /// Check if the record has reached a terminal status
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Terminal and past its retention window
    ///
    /// A `Pending` record never expires.
    #[inline]
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_terminal() && now >= self.expires_at
    }

    /// `Pending` since before `cutoff`
    #[inline]
    #[must_use]
    pub fn is_stale_pending(&self, cutoff: DateTime<Utc>) -> bool {
        self.status == RecordStatus::Pending && self.created_at <= cutoff
    }
}
