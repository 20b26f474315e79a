//! Store errors

use crate::record::RecordStatus;
use mutgate_request::RequestId;

/// Errors raised by an [`IdempotencyStore`](crate::IdempotencyStore)
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing storage could not be reached or written
    #[error("idempotency store unavailable: {0}")]
    Unavailable(String),

    /// `complete` on a request id with no record
    #[error("no idempotency record for request {0}")]
    NotFound(RequestId),

    /// `complete` on a record that already left `Pending`
    #[error("request {request_id} is {status}, expected pending")]
    NotPending {
        /// Request id
        request_id: RequestId,
        /// Status found
        status: RecordStatus,
    },

    /// Journal contents could not be parsed
    #[error("corrupt journal at line {line}: {reason}")]
    Corrupt {
        /// 1-based journal line
        line: usize,
        /// Parse failure
        reason: String,
    },
}

impl StoreError {
    /// Infrastructure failure; the attempt must not proceed
    #[inline]
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Caller broke the record lifecycle
    #[inline]
    #[must_use]
    pub fn is_misuse(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::NotPending { .. })
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Result alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
