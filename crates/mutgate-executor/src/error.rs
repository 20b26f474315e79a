//! Backend transport errors

use std::time::Duration;

/// Transport-level failure talking to a remote backend
///
/// Business refusals are not errors; they arrive as a
/// [`RemoteAck`](crate::RemoteAck).
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Connection dropped before a response arrived
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// No response within the per-attempt timeout
    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),

    /// Any other I/O fault
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend cannot answer state queries
    #[error("operation not supported by backend")]
    Unsupported,
}

impl BackendError {
    /// Outcome of the remote call is unknown
    #[inline]
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::ConnectionLost(_) | Self::Timeout(_) | Self::Io(_))
    }
}
