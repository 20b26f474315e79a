//! Gate errors

use mutgate_request::{RequestId, TargetId};

/// Errors releasing a gate entry
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    /// Release by a request that does not hold the target
    #[error("{requested_by} cannot release {target_id}: held by {held_by}")]
    Mismatch {
        /// Target
        target_id: TargetId,
        /// Current holder
        held_by: RequestId,
        /// Request that tried to release
        requested_by: RequestId,
    },

    /// Release of a target nobody holds
    #[error("{request_id} cannot release {target_id}: not held")]
    NotHeld {
        /// Target
        target_id: TargetId,
        /// Request that tried to release
        request_id: RequestId,
    },

    /// The hold was forcibly released as stale before its owner finished
    #[error("hold of {request_id} on {target_id} was revoked as stale")]
    Revoked {
        /// Target
        target_id: TargetId,
        /// Former holder
        request_id: RequestId,
    },
}

impl GateError {
    /// Programmer misuse, as opposed to a revoked hold
    #[inline]
    #[must_use]
    pub fn is_misuse(&self) -> bool {
        matches!(self, Self::Mismatch { .. } | Self::NotHeld { .. })
    }
}
