//! Remote backend seam

use crate::error::BackendError;
use mutgate_request::MutationRequest;
use serde::{Deserialize, Serialize};

/// Definitive answer from the remote side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "ack", rename_all = "snake_case")]
pub enum RemoteAck {
    /// Mutation took effect
    Applied {
        /// Data returned by the remote
        data: serde_json::Value,
    },
    /// Refused on business grounds (not found, constraint violated)
    Refused {
        /// Refusal reason
        reason: String,
    },
    /// Payload refused as invalid
    Invalid {
        /// What was invalid
        details: String,
    },
}

/// Protocol binding to a concrete remote store
#[async_trait::async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Apply the mutation and wait for the remote's answer
    ///
    /// # Errors
    /// A [`BackendError`] when no definitive answer was received
    async fn apply(&self, request: &MutationRequest) -> Result<RemoteAck, BackendError>;

    /// Ask whether `request` was applied, for reconciling a lost answer
    ///
    /// `Ok(None)` means the remote has no trace of the request.
    ///
    /// # Errors
    /// `BackendError::Unsupported` unless the backend can query its state
    async fn probe(&self, _request: &MutationRequest) -> Result<Option<RemoteAck>, BackendError> {
        Err(BackendError::Unsupported)
    }
}
