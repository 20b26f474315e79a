//! Mutation requests
//!
//! A [`MutationRequest`] is the validated, confirmed intent handed to the
//! pipeline. Its body (target, kind, payload) is bound to its request id by
//! a [`Fingerprint`]; the pipeline refuses to replay an id under a
//! different body.

use crate::fingerprint::Fingerprint;
use crate::ids::{ActorId, RequestId, TargetId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of mutation applied to a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Remove the target
    Delete,
    /// Create the target
    Insert,
    /// Modify the target in place
    Update,
}

impl OperationKind {
    /// Stable lowercase name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Insert => "insert",
            Self::Update => "update",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "delete" => Ok(Self::Delete),
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            other => Err(RequestError::UnknownOperation(other.to_string())),
        }
    }
}

/// Errors building or checking a request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// Operation name not recognised
    #[error("unknown operation kind: '{0}'")]
    UnknownOperation(String),

    /// Request id is empty
    #[error("request id must not be empty")]
    BlankRequestId,

    /// Target id is empty
    #[error("target id must not be empty")]
    BlankTargetId,

    /// Nobody confirmed the mutation
    #[error("mutation on {0} has not been confirmed")]
    Unconfirmed(TargetId),
}

/// A confirmed mutation intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRequest {
    /// Caller-supplied idempotency token
    pub request_id: RequestId,
    /// Entity being mutated
    pub target_id: TargetId,
    /// Mutation kind
    pub operation_kind: OperationKind,
    /// Operation-specific data
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Operator who confirmed the mutation (`None` until confirmed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_by: Option<ActorId>,
}

impl MutationRequest {
    /// Create an unconfirmed request with an empty payload
    #[inline]
    #[must_use]
    pub fn new(
        request_id: impl Into<RequestId>,
        target_id: impl Into<TargetId>,
        operation_kind: OperationKind,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            target_id: target_id.into(),
            operation_kind,
            payload: serde_json::Value::Null,
            confirmed_by: None,
        }
    }

    /// With payload
    #[inline]
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Record the confirming operator
    #[inline]
    #[must_use]
    pub fn confirmed_by(mut self, actor: impl Into<ActorId>) -> Self {
        self.confirmed_by = Some(actor.into());
        self
    }

    /// True once a non-blank operator has confirmed the mutation
    #[inline]
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.confirmed_by.as_ref().is_some_and(|a| !a.is_blank())
    }

    /// Fingerprint of the request body
    #[inline]
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(&self.target_id, self.operation_kind, &self.payload)
    }

    /// Check the request is well formed and confirmed
    ///
    /// # Errors
    /// - `RequestError::BlankRequestId` / `BlankTargetId` for empty identities
    /// - `RequestError::Unconfirmed` if no operator confirmed the mutation
    pub fn check_admissible(&self) -> Result<(), RequestError> {
        if self.request_id.is_blank() {
            return Err(RequestError::BlankRequestId);
        }
        if self.target_id.is_blank() {
            return Err(RequestError::BlankTargetId);
        }
        if !self.is_confirmed() {
            return Err(RequestError::Unconfirmed(self.target_id.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn operation_kind_parse() {
        assert_eq!("DELETE".parse::<OperationKind>().unwrap(), OperationKind::Delete);
        assert_eq!("insert".parse::<OperationKind>().unwrap(), OperationKind::Insert);
        assert!(matches!(
            "drop".parse::<OperationKind>(),
            Err(RequestError::UnknownOperation(_))
        ));
    }

    #[test]
    fn unconfirmed_request_is_not_admissible() {
        let request = MutationRequest::new("r1", "t1", OperationKind::Delete);
        assert!(!request.is_confirmed());
        assert_eq!(
            request.check_admissible(),
            Err(RequestError::Unconfirmed(TargetId::new("t1")))
        );
    }

    #[test]
    fn blank_confirmation_does_not_count() {
        let request = MutationRequest::new("r1", "t1", OperationKind::Delete).confirmed_by(" ");
        assert!(!request.is_confirmed());
    }

    #[test]
    fn blank_ids_rejected() {
        let request = MutationRequest::new("", "t1", OperationKind::Delete).confirmed_by("op");
        assert_eq!(request.check_admissible(), Err(RequestError::BlankRequestId));

        let request = MutationRequest::new("r1", "", OperationKind::Delete).confirmed_by("op");
        assert_eq!(request.check_admissible(), Err(RequestError::BlankTargetId));
    }

    #[test]
    fn confirmer_does_not_change_fingerprint() {
        let base = MutationRequest::new("r1", "t1", OperationKind::Update)
            .with_payload(json!({"title": "x"}));
        let by_alice = base.clone().confirmed_by("alice");
        let by_bob = base.confirmed_by("bob");
        assert_eq!(by_alice.fingerprint(), by_bob.fingerprint());
    }

    #[test]
    fn payload_changes_fingerprint() {
        let a = MutationRequest::new("r1", "t1", OperationKind::Update).with_payload(json!(1));
        let b = MutationRequest::new("r1", "t1", OperationKind::Update).with_payload(json!(2));
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
