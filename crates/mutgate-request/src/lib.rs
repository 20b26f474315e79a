//! MutGate request model
//!
//! Foundation types shared by every pipeline component:
//! - [`RequestId`] / [`TargetId`]: caller-supplied identities
//! - [`MutationRequest`]: a confirmed mutation intent
//! - [`Fingerprint`]: content hash binding a request id to its body
//! - [`Outcome`]: the only value ever returned to callers or stored as a result
//!
//! # Example
//!
//! ```rust
//! use mutgate_request::{MutationRequest, OperationKind};
//!
//! let request = MutationRequest::new("r1", "t1", OperationKind::Delete)
//!     .confirmed_by("admin");
//!
//! assert!(request.is_confirmed());
//! assert_eq!(request.fingerprint(), request.clone().fingerprint());
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod fingerprint;
mod ids;
mod outcome;
mod request;

pub use fingerprint::Fingerprint;
pub use ids::{ActorId, RequestId, TargetId};
pub use outcome::{Outcome, OutcomeKind, PAYLOAD_MISMATCH, TARGET_LOCKED};
pub use request::{MutationRequest, OperationKind, RequestError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
