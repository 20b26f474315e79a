//! MutGate confirmation gate
//!
//! Per-target lock enforcing one in-flight mutation per target. A second
//! request for a held target is refused immediately; there is no queue.
//!
//! ```rust
//! use mutgate_gate::ConfirmationGate;
//! use mutgate_request::{RequestId, TargetId};
//!
//! let gate = ConfirmationGate::new();
//! let target = TargetId::new("invoice-7");
//!
//! assert!(gate.try_acquire(&target, &RequestId::new("r1")));
//! assert!(!gate.try_acquire(&target, &RequestId::new("r2")));
//! gate.release(&target, &RequestId::new("r1")).unwrap();
//! assert!(gate.try_acquire(&target, &RequestId::new("r2")));
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod error;
mod gate;

pub use error::GateError;
pub use gate::{ConfirmationGate, GateEntry, GateEvent, DEFAULT_EVENT_CAPACITY};
