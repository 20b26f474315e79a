//! MutGate idempotency store
//!
//! Durable record of request outcomes keyed by request id. A record is
//! created `Pending` when a request is admitted and closed exactly once with
//! its outcome; terminal records are retained for a configurable window and
//! then purged, after which the id may be reused.
//!
//! Two implementations:
//! - [`MemoryIdempotencyStore`]: exactly-once for the lifetime of the process
//! - [`FileIdempotencyStore`]: append-only JSON-lines journal, exactly-once
//!   across restarts
//!
//! Store operations are synchronous and bounded; they never touch the remote
//! backend.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod error;
mod file;
mod memory;
mod purge;
mod record;

pub use error::{Result, StoreError};
pub use file::FileIdempotencyStore;
pub use memory::MemoryIdempotencyStore;
pub use purge::spawn_purger;
pub use record::{IdempotencyRecord, RecordStatus};

use mutgate_request::{Fingerprint, Outcome, RequestId};
use std::time::Duration;

/// Default retention for terminal records (24 hours)
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Durable record of request outcomes
///
/// Every mutating method is an atomic check-and-set on a single request id.
pub trait IdempotencyStore: Send + Sync + std::fmt::Debug {
    /// Current record for `request_id`, without side effects
    ///
    /// # Errors
    /// `StoreError::Unavailable` if the backing storage cannot be read
    fn lookup(&self, request_id: &RequestId) -> Result<Option<IdempotencyRecord>>;

    /// Insert a `Pending` record unless a live one exists
    ///
    /// Succeeds when no record exists or the existing one is terminal and
    /// expired. Returns `false` if a live record (pending, or terminal within
    /// retention) is present.
    ///
    /// # Errors
    /// `StoreError::Unavailable` if the intent could not be recorded durably
    fn begin_pending(&self, request_id: &RequestId, fingerprint: Fingerprint) -> Result<bool>;

    /// Close a `Pending` record with `outcome`
    ///
    /// Status follows [`RecordStatus::for_outcome`].
    ///
    /// # Errors
    /// - `StoreError::NotFound` / `StoreError::NotPending` on lifecycle misuse
    /// - `StoreError::Unavailable` if the transition could not be persisted
    fn complete(&self, request_id: &RequestId, outcome: Outcome) -> Result<IdempotencyRecord>;

    /// Close an abandoned `Pending` record as `RolledBack`
    ///
    /// # Errors
    /// Same as [`complete`](Self::complete)
    fn roll_back(&self, request_id: &RequestId, outcome: Outcome) -> Result<IdempotencyRecord>;

    /// Remove terminal records past their expiry; returns how many
    ///
    /// # Errors
    /// `StoreError::Unavailable` if the removal could not be persisted
    fn purge_expired(&self) -> Result<usize>;

    /// `Pending` records admitted at least `older_than` ago
    ///
    /// # Errors
    /// `StoreError::Unavailable` if the backing storage cannot be read
    fn stale_pending(&self, older_than: Duration) -> Result<Vec<IdempotencyRecord>>;

    /// Snapshot of every record, in no particular order
    ///
    /// # Errors
    /// `StoreError::Unavailable` if the backing storage cannot be read
    fn records(&self) -> Result<Vec<IdempotencyRecord>>;
}

pub(crate) fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365 * 100))
}
