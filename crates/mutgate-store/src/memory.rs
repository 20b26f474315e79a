//! In-memory idempotency store

use crate::error::{Result, StoreError};
use crate::record::{IdempotencyRecord, RecordStatus};
use crate::{chrono_duration, IdempotencyStore, DEFAULT_RETENTION};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mutgate_request::{Fingerprint, Outcome, RequestId};
use std::time::Duration;

/// Idempotency store backed by a concurrent map
///
/// Exactly-once holds for the lifetime of the process only.
#[derive(Debug)]
pub struct MemoryIdempotencyStore {
    records: DashMap<RequestId, IdempotencyRecord>,
    retention: chrono::Duration,
}

impl MemoryIdempotencyStore {
    /// Create an empty store with [`DEFAULT_RETENTION`]
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    /// Create an empty store retaining terminal records for `retention`
    #[must_use]
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            records: DashMap::new(),
            retention: chrono_duration(retention),
        }
    }

    /// Number of records held
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if no records are held
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn close(
        &self,
        request_id: &RequestId,
        status: RecordStatus,
        outcome: Outcome,
    ) -> Result<IdempotencyRecord> {
        let mut record = self
            .records
            .get_mut(request_id)
            .ok_or_else(|| StoreError::NotFound(request_id.clone()))?;

        if record.status != RecordStatus::Pending {
            return Err(StoreError::NotPending {
                request_id: request_id.clone(),
                status: record.status,
            });
        }

        record.close(status, outcome, Utc::now(), self.retention);
        Ok(record.clone())
    }
}

impl Default for MemoryIdempotencyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IdempotencyStore for MemoryIdempotencyStore {
    fn lookup(&self, request_id: &RequestId) -> Result<Option<IdempotencyRecord>> {
        Ok(self.records.get(request_id).map(|r| r.clone()))
    }

    fn begin_pending(&self, request_id: &RequestId, fingerprint: Fingerprint) -> Result<bool> {
        let now = Utc::now();
        let fresh = || IdempotencyRecord::pending(request_id.clone(), fingerprint, now, self.retention);

        match self.records.entry(request_id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(fresh());
                Ok(true)
            }
            Entry::Occupied(mut slot) if slot.get().is_expired(now) => {
                slot.insert(fresh());
                Ok(true)
            }
            Entry::Occupied(_) => Ok(false),
        }
    }

    fn complete(&self, request_id: &RequestId, outcome: Outcome) -> Result<IdempotencyRecord> {
        let status = RecordStatus::for_outcome(&outcome);
        self.close(request_id, status, outcome)
    }

    fn roll_back(&self, request_id: &RequestId, outcome: Outcome) -> Result<IdempotencyRecord> {
        self.close(request_id, RecordStatus::RolledBack, outcome)
    }

    fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now));
        Ok(before.saturating_sub(self.records.len()))
    }

    fn stale_pending(&self, older_than: Duration) -> Result<Vec<IdempotencyRecord>> {
        let cutoff = Utc::now() - chrono_duration(older_than);
        Ok(self
            .records
            .iter()
            .filter(|r| r.is_stale_pending(cutoff))
            .map(|r| r.clone())
            .collect())
    }

    fn records(&self) -> Result<Vec<IdempotencyRecord>> {
        Ok(self.records.iter().map(|r| r.clone()).collect())
    }
}
