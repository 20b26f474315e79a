//! Gate state machine: `Unlocked -> Locked -> Unlocked`, per target

use crate::error::GateError;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mutgate_request::{RequestId, TargetId};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Default capacity of the gate event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Hold of one request on one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateEntry {
    /// Locked target
    pub target_id: TargetId,
    /// Holding request
    pub held_by: RequestId,
    /// Wall-clock acquisition time
    pub acquired_at: DateTime<Utc>,
    since: Instant,
}

impl GateEntry {
    fn new(target_id: TargetId, held_by: RequestId) -> Self {
        Self {
            target_id,
            held_by,
            acquired_at: Utc::now(),
            since: Instant::now(),
        }
    }

    /// How long the hold has lasted
    #[inline]
    #[must_use]
    pub fn held_for(&self) -> Duration {
        self.since.elapsed()
    }
}

/// Gate transitions, broadcast to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateEvent {
    /// Target locked
    Acquired {
        /// Target
        target_id: TargetId,
        /// New holder
        request_id: RequestId,
    },
    /// Target unlocked by its holder
    Released {
        /// Target
        target_id: TargetId,
        /// Former holder
        request_id: RequestId,
    },
    /// Target unlocked by [`ConfirmationGate::release_stale`]
    ForcedRelease {
        /// Target
        target_id: TargetId,
        /// Holder whose hold was revoked
        request_id: RequestId,
        /// Age of the hold when revoked
        held_for: Duration,
    },
}

#[derive(Debug)]
struct Revocation {
    target_id: TargetId,
    at: Instant,
}

/// Per-target lock table
///
/// Acquire and release are atomic check-and-set operations on a single
/// target; holds on different targets never contend.
#[derive(Debug)]
pub struct ConfirmationGate {
    entries: DashMap<TargetId, GateEntry>,
    revoked: DashMap<RequestId, Revocation>,
    events: broadcast::Sender<GateEvent>,
}

impl ConfirmationGate {
    /// Create an empty gate
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Create an empty gate whose event channel buffers `capacity` events
    #[must_use]
    pub fn with_event_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            entries: DashMap::new(),
            revoked: DashMap::new(),
            events,
        }
    }

    /// Subscribe to gate events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<GateEvent> {
        self.events.subscribe()
    }

    /// Lock `target_id` for `request_id`
    ///
    /// Succeeds only if the target is unlocked; on failure nothing changes.
    #[must_use]
    pub fn try_acquire(&self, target_id: &TargetId, request_id: &RequestId) -> bool {
        match self.entries.entry(target_id.clone()) {
            Entry::Occupied(held) => {
                tracing::debug!(
                    target_id = %target_id,
                    request_id = %request_id,
                    held_by = %held.get().held_by,
                    "target already locked"
                );
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(GateEntry::new(target_id.clone(), request_id.clone()));
                self.emit(GateEvent::Acquired {
                    target_id: target_id.clone(),
                    request_id: request_id.clone(),
                });
                true
            }
        }
    }

    /// Unlock `target_id`, only if `request_id` holds it
    ///
    /// # Errors
    /// - `GateError::Revoked` if the hold was already forcibly released
    /// - `GateError::Mismatch` if another request holds the target
    /// - `GateError::NotHeld` if the target is unlocked
    pub fn release(&self, target_id: &TargetId, request_id: &RequestId) -> Result<(), GateError> {
        if self
            .entries
            .remove_if(target_id, |_, entry| entry.held_by == *request_id)
            .is_some()
        {
            self.emit(GateEvent::Released {
                target_id: target_id.clone(),
                request_id: request_id.clone(),
            });
            return Ok(());
        }

        if self
            .revoked
            .remove_if(request_id, |_, revocation| revocation.target_id == *target_id)
            .is_some()
        {
            return Err(GateError::Revoked {
                target_id: target_id.clone(),
                request_id: request_id.clone(),
            });
        }

        let err = match self.entries.get(target_id) {
            Some(entry) => GateError::Mismatch {
                target_id: target_id.clone(),
                held_by: entry.held_by.clone(),
                requested_by: request_id.clone(),
            },
            None => GateError::NotHeld {
                target_id: target_id.clone(),
                request_id: request_id.clone(),
            },
        };
        tracing::error!(error = %err, "invalid gate release");
        Err(err)
    }

    /// Forcibly unlock `target_id` if held for at least `older_than`
    ///
    /// Returns the revoked entry. Every forced release is logged at warn
    /// level and broadcast as [`GateEvent::ForcedRelease`].
    pub fn release_stale(&self, target_id: &TargetId, older_than: Duration) -> Option<GateEntry> {
        self.revoke_if(target_id, older_than, |_| false)
    }

    /// [`release_stale`](Self::release_stale) across every target
    pub fn release_all_stale(&self, older_than: Duration) -> Vec<GateEntry> {
        self.release_all_stale_unless(older_than, |_| false)
    }

    /// Sweep stale holds, sparing holders for which `busy` returns true
    ///
    /// `busy` is evaluated under the target's lock, so a hold cannot change
    /// hands between the check and the removal. Revocations older than
    /// `older_than` are forgotten: their holders are presumed gone and a late
    /// release from them reports `NotHeld`.
    pub fn release_all_stale_unless<F>(&self, older_than: Duration, busy: F) -> Vec<GateEntry>
    where
        F: Fn(&RequestId) -> bool,
    {
        self.revoked.retain(|_, revocation| revocation.at.elapsed() < older_than);

        let stale: Vec<TargetId> = self
            .entries
            .iter()
            .filter(|e| e.held_for() >= older_than)
            .map(|e| e.key().clone())
            .collect();

        stale
            .iter()
            .filter_map(|target| self.revoke_if(target, older_than, &busy))
            .collect()
    }

    fn revoke_if<F>(&self, target_id: &TargetId, older_than: Duration, busy: F) -> Option<GateEntry>
    where
        F: Fn(&RequestId) -> bool,
    {
        let (_, entry) = self.entries.remove_if(target_id, |_, entry| {
            entry.held_for() >= older_than && !busy(&entry.held_by)
        })?;

        let held_for = entry.held_for();
        self.revoked.insert(
            entry.held_by.clone(),
            Revocation {
                target_id: entry.target_id.clone(),
                at: Instant::now(),
            },
        );
        tracing::warn!(
            target_id = %entry.target_id,
            request_id = %entry.held_by,
            held_for_ms = u64::try_from(held_for.as_millis()).unwrap_or(u64::MAX),
            "forcibly releasing stale gate entry"
        );
        self.emit(GateEvent::ForcedRelease {
            target_id: entry.target_id.clone(),
            request_id: entry.held_by.clone(),
            held_for,
        });
        Some(entry)
    }

    /// Current hold on `target_id`
    #[must_use]
    pub fn holder(&self, target_id: &TargetId) -> Option<GateEntry> {
        self.entries.get(target_id).map(|e| e.clone())
    }

    /// Check if `target_id` is locked
    #[inline]
    #[must_use]
    pub fn is_locked(&self, target_id: &TargetId) -> bool {
        self.entries.contains_key(target_id)
    }

    /// Number of locked targets
    #[inline]
    #[must_use]
    pub fn locked_count(&self) -> usize {
        self.entries.len()
    }

    /// Revoked holders still remembered for a late release
    #[inline]
    #[must_use]
    pub fn revoked_count(&self) -> usize {
        self.revoked.len()
    }

    fn emit(&self, event: GateEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

impl Default for ConfirmationGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(target: &str, request: &str) -> (TargetId, RequestId) {
        (TargetId::new(target), RequestId::new(request))
    }

    #[test]
    fn acquire_is_exclusive_per_target() {
        let gate = ConfirmationGate::new();
        let (t1, r1) = ids("t1", "r1");
        let (t2, r2) = ids("t2", "r2");

        assert!(gate.try_acquire(&t1, &r1));
        assert!(!gate.try_acquire(&t1, &r2));
        assert!(gate.try_acquire(&t2, &r2));
        assert_eq!(gate.holder(&t1).unwrap().held_by, r1);
        assert_eq!(gate.locked_count(), 2);
    }

    #[test]
    fn failed_acquire_changes_nothing() {
        let gate = ConfirmationGate::new();
        let (t1, r1) = ids("t1", "r1");
        assert!(gate.try_acquire(&t1, &r1));
        let before = gate.holder(&t1);
        assert!(!gate.try_acquire(&t1, &RequestId::new("r2")));
        assert_eq!(gate.holder(&t1), before);
    }

    #[test]
    fn mismatched_release_keeps_hold() {
        let gate = ConfirmationGate::new();
        let (t1, r1) = ids("t1", "r1");
        assert!(gate.try_acquire(&t1, &r1));

        let err = gate.release(&t1, &RequestId::new("intruder")).unwrap_err();
        assert!(err.is_misuse());
        assert!(matches!(err, GateError::Mismatch { ref held_by, .. } if *held_by == r1));
        assert!(gate.is_locked(&t1));
    }

    #[test]
    fn release_of_unlocked_target_is_misuse() {
        let gate = ConfirmationGate::new();
        let (t1, r1) = ids("t1", "r1");
        assert!(matches!(gate.release(&t1, &r1), Err(GateError::NotHeld { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_release_is_announced_and_revokes() {
        let gate = ConfirmationGate::new();
        let mut events = gate.subscribe();
        let (t1, r1) = ids("t1", "r1");
        assert!(gate.try_acquire(&t1, &r1));

        assert!(gate.release_stale(&t1, Duration::from_secs(60)).is_none());
        tokio::time::advance(Duration::from_secs(61)).await;
        let revoked = gate.release_stale(&t1, Duration::from_secs(60)).unwrap();
        assert_eq!(revoked.held_by, r1);
        assert!(!gate.is_locked(&t1));

        assert!(matches!(events.recv().await.unwrap(), GateEvent::Acquired { .. }));
        assert!(matches!(
            events.recv().await.unwrap(),
            GateEvent::ForcedRelease { ref request_id, .. } if *request_id == r1
        ));

        // late release by the revoked holder is reported, not treated as misuse
        let err = gate.release(&t1, &r1).unwrap_err();
        assert!(matches!(err, GateError::Revoked { .. }));
        assert!(!err.is_misuse());
    }

    #[tokio::test(start_paused = true)]
    async fn busy_holders_survive_the_sweep() {
        let gate = ConfirmationGate::new();
        let (t1, r1) = ids("t1", "r1");
        let (t2, r2) = ids("t2", "r2");
        assert!(gate.try_acquire(&t1, &r1));
        assert!(gate.try_acquire(&t2, &r2));
        tokio::time::advance(Duration::from_secs(120)).await;

        let revoked = gate.release_all_stale_unless(Duration::from_secs(60), |id| *id == r1);
        assert_eq!(revoked.len(), 1);
        assert_eq!(revoked[0].held_by, r2);
        assert_eq!(gate.holder(&t1).unwrap().held_by, r1);
        assert!(gate.release(&t1, &r1).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_revocations_are_forgotten() {
        let gate = ConfirmationGate::new();
        let (t1, r1) = ids("t1", "r1");
        assert!(gate.try_acquire(&t1, &r1));
        tokio::time::advance(Duration::from_secs(61)).await;

        assert_eq!(gate.release_all_stale(Duration::from_secs(60)).len(), 1);
        assert_eq!(gate.revoked_count(), 1);

        // r1 never comes back to release
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(gate.release_all_stale(Duration::from_secs(60)).is_empty());
        assert_eq!(gate.revoked_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_only_touches_stale_entries() {
        let gate = ConfirmationGate::new();
        let (old, r1) = ids("old", "r1");
        assert!(gate.try_acquire(&old, &r1));
        tokio::time::advance(Duration::from_secs(120)).await;
        let (fresh, r2) = ids("fresh", "r2");
        assert!(gate.try_acquire(&fresh, &r2));

        let revoked = gate.release_all_stale(Duration::from_secs(60));
        assert_eq!(revoked.len(), 1);
        assert_eq!(revoked[0].target_id, old);
        assert!(gate.is_locked(&fresh));
    }
}
