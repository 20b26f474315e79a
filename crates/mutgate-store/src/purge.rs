//! Background housekeeping

use crate::IdempotencyStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Run [`IdempotencyStore::purge_expired`] every `interval`
///
/// Runs until the returned handle is aborted. Store failures are logged and
/// the next tick tries again.
///
/// # Panics
/// If `interval` is zero.
pub fn spawn_purger(store: Arc<dyn IdempotencyStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match store.purge_expired() {
                Ok(0) => {}
                Ok(purged) => tracing::debug!(purged, "purged expired idempotency records"),
                Err(e) => tracing::error!(error = %e, "idempotency purge failed"),
            }
        }
    })
}
