//! Background maintenance for a running pipeline

use crate::config::ConfigError;
use crate::pipeline::MutationPipeline;
use mutgate_store::spawn_purger;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Handles of the maintenance tasks; aborts them when dropped
#[derive(Debug)]
pub struct Housekeeping {
    purger: JoinHandle<()>,
    reaper: JoinHandle<()>,
}

impl Housekeeping {
    /// Stop both tasks
    pub fn abort(&self) {
        self.purger.abort();
        self.reaper.abort();
    }
}

impl Drop for Housekeeping {
    fn drop(&mut self) {
        self.abort();
    }
}

impl MutationPipeline {
    /// Start periodic maintenance on the current runtime
    ///
    /// Every `purge_interval`:
    /// - expired terminal records are purged
    /// - gate holds older than `stale_gate` are forcibly released
    /// - `Pending` records older than `stale_pending` are rolled back
    ///
    /// Gate holds of requests still executing here are left alone.
    ///
    /// # Errors
    /// `ConfigError::Invalid` if the configuration does not validate
    pub fn spawn_housekeeping(self: &Arc<Self>) -> Result<Housekeeping, ConfigError> {
        self.config().validate()?;
        let interval = self.config().purge_interval();
        let purger = spawn_purger(Arc::clone(self.store()), interval);

        let pipeline = Arc::clone(self);
        let reaper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let released = pipeline.release_stale_gates(pipeline.config().stale_gate());
                if !released.is_empty() {
                    tracing::warn!(count = released.len(), "released stale gate entries");
                }
                match pipeline.recover_abandoned(pipeline.config().stale_pending()) {
                    Ok(report) if !report.rolled_back.is_empty() => {
                        tracing::warn!(count = report.rolled_back.len(), "recovered abandoned requests");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "recovery pass failed"),
                }
            }
        });

        Ok(Housekeeping { purger, reaper })
    }
}
