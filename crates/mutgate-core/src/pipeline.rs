//! Mutation pipeline
//!
//! `submit` runs one request through:
//!
//! 1. replay check: a live terminal record returns its stored outcome
//! 2. `begin_pending`: record the intent before anything else happens
//! 3. gate acquire: a held target is rejected, never queued
//! 4. execute (the only network step)
//! 5. `complete` the record
//! 6. release the gate
//!
//! Step 5 always precedes step 6, so once a target is unlocked the outcome of
//! the mutation that held it is already recorded. A crash between 4 and 5
//! leaves a `Pending` record behind, which blocks re-execution until
//! [`recover_abandoned`](MutationPipeline::recover_abandoned) closes it.

use crate::config::PipelineConfig;
use crate::error::{PipelineFault, SubmitError};
use chrono::Utc;
use dashmap::DashSet;
use futures::FutureExt;
use mutgate_executor::RemoteExecutor;
use mutgate_gate::{ConfirmationGate, GateEntry};
use mutgate_request::{Fingerprint, MutationRequest, Outcome, RequestId, PAYLOAD_MISMATCH};
use mutgate_store::{
    IdempotencyRecord, IdempotencyStore, MemoryIdempotencyStore, RecordStatus, StoreError,
};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// Records closed by [`MutationPipeline::recover_abandoned`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryReport {
    /// Closed as `RolledBack`
    pub rolled_back: Vec<RequestId>,
    /// Stale but still executing in this process
    pub skipped_in_flight: Vec<RequestId>,
}

/// Confirmable idempotent mutation pipeline
///
/// Safe to share across tasks. The only shared mutable state is the record
/// per request id and the gate entry per target.
pub struct MutationPipeline {
    store: Arc<dyn IdempotencyStore>,
    gate: Arc<ConfirmationGate>,
    executor: Arc<dyn RemoteExecutor>,
    config: PipelineConfig,
    in_flight: DashSet<RequestId>,
}

impl std::fmt::Debug for MutationPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationPipeline")
            .field("store", &self.store)
            .field("gate", &self.gate)
            .field("config", &self.config)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

/// Removes the request from the in-flight set however `submit` exits
struct InFlightGuard<'a> {
    set: &'a DashSet<RequestId>,
    request_id: RequestId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.request_id);
    }
}

impl MutationPipeline {
    /// Create a pipeline with its own gate and default config
    #[must_use]
    pub fn new(store: Arc<dyn IdempotencyStore>, executor: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            store,
            gate: Arc::new(ConfirmationGate::new()),
            executor,
            config: PipelineConfig::default(),
            in_flight: DashSet::new(),
        }
    }

    /// Create a pipeline over a fresh in-memory store sized by `config`
    #[must_use]
    pub fn in_memory(executor: Arc<dyn RemoteExecutor>, config: PipelineConfig) -> Self {
        let store = Arc::new(MemoryIdempotencyStore::with_retention(config.record_retention()));
        Self::new(store, executor).with_config(config)
    }

    /// With a shared gate
    #[inline]
    #[must_use]
    pub fn with_gate(mut self, gate: Arc<ConfirmationGate>) -> Self {
        self.gate = gate;
        self
    }

    /// With configuration
    #[inline]
    #[must_use]
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Idempotency store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<dyn IdempotencyStore> {
        &self.store
    }

    /// Confirmation gate
    #[inline]
    #[must_use]
    pub fn gate(&self) -> &Arc<ConfirmationGate> {
        &self.gate
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run `request` through the pipeline
    ///
    /// Every business result, including store unavailability, comes back as
    /// an [`Outcome`].
    ///
    /// # Errors
    /// `PipelineFault` when a record or gate invariant is broken. Panics
    /// instead with the `strict-debug` feature.
    pub async fn submit(&self, request: MutationRequest) -> Result<Outcome, PipelineFault> {
        if let Err(e) = request.check_admissible() {
            tracing::debug!(
                request_id = %request.request_id,
                target_id = %request.target_id,
                error = %e,
                "request refused before admission"
            );
            return Ok(Outcome::validation_error(e.to_string()));
        }

        let fingerprint = request.fingerprint();
        let request_id = &request.request_id;

        match self.store.lookup(request_id) {
            Ok(Some(record)) if !record.is_expired(Utc::now()) => {
                return Ok(self.answer_existing(&request, &record, fingerprint));
            }
            Ok(_) => {}
            Err(e) => return Ok(self.store_unavailable(&request, &e)),
        }

        match self.store.begin_pending(request_id, fingerprint) {
            Ok(true) => {}
            Ok(false) => {
                // lost the race to another submit of the same id
                return Ok(match self.store.lookup(request_id) {
                    Ok(Some(record)) => self.answer_existing(&request, &record, fingerprint),
                    Ok(None) => Outcome::duplicate(None),
                    Err(e) => self.store_unavailable(&request, &e),
                });
            }
            Err(e) => return Ok(self.store_unavailable(&request, &e)),
        }
        let _in_flight = self.track(request_id);
        tracing::debug!(request_id = %request_id, target_id = %request.target_id, "request admitted");

        if !self.gate.try_acquire(&request.target_id, request_id) {
            let outcome = Outcome::target_locked();
            tracing::info!(
                request_id = %request_id,
                target_id = %request.target_id,
                "target locked by another request"
            );
            return match self.store.complete(request_id, outcome.clone()) {
                Ok(_) => Ok(outcome),
                Err(e) => self.completion_failed(&request, e),
            };
        }

        let outcome = self.execute_contained(&request).await;

        let completion = self.store.complete(request_id, outcome.clone());
        let release = self.gate.release(&request.target_id, request_id);

        if let Err(e) = completion {
            return self.completion_failed(&request, e);
        }
        match release {
            Ok(()) => {}
            Err(e) if !e.is_misuse() => {
                tracing::warn!(request_id = %request_id, error = %e, "gate was released as stale before completion");
            }
            Err(e) => return Err(self.fault(PipelineFault::Gate(e))),
        }

        tracing::info!(
            request_id = %request_id,
            target_id = %request.target_id,
            operation = %request.operation_kind,
            outcome = %outcome.kind(),
            "mutation attempt finished"
        );
        Ok(outcome)
    }

    /// [`submit`](Self::submit) bounded by a caller deadline
    ///
    /// The attempt runs on its own task. When `deadline` elapses first the
    /// attempt is left running to completion (its record stays `Pending` and
    /// the gate stays held until then) and the caller gets
    /// `SubmitError::DeadlineElapsed`.
    ///
    /// # Errors
    /// - `SubmitError::DeadlineElapsed` when the deadline passes
    /// - `SubmitError::Fault` as for `submit`
    /// - `SubmitError::Aborted` if the task itself was cancelled or panicked
    pub async fn submit_within(
        self: &Arc<Self>,
        request: MutationRequest,
        deadline: Duration,
    ) -> Result<Outcome, SubmitError> {
        let pipeline = Arc::clone(self);
        let request_id = request.request_id.clone();
        let attempt = tokio::spawn(async move { pipeline.submit(request).await });

        match tokio::time::timeout(deadline, attempt).await {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(join)) => Err(SubmitError::Aborted(join.to_string())),
            Err(_) => {
                tracing::debug!(request_id = %request_id, ?deadline, "caller deadline elapsed");
                Err(SubmitError::DeadlineElapsed(deadline))
            }
        }
    }

    /// Close `Pending` records abandoned for at least `older_than`
    ///
    /// Each is rolled back with `ConnectionInterrupted { can_retry: true }`,
    /// so a resubmission replays the ambiguity instead of executing again.
    /// Requests still executing in this process are skipped.
    ///
    /// # Errors
    /// `StoreError` if the store cannot be read or written
    pub fn recover_abandoned(&self, older_than: Duration) -> Result<RecoveryReport, StoreError> {
        let mut report = RecoveryReport::default();

        for record in self.store.stale_pending(older_than)? {
            if self.in_flight.contains(&record.request_id) {
                report.skipped_in_flight.push(record.request_id);
                continue;
            }
            match self.store.roll_back(&record.request_id, Outcome::interrupted(true)) {
                Ok(_) => {
                    tracing::warn!(
                        request_id = %record.request_id,
                        created_at = %record.created_at,
                        "rolled back abandoned pending record"
                    );
                    report.rolled_back.push(record.request_id);
                }
                // completed between listing and rollback
                Err(e) if e.is_misuse() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    /// Force-release gate holds older than `older_than` whose holder is no
    /// longer executing in this process
    ///
    /// A hold whose request is still in flight is never revoked, however
    /// long the remote call takes.
    pub fn release_stale_gates(&self, older_than: Duration) -> Vec<GateEntry> {
        self.gate
            .release_all_stale_unless(older_than, |request_id| self.in_flight.contains(request_id))
    }

    /// Number of requests currently between admission and completion
    #[inline]
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    fn track(&self, request_id: &RequestId) -> InFlightGuard<'_> {
        self.in_flight.insert(request_id.clone());
        InFlightGuard {
            set: &self.in_flight,
            request_id: request_id.clone(),
        }
    }

    async fn execute_contained(&self, request: &MutationRequest) -> Outcome {
        match AssertUnwindSafe(self.executor.execute(request))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                tracing::error!(
                    request_id = %request.request_id,
                    target_id = %request.target_id,
                    panic = %message,
                    "executor panicked"
                );
                Outcome::interrupted(true)
            }
        }
    }

    /// Outcome for a request whose id already has a live record
    fn answer_existing(
        &self,
        request: &MutationRequest,
        record: &IdempotencyRecord,
        fingerprint: Fingerprint,
    ) -> Outcome {
        if record.fingerprint != fingerprint {
            tracing::debug!(request_id = %request.request_id, "request id reused with a different payload");
            return Outcome::validation_error(PAYLOAD_MISMATCH);
        }
        match (&record.status, &record.result) {
            (RecordStatus::Pending, _) | (_, None) => {
                tracing::debug!(request_id = %request.request_id, "duplicate of in-flight request");
                Outcome::duplicate(None)
            }
            (status, Some(outcome)) => {
                tracing::debug!(
                    request_id = %request.request_id,
                    status = %status,
                    outcome = %outcome.kind(),
                    "replaying stored outcome"
                );
                outcome.clone()
            }
        }
    }

    fn store_unavailable(&self, request: &MutationRequest, err: &StoreError) -> Outcome {
        tracing::error!(
            request_id = %request.request_id,
            target_id = %request.target_id,
            error = %err,
            "idempotency store unavailable; nothing executed"
        );
        Outcome::interrupted(true)
    }

    fn completion_failed(
        &self,
        request: &MutationRequest,
        err: StoreError,
    ) -> Result<Outcome, PipelineFault> {
        if !err.is_unavailable() {
            return Err(self.fault(PipelineFault::Record(err)));
        }
        // record stays Pending; a retry sees a duplicate until recovery closes it
        tracing::error!(
            request_id = %request.request_id,
            target_id = %request.target_id,
            error = %err,
            "failed to record outcome"
        );
        Ok(Outcome::interrupted(true))
    }

    fn fault(&self, fault: PipelineFault) -> PipelineFault {
        tracing::error!(error = %fault, gate = fault.is_gate(), "pipeline invariant violated");
        if cfg!(feature = "strict-debug") {
            panic!("pipeline invariant violated: {fault}");
        }
        fault
    }
}
