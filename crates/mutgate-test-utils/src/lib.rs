//! Testing utilities for the MutGate workspace
//!
//! Scripted executors, a store wrapper with failpoints, and fixtures.

#![allow(missing_docs)]

use dashmap::DashMap;
use mutgate_core::{MutationPipeline, PipelineConfig};
use mutgate_executor::RemoteExecutor;
use mutgate_request::{Fingerprint, MutationRequest, OperationKind, Outcome, RequestId, TargetId};
use mutgate_store::{IdempotencyRecord, IdempotencyStore, StoreError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::sync::Semaphore;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

static TRACING: Once = Once::new();

/// Install a test-writer subscriber once per process (`RUST_LOG` respected)
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

pub fn confirmed(id: &str, target: &str, kind: OperationKind) -> MutationRequest {
    MutationRequest::new(id, target, kind).confirmed_by("operator")
}

pub fn delete_request(id: &str, target: &str) -> MutationRequest {
    confirmed(id, target, OperationKind::Delete)
}

pub fn memory_pipeline(executor: Arc<dyn RemoteExecutor>) -> Arc<MutationPipeline> {
    Arc::new(MutationPipeline::in_memory(executor, PipelineConfig::default()))
}

// ---------------------------------------------------------------------------
// Scripted executor
// ---------------------------------------------------------------------------

/// Executor returning queued outcomes, with call accounting
///
/// When the script runs out it returns `Success { data: null }`. A held
/// executor parks every call until [`unblock`](Self::unblock) hands out a
/// permit.
#[derive(Debug)]
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    per_request: DashMap<RequestId, usize>,
    running: DashMap<TargetId, usize>,
    max_running_per_target: AtomicUsize,
    delay: Option<Duration>,
    hold: Option<Semaphore>,
    started: Semaphore,
}

#[derive(Debug, Clone)]
enum Step {
    Return(Outcome),
    Panic(String),
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            per_request: DashMap::new(),
            running: DashMap::new(),
            max_running_per_target: AtomicUsize::new(0),
            delay: None,
            hold: None,
            started: Semaphore::new(0),
        }
    }

    /// Every call parks until unblocked
    pub fn held() -> Self {
        Self {
            hold: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    #[must_use]
    pub fn then(self, outcome: Outcome) -> Self {
        self.script.lock().push_back(Step::Return(outcome));
        self
    }

    #[must_use]
    pub fn then_panic(self, message: &str) -> Self {
        self.script.lock().push_back(Step::Panic(message.to_string()));
        self
    }

    /// Let `n` parked calls proceed
    pub fn unblock(&self, n: usize) {
        if let Some(hold) = &self.hold {
            hold.add_permits(n);
        }
    }

    /// Wait until `n` more calls have started
    pub async fn wait_started(&self, n: u32) {
        self.started
            .acquire_many(n)
            .await
            .expect("started semaphore closed")
            .forget();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, request_id: &str) -> usize {
        self.per_request
            .get(&RequestId::new(request_id))
            .map_or(0, |c| *c)
    }

    /// Highest number of simultaneous calls seen on any one target
    pub fn max_running_per_target(&self) -> usize {
        self.max_running_per_target.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

struct Running<'a> {
    running: &'a DashMap<TargetId, usize>,
    target: TargetId,
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        if let Some(mut count) = self.running.get_mut(&self.target) {
            *count -= 1;
        }
    }
}

#[async_trait::async_trait]
impl RemoteExecutor for ScriptedExecutor {
    async fn execute(&self, request: &MutationRequest) -> Outcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.per_request.entry(request.request_id.clone()).or_insert(0) += 1;

        let now_running = {
            let mut count = self.running.entry(request.target_id.clone()).or_insert(0);
            *count += 1;
            *count
        };
        self.max_running_per_target
            .fetch_max(now_running, Ordering::SeqCst);
        let _running = Running {
            running: &self.running,
            target: request.target_id.clone(),
        };
        self.started.add_permits(1);

        if let Some(hold) = &self.hold {
            hold.acquire().await.expect("hold semaphore closed").forget();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let step = self.script.lock().pop_front();
        match step {
            Some(Step::Return(outcome)) => outcome,
            Some(Step::Panic(message)) => panic!("{message}"),
            None => Outcome::success(serde_json::Value::Null),
        }
    }
}

// ---------------------------------------------------------------------------
// Failpoint store
// ---------------------------------------------------------------------------

/// Store wrapper whose operations can be made to fail as if unreachable
///
/// Failing `complete` models a crash between execution and recording.
#[derive(Debug)]
pub struct FailpointStore {
    inner: Arc<dyn IdempotencyStore>,
    fail_lookup: AtomicBool,
    fail_begin: AtomicBool,
    fail_complete: AtomicBool,
}

impl FailpointStore {
    pub fn new(inner: Arc<dyn IdempotencyStore>) -> Self {
        Self {
            inner,
            fail_lookup: AtomicBool::new(false),
            fail_begin: AtomicBool::new(false),
            fail_complete: AtomicBool::new(false),
        }
    }

    pub fn fail_lookup(&self, on: bool) {
        self.fail_lookup.store(on, Ordering::SeqCst);
    }

    pub fn fail_begin(&self, on: bool) {
        self.fail_begin.store(on, Ordering::SeqCst);
    }

    pub fn fail_complete(&self, on: bool) {
        self.fail_complete.store(on, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool, op: &str) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable(format!("failpoint: {op}")))
        } else {
            Ok(())
        }
    }
}

impl IdempotencyStore for FailpointStore {
    fn lookup(&self, request_id: &RequestId) -> Result<Option<IdempotencyRecord>, StoreError> {
        Self::check(&self.fail_lookup, "lookup")?;
        self.inner.lookup(request_id)
    }

    fn begin_pending(
        &self,
        request_id: &RequestId,
        fingerprint: Fingerprint,
    ) -> Result<bool, StoreError> {
        Self::check(&self.fail_begin, "begin_pending")?;
        self.inner.begin_pending(request_id, fingerprint)
    }

    fn complete(
        &self,
        request_id: &RequestId,
        outcome: Outcome,
    ) -> Result<IdempotencyRecord, StoreError> {
        Self::check(&self.fail_complete, "complete")?;
        self.inner.complete(request_id, outcome)
    }

    fn roll_back(
        &self,
        request_id: &RequestId,
        outcome: Outcome,
    ) -> Result<IdempotencyRecord, StoreError> {
        self.inner.roll_back(request_id, outcome)
    }

    fn purge_expired(&self) -> Result<usize, StoreError> {
        self.inner.purge_expired()
    }

    fn stale_pending(&self, older_than: Duration) -> Result<Vec<IdempotencyRecord>, StoreError> {
        self.inner.stale_pending(older_than)
    }

    fn records(&self) -> Result<Vec<IdempotencyRecord>, StoreError> {
        self.inner.records()
    }
}
