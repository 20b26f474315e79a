use mutgate_core::{MutationPipeline, PipelineConfig, PipelineFault};
use mutgate_gate::ConfirmationGate;
use mutgate_request::{MutationRequest, OperationKind, Outcome, RequestId, TargetId};
use mutgate_store::{FileIdempotencyStore, IdempotencyStore, MemoryIdempotencyStore, RecordStatus};
use mutgate_test_utils::{
    delete_request, init_tracing, memory_pipeline, FailpointStore, ScriptedExecutor,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn status_of(pipeline: &MutationPipeline, id: &str) -> Option<RecordStatus> {
    pipeline
        .store()
        .lookup(&RequestId::new(id))
        .unwrap()
        .map(|r| r.status)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn duplicate_storm_executes_once() {
    init_tracing();
    let executor = Arc::new(ScriptedExecutor::held().then(Outcome::success(json!({"deleted": 1}))));
    let pipeline = memory_pipeline(executor.clone());

    let attempts: Vec<_> = (0..50)
        .map(|_| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.submit(delete_request("storm", "t1")).await })
        })
        .collect();

    executor.wait_started(1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    executor.unblock(1);

    let mut successes = 0;
    for attempt in attempts {
        match attempt.await.unwrap().unwrap() {
            Outcome::Success { data } => {
                assert_eq!(data, json!({"deleted": 1}));
                successes += 1;
            }
            Outcome::DuplicateRequest { prior_result: None } => {}
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    assert!(successes >= 1);
    assert_eq!(executor.calls(), 1);
    assert_eq!(status_of(&pipeline, "storm"), Some(RecordStatus::Committed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_target_executes_strictly_serially() {
    let executor = Arc::new(ScriptedExecutor::held());
    let pipeline = memory_pipeline(executor.clone());

    let first = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.submit(delete_request("r1", "t1")).await })
    };
    executor.wait_started(1).await;

    let second = pipeline.submit(delete_request("r2", "t1")).await.unwrap();
    assert!(second.is_target_locked());
    assert_eq!(status_of(&pipeline, "r2"), Some(RecordStatus::Failed));

    // other targets are unaffected
    let other = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.submit(delete_request("r3", "t2")).await })
    };
    executor.wait_started(1).await;
    executor.unblock(2);

    assert!(first.await.unwrap().unwrap().is_success());
    assert!(other.await.unwrap().unwrap().is_success());
    assert_eq!(executor.max_running_per_target(), 1);
    assert_eq!(executor.calls_for("r2"), 0);

    // released: the target accepts new work
    executor.unblock(1);
    let third = pipeline.submit(delete_request("r4", "t1")).await.unwrap();
    assert!(third.is_success());
}

#[tokio::test]
async fn sequential_resubmission_replays() {
    let executor = Arc::new(ScriptedExecutor::new().then(Outcome::rejected("t1 not found")));
    let pipeline = memory_pipeline(executor.clone());

    let first = pipeline.submit(delete_request("r1", "t1")).await.unwrap();
    let second = pipeline.submit(delete_request("r1", "t1")).await.unwrap();

    assert_eq!(first, Outcome::rejected("t1 not found"));
    assert_eq!(second, first);
    assert_eq!(executor.calls(), 1);
}

#[tokio::test]
async fn crash_before_complete_leaves_pending_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records.journal");

    {
        let file = Arc::new(FileIdempotencyStore::open(&path).unwrap());
        let store = Arc::new(FailpointStore::new(file));
        store.fail_complete(true);
        let executor = Arc::new(ScriptedExecutor::new());
        let pipeline = MutationPipeline::new(store, executor.clone());

        let outcome = pipeline.submit(delete_request("r1", "t1")).await.unwrap();
        assert_eq!(outcome, Outcome::interrupted(true));
        assert_eq!(executor.calls(), 1);
        assert!(!pipeline.gate().is_locked(&TargetId::new("t1")));
    }

    // restart
    let store = Arc::new(FileIdempotencyStore::open(&path).unwrap());
    let record = store.lookup(&RequestId::new("r1")).unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Pending);

    let executor = Arc::new(ScriptedExecutor::new());
    let pipeline = MutationPipeline::new(store, executor.clone());
    assert_eq!(
        pipeline.submit(delete_request("r1", "t1")).await.unwrap(),
        Outcome::duplicate(None)
    );

    let report = pipeline.recover_abandoned(Duration::ZERO).unwrap();
    assert_eq!(report.rolled_back, vec![RequestId::new("r1")]);
    assert_eq!(status_of(&pipeline, "r1"), Some(RecordStatus::RolledBack));

    // the ambiguity is replayed, never re-executed
    assert_eq!(
        pipeline.submit(delete_request("r1", "t1")).await.unwrap(),
        Outcome::interrupted(true)
    );
    assert_eq!(executor.calls(), 0);
}

#[tokio::test]
async fn unavailable_store_executes_nothing() {
    let store = Arc::new(FailpointStore::new(Arc::new(MemoryIdempotencyStore::new())));
    let executor = Arc::new(ScriptedExecutor::new());
    let pipeline = MutationPipeline::new(store.clone(), executor.clone());

    store.fail_begin(true);
    assert_eq!(
        pipeline.submit(delete_request("r1", "t1")).await.unwrap(),
        Outcome::interrupted(true)
    );

    store.fail_begin(false);
    store.fail_lookup(true);
    assert_eq!(
        pipeline.submit(delete_request("r1", "t1")).await.unwrap(),
        Outcome::interrupted(true)
    );

    assert_eq!(executor.calls(), 0);
    assert_eq!(pipeline.gate().locked_count(), 0);
}

#[tokio::test]
async fn executor_panic_is_contained() {
    let executor = Arc::new(ScriptedExecutor::new().then_panic("driver exploded"));
    let pipeline = memory_pipeline(executor.clone());

    let outcome = pipeline.submit(delete_request("r1", "t1")).await.unwrap();
    assert_eq!(outcome, Outcome::interrupted(true));
    assert_eq!(status_of(&pipeline, "r1"), Some(RecordStatus::Failed));
    assert!(!pipeline.gate().is_locked(&TargetId::new("t1")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn caller_deadline_leaves_attempt_running() {
    let executor = Arc::new(ScriptedExecutor::held());
    let pipeline = memory_pipeline(executor.clone());

    let err = pipeline
        .submit_within(delete_request("r1", "t1"), Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(err.is_deadline());
    assert_eq!(status_of(&pipeline, "r1"), Some(RecordStatus::Pending));
    assert!(pipeline.gate().is_locked(&TargetId::new("t1")));

    executor.unblock(1);
    tokio::time::timeout(Duration::from_secs(5), async {
        while status_of(&pipeline, "r1") == Some(RecordStatus::Pending) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(status_of(&pipeline, "r1"), Some(RecordStatus::Committed));
    assert_eq!(
        pipeline
            .submit_within(delete_request("r1", "t1"), Duration::from_secs(1))
            .await
            .unwrap(),
        Outcome::success(serde_json::Value::Null)
    );
    assert_eq!(executor.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn recovery_skips_attempts_still_running() {
    let executor = Arc::new(ScriptedExecutor::held());
    let pipeline = memory_pipeline(executor.clone());

    let attempt = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.submit(delete_request("r1", "t1")).await })
    };
    executor.wait_started(1).await;

    let report = pipeline.recover_abandoned(Duration::ZERO).unwrap();
    assert!(report.rolled_back.is_empty());
    assert_eq!(report.skipped_in_flight, vec![RequestId::new("r1")]);

    executor.unblock(1);
    assert!(attempt.await.unwrap().unwrap().is_success());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn revoked_gate_does_not_fault_the_attempt() {
    let executor = Arc::new(ScriptedExecutor::held());
    let pipeline = memory_pipeline(executor.clone());

    let attempt = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.submit(delete_request("r1", "t1")).await })
    };
    executor.wait_started(1).await;
    assert_eq!(pipeline.gate().release_all_stale(Duration::ZERO).len(), 1);

    executor.unblock(1);
    assert!(attempt.await.unwrap().unwrap().is_success());
    assert_eq!(status_of(&pipeline, "r1"), Some(RecordStatus::Committed));
}

/// Executor that tampers with the shared gate while holding it
struct GateThief {
    gate: Arc<ConfirmationGate>,
}

#[async_trait::async_trait]
impl mutgate_executor::RemoteExecutor for GateThief {
    async fn execute(&self, request: &MutationRequest) -> Outcome {
        self.gate
            .release(&request.target_id, &request.request_id)
            .unwrap();
        assert!(self.gate.try_acquire(&request.target_id, &RequestId::new("intruder")));
        Outcome::success(serde_json::Value::Null)
    }
}

#[cfg(not(feature = "strict-debug"))]
#[tokio::test]
async fn mismatched_release_is_a_fault() {
    let gate = Arc::new(ConfirmationGate::new());
    let executor = Arc::new(GateThief { gate: gate.clone() });
    let pipeline = MutationPipeline::new(Arc::new(MemoryIdempotencyStore::new()), executor)
        .with_gate(gate.clone());

    let err = pipeline.submit(delete_request("r1", "t1")).await.unwrap_err();
    assert!(matches!(err, PipelineFault::Gate(ref e) if e.is_misuse()));
    assert!(err.is_gate());
    // the outcome was still recorded before the release was attempted
    assert_eq!(status_of(&pipeline, "r1"), Some(RecordStatus::Committed));
    assert_eq!(
        gate.holder(&TargetId::new("t1")).unwrap().held_by,
        RequestId::new("intruder")
    );
}

#[tokio::test(start_paused = true)]
async fn housekeeping_purges_and_reaps() {
    let config = PipelineConfig::new()
        .with_record_retention(Duration::ZERO)
        .with_purge_interval(Duration::from_secs(1))
        .with_stale_gate(Duration::from_secs(1));
    let pipeline = Arc::new(MutationPipeline::in_memory(
        Arc::new(ScriptedExecutor::new()),
        config,
    ));

    pipeline.submit(delete_request("r1", "t1")).await.unwrap();
    assert!(pipeline
        .gate()
        .try_acquire(&TargetId::new("orphan"), &RequestId::new("lost")));

    let housekeeping = pipeline.spawn_housekeeping().unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert_eq!(status_of(&pipeline, "r1"), None);
    assert!(!pipeline.gate().is_locked(&TargetId::new("orphan")));
    housekeeping.abort();
}

fn reaping_config() -> PipelineConfig {
    PipelineConfig::new()
        .with_purge_interval(Duration::from_secs(1))
        .with_stale_gate(Duration::from_secs(1))
}

#[tokio::test(start_paused = true)]
async fn reaper_spares_gate_of_running_attempt() {
    let executor = Arc::new(ScriptedExecutor::held());
    let pipeline = Arc::new(MutationPipeline::in_memory(executor.clone(), reaping_config()));

    let slow = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.submit(delete_request("r1", "t1")).await })
    };
    executor.wait_started(1).await;

    let housekeeping = pipeline.spawn_housekeeping().unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;

    let second = pipeline.submit(delete_request("r2", "t1")).await.unwrap();
    assert!(second.is_target_locked());
    assert_eq!(executor.calls_for("r2"), 0);
    assert_eq!(executor.max_running_per_target(), 1);
    assert_eq!(
        pipeline.gate().holder(&TargetId::new("t1")).unwrap().held_by,
        RequestId::new("r1")
    );

    executor.unblock(1);
    assert!(slow.await.unwrap().unwrap().is_success());
    housekeeping.abort();
}

#[tokio::test(start_paused = true)]
async fn reaper_frees_gate_of_cancelled_attempt() {
    let executor = Arc::new(ScriptedExecutor::held());
    let pipeline = Arc::new(MutationPipeline::in_memory(executor.clone(), reaping_config()));

    let cancelled = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.submit(delete_request("r1", "t1")).await })
    };
    executor.wait_started(1).await;
    cancelled.abort();
    assert!(cancelled.await.unwrap_err().is_cancelled());
    assert!(pipeline.gate().is_locked(&TargetId::new("t1")));
    assert_eq!(pipeline.in_flight_count(), 0);

    let housekeeping = pipeline.spawn_housekeeping().unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert!(!pipeline.gate().is_locked(&TargetId::new("t1")));
    assert_eq!(status_of(&pipeline, "r1"), Some(RecordStatus::Pending));
    housekeeping.abort();
}

#[tokio::test]
async fn invalid_config_refuses_housekeeping() {
    let mut config = PipelineConfig::new();
    config.purge_interval_secs = 0;
    let pipeline = Arc::new(MutationPipeline::in_memory(
        Arc::new(ScriptedExecutor::new()),
        config,
    ));

    assert!(matches!(
        pipeline.spawn_housekeeping(),
        Err(mutgate_core::ConfigError::Invalid(_))
    ));
}

#[tokio::test]
async fn blank_confirmer_is_refused() {
    let executor = Arc::new(ScriptedExecutor::new());
    let pipeline = memory_pipeline(executor.clone());
    let request = MutationRequest::new("r1", "t1", OperationKind::Update)
        .with_payload(json!({"body": "edited"}))
        .confirmed_by("");

    let outcome = pipeline.submit(request).await.unwrap();
    assert!(matches!(outcome, Outcome::ValidationError { .. }));
    assert_eq!(executor.calls(), 0);
    assert_eq!(status_of(&pipeline, "r1"), None);
}
