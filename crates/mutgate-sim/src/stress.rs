//! Duplicate-submission storm
//!
//! Fires `copies` identical confirmed deletions at one target at the same
//! time. Exactly one of them may reach the backend; every other copy must
//! come back as a duplicate or as a replay of the winner's result.

use mutgate_core::MutationPipeline;
use mutgate_executor::{ClassifyingExecutor, FaultProfile, SimulatedBackend};
use mutgate_request::{MutationRequest, OperationKind, Outcome};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Result of a stress run
#[derive(Debug, Clone)]
pub struct StressReport {
    /// Concurrent submissions fired
    pub copies: usize,
    /// Calls that reached the backend
    pub executions: u64,
    /// Copies answered with `Success`
    pub successes: usize,
    /// Copies answered with `DuplicateRequest`
    pub duplicates: usize,
    /// Copies answered with anything else, or lost to a fault
    pub unexpected: usize,
    /// Wall clock for the whole storm
    pub elapsed_ms: u128,
    /// Exactly one execution and no unexpected answers
    pub passed: bool,
}

/// Run `copies` concurrent submissions of one request
pub async fn run_stress(copies: usize, seed: u64) -> StressReport {
    let backend =
        SimulatedBackend::new(seed, FaultProfile::reliable().with_latency(Duration::from_millis(20)));
    backend.seed_entity("stress-target", json!({ "seed": seed }));
    let executor = Arc::new(ClassifyingExecutor::new(backend));
    let pipeline = Arc::new(MutationPipeline::in_memory(
        executor.clone(),
        mutgate_core::PipelineConfig::default(),
    ));

    let request = MutationRequest::new(
        format!("stress-{}", Uuid::new_v4()),
        "stress-target",
        OperationKind::Delete,
    )
    .confirmed_by("stress-operator");

    let started = Instant::now();
    let handles: Vec<_> = (0..copies)
        .map(|_| {
            let pipeline = pipeline.clone();
            let request = request.clone();
            tokio::spawn(async move { pipeline.submit(request).await })
        })
        .collect();

    let (mut successes, mut duplicates, mut unexpected) = (0, 0, 0);
    for handle in handles {
        match handle.await {
            Ok(Ok(Outcome::Success { .. })) => successes += 1,
            Ok(Ok(Outcome::DuplicateRequest { .. })) => duplicates += 1,
            Ok(Ok(other)) => {
                tracing::warn!(outcome = %other, "unexpected storm answer");
                unexpected += 1;
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "pipeline fault during storm");
                unexpected += 1;
            }
            Err(e) => {
                tracing::error!(error = %e, "storm task failed");
                unexpected += 1;
            }
        }
    }
    let elapsed_ms = started.elapsed().as_millis();

    let executions = executor.backend().stats().apply_calls;
    StressReport {
        copies,
        executions,
        successes,
        duplicates,
        elapsed_ms,
        passed: executions == 1 && unexpected == 0 && successes >= 1,
        unexpected,
    }
}
