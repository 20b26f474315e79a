//! Seeded simulation of concurrent operators against a flaky backend
//!
//! Invariants checked after every run:
//! - at most one remote application per request id
//! - no two remote calls on one target ever overlap
//! - every resubmission of a request id observes the same definitive outcome
//! - no record is left `Pending` once all operators are done
//! - no pipeline fault is raised

use mutgate_core::{MutationPipeline, PipelineConfig};
use mutgate_executor::{ClassifyingExecutor, FaultProfile, SimulatedBackend, SimulationStats};
use mutgate_request::{MutationRequest, OperationKind, Outcome, RequestId};
use mutgate_store::RecordStatus;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Simulator configuration
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Distinct request ids to submit
    pub requests: usize,
    /// Distinct targets the requests are spread over
    pub targets: usize,
    /// Probability that a remote call loses its connection
    pub drop_rate: f64,
    /// Resubmissions per operator after an interruption or duplicate
    pub retries: u32,
    /// Upper bound of simulated remote latency
    pub max_latency: Duration,
    /// Probability that an operator double-submits the same request
    pub double_submit_rate: f64,
    /// Pipeline settings
    pub pipeline: PipelineConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            requests: 500,
            targets: 20,
            drop_rate: 0.2,
            retries: 3,
            max_latency: Duration::from_millis(5),
            double_submit_rate: 0.25,
            pipeline: PipelineConfig::default(),
        }
    }
}

/// An invariant broken during simulation
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub enum Violation {
    /// A request id reached the backend more than once
    DuplicateExecution {
        request_id: RequestId,
        applies: usize,
    },
    /// Remote calls on one target overlapped
    TargetOverlap { overlapping_calls: u64 },
    /// A resubmission saw a different definitive outcome
    ReplayMismatch {
        request_id: RequestId,
        first: Outcome,
        later: Outcome,
    },
    /// A record was still `Pending` after the run
    PendingLeftBehind { request_id: RequestId },
    /// The pipeline returned a fault
    Fault {
        request_id: RequestId,
        error: String,
    },
}

/// Outcome counters, one per operator (final attempt)
#[derive(Debug, Clone, Default)]
pub struct SimulatorStats {
    /// Operator tasks spawned
    pub operators: u64,
    /// Calls to `submit`, resubmissions included
    pub submissions: u64,
    /// Calls after an operator's first one
    pub resubmissions: u64,
    /// Operators ending with `Success`
    pub succeeded: u64,
    /// Operators ending with `Rejected`
    pub rejected: u64,
    /// Subset of `rejected` lost to a held target
    pub target_locked: u64,
    /// Operators ending with `ValidationError`
    pub validation_errors: u64,
    /// Operators that ran out of retries on an interruption
    pub interrupted: u64,
    /// Operators that ran out of retries on a duplicate
    pub unresolved_duplicates: u64,
    /// Backend counters at the end of the run
    pub backend: SimulationStats,
}

/// Final report from simulator
#[derive(Debug, Clone)]
pub struct SimulatorReport {
    /// Configuration the run used
    pub config: SimulatorConfig,
    /// Collected counters
    pub stats: SimulatorStats,
    /// Broken invariants, empty on a passing run
    pub violations: Vec<Violation>,
}

impl SimulatorReport {
    /// Check if simulation passed all criteria
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Generate text report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let s = &self.stats;
        let b = &s.backend;
        let mut report = String::new();

        report.push_str("=== MutGate Simulator Report ===\n\n");
        report.push_str(&format!("Seed: {}\n", self.config.seed));
        report.push_str(&format!(
            "Requests: {} over {} targets\n",
            self.config.requests, self.config.targets
        ));
        report.push_str(&format!("Drop Rate: {:.2}\n", self.config.drop_rate));
        report.push_str(&format!("Operators: {}\n", s.operators));
        report.push_str(&format!(
            "Submissions: {} ({} resubmissions)\n",
            s.submissions, s.resubmissions
        ));
        report.push_str(&format!("Succeeded: {}\n", s.succeeded));
        report.push_str(&format!("Rejected: {} ({} target locked)\n", s.rejected, s.target_locked));
        report.push_str(&format!("Validation Errors: {}\n", s.validation_errors));
        report.push_str(&format!("Interrupted: {}\n", s.interrupted));
        report.push_str(&format!("Unresolved Duplicates: {}\n", s.unresolved_duplicates));
        report.push_str(&format!(
            "Backend: {} calls, {} applied, drops {}/{}/{} (before/after apply/after ack)\n",
            b.apply_calls,
            b.mutations_applied,
            b.dropped_before_apply,
            b.dropped_after_apply,
            b.dropped_after_ack
        ));
        report.push_str(&format!("Violations: {}\n", self.violations.len()));

        if !self.violations.is_empty() {
            report.push_str("\n=== Violations ===\n");
            for (i, v) in self.violations.iter().enumerate() {
                report.push_str(&format!("{}. {:?}\n", i + 1, v));
            }
        }

        report.push_str(&format!(
            "\n=== Result: {} ===\n",
            if self.passed() { "PASS" } else { "FAIL" }
        ));
        report
    }
}

struct Plan {
    request: MutationRequest,
    copies: usize,
}

fn plan(config: &SimulatorConfig, rng: &mut StdRng) -> Vec<Plan> {
    let targets = config.targets.max(1);
    (0..config.requests)
        .map(|i| {
            let target = format!("target-{}", rng.gen_range(0..targets));
            let kind = match rng.gen_range(0..3) {
                0 => OperationKind::Delete,
                1 => OperationKind::Insert,
                _ => OperationKind::Update,
            };
            let payload = if kind == OperationKind::Delete || rng.gen_bool(0.05) {
                serde_json::Value::Null
            } else {
                json!({ "seq": i })
            };
            let copies = if rng.gen_bool(config.double_submit_rate.clamp(0.0, 1.0)) { 2 } else { 1 };
            Plan {
                request: MutationRequest::new(format!("req-{i:05}"), target, kind)
                    .with_payload(payload)
                    .confirmed_by(format!("operator-{}", i % 7)),
                copies,
            }
        })
        .collect()
}

/// One operator: submit, then resubmit the same request while the answer
/// is a retryable interruption or an unresolved duplicate
async fn operate(
    pipeline: Arc<MutationPipeline>,
    request: MutationRequest,
    retries: u32,
) -> Result<Vec<Outcome>, String> {
    let mut seen = Vec::new();
    for attempt in 0..=retries {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let outcome = pipeline
            .submit(request.clone())
            .await
            .map_err(|e| e.to_string())?;
        let again = outcome.is_retryable();
        seen.push(outcome);
        if !again {
            break;
        }
    }
    Ok(seen)
}

/// Run the simulator
pub async fn run_simulator(config: SimulatorConfig) -> SimulatorReport {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let faults = FaultProfile::flaky(config.drop_rate).with_latency(config.max_latency);
    let backend = SimulatedBackend::new(rng.gen(), faults);
    for t in 0..config.targets.max(1) {
        if rng.gen_bool(0.5) {
            backend.seed_entity(format!("target-{t}"), json!({ "seed": t }));
        }
    }

    let executor = Arc::new(ClassifyingExecutor::with_options(
        backend,
        config.pipeline.executor_options(),
    ));
    let pipeline = Arc::new(MutationPipeline::in_memory(
        executor.clone(),
        config.pipeline.clone(),
    ));

    let mut operators = Vec::new();
    for plan in plan(&config, &mut rng) {
        for _ in 0..plan.copies {
            let pipeline = pipeline.clone();
            let request = plan.request.clone();
            let request_id = request.request_id.clone();
            operators.push((
                request_id,
                tokio::spawn(operate(pipeline, request, config.retries)),
            ));
        }
    }

    let mut stats = SimulatorStats::default();
    let mut violations = Vec::new();
    let mut definitive: HashMap<RequestId, Outcome> = HashMap::new();

    for (request_id, handle) in operators {
        stats.operators += 1;
        let seen = match handle.await {
            Ok(Ok(seen)) => seen,
            Ok(Err(error)) => {
                violations.push(Violation::Fault { request_id, error });
                continue;
            }
            Err(join) => {
                violations.push(Violation::Fault {
                    request_id,
                    error: join.to_string(),
                });
                continue;
            }
        };

        stats.submissions += seen.len() as u64;
        stats.resubmissions += seen.len().saturating_sub(1) as u64;

        for outcome in &seen {
            if matches!(outcome, Outcome::DuplicateRequest { .. }) {
                continue;
            }
            match definitive.get(&request_id) {
                Some(first) if first != outcome => violations.push(Violation::ReplayMismatch {
                    request_id: request_id.clone(),
                    first: first.clone(),
                    later: outcome.clone(),
                }),
                Some(_) => {}
                None => {
                    definitive.insert(request_id.clone(), outcome.clone());
                }
            }
        }

        match seen.last() {
            Some(Outcome::Success { .. }) => stats.succeeded += 1,
            Some(o @ Outcome::Rejected { .. }) => {
                stats.rejected += 1;
                if o.is_target_locked() {
                    stats.target_locked += 1;
                }
            }
            Some(Outcome::ValidationError { .. }) => stats.validation_errors += 1,
            Some(Outcome::ConnectionInterrupted { .. }) => stats.interrupted += 1,
            Some(Outcome::DuplicateRequest { .. }) | None => stats.unresolved_duplicates += 1,
        }
    }

    let backend = executor.backend();
    for request_id in definitive.keys() {
        let applies = backend.applies_for(request_id);
        if applies > 1 {
            violations.push(Violation::DuplicateExecution {
                request_id: request_id.clone(),
                applies,
            });
        }
    }

    stats.backend = backend.stats();
    if stats.backend.overlapping_calls > 0 {
        violations.push(Violation::TargetOverlap {
            overlapping_calls: stats.backend.overlapping_calls,
        });
    }

    match pipeline.store().records() {
        Ok(records) => violations.extend(
            records
                .into_iter()
                .filter(|r| r.status == RecordStatus::Pending)
                .map(|r| Violation::PendingLeftBehind {
                    request_id: r.request_id,
                }),
        ),
        Err(e) => tracing::error!(error = %e, "cannot inspect records"),
    }

    SimulatorReport {
        config,
        stats,
        violations,
    }
}
