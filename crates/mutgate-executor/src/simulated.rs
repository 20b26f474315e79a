//! Seeded flaky backend
//!
//! Keeps an in-memory entity table and injects connection drops at three
//! points of a call: before the mutation is applied, after it is applied but
//! before the answer is delivered (the ambiguous case), and after the
//! answer is delivered. Everything random comes from one seeded `StdRng`.

use crate::backend::{RemoteAck, RemoteBackend};
use crate::error::BackendError;
use mutgate_request::{MutationRequest, OperationKind, RequestId, TargetId};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

/// Fault injection probabilities, each in `0.0..=1.0`
#[derive(Debug, Clone, PartialEq)]
pub struct FaultProfile {
    /// Drop before the mutation is applied
    pub drop_before_apply: f64,
    /// Apply, then drop before answering
    pub drop_after_apply: f64,
    /// Answer, then drop the connection
    pub drop_after_ack: f64,
    /// Upper bound of the simulated round trip
    pub max_latency: Duration,
}

impl FaultProfile {
    /// Never fails, answers immediately
    #[must_use]
    pub fn reliable() -> Self {
        Self {
            drop_before_apply: 0.0,
            drop_after_apply: 0.0,
            drop_after_ack: 0.0,
            max_latency: Duration::ZERO,
        }
    }

    /// Total drop probability `rate`, split evenly across the three points
    ///
    /// `rate` is clamped to `0.0..=1.0`; NaN counts as no drops.
    #[must_use]
    pub fn flaky(rate: f64) -> Self {
        let rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        let share = rate / 3.0;
        Self {
            drop_before_apply: share,
            drop_after_apply: share,
            drop_after_ack: share,
            max_latency: Duration::ZERO,
        }
    }

    /// With simulated latency up to `max`
    #[inline]
    #[must_use]
    pub fn with_latency(mut self, max: Duration) -> Self {
        self.max_latency = max;
        self
    }
}

impl Default for FaultProfile {
    fn default() -> Self {
        Self::reliable()
    }
}

/// Counters collected by [`SimulatedBackend`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationStats {
    /// Calls to `apply`
    pub apply_calls: u64,
    /// Mutations that changed the entity table
    pub mutations_applied: u64,
    /// Calls dropped before applying
    pub dropped_before_apply: u64,
    /// Calls applied but dropped before answering
    pub dropped_after_apply: u64,
    /// Calls answered, then dropped
    pub dropped_after_ack: u64,
    /// Calls that started while another call on the same target was running
    pub overlapping_calls: u64,
}

#[derive(Debug)]
struct SimState {
    rng: StdRng,
    entities: HashMap<TargetId, serde_json::Value>,
    acks: HashMap<RequestId, RemoteAck>,
    applies: HashMap<RequestId, usize>,
    in_flight: HashMap<TargetId, usize>,
    stats: SimulationStats,
}

/// In-memory remote store with injected connection faults
#[derive(Debug)]
pub struct SimulatedBackend {
    faults: FaultProfile,
    supports_probe: bool,
    state: Mutex<SimState>,
}

struct InFlight<'a> {
    state: &'a Mutex<SimState>,
    target: TargetId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if let Some(count) = state.in_flight.get_mut(&self.target) {
            *count = count.saturating_sub(1);
        }
    }
}

impl SimulatedBackend {
    /// Create a backend seeded with `seed`
    #[must_use]
    pub fn new(seed: u64, faults: FaultProfile) -> Self {
        Self {
            faults,
            supports_probe: false,
            state: Mutex::new(SimState {
                rng: StdRng::seed_from_u64(seed),
                entities: HashMap::new(),
                acks: HashMap::new(),
                applies: HashMap::new(),
                in_flight: HashMap::new(),
                stats: SimulationStats::default(),
            }),
        }
    }

    /// Answer `probe` from the recorded acknowledgements
    #[inline]
    #[must_use]
    pub fn with_probe(mut self) -> Self {
        self.supports_probe = true;
        self
    }

    /// Put `value` under `target` without going through `apply`
    pub fn seed_entity(&self, target: impl Into<TargetId>, value: serde_json::Value) {
        self.state.lock().entities.insert(target.into(), value);
    }

    /// Current value of `target`
    #[must_use]
    pub fn entity(&self, target: &TargetId) -> Option<serde_json::Value> {
        self.state.lock().entities.get(target).cloned()
    }

    /// How many times `apply` ran for `request_id`
    #[must_use]
    pub fn applies_for(&self, request_id: &RequestId) -> usize {
        self.state.lock().applies.get(request_id).copied().unwrap_or(0)
    }

    /// Highest `apply` count of any single request id
    #[must_use]
    pub fn max_applies_per_request(&self) -> usize {
        self.state.lock().applies.values().copied().max().unwrap_or(0)
    }

    /// Snapshot of the counters
    #[must_use]
    pub fn stats(&self) -> SimulationStats {
        self.state.lock().stats.clone()
    }

    fn mutate(entities: &mut HashMap<TargetId, serde_json::Value>, request: &MutationRequest) -> RemoteAck {
        let target = &request.target_id;
        match request.operation_kind {
            OperationKind::Insert | OperationKind::Update if request.payload.is_null() => {
                RemoteAck::Invalid {
                    details: format!("{} requires a payload", request.operation_kind),
                }
            }
            OperationKind::Insert if entities.contains_key(target) => RemoteAck::Refused {
                reason: format!("{target} already exists"),
            },
            OperationKind::Insert => {
                entities.insert(target.clone(), request.payload.clone());
                RemoteAck::Applied {
                    data: request.payload.clone(),
                }
            }
            OperationKind::Update | OperationKind::Delete if !entities.contains_key(target) => {
                RemoteAck::Refused {
                    reason: format!("{target} not found"),
                }
            }
            OperationKind::Update => {
                entities.insert(target.clone(), request.payload.clone());
                RemoteAck::Applied {
                    data: request.payload.clone(),
                }
            }
            OperationKind::Delete => {
                entities.remove(target);
                RemoteAck::Applied {
                    data: json!({ "deleted": target.as_str() }),
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl RemoteBackend for SimulatedBackend {
    async fn apply(&self, request: &MutationRequest) -> Result<RemoteAck, BackendError> {
        let (latency, roll) = {
            let mut state = self.state.lock();
            state.stats.apply_calls += 1;
            *state.applies.entry(request.request_id.clone()).or_insert(0) += 1;

            let running = state.in_flight.entry(request.target_id.clone()).or_insert(0);
            *running += 1;
            if *running > 1 {
                state.stats.overlapping_calls += 1;
            }

            let max_ms = u64::try_from(self.faults.max_latency.as_millis()).unwrap_or(u64::MAX);
            let latency = if max_ms == 0 {
                Duration::ZERO
            } else {
                Duration::from_millis(state.rng.gen_range(0..=max_ms))
            };
            (latency, state.rng.gen::<f64>())
        };
        let _in_flight = InFlight {
            state: &self.state,
            target: request.target_id.clone(),
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let faults = &self.faults;
        let mut state = self.state.lock();

        if roll < faults.drop_before_apply {
            state.stats.dropped_before_apply += 1;
            return Err(BackendError::ConnectionLost("dropped before apply".into()));
        }

        let ack = Self::mutate(&mut state.entities, request);
        if matches!(ack, RemoteAck::Applied { .. }) {
            state.stats.mutations_applied += 1;
        }
        state.acks.insert(request.request_id.clone(), ack.clone());

        if roll < faults.drop_before_apply + faults.drop_after_apply {
            state.stats.dropped_after_apply += 1;
            return Err(BackendError::ConnectionLost("dropped after apply".into()));
        }
        if roll < faults.drop_before_apply + faults.drop_after_apply + faults.drop_after_ack {
            state.stats.dropped_after_ack += 1;
        }
        Ok(ack)
    }

    async fn probe(&self, request: &MutationRequest) -> Result<Option<RemoteAck>, BackendError> {
        if !self.supports_probe {
            return Err(BackendError::Unsupported);
        }
        Ok(self.state.lock().acks.get(&request.request_id).cloned())
    }
}
