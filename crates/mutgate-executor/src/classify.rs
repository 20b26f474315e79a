//! Classifying executor over a [`RemoteBackend`]

use crate::backend::{RemoteAck, RemoteBackend};
use crate::error::BackendError;
use crate::RemoteExecutor;
use mutgate_request::{MutationRequest, Outcome};
use std::time::Duration;

/// Options for [`ClassifyingExecutor`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutorOptions {
    /// Per-attempt limit on a single remote call (`None`: wait indefinitely)
    pub io_timeout: Option<Duration>,
    /// Probe the backend after an ambiguous loss
    pub reconcile_on_interrupt: bool,
}

impl ExecutorOptions {
    /// With per-attempt remote timeout
    #[inline]
    #[must_use]
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }

    /// With reconciliation of ambiguous losses
    #[inline]
    #[must_use]
    pub fn with_reconciliation(mut self, enabled: bool) -> Self {
        self.reconcile_on_interrupt = enabled;
        self
    }
}

/// Adapts a [`RemoteBackend`] to the [`RemoteExecutor`] contract
#[derive(Debug)]
pub struct ClassifyingExecutor<B> {
    backend: B,
    options: ExecutorOptions,
}

impl<B: RemoteBackend> ClassifyingExecutor<B> {
    /// Wrap `backend` with default options
    #[inline]
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self::with_options(backend, ExecutorOptions::default())
    }

    /// Wrap `backend` with `options`
    #[inline]
    #[must_use]
    pub fn with_options(backend: B, options: ExecutorOptions) -> Self {
        Self { backend, options }
    }

    /// Underlying backend
    #[inline]
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Active options
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    async fn bounded<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, BackendError>>,
    ) -> Result<T, BackendError> {
        match self.options.io_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| BackendError::Timeout(limit))?,
            None => call.await,
        }
    }

    async fn reconcile(&self, request: &MutationRequest) -> Option<RemoteAck> {
        match self.bounded(self.backend.probe(request)).await {
            Ok(found) => found,
            Err(e) => {
                tracing::debug!(request_id = %request.request_id, error = %e, "reconciliation probe failed");
                None
            }
        }
    }
}

/// Map a definitive answer onto the outcome taxonomy
#[must_use]
pub(crate) fn classify(ack: RemoteAck) -> Outcome {
    match ack {
        RemoteAck::Applied { data } => Outcome::success(data),
        RemoteAck::Refused { reason } => Outcome::rejected(reason),
        RemoteAck::Invalid { details } => Outcome::validation_error(details),
    }
}

#[async_trait::async_trait]
impl<B: RemoteBackend> RemoteExecutor for ClassifyingExecutor<B> {
    async fn execute(&self, request: &MutationRequest) -> Outcome {
        match self.bounded(self.backend.apply(request)).await {
            // an acknowledgement is definitive even if the connection drops afterwards
            Ok(ack) => classify(ack),
            Err(err) if !err.is_ambiguous() => {
                // refused before anything was sent
                tracing::warn!(
                    request_id = %request.request_id,
                    target_id = %request.target_id,
                    error = %err,
                    "backend cannot perform the operation"
                );
                Outcome::rejected(err.to_string())
            }
            Err(err) => {
                tracing::warn!(
                    request_id = %request.request_id,
                    target_id = %request.target_id,
                    error = %err,
                    "remote call ended without a definitive answer"
                );
                if self.options.reconcile_on_interrupt {
                    if let Some(ack) = self.reconcile(request).await {
                        tracing::info!(request_id = %request.request_id, "ambiguous outcome reconciled");
                        return classify(ack);
                    }
                }
                Outcome::interrupted(true)
            }
        }
    }
}
