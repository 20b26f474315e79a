//! MutGate - confirmable idempotent mutation pipeline
//!
//! Takes a confirmed mutation intent, blocks duplicate submission, executes
//! it against an unreliable remote store at most once and reports a
//! definitive [`Outcome`].
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use mutgate_core::prelude::*;
//!
//! let executor = Arc::new(ClassifyingExecutor::new(my_backend));
//! let pipeline = MutationPipeline::in_memory(executor, PipelineConfig::default());
//!
//! let request = MutationRequest::new("req-1", "comment-42", OperationKind::Delete)
//!     .confirmed_by("operator");
//! let outcome = pipeline.submit(request).await?;
//! report(&outcome, &TracingReporter);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod config;
mod error;
mod housekeeping;
mod pipeline;
mod reporter;

pub use config::{ConfigError, PipelineConfig};
pub use error::{PipelineFault, SubmitError};
pub use housekeeping::Housekeeping;
pub use pipeline::{MutationPipeline, RecoveryReport};
pub use reporter::{
    report, report_submission, OutcomeReporter, TracingReporter, INTERNAL_ERROR_MESSAGE,
    INTERRUPTED_MESSAGE, RETRY_MESSAGE, SUCCESS_MESSAGE, TRY_LATER_MESSAGE,
};

pub use mutgate_request::{MutationRequest, OperationKind, Outcome, RequestId, TargetId};

/// Common imports
pub mod prelude {
    pub use crate::{
        report, MutationPipeline, OutcomeReporter, PipelineConfig, PipelineFault, SubmitError,
        TracingReporter,
    };
    pub use mutgate_executor::{ClassifyingExecutor, RemoteBackend, RemoteExecutor};
    pub use mutgate_gate::ConfirmationGate;
    pub use mutgate_request::{MutationRequest, OperationKind, Outcome, RequestId, TargetId};
    pub use mutgate_store::{FileIdempotencyStore, IdempotencyStore, MemoryIdempotencyStore};
    pub use std::sync::Arc;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Check if running with strict debugging enabled
#[must_use]
pub const fn strict_debug() -> bool {
    cfg!(feature = "strict-debug")
}
