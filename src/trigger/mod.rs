//! Trigger dispatch.
//!
//! A [`TriggerDispatcher`] receives one [`TriggerContext`] per firing.
//! [`RoutingDispatcher`] picks executors through the routing engine and
//! hands the firing to an [`ExecutorTransport`]; [`LocalDispatcher`] runs
//! the job's handler in-process.

mod local;
mod routed;

pub use local::LocalDispatcher;
pub use routed::RoutingDispatcher;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::handler::HandlerError;
use crate::core::job::JobDefinition;
use crate::core::types::{ExecutorCandidate, JobId, TriggerContext};
use crate::glue::GlueError;
use crate::storage::StorageError;

/// Errors that can occur while dispatching a firing.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The job does not exist.
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// No live executor is registered for the job.
    #[error("no executors available for job {0}")]
    NoCandidates(JobId),

    /// A bean job names a handler that is not registered.
    #[error("handler not registered: {0}")]
    HandlerNotFound(String),

    /// Sending the firing to an executor failed.
    #[error("transport to {executor} failed: {message}")]
    Transport {
        /// Executor key (`host:port`).
        executor: String,
        /// Failure description.
        message: String,
    },

    /// Storage error while loading the job.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Glue compilation failed.
    #[error(transparent)]
    Glue(#[from] GlueError),

    /// The handler failed.
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

/// Receives job firings.
#[async_trait]
pub trait TriggerDispatcher: Send + Sync {
    /// Dispatch one firing.
    async fn dispatch(&self, ctx: TriggerContext) -> Result<(), DispatchError>;
}

/// Supplies the live executors for a job.
///
/// Health checking happens upstream; the list returned here is taken as-is.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Live executors able to run `job`.
    async fn candidates(&self, job: &JobDefinition) -> Vec<ExecutorCandidate>;
}

/// Carries a firing to one executor.
#[async_trait]
pub trait ExecutorTransport: Send + Sync {
    /// Send the firing described by `ctx` for `job` to `executor`.
    async fn send(
        &self,
        executor: &ExecutorCandidate,
        job: &JobDefinition,
        ctx: &TriggerContext,
    ) -> Result<(), DispatchError>;
}

/// A fixed executor list shared by every job.
#[derive(Debug, Clone, Default)]
pub struct StaticCandidates {
    executors: Vec<ExecutorCandidate>,
}

impl StaticCandidates {
    /// Create a source over a fixed list.
    pub fn new(executors: Vec<ExecutorCandidate>) -> Self {
        Self { executors }
    }

    /// Number of executors.
    pub fn len(&self) -> usize {
        self.executors.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

#[async_trait]
impl CandidateSource for StaticCandidates {
    async fn candidates(&self, _job: &JobDefinition) -> Vec<ExecutorCandidate> {
        self.executors.clone()
    }
}
