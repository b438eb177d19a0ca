//! In-process execution of job handlers.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::{DispatchError, ExecutorTransport, TriggerDispatcher};
use crate::core::handler::{HandlerError, HandlerRegistry, JobHandler};
use crate::core::job::{GlueType, JobDefinition};
use crate::core::types::{ExecutorCandidate, TriggerContext};
use crate::glue::HandlerCompiler;
use crate::storage::{JobStore, StorageError};

type Execution = Box<dyn FnOnce() -> Result<Option<String>, DispatchError> + Send>;

/// Runs jobs in this process.
///
/// Bean jobs resolve their handler by name; script jobs get a fresh
/// instance from the compiler. Handlers run on the blocking pool, bounded
/// by the job's timeout, and failed runs are retried `fail_retry_count`
/// times.
///
/// Also usable as an [`ExecutorTransport`], executing locally whichever
/// executor was chosen.
pub struct LocalDispatcher {
    store: Arc<dyn JobStore>,
    handlers: Arc<HandlerRegistry>,
    compiler: Arc<dyn HandlerCompiler>,
}

impl LocalDispatcher {
    /// Create a dispatcher.
    pub fn new(
        store: Arc<dyn JobStore>,
        handlers: Arc<HandlerRegistry>,
        compiler: Arc<dyn HandlerCompiler>,
    ) -> Self {
        Self {
            store,
            handlers,
            compiler,
        }
    }

    /// Run `job` for the firing `ctx`, retrying failures.
    ///
    /// Returns the handler's message from the successful attempt.
    pub async fn run_job(
        &self,
        job: &JobDefinition,
        ctx: &TriggerContext,
    ) -> Result<Option<String>, DispatchError> {
        let attempts = job.fail_retry_count.saturating_add(1);
        let mut attempt = 1;
        loop {
            match self.run_once(job, ctx).await {
                Ok(message) => {
                    tracing::info!(
                        job_id = %job.id,
                        trigger_type = %ctx.trigger_type,
                        log_id = ctx.log_id,
                        attempt,
                        message = message.as_deref().unwrap_or(""),
                        "Job finished"
                    );
                    return Ok(message);
                }
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        job_id = %job.id,
                        attempt,
                        attempts,
                        error = %e,
                        "Job attempt failed, retrying"
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn prepare(
        &self,
        job: &JobDefinition,
        ctx: &TriggerContext,
        limit: Option<Duration>,
    ) -> Result<Execution, DispatchError> {
        let param = ctx.executor_param.clone();
        let run = move |handler: &dyn JobHandler, param: Option<&str>| match limit {
            Some(limit) => handler.execute_with_timeout(param, limit),
            None => handler.execute(param),
        };
        match job.glue_type {
            GlueType::Bean => {
                let handler = self
                    .handlers
                    .get(&job.handler)
                    .ok_or_else(|| DispatchError::HandlerNotFound(job.handler.clone()))?;
                Ok(Box::new(move || Ok(run(handler.as_ref(), param.as_deref())?)))
            }
            GlueType::Script => {
                let source = job.glue_source.clone().unwrap_or_default();
                let compiler = Arc::clone(&self.compiler);
                Ok(Box::new(move || {
                    let handler = compiler.load_instance(&source)?;
                    Ok(run(handler.as_ref(), param.as_deref())?)
                }))
            }
        }
    }

    async fn run_once(
        &self,
        job: &JobDefinition,
        ctx: &TriggerContext,
    ) -> Result<Option<String>, DispatchError> {
        let limit = (job.execute_timeout_seconds > 0)
            .then(|| Duration::from_secs(u64::from(job.execute_timeout_seconds)));
        let execution = self.prepare(job, ctx, limit)?;
        let task = tokio::task::spawn_blocking(execution);

        // Handlers that cannot interrupt themselves keep their thread until
        // they return.
        let joined = match limit {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => return Err(HandlerError::Timeout(limit).into()),
            },
            None => task.await,
        };

        joined.map_err(|e| {
            DispatchError::Handler(HandlerError::ExecutionFailed(format!(
                "handler task failed: {}",
                e
            )))
        })?
    }
}

#[async_trait]
impl TriggerDispatcher for LocalDispatcher {
    async fn dispatch(&self, ctx: TriggerContext) -> Result<(), DispatchError> {
        let job = match self.store.get_job(ctx.job_id).await {
            Ok(job) => job,
            Err(StorageError::NotFound(_)) => return Err(DispatchError::JobNotFound(ctx.job_id)),
            Err(e) => return Err(e.into()),
        };
        self.run_job(&job, &ctx).await.map(|_| ())
    }
}

#[async_trait]
impl ExecutorTransport for LocalDispatcher {
    async fn send(
        &self,
        executor: &ExecutorCandidate,
        job: &JobDefinition,
        ctx: &TriggerContext,
    ) -> Result<(), DispatchError> {
        tracing::debug!(job_id = %job.id, executor = %executor, "Running routed job locally");
        self.run_job(job, ctx).await.map(|_| ())
    }
}
