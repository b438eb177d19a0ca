//! Dispatch through the routing engine.

use async_trait::async_trait;
use std::sync::Arc;

use super::{CandidateSource, DispatchError, ExecutorTransport, TriggerDispatcher};
use crate::core::types::{CandidateList, TriggerContext};
use crate::routing::RouterSet;
use crate::storage::{JobStore, StorageError};

/// Routes each firing to executor(s) chosen by the job's strategy.
pub struct RoutingDispatcher {
    store: Arc<dyn JobStore>,
    routers: Arc<RouterSet>,
    candidates: Arc<dyn CandidateSource>,
    transport: Arc<dyn ExecutorTransport>,
}

impl RoutingDispatcher {
    /// Create a dispatcher.
    pub fn new(
        store: Arc<dyn JobStore>,
        routers: Arc<RouterSet>,
        candidates: Arc<dyn CandidateSource>,
        transport: Arc<dyn ExecutorTransport>,
    ) -> Self {
        Self {
            store,
            routers,
            candidates,
            transport,
        }
    }
}

#[async_trait]
impl TriggerDispatcher for RoutingDispatcher {
    async fn dispatch(&self, ctx: TriggerContext) -> Result<(), DispatchError> {
        let job = match self.store.get_job(ctx.job_id).await {
            Ok(job) => job,
            Err(StorageError::NotFound(_)) => return Err(DispatchError::JobNotFound(ctx.job_id)),
            Err(e) => return Err(e.into()),
        };

        let live = self.candidates.candidates(&job).await;
        let Some(candidates) = CandidateList::new(live) else {
            return Err(DispatchError::NoCandidates(ctx.job_id));
        };

        let chosen = self.routers.select(job.route_strategy, &ctx, &candidates);

        // Broadcast keeps going past individual failures; the first one is reported.
        let mut first_error = None;
        for executor in &chosen {
            match self.transport.send(executor, &job, &ctx).await {
                Ok(()) => tracing::debug!(
                    job_id = %ctx.job_id,
                    executor = %executor,
                    trigger_type = %ctx.trigger_type,
                    "Dispatched trigger"
                ),
                Err(e) => {
                    tracing::error!(
                        job_id = %ctx.job_id,
                        executor = %executor,
                        error = %e,
                        "Failed to dispatch trigger"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
