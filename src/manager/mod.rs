//! Job configuration and lifecycle.
//!
//! [`JobConfigManager`] owns no state of its own: every operation reads the
//! job from the [`JobStore`], edits it and writes it back in one atomic
//! step. A job id that does not exist is reported as `false` / `None`,
//! never as an error.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use thiserror::Error;

use crate::core::job::{GlueType, JobDefinition, JobStatus, MisfireStrategy};
use crate::core::schedule::next_fire_time_ms;
use crate::core::types::{JobId, TriggerContext, TriggerType};
use crate::routing::RouteStrategy;
use crate::storage::{JobMutation, JobStore, StorageError};
use crate::trigger::TriggerDispatcher;

/// Errors returned by manager operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The store failed; the operation was rolled back.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// An argument was rejected before touching the store.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Next fire time of `job` strictly after `now`, 0 if there is none.
fn compute_next(job: &JobDefinition, timezone: Tz, now: DateTime<Utc>) -> i64 {
    next_fire_time_ms(job.schedule_type, &job.schedule_expression, timezone, now)
}

/// Manages job definitions and their schedule state.
pub struct JobConfigManager {
    store: Arc<dyn JobStore>,
    dispatcher: Arc<dyn TriggerDispatcher>,
    timezone: Tz,
}

impl JobConfigManager {
    /// Create a manager evaluating cron expressions in UTC.
    pub fn new(store: Arc<dyn JobStore>, dispatcher: Arc<dyn TriggerDispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            timezone: Tz::UTC,
        }
    }

    /// Evaluate cron expressions in `timezone`.
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// Timezone used for cron evaluation.
    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Register a cron job by name, or update the job already holding that name.
    ///
    /// A new job is created `RUNNING` (with its next fire time computed) when
    /// `auto_start` is set, `STOPPED` otherwise. An existing job gets its
    /// expression, handler, parameter and description replaced; with
    /// `auto_start` a stopped job is switched to `RUNNING` but its next fire
    /// time is left as stored.
    pub async fn register_or_update(
        &self,
        name: &str,
        schedule_expression: &str,
        handler: &str,
        param: Option<&str>,
        description: Option<&str>,
        auto_start: bool,
    ) -> Result<JobId, ManagerError> {
        if name.trim().is_empty() {
            return Err(ManagerError::InvalidInput("job name is blank".into()));
        }
        tracing::info!(job = name, schedule = schedule_expression, handler, "Registering job");

        let mut template = JobDefinition::new(name, schedule_expression, handler);
        template.execute_param = param.map(str::to_string);
        template.description = description.map(str::to_string);
        if auto_start {
            let next = compute_next(&template, self.timezone, Utc::now());
            template.mark_running(next);
        }

        let expression = schedule_expression.to_string();
        let handler = handler.to_string();
        let param = param.map(str::to_string);
        let description = description.map(str::to_string);
        let update: JobMutation = Box::new(move |job| {
            job.schedule_expression = expression;
            job.handler = handler;
            job.execute_param = param;
            job.description = description;
            if auto_start && !job.is_running() {
                job.status = JobStatus::Running;
            }
            job.touch();
            Ok(())
        });

        let (job, created) = self.store.upsert_job_by_name(template, update).await?;
        if created {
            tracing::info!(job_id = %job.id, job = %job.name, status = %job.status, "Job created");
        } else {
            tracing::info!(job_id = %job.id, job = %job.name, "Job updated");
        }
        Ok(job.id)
    }

    /// Insert a fully specified job and return its id.
    ///
    /// A stopped job has its fire times cleared. A running job without a
    /// next fire time gets one computed from now.
    pub async fn create_job(&self, mut job: JobDefinition) -> Result<JobId, ManagerError> {
        if job.name.trim().is_empty() {
            return Err(ManagerError::InvalidInput("job name is blank".into()));
        }
        if job.is_running() {
            if job.next_fire_time_ms == 0 {
                job.next_fire_time_ms = compute_next(&job, self.timezone, Utc::now());
            }
        } else {
            job.last_fire_time_ms = 0;
            job.next_fire_time_ms = 0;
        }
        job.touch();

        let stored = self.store.insert_job(job).await?;
        tracing::info!(job_id = %stored.id, job = %stored.name, "Job created");
        Ok(stored.id)
    }

    /// Overwrite an existing job wholesale.
    ///
    /// Returns `false` if no job has `job.id`.
    pub async fn update_job(&self, mut job: JobDefinition) -> Result<bool, ManagerError> {
        tracing::info!(job_id = %job.id, "Updating job");
        if !job.is_running() {
            job.last_fire_time_ms = 0;
            job.next_fire_time_ms = 0;
        }
        job.touch();

        let id = job.id;
        match self.store.update_job(job).await {
            Ok(()) => Ok(true),
            Err(StorageError::NotFound(_)) => {
                tracing::warn!(job_id = %id, "Job not found");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Start scheduling a job from now.
    pub async fn start(&self, id: JobId) -> Result<bool, ManagerError> {
        tracing::info!(job_id = %id, "Starting job");
        let timezone = self.timezone;
        let started = self
            .modify(
                id,
                Box::new(move |job| {
                    let next = compute_next(job, timezone, Utc::now());
                    job.mark_running(next);
                    Ok(())
                }),
            )
            .await?;

        if let Some(job) = &started {
            if job.next_fire_time_ms == 0 {
                tracing::warn!(job_id = %id, "Started job has no upcoming fire time");
            }
        }
        Ok(started.is_some())
    }

    /// Stop scheduling a job and clear its fire times.
    pub async fn stop(&self, id: JobId) -> Result<bool, ManagerError> {
        tracing::info!(job_id = %id, "Stopping job");
        let stopped = self
            .modify(
                id,
                Box::new(|job| {
                    job.mark_stopped();
                    Ok(())
                }),
            )
            .await?;
        Ok(stopped.is_some())
    }

    /// Replace the schedule expression, rescheduling a running job from now.
    pub async fn update_cron(&self, id: JobId, expression: &str) -> Result<bool, ManagerError> {
        tracing::info!(job_id = %id, schedule = expression, "Updating job schedule");
        let timezone = self.timezone;
        let expression = expression.to_string();
        let updated = self
            .modify(
                id,
                Box::new(move |job| {
                    job.schedule_expression = expression;
                    if job.is_running() {
                        job.next_fire_time_ms = compute_next(job, timezone, Utc::now());
                    }
                    job.touch();
                    Ok(())
                }),
            )
            .await?;
        Ok(updated.is_some())
    }

    /// Apply `edit` to a job and settle its schedule in the same atomic step.
    ///
    /// A running job whose schedule type or expression changed is
    /// rescheduled from now. With `auto_start` a stopped job is started.
    /// Returns the stored job, or `None` if `id` does not exist.
    pub async fn reconfigure<F>(
        &self,
        id: JobId,
        edit: F,
        auto_start: bool,
    ) -> Result<Option<JobDefinition>, ManagerError>
    where
        F: FnOnce(&mut JobDefinition) + Send + 'static,
    {
        tracing::info!(job_id = %id, auto_start, "Reconfiguring job");
        let timezone = self.timezone;
        self.modify(
            id,
            Box::new(move |job| {
                let was_running = job.is_running();
                let schedule = (job.schedule_type, job.schedule_expression.clone());
                edit(job);
                job.id = id;

                let changed = schedule != (job.schedule_type, job.schedule_expression.clone());
                if was_running && changed {
                    job.next_fire_time_ms = compute_next(job, timezone, Utc::now());
                } else if auto_start && !was_running {
                    let next = compute_next(job, timezone, Utc::now());
                    job.mark_running(next);
                }
                job.touch();
                Ok(())
            }),
        )
        .await
    }

    /// Replace the default execute parameter.
    pub async fn update_param(&self, id: JobId, param: Option<&str>) -> Result<bool, ManagerError> {
        tracing::info!(job_id = %id, param = param.unwrap_or(""), "Updating job parameter");
        let param = param.map(str::to_string);
        let updated = self
            .modify(
                id,
                Box::new(move |job| {
                    job.execute_param = param;
                    job.touch();
                    Ok(())
                }),
            )
            .await?;
        Ok(updated.is_some())
    }

    /// Store new handler source and switch the job to script glue.
    pub async fn update_glue(&self, id: JobId, source: &str) -> Result<bool, ManagerError> {
        if source.trim().is_empty() {
            return Err(ManagerError::InvalidInput("glue source is blank".into()));
        }
        tracing::info!(job_id = %id, "Updating job glue source");
        let source = source.to_string();
        let updated = self
            .modify(
                id,
                Box::new(move |job| {
                    job.glue_type = GlueType::Script;
                    job.glue_source = Some(source);
                    job.touch();
                    Ok(())
                }),
            )
            .await?;
        Ok(updated.is_some())
    }

    /// Set (or clear, with `None`) the job's routing strategy.
    pub async fn update_route_strategy(
        &self,
        id: JobId,
        strategy: Option<RouteStrategy>,
    ) -> Result<bool, ManagerError> {
        tracing::info!(job_id = %id, strategy = ?strategy, "Updating job route strategy");
        let updated = self
            .modify(
                id,
                Box::new(move |job| {
                    job.route_strategy = strategy;
                    job.touch();
                    Ok(())
                }),
            )
            .await?;
        Ok(updated.is_some())
    }

    /// Set the job's misfire strategy.
    pub async fn update_misfire_strategy(
        &self,
        id: JobId,
        strategy: MisfireStrategy,
    ) -> Result<bool, ManagerError> {
        tracing::info!(job_id = %id, strategy = %strategy, "Updating job misfire strategy");
        let updated = self
            .modify(
                id,
                Box::new(move |job| {
                    job.misfire_strategy = strategy;
                    job.touch();
                    Ok(())
                }),
            )
            .await?;
        Ok(updated.is_some())
    }

    /// Fire a job once, outside its schedule.
    ///
    /// `param` overrides the job's stored parameter. Dispatch failures are
    /// logged and reported as `false`.
    pub async fn trigger(&self, id: JobId, param: Option<&str>) -> Result<bool, ManagerError> {
        tracing::info!(job_id = %id, param = param.unwrap_or(""), "Triggering job");
        let Some(job) = self.get_job(id).await? else {
            tracing::warn!(job_id = %id, "Job not found");
            return Ok(false);
        };

        let param = param.map(str::to_string).or(job.execute_param);
        let ctx = TriggerContext::unscheduled(job.id, TriggerType::Api).with_param(param);
        match self.dispatcher.dispatch(ctx).await {
            Ok(()) => {
                tracing::info!(job_id = %id, "Job triggered");
                Ok(true)
            }
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "Failed to trigger job");
                Ok(false)
            }
        }
    }

    /// Look up a job by id.
    pub async fn get_job(&self, id: JobId) -> Result<Option<JobDefinition>, ManagerError> {
        match self.store.get_job(id).await {
            Ok(job) => Ok(Some(job)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Look up a job by name.
    pub async fn find_by_name(&self, name: &str) -> Result<Option<JobDefinition>, ManagerError> {
        Ok(self.store.find_job_by_name(name).await?)
    }

    /// All jobs, ordered by id.
    pub async fn list_jobs(&self) -> Result<Vec<JobDefinition>, ManagerError> {
        Ok(self.store.list_jobs().await?)
    }

    /// Jobs bound to `handler`.
    pub async fn list_by_handler(&self, handler: &str) -> Result<Vec<JobDefinition>, ManagerError> {
        Ok(self.store.list_jobs_by_handler(handler).await?)
    }

    async fn modify(
        &self,
        id: JobId,
        mutation: JobMutation,
    ) -> Result<Option<JobDefinition>, ManagerError> {
        match self.store.modify_job(id, mutation).await {
            Ok(job) => Ok(Some(job)),
            Err(StorageError::NotFound(_)) => {
                tracing::warn!(job_id = %id, "Job not found");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}
