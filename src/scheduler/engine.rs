//! Scheduler engine implementation.
//!
//! Each scan asks the store for running jobs whose next fire time falls
//! before `now + pre_read` and handles every job by how late it is:
//!
//! - more than `pre_read` late: a misfire. `FIRE_ONCE_NOW` jobs fire once
//!   with trigger type `MISFIRE`, and the schedule restarts from now;
//! - late: fire now and advance from now. A next fire that lands inside the
//!   window again is scheduled right away;
//! - not yet due: fire at the planned time and advance from that time.
//!
//! The advanced schedule is written back only if the stored job is still
//! running with the fire time the scan read. A slot is therefore claimed by
//! exactly one scanner even when several share a store.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::handle::{COMMAND_CHANNEL_BUFFER, SchedulerHandle};
use super::types::{ScanReport, SchedulerCommand, SchedulerError, SchedulerOptions, SchedulerState};
use crate::core::job::{JobDefinition, JobStatus, MisfireStrategy};
use crate::core::schedule::{from_epoch_ms, next_fire_time_ms};
use crate::core::types::{JobId, TriggerContext, TriggerType};
use crate::storage::{JobStore, StorageError};
use crate::trigger::TriggerDispatcher;

/// A dispatch decided by a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Firing {
    trigger_type: TriggerType,
    /// Planned fire time, epoch ms.
    at_ms: i64,
}

/// Schedule state a scan writes back, and the dispatches it implies.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Plan {
    status: JobStatus,
    last_fire_time_ms: i64,
    next_fire_time_ms: i64,
    firings: Vec<Firing>,
    misfired: bool,
}

impl Plan {
    fn new(job: &JobDefinition) -> Self {
        Self {
            status: job.status,
            last_fire_time_ms: job.last_fire_time_ms,
            next_fire_time_ms: job.next_fire_time_ms,
            firings: Vec::new(),
            misfired: false,
        }
    }

    fn is_running(&self) -> bool {
        self.status == JobStatus::Running
    }

    /// Move to the first fire strictly after `from_ms`, stopping the job if there is none.
    fn advance(&mut self, job: &JobDefinition, timezone: Tz, from_ms: i64) {
        let next = next_fire_time_ms(
            job.schedule_type,
            &job.schedule_expression,
            timezone,
            from_epoch_ms(from_ms),
        );
        if next > 0 {
            self.last_fire_time_ms = self.next_fire_time_ms;
            self.next_fire_time_ms = next;
        } else {
            tracing::warn!(
                job_id = %job.id,
                schedule_type = %job.schedule_type,
                expression = %job.schedule_expression,
                "Job has no next fire time, stopping it"
            );
            self.status = JobStatus::Stopped;
            self.last_fire_time_ms = 0;
            self.next_fire_time_ms = 0;
        }
    }
}

/// Decide what a scan at `now_ms` does with `job`.
fn plan(job: &JobDefinition, now_ms: i64, pre_read_ms: i64, timezone: Tz) -> Plan {
    let mut plan = Plan::new(job);
    let next = job.next_fire_time_ms;

    if now_ms > next.saturating_add(pre_read_ms) {
        plan.misfired = true;
        if job.misfire_strategy == MisfireStrategy::FireOnceNow {
            plan.firings.push(Firing {
                trigger_type: TriggerType::Misfire,
                at_ms: now_ms,
            });
        }
        plan.advance(job, timezone, now_ms);
    } else if now_ms > next {
        plan.firings.push(Firing {
            trigger_type: TriggerType::Cron,
            at_ms: next,
        });
        plan.advance(job, timezone, now_ms);

        if plan.is_running() && plan.next_fire_time_ms < now_ms.saturating_add(pre_read_ms) {
            let upcoming = plan.next_fire_time_ms;
            plan.firings.push(Firing {
                trigger_type: TriggerType::Cron,
                at_ms: upcoming,
            });
            plan.advance(job, timezone, upcoming);
        }
    } else {
        plan.firings.push(Firing {
            trigger_type: TriggerType::Cron,
            at_ms: next,
        });
        plan.advance(job, timezone, next);
    }
    plan
}

/// Scans the store for due jobs and dispatches them.
///
/// Scheduled firings carry their planned fire time (epoch ms) as log id and
/// the job's stored parameter.
pub struct Scheduler {
    store: Arc<dyn JobStore>,
    dispatcher: Arc<dyn TriggerDispatcher>,
    timezone: Tz,
    options: SchedulerOptions,
    /// Dispatches started or waiting for their fire time.
    running: Vec<(JobId, JoinHandle<()>)>,
}

impl Scheduler {
    /// Create a scheduler with default options, evaluating cron in UTC.
    pub fn new(store: Arc<dyn JobStore>, dispatcher: Arc<dyn TriggerDispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            timezone: Tz::UTC,
            options: SchedulerOptions::default(),
            running: Vec::new(),
        }
    }

    /// Set the timezone for cron evaluation.
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// Replace all timing options.
    pub fn with_options(mut self, options: SchedulerOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the tick interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.options.tick_interval = interval;
        self
    }

    /// Current timing options.
    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    /// Dispatches not yet finished.
    pub fn pending_dispatches(&self) -> usize {
        self.running
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .count()
    }

    /// Start the scheduler and return a handle for controlling it.
    pub async fn start(self) -> (SchedulerHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let state = Arc::new(RwLock::new(SchedulerState::Running));

        let handle = SchedulerHandle {
            command_tx,
            state: Arc::clone(&state),
        };

        tracing::info!(
            tick_ms = self.options.tick_interval.as_millis() as u64,
            pre_read_ms = self.options.pre_read.as_millis() as u64,
            "Scheduler started"
        );
        let scheduler_task = tokio::spawn(async move {
            self.run(command_rx, state).await;
        });

        (handle, scheduler_task)
    }

    /// Main scheduler loop.
    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<SchedulerCommand>,
        state: Arc<RwLock<SchedulerState>>,
    ) {
        let mut interval = tokio::time::interval(self.options.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let current_state = *state.read().await;
                    if current_state == SchedulerState::Running {
                        if let Err(e) = self.scan_once(Utc::now()).await {
                            tracing::error!(error = %e, "Schedule scan failed");
                        }
                    }

                    self.cleanup_finished();
                }

                Some(command) = command_rx.recv() => {
                    match command {
                        SchedulerCommand::Pause { response } => {
                            *state.write().await = SchedulerState::Paused;
                            tracing::info!("Scheduler paused");
                            let _ = response.send(());
                        }
                        SchedulerCommand::Resume { response } => {
                            *state.write().await = SchedulerState::Running;
                            tracing::info!("Scheduler resumed");
                            let _ = response.send(());
                        }
                        SchedulerCommand::Shutdown { response } => {
                            *state.write().await = SchedulerState::Stopped;
                            self.finish_dispatches().await;
                            tracing::info!("Scheduler stopped");
                            let _ = response.send(());
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Run one scan as of `now`.
    ///
    /// Dispatches are spawned, not awaited. A job whose claim fails is
    /// skipped and retried on a later scan.
    pub async fn scan_once(&mut self, now: DateTime<Utc>) -> Result<ScanReport, SchedulerError> {
        let now_ms = now.timestamp_millis();
        let pre_read_ms = i64::try_from(self.options.pre_read.as_millis()).unwrap_or(i64::MAX);

        let jobs = self
            .store
            .list_due_jobs(now_ms.saturating_add(pre_read_ms), self.options.pre_read_count)
            .await?;

        let mut report = ScanReport {
            scanned: jobs.len(),
            ..ScanReport::default()
        };

        for job in jobs {
            let plan = plan(&job, now_ms, pre_read_ms, self.timezone);

            match self.claim(&job, &plan).await {
                Ok(()) => {}
                Err(StorageError::Conflict(_)) | Err(StorageError::NotFound(_)) => {
                    tracing::debug!(job_id = %job.id, "Job changed since scan, skipping");
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to update job schedule");
                    report.skipped += 1;
                    continue;
                }
            }

            if plan.misfired {
                tracing::warn!(
                    job_id = %job.id,
                    next_fire_time_ms = job.next_fire_time_ms,
                    strategy = %job.misfire_strategy,
                    "Job misfired"
                );
                report.misfired += 1;
            }

            for firing in &plan.firings {
                if firing.at_ms <= now_ms {
                    report.fired += 1;
                } else {
                    report.scheduled += 1;
                }
                self.spawn_dispatch(&job, *firing, now_ms);
            }
        }

        if report.scanned > 0 {
            tracing::debug!(
                scanned = report.scanned,
                fired = report.fired,
                scheduled = report.scheduled,
                misfired = report.misfired,
                skipped = report.skipped,
                "Schedule scan complete"
            );
        }
        Ok(report)
    }

    /// Write the planned schedule back if the job is unchanged since the scan.
    async fn claim(&self, job: &JobDefinition, plan: &Plan) -> Result<(), StorageError> {
        let expected_next = job.next_fire_time_ms;
        let status = plan.status;
        let last = plan.last_fire_time_ms;
        let next = plan.next_fire_time_ms;

        self.store
            .modify_job(
                job.id,
                Box::new(move |stored| {
                    if !stored.is_running() || stored.next_fire_time_ms != expected_next {
                        return Err(StorageError::Conflict(format!(
                            "job {} changed since scan",
                            stored.id
                        )));
                    }
                    stored.status = status;
                    stored.last_fire_time_ms = last;
                    stored.next_fire_time_ms = next;
                    stored.touch();
                    Ok(())
                }),
            )
            .await
            .map(|_| ())
    }

    fn spawn_dispatch(&mut self, job: &JobDefinition, firing: Firing, now_ms: i64) {
        let delay = Duration::from_millis(u64::try_from(firing.at_ms - now_ms).unwrap_or(0));
        let ctx = TriggerContext::new(job.id, firing.trigger_type, firing.at_ms)
            .with_param(job.execute_param.clone());
        let dispatcher = Arc::clone(&self.dispatcher);

        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let job_id = ctx.job_id;
            let trigger_type = ctx.trigger_type;
            match dispatcher.dispatch(ctx).await {
                Ok(()) => tracing::debug!(
                    job_id = %job_id,
                    trigger_type = %trigger_type,
                    "Dispatched scheduled firing"
                ),
                Err(e) => tracing::error!(
                    job_id = %job_id,
                    trigger_type = %trigger_type,
                    error = %e,
                    "Scheduled firing failed"
                ),
            }
        });
        self.running.push((job.id, handle));
    }

    /// Drop handles of finished dispatches.
    fn cleanup_finished(&mut self) {
        self.running.retain(|(_, handle)| !handle.is_finished());
    }

    /// Wait for pending dispatches, aborting whatever is left after the shutdown timeout.
    pub async fn finish_dispatches(&mut self) {
        self.cleanup_finished();
        if self.running.is_empty() {
            return;
        }

        tracing::info!(
            "Waiting for {} pending dispatch(es) to complete (timeout: {:?})",
            self.running.len(),
            self.options.shutdown_timeout
        );

        let deadline = tokio::time::Instant::now() + self.options.shutdown_timeout;
        loop {
            self.cleanup_finished();
            if self.running.is_empty() {
                break;
            }

            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    "Shutdown timeout ({:?}) exceeded, aborting {} dispatch(es)",
                    self.options.shutdown_timeout,
                    self.running.len()
                );
                for (job_id, handle) in self.running.drain(..) {
                    tracing::debug!(job_id = %job_id, "Aborting dispatch");
                    handle.abort();
                }
                break;
            }

            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schedule::ScheduleType;
    use crate::storage::InMemoryJobStore;
    use crate::testing::RecordingDispatcher;

    const NOW_MS: i64 = 1_700_000_000_000;
    const PRE_READ_MS: i64 = 5_000;

    fn every(interval_ms: i64, next_fire_time_ms: i64) -> JobDefinition {
        let mut job = JobDefinition::new("interval", interval_ms.to_string(), "bean")
            .with_schedule_type(ScheduleType::FixedInterval);
        job.id = JobId::new(1);
        job.mark_running(next_fire_time_ms);
        job
    }

    fn firing(trigger_type: TriggerType, at_ms: i64) -> Firing {
        Firing {
            trigger_type,
            at_ms,
        }
    }

    #[test]
    fn test_plan_upcoming_fire() {
        let job = every(10_000, NOW_MS + 2_000);
        let plan = plan(&job, NOW_MS, PRE_READ_MS, Tz::UTC);

        assert_eq!(plan.firings, vec![firing(TriggerType::Cron, NOW_MS + 2_000)]);
        assert_eq!(plan.last_fire_time_ms, NOW_MS + 2_000);
        assert_eq!(plan.next_fire_time_ms, NOW_MS + 12_000);
        assert!(!plan.misfired);
    }

    #[test]
    fn test_plan_due_fire_advances_from_now() {
        let job = every(10_000, NOW_MS - 1_000);
        let plan = plan(&job, NOW_MS, PRE_READ_MS, Tz::UTC);

        assert_eq!(plan.firings, vec![firing(TriggerType::Cron, NOW_MS - 1_000)]);
        assert_eq!(plan.last_fire_time_ms, NOW_MS - 1_000);
        assert_eq!(plan.next_fire_time_ms, NOW_MS + 10_000);
    }

    #[test]
    fn test_plan_due_fire_schedules_next_inside_window() {
        let job = every(2_000, NOW_MS - 1_000);
        let plan = plan(&job, NOW_MS, PRE_READ_MS, Tz::UTC);

        assert_eq!(
            plan.firings,
            vec![
                firing(TriggerType::Cron, NOW_MS - 1_000),
                firing(TriggerType::Cron, NOW_MS + 2_000),
            ]
        );
        assert_eq!(plan.last_fire_time_ms, NOW_MS + 2_000);
        assert_eq!(plan.next_fire_time_ms, NOW_MS + 4_000);
    }

    #[test]
    fn test_plan_misfire_does_nothing_by_default() {
        let job = every(10_000, NOW_MS - 60_000);
        let plan = plan(&job, NOW_MS, PRE_READ_MS, Tz::UTC);

        assert!(plan.misfired);
        assert!(plan.firings.is_empty());
        assert_eq!(plan.last_fire_time_ms, NOW_MS - 60_000);
        assert_eq!(plan.next_fire_time_ms, NOW_MS + 10_000);
    }

    #[test]
    fn test_plan_misfire_fire_once_now() {
        let job = every(10_000, NOW_MS - 60_000).with_misfire_strategy(MisfireStrategy::FireOnceNow);
        let plan = plan(&job, NOW_MS, PRE_READ_MS, Tz::UTC);

        assert!(plan.misfired);
        assert_eq!(plan.firings, vec![firing(TriggerType::Misfire, NOW_MS)]);
        assert_eq!(plan.next_fire_time_ms, NOW_MS + 10_000);
    }

    #[test]
    fn test_plan_stops_job_without_next_fire() {
        let mut job = every(10_000, NOW_MS - 1_000);
        job.schedule_expression = "never".into();
        let plan = plan(&job, NOW_MS, PRE_READ_MS, Tz::UTC);

        assert_eq!(plan.firings, vec![firing(TriggerType::Cron, NOW_MS - 1_000)]);
        assert_eq!(plan.status, JobStatus::Stopped);
        assert_eq!(plan.last_fire_time_ms, 0);
        assert_eq!(plan.next_fire_time_ms, 0);
    }

    #[test]
    fn test_plan_stops_job_whose_interval_overflows() {
        let job = every(i64::MAX, NOW_MS - 1_000);
        let plan = plan(&job, NOW_MS, PRE_READ_MS, Tz::UTC);

        assert_eq!(plan.firings, vec![firing(TriggerType::Cron, NOW_MS - 1_000)]);
        assert_eq!(plan.status, JobStatus::Stopped);
        assert_eq!(plan.next_fire_time_ms, 0);
    }

    #[test]
    fn test_plan_cron_job() {
        // 2023-11-14T22:13:20Z; the next minute boundary is 40s away.
        let job = {
            let mut job = JobDefinition::new("minutely", "0 * * * * ?", "bean");
            job.mark_running(NOW_MS + 1_000);
            job
        };
        let plan = plan(&job, NOW_MS, PRE_READ_MS, Tz::UTC);
        assert_eq!(plan.last_fire_time_ms, NOW_MS + 1_000);
        assert_eq!(plan.next_fire_time_ms, NOW_MS + 40_000);
    }

    async fn setup() -> (Arc<InMemoryJobStore>, Arc<RecordingDispatcher>, Scheduler) {
        let store = Arc::new(InMemoryJobStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let scheduler = Scheduler::new(store.clone(), dispatcher.clone());
        (store, dispatcher, scheduler)
    }

    async fn insert(store: &InMemoryJobStore, job: JobDefinition) -> JobDefinition {
        store.insert_job(job).await.unwrap()
    }

    #[tokio::test]
    async fn test_scan_dispatches_due_job_and_advances() {
        let (store, dispatcher, mut scheduler) = setup().await;
        let job = insert(&store, every(60_000, NOW_MS - 500).with_param("p")).await;

        let report = scheduler.scan_once(from_epoch_ms(NOW_MS)).await.unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.fired, 1);
        scheduler.finish_dispatches().await;

        let contexts = dispatcher.contexts();
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].job_id, job.id);
        assert_eq!(contexts[0].trigger_type, TriggerType::Cron);
        assert_eq!(contexts[0].log_id, NOW_MS - 500);
        assert_eq!(contexts[0].executor_param.as_deref(), Some("p"));

        let stored = store.get_job(job.id).await.unwrap();
        assert_eq!(stored.last_fire_time_ms, NOW_MS - 500);
        assert_eq!(stored.next_fire_time_ms, NOW_MS + 60_000);

        // Nothing left inside the window.
        let again = scheduler.scan_once(from_epoch_ms(NOW_MS)).await.unwrap();
        assert_eq!(again, ScanReport::default());
    }

    #[tokio::test]
    async fn test_scan_ignores_stopped_and_far_jobs() {
        let (store, dispatcher, mut scheduler) = setup().await;
        let mut stopped = every(1_000, 0);
        stopped.name = "stopped".into();
        stopped.mark_stopped();
        insert(&store, stopped).await;
        let mut far = every(1_000, NOW_MS + 60_000);
        far.name = "far".into();
        insert(&store, far).await;

        let report = scheduler.scan_once(from_epoch_ms(NOW_MS)).await.unwrap();
        assert_eq!(report.scanned, 0);
        scheduler.finish_dispatches().await;
        assert!(dispatcher.contexts().is_empty());
    }

    #[tokio::test]
    async fn test_scan_delays_upcoming_fire() {
        let (store, dispatcher, mut scheduler) = setup().await;
        insert(&store, every(60_000, NOW_MS + 100)).await;

        let report = scheduler.scan_once(from_epoch_ms(NOW_MS)).await.unwrap();
        assert_eq!(report.scheduled, 1);
        assert_eq!(report.fired, 0);
        assert!(dispatcher.contexts().is_empty());

        scheduler.finish_dispatches().await;
        assert_eq!(dispatcher.contexts().len(), 1);
    }

    #[tokio::test]
    async fn test_scan_misfire_fire_once_now() {
        let (store, dispatcher, mut scheduler) = setup().await;
        insert(
            &store,
            every(60_000, NOW_MS - 30_000).with_misfire_strategy(MisfireStrategy::FireOnceNow),
        )
        .await;

        let report = scheduler.scan_once(from_epoch_ms(NOW_MS)).await.unwrap();
        assert_eq!(report.misfired, 1);
        assert_eq!(report.fired, 1);
        scheduler.finish_dispatches().await;

        let contexts = dispatcher.contexts();
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].trigger_type, TriggerType::Misfire);
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let (store, _, first) = setup().await;
        let second = Scheduler::new(store.clone(), Arc::new(RecordingDispatcher::new()));
        let job = insert(&store, every(60_000, NOW_MS - 500)).await;

        let plan = plan(&job, NOW_MS, PRE_READ_MS, Tz::UTC);
        first.claim(&job, &plan).await.unwrap();
        let lost = second.claim(&job, &plan).await;
        assert!(matches!(lost, Err(StorageError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_claim_fails_for_stopped_job() {
        let (store, _, scheduler) = setup().await;
        let job = insert(&store, every(60_000, NOW_MS - 500)).await;
        let plan = plan(&job, NOW_MS, PRE_READ_MS, Tz::UTC);

        store
            .modify_job(
                job.id,
                Box::new(|job| {
                    job.mark_stopped();
                    Ok(())
                }),
            )
            .await
            .unwrap();

        assert!(matches!(
            scheduler.claim(&job, &plan).await,
            Err(StorageError::Conflict(_))
        ));
        assert_eq!(store.get_job(job.id).await.unwrap().status, JobStatus::Stopped);
    }

    #[tokio::test]
    async fn test_scheduler_fires_due_job_while_running() {
        let (store, dispatcher, scheduler) = setup().await;
        let now = Utc::now().timestamp_millis();
        insert(&store, every(60_000, now - 100)).await;

        let (handle, task) = scheduler
            .with_tick_interval(Duration::from_millis(50))
            .start()
            .await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        handle.shutdown().await.unwrap();
        let _ = task.await;

        assert_eq!(handle.state().await, SchedulerState::Stopped);
        assert_eq!(dispatcher.contexts().len(), 1);
    }

    #[tokio::test]
    async fn test_pause_and_resume_scheduler() {
        let (store, dispatcher, scheduler) = setup().await;
        let (handle, task) = scheduler
            .with_tick_interval(Duration::from_millis(50))
            .start()
            .await;

        assert!(handle.is_running().await);
        handle.pause().await.unwrap();
        assert!(handle.is_paused().await);

        let now = Utc::now().timestamp_millis();
        insert(&store, every(60_000, now - 100)).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(dispatcher.contexts().is_empty());

        handle.resume().await.unwrap();
        assert!(handle.is_running().await);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(dispatcher.contexts().len(), 1);

        handle.shutdown().await.unwrap();
        let _ = task.await;
    }

    #[tokio::test]
    async fn test_shutdown_aborts_dispatch_past_timeout() {
        let (store, dispatcher, scheduler) = setup().await;
        let mut scheduler = scheduler.with_options(SchedulerOptions {
            shutdown_timeout: Duration::from_millis(50),
            ..SchedulerOptions::default()
        });
        insert(&store, every(60_000, NOW_MS + 4_000)).await;

        let report = scheduler.scan_once(from_epoch_ms(NOW_MS)).await.unwrap();
        assert_eq!(report.scheduled, 1);
        assert_eq!(scheduler.pending_dispatches(), 1);

        scheduler.finish_dispatches().await;
        assert_eq!(scheduler.pending_dispatches(), 0);
        assert!(dispatcher.contexts().is_empty());
    }
}
