//! Schedule scanner integration tests.
//!
//! Tests that run the scanner against real stores and dispatchers:
//! periodic firing, stopping a job mid-flight, misfire handling and
//! exclusive claims between scanners sharing a database.

use crate::common::{wait_for_job, wait_until};
use chrono::Utc;
use jobmesh::testing::{RecordingDispatcher, StaticHandler, TestHarness};
use jobmesh::{
    InMemoryJobStore, JobDefinition, JobStatus, JobStore, MisfireStrategy, ScheduleType,
    Scheduler, SchedulerOptions, TriggerType,
};
use std::sync::Arc;
use std::time::Duration;

fn fast_options() -> SchedulerOptions {
    SchedulerOptions {
        tick_interval: Duration::from_millis(20),
        pre_read: Duration::from_millis(100),
        pre_read_count: 100,
        shutdown_timeout: Duration::from_millis(200),
    }
}

fn interval_job(name: &str, interval_ms: i64, handler: &str) -> JobDefinition {
    JobDefinition::new(name, interval_ms.to_string(), handler)
        .with_schedule_type(ScheduleType::FixedInterval)
}

#[tokio::test]
async fn test_interval_job_fires_repeatedly() {
    let harness = TestHarness::new();
    let handler = Arc::new(StaticHandler::new("tick", "ok"));
    harness.register_handler(handler.clone());

    let id = harness
        .manager()
        .create_job(interval_job("ticker", 100, "tick").with_param("p"))
        .await
        .unwrap();
    assert!(harness.manager().start(id).await.unwrap());

    let (handle, task) = harness.scheduler().with_options(fast_options()).start().await;

    wait_until("three runs", Duration::from_secs(5), || handler.calls() >= 3).await;
    handle.shutdown().await.unwrap();
    let _ = task.await;

    assert!(handler.params().iter().all(|p| p.as_deref() == Some("p")));
    let job = harness.store().get_job(id).await.unwrap();
    assert!(job.last_fire_time_ms > 0);
    assert!(job.next_fire_time_ms > job.last_fire_time_ms);
}

#[tokio::test]
async fn test_stopped_job_stops_firing() {
    let harness = TestHarness::new();
    let handler = Arc::new(StaticHandler::new("tick", "ok"));
    harness.register_handler(handler.clone());

    let manager = harness.manager();
    let id = manager
        .create_job(interval_job("ticker", 50, "tick"))
        .await
        .unwrap();
    manager.start(id).await.unwrap();

    let (handle, task) = harness.scheduler().with_options(fast_options()).start().await;
    wait_until("first runs", Duration::from_secs(5), || handler.calls() >= 2).await;

    assert!(manager.stop(id).await.unwrap());
    // Firings already claimed inside the look-ahead window may still land.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let settled = handler.calls();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(handler.calls(), settled);

    handle.shutdown().await.unwrap();
    let _ = task.await;

    let job = harness.store().get_job(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Stopped);
    assert_eq!(job.next_fire_time_ms, 0);
}

#[tokio::test]
async fn test_missed_fires_follow_misfire_strategy() {
    let store = Arc::new(InMemoryJobStore::new());
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let now = Utc::now().timestamp_millis();

    let mut skipped = interval_job("skipped", 60_000, "h");
    skipped.mark_running(now - 120_000);
    let skipped = store.insert_job(skipped).await.unwrap();

    let mut caught_up = interval_job("caught-up", 60_000, "h")
        .with_misfire_strategy(MisfireStrategy::FireOnceNow);
    caught_up.mark_running(now - 120_000);
    let caught_up = store.insert_job(caught_up).await.unwrap();

    let mut scheduler = Scheduler::new(store.clone(), dispatcher.clone());
    let report = scheduler.scan_once(Utc::now()).await.unwrap();
    scheduler.finish_dispatches().await;

    assert_eq!(report.misfired, 2);
    assert_eq!(report.fired, 1);
    assert!(dispatcher.contexts_for(skipped.id).is_empty());
    let fired = dispatcher.contexts_for(caught_up.id);
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].trigger_type, TriggerType::Misfire);

    // Both are rescheduled into the future
    for id in [skipped.id, caught_up.id] {
        let job = store.get_job(id).await.unwrap();
        assert!(job.next_fire_time_ms > now);
    }
}

#[tokio::test]
async fn test_manual_trigger_does_not_move_schedule() {
    let harness = TestHarness::new();
    let handler = Arc::new(StaticHandler::new("export", "ok"));
    harness.register_handler(handler.clone());

    let manager = harness.manager();
    let id = manager
        .register_or_update("export", "0 0 2 * * ?", "export", None, None, true)
        .await
        .unwrap();
    let before = harness.store().get_job(id).await.unwrap();

    assert!(manager.trigger(id, Some("now")).await.unwrap());

    let after = wait_for_job(harness.store().as_ref(), id, Duration::from_secs(1), |job| {
        job.is_running()
    })
    .await;
    assert_eq!(after.next_fire_time_ms, before.next_fire_time_ms);
    assert_eq!(after.last_fire_time_ms, before.last_fire_time_ms);
    assert_eq!(handler.calls(), 1);
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_scanners_sharing_a_database_fire_once() {
    use jobmesh::SqliteJobStore;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.db");
    let first_store = Arc::new(SqliteJobStore::new(&path).await.unwrap());
    let second_store = Arc::new(SqliteJobStore::new(&path).await.unwrap());

    let now = Utc::now().timestamp_millis();
    for i in 0..5 {
        let mut job = interval_job(&format!("job-{}", i), 60_000, "h");
        job.mark_running(now - 100);
        first_store.insert_job(job).await.unwrap();
    }

    let first_dispatcher = Arc::new(RecordingDispatcher::new());
    let second_dispatcher = Arc::new(RecordingDispatcher::new());
    let mut first = Scheduler::new(first_store.clone(), first_dispatcher.clone());
    let mut second = Scheduler::new(second_store.clone(), second_dispatcher.clone());

    let scan_at = Utc::now();
    let (a, b) = tokio::join!(first.scan_once(scan_at), second.scan_once(scan_at));
    let (a, b) = (a.unwrap(), b.unwrap());
    first.finish_dispatches().await;
    second.finish_dispatches().await;

    assert_eq!(a.fired + b.fired, 5);
    assert_eq!(first_dispatcher.count() + second_dispatcher.count(), 5);

    let mut fired: Vec<_> = first_dispatcher
        .contexts()
        .into_iter()
        .chain(second_dispatcher.contexts())
        .map(|ctx| ctx.job_id)
        .collect();
    fired.sort();
    fired.dedup();
    assert_eq!(fired.len(), 5);
}
