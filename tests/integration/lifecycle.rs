//! Job lifecycle integration tests.
//!
//! Tests that drive jobs from YAML registration through start, stop,
//! edits and manual triggers against a real dispatcher and store.

use jobmesh::testing::{FailingHandler, StaticHandler, TestHarness};
use jobmesh::{JobConfigManager, JobStatus, JobStore, YamlLoader, register_jobs};
use std::sync::Arc;

const CONFIG: &str = r#"
jobs:
  - name: nightly-export
    schedule: "0 0 2 * * ?"
    handler: exportBean
    param: "full"
  - name: cleanup
    schedule: "0 */15 * * * ?"
    handler: cleanupBean
    auto_start: false
"#;

#[tokio::test]
async fn test_registered_job_runs_on_manual_trigger() {
    let harness = TestHarness::new();
    let export = Arc::new(StaticHandler::new("exportBean", "exported"));
    harness.register_handler(export.clone());

    let config = YamlLoader::parse(CONFIG).unwrap();
    let ids = register_jobs(&config.jobs, harness.manager()).await.unwrap();

    // Default parameter
    assert!(harness.manager().trigger(ids[0], None).await.unwrap());
    // Explicit parameter wins
    assert!(harness.manager().trigger(ids[0], Some("delta")).await.unwrap());

    assert_eq!(export.calls(), 2);
    assert_eq!(
        export.params(),
        vec![Some("full".to_string()), Some("delta".to_string())]
    );
}

#[tokio::test]
async fn test_trigger_reports_handler_failure() {
    let harness = TestHarness::new();
    harness.register_handler(Arc::new(FailingHandler::new("cleanupBean", 10)));

    let config = YamlLoader::parse(CONFIG).unwrap();
    let ids = register_jobs(&config.jobs, harness.manager()).await.unwrap();

    assert!(!harness.manager().trigger(ids[1], None).await.unwrap());
}

#[tokio::test]
async fn test_retry_count_covers_transient_failures() {
    let harness = TestHarness::new();
    let flaky = Arc::new(FailingHandler::new("flaky", 2));
    harness.register_handler(flaky.clone());

    let manager = harness.manager();
    let id = manager
        .register_or_update("flaky-job", "0 * * * * ?", "flaky", None, None, false)
        .await
        .unwrap();

    let mut job = manager.get_job(id).await.unwrap().unwrap();
    job.fail_retry_count = 2;
    assert!(manager.update_job(job).await.unwrap());

    assert!(manager.trigger(id, None).await.unwrap());
    assert_eq!(flaky.call_count(), 3);
}

#[tokio::test]
async fn test_start_stop_cycle() {
    let harness = TestHarness::new();
    let config = YamlLoader::parse(CONFIG).unwrap();
    let ids = register_jobs(&config.jobs, harness.manager()).await.unwrap();
    let manager = harness.manager();
    let cleanup = ids[1];

    let job = manager.get_job(cleanup).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Stopped);
    assert_eq!(job.next_fire_time_ms, 0);

    assert!(manager.start(cleanup).await.unwrap());
    let job = manager.get_job(cleanup).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert!(job.next_fire_time_ms > chrono::Utc::now().timestamp_millis());

    assert!(manager.stop(cleanup).await.unwrap());
    let job = manager.get_job(cleanup).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Stopped);
    assert_eq!(job.last_fire_time_ms, 0);
    assert_eq!(job.next_fire_time_ms, 0);

    // Stopped jobs are never due
    let due = harness
        .store()
        .list_due_jobs(i64::MAX, 100)
        .await
        .unwrap();
    assert!(due.iter().all(|j| j.id != cleanup));
}

#[tokio::test]
async fn test_edits_are_visible_to_next_trigger() {
    let harness = TestHarness::new();
    let v1 = Arc::new(StaticHandler::new("v1", "one"));
    let v2 = Arc::new(StaticHandler::new("v2", "two"));
    harness.register_handler(v1.clone());
    harness.register_handler(v2.clone());
    let manager = harness.manager();

    let id = manager
        .register_or_update("job", "0 * * * * ?", "v1", Some("a"), None, true)
        .await
        .unwrap();
    assert_eq!(harness.run_now(id, None).await.unwrap().as_deref(), Some("one"));

    manager
        .register_or_update("job", "0 * * * * ?", "v2", Some("b"), None, true)
        .await
        .unwrap();
    assert!(manager.update_param(id, Some("c")).await.unwrap());

    assert_eq!(harness.run_now(id, None).await.unwrap().as_deref(), Some("two"));
    assert_eq!(v2.params(), vec![Some("c".to_string())]);
    assert_eq!(v1.calls(), 1);
}

#[tokio::test]
async fn test_missing_job_reports_false() {
    let harness = TestHarness::new();
    let manager = harness.manager();
    let ghost = jobmesh::JobId::new(404);

    assert!(!manager.start(ghost).await.unwrap());
    assert!(!manager.stop(ghost).await.unwrap());
    assert!(!manager.update_cron(ghost, "0 * * * * ?").await.unwrap());
    assert!(!manager.trigger(ghost, None).await.unwrap());
    assert!(manager.get_job(ghost).await.unwrap().is_none());
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_jobs_survive_store_reopen() {
    use jobmesh::SqliteJobStore;
    use jobmesh::testing::RecordingDispatcher;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jobmesh.db");
    let config = YamlLoader::parse(CONFIG).unwrap();

    let first_ids = {
        let store = Arc::new(SqliteJobStore::new(&path).await.unwrap());
        let manager = JobConfigManager::new(store.clone(), Arc::new(RecordingDispatcher::new()));
        let ids = register_jobs(&config.jobs, &manager).await.unwrap();
        store.close().await;
        ids
    };

    let store = Arc::new(SqliteJobStore::new(&path).await.unwrap());
    let manager = JobConfigManager::new(store.clone(), Arc::new(RecordingDispatcher::new()));

    let export = manager.find_by_name("nightly-export").await.unwrap().unwrap();
    assert_eq!(export.id, first_ids[0]);
    assert_eq!(export.status, JobStatus::Running);
    assert_eq!(export.execute_param.as_deref(), Some("full"));
    assert!(export.next_fire_time_ms > 0);

    // Re-registering against the persisted store keeps ids
    let again = register_jobs(&config.jobs, &manager).await.unwrap();
    assert_eq!(again, first_ids);
    assert_eq!(store.list_jobs().await.unwrap().len(), 2);
}
