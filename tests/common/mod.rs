//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use jobmesh::{JobDefinition, JobId, JobStore};
use std::time::Duration;

/// Wait until `condition` holds, polling every 10ms.
///
/// This is more reliable than fixed sleeps since execution time can vary.
///
/// # Panics
///
/// Panics if the timeout is reached before the condition holds.
pub async fn wait_until<F>(what: &str, timeout: Duration, condition: F)
where
    F: Fn() -> bool,
{
    let start = tokio::time::Instant::now();
    loop {
        if condition() {
            return;
        }
        if start.elapsed() > timeout {
            panic!("Timeout waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait for a stored job to satisfy `predicate`, polling storage.
///
/// # Panics
///
/// Panics if the timeout is reached first.
pub async fn wait_for_job<F>(
    store: &dyn JobStore,
    id: JobId,
    timeout: Duration,
    predicate: F,
) -> JobDefinition
where
    F: Fn(&JobDefinition) -> bool,
{
    let start = tokio::time::Instant::now();
    loop {
        let job = store.get_job(id).await.unwrap();
        if predicate(&job) {
            return job;
        }
        if start.elapsed() > timeout {
            panic!(
                "Timeout waiting for job {}, current state: status={} next={}",
                id, job.status, job.next_fire_time_ms
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
