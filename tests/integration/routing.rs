//! Executor routing integration tests.
//!
//! Tests that send firings through the routing dispatcher to a recording
//! transport and check which executors were chosen per strategy.

use jobmesh::testing::{RecordingTransport, executors};
use jobmesh::{
    DispatchError, InMemoryJobStore, JobDefinition, JobId, JobStore, RouteStrategy, RouterSet,
    RoutingDispatcher, RoutingOptions, StaticCandidates, TriggerContext, TriggerDispatcher,
    TriggerType,
};
use std::collections::HashMap;
use std::sync::Arc;

struct Fixture {
    store: Arc<InMemoryJobStore>,
    transport: Arc<RecordingTransport>,
    dispatcher: RoutingDispatcher,
}

fn fixture(executor_count: usize, transport: RecordingTransport) -> Fixture {
    let store = Arc::new(InMemoryJobStore::new());
    let transport = Arc::new(transport);
    let dispatcher = RoutingDispatcher::new(
        store.clone(),
        Arc::new(RouterSet::new(RoutingOptions::default())),
        Arc::new(StaticCandidates::new(executors(executor_count))),
        transport.clone(),
    );
    Fixture {
        store,
        transport,
        dispatcher,
    }
}

async fn job(store: &InMemoryJobStore, name: &str, strategy: Option<RouteStrategy>) -> JobId {
    let mut definition = JobDefinition::new(name, "0 * * * * ?", "h");
    definition.route_strategy = strategy;
    store.insert_job(definition).await.unwrap().id
}

async fn fire(dispatcher: &RoutingDispatcher, id: JobId, times: usize) {
    for _ in 0..times {
        dispatcher
            .dispatch(TriggerContext::unscheduled(id, TriggerType::Cron))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_default_strategy_is_first() {
    let f = fixture(3, RecordingTransport::new());
    let id = job(&f.store, "a", None).await;

    fire(&f.dispatcher, id, 3).await;
    assert_eq!(f.transport.executors(), vec!["10.0.0.1:9999"; 3]);
}

#[tokio::test]
async fn test_last_picks_final_executor() {
    let f = fixture(3, RecordingTransport::new());
    let id = job(&f.store, "a", Some(RouteStrategy::Last)).await;

    fire(&f.dispatcher, id, 2).await;
    assert_eq!(f.transport.executors(), vec!["10.0.0.3:9999"; 2]);
}

#[tokio::test]
async fn test_round_robin_visits_every_executor() {
    let f = fixture(3, RecordingTransport::new());
    let id = job(&f.store, "a", Some(RouteStrategy::Round)).await;

    fire(&f.dispatcher, id, 9).await;

    let mut counts: HashMap<String, usize> = HashMap::new();
    for executor in f.transport.executors() {
        *counts.entry(executor).or_default() += 1;
    }
    assert_eq!(counts.len(), 3);
    assert!(counts.values().all(|&c| c == 3));
}

#[tokio::test]
async fn test_consistent_hash_is_sticky_per_job() {
    let f = fixture(5, RecordingTransport::new());
    let ids = [
        job(&f.store, "a", Some(RouteStrategy::ConsistentHash)).await,
        job(&f.store, "b", Some(RouteStrategy::ConsistentHash)).await,
        job(&f.store, "c", Some(RouteStrategy::ConsistentHash)).await,
    ];

    for id in ids {
        fire(&f.dispatcher, id, 4).await;
    }

    let sent = f.transport.sent();
    for id in ids {
        let chosen: Vec<&str> = sent
            .iter()
            .filter(|s| s.job_id == id)
            .map(|s| s.executor.as_str())
            .collect();
        assert_eq!(chosen.len(), 4);
        assert!(chosen.iter().all(|e| *e == chosen[0]), "job {} moved", id);
    }
}

#[tokio::test]
async fn test_lfu_and_lru_spread_load() {
    for strategy in [
        RouteStrategy::LeastFrequentlyUsed,
        RouteStrategy::LeastRecentlyUsed,
    ] {
        let f = fixture(4, RecordingTransport::new());
        let id = job(&f.store, "a", Some(strategy)).await;

        fire(&f.dispatcher, id, 16).await;

        let mut chosen = f.transport.executors();
        chosen.sort();
        chosen.dedup();
        assert_eq!(chosen.len(), 4, "{} left an executor idle", strategy);
    }
}

#[tokio::test]
async fn test_broadcast_reaches_all_and_reports_failure() {
    let f = fixture(3, RecordingTransport::new().with_unreachable("10.0.0.2:9999"));
    let id = job(&f.store, "a", Some(RouteStrategy::All)).await;

    let result = f
        .dispatcher
        .dispatch(TriggerContext::unscheduled(id, TriggerType::Api))
        .await;

    assert!(matches!(
        result,
        Err(DispatchError::Transport { executor, .. }) if executor == "10.0.0.2:9999"
    ));
    assert_eq!(
        f.transport.executors(),
        vec!["10.0.0.1:9999".to_string(), "10.0.0.3:9999".to_string()]
    );
    assert!(f.transport.sent().iter().all(|s| s.trigger_type == TriggerType::Api));
}

#[tokio::test]
async fn test_no_executors() {
    let f = fixture(0, RecordingTransport::new());
    let id = job(&f.store, "a", Some(RouteStrategy::Random)).await;

    let result = f
        .dispatcher
        .dispatch(TriggerContext::unscheduled(id, TriggerType::Cron))
        .await;
    assert!(matches!(result, Err(DispatchError::NoCandidates(job)) if job == id));
    assert!(f.transport.sent().is_empty());
}

#[tokio::test]
async fn test_unknown_job() {
    let f = fixture(2, RecordingTransport::new());
    let result = f
        .dispatcher
        .dispatch(TriggerContext::unscheduled(JobId::new(99), TriggerType::Cron))
        .await;
    assert!(matches!(result, Err(DispatchError::JobNotFound(_))));
}
