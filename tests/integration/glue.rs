//! Script handler integration tests.
//!
//! Tests that run script jobs end to end: source stored on the job,
//! compiled once, instantiated per run and injected with components.

use jobmesh::testing::{CountingEngine, TestHarness};
use jobmesh::{
    DispatchError, GlueCompiler, GlueError, HandlerCompiler, HandlerRegistry, InMemoryJobStore,
    JobDefinition, JobStore, LocalDispatcher, TriggerContext, TriggerType,
};
use serde_json::json;
use std::sync::Arc;

const EXPORT: &str = r#"
(class ExportHandler {
    static inject = ["exportService"];
    execute(param) {
        return `export to ${this.exportService.endpoint} (${param})`;
    }
})
"#;

const COUNTER: &str = r#"
(class Counter {
    constructor() { this.runs = 0; }
    execute() { this.runs += 1; return String(this.runs); }
})
"#;

#[tokio::test]
async fn test_script_job_gets_components_injected() {
    let harness = TestHarness::new();
    harness.register_component("exportService", json!({ "endpoint": "s3://exports" }));

    let manager = harness.manager();
    let id = manager
        .register_or_update("export", "0 0 2 * * ?", "", Some("full"), None, false)
        .await
        .unwrap();
    assert!(manager.update_glue(id, EXPORT).await.unwrap());

    let message = harness.run_now(id, None).await.unwrap();
    assert_eq!(message.as_deref(), Some("export to s3://exports (full)"));
}

#[tokio::test]
async fn test_every_run_gets_a_fresh_instance() {
    let harness = TestHarness::new();
    let id = harness
        .manager()
        .create_job(JobDefinition::new("counter", "0 * * * * ?", "").with_glue_source(COUNTER))
        .await
        .unwrap();

    for _ in 0..3 {
        let message = harness.run_now(id, None).await.unwrap();
        assert_eq!(message.as_deref(), Some("1"));
    }
}

#[tokio::test]
async fn test_identical_source_compiles_once() {
    let store = Arc::new(InMemoryJobStore::new());
    let compiler = Arc::new(GlueCompiler::new(CountingEngine::new()));
    let dispatcher = LocalDispatcher::new(
        store.clone(),
        Arc::new(HandlerRegistry::new()),
        compiler.clone(),
    );

    // Two jobs sharing the same text share one compiled type
    let a = store
        .insert_job(JobDefinition::new("a", "0 * * * * ?", "").with_glue_source(COUNTER))
        .await
        .unwrap();
    let b = store
        .insert_job(JobDefinition::new("b", "0 * * * * ?", "").with_glue_source(COUNTER))
        .await
        .unwrap();

    for job in [&a, &b, &a, &b] {
        let ctx = TriggerContext::unscheduled(job.id, TriggerType::Api);
        dispatcher.run_job(job, &ctx).await.unwrap();
    }
    assert_eq!(compiler.engine().compiles(), 1);
    assert_eq!(compiler.cached_types(), 1);

    // Edited source compiles again
    let edited = format!("{}\n", COUNTER);
    compiler.load_instance(&edited).unwrap();
    assert_eq!(compiler.engine().compiles(), 2);
}

#[tokio::test]
async fn test_broken_scripts_fail_the_run() {
    let harness = TestHarness::new();
    let manager = harness.manager();

    let syntax = manager
        .create_job(JobDefinition::new("syntax", "0 * * * * ?", "").with_glue_source("(class {"))
        .await
        .unwrap();
    let result = harness.run_now(syntax, None).await;
    assert!(matches!(
        result,
        Err(DispatchError::Glue(GlueError::CompilationFailure(_)))
    ));

    let no_execute = manager
        .create_job(
            JobDefinition::new("no-execute", "0 * * * * ?", "")
                .with_glue_source("(class Idle { run() {} })"),
        )
        .await
        .unwrap();
    let result = harness.run_now(no_execute, None).await;
    assert!(matches!(
        result,
        Err(DispatchError::Glue(GlueError::ContractViolation(_)))
    ));

    let throws = manager
        .create_job(
            JobDefinition::new("throws", "0 * * * * ?", "")
                .with_glue_source("(class Boom { execute() { throw new Error('boom'); } })"),
        )
        .await
        .unwrap();
    assert!(!manager.trigger(throws, None).await.unwrap());
}

#[tokio::test]
async fn test_blank_glue_update_is_rejected() {
    let harness = TestHarness::new();
    let manager = harness.manager();
    let id = manager
        .create_job(JobDefinition::new("counter", "0 * * * * ?", "").with_glue_source(COUNTER))
        .await
        .unwrap();

    assert!(manager.update_glue(id, "   ").await.is_err());

    let job = harness.store().get_job(id).await.unwrap();
    assert_eq!(job.glue_source.as_deref(), Some(COUNTER));
}

#[tokio::test]
async fn test_script_body_runs_once_per_source() {
    const LOADS: &str = r#"
(() => {
    globalThis.loads = (globalThis.loads || 0) + 1;
    return class Loads { execute() { return String(globalThis.loads); } };
})()
"#;
    let harness = TestHarness::new();
    let manager = harness.manager();
    let a = manager
        .create_job(JobDefinition::new("a", "0 * * * * ?", "").with_glue_source(LOADS))
        .await
        .unwrap();
    let b = manager
        .create_job(JobDefinition::new("b", "0 * * * * ?", "").with_glue_source(LOADS))
        .await
        .unwrap();

    for id in [a, b, a] {
        let message = harness.run_now(id, None).await.unwrap();
        assert_eq!(message.as_deref(), Some("1"));
    }
}
