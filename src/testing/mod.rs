//! Testing utilities for users of the jobmesh library.
//!
//! This module provides helpers for testing scheduling and dispatch:
//!
//! - [`RecordingDispatcher`]: Captures every firing instead of running it
//! - [`FailingDispatcher`]: Rejects every firing
//! - [`RecordingTransport`]: Captures which executor each firing was sent to
//! - [`StaticHandler`] / [`FailingHandler`]: Bean handlers with call counters
//! - [`CountingEngine`]: A script engine that counts compilations
//! - [`TestHarness`]: Store, handlers, compiler, dispatcher and manager wired together

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::core::handler::{ComponentRegistry, HandlerError, HandlerRegistry, JobHandler};
use crate::core::job::JobDefinition;
use crate::core::types::{CandidateList, ExecutorCandidate, JobId, TriggerContext, TriggerType};
use crate::glue::{
    GlueError, GlueOptions, HandlerCompiler, HandlerType, QuickJsEngine, ScriptEngine,
    build_compiler,
};
use crate::manager::JobConfigManager;
use crate::scheduler::Scheduler;
use crate::storage::{InMemoryJobStore, JobStore};
use crate::trigger::{DispatchError, ExecutorTransport, LocalDispatcher, TriggerDispatcher};

/// A dispatcher that records firings without running anything.
///
/// # Example
///
/// ```
/// use jobmesh::testing::RecordingDispatcher;
/// use jobmesh::{JobId, TriggerContext, TriggerDispatcher, TriggerType};
///
/// let runtime = tokio::runtime::Runtime::new().unwrap();
/// let dispatcher = RecordingDispatcher::new();
/// runtime.block_on(async {
///     dispatcher
///         .dispatch(TriggerContext::unscheduled(JobId::new(1), TriggerType::Api))
///         .await
///         .unwrap();
/// });
/// assert_eq!(dispatcher.count(), 1);
/// ```
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    contexts: Mutex<Vec<TriggerContext>>,
}

impl RecordingDispatcher {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Firings received so far, in arrival order.
    pub fn contexts(&self) -> Vec<TriggerContext> {
        self.contexts.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of firings received.
    pub fn count(&self) -> usize {
        self.contexts.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Firings received for one job.
    pub fn contexts_for(&self, job_id: JobId) -> Vec<TriggerContext> {
        self.contexts()
            .into_iter()
            .filter(|ctx| ctx.job_id == job_id)
            .collect()
    }
}

#[async_trait]
impl TriggerDispatcher for RecordingDispatcher {
    async fn dispatch(&self, ctx: TriggerContext) -> Result<(), DispatchError> {
        if let Ok(mut contexts) = self.contexts.lock() {
            contexts.push(ctx);
        }
        Ok(())
    }
}

/// A dispatcher whose every dispatch fails with a transport error.
#[derive(Debug, Clone)]
pub struct FailingDispatcher {
    message: String,
}

impl FailingDispatcher {
    /// Create a dispatcher failing with `message`.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl TriggerDispatcher for FailingDispatcher {
    async fn dispatch(&self, _ctx: TriggerContext) -> Result<(), DispatchError> {
        Err(DispatchError::Transport {
            executor: "none".into(),
            message: self.message.clone(),
        })
    }
}

/// One send captured by [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentTrigger {
    /// Executor key (`host:port`).
    pub executor: String,
    /// Job that fired.
    pub job_id: JobId,
    /// How the firing was triggered.
    pub trigger_type: TriggerType,
}

/// A transport that records sends and optionally fails for some executors.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<SentTrigger>>,
    unreachable: Vec<String>,
}

impl RecordingTransport {
    /// Create a transport that accepts every send.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail sends to the executor with key `executor`.
    pub fn with_unreachable(mut self, executor: impl Into<String>) -> Self {
        self.unreachable.push(executor.into());
        self
    }

    /// Successful sends so far.
    pub fn sent(&self) -> Vec<SentTrigger> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Executor keys of successful sends, in order.
    pub fn executors(&self) -> Vec<String> {
        self.sent().into_iter().map(|s| s.executor).collect()
    }
}

#[async_trait]
impl ExecutorTransport for RecordingTransport {
    async fn send(
        &self,
        executor: &ExecutorCandidate,
        job: &JobDefinition,
        ctx: &TriggerContext,
    ) -> Result<(), DispatchError> {
        let key = executor.key();
        if self.unreachable.contains(&key) {
            return Err(DispatchError::Transport {
                executor: key,
                message: "connection refused".into(),
            });
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(SentTrigger {
                executor: key,
                job_id: job.id,
                trigger_type: ctx.trigger_type,
            });
        }
        Ok(())
    }
}

/// A bean handler that returns a fixed reply and counts its calls.
///
/// # Example
///
/// ```
/// use jobmesh::JobHandler;
/// use jobmesh::testing::StaticHandler;
///
/// let handler = StaticHandler::new("export", "ok");
/// assert_eq!(handler.execute(None).unwrap().as_deref(), Some("ok"));
/// assert_eq!(handler.calls(), 1);
/// ```
#[derive(Debug)]
pub struct StaticHandler {
    name: String,
    reply: String,
    calls: AtomicUsize,
    params: Mutex<Vec<Option<String>>>,
}

impl StaticHandler {
    /// Create a handler registered as `name` that replies `reply`.
    pub fn new(name: impl Into<String>, reply: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reply: reply.into(),
            calls: AtomicUsize::new(0),
            params: Mutex::new(Vec::new()),
        }
    }

    /// Number of executions.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Parameters received, in call order.
    pub fn params(&self) -> Vec<Option<String>> {
        self.params.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl JobHandler for StaticHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, param: Option<&str>) -> Result<Option<String>, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut params) = self.params.lock() {
            params.push(param.map(str::to_string));
        }
        Ok(Some(self.reply.clone()))
    }
}

/// A bean handler that fails a configurable number of times before succeeding.
///
/// Useful for testing retry logic. The failure budget is shared across
/// concurrent calls.
///
/// # Example
///
/// ```
/// use jobmesh::JobHandler;
/// use jobmesh::testing::FailingHandler;
///
/// // Fails 2 times, then succeeds on the 3rd attempt
/// let handler = FailingHandler::new("flaky", 2);
/// assert!(handler.execute(None).is_err());
/// assert!(handler.execute(None).is_err());
/// assert!(handler.execute(None).is_ok());
/// ```
#[derive(Debug)]
pub struct FailingHandler {
    name: String,
    state: Mutex<FailingHandlerState>,
}

#[derive(Debug)]
struct FailingHandlerState {
    failures_remaining: u32,
    call_count: u32,
}

impl FailingHandler {
    /// Create a handler that fails `fail_count` times then succeeds.
    pub fn new(name: impl Into<String>, fail_count: u32) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(FailingHandlerState {
                failures_remaining: fail_count,
                call_count: 0,
            }),
        }
    }

    /// Total calls so far.
    pub fn call_count(&self) -> u32 {
        self.state.lock().map(|s| s.call_count).unwrap_or(0)
    }

    /// Failures still to come.
    pub fn failures_remaining(&self) -> u32 {
        self.state.lock().map(|s| s.failures_remaining).unwrap_or(0)
    }
}

impl JobHandler for FailingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, _param: Option<&str>) -> Result<Option<String>, HandlerError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| HandlerError::ExecutionFailed("state lock poisoned".into()))?;
        state.call_count += 1;
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(HandlerError::ExecutionFailed(format!(
                "intentional failure ({} left)",
                state.failures_remaining
            )));
        }
        Ok(None)
    }
}

/// QuickJS engine wrapper that counts compilations.
#[derive(Default)]
pub struct CountingEngine {
    inner: QuickJsEngine,
    compiles: AtomicUsize,
}

impl CountingEngine {
    /// Wrap a default QuickJS engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times the engine compiled source.
    pub fn compiles(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }
}

impl ScriptEngine for CountingEngine {
    fn compile(&self, source: &str) -> Result<Arc<dyn HandlerType>, GlueError> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        self.inner.compile(source)
    }
}

/// `n` executors `10.0.0.1:9999` through `10.0.0.n:9999`.
///
/// Returns an empty list for `n == 0`.
pub fn executors(n: usize) -> Vec<ExecutorCandidate> {
    (1..=n).map(executor).collect()
}

/// Executor `10.0.0.i:9999`.
pub fn executor(i: usize) -> ExecutorCandidate {
    ExecutorCandidate::new(format!("10.0.0.{}", i), 9999)
}

/// `n` executors as a candidate list, `None` for `n == 0`.
pub fn candidates(n: usize) -> Option<CandidateList> {
    CandidateList::new(executors(n))
}

/// In-memory wiring of the scheduler core for tests.
///
/// Handlers and components can be registered after construction; the
/// compiler injects components into script handlers.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use jobmesh::testing::{StaticHandler, TestHarness};
///
/// let harness = TestHarness::new();
/// harness.register_handler(Arc::new(StaticHandler::new("export", "done")));
/// assert_eq!(harness.handlers().names(), vec!["export".to_string()]);
/// ```
pub struct TestHarness {
    store: Arc<InMemoryJobStore>,
    handlers: Arc<HandlerRegistry>,
    components: Arc<ComponentRegistry>,
    compiler: Arc<dyn HandlerCompiler>,
    dispatcher: Arc<LocalDispatcher>,
    manager: JobConfigManager,
}

impl TestHarness {
    /// Create a harness with an empty store.
    pub fn new() -> Self {
        let store = Arc::new(InMemoryJobStore::new());
        let handlers = Arc::new(HandlerRegistry::new());
        let components = Arc::new(ComponentRegistry::new());
        let options = GlueOptions {
            inject_dependencies: true,
            ..GlueOptions::default()
        };
        let compiler = build_compiler(&options, components.clone());
        let dispatcher = Arc::new(LocalDispatcher::new(
            store.clone(),
            handlers.clone(),
            compiler.clone(),
        ));
        let manager = JobConfigManager::new(store.clone(), dispatcher.clone());

        Self {
            store,
            handlers,
            components,
            compiler,
            dispatcher,
            manager,
        }
    }

    /// Register a bean handler.
    pub fn register_handler(&self, handler: Arc<dyn JobHandler>) {
        self.handlers.register(handler);
    }

    /// Register a component for injection.
    pub fn register_component(&self, name: impl Into<String>, component: serde_json::Value) {
        self.components.register(name, component);
    }

    /// The job store.
    pub fn store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }

    /// The handler registry.
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// The glue compiler.
    pub fn compiler(&self) -> &Arc<dyn HandlerCompiler> {
        &self.compiler
    }

    /// The in-process dispatcher.
    pub fn dispatcher(&self) -> Arc<LocalDispatcher> {
        self.dispatcher.clone()
    }

    /// The job manager, dispatching through the in-process dispatcher.
    pub fn manager(&self) -> &JobConfigManager {
        &self.manager
    }

    /// A scheduler over the harness store and dispatcher.
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.store.clone(), self.dispatcher.clone())
    }

    /// Run a job once, as an API trigger, and return the handler's message.
    pub async fn run_now(
        &self,
        id: JobId,
        param: Option<&str>,
    ) -> Result<Option<String>, DispatchError> {
        let job = self
            .store
            .get_job(id)
            .await
            .map_err(|_| DispatchError::JobNotFound(id))?;
        let ctx = TriggerContext::unscheduled(id, TriggerType::Api)
            .with_param(param.map(str::to_string).or_else(|| job.execute_param.clone()));
        self.dispatcher.run_job(&job, &ctx).await
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
