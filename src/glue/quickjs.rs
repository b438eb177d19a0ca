//! JavaScript glue handlers on an embedded QuickJS runtime.
//!
//! A glue script evaluates to a class. Instances need an `execute(param)`
//! method and may list dependencies in a static `inject` array:
//!
//! ```js
//! (class ExportHandler {
//!     static inject = ["exportService"];
//!     execute(param) {
//!         return `export to ${this.exportService.endpoint} (${param})`;
//!     }
//! })
//! ```
//!
//! Compiling evaluates the script once in a runtime owned by the compiled
//! type. Instances are separate objects in that runtime and share only the
//! class itself. Runs with a time limit are interrupted by the runtime once
//! the limit passes.

use rquickjs::{CatchResultExt, CaughtError, Context, Ctx, Runtime, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::{GlueError, HandlerType, ScriptEngine};
use crate::core::handler::{
    ComponentLookup, HandlerError, Injectable, InjectionReport, JobHandler,
};

const CTOR_GLOBAL: &str = "__glue_ctor";
const ID_GLOBAL: &str = "__glue_id";
const PARAM_GLOBAL: &str = "__glue_param";
const DEP_NAME_GLOBAL: &str = "__glue_dep_name";
const DEP_VALUE_GLOBAL: &str = "__glue_dep_value";

const SETUP_SCRIPT: &str = r#"
(() => {
    globalThis.__glue_instances = new Map();
    const Ctor = globalThis.__glue_ctor;
    return typeof Ctor === 'function' && Ctor.name ? Ctor.name : 'anonymous';
})()
"#;

const DEPENDENCIES_SCRIPT: &str = r#"
(() => {
    const Ctor = globalThis.__glue_ctor;
    const declared = typeof Ctor === 'function' ? Ctor.inject : undefined;
    return Array.isArray(declared) ? declared.filter((name) => typeof name === 'string') : [];
})()
"#;

const INSTANTIATE_SCRIPT: &str = r#"
(() => {
    const Ctor = globalThis.__glue_ctor;
    if (typeof Ctor !== 'function') {
        return 'script did not evaluate to a class';
    }
    let instance;
    try {
        instance = new Ctor();
    } catch (e) {
        return 'no-argument constructor failed: ' + e;
    }
    if (instance === null || typeof instance !== 'object' || typeof instance.execute !== 'function') {
        return 'instance has no execute(param) method';
    }
    globalThis.__glue_instances.set(globalThis.__glue_id, instance);
    return '';
})()
"#;

const INJECT_SCRIPT: &str = r#"
(() => {
    const instance = globalThis.__glue_instances.get(globalThis.__glue_id);
    instance[globalThis.__glue_dep_name] = JSON.parse(globalThis.__glue_dep_value);
})()
"#;

const EXECUTE_SCRIPT: &str = r#"
(() => {
    const instance = globalThis.__glue_instances.get(globalThis.__glue_id);
    const out = instance.execute(globalThis.__glue_param);
    if (out === undefined || out === null) {
        return undefined;
    }
    return typeof out === 'string' ? out : JSON.stringify(out);
})()
"#;

const RELEASE_SCRIPT: &str = r#"
(() => {
    globalThis.__glue_instances.delete(globalThis.__glue_id);
})()
"#;

fn describe(caught: CaughtError<'_>) -> String {
    match caught {
        CaughtError::Exception(exc) => {
            let message = exc.message().unwrap_or_default();
            match exc.stack() {
                Some(stack) if !stack.is_empty() => format!("{}\n{}", message, stack),
                _ => message,
            }
        }
        CaughtError::Value(val) => format!("script threw value: {:?}", val),
        CaughtError::Error(err) => err.to_string(),
    }
}

/// Deadline checked by the runtime's interrupt handler.
#[derive(Clone, Default)]
struct Deadline(Arc<Mutex<Option<Instant>>>);

impl Deadline {
    fn set(&self, at: Option<Instant>) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = at;
        }
    }

    fn passed(&self) -> bool {
        self.0
            .lock()
            .map(|slot| slot.is_some_and(|at| Instant::now() >= at))
            .unwrap_or(false)
    }
}

/// The runtime a compiled class lives in.
struct ClassRuntime {
    context: Context,
    deadline: Deadline,
    next_id: AtomicU64,
    _runtime: Runtime,
}

impl ClassRuntime {
    fn new(memory_limit: Option<usize>) -> Result<Self, GlueError> {
        let runtime = Runtime::new().map_err(|e| GlueError::Engine(e.to_string()))?;
        if let Some(limit) = memory_limit {
            runtime.set_memory_limit(limit);
        }
        let deadline = Deadline::default();
        let watched = deadline.clone();
        runtime.set_interrupt_handler(Some(Box::new(move || watched.passed())));

        let context = Context::full(&runtime).map_err(|e| GlueError::Engine(e.to_string()))?;
        Ok(Self {
            context,
            deadline,
            next_id: AtomicU64::new(0),
            _runtime: runtime,
        })
    }

    /// Run `f` against the instance `id`, interrupting it after `limit`.
    fn with_instance<T>(
        &self,
        id: &str,
        limit: Option<Duration>,
        f: impl FnOnce(&Ctx<'_>) -> Result<T, String>,
    ) -> Result<T, String> {
        self.context.with(|ctx| {
            ctx.globals()
                .set(ID_GLOBAL, id)
                .map_err(|e| e.to_string())?;
            self.deadline.set(limit.map(|limit| Instant::now() + limit));
            let result = f(&ctx);
            self.deadline.set(None);
            result
        })
    }
}

/// QuickJS-backed script engine.
#[derive(Debug, Clone, Default)]
pub struct QuickJsEngine {
    memory_limit: Option<usize>,
}

impl QuickJsEngine {
    /// Create an engine with no memory limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the heap of every runtime created by this engine.
    pub fn with_memory_limit(mut self, bytes: Option<usize>) -> Self {
        self.memory_limit = bytes.filter(|b| *b > 0);
        self
    }
}

impl ScriptEngine for QuickJsEngine {
    fn compile(&self, source: &str) -> Result<Arc<dyn HandlerType>, GlueError> {
        let runtime = ClassRuntime::new(self.memory_limit)?;
        let (name, dependencies) = runtime.context.with(
            |ctx| -> Result<(String, Vec<String>), GlueError> {
                let class: Value = ctx
                    .eval(source)
                    .catch(&ctx)
                    .map_err(|e| GlueError::CompilationFailure(describe(e)))?;
                ctx.globals()
                    .set(CTOR_GLOBAL, class)
                    .map_err(|e| GlueError::Engine(e.to_string()))?;

                let name: String = ctx
                    .eval(SETUP_SCRIPT)
                    .catch(&ctx)
                    .map_err(|e| GlueError::CompilationFailure(describe(e)))?;
                let dependencies: Vec<String> = ctx
                    .eval(DEPENDENCIES_SCRIPT)
                    .catch(&ctx)
                    .map_err(|e| GlueError::ContractViolation(describe(e)))?;
                Ok((name, dependencies))
            },
        )?;

        Ok(Arc::new(ScriptHandlerType {
            name,
            dependencies,
            runtime: Arc::new(runtime),
        }))
    }
}

/// A compiled glue class.
pub struct ScriptHandlerType {
    name: String,
    dependencies: Vec<String>,
    runtime: Arc<ClassRuntime>,
}

impl HandlerType for ScriptHandlerType {
    fn name(&self) -> &str {
        &self.name
    }

    fn instantiate(&self) -> Result<Box<dyn JobHandler>, GlueError> {
        let id = self.runtime.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let problem = self
            .runtime
            .with_instance(&id, None, |ctx| {
                let problem: String = ctx.eval(INSTANTIATE_SCRIPT).catch(ctx).map_err(describe)?;
                Ok(problem)
            })
            .map_err(GlueError::ContractViolation)?;
        if !problem.is_empty() {
            return Err(GlueError::ContractViolation(format!("{}: {}", self.name, problem)));
        }

        Ok(Box::new(ScriptHandler {
            name: self.name.clone(),
            id,
            dependencies: self.dependencies.clone(),
            runtime: Arc::clone(&self.runtime),
        }))
    }
}

/// A live instance of a glue class.
pub struct ScriptHandler {
    name: String,
    id: String,
    dependencies: Vec<String>,
    runtime: Arc<ClassRuntime>,
}

impl ScriptHandler {
    /// Dependency names declared by the class.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    fn assign(&self, name: &str, value: &serde_json::Value) -> Result<(), String> {
        let json = serde_json::to_string(value).map_err(|e| e.to_string())?;
        self.runtime.with_instance(&self.id, None, |ctx| {
            let globals = ctx.globals();
            globals
                .set(DEP_NAME_GLOBAL, name)
                .map_err(|e| e.to_string())?;
            globals
                .set(DEP_VALUE_GLOBAL, json)
                .map_err(|e| e.to_string())?;
            let assigned: Result<(), _> = ctx.eval(INJECT_SCRIPT);
            assigned.catch(ctx).map_err(describe)
        })
    }

    fn run(&self, param: Option<&str>, limit: Option<Duration>) -> Result<Option<String>, HandlerError> {
        let started = Instant::now();
        let result = self.runtime.with_instance(&self.id, limit, |ctx| {
            ctx.globals()
                .set(PARAM_GLOBAL, param.map(str::to_string))
                .map_err(|e| e.to_string())?;
            let message: Result<Option<String>, _> = ctx.eval(EXECUTE_SCRIPT);
            message.catch(ctx).map_err(describe)
        });

        match (result, limit) {
            (Ok(message), _) => Ok(message),
            (Err(_), Some(limit)) if started.elapsed() >= limit => {
                Err(HandlerError::Timeout(limit))
            }
            (Err(e), _) => Err(HandlerError::ExecutionFailed(e)),
        }
    }
}

impl Drop for ScriptHandler {
    fn drop(&mut self) {
        let released = self.runtime.with_instance(&self.id, None, |ctx| {
            let released: Result<(), _> = ctx.eval(RELEASE_SCRIPT);
            released.catch(ctx).map_err(describe)
        });
        if let Err(e) = released {
            tracing::debug!(handler = %self.name, error = %e, "Failed to release instance");
        }
    }
}

impl JobHandler for ScriptHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, param: Option<&str>) -> Result<Option<String>, HandlerError> {
        self.run(param, None)
    }

    fn execute_with_timeout(
        &self,
        param: Option<&str>,
        limit: Duration,
    ) -> Result<Option<String>, HandlerError> {
        self.run(param, Some(limit))
    }

    fn as_injectable(&mut self) -> Option<&mut dyn Injectable> {
        Some(self)
    }
}

impl Injectable for ScriptHandler {
    fn resolve(&mut self, lookup: &dyn ComponentLookup) -> InjectionReport {
        let mut report = InjectionReport::default();
        for name in &self.dependencies {
            let Some(value) = lookup.lookup(name) else {
                report.missing.push(name.clone());
                continue;
            };
            match self.assign(name, &value) {
                Ok(()) => report.injected.push(name.clone()),
                Err(e) => {
                    tracing::warn!(
                        handler = %self.name,
                        dependency = %name,
                        error = %e,
                        "Failed to assign dependency"
                    );
                    report.missing.push(name.clone());
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::handler::ComponentRegistry;
    use serde_json::json;

    const ECHO: &str = r#"
        (class Echo {
            execute(param) {
                return param === undefined || param === null ? null : "echo:" + param;
            }
        })
    "#;

    fn instance(source: &str) -> Result<Box<dyn JobHandler>, GlueError> {
        QuickJsEngine::new().compile(source)?.instantiate()
    }

    #[test]
    fn test_compile_reads_class_name() {
        let compiled = QuickJsEngine::new().compile(ECHO).unwrap();
        assert_eq!(compiled.name(), "Echo");
    }

    #[test]
    fn test_execute_passes_param_and_returns_message() {
        let handler = instance(ECHO).unwrap();
        assert_eq!(handler.execute(Some("x")).unwrap().as_deref(), Some("echo:x"));
        assert_eq!(handler.execute(None).unwrap(), None);
    }

    #[test]
    fn test_non_string_results_are_json_encoded() {
        let handler = instance("(class { execute() { return { rows: 3 }; } })").unwrap();
        assert_eq!(handler.execute(None).unwrap().as_deref(), Some(r#"{"rows":3}"#));
    }

    #[test]
    fn test_syntax_error_is_compilation_failure() {
        let result = QuickJsEngine::new().compile("(class { execute( { })");
        assert!(matches!(result, Err(GlueError::CompilationFailure(_))));
    }

    #[test]
    fn test_missing_execute_is_contract_violation() {
        let result = instance("(class Lazy { run() { return 1; } })");
        assert!(matches!(result, Err(GlueError::ContractViolation(_))));
    }

    #[test]
    fn test_non_class_completion_is_contract_violation() {
        let result = instance("42");
        assert!(matches!(result, Err(GlueError::ContractViolation(_))));
    }

    #[test]
    fn test_constructor_requiring_arguments_is_contract_violation() {
        let source = r#"
            (class Picky {
                constructor(config) { this.limit = config.limit; }
                execute() { return this.limit; }
            })
        "#;
        assert!(matches!(instance(source), Err(GlueError::ContractViolation(_))));
    }

    #[test]
    fn test_thrown_error_is_execution_failure() {
        let handler = instance("(class { execute() { throw new Error('boom'); } })").unwrap();
        let err = handler.execute(None).unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_instances_do_not_share_state() {
        let source = r#"
            (class Counter {
                constructor() { this.n = 0; }
                execute() { this.n += 1; return String(this.n); }
            })
        "#;
        let compiled = QuickJsEngine::new().compile(source).unwrap();
        let a = compiled.instantiate().unwrap();
        let b = compiled.instantiate().unwrap();

        assert_eq!(a.execute(None).unwrap().as_deref(), Some("1"));
        assert_eq!(a.execute(None).unwrap().as_deref(), Some("2"));
        assert_eq!(b.execute(None).unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_declared_dependencies_are_injected() {
        let source = r#"
            (class Export {
                static inject = ["exportService", "auditLog"];
                execute() {
                    return this.exportService.endpoint + "|" + (this.auditLog === undefined);
                }
            })
        "#;
        let mut handler = instance(source).unwrap();
        let registry = ComponentRegistry::new();
        registry.register("exportService", json!({ "endpoint": "s3://exports" }));

        let report = handler.as_injectable().unwrap().resolve(&registry);

        assert_eq!(report.injected, vec!["exportService".to_string()]);
        assert_eq!(report.missing, vec!["auditLog".to_string()]);
        assert_eq!(
            handler.execute(None).unwrap().as_deref(),
            Some("s3://exports|true")
        );
    }

    #[test]
    fn test_memory_limit_stops_runaway_allocation() {
        let engine = QuickJsEngine::new().with_memory_limit(Some(4 * 1024 * 1024));
        let source = r#"
            (class Hog {
                execute() {
                    const chunks = [];
                    for (;;) { chunks.push(new Array(100000).fill(1)); }
                }
            })
        "#;
        let handler = engine.compile(source).unwrap().instantiate().unwrap();
        assert!(handler.execute(None).is_err());
    }

    #[test]
    fn test_script_body_runs_once_per_compiled_type() {
        let source = r#"
            (() => {
                globalThis.loads = (globalThis.loads || 0) + 1;
                return class Loaded {
                    execute() { return String(globalThis.loads); }
                };
            })()
        "#;
        let compiled = QuickJsEngine::new().compile(source).unwrap();

        for _ in 0..3 {
            let handler = compiled.instantiate().unwrap();
            assert_eq!(handler.execute(None).unwrap().as_deref(), Some("1"));
        }
    }

    #[test]
    fn test_endless_loop_is_interrupted_at_the_limit() {
        let compiled = QuickJsEngine::new()
            .compile("(class Spin { execute() { for (;;) {} } })")
            .unwrap();
        let handler = compiled.instantiate().unwrap();

        let started = Instant::now();
        let result = handler.execute_with_timeout(None, Duration::from_millis(200));

        assert!(matches!(result, Err(HandlerError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(5));

        // The runtime stays usable for the next instance
        let next = compiled.instantiate().unwrap();
        assert!(matches!(
            next.execute_with_timeout(None, Duration::from_millis(50)),
            Err(HandlerError::Timeout(_))
        ));
    }

    #[test]
    fn test_limit_does_not_affect_quick_runs() {
        let handler = instance(ECHO).unwrap();
        assert_eq!(
            handler
                .execute_with_timeout(Some("x"), Duration::from_secs(5))
                .unwrap()
                .as_deref(),
            Some("echo:x")
        );
        assert_eq!(handler.execute(Some("y")).unwrap().as_deref(), Some("echo:y"));
    }
}
