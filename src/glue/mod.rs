//! Dynamic handler compilation ("glue").
//!
//! Jobs with `GlueType::Script` carry their handler as source text. A
//! [`HandlerCompiler`] turns that text into a [`JobHandler`] instance:
//!
//! 1. the MD5 digest of the exact source is the cache key;
//! 2. a cache hit skips compilation;
//! 3. on a miss the source is compiled outside the map and inserted if
//!    absent, so a racing duplicate is discarded;
//! 4. the compiled type is instantiated through its no-argument constructor
//!    and checked for the handler capability;
//! 5. the compiler's `inject_dependencies` hook runs on the new instance.
//!
//! The compiler is chosen once at startup (plain or injecting) and passed
//! to whoever needs it.

mod cache;
mod quickjs;

pub use cache::{GlueCache, source_digest};
pub use quickjs::{QuickJsEngine, ScriptHandler, ScriptHandlerType};

use std::sync::Arc;
use thiserror::Error;

use crate::core::handler::{ComponentLookup, JobHandler};

/// Errors that can occur while turning source text into a handler.
#[derive(Debug, Error)]
pub enum GlueError {
    /// The source text is empty or blank.
    #[error("invalid glue source: {0}")]
    InvalidSource(String),

    /// The engine rejected the source.
    #[error("glue compilation failed: {0}")]
    CompilationFailure(String),

    /// The compiled type cannot be instantiated or is not a job handler.
    #[error("glue contract violation: {0}")]
    ContractViolation(String),

    /// The script engine itself could not be set up.
    #[error("script engine error: {0}")]
    Engine(String),
}

/// Compiles source text into handler types.
pub trait ScriptEngine: Send + Sync {
    /// Compile `source`. Called at most once per distinct source while cached.
    fn compile(&self, source: &str) -> Result<Arc<dyn HandlerType>, GlueError>;
}

/// A compiled handler type that can produce instances.
pub trait HandlerType: Send + Sync {
    /// Name of the type (e.g. the class name).
    fn name(&self) -> &str;

    /// Create an instance through the no-argument constructor.
    ///
    /// Fails with `ContractViolation` if construction fails or the instance
    /// lacks the handler capability.
    fn instantiate(&self) -> Result<Box<dyn JobHandler>, GlueError>;
}

/// Turns glue source into ready-to-run handler instances.
pub trait HandlerCompiler: Send + Sync {
    /// Compile `source`, reusing a cached type for identical text.
    fn compile_cached(&self, source: &str) -> Result<Arc<dyn HandlerType>, GlueError>;

    /// Post-instantiation hook. No-op by default.
    fn inject_dependencies(&self, _handler: &mut dyn JobHandler) {}

    /// Compile (or reuse), instantiate and inject.
    fn load_instance(&self, source: &str) -> Result<Box<dyn JobHandler>, GlueError> {
        let handler_type = self.compile_cached(source)?;
        let mut handler = handler_type.instantiate()?;
        self.inject_dependencies(handler.as_mut());
        Ok(handler)
    }
}

/// Caching compiler without dependency injection.
pub struct GlueCompiler<E: ScriptEngine> {
    engine: E,
    cache: GlueCache,
}

impl<E: ScriptEngine> GlueCompiler<E> {
    /// Create a compiler with an unbounded cache.
    pub fn new(engine: E) -> Self {
        Self::with_capacity(engine, None)
    }

    /// Create a compiler whose cache holds at most `capacity` types.
    pub fn with_capacity(engine: E, capacity: Option<usize>) -> Self {
        Self {
            engine,
            cache: GlueCache::with_capacity(capacity),
        }
    }

    /// The underlying engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Number of cached compiled types.
    pub fn cached_types(&self) -> usize {
        self.cache.len()
    }
}

impl<E: ScriptEngine> HandlerCompiler for GlueCompiler<E> {
    fn compile_cached(&self, source: &str) -> Result<Arc<dyn HandlerType>, GlueError> {
        if source.trim().is_empty() {
            return Err(GlueError::InvalidSource("source is blank".into()));
        }

        let digest = source_digest(source);
        if let Some(handler_type) = self.cache.get(&digest) {
            return Ok(handler_type);
        }

        let compiled = self.engine.compile(source)?;
        tracing::debug!(digest = %digest, handler = %compiled.name(), "Compiled glue source");
        Ok(self.cache.insert_if_absent(digest, compiled))
    }
}

/// Caching compiler that injects dependencies from a component lookup.
pub struct InjectingGlueCompiler<E: ScriptEngine> {
    inner: GlueCompiler<E>,
    lookup: Arc<dyn ComponentLookup>,
}

impl<E: ScriptEngine> InjectingGlueCompiler<E> {
    /// Wrap a plain compiler.
    pub fn new(inner: GlueCompiler<E>, lookup: Arc<dyn ComponentLookup>) -> Self {
        Self { inner, lookup }
    }

    /// Number of cached compiled types.
    pub fn cached_types(&self) -> usize {
        self.inner.cached_types()
    }
}

impl<E: ScriptEngine> HandlerCompiler for InjectingGlueCompiler<E> {
    fn compile_cached(&self, source: &str) -> Result<Arc<dyn HandlerType>, GlueError> {
        self.inner.compile_cached(source)
    }

    fn inject_dependencies(&self, handler: &mut dyn JobHandler) {
        let name = handler.name().to_string();
        let Some(injectable) = handler.as_injectable() else {
            return;
        };

        let report = injectable.resolve(self.lookup.as_ref());
        for dependency in &report.missing {
            tracing::warn!(handler = %name, dependency = %dependency, "Unresolved handler dependency");
        }
        if !report.injected.is_empty() {
            tracing::debug!(handler = %name, injected = ?report.injected, "Injected handler dependencies");
        }
    }
}

/// Compiler settings.
#[derive(Debug, Clone, Default)]
pub struct GlueOptions {
    /// Maximum cached compiled types (`None` = unbounded).
    pub cache_capacity: Option<usize>,
    /// Heap cap per script runtime, in bytes.
    pub memory_limit_bytes: Option<usize>,
    /// Whether to inject dependencies into new instances.
    pub inject_dependencies: bool,
}

/// Build the QuickJS-backed compiler selected by `options`.
pub fn build_compiler(
    options: &GlueOptions,
    lookup: Arc<dyn ComponentLookup>,
) -> Arc<dyn HandlerCompiler> {
    let engine = QuickJsEngine::new().with_memory_limit(options.memory_limit_bytes);
    let compiler = GlueCompiler::with_capacity(engine, options.cache_capacity);
    if options.inject_dependencies {
        Arc::new(InjectingGlueCompiler::new(compiler, lookup))
    } else {
        Arc::new(compiler)
    }
}
