//! Job handler trait, dependency lookup and the named handler registry.
//!
//! `JobHandler` is the unit of executable job logic. Handlers are either
//! registered by name (`GlueType::Bean` jobs) or produced from script source
//! by a `HandlerCompiler` (`GlueType::Script` jobs).

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during handler execution.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Handler execution failed with a message.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// Handler did not finish in time.
    #[error("handler timed out after {0:?}")]
    Timeout(Duration),

    /// Generic error wrapper.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// The capability every job handler provides.
///
/// # Example
///
/// ```
/// use jobmesh::{HandlerError, JobHandler};
///
/// struct Export;
///
/// impl JobHandler for Export {
///     fn name(&self) -> &str {
///         "exportBean"
///     }
///
///     fn execute(&self, param: Option<&str>) -> Result<Option<String>, HandlerError> {
///         Ok(Some(format!("exported {}", param.unwrap_or("all"))))
///     }
/// }
///
/// assert_eq!(Export.execute(None).unwrap().as_deref(), Some("exported all"));
/// ```
pub trait JobHandler: Send + Sync {
    /// Name of the handler type.
    fn name(&self) -> &str;

    /// Run the job logic once.
    ///
    /// Returns an optional human-readable result message.
    fn execute(&self, param: Option<&str>) -> Result<Option<String>, HandlerError>;

    /// Run the job logic once, giving up after `limit`.
    ///
    /// Handlers that can interrupt themselves return `HandlerError::Timeout`
    /// once `limit` has passed. The default runs [`execute`](Self::execute)
    /// unbounded and leaves enforcing the limit to the caller.
    fn execute_with_timeout(
        &self,
        param: Option<&str>,
        _limit: Duration,
    ) -> Result<Option<String>, HandlerError> {
        self.execute(param)
    }

    /// Opt into dependency injection.
    ///
    /// Default implementation returns `None` (no injectable dependencies).
    fn as_injectable(&mut self) -> Option<&mut dyn Injectable> {
        None
    }
}

/// Resolves named components for dependency injection.
pub trait ComponentLookup: Send + Sync {
    /// Look up a component by name.
    fn lookup(&self, name: &str) -> Option<Value>;
}

/// Outcome of a best-effort injection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InjectionReport {
    /// Dependencies that were resolved and assigned.
    pub injected: Vec<String>,
    /// Dependencies that could not be resolved and were left unset.
    pub missing: Vec<String>,
}

impl InjectionReport {
    /// Whether every declared dependency was resolved.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Handlers that accept dependencies from a component lookup.
///
/// Resolution is best effort: each dependency that cannot be resolved is
/// reported as missing and left unset; it never fails the whole handler.
pub trait Injectable {
    /// Populate dependencies from `lookup`.
    fn resolve(&mut self, lookup: &dyn ComponentLookup) -> InjectionReport;
}

/// A thread-safe, name-keyed component registry.
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    components: RwLock<HashMap<String, Value>>,
}

impl ComponentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-populated with components.
    pub fn from_map(components: HashMap<String, Value>) -> Self {
        Self {
            components: RwLock::new(components),
        }
    }

    /// Register (or replace) a component.
    pub fn register(&self, name: impl Into<String>, component: Value) {
        if let Ok(mut components) = self.components.write() {
            components.insert(name.into(), component);
        }
    }

    /// Number of registered components.
    pub fn len(&self) -> usize {
        self.components.read().map(|c| c.len()).unwrap_or(0)
    }

    /// Whether no components are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ComponentLookup for ComponentRegistry {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.components.read().ok()?.get(name).cloned()
    }
}

/// Named handlers for `GlueType::Bean` jobs.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own name, replacing any previous one.
    pub fn register(&self, handler: Arc<dyn JobHandler>) {
        let name = handler.name().to_string();
        if let Ok(mut handlers) = self.handlers.write() {
            if handlers.insert(name.clone(), handler).is_some() {
                tracing::info!(handler = %name, "Replaced job handler");
            }
        }
    }

    /// Look up a handler by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.read().ok()?.get(name).cloned()
    }

    /// Names of all registered handlers, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .handlers
            .read()
            .map(|h| h.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoHandler {
        name: String,
    }

    impl JobHandler for EchoHandler {
        fn name(&self) -> &str {
            &self.name
        }

        fn execute(&self, param: Option<&str>) -> Result<Option<String>, HandlerError> {
            Ok(param.map(str::to_string))
        }
    }

    /// Handler that records a dependency when resolvable.
    struct NeedsStore {
        store: Option<Value>,
        cache: Option<Value>,
    }

    impl JobHandler for NeedsStore {
        fn name(&self) -> &str {
            "needsStore"
        }

        fn execute(&self, _param: Option<&str>) -> Result<Option<String>, HandlerError> {
            Ok(None)
        }

        fn as_injectable(&mut self) -> Option<&mut dyn Injectable> {
            Some(self)
        }
    }

    impl Injectable for NeedsStore {
        fn resolve(&mut self, lookup: &dyn ComponentLookup) -> InjectionReport {
            let mut report = InjectionReport::default();
            for (name, slot) in [("store", &mut self.store), ("cache", &mut self.cache)] {
                match lookup.lookup(name) {
                    Some(value) => {
                        *slot = Some(value);
                        report.injected.push(name.to_string());
                    }
                    None => report.missing.push(name.to_string()),
                }
            }
            report
        }
    }

    #[test]
    fn test_handler_registry_lookup() {
        let registry = HandlerRegistry::new();
        registry.register(Arc::new(EchoHandler {
            name: "echo".into(),
        }));

        let handler = registry.get("echo").unwrap();
        assert_eq!(handler.execute(Some("hi")).unwrap().as_deref(), Some("hi"));
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.names(), vec!["echo".to_string()]);
    }

    #[test]
    fn test_component_registry_lookup() {
        let registry = ComponentRegistry::new();
        registry.register("store", json!({"url": "mem://"}));

        assert_eq!(registry.lookup("store"), Some(json!({"url": "mem://"})));
        assert!(registry.lookup("cache").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_partial_injection_is_reported_not_fatal() {
        let registry = ComponentRegistry::new();
        registry.register("store", json!("primary"));

        let mut handler = NeedsStore {
            store: None,
            cache: None,
        };
        let report = handler.as_injectable().unwrap().resolve(&registry);

        assert_eq!(report.injected, vec!["store".to_string()]);
        assert_eq!(report.missing, vec!["cache".to_string()]);
        assert!(!report.is_complete());
        assert_eq!(handler.store, Some(json!("primary")));
        assert!(handler.cache.is_none());
    }

    #[test]
    fn test_default_handler_is_not_injectable() {
        let mut handler = EchoHandler { name: "e".into() };
        assert!(handler.as_injectable().is_none());
    }
}
