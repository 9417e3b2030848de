//! Handler registry keyed by node kind tag.

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::EngineError;
use crate::handler::NodeHandler;
use crate::handlers;

/// Thread-safe registry of node handlers.
///
/// Handlers are registered by kind tag (e.g. `"for_each"`) and looked up at
/// dispatch time. `Custom` nodes use their `handler` field as the tag, so any
/// key can be added.
///
/// ```rust,ignore
/// let registry = HandlerRegistry::with_builtins();
/// registry.register("record", Arc::new(RecordHandler::default()));
/// ```
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// A registry holding a handler for every built-in node kind.
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        handlers::register_builtins(&registry);
        registry
    }

    /// Register a handler. Replaces any handler under the same key.
    pub fn register(&self, key: impl Into<String>, handler: Arc<dyn NodeHandler>) {
        let key = key.into();
        tracing::info!(kind = %key, "registered node handler");
        self.handlers.insert(key, handler);
    }

    /// Look up the handler for `key`.
    pub fn get(&self, key: &str) -> Result<Arc<dyn NodeHandler>, EngineError> {
        self.handlers
            .get(key)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| EngineError::handler_not_found(key))
    }

    /// Check if a handler is registered for `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.handlers.contains_key(key)
    }

    /// Remove a handler by key.
    pub fn remove(&self, key: &str) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.remove(key).map(|(_, v)| v)
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// All registered keys.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.handlers.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("len", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_execution::{ReportNode, ReportNodeStatus};
    use arbor_plan::PlanNode;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use crate::context::ExecutionContext;

    struct Noop;

    #[async_trait]
    impl NodeHandler for Noop {
        async fn execute(
            &self,
            _ctx: &ExecutionContext,
            _node: &PlanNode,
            _report: &mut ReportNode,
        ) -> Result<ReportNodeStatus, EngineError> {
            Ok(ReportNodeStatus::Passed)
        }
    }

    #[test]
    fn register_and_lookup() {
        let reg = HandlerRegistry::new();
        reg.register("noop", Arc::new(Noop));
        assert!(reg.contains("noop"));
        assert_eq!(reg.len(), 1);
        assert!(reg.get("noop").is_ok());
    }

    #[test]
    fn lookup_missing_returns_error() {
        let reg = HandlerRegistry::new();
        let err = reg.get("teleport").err().unwrap();
        assert!(matches!(err, EngineError::HandlerNotFound { kind } if kind == "teleport"));
    }

    #[test]
    fn register_replaces_and_remove_drops() {
        let reg = HandlerRegistry::new();
        reg.register("noop", Arc::new(Noop));
        reg.register("noop", Arc::new(Noop));
        assert_eq!(reg.len(), 1);
        assert!(reg.remove("noop").is_some());
        assert!(reg.is_empty());
    }

    #[test]
    fn builtins_cover_every_kind() {
        let reg = HandlerRegistry::with_builtins();
        let mut keys = reg.keys();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "after_sequence",
                "after_thread",
                "assert",
                "before_sequence",
                "before_thread",
                "call_function",
                "call_plan",
                "case",
                "check",
                "echo",
                "for",
                "for_each",
                "if",
                "retry_if_fails",
                "return",
                "select",
                "sequence",
                "session",
                "set",
                "sleep",
                "switch",
                "synchronized",
                "test_case",
                "test_scenario",
                "test_set",
                "thread_group",
                "wait_and_poll",
            ]
        );
    }
}
