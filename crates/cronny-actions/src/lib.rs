//! # Cronny Actions
//!
//! Built-in action executors and the name-to-executor registry.
//!
//! The registry is the only coupling between a job's template and the
//! code that runs: a `JobTemplate` names an executor, the workflow engine
//! looks it up here, validates the required keys, and runs it under the
//! job's deadline. `register` is public so out-of-tree executors can be
//! added without touching the engine.

pub mod docker_registry;
pub mod http;
pub mod logger;
pub mod slack;

pub use docker_registry::DockerRegistryAction;
pub use http::HttpAction;
pub use logger::LoggerAction;
pub use slack::SlackAction;

use cronny_core::ActionExecutor;
use std::collections::HashMap;
use std::sync::Arc;

/// Name-to-executor map, populated at startup.
pub struct ActionRegistry {
    executors: HashMap<&'static str, Arc<dyn ActionExecutor>>,
}

impl ActionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// A registry holding the built-in executors:
    /// `http`, `logger`, `slack`, `docker-registry`.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(HttpAction::new()));
        registry.register(Arc::new(LoggerAction::new()));
        registry.register(Arc::new(SlackAction::new()));
        registry.register(Arc::new(DockerRegistryAction::new()));
        registry
    }

    /// Register an executor under its own name. Later registrations win.
    pub fn register(&mut self, executor: Arc<dyn ActionExecutor>) {
        self.executors.insert(executor.name(), executor);
    }

    /// Look up an executor by template name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionExecutor>> {
        self.executors.get(name).cloned()
    }

    /// Registered executor names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.executors.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names() {
        let registry = ActionRegistry::builtin();
        assert_eq!(
            registry.names(),
            vec!["docker-registry", "http", "logger", "slack"]
        );
        assert!(registry.get("http").is_some());
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn test_register_out_of_tree() {
        use async_trait::async_trait;
        use cronny_core::{ActionKey, Input, Output, Result};

        struct NoopAction;

        #[async_trait]
        impl cronny_core::ActionExecutor for NoopAction {
            fn name(&self) -> &'static str {
                "noop"
            }
            fn required_keys(&self) -> Vec<ActionKey> {
                vec![]
            }
            async fn execute(&self, _input: Input) -> Result<Output> {
                Ok(Output::new())
            }
        }

        let mut registry = ActionRegistry::new();
        registry.register(Arc::new(NoopAction));
        assert!(registry.get("noop").is_some());
    }
}
