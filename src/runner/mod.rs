//! Step runner interface and handler registry.
//!
//! The executor does not know whether a step hits a real integration or a
//! fixture. It hands the node to whatever handler is registered for the
//! node's `app` tag and gets back a payload plus log lines. Handlers must
//! tolerate re-invocation: the retry path calls `execute` again with the
//! same node.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::workflow::Node;

/// Result of one step invocation.
#[derive(Debug, Clone)]
pub struct StepOutput {
    /// Output payload from the step
    pub data: Value,
    /// Log lines the step emitted while executing
    pub logs: Vec<String>,
}

impl StepOutput {
    /// Create an output with just a payload.
    pub fn new(data: Value) -> Self {
        Self {
            data,
            logs: Vec::new(),
        }
    }

    /// Attach log lines.
    pub fn with_logs(mut self, logs: Vec<String>) -> Self {
        self.logs = logs;
        self
    }
}

/// Trait implemented by all step handlers.
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// The app tag this handler serves (e.g. "slack", "sheets").
    fn app(&self) -> &str;

    /// Execute the step.
    async fn execute(&self, node: &Node) -> Result<StepOutput>;

    /// Get a description of this handler.
    fn description(&self) -> &str {
        "A step handler"
    }
}

/// Registry of step handlers, keyed by app tag.
///
/// The table is built at startup; lookup is exact-match on the tag, never
/// fuzzy. Unknown tags fail the step with `Error::UnknownApp`.
#[derive(Clone, Default)]
pub struct StepRegistry {
    handlers: HashMap<String, Arc<dyn StepRunner>>,
}

impl StepRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-loaded with fixture handlers for the demo apps.
    pub fn with_fixtures() -> Self {
        let mut registry = Self::new();
        for (app, payload) in fixture_catalog() {
            registry.register(Arc::new(FixtureRunner::new(app, payload)));
        }
        registry
    }

    /// Register a handler.
    pub fn register(&mut self, handler: Arc<dyn StepRunner>) {
        self.handlers.insert(handler.app().to_string(), handler);
    }

    /// Get a handler by app tag.
    pub fn get(&self, app: &str) -> Option<Arc<dyn StepRunner>> {
        self.handlers.get(app).cloned()
    }

    /// Check if an app tag is registered.
    pub fn has(&self, app: &str) -> bool {
        self.handlers.contains_key(app)
    }

    /// Execute a node through its registered handler.
    pub async fn execute(&self, node: &Node) -> Result<StepOutput> {
        let handler = self
            .get(&node.app)
            .ok_or_else(|| Error::UnknownApp(node.app.clone()))?;
        handler.execute(node).await
    }

    /// List registered app tags.
    pub fn list(&self) -> Vec<&str> {
        self.handlers.keys().map(|s| s.as_str()).collect()
    }
}

/// Fixture handler returning a canned payload for its app tag.
///
/// Used by the CLI demo path and tests; real deployments register their own
/// handlers instead.
pub struct FixtureRunner {
    app: String,
    payload: Value,
}

impl FixtureRunner {
    pub fn new(app: impl Into<String>, payload: Value) -> Self {
        Self {
            app: app.into(),
            payload,
        }
    }
}

#[async_trait]
impl StepRunner for FixtureRunner {
    fn app(&self) -> &str {
        &self.app
    }

    async fn execute(&self, node: &Node) -> Result<StepOutput> {
        Ok(StepOutput::new(self.payload.clone()).with_logs(vec![
            format!("Connecting to {}", self.app),
            format!("Step '{}' completed", node.title),
        ]))
    }

    fn description(&self) -> &str {
        "Canned fixture payload"
    }
}

/// Static fixture payloads per app tag.
fn fixture_catalog() -> Vec<(&'static str, Value)> {
    vec![
        (
            "slack",
            json!({ "ok": true, "channel": "#general", "ts": "1700000000.000100" }),
        ),
        (
            "gmail",
            json!({ "id": "msg-0001", "labelIds": ["SENT"] }),
        ),
        (
            "sheets",
            json!({ "values": [["id", "amount"], ["1001", "42.50"], ["1002", "18.00"]] }),
        ),
        (
            "http",
            json!({ "status": 200, "body": { "items": [1, 2, 3] } }),
        ),
        (
            "database",
            json!({ "rows_affected": 2 }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registry_fixture_apps() {
        let registry = StepRegistry::with_fixtures();

        assert!(registry.has("slack"));
        assert!(registry.has("gmail"));
        assert!(registry.has("sheets"));
        assert!(registry.has("http"));
        assert!(registry.has("database"));
        assert!(!registry.has("nonexistent"));
    }

    #[tokio::test]
    async fn test_registry_dispatch() {
        let registry = StepRegistry::with_fixtures();
        let node = Node::new("post", "Post message", "slack");

        let output = registry.execute(&node).await.unwrap();
        assert_eq!(output.data["ok"], true);
        assert_eq!(output.logs.len(), 2);
    }

    #[tokio::test]
    async fn test_registry_unknown_app() {
        let registry = StepRegistry::with_fixtures();
        let node = Node::new("x", "X", "fax-machine");

        let err = registry.execute(&node).await.unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_APP");
    }

    #[tokio::test]
    async fn test_custom_handler_registration() {
        struct EchoRunner;

        #[async_trait]
        impl StepRunner for EchoRunner {
            fn app(&self) -> &str {
                "echo"
            }

            async fn execute(&self, node: &Node) -> Result<StepOutput> {
                Ok(StepOutput::new(json!({ "echo": node.id })))
            }
        }

        let mut registry = StepRegistry::new();
        registry.register(Arc::new(EchoRunner));

        let output = registry
            .execute(&Node::new("n1", "Echo", "echo"))
            .await
            .unwrap();
        assert_eq!(output.data["echo"], "n1");
    }
}
