//! Workflow type definitions.
//!
//! A workflow is a set of step nodes plus directed edges between them. The
//! node/edge snapshot handed to the executor is immutable for the duration
//! of one run.

use serde::{Deserialize, Serialize};

use super::parameters::Params;

/// A workflow definition: named node/edge snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Stable workflow identifier
    pub id: String,

    /// Human-readable workflow name
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Step nodes, in author order
    pub nodes: Vec<Node>,

    /// Directed dependencies between nodes
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Workflow {
    /// Get a node by ID.
    pub fn get_node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// A step node in the workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique node ID within this workflow
    pub id: String,

    /// Human-readable step title
    pub title: String,

    /// Source system tag (slack, gmail, sheets, ...) used to pick a handler
    pub app: String,

    /// Step parameters, insertion-ordered
    #[serde(default)]
    pub params: Params,

    /// Retry configuration; absent means a single attempt
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Node {
    /// Create a node with no params and no retry policy.
    pub fn new(id: impl Into<String>, title: impl Into<String>, app: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            app: app.into(),
            params: Params::new(),
            retry: None,
        }
    }

    /// Attach params.
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Attach a retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }
}

/// A directed dependency: `target` runs only after `source` settles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Retry configuration for a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum retry attempts (not counting the initial try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay between retries in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Backoff strategy
    #[serde(default)]
    pub backoff: BackoffType,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff: BackoffType::default(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    /// Fixed delay between retries
    #[default]
    Fixed,
    /// Linearly increasing delay
    Linear,
    /// Exponentially increasing delay
    Exponential,
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Manual,
    Schedule,
    Webhook,
    Api,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Schedule => write!(f, "schedule"),
            Self::Webhook => write!(f, "webhook"),
            Self::Api => write!(f, "api"),
        }
    }
}

impl std::str::FromStr for Trigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "schedule" => Ok(Self::Schedule),
            "webhook" => Ok(Self::Webhook),
            "api" => Ok(Self::Api),
            _ => Err(format!("Unknown trigger: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_config_defaults() {
        let config: RetryConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay_ms, 1_000);
        assert_eq!(config.backoff, BackoffType::Fixed);
    }

    #[test]
    fn test_trigger_round_trip() {
        for trigger in [
            Trigger::Manual,
            Trigger::Schedule,
            Trigger::Webhook,
            Trigger::Api,
        ] {
            let parsed: Trigger = trigger.to_string().parse().unwrap();
            assert_eq!(parsed, trigger);
        }
        assert!("cron".parse::<Trigger>().is_err());
    }

    #[test]
    fn test_node_builder() {
        let node = Node::new("fetch", "Fetch orders", "http").with_retry(RetryConfig {
            max_attempts: 5,
            base_delay_ms: 200,
            backoff: BackoffType::Exponential,
        });
        assert_eq!(node.id, "fetch");
        assert_eq!(node.retry.as_ref().unwrap().max_attempts, 5);
        assert!(node.params.is_empty());
    }
}
