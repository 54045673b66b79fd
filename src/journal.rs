//! Append-only run event journal.
//!
//! The journal is the source of truth for what happened during a run: every
//! state transition is appended here before the run store is touched, so a
//! consumer can rebuild any run's timeline from its events alone. Events are
//! never mutated or deleted. The separate [`ServerLog`] facility holds
//! free-form server log lines and is the only thing `clear` applies to.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    NodeStarted,
    NodeLog,
    NodeRetry,
    NodeError,
    NodeSuccess,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NodeStarted => write!(f, "node_started"),
            Self::NodeLog => write!(f, "node_log"),
            Self::NodeRetry => write!(f, "node_retry"),
            Self::NodeError => write!(f, "node_error"),
            Self::NodeSuccess => write!(f, "node_success"),
        }
    }
}

/// One journal entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub node_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_attempt: Option<u32>,
}

impl Event {
    fn new(node_id: &str, event_type: EventType, timestamp: DateTime<Utc>) -> Self {
        Self {
            node_id: node_id.to_string(),
            event_type,
            timestamp,
            log: None,
            error: None,
            data: None,
            retry_attempt: None,
        }
    }

    /// A node began executing.
    pub fn started(node_id: &str, timestamp: DateTime<Utc>) -> Self {
        Self::new(node_id, EventType::NodeStarted, timestamp)
    }

    /// A log line emitted by the step while running.
    pub fn log(node_id: &str, timestamp: DateTime<Utc>, line: impl Into<String>) -> Self {
        let mut event = Self::new(node_id, EventType::NodeLog, timestamp);
        event.log = Some(line.into());
        event
    }

    /// A retry is about to re-invoke the step.
    pub fn retry(node_id: &str, timestamp: DateTime<Utc>, attempt: u32) -> Self {
        let mut event = Self::new(node_id, EventType::NodeRetry, timestamp);
        event.retry_attempt = Some(attempt);
        event
    }

    /// The step failed.
    pub fn error(node_id: &str, timestamp: DateTime<Utc>, message: impl Into<String>) -> Self {
        let mut event = Self::new(node_id, EventType::NodeError, timestamp);
        event.error = Some(message.into());
        event
    }

    /// The step succeeded with a payload.
    pub fn success(node_id: &str, timestamp: DateTime<Utc>, data: Value) -> Self {
        let mut event = Self::new(node_id, EventType::NodeSuccess, timestamp);
        event.data = Some(data);
        event
    }
}

/// Append-only, per-run event log.
///
/// Appends to the same run are serialized by the per-key entry lock; appends
/// to different runs proceed independently. Reading is side-effect free and
/// returns a snapshot in append order.
#[derive(Default)]
pub struct EventJournal {
    events: DashMap<String, Vec<Event>>,
}

impl EventJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event to a run's journal.
    pub fn append(&self, run_id: &str, event: Event) {
        self.events.entry(run_id.to_string()).or_default().push(event);
    }

    /// All events for a run, in append order.
    pub fn events(&self, run_id: &str) -> Vec<Event> {
        self.events
            .get(run_id)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    /// Number of events journaled for a run.
    pub fn len(&self, run_id: &str) -> usize {
        self.events.get(run_id).map(|entry| entry.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, run_id: &str) -> bool {
        self.len(run_id) == 0
    }
}

/// Free-form server log lines with an explicit clear operation.
///
/// This is deliberately separate from the run journal: clearing server logs
/// must never touch run history.
#[derive(Default)]
pub struct ServerLog {
    lines: std::sync::Mutex<Vec<ServerLogLine>>,
}

/// One server log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerLogLine {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl ServerLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, Vec<ServerLogLine>> {
        // A poisoned lock only means a writer panicked mid-push; the lines
        // themselves are still usable.
        self.lines.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, timestamp: DateTime<Utc>, message: impl Into<String>) {
        self.locked().push(ServerLogLine {
            timestamp,
            message: message.into(),
        });
    }

    pub fn lines(&self) -> Vec<ServerLogLine> {
        self.locked().clone()
    }

    /// Drop all server log lines.
    pub fn clear(&self) {
        self.locked().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_append_order_preserved() {
        let journal = EventJournal::new();
        let now = Utc::now();

        journal.append("run-1", Event::started("a", now));
        journal.append("run-1", Event::log("a", now, "working"));
        journal.append("run-1", Event::success("a", now, json!({"ok": true})));

        let events = journal.events("run-1");
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event_type, EventType::NodeStarted);
        assert_eq!(events[1].event_type, EventType::NodeLog);
        assert_eq!(events[2].event_type, EventType::NodeSuccess);
    }

    #[test]
    fn test_runs_are_isolated() {
        let journal = EventJournal::new();
        let now = Utc::now();

        journal.append("run-1", Event::started("a", now));
        journal.append("run-2", Event::started("b", now));

        assert_eq!(journal.len("run-1"), 1);
        assert_eq!(journal.len("run-2"), 1);
        assert_eq!(journal.events("run-1")[0].node_id, "a");
        assert!(journal.is_empty("run-3"));
    }

    #[test]
    fn test_reading_is_repeatable() {
        let journal = EventJournal::new();
        let now = Utc::now();
        journal.append("run-1", Event::retry("a", now, 1));

        let first = journal.events("run-1");
        let second = journal.events("run-1");
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].retry_attempt, Some(1));
    }

    #[tokio::test]
    async fn test_concurrent_appends_across_runs() {
        let journal = std::sync::Arc::new(EventJournal::new());
        let mut handles = Vec::new();

        for run in 0..4 {
            let journal = journal.clone();
            handles.push(tokio::spawn(async move {
                let run_id = format!("run-{}", run);
                for i in 0..50 {
                    journal.append(&run_id, Event::log("n", Utc::now(), format!("line {}", i)));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for run in 0..4 {
            let events = journal.events(&format!("run-{}", run));
            assert_eq!(events.len(), 50);
            // Per-run append order survives concurrency with other runs.
            for (i, event) in events.iter().enumerate() {
                assert_eq!(event.log.as_deref(), Some(format!("line {}", i).as_str()));
            }
        }
    }

    #[test]
    fn test_server_log_clear_is_separate() {
        let journal = EventJournal::new();
        let server_log = ServerLog::new();
        let now = Utc::now();

        journal.append("run-1", Event::started("a", now));
        server_log.push(now, "scheduler tick");
        assert_eq!(server_log.lines().len(), 1);

        server_log.clear();
        assert!(server_log.lines().is_empty());
        // Run journal untouched.
        assert_eq!(journal.len("run-1"), 1);
    }
}
