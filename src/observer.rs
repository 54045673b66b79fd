//! Observer fan-out for run lifecycle callbacks.
//!
//! Live execution and replay both publish through this surface, so a
//! subscriber cannot tell them apart except by the run's trigger. Delivery
//! is fire-and-forget over a broadcast channel; a subscriber that falls
//! behind loses old events rather than blocking the executor.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::journal::Event;

/// Maximum number of events buffered per subscriber.
const BROADCAST_CAPACITY: usize = 1024;

/// Callback events published by executors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObserverEvent {
    /// A run began.
    RunStarted { run_id: String },
    /// A journal event was appended for a running step.
    Progress { run_id: String, event: Event },
    /// A run reached a terminal status.
    RunCompleted { run_id: String, status: String },
    /// A fatal pre-execution error (the run never started).
    RunError { message: String },
}

/// Broadcast hub for observer callbacks.
#[derive(Clone)]
pub struct RunObserver {
    tx: broadcast::Sender<ObserverEvent>,
}

impl RunObserver {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx }
    }

    /// Subscribe to callback events.
    pub fn subscribe(&self) -> broadcast::Receiver<ObserverEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, event: ObserverEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    pub fn on_start(&self, run_id: &str) {
        self.publish(ObserverEvent::RunStarted {
            run_id: run_id.to_string(),
        });
    }

    pub fn on_progress(&self, run_id: &str, event: &Event) {
        self.publish(ObserverEvent::Progress {
            run_id: run_id.to_string(),
            event: event.clone(),
        });
    }

    pub fn on_complete(&self, run_id: &str, status: &str) {
        self.publish(ObserverEvent::RunCompleted {
            run_id: run_id.to_string(),
            status: status.to_string(),
        });
    }

    pub fn on_error(&self, message: &str) {
        self.publish(ObserverEvent::RunError {
            message: message.to_string(),
        });
    }
}

impl Default for RunObserver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_subscriber_sees_lifecycle_in_order() {
        let observer = RunObserver::new();
        let mut rx = observer.subscribe();

        observer.on_start("run-1");
        observer.on_progress("run-1", &Event::started("a", Utc::now()));
        observer.on_complete("run-1", "success");

        assert!(matches!(
            rx.recv().await.unwrap(),
            ObserverEvent::RunStarted { .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            ObserverEvent::Progress { .. }
        ));
        match rx.recv().await.unwrap() {
            ObserverEvent::RunCompleted { run_id, status } => {
                assert_eq!(run_id, "run-1");
                assert_eq!(status, "success");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let observer = RunObserver::new();
        observer.on_start("run-1");
        observer.on_error("boom");
    }
}
