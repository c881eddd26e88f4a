//! Runtime Events
//!
//! Observability channel for the host: lifecycle transitions and action
//! state changes are published here and forwarded to connected sessions
//! by the WebSocket layer. Publishing never blocks a Cell's worker.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// An event emitted by the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event type identifier (e.g., "ProjectStarted", "ActionStateChanged")
    pub event_type: String,

    /// The project this event belongs to
    pub project_id: String,

    /// Event payload data
    pub data: serde_json::Value,

    /// Timestamp when the event was created (Unix milliseconds)
    pub timestamp: u64,
}

impl Event {
    /// Create a new event with the current timestamp.
    pub fn new(
        event_type: impl Into<String>,
        project_id: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            project_id: project_id.into(),
            data,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        }
    }
}

/// A handle for publishing events.
#[derive(Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<Event>,
}

impl EventPublisher {
    /// Create a new event publisher over a broadcast channel.
    pub fn new(tx: broadcast::Sender<Event>) -> Self {
        Self { tx }
    }

    /// Publish an event. Lagging or absent receivers are not an error.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    /// Create and publish an event.
    pub fn emit(
        &self,
        event_type: impl Into<String>,
        project_id: impl Into<String>,
        data: serde_json::Value,
    ) {
        self.publish(Event::new(event_type, project_id, data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_carries_payload() {
        let event = Event::new("TestEvent", "p1", serde_json::json!({"value": 42}));
        assert_eq!(event.event_type, "TestEvent");
        assert_eq!(event.project_id, "p1");
        assert_eq!(event.data["value"], serde_json::json!(42));
    }

    #[tokio::test]
    async fn publish_reaches_subscribers() {
        let (tx, mut rx) = broadcast::channel(16);
        let publisher = EventPublisher::new(tx);
        publisher.emit("ActionStateChanged", "p1", serde_json::json!({"slug": "sync"}));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, "ActionStateChanged");
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        let (tx, _) = broadcast::channel(16);
        EventPublisher::new(tx).emit("ProjectStarted", "p1", serde_json::Value::Null);
    }
}
