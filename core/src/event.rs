use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Event key type
pub type EventKey = String;

/// Event payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    Empty,
    String(String),
    Map(HashMap<String, serde_json::Value>),
}

/// Build progress event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildEvent {
    /// Event key (e.g., "layer.committed", "build.finished")
    pub key: EventKey,

    /// Identifier of the build that produced the event
    pub build_id: String,

    /// Event payload
    pub payload: EventPayload,

    /// Timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl BuildEvent {
    /// Create a new event
    pub fn new(key: impl Into<String>, build_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            key: key.into(),
            build_id: build_id.into(),
            payload,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Create an event with no payload
    pub fn empty(key: impl Into<String>, build_id: impl Into<String>) -> Self {
        Self::new(key, build_id, EventPayload::Empty)
    }

    /// Create an event with a string payload
    pub fn with_string(
        key: impl Into<String>,
        build_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(key, build_id, EventPayload::String(message.into()))
    }

    /// Create an event with a map payload
    pub fn with_map(
        key: impl Into<String>,
        build_id: impl Into<String>,
        map: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self::new(key, build_id, EventPayload::Map(map))
    }
}

/// Event emitter
#[derive(Clone)]
pub struct EventEmitter {
    sender: Arc<broadcast::Sender<BuildEvent>>,
}

impl EventEmitter {
    /// Create a new event emitter
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Emit an event. Having no subscribers is not an error.
    pub fn emit(&self, event: BuildEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<BuildEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
