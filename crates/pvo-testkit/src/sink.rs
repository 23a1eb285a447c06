use std::sync::Mutex;

use pvo_host::EventSink;
use serde_json::Value;

/// Event sink that keeps every `(topic, payload)` in publish order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(String, Value)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, Value)> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn payloads(&self, topic: &str) -> Vec<Value> {
        self.events()
            .into_iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p)
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, topic: &str, payload: Value) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((topic.to_string(), payload));
    }
}
