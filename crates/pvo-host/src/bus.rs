//! In-memory host state and event bus.
//!
//! `HostState` keeps the latest value of every entity and fans out events on
//! a `tokio::sync::broadcast` channel. It owns nothing async itself, so the
//! collaborator traits stay synchronous.

use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::debug;

use crate::{
    topics, CommandError, DeviceControl, EntityState, EventSink, SignalHandle, SignalKind, Telemetry,
};

// ---------------------------------------------------------------------------
// HostEvent
// ---------------------------------------------------------------------------

/// One published notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostEvent {
    pub topic: String,
    pub payload: Value,
    pub ts_utc: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Entity naming
// ---------------------------------------------------------------------------

/// Per-device entity id templates. `{device}` is replaced by the device id.
///
/// Resolution is explicit: each capability maps to a fixed list of templates
/// tried in order. Nothing is found by scanning entity names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEntityPatterns {
    pub address: Vec<String>,
    pub uptime: Vec<String>,
    pub health: Vec<String>,
    pub signal_strength: Vec<String>,
    /// Restart switches first, then buttons.
    pub restart: Vec<String>,
}

impl Default for DeviceEntityPatterns {
    fn default() -> Self {
        Self {
            address: vec![
                "text_sensor.{device}_ip_adresse".to_string(),
                "sensor.{device}_ip_adresse".to_string(),
                "text_sensor.{device}_ip_address".to_string(),
                "sensor.{device}_ip_address".to_string(),
            ],
            uptime: vec!["sensor.{device}_uptime_device".to_string()],
            health: vec!["binary_sensor.{device}_health".to_string()],
            signal_strength: vec!["sensor.{device}_wifi_signal_device".to_string()],
            restart: [
                "switch.{device}_restart",
                "switch.{device}_restart_device",
                "switch.{device}_reboot",
                "switch.{device}_neustart",
                "switch.{device}_restart_esp",
                "button.{device}_restart",
                "button.{device}_restart_device",
                "button.{device}_reboot",
            ]
            .iter()
            .map(|t| t.to_string())
            .collect(),
        }
    }
}

impl DeviceEntityPatterns {
    fn expand(templates: &[String], device_id: &str) -> Vec<String> {
        templates
            .iter()
            .map(|t| t.replace("{device}", device_id))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// HostState
// ---------------------------------------------------------------------------

pub struct HostState {
    entities: RwLock<BTreeMap<String, EntityState>>,
    bus: broadcast::Sender<HostEvent>,
    patterns: DeviceEntityPatterns,
}

impl Default for HostState {
    fn default() -> Self {
        Self::new()
    }
}

impl HostState {
    pub fn new() -> Self {
        Self::with_patterns(DeviceEntityPatterns::default())
    }

    pub fn with_patterns(patterns: DeviceEntityPatterns) -> Self {
        let (bus, _rx) = broadcast::channel::<HostEvent>(1024);
        Self {
            entities: RwLock::new(BTreeMap::new()),
            bus,
            patterns,
        }
    }

    /// Subscribe to every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.bus.subscribe()
    }

    /// Insert or replace an entity and announce the change.
    pub fn set_entity(&self, state: EntityState) {
        let entity_id = state.entity_id.clone();
        let new_state = state.state.clone();
        {
            let mut map = self.entities.write().unwrap_or_else(|e| e.into_inner());
            map.insert(entity_id.clone(), state);
        }
        debug!(entity_id = %entity_id, state = %new_state, "entity updated");
        self.publish(
            topics::STATE_CHANGED,
            json!({ "entity_id": entity_id, "state": new_state }),
        );
    }

    /// Convenience for tests and ingestion: update only the state string,
    /// keeping existing attributes.
    pub fn set_state(&self, entity_id: &str, state: &str) {
        let mut next = self
            .entity(entity_id)
            .unwrap_or_else(|| EntityState::new(entity_id, state));
        next.state = state.to_string();
        next.last_updated = Utc::now();
        self.set_entity(next);
    }

    pub fn remove_entity(&self, entity_id: &str) -> Option<EntityState> {
        let mut map = self.entities.write().unwrap_or_else(|e| e.into_inner());
        map.remove(entity_id)
    }

    fn first_present(&self, candidates: &[String]) -> Option<String> {
        let map = self.entities.read().unwrap_or_else(|e| e.into_inner());
        candidates.iter().find(|id| map.contains_key(*id)).cloned()
    }
}

impl EventSink for HostState {
    fn publish(&self, topic: &str, payload: Value) {
        // No subscribers is not an error.
        let _ = self.bus.send(HostEvent {
            topic: topic.to_string(),
            payload,
            ts_utc: Utc::now(),
        });
    }
}

impl Telemetry for HostState {
    fn entity(&self, entity_id: &str) -> Option<EntityState> {
        let map = self.entities.read().unwrap_or_else(|e| e.into_inner());
        map.get(entity_id).cloned()
    }

    fn entities_with_prefix(&self, prefix: &str) -> Vec<EntityState> {
        let map = self.entities.read().unwrap_or_else(|e| e.into_inner());
        map.range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn device_address(&self, device_id: &str) -> Option<String> {
        let candidates = DeviceEntityPatterns::expand(&self.patterns.address, device_id);
        let map = self.entities.read().unwrap_or_else(|e| e.into_inner());
        candidates
            .iter()
            .filter_map(|id| map.get(id))
            .find(|e| e.is_available())
            .map(|e| e.state.trim().to_string())
    }

    fn monitor_signals(&self, device_id: &str) -> Vec<SignalHandle> {
        let ranked = [
            (SignalKind::Uptime, &self.patterns.uptime),
            (SignalKind::Health, &self.patterns.health),
            (SignalKind::SignalStrength, &self.patterns.signal_strength),
        ];

        ranked
            .into_iter()
            .filter_map(|(kind, templates)| {
                let candidates = DeviceEntityPatterns::expand(templates, device_id);
                self.first_present(&candidates)
                    .map(|entity_id| SignalHandle::new(kind, entity_id))
            })
            .collect()
    }
}

/// The command is published on [`topics::DEVICE_COMMAND`]; the host platform
/// turns it into the service call (`button.press` or `switch.turn_on`).
impl DeviceControl for HostState {
    fn request_restart(&self, device_id: &str) -> Result<String, CommandError> {
        let candidates = DeviceEntityPatterns::expand(&self.patterns.restart, device_id);
        let entity_id = self
            .first_present(&candidates)
            .ok_or_else(|| CommandError::NoRestartEntity(device_id.to_string()))?;
        let service = if entity_id.starts_with("button.") {
            "button.press"
        } else {
            "switch.turn_on"
        };
        debug!(device = %device_id, entity_id = %entity_id, service, "restart requested");
        self.publish(
            topics::DEVICE_COMMAND,
            json!({
                "device_id": device_id,
                "command": "restart",
                "entity_id": entity_id,
                "service": service,
            }),
        );
        Ok(entity_id)
    }
}
