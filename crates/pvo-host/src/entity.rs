use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// States the host uses for an entity it cannot currently read.
const UNAVAILABLE_STATES: &[&str] = &["unavailable", "unknown", ""];

/// One telemetry entity: a string state plus an attribute map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

impl EntityState {
    pub fn new(entity_id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            state: state.into(),
            attributes: Map::new(),
            last_updated: Utc::now(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: Value) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    /// `false` when the host reports the entity as unavailable or unknown.
    pub fn is_available(&self) -> bool {
        !UNAVAILABLE_STATES.contains(&self.state.trim())
    }

    /// Numeric reading, if the entity is available and its state parses.
    pub fn as_f64(&self) -> Option<f64> {
        if !self.is_available() {
            return None;
        }
        self.state.trim().parse::<f64>().ok()
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }
}

// ---------------------------------------------------------------------------
// Reboot-monitor signals
// ---------------------------------------------------------------------------

/// Kind of signal usable to detect a device restart.
///
/// Declaration order is preference order: `Uptime` is the most reliable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Monotonic uptime counter; a decrease means the device restarted.
    Uptime,
    /// Binary health/availability flag.
    Health,
    /// Signal-strength reading; only its availability is meaningful.
    SignalStrength,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Uptime => "uptime",
            SignalKind::Health => "health",
            SignalKind::SignalStrength => "signal_strength",
        }
    }
}

/// A resolved telemetry signal for one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalHandle {
    pub kind: SignalKind,
    pub entity_id: String,
}

impl SignalHandle {
    pub fn new(kind: SignalKind, entity_id: impl Into<String>) -> Self {
        Self {
            kind,
            entity_id: entity_id.into(),
        }
    }

    /// Whether `state` counts as "device online" for this signal kind.
    ///
    /// Health flags additionally treat an explicit `off` as offline.
    pub fn is_online(&self, state: &EntityState) -> bool {
        if !state.is_available() {
            return false;
        }
        match self.kind {
            SignalKind::Health => !state.state.trim().eq_ignore_ascii_case("off"),
            SignalKind::Uptime | SignalKind::SignalStrength => true,
        }
    }
}
