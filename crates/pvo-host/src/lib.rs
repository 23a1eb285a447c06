//! pvo-host
//!
//! Collaborator boundary between the OTA subsystem and the host platform.
//!
//! The subsystem never talks to the host directly. It consumes three narrow
//! interfaces defined here:
//! - [`Telemetry`]: entity lookups, device address resolution and ranked
//!   reboot-monitor signal handles.
//! - [`EventSink`]: publish/subscribe notifications keyed by string topic.
//! - [`SecretStore`]: per-device credential resolution (absence is normal).
//! - [`DeviceControl`]: outbound commands such as a restart request.
//!
//! [`HostState`] is an in-memory implementation of `Telemetry`, `EventSink`
//! and `DeviceControl`, used by the daemon and by tests.

mod bus;
mod entity;

pub use bus::{DeviceEntityPatterns, HostEvent, HostState};
pub use entity::{EntityState, SignalHandle, SignalKind};

use serde_json::Value;
use thiserror::Error;

/// Entity carrying the latest quality-gate summary as attributes.
pub const STATUS_ENTITY: &str = "sensor.pvautonomy_ops_status";

/// Event topics published by the subsystem.
pub mod topics {
    pub const OPERATION_STARTED: &str = "pvo_operation_started";
    pub const OPERATION_PROGRESS: &str = "pvo_operation_progress";
    pub const OPERATION_COMPLETED: &str = "pvo_operation_completed";
    pub const FLASH_STAGE: &str = "pvo_flash_stage";
    pub const STATE_CHANGED: &str = "state_changed";
    pub const DEVICE_COMMAND: &str = "pvo_device_command";
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Outbound notification channel.
///
/// Publishing is fire-and-forget: a sink with no subscribers drops the event.
pub trait EventSink: Send + Sync {
    fn publish(&self, topic: &str, payload: Value);
}

/// Read access to device telemetry exposed as key-value entities.
pub trait Telemetry: Send + Sync {
    /// Point lookup by exact entity id.
    fn entity(&self, entity_id: &str) -> Option<EntityState>;

    /// All entities whose id starts with `prefix`, ordered by id.
    fn entities_with_prefix(&self, prefix: &str) -> Vec<EntityState>;

    /// Network address (host or IP) of the device, if currently known.
    fn device_address(&self, device_id: &str) -> Option<String>;

    /// Candidate reboot-monitor signals for the device, best first.
    ///
    /// Callers try the handles in the returned order; an empty list means the
    /// device exposes nothing that can confirm a restart.
    fn monitor_signals(&self, device_id: &str) -> Vec<SignalHandle>;
}

/// Credential lookup keyed by device identifier.
///
/// `None` is a valid outcome, not an error.
pub trait SecretStore: Send + Sync {
    fn resolve(&self, device_id: &str) -> Option<String>;
}

/// Secret store that never has a credential.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSecrets;

impl SecretStore for NoSecrets {
    fn resolve(&self, _device_id: &str) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Restart entity not found for device: {0}")]
    NoRestartEntity(String),
}

/// Commands sent to a device through the host platform.
pub trait DeviceControl: Send + Sync {
    /// Ask the device to reboot. Returns the entity the command went through.
    ///
    /// Delivery only: whether the device actually restarted is for the
    /// caller to observe through [`Telemetry`].
    fn request_restart(&self, device_id: &str) -> Result<String, CommandError>;
}
