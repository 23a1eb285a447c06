use chrono::{DateTime, Utc};
use pvo_host::{EntityState, HostState, STATUS_ENTITY};
use serde_json::json;

pub const DEVICE_ID: &str = "edge_haus_01";

/// Publish a gate summary on the status entity.
pub fn set_gates(host: &HostState, overall: &str, last_run: DateTime<Utc>) {
    host.set_entity(
        EntityState::new(STATUS_ENTITY, "ok")
            .with_attribute("gates_overall", json!(overall))
            .with_attribute("gates_last_run", json!(last_run.to_rfc3339()))
            .with_attribute("gates_fail", json!([]))
            .with_attribute("gates_warn", json!([])),
    );
}

/// Address and an uptime reading for [`DEVICE_ID`].
pub fn seed_device(host: &HostState, address: &str, uptime: f64) {
    host.set_state(&format!("text_sensor.{DEVICE_ID}_ip_adresse"), address);
    host.set_state(&format!("sensor.{DEVICE_ID}_uptime_device"), &uptime.to_string());
}
