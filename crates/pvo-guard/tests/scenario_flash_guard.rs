//! Flash guard decisions over the status entity.
//!
//! GREEN when every block reason is produced with an actionable message, a
//! fresh `pass` is the only unconditional pass, and `warn` passes only with
//! strict gating off.

use chrono::{Duration, TimeZone, Utc};
use pvo_config::GateSettings;
use pvo_guard::{check_flash_guards, BlockReason};
use pvo_host::{EntityState, HostState, STATUS_ENTITY};
use serde_json::json;

fn now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn host_with_gates(overall: &str, age: Duration) -> HostState {
    let host = HostState::new();
    host.set_entity(
        EntityState::new(STATUS_ENTITY, "idle")
            .with_attribute("gates_overall", json!(overall))
            .with_attribute("gates_last_run", json!((now() - age).to_rfc3339()))
            .with_attribute("gates_fail", json!(["G3_nvs_free"]))
            .with_attribute("gates_warn", json!(["G5_wifi_rssi"])),
    );
    host
}

#[test]
fn missing_status_entity_blocks() {
    let host = HostState::new();
    let d = check_flash_guards(&host, now(), &GateSettings::default());
    assert!(!d.passed);
    assert_eq!(d.block_reason, Some(BlockReason::GatesMissing));
}

#[test]
fn gates_never_run_blocks_with_run_gates_hint() {
    let host = HostState::new();
    host.set_entity(EntityState::new(STATUS_ENTITY, "idle").with_attribute("gates_overall", json!(null)));
    let d = check_flash_guards(&host, now(), &GateSettings::default());
    assert_eq!(d.block_reason, Some(BlockReason::GatesMissing));
    assert!(d.message.contains("Run Gates"), "{}", d.message);
}

#[test]
fn fresh_pass_is_permitted() {
    let host = host_with_gates("pass", Duration::minutes(3));
    let d = check_flash_guards(&host, now(), &GateSettings::default());
    assert!(d.passed, "{d:?}");
    assert_eq!(d.block_reason, None);
}

#[test]
fn stale_gates_block_with_age_in_message() {
    let host = host_with_gates("pass", Duration::minutes(25));
    let d = check_flash_guards(&host, now(), &GateSettings::default());
    assert_eq!(d.block_reason, Some(BlockReason::GatesStale));
    assert_eq!(d.message, "Gates expired (25min old) - run gates again");
}

#[test]
fn freshness_window_is_configurable() {
    let host = host_with_gates("pass", Duration::minutes(25));
    let settings = GateSettings {
        freshness_minutes: 30,
        ..GateSettings::default()
    };
    assert!(check_flash_guards(&host, now(), &settings).passed);
}

#[test]
fn failed_gates_always_block() {
    let host = host_with_gates("fail", Duration::minutes(1));
    let relaxed = GateSettings {
        strict: false,
        ..GateSettings::default()
    };
    let d = check_flash_guards(&host, now(), &relaxed);
    assert_eq!(d.block_reason, Some(BlockReason::GatesFailed));
    assert!(d.message.contains("G3_nvs_free"));
}

#[test]
fn warn_blocks_only_under_strict_gating() {
    let host = host_with_gates("warn", Duration::minutes(1));

    let strict = check_flash_guards(&host, now(), &GateSettings::default());
    assert_eq!(strict.block_reason, Some(BlockReason::GatesWarned));
    assert!(strict.message.contains("G5_wifi_rssi"));

    let relaxed = GateSettings {
        strict: false,
        ..GateSettings::default()
    };
    let d = check_flash_guards(&host, now(), &relaxed);
    assert!(d.passed);
}

#[test]
fn garbage_timestamp_blocks_as_invalid() {
    let host = HostState::new();
    host.set_entity(
        EntityState::new(STATUS_ENTITY, "idle")
            .with_attribute("gates_overall", json!("pass"))
            .with_attribute("gates_last_run", json!("last tuesday")),
    );
    let d = check_flash_guards(&host, now(), &GateSettings::default());
    assert_eq!(d.block_reason, Some(BlockReason::InvalidTimestamp));
}

#[test]
fn unknown_overall_value_is_not_acceptable() {
    let host = host_with_gates("pending", Duration::minutes(1));
    let d = check_flash_guards(&host, now(), &GateSettings::default());
    assert_eq!(d.block_reason, Some(BlockReason::GatesFailed));
    assert_eq!(d.message, "Gates status 'pending' not acceptable");
}
