//! Restart-device operation on a paused clock, run through the same runner
//! and lock as a flash.

use std::sync::Arc;

use pvo_config::OpsConfig;
use pvo_flash::{
    DeviceRestart, RebootEvidence, RebootOutcome, RestartRequest, RestartStatus, OPERATION_NAME,
    RESTART_OPERATION,
};
use pvo_host::{topics, CommandError, DeviceControl, HostState};
use pvo_ops::{OperationRunner, OperationState, OpsContext};
use pvo_testkit::{seed_device, DEVICE_ID};

fn restart_button() -> String {
    format!("button.{DEVICE_ID}_restart")
}

/// Delivers the command, then reports a fresh uptime as a rebooted device would.
struct RebootingDevice {
    host: Arc<HostState>,
    uptime_after: Option<f64>,
}

impl DeviceControl for RebootingDevice {
    fn request_restart(&self, device_id: &str) -> Result<String, CommandError> {
        let entity = self.host.request_restart(device_id)?;
        if let Some(up) = self.uptime_after {
            self.host
                .set_state(&format!("sensor.{device_id}_uptime_device"), &up.to_string());
        }
        Ok(entity)
    }
}

fn restart_for(host: &Arc<HostState>, uptime_after: Option<f64>) -> Arc<DeviceRestart> {
    let control = Arc::new(RebootingDevice {
        host: host.clone(),
        uptime_after,
    });
    Arc::new(DeviceRestart::new(&OpsConfig::default(), host.clone(), control))
}

fn runner(host: &Arc<HostState>) -> OperationRunner {
    OperationRunner::new(OpsContext::new(host.clone()))
}

fn req() -> RestartRequest {
    RestartRequest {
        device_id: DEVICE_ID.to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn uptime_reset_confirms_restart() {
    let host = Arc::new(HostState::new());
    seed_device(&host, "10.0.0.7", 500.0);
    host.set_state(&restart_button(), "unknown");
    let mut rx = host.subscribe();
    let restart = restart_for(&host, Some(4.0));

    let res = runner(&host)
        .run(RESTART_OPERATION, |p| async move {
            restart.run(&req(), Some(&p)).await
        })
        .await;

    assert!(res.success, "{:?}", res.error);
    let report = res.result.unwrap();
    assert_eq!(report.status, RestartStatus::Success);
    assert_eq!(report.restart_entity, restart_button());
    assert_eq!(report.online_detected, Some(true));
    assert_eq!(report.offline_detected, Some(false));
    assert!(report.message.is_none());
    match report.reboot {
        RebootOutcome::Confirmed {
            via: RebootEvidence::UptimeReset { before, after },
            elapsed_ms,
            ..
        } => {
            assert_eq!(before, 500.0);
            assert_eq!(after, 4.0);
            assert_eq!(elapsed_ms, 2000);
        }
        other => panic!("expected uptime confirmation, got {other:?}"),
    }

    let command = std::iter::from_fn(|| rx.try_recv().ok())
        .find(|e| e.topic == topics::DEVICE_COMMAND)
        .unwrap();
    assert_eq!(command.payload["service"], "button.press");
    assert_eq!(command.payload["device_id"], DEVICE_ID);
}

#[tokio::test(start_paused = true)]
async fn no_reboot_within_bound_is_a_warning() {
    let host = Arc::new(HostState::new());
    seed_device(&host, "10.0.0.7", 500.0);
    host.set_state(&restart_button(), "unknown");
    let restart = restart_for(&host, None);
    let runner = runner(&host);

    let res = runner
        .run(RESTART_OPERATION, |p| async move {
            restart.run(&req(), Some(&p)).await
        })
        .await;

    assert!(res.success);
    let report = res.result.unwrap();
    assert_eq!(report.status, RestartStatus::Warn);
    assert_eq!(report.offline_detected, Some(false));
    assert_eq!(report.online_detected, Some(false));
    assert_eq!(
        report.message.as_deref(),
        Some("No reboot detected within 90s (device may not have restarted)")
    );
    match report.reboot {
        RebootOutcome::Inconclusive { elapsed_ms, .. } => assert_eq!(elapsed_ms, 90_000),
        other => panic!("expected inconclusive, got {other:?}"),
    }
    let snap = runner.context().snapshot();
    assert_eq!(snap.op_state, OperationState::Success);
    assert_eq!(snap.op_progress, 100);
}

#[tokio::test(start_paused = true)]
async fn device_without_monitor_signal_succeeds_unobserved() {
    let host = Arc::new(HostState::new());
    host.set_state(&restart_button(), "unknown");
    let restart = restart_for(&host, None);

    let report = restart.run(&req(), None).await.unwrap();
    assert_eq!(report.status, RestartStatus::Success);
    assert_eq!(report.offline_detected, None);
    assert_eq!(report.online_detected, None);
    assert_eq!(report.reboot, RebootOutcome::Unmonitored { waited_ms: 0 });
}

#[tokio::test(start_paused = true)]
async fn missing_restart_entity_fails_the_operation() {
    let host = Arc::new(HostState::new());
    seed_device(&host, "10.0.0.7", 500.0);
    let restart = restart_for(&host, Some(4.0));
    let runner = runner(&host);

    let res = runner
        .run(RESTART_OPERATION, |p| async move {
            restart.run(&req(), Some(&p)).await
        })
        .await;

    assert!(!res.success);
    assert_eq!(res.reason.as_deref(), Some("restart_unavailable"));
    assert_eq!(
        res.error.as_deref(),
        Some("Restart entity not found for device: edge_haus_01")
    );
    assert!(!runner.context().lock().is_locked());
    assert_eq!(runner.context().snapshot().op_state, OperationState::Failed);
}

#[tokio::test(start_paused = true)]
async fn restart_is_refused_while_a_flash_holds_the_lock() {
    let host = Arc::new(HostState::new());
    seed_device(&host, "10.0.0.7", 500.0);
    host.set_state(&restart_button(), "unknown");
    let restart = restart_for(&host, Some(4.0));
    let runner = runner(&host);
    assert!(runner.context().lock().acquire(OPERATION_NAME));
    let mut rx = host.subscribe();

    let res = runner
        .run(RESTART_OPERATION, |p| async move {
            restart.run(&req(), Some(&p)).await
        })
        .await;

    assert!(res.is_busy());
    assert_eq!(
        res.error.as_deref(),
        Some("Operation blocked: flash_firmware already running")
    );
    // Nothing was sent to the device.
    assert!(std::iter::from_fn(|| rx.try_recv().ok()).all(|e| e.topic != topics::DEVICE_COMMAND));
}
