//! Restart-device operation.
//!
//! Sends the restart command through [`DeviceControl`], then watches for the
//! reboot with the same [`RebootMonitor`] the flash postcheck uses, bounded by
//! `restart.max_wait_secs`. Not seeing a reboot is a warning, not a failure.
//! A device with no monitor signal is reported successful right after the
//! command, with nothing observed.

use std::sync::Arc;
use std::time::Duration;

use pvo_config::OpsConfig;
use pvo_host::{CommandError, DeviceControl, Telemetry};
use pvo_ops::{ProgressHandle, ReasonCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{MonitorSettings, RebootEvidence, RebootMonitor, RebootOutcome};

/// Name the restart runs under in the operation lock.
pub const RESTART_OPERATION: &str = "restart_device";

/// Progress once the command is delivered; watching fills the rest.
const COMMAND_SENT_PCT: i64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartRequest {
    pub device_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartStatus {
    Success,
    Warn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartReport {
    pub device_id: String,
    pub restart_entity: String,
    pub status: RestartStatus,
    /// `None` when the device exposes no monitor signal.
    pub offline_detected: Option<bool>,
    pub online_detected: Option<bool>,
    pub reboot: RebootOutcome,
    pub message: Option<String>,
}

#[derive(Debug, Error)]
pub enum RestartError {
    #[error("{0}")]
    Command(#[from] CommandError),
}

impl ReasonCode for RestartError {
    fn reason_code(&self) -> &'static str {
        match self {
            RestartError::Command(CommandError::NoRestartEntity(_)) => "restart_unavailable",
        }
    }
}

pub struct DeviceRestart {
    telemetry: Arc<dyn Telemetry>,
    control: Arc<dyn DeviceControl>,
    monitor: MonitorSettings,
    max_wait: Duration,
}

impl DeviceRestart {
    pub fn new(
        config: &OpsConfig,
        telemetry: Arc<dyn Telemetry>,
        control: Arc<dyn DeviceControl>,
    ) -> Self {
        let f = &config.flash;
        let max_wait = config.restart.max_wait();
        let max_polls = (max_wait.as_secs() / f.poll_interval_secs.max(1)).max(1);
        let monitor = MonitorSettings {
            poll_interval: f.poll_interval(),
            max_polls: u32::try_from(max_polls).unwrap_or(u32::MAX),
            unmonitored_wait: Duration::ZERO,
        };
        Self {
            telemetry,
            control,
            monitor,
            max_wait,
        }
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        self.monitor
    }

    pub async fn run(
        &self,
        req: &RestartRequest,
        progress: Option<&ProgressHandle>,
    ) -> Result<RestartReport, RestartError> {
        let device_id = req.device_id.as_str();
        info!(device = %device_id, "restart requested");

        let monitor = RebootMonitor::new(self.telemetry.as_ref(), self.monitor);
        let plan = monitor.arm(device_id);

        let restart_entity = self.control.request_restart(device_id).map_err(|e| {
            error!(device = %device_id, error = %e, "restart command not delivered");
            e
        })?;
        if let Some(p) = progress {
            p.report(COMMAND_SENT_PCT, Some("restart sent"));
        }

        let reboot = monitor
            .watch(&plan, |pct| {
                if let Some(p) = progress {
                    let scaled = COMMAND_SENT_PCT + i64::from(pct) * (100 - COMMAND_SENT_PCT) / 100;
                    p.report(scaled, Some("waiting for reboot"));
                }
            })
            .await;

        let wait = self.max_wait.as_secs();
        let (status, offline, online, message) = match &reboot {
            RebootOutcome::Confirmed { via, .. } => {
                let offline = matches!(via, RebootEvidence::BackOnline);
                (RestartStatus::Success, Some(offline), Some(true), None)
            }
            RebootOutcome::Inconclusive {
                offline_seen: true, ..
            } => (
                RestartStatus::Warn,
                Some(true),
                Some(false),
                Some(format!(
                    "Device offline detected but did not come back online within {wait}s"
                )),
            ),
            RebootOutcome::Inconclusive { .. } => (
                RestartStatus::Warn,
                Some(false),
                Some(false),
                Some(format!(
                    "No reboot detected within {wait}s (device may not have restarted)"
                )),
            ),
            RebootOutcome::Unmonitored { .. } => (RestartStatus::Success, None, None, None),
        };
        match &message {
            Some(m) => warn!(device = %device_id, message = %m, "restart not confirmed"),
            None => info!(device = %device_id, outcome = ?reboot, "restart finished"),
        }

        Ok(RestartReport {
            device_id: device_id.to_string(),
            restart_entity,
            status,
            offline_detected: offline,
            online_detected: online,
            reboot,
            message,
        })
    }
}
