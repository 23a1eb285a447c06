//! Post-upload reboot confirmation.
//!
//! Polls one telemetry signal (the best the device exposes) at a fixed
//! interval for a bounded number of polls. The first of these ends the watch:
//! - uptime lower than the pre-upload baseline: confirmed
//! - signal seen offline, then online again: confirmed
//! - poll bound reached: inconclusive
//!
//! A device with no usable signal gets a fixed wait and is reported as
//! unmonitored.

use std::time::Duration;

use pvo_config::FlashSettings;
use pvo_host::{SignalHandle, SignalKind, Telemetry};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub max_polls: u32,
    pub unmonitored_wait: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from(&FlashSettings::default())
    }
}

impl From<&FlashSettings> for MonitorSettings {
    fn from(f: &FlashSettings) -> Self {
        Self {
            poll_interval: f.poll_interval(),
            max_polls: f.max_polls.max(1),
            unmonitored_wait: f.unmonitored_wait(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RebootEvidence {
    UptimeReset { before: f64, after: f64 },
    BackOnline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RebootOutcome {
    Confirmed {
        via: RebootEvidence,
        entity_id: String,
        elapsed_ms: u64,
    },
    Inconclusive {
        entity_id: String,
        offline_seen: bool,
        elapsed_ms: u64,
    },
    Unmonitored {
        waited_ms: u64,
    },
}

impl RebootOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, RebootOutcome::Confirmed { .. })
    }
}

/// Signal and baseline chosen before the upload starts.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorPlan {
    pub device_id: String,
    pub signal: Option<SignalHandle>,
    pub baseline_uptime: Option<f64>,
}

pub struct RebootMonitor<'a> {
    telemetry: &'a dyn Telemetry,
    settings: MonitorSettings,
}

impl<'a> RebootMonitor<'a> {
    pub fn new(telemetry: &'a dyn Telemetry, settings: MonitorSettings) -> Self {
        Self {
            telemetry,
            settings,
        }
    }

    /// Pick the best signal and record the uptime baseline. Must run before
    /// the upload, while the old firmware is still reporting.
    pub fn arm(&self, device_id: &str) -> MonitorPlan {
        let signal = self.telemetry.monitor_signals(device_id).into_iter().next();
        let baseline_uptime = signal
            .as_ref()
            .filter(|s| s.kind == SignalKind::Uptime)
            .and_then(|s| self.telemetry.entity(&s.entity_id))
            .and_then(|e| e.as_f64());
        match &signal {
            Some(s) => info!(
                device = %device_id,
                entity_id = %s.entity_id,
                kind = s.kind.as_str(),
                baseline_uptime,
                "reboot monitor armed"
            ),
            None => warn!(device = %device_id, "no monitor signal for device"),
        }
        MonitorPlan {
            device_id: device_id.to_string(),
            signal,
            baseline_uptime,
        }
    }

    /// Watch until the reboot is confirmed or the poll bound is reached.
    /// `progress` receives 0..=100 after each poll.
    pub async fn watch(&self, plan: &MonitorPlan, mut progress: impl FnMut(u8)) -> RebootOutcome {
        let started = Instant::now();

        let Some(signal) = plan.signal.as_ref() else {
            warn!(
                device = %plan.device_id,
                wait_secs = self.settings.unmonitored_wait.as_secs(),
                "no monitoring signal, waiting as fallback"
            );
            tokio::time::sleep(self.settings.unmonitored_wait).await;
            progress(100);
            return RebootOutcome::Unmonitored {
                waited_ms: started.elapsed().as_millis() as u64,
            };
        };

        let max = self.settings.max_polls;
        let mut offline_seen = false;
        for poll in 1..=max {
            tokio::time::sleep(self.settings.poll_interval).await;
            progress((u64::from(poll) * 100 / u64::from(max)) as u8);

            let Some(state) = self.telemetry.entity(&signal.entity_id) else {
                continue;
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            if !signal.is_online(&state) {
                if !offline_seen {
                    info!(device = %plan.device_id, elapsed_ms, "device offline");
                    offline_seen = true;
                }
                continue;
            }

            if signal.kind == SignalKind::Uptime {
                if let (Some(before), Some(after)) = (plan.baseline_uptime, state.as_f64()) {
                    if after < before {
                        info!(before, after, elapsed_ms, "uptime reset, reboot confirmed");
                        return RebootOutcome::Confirmed {
                            via: RebootEvidence::UptimeReset { before, after },
                            entity_id: signal.entity_id.clone(),
                            elapsed_ms,
                        };
                    }
                }
            }

            if offline_seen {
                info!(device = %plan.device_id, elapsed_ms, "device back online");
                return RebootOutcome::Confirmed {
                    via: RebootEvidence::BackOnline,
                    entity_id: signal.entity_id.clone(),
                    elapsed_ms,
                };
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if offline_seen {
            warn!(device = %plan.device_id, elapsed_ms, "device offline but not back within bound");
        } else {
            warn!(device = %plan.device_id, elapsed_ms, "no reboot detected within bound");
        }
        RebootOutcome::Inconclusive {
            entity_id: signal.entity_id.clone(),
            offline_seen,
            elapsed_ms,
        }
    }
}
