//! Shared runtime state for pvo-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The host bus doubles as
//! the event sink for operations and flash stages, so the SSE stream sees
//! every notification the subsystem publishes.

use std::sync::Arc;
use std::time::Duration;

use pvo_artifacts::{ArtifactSource, HttpArtifactSource};
use pvo_config::{secrets::secret_store_from_config, OpsConfig};
use pvo_flash::{DeviceRestart, FlashPipeline};
use pvo_host::{EventSink, HostState};
use pvo_ops::{OperationRunner, OpsContext};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Topic of the periodic keep-alive published on the host bus.
pub const HEARTBEAT_TOPIC: &str = "pvo_heartbeat";

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Clone)]
pub struct AppState {
    pub host: Arc<HostState>,
    pub ops: Arc<OpsContext>,
    pub runner: OperationRunner,
    pub pipeline: Arc<FlashPipeline>,
    pub restart: Arc<DeviceRestart>,
    pub build: BuildInfo,
    /// Hash of the merged config the daemon booted with.
    pub config_hash: Option<String>,
}

impl AppState {
    /// Wire state around an existing host bus and pipeline. The pipeline
    /// should publish to the same `host`, which also carries restart commands.
    pub fn new(host: Arc<HostState>, pipeline: FlashPipeline, config_hash: Option<String>) -> Self {
        let sink: Arc<dyn EventSink> = host.clone();
        let ops = OpsContext::new(sink);
        let restart = DeviceRestart::new(pipeline.config(), host.clone(), host.clone());
        Self {
            runner: OperationRunner::new(ops.clone()),
            ops,
            host,
            pipeline: Arc::new(pipeline),
            restart: Arc::new(restart),
            build: BuildInfo {
                service: "pvo-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            config_hash,
        }
    }

    /// Production wiring: HTTP release source and env/file secret lookup.
    pub fn from_config(cfg: OpsConfig, config_hash: String) -> Self {
        let host = Arc::new(HostState::new());
        let a = &cfg.artifacts;
        let source: Arc<dyn ArtifactSource> = Arc::new(HttpArtifactSource::new(
            a.download_base_url.clone(),
            a.api_base_url.clone(),
            a.owner.clone(),
            a.repo.clone(),
        ));
        let secrets = Arc::new(secret_store_from_config(&cfg.secrets));
        let pipeline = FlashPipeline::new(cfg, host.clone(), host.clone(), secrets, source);
        Self::new(host, pipeline, Some(config_hash))
    }
}

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

/// Publish a heartbeat on the host bus every `interval`.
pub fn spawn_heartbeat(host: Arc<HostState>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            host.publish(HEARTBEAT_TOPIC, json!({ "ts_millis": ts }));
        }
    });
}
