use std::fs;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use pvo_artifacts::{
    check_min_size, ensure_hw_family, verify_sha256, ArtifactError, ArtifactSource,
    ArtifactWorkspace, FirmwareArtifact, Manifest,
};
use pvo_config::OpsConfig;
use pvo_guard::check_flash_guards;
use pvo_host::{topics, EventSink, SecretStore, Telemetry};
use pvo_ops::ProgressHandle;
use pvo_ota::{AuthMode, OtaClient, OtaSettings};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::{FlashError, FlashStage, FlashStageEvent, MonitorSettings, RebootMonitor, RebootOutcome};

/// Name the flash runs under in the operation lock.
pub const OPERATION_NAME: &str = "flash_firmware";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashRequest {
    pub device_id: String,
    /// Overrides `artifacts.hw_family`.
    #[serde(default)]
    pub hw_family: Option<String>,
    /// Overrides `artifacts.channel`.
    #[serde(default)]
    pub channel: Option<String>,
    /// Overrides the pinned or latest version.
    #[serde(default)]
    pub version: Option<String>,
}

impl FlashRequest {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlashReport {
    pub device_id: String,
    pub firmware_version: String,
    pub hw_family: String,
    pub channel: String,
    pub firmware_bytes: u64,
    pub payload_bytes: u64,
    pub compressed: bool,
    pub auth: AuthMode,
    pub reboot: RebootOutcome,
    pub stage: FlashStage,
}

/// Publishes stage events and mirrors them to the operation progress.
struct StageEmitter<'a> {
    sink: &'a dyn EventSink,
    progress: Option<&'a ProgressHandle>,
    device_id: &'a str,
    version: Mutex<Option<String>>,
}

impl StageEmitter<'_> {
    fn set_version(&self, version: &str) {
        *self.version.lock().unwrap_or_else(|e| e.into_inner()) = Some(version.to_string());
    }

    fn emit(&self, stage: FlashStage, pct: u8) {
        self.publish(stage, pct, None);
        if let Some(p) = self.progress {
            p.report(i64::from(pct), Some(stage.as_str()));
        }
    }

    fn enter(&self, stage: FlashStage) {
        info!(stage = stage.as_str(), progress = stage.entry_pct(), "flash stage");
        self.emit(stage, stage.entry_pct());
    }

    fn fail(&self, err: &FlashError) {
        error!(device = %self.device_id, error = %err, "flash failed");
        self.publish(FlashStage::Failed, 0, Some(err.to_string()));
    }

    fn publish(&self, stage: FlashStage, pct: u8, error: Option<String>) {
        let event = FlashStageEvent {
            stage,
            progress_pct: pct,
            version: self.version.lock().unwrap_or_else(|e| e.into_inner()).clone(),
            target_device: self.device_id.to_string(),
            error,
        };
        match serde_json::to_value(&event) {
            Ok(payload) => self.sink.publish(topics::FLASH_STAGE, payload),
            Err(e) => warn!(error = %e, "could not encode flash stage event"),
        }
    }
}

/// Orchestrates one flash attempt per [`run`](Self::run) call.
///
/// Holds no per-attempt state; single-flight is the caller's concern
/// (normally [`pvo_ops::OperationRunner`]).
pub struct FlashPipeline {
    config: OpsConfig,
    telemetry: Arc<dyn Telemetry>,
    events: Arc<dyn EventSink>,
    secrets: Arc<dyn SecretStore>,
    source: Arc<dyn ArtifactSource>,
    ota: OtaClient,
    monitor: MonitorSettings,
}

impl FlashPipeline {
    pub fn new(
        config: OpsConfig,
        telemetry: Arc<dyn Telemetry>,
        events: Arc<dyn EventSink>,
        secrets: Arc<dyn SecretStore>,
        source: Arc<dyn ArtifactSource>,
    ) -> Self {
        let f = &config.flash;
        let ota = OtaClient::new(OtaSettings {
            port: f.ota_port,
            connect_timeout: f.connect_timeout(),
            read_timeout: f.read_timeout(),
            overall_timeout: f.overall_timeout(),
        });
        let monitor = MonitorSettings::from(f);
        Self {
            config,
            telemetry,
            events,
            secrets,
            source,
            ota,
            monitor,
        }
    }

    pub fn config(&self) -> &OpsConfig {
        &self.config
    }

    /// Run every stage in order. On error a `failed` event carrying the
    /// message is published before returning; the workspace is gone either way.
    pub async fn run(
        &self,
        req: &FlashRequest,
        progress: Option<&ProgressHandle>,
    ) -> Result<FlashReport, FlashError> {
        let emitter = StageEmitter {
            sink: self.events.as_ref(),
            progress,
            device_id: &req.device_id,
            version: Mutex::new(None),
        };
        info!(device = %req.device_id, source = self.source.source_name(), "flash requested");

        let result = self.execute(req, &emitter).await;
        if let Err(e) = &result {
            emitter.fail(e);
        }
        result
    }

    async fn execute(
        &self,
        req: &FlashRequest,
        emitter: &StageEmitter<'_>,
    ) -> Result<FlashReport, FlashError> {
        let cfg = &self.config;
        emitter.enter(FlashStage::Init);

        emitter.enter(FlashStage::Preflight);
        check_flash_guards(self.telemetry.as_ref(), Utc::now(), &cfg.gates).into_result()?;
        info!("flash preflight passed");

        let workspace = ArtifactWorkspace::create(cfg.flash.workspace_root.as_deref())?;

        // download
        emitter.enter(FlashStage::Download);
        let hw_family = req
            .hw_family
            .clone()
            .unwrap_or_else(|| cfg.artifacts.hw_family.clone());
        let channel = req
            .channel
            .clone()
            .unwrap_or_else(|| cfg.artifacts.channel.clone());
        let version = match req
            .version
            .clone()
            .or_else(|| cfg.artifacts.pinned_version.clone())
        {
            Some(v) => v,
            None => self.source.latest_version(&channel, &hw_family).await?,
        };
        emitter.set_version(&version);
        info!(version = %version, channel = %channel, hw_family = %hw_family, "downloading firmware");

        let manifest = Manifest::parse(&self.source.fetch_manifest(&version).await?)?;
        ensure_hw_family(&manifest, &hw_family)?;
        let firmware = self.source.fetch_firmware(&version).await?;
        let path = workspace.store_firmware(&firmware)?;
        drop(firmware);
        let artifact = FirmwareArtifact::new(manifest, path)?;
        emitter.set_version(artifact.version());
        info!(version = %artifact.version(), size = artifact.size(), "firmware downloaded");

        check_min_size(artifact.size(), cfg.flash.min_firmware_size_bytes())?;

        // verify, then read back exactly the bytes that were checked
        emitter.enter(FlashStage::Verify);
        let checked = artifact.clone();
        let image = tokio::task::spawn_blocking(move || {
            verify_sha256(&checked)?;
            fs::read(checked.path()).map_err(ArtifactError::from)
        })
        .await??;

        // upload
        emitter.enter(FlashStage::Upload);
        let host = self
            .telemetry
            .device_address(&req.device_id)
            .ok_or_else(|| FlashError::DeviceUnresolved(req.device_id.clone()))?;
        let secret = self.secrets.resolve(&req.device_id);
        if secret.is_none() {
            warn!(device = %req.device_id, "no OTA password found, attempting upload without auth");
        }
        let monitor = RebootMonitor::new(self.telemetry.as_ref(), self.monitor);
        let plan = monitor.arm(&req.device_id);

        info!(device = %req.device_id, host = %host, port = cfg.flash.ota_port, "starting OTA upload");
        let mut handle = self.ota.spawn_upload(host, image, secret);
        while let Some(pct) = handle.progress.recv().await {
            emitter.emit(FlashStage::Upload, FlashStage::upload_pct(pct));
        }
        let upload = handle.task.await??;
        info!(payload_bytes = upload.payload_bytes, "OTA upload completed");

        // postcheck
        emitter.enter(FlashStage::Postcheck);
        tokio::time::sleep(cfg.flash.reboot_grace()).await;
        let reboot = monitor
            .watch(&plan, |pct| {
                emitter.emit(FlashStage::Postcheck, FlashStage::postcheck_pct(pct))
            })
            .await;
        if !reboot.is_confirmed() {
            warn!(device = %req.device_id, outcome = ?reboot, "reboot not confirmed, completing anyway");
        }

        emitter.enter(FlashStage::Complete);
        workspace.purge();
        info!(device = %req.device_id, version = %artifact.version(), "flash complete");

        Ok(FlashReport {
            device_id: req.device_id.clone(),
            firmware_version: artifact.version().to_string(),
            hw_family,
            channel,
            firmware_bytes: upload.firmware_bytes,
            payload_bytes: upload.payload_bytes,
            compressed: upload.compressed,
            auth: upload.auth,
            reboot,
            stage: FlashStage::Complete,
        })
    }
}
