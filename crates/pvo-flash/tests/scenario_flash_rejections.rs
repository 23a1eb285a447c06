//! Every abort path publishes `failed` at 0, carries a reason code and
//! leaves no workspace behind.

use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Utc};
use pvo_config::OpsConfig;
use pvo_flash::{FlashPipeline, FlashRequest};
use pvo_host::{topics, HostState, NoSecrets, SecretStore};
use pvo_ops::{OperationRunner, OperationState, OpsContext, ReasonCode};
use pvo_testkit::{
    firmware_image, manifest_json, seed_device, set_gates, DeviceAuth, FakeDevice,
    MemoryArtifactSource, RecordingSink, DEVICE_ID,
};
use serde_json::Value;
use tempfile::TempDir;

struct Fixture {
    root: TempDir,
    host: Arc<HostState>,
    sink: Arc<RecordingSink>,
    source: Arc<MemoryArtifactSource>,
}

impl Fixture {
    /// Fresh passing gates and one `stable` release declaring `hw_family`.
    fn new(image: Vec<u8>, hw_family: &str) -> Self {
        let host = Arc::new(HostState::new());
        set_gates(&host, "pass", Utc::now());
        let source = Arc::new(MemoryArtifactSource::new().with_release(
            "stable",
            "2.0.0",
            manifest_json("2.0.0", "stable", hw_family, &image),
            image,
        ));
        Self {
            root: tempfile::tempdir().unwrap(),
            host,
            sink: Arc::new(RecordingSink::new()),
            source,
        }
    }

    fn config(&self) -> OpsConfig {
        let mut cfg = OpsConfig::default();
        cfg.flash.workspace_root = Some(self.root.path().to_path_buf());
        cfg
    }

    fn pipeline(&self, cfg: OpsConfig, secrets: Arc<dyn SecretStore>) -> FlashPipeline {
        FlashPipeline::new(
            cfg,
            self.host.clone(),
            self.sink.clone(),
            secrets,
            self.source.clone(),
        )
    }

    fn stages(&self) -> Vec<String> {
        let mut s: Vec<String> = self
            .sink
            .payloads(topics::FLASH_STAGE)
            .iter()
            .map(|e| e["stage"].as_str().unwrap_or_default().to_string())
            .collect();
        s.dedup();
        s
    }

    fn last_event(&self) -> Value {
        self.sink.payloads(topics::FLASH_STAGE).pop().unwrap()
    }

    fn assert_clean(&self) {
        assert_eq!(dir_entries(self.root.path()), 0, "workspace left behind");
    }
}

fn dir_entries(p: &Path) -> usize {
    std::fs::read_dir(p).unwrap().count()
}

struct FixedSecret(&'static str);

impl SecretStore for FixedSecret {
    fn resolve(&self, _device_id: &str) -> Option<String> {
        Some(self.0.to_string())
    }
}

#[tokio::test]
async fn wrong_hardware_family_aborts_before_firmware_download() {
    let fx = Fixture::new(firmware_image(400 * 1024), "edge201");
    let req = FlashRequest {
        hw_family: Some("edge101".to_string()),
        ..FlashRequest::new(DEVICE_ID)
    };

    let err = fx
        .pipeline(fx.config(), Arc::new(NoSecrets))
        .run(&req, None)
        .await
        .unwrap_err();

    assert_eq!(err.reason_code(), "hw_family_mismatch");
    assert_eq!(fx.source.firmware_fetches(), 0);
    assert_eq!(fx.stages(), vec!["init", "preflight", "download", "failed"]);
    let last = fx.last_event();
    assert_eq!(last["progress"], 0);
    assert_eq!(last["version"], "2.0.0");
    assert!(last["error"].as_str().unwrap().contains("edge201"));
    fx.assert_clean();
}

#[tokio::test]
async fn undersized_binary_is_rejected_before_checksum() {
    let fx = Fixture::new(firmware_image(100 * 1024), "edge101");

    let err = fx
        .pipeline(fx.config(), Arc::new(NoSecrets))
        .run(&FlashRequest::new(DEVICE_ID), None)
        .await
        .unwrap_err();

    assert_eq!(err.reason_code(), "firmware_too_small");
    assert!(!fx.stages().contains(&"verify".to_string()));
    assert!(err.to_string().contains("102400 bytes"), "{err}");
    fx.assert_clean();
}

#[tokio::test]
async fn minimum_size_binary_passes_the_gate() {
    // No device address is seeded, so the attempt stops at upload.
    let fx = Fixture::new(firmware_image(300 * 1024), "edge101");

    let err = fx
        .pipeline(fx.config(), Arc::new(NoSecrets))
        .run(&FlashRequest::new(DEVICE_ID), None)
        .await
        .unwrap_err();

    assert_eq!(err.reason_code(), "device_unresolved");
    assert_eq!(
        fx.stages(),
        vec!["init", "preflight", "download", "verify", "upload", "failed"]
    );
    fx.assert_clean();
}

#[tokio::test]
async fn checksum_mismatch_stops_at_verify() {
    let image = firmware_image(320 * 1024);
    let mut fx = Fixture::new(image.clone(), "edge101");
    let other = firmware_image(321 * 1024);
    fx.source = Arc::new(MemoryArtifactSource::new().with_release(
        "stable",
        "2.0.0",
        manifest_json("2.0.0", "stable", "edge101", &other),
        image,
    ));

    let err = fx
        .pipeline(fx.config(), Arc::new(NoSecrets))
        .run(&FlashRequest::new(DEVICE_ID), None)
        .await
        .unwrap_err();

    assert_eq!(err.reason_code(), "checksum_mismatch");
    assert_eq!(fx.stages().last().map(String::as_str), Some("failed"));
    assert!(fx.stages().contains(&"verify".to_string()));
    assert!(!fx.stages().contains(&"upload".to_string()));
    fx.assert_clean();
}

#[tokio::test]
async fn missing_gates_block_in_preflight() {
    let fx = Fixture::new(firmware_image(320 * 1024), "edge101");
    fx.host.remove_entity(pvo_host::STATUS_ENTITY);

    let err = fx
        .pipeline(fx.config(), Arc::new(NoSecrets))
        .run(&FlashRequest::new(DEVICE_ID), None)
        .await
        .unwrap_err();

    assert_eq!(err.reason_code(), "gates_missing");
    assert_eq!(fx.stages(), vec!["init", "preflight", "failed"]);
    assert!(fx.last_event()["error"]
        .as_str()
        .unwrap()
        .starts_with("Preflight failed"));
    assert_eq!(fx.source.firmware_fetches(), 0);
    fx.assert_clean();
}

#[tokio::test]
async fn stale_and_warned_gates_block() {
    let fx = Fixture::new(firmware_image(320 * 1024), "edge101");

    set_gates(&fx.host, "pass", Utc::now() - Duration::minutes(30));
    let err = fx
        .pipeline(fx.config(), Arc::new(NoSecrets))
        .run(&FlashRequest::new(DEVICE_ID), None)
        .await
        .unwrap_err();
    assert_eq!(err.reason_code(), "gates_stale");

    set_gates(&fx.host, "warn", Utc::now());
    let err = fx
        .pipeline(fx.config(), Arc::new(NoSecrets))
        .run(&FlashRequest::new(DEVICE_ID), None)
        .await
        .unwrap_err();
    assert_eq!(err.reason_code(), "gates_warned");
}

#[tokio::test]
async fn wrong_ota_password_fails_the_upload() {
    let fx = Fixture::new(firmware_image(320 * 1024), "edge101");
    let (addr, device) = FakeDevice::new()
        .auth(DeviceAuth::Sha256 {
            password: "right".to_string(),
        })
        .spawn_tcp()
        .await
        .unwrap();
    seed_device(&fx.host, "127.0.0.1", 500.0);
    let mut cfg = fx.config();
    cfg.flash.ota_port = addr.port();

    let err = fx
        .pipeline(cfg, Arc::new(FixedSecret("wrong")))
        .run(&FlashRequest::new(DEVICE_ID), None)
        .await
        .unwrap_err();

    assert_eq!(err.reason_code(), "ota_protocol");
    assert!(err.to_string().starts_with("OTA upload error"), "{err}");
    assert!(device.await.unwrap().auth_response.is_some());
    assert_eq!(fx.stages().last().map(String::as_str), Some("failed"));
    fx.assert_clean();
}

#[tokio::test]
async fn runner_records_the_failure_and_frees_the_lock() {
    let fx = Fixture::new(firmware_image(400 * 1024), "edge201");
    let pipeline = fx.pipeline(fx.config(), Arc::new(NoSecrets));
    let ctx = OpsContext::new(fx.sink.clone());
    let runner = OperationRunner::new(ctx.clone());
    let req = FlashRequest::new(DEVICE_ID);

    let out = runner
        .run(pvo_flash::OPERATION_NAME, |progress| {
            let pipeline = &pipeline;
            let req = &req;
            async move { pipeline.run(req, Some(&progress)).await }
        })
        .await;

    assert!(!out.success);
    assert_eq!(out.reason.as_deref(), Some("hw_family_mismatch"));
    assert!(!ctx.lock().is_locked());
    let snap = ctx.snapshot();
    assert_eq!(snap.op_state, OperationState::Failed);
    assert!(snap.last_error.unwrap().contains("Hardware family mismatch"));
    assert_eq!(fx.sink.payloads(topics::OPERATION_COMPLETED).len(), 1);
    assert!(!fx.sink.payloads(topics::OPERATION_PROGRESS).is_empty());
}

#[tokio::test]
async fn busy_lock_refuses_a_second_flash() {
    let fx = Fixture::new(firmware_image(320 * 1024), "edge101");
    let pipeline = fx.pipeline(fx.config(), Arc::new(NoSecrets));
    let ctx = OpsContext::new(fx.sink.clone());
    assert!(ctx.lock().acquire("run_gates"));
    let runner = OperationRunner::new(ctx.clone());
    let req = FlashRequest::new(DEVICE_ID);

    let out = runner
        .run(pvo_flash::OPERATION_NAME, |progress| {
            let pipeline = &pipeline;
            let req = &req;
            async move { pipeline.run(req, Some(&progress)).await }
        })
        .await;

    assert!(out.is_busy());
    assert_eq!(
        out.error.as_deref(),
        Some("Operation blocked: run_gates already running")
    );
    assert_eq!(out.duration_ms, 0);
    assert!(fx.sink.payloads(topics::FLASH_STAGE).is_empty());
    assert_eq!(ctx.lock().current_operation().as_deref(), Some("run_gates"));
}
