//! Full flash against a loopback device that "reboots" after the final ack.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use pvo_config::OpsConfig;
use pvo_flash::{FlashPipeline, FlashRequest, FlashStage, RebootEvidence, RebootOutcome};
use pvo_host::{topics, HostState, NoSecrets};
use pvo_ota::AuthMode;
use pvo_testkit::{
    firmware_image, manifest_json, seed_device, set_gates, FakeDevice, MemoryArtifactSource,
    RecordingSink, DEVICE_ID,
};

fn config(root: &Path, port: u16) -> OpsConfig {
    let mut cfg = OpsConfig::default();
    cfg.flash.workspace_root = Some(root.to_path_buf());
    cfg.flash.ota_port = port;
    cfg.flash.reboot_grace_secs = 0;
    cfg.flash.poll_interval_secs = 1;
    cfg.flash.max_polls = 5;
    cfg
}

#[tokio::test]
async fn flash_completes_and_confirms_reboot_by_uptime_reset() {
    let root = tempfile::tempdir().unwrap();
    let host = Arc::new(HostState::new());
    set_gates(&host, "pass", Utc::now());
    seed_device(&host, "127.0.0.1", 500.0);

    let image = firmware_image(320 * 1024);
    let source = Arc::new(MemoryArtifactSource::new().with_release(
        "stable",
        "1.4.0",
        manifest_json("1.4.0", "stable", "edge101", &image),
        image.clone(),
    ));

    let rebooted = host.clone();
    let (addr, device) = FakeDevice::new()
        .on_reboot(move || {
            rebooted.set_state(&format!("sensor.{DEVICE_ID}_uptime_device"), "3.2");
        })
        .spawn_tcp()
        .await
        .unwrap();

    let sink = Arc::new(RecordingSink::new());
    let pipeline = FlashPipeline::new(
        config(root.path(), addr.port()),
        host.clone(),
        sink.clone(),
        Arc::new(NoSecrets),
        source.clone(),
    );

    let report = pipeline
        .run(&FlashRequest::new(DEVICE_ID), None)
        .await
        .unwrap();
    let log = device.await.unwrap();

    assert!(log.completed());
    assert_eq!(log.firmware_image(), image);
    assert!(!log.pipelined);

    assert_eq!(report.stage, FlashStage::Complete);
    assert_eq!(report.firmware_version, "1.4.0");
    assert_eq!(report.hw_family, "edge101");
    assert_eq!(report.auth, AuthMode::None);
    assert_eq!(report.firmware_bytes, image.len() as u64);
    match report.reboot {
        RebootOutcome::Confirmed {
            via: RebootEvidence::UptimeReset { before, after },
            ..
        } => {
            assert_eq!(before, 500.0);
            assert_eq!(after, 3.2);
        }
        other => panic!("expected uptime confirmation, got {other:?}"),
    }

    // Workspace purged.
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);

    let events = sink.payloads(topics::FLASH_STAGE);
    let stages: Vec<&str> = events.iter().map(|e| e["stage"].as_str().unwrap()).collect();
    let mut distinct = stages.clone();
    distinct.dedup();
    assert_eq!(
        distinct,
        vec!["init", "preflight", "download", "verify", "upload", "postcheck", "complete"]
    );

    let band = |stage: &str| -> Vec<u64> {
        events
            .iter()
            .filter(|e| e["stage"] == stage)
            .map(|e| e["progress"].as_u64().unwrap())
            .collect()
    };
    let upload = band("upload");
    assert_eq!(upload.first(), Some(&30));
    assert_eq!(upload.last(), Some(&80));
    assert!(upload.windows(2).all(|w| w[0] <= w[1]), "{upload:?}");
    let postcheck = band("postcheck");
    assert_eq!(postcheck.first(), Some(&85));
    assert!(postcheck.iter().all(|p| (85..=95).contains(p)), "{postcheck:?}");
    assert!(postcheck.windows(2).all(|w| w[0] <= w[1]), "{postcheck:?}");

    let last = events.last().unwrap();
    assert_eq!(last["stage"], "complete");
    assert_eq!(last["progress"], 100);
    assert_eq!(last["version"], "1.4.0");
    assert_eq!(last["target_device"], DEVICE_ID);
    assert_eq!(source.firmware_fetches(), 1);
}

#[tokio::test]
async fn unconfirmed_reboot_still_completes() {
    let root = tempfile::tempdir().unwrap();
    let host = Arc::new(HostState::new());
    set_gates(&host, "pass", Utc::now());
    seed_device(&host, "127.0.0.1", 500.0);

    let image = firmware_image(310 * 1024);
    let source = Arc::new(MemoryArtifactSource::new().with_release(
        "stable",
        "1.4.1",
        manifest_json("1.4.1", "stable", "edge101", &image),
        image,
    ));
    let (addr, device) = FakeDevice::new().spawn_tcp().await.unwrap();

    let mut cfg = config(root.path(), addr.port());
    cfg.flash.max_polls = 2;
    let sink = Arc::new(RecordingSink::new());
    let pipeline = FlashPipeline::new(cfg, host.clone(), sink.clone(), Arc::new(NoSecrets), source);

    let report = pipeline
        .run(&FlashRequest::new(DEVICE_ID), None)
        .await
        .unwrap();
    device.await.unwrap();

    assert!(matches!(report.reboot, RebootOutcome::Inconclusive { offline_seen: false, .. }));
    assert_eq!(report.stage, FlashStage::Complete);
    let last = sink.payloads(topics::FLASH_STAGE).pop().unwrap();
    assert_eq!(last["stage"], "complete");
}
