//! Device rejections, refused auth modes and timeouts.

use std::time::Duration;

use pvo_ota::protocol::{RESPONSE_ERROR_AUTH_INVALID, RESPONSE_ERROR_WRITING_FLASH};
use pvo_ota::{OtaClient, OtaError, OtaSettings, TimeoutPhase};
use pvo_testkit::{firmware_image, DeviceAuth, FakeDevice, Fault, Phase};

#[tokio::test]
async fn wrong_password_surfaces_device_auth_error() {
    let (link, device) = FakeDevice::new()
        .auth(DeviceAuth::Sha256 {
            password: "right".to_string(),
        })
        .spawn_duplex();

    let err = OtaClient::default()
        .upload_over(link, &firmware_image(10_000), Some("wrong"), None)
        .await
        .unwrap_err();

    match &err {
        OtaError::Device { code, .. } => assert_eq!(*code, RESPONSE_ERROR_AUTH_INVALID),
        other => panic!("expected device error, got {other:?}"),
    }
    assert_eq!(err.reason_code(), "ota_protocol");
    let log = device.await.unwrap();
    assert!(log.declared_size.is_none());
}

#[tokio::test]
async fn legacy_md5_auth_is_refused_without_exchanging_nonces() {
    let (link, device) = FakeDevice::new().auth(DeviceAuth::LegacyMd5).spawn_duplex();

    let err = OtaClient::default()
        .upload_over(link, &firmware_image(10_000), Some("pw"), None)
        .await
        .unwrap_err();

    assert!(matches!(err, OtaError::Protocol(ref m) if m.contains("legacy MD5")), "{err}");
    let log = device.await.unwrap();
    assert!(log.cnonce.is_none());
    assert!(log.trailing.is_empty(), "client kept talking: {:?}", log.trailing);
}

#[tokio::test]
async fn unknown_auth_byte_is_a_protocol_error() {
    let (link, device) = FakeDevice::new().auth(DeviceAuth::Raw(0x07)).spawn_duplex();

    let err = OtaClient::default()
        .upload_over(link, &firmware_image(10_000), None, None)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("0x07"), "{err}");
    device.await.unwrap();
}

#[tokio::test]
async fn missing_password_fails_when_device_demands_one() {
    let (link, device) = FakeDevice::new()
        .auth(DeviceAuth::Sha256 {
            password: "pw".to_string(),
        })
        .spawn_duplex();

    let err = OtaClient::default()
        .upload_over(link, &firmware_image(10_000), None, None)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("none was provided"), "{err}");
    assert!(device.await.unwrap().cnonce.is_none());
}

#[tokio::test]
async fn unsupported_version_is_rejected() {
    let (link, device) = FakeDevice::new().version(1).spawn_duplex();

    let err = OtaClient::default()
        .upload_over(link, &firmware_image(10_000), None, None)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("unsupported OTA version: 1"), "{err}");
    assert!(device.await.unwrap().features_offer.is_none());
}

#[tokio::test]
async fn flash_write_error_mid_transfer_stops_the_upload() {
    let (link, device) = FakeDevice::new()
        .compression(false)
        .fault(Phase::Chunk(2), Fault::Reply(RESPONSE_ERROR_WRITING_FLASH))
        .spawn_duplex();

    let err = OtaClient::default()
        .upload_over(link, &firmware_image(6 * 8192), None, None)
        .await
        .unwrap_err();

    match &err {
        OtaError::Device { code, phase, .. } => {
            assert_eq!(*code, RESPONSE_ERROR_WRITING_FLASH);
            assert_eq!(phase, "chunk@24576");
        }
        other => panic!("expected device error, got {other:?}"),
    }
    let log = device.await.unwrap();
    assert_eq!(log.chunks, 3);
    assert!(log.trailing.is_empty(), "next block sent after an error ack");
}

#[tokio::test]
async fn hangup_reads_as_closed_connection() {
    let (link, device) = FakeDevice::new().fault(Phase::Prepare, Fault::Hangup).spawn_duplex();

    let err = OtaClient::default()
        .upload_over(link, &firmware_image(10_000), None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, OtaError::ConnectionClosed { .. }), "{err:?}");
    assert_eq!(err.reason_code(), "ota_transport");
    device.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn silent_device_trips_the_read_timeout() {
    let (link, device) = FakeDevice::new()
        .compression(false)
        .fault(Phase::Chunk(0), Fault::Stall)
        .spawn_duplex();
    let client = OtaClient::new(OtaSettings {
        read_timeout: Duration::from_secs(5),
        ..OtaSettings::default()
    });

    let err = client
        .upload_over(link, &firmware_image(3 * 8192), None, None)
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    match err {
        OtaError::Timeout { phase } => assert_eq!(phase, TimeoutPhase::Read("chunk@8192".to_string())),
        other => panic!("expected timeout, got {other:?}"),
    }
    device.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn overall_deadline_ends_a_stalled_upload_and_closes_the_link() {
    let (link, device) = FakeDevice::new()
        .compression(false)
        .fault(Phase::Chunk(0), Fault::Stall)
        .spawn_duplex();
    let client = OtaClient::new(OtaSettings {
        read_timeout: Duration::from_secs(60),
        overall_timeout: Duration::from_secs(10),
        ..OtaSettings::default()
    });

    let started = tokio::time::Instant::now();
    let err = client
        .upload_over(link, &firmware_image(3 * 8192), None, None)
        .await
        .unwrap_err();

    match err {
        OtaError::Timeout { phase } => assert_eq!(phase, TimeoutPhase::Overall),
        other => panic!("expected overall timeout, got {other:?}"),
    }
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(10) && elapsed < Duration::from_secs(11), "{elapsed:?}");
    // The device only finishes once the client has closed its side.
    let log = device.await.unwrap();
    assert!(!log.completed());
    assert_eq!(log.chunks, 1);
}
