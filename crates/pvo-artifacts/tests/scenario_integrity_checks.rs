//! Integrity checks over stored artifacts.
//!
//! GREEN when a wrong-family manifest, an undersized binary and a digest
//! mismatch are each rejected with their own reason code.

use pvo_artifacts::{
    check_min_size, ensure_hw_family, sha256_file, verify_sha256, ArtifactWorkspace,
    FirmwareArtifact, Manifest,
};

fn manifest(hw_family: &str, sha256: &str) -> Manifest {
    Manifest {
        version: "1.0.4".to_string(),
        channel: "stable".to_string(),
        hw_family: hw_family.to_string(),
        sha256: sha256.to_string(),
        esphome_min: None,
    }
}

#[test]
fn hardware_family_must_match_exactly() {
    let m = manifest("edge101", &"0".repeat(64));
    assert!(ensure_hw_family(&m, "edge101").is_ok());
    let err = ensure_hw_family(&m, "edge201").unwrap_err();
    assert_eq!(err.reason_code(), "hw_family_mismatch");
    assert!(err.to_string().contains("edge201"));
}

#[test]
fn undersized_firmware_is_rejected() {
    let err = check_min_size(100 * 1024, 300 * 1024).unwrap_err();
    assert_eq!(err.reason_code(), "firmware_too_small");
}

#[test]
fn digest_match_and_mismatch() {
    let ws = ArtifactWorkspace::create(None).unwrap();
    let body = vec![0xA5u8; 4096];
    let path = ws.store_firmware(&body).unwrap();
    let good = sha256_file(&path).unwrap();

    let ok = FirmwareArtifact::new(manifest("edge101", &good.to_uppercase()), &path).unwrap();
    assert_eq!(ok.size(), 4096);
    verify_sha256(&ok).unwrap();

    let bad = FirmwareArtifact::new(manifest("edge101", &"1".repeat(64)), &path).unwrap();
    let err = verify_sha256(&bad).unwrap_err();
    assert_eq!(err.reason_code(), "checksum_mismatch");
}

#[test]
fn artifact_requires_existing_file() {
    let err = FirmwareArtifact::new(manifest("edge101", &"0".repeat(64)), "/nonexistent/fw.bin")
        .unwrap_err();
    assert_eq!(err.reason_code(), "artifact_io");
}
