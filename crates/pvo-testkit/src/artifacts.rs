use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use pvo_artifacts::{ArtifactError, ArtifactSource};
use serde_json::json;
use sha2::{Digest, Sha256};

/// Deterministic firmware bytes of `size`.
pub fn firmware_image(size: usize) -> Vec<u8> {
    (0..size).map(|i| ((i * 31 + i / 251) % 251) as u8).collect()
}

/// Manifest bytes describing `firmware`.
pub fn manifest_json(version: &str, channel: &str, hw_family: &str, firmware: &[u8]) -> Vec<u8> {
    let digest = hex::encode(Sha256::digest(firmware));
    serde_json::to_vec(&json!({
        "version": version,
        "channel": channel,
        "hw_family": hw_family,
        "sha256": digest,
        "esphome_min": "2024.6.0",
    }))
    .unwrap_or_default()
}

/// Release catalogue held in memory.
#[derive(Debug, Default)]
pub struct MemoryArtifactSource {
    latest: BTreeMap<String, String>,
    releases: BTreeMap<String, (Vec<u8>, Vec<u8>)>,
    firmware_fetches: AtomicUsize,
}

impl MemoryArtifactSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a release and make it the latest on `channel`.
    pub fn with_release(mut self, channel: &str, version: &str, manifest: Vec<u8>, firmware: Vec<u8>) -> Self {
        self.latest.insert(channel.to_string(), version.to_string());
        self.releases
            .insert(version.to_string(), (manifest, firmware));
        self
    }

    pub fn firmware_fetches(&self) -> usize {
        self.firmware_fetches.load(Ordering::SeqCst)
    }

    fn release(&self, version: &str) -> Result<&(Vec<u8>, Vec<u8>), ArtifactError> {
        self.releases
            .get(version)
            .ok_or_else(|| ArtifactError::Fetch(format!("no release v{version}: http status 404")))
    }
}

#[async_trait::async_trait]
impl ArtifactSource for MemoryArtifactSource {
    fn source_name(&self) -> &'static str {
        "memory"
    }

    async fn latest_version(&self, channel: &str, _hw_family: &str) -> Result<String, ArtifactError> {
        self.latest
            .get(channel)
            .cloned()
            .ok_or_else(|| ArtifactError::Fetch(format!("no releases on channel '{channel}'")))
    }

    async fn fetch_manifest(&self, version: &str) -> Result<Vec<u8>, ArtifactError> {
        Ok(self.release(version)?.0.clone())
    }

    async fn fetch_firmware(&self, version: &str) -> Result<Vec<u8>, ArtifactError> {
        self.firmware_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.release(version)?.1.clone())
    }
}
