//! pvo-artifacts
//!
//! Firmware artifacts: manifest parsing, retrieval, local storage and the
//! integrity checks run before anything is sent to a device.
//!
//! Retrieval is pluggable through [`ArtifactSource`]. [`HttpArtifactSource`]
//! reads release assets laid out as
//! `{base}/{owner}/{repo}/releases/download/v{version}/{manifest.json,firmware.bin}`.

mod checks;
mod error;
mod http;
mod manifest;
mod workspace;

pub use checks::{check_min_size, ensure_hw_family, sha256_file, verify_sha256};
pub use error::ArtifactError;
pub use http::HttpArtifactSource;
pub use manifest::{FirmwareArtifact, Manifest, REQUIRED_FIELDS};
pub use workspace::ArtifactWorkspace;

/// Where firmware releases come from.
#[async_trait::async_trait]
pub trait ArtifactSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    /// Newest version published on `channel` for `hw_family`, without a
    /// leading `v`.
    async fn latest_version(&self, channel: &str, hw_family: &str) -> Result<String, ArtifactError>;

    /// Raw `manifest.json` bytes for `version`.
    async fn fetch_manifest(&self, version: &str) -> Result<Vec<u8>, ArtifactError>;

    /// Raw `firmware.bin` bytes for `version`.
    async fn fetch_firmware(&self, version: &str) -> Result<Vec<u8>, ArtifactError>;
}
