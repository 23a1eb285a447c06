use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Invalid manifest: {0}")]
    ManifestInvalid(String),

    #[error("Hardware family mismatch: expected '{expected}', manifest declares '{declared}'")]
    HwFamilyMismatch { expected: String, declared: String },

    #[error("Firmware too small: {size} bytes < {min} bytes minimum (truncated download?)")]
    TooSmall { size: u64, min: u64 },

    #[error("Firmware integrity check failed: SHA256 mismatch (expected {expected}, got {actual})")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Artifact download failed: {0}")]
    Fetch(String),
}

impl ArtifactError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            ArtifactError::ManifestInvalid(_) => "manifest_invalid",
            ArtifactError::HwFamilyMismatch { .. } => "hw_family_mismatch",
            ArtifactError::TooSmall { .. } => "firmware_too_small",
            ArtifactError::ChecksumMismatch { .. } => "checksum_mismatch",
            ArtifactError::Io(_) => "artifact_io",
            ArtifactError::Fetch(_) => "artifact_fetch",
        }
    }
}
