//! Local integrity checks. Order matters to callers: size before digest.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{error, info};

use crate::{ArtifactError, FirmwareArtifact, Manifest};

/// Wrong-family binaries can brick a device: exact match only.
pub fn ensure_hw_family(manifest: &Manifest, requested: &str) -> Result<(), ArtifactError> {
    if manifest.hw_family != requested {
        error!(
            expected = %requested,
            declared = %manifest.hw_family,
            "hardware family mismatch"
        );
        return Err(ArtifactError::HwFamilyMismatch {
            expected: requested.to_string(),
            declared: manifest.hw_family.clone(),
        });
    }
    Ok(())
}

/// Reject truncated or stub binaries.
pub fn check_min_size(size: u64, min_bytes: u64) -> Result<(), ArtifactError> {
    if size < min_bytes {
        error!(size, min_bytes, "firmware below minimum size");
        return Err(ArtifactError::TooSmall {
            size,
            min: min_bytes,
        });
    }
    Ok(())
}

/// Streamed SHA-256 of a file, lowercase hex.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn verify_sha256(artifact: &FirmwareArtifact) -> Result<(), ArtifactError> {
    let actual = sha256_file(artifact.path())?;
    let expected = artifact.expected_sha256().to_ascii_lowercase();
    if actual != expected {
        error!(expected = %expected, actual = %actual, "sha256 mismatch");
        return Err(ArtifactError::ChecksumMismatch { expected, actual });
    }
    info!(version = %artifact.version(), "firmware integrity verified");
    Ok(())
}
