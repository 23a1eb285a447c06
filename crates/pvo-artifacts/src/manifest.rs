use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ArtifactError;

pub const REQUIRED_FIELDS: &[&str] = &["version", "channel", "hw_family", "sha256"];

/// Release metadata shipped next to `firmware.bin`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: String,
    pub channel: String,
    pub hw_family: String,
    pub sha256: String,
    /// Minimum host build able to manage this firmware.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub esphome_min: Option<String>,
}

impl Manifest {
    /// Parse and validate a manifest. Every missing required field is named
    /// in the error, not just the first.
    pub fn parse(raw: &[u8]) -> Result<Self, ArtifactError> {
        let v: Value = serde_json::from_slice(raw)
            .map_err(|e| ArtifactError::ManifestInvalid(format!("invalid JSON: {e}")))?;
        let Some(obj) = v.as_object() else {
            return Err(ArtifactError::ManifestInvalid(
                "top level is not an object".to_string(),
            ));
        };

        let missing: Vec<&str> = REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|f| obj.get(*f).map_or(true, Value::is_null))
            .collect();
        if !missing.is_empty() {
            return Err(ArtifactError::ManifestInvalid(format!(
                "missing fields {missing:?}"
            )));
        }

        let m: Manifest = serde_json::from_value(v)
            .map_err(|e| ArtifactError::ManifestInvalid(e.to_string()))?;
        if m.sha256.len() != 64 || !m.sha256.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ArtifactError::ManifestInvalid(
                "sha256 is not a 64-char hex digest".to_string(),
            ));
        }
        Ok(m)
    }
}

/// A downloaded firmware binary and the manifest that describes it.
///
/// Only built from a parsed [`Manifest`] and a file that exists; fields are
/// read-only afterwards.
#[derive(Debug, Clone)]
pub struct FirmwareArtifact {
    manifest: Manifest,
    path: PathBuf,
    size: u64,
}

impl FirmwareArtifact {
    pub fn new(manifest: Manifest, path: impl AsRef<Path>) -> Result<Self, ArtifactError> {
        let path = path.as_ref().to_path_buf();
        let size = fs::metadata(&path)?.len();
        Ok(Self {
            manifest,
            path,
            size,
        })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn version(&self) -> &str {
        &self.manifest.version
    }

    pub fn channel(&self) -> &str {
        &self.manifest.channel
    }

    pub fn hw_family(&self) -> &str {
        &self.manifest.hw_family
    }

    pub fn expected_sha256(&self) -> &str {
        &self.manifest.sha256
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

    #[test]
    fn parses_complete_manifest() {
        let raw = format!(
            r#"{{"version":"1.0.4","channel":"stable","hw_family":"edge101","sha256":"{DIGEST}","esphome_min":"2024.6.0"}}"#
        );
        let m = Manifest::parse(raw.as_bytes()).unwrap();
        assert_eq!(m.version, "1.0.4");
        assert_eq!(m.esphome_min.as_deref(), Some("2024.6.0"));
    }

    #[test]
    fn lists_every_missing_field() {
        let err = Manifest::parse(br#"{"version":"1.0.4","channel":null}"#).unwrap_err();
        let msg = err.to_string();
        for f in ["channel", "hw_family", "sha256"] {
            assert!(msg.contains(f), "{msg}");
        }
        assert!(!msg.contains("\"version\""), "{msg}");
        assert_eq!(err.reason_code(), "manifest_invalid");
    }

    #[test]
    fn rejects_malformed_digest() {
        let raw = br#"{"version":"1","channel":"stable","hw_family":"edge101","sha256":"abc"}"#;
        assert!(Manifest::parse(raw).is_err());
    }

    #[test]
    fn rejects_non_object() {
        assert!(Manifest::parse(b"[1,2]").is_err());
        assert!(Manifest::parse(b"not json").is_err());
    }
}
