//! Typed configuration surface.
//!
//! Mirrors the options an operator can change: release channel, hardware
//! family default, minimum firmware size, gate freshness window and strict
//! gating. The rest are transport and monitor tunables with safe defaults.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Release channels accepted by `artifacts.channel`.
pub const CHANNELS: &[&str] = &["stable", "beta", "dev"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("CONFIG_INVALID {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("CONFIG_DECODE: {0}")]
    Decode(#[from] serde_json::Error),
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// OpsConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpsConfig {
    pub artifacts: ArtifactSettings,
    pub flash: FlashSettings,
    pub gates: GateSettings,
    pub restart: RestartSettings,
    pub secrets: SecretSettings,
}

impl OpsConfig {
    /// Decode from a merged config document and validate ranges.
    ///
    /// Missing sections and keys take their defaults.
    pub fn from_json(config_json: &Value) -> Result<Self, ConfigError> {
        let cfg: OpsConfig = if config_json.is_null() {
            OpsConfig::default()
        } else {
            serde_json::from_value(config_json.clone())?
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let a = &self.artifacts;
        if !CHANNELS.contains(&a.channel.as_str()) {
            return Err(invalid(
                "artifacts.channel",
                format!("'{}' not one of {:?}", a.channel, CHANNELS),
            ));
        }
        if a.hw_family.trim().is_empty() {
            return Err(invalid("artifacts.hw_family", "must not be empty"));
        }

        let f = &self.flash;
        if !(50..=5000).contains(&f.min_firmware_size_kb) {
            return Err(invalid(
                "flash.min_firmware_size_kb",
                format!("{} outside 50..=5000", f.min_firmware_size_kb),
            ));
        }
        if f.ota_port == 0 {
            return Err(invalid("flash.ota_port", "must be non-zero"));
        }
        if f.poll_interval_secs == 0 {
            return Err(invalid("flash.poll_interval_secs", "must be non-zero"));
        }
        if f.max_polls == 0 {
            return Err(invalid("flash.max_polls", "must be non-zero"));
        }
        for (field, v) in [
            ("flash.connect_timeout_secs", f.connect_timeout_secs),
            ("flash.read_timeout_secs", f.read_timeout_secs),
            ("flash.overall_timeout_secs", f.overall_timeout_secs),
        ] {
            if v == 0 {
                return Err(invalid(field, "timeout must be non-zero"));
            }
        }

        if !(1..=60).contains(&self.gates.freshness_minutes) {
            return Err(invalid(
                "gates.freshness_minutes",
                format!("{} outside 1..=60", self.gates.freshness_minutes),
            ));
        }
        if !(1..=600).contains(&self.restart.max_wait_secs) {
            return Err(invalid(
                "restart.max_wait_secs",
                format!("{} outside 1..=600", self.restart.max_wait_secs),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactSettings {
    pub channel: String,
    pub hw_family: String,
    pub owner: String,
    pub repo: String,
    /// Release-asset host: `{download_base_url}/{owner}/{repo}/releases/download/...`
    pub download_base_url: String,
    /// Releases API host used to resolve the latest version.
    pub api_base_url: String,
    /// Skip version lookup and always flash this version.
    pub pinned_version: Option<String>,
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self {
            channel: "stable".to_string(),
            hw_family: "edge101".to_string(),
            owner: "PVAutonomy".to_string(),
            repo: "pvautonomy-firmware".to_string(),
            download_base_url: "https://github.com".to_string(),
            api_base_url: "https://api.github.com".to_string(),
            pinned_version: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashSettings {
    pub min_firmware_size_kb: u64,
    pub ota_port: u16,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub overall_timeout_secs: u64,
    /// Pause between the final OTA ack and the first reboot poll.
    pub reboot_grace_secs: u64,
    pub poll_interval_secs: u64,
    pub max_polls: u32,
    /// Fixed wait when the device exposes no monitor signal.
    pub unmonitored_wait_secs: u64,
    /// Parent directory for per-attempt temp workspaces (system temp if unset).
    pub workspace_root: Option<PathBuf>,
}

impl Default for FlashSettings {
    fn default() -> Self {
        Self {
            min_firmware_size_kb: 300,
            ota_port: 3232,
            connect_timeout_secs: 20,
            read_timeout_secs: 90,
            overall_timeout_secs: 120,
            reboot_grace_secs: 3,
            poll_interval_secs: 2,
            max_polls: 45,
            unmonitored_wait_secs: 15,
            workspace_root: None,
        }
    }
}

impl FlashSettings {
    pub fn min_firmware_size_bytes(&self) -> u64 {
        self.min_firmware_size_kb * 1024
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn overall_timeout(&self) -> Duration {
        Duration::from_secs(self.overall_timeout_secs)
    }

    pub fn reboot_grace(&self) -> Duration {
        Duration::from_secs(self.reboot_grace_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn unmonitored_wait(&self) -> Duration {
        Duration::from_secs(self.unmonitored_wait_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateSettings {
    pub freshness_minutes: u32,
    /// `true`: a `warn` gate summary blocks flashing. `false`: it is allowed
    /// with a warning log. `fail` always blocks.
    pub strict: bool,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            freshness_minutes: 10,
            strict: true,
        }
    }
}

impl GateSettings {
    pub fn freshness_window(&self) -> Duration {
        Duration::from_secs(u64::from(self.freshness_minutes) * 60)
    }
}

/// Restart-device operation. Polls at `flash.poll_interval_secs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartSettings {
    /// Bound on reboot detection after the restart command.
    pub max_wait_secs: u64,
}

impl Default for RestartSettings {
    fn default() -> Self {
        Self { max_wait_secs: 90 }
    }
}

impl RestartSettings {
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

/// Where the OTA password comes from. Only names live here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretSettings {
    /// Env var holding the password. `{NAME}_{DEVICE}` is tried first.
    pub ota_password_env: String,
    /// Key looked up in the YAML secret files. `{key}_{device}` is tried first.
    pub ota_password_key: String,
    /// YAML secret files searched in order.
    pub files: Vec<PathBuf>,
}

impl Default for SecretSettings {
    fn default() -> Self {
        Self {
            ota_password_env: "PVO_OTA_PASSWORD".to_string(),
            ota_password_key: "ota_password".to_string(),
            files: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg = OpsConfig::from_json(&json!({})).unwrap();
        assert_eq!(cfg, OpsConfig::default());
        assert_eq!(cfg.flash.min_firmware_size_bytes(), 300 * 1024);
        assert_eq!(cfg.flash.ota_port, 3232);
        assert!(cfg.gates.strict);
    }

    #[test]
    fn unknown_channel_is_rejected() {
        let err = OpsConfig::from_json(&json!({"artifacts": {"channel": "nightly"}})).unwrap_err();
        assert!(err.to_string().contains("artifacts.channel"), "{err}");
    }

    #[test]
    fn min_size_range_is_enforced() {
        assert!(OpsConfig::from_json(&json!({"flash": {"min_firmware_size_kb": 10}})).is_err());
        assert!(OpsConfig::from_json(&json!({"flash": {"min_firmware_size_kb": 5000}})).is_ok());
    }

    #[test]
    fn restart_wait_defaults_and_range() {
        let cfg = OpsConfig::from_json(&json!({})).unwrap();
        assert_eq!(cfg.restart.max_wait(), Duration::from_secs(90));
        assert!(OpsConfig::from_json(&json!({"restart": {"max_wait_secs": 0}})).is_err());
        assert!(OpsConfig::from_json(&json!({"restart": {"max_wait_secs": 120}})).is_ok());
    }

    #[test]
    fn freshness_range_is_enforced() {
        assert!(OpsConfig::from_json(&json!({"gates": {"freshness_minutes": 0}})).is_err());
        assert!(OpsConfig::from_json(&json!({"gates": {"freshness_minutes": 61}})).is_err());
        let cfg = OpsConfig::from_json(&json!({"gates": {"freshness_minutes": 30}})).unwrap();
        assert_eq!(cfg.gates.freshness_window(), Duration::from_secs(1800));
    }
}
