//! OTA password resolution.
//!
//! # Contract
//! - Config stores only env var NAMES and secret-file KEYS.
//! - Lookups run on every call. A password rotated on disk or in the
//!   environment is picked up by the next flash without a restart.
//! - Absence is normal (`None`); the OTA engine then proceeds without auth and
//!   fails only if the device demands it.
//! - Values never appear in logs or `Debug` output.
//!
//! Lookup order per store is device-specific first, then the shared entry:
//! - env: `{NAME}_{DEVICE}` then `{NAME}` (device id upper-cased, non
//!   alphanumerics mapped to `_`)
//! - yaml: `{key}_{device}` then `{key}` in each file, in file order

use std::fmt;
use std::fs;
use std::path::PathBuf;

use pvo_host::SecretStore;
use serde_yaml::Value as YamlValue;
use tracing::{debug, warn};

use crate::SecretSettings;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Resolve a named environment variable.
/// Returns `None` if the variable is unset or its value is blank.
fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

fn device_token(device_id: &str) -> String {
    device_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

// ---------------------------------------------------------------------------
// EnvSecretStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EnvSecretStore {
    var_name: String,
}

impl EnvSecretStore {
    pub fn new(var_name: impl Into<String>) -> Self {
        Self {
            var_name: var_name.into(),
        }
    }

    fn candidates(&self, device_id: &str) -> [String; 2] {
        [
            format!(
                "{}_{}",
                self.var_name,
                device_token(device_id).to_ascii_uppercase()
            ),
            self.var_name.clone(),
        ]
    }
}

impl SecretStore for EnvSecretStore {
    fn resolve(&self, device_id: &str) -> Option<String> {
        self.candidates(device_id).iter().find_map(|name| {
            let v = resolve_env(name);
            if v.is_some() {
                debug!(env = %name, "ota password resolved from environment");
            }
            v
        })
    }
}

// ---------------------------------------------------------------------------
// YamlSecretStore
// ---------------------------------------------------------------------------

/// Flat `key: value` YAML files, re-read on each lookup.
#[derive(Debug, Clone)]
pub struct YamlSecretStore {
    key: String,
    files: Vec<PathBuf>,
}

impl YamlSecretStore {
    pub fn new(key: impl Into<String>, files: Vec<PathBuf>) -> Self {
        Self {
            key: key.into(),
            files,
        }
    }

    fn read_file(path: &PathBuf) -> Option<YamlValue> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "secret file unreadable");
                return None;
            }
        };
        match serde_yaml::from_str::<YamlValue>(&raw) {
            Ok(v) => Some(v),
            Err(_) => {
                // Parser messages can quote file content; report the path only.
                warn!(path = %path.display(), "secret file is not valid yaml");
                None
            }
        }
    }
}

impl SecretStore for YamlSecretStore {
    fn resolve(&self, device_id: &str) -> Option<String> {
        let keys = [
            format!("{}_{}", self.key, device_token(device_id).to_ascii_lowercase()),
            self.key.clone(),
        ];
        for path in &self.files {
            let Some(doc) = Self::read_file(path) else {
                continue;
            };
            for key in &keys {
                let hit = doc
                    .get(key.as_str())
                    .and_then(|v| v.as_str())
                    .map(str::trim)
                    .filter(|s| !s.is_empty());
                if let Some(s) = hit {
                    debug!(path = %path.display(), key = %key, "ota password resolved from file");
                    return Some(s.to_string());
                }
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Chained store
// ---------------------------------------------------------------------------

/// First store that yields a value wins.
pub struct ChainedSecretStore {
    stores: Vec<Box<dyn SecretStore>>,
}

impl fmt::Debug for ChainedSecretStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainedSecretStore")
            .field("stores", &self.stores.len())
            .finish()
    }
}

impl ChainedSecretStore {
    pub fn new(stores: Vec<Box<dyn SecretStore>>) -> Self {
        Self { stores }
    }
}

impl SecretStore for ChainedSecretStore {
    fn resolve(&self, device_id: &str) -> Option<String> {
        self.stores.iter().find_map(|s| s.resolve(device_id))
    }
}

/// Environment first, then the configured YAML files.
pub fn secret_store_from_config(settings: &SecretSettings) -> ChainedSecretStore {
    let mut stores: Vec<Box<dyn SecretStore>> =
        vec![Box::new(EnvSecretStore::new(&settings.ota_password_env))];
    if !settings.files.is_empty() {
        stores.push(Box::new(YamlSecretStore::new(
            &settings.ota_password_key,
            settings.files.clone(),
        )));
    }
    ChainedSecretStore::new(stores)
}
