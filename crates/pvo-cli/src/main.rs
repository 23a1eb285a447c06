use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pvo_artifacts::{check_min_size, ensure_hw_family, verify_sha256, FirmwareArtifact, Manifest};
use pvo_config::{report_unused_keys, UnusedKeyPolicy};
use pvo_ota::{protocol::DEFAULT_PORT, AuthMode, OtaClient, OtaSettings};

#[derive(Parser)]
#[command(name = "pvo")]
#[command(about = "PV autonomy firmware OTA tooling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> site -> device...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Validate layered config and list keys nothing reads
    ConfigCheck {
        #[arg(required = true)]
        paths: Vec<String>,

        /// Fail on unused keys instead of warning
        #[arg(long, default_value_t = false)]
        strict: bool,
    },

    /// Run the local integrity checks on a downloaded artifact
    Verify {
        /// manifest.json path
        #[arg(long)]
        manifest: PathBuf,

        /// firmware.bin path
        #[arg(long)]
        firmware: PathBuf,

        /// Hardware family the target device belongs to
        #[arg(long = "hw-family")]
        hw_family: String,

        #[arg(long = "min-size-kb", default_value_t = 300)]
        min_size_kb: u64,
    },

    /// Upload a firmware image straight to a device (no gates, no artifact checks)
    Upload {
        /// Device host or IP
        #[arg(long)]
        host: String,

        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// firmware.bin path
        #[arg(long)]
        firmware: PathBuf,

        /// Env var holding the OTA password (unset or empty: no password)
        #[arg(long = "password-env", default_value = "PVO_OTA_PASSWORD")]
        password_env: String,

        #[arg(long = "read-timeout-secs", default_value_t = 90)]
        read_timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env.local if present (dev convenience).
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = pvo_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::ConfigCheck { paths, strict } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = pvo_config::load_layered_yaml(&path_refs)?;
            let policy = if strict {
                UnusedKeyPolicy::Fail
            } else {
                UnusedKeyPolicy::Warn
            };
            let report = report_unused_keys(&loaded.config_json, policy)?;
            let cfg = loaded.ops()?;
            for leaf in &report.unused_leaf_pointers {
                println!("unused_key={leaf}");
            }
            println!("config_hash={}", loaded.config_hash);
            println!("channel={}", cfg.artifacts.channel);
            println!("hw_family={}", cfg.artifacts.hw_family);
            println!("min_firmware_size_kb={}", cfg.flash.min_firmware_size_kb);
            println!("gates_freshness_minutes={}", cfg.gates.freshness_minutes);
            println!("gates_strict={}", cfg.gates.strict);
        }

        Commands::Verify {
            manifest,
            firmware,
            hw_family,
            min_size_kb,
        } => {
            let raw = fs::read(&manifest)
                .with_context(|| format!("failed to read manifest: {}", manifest.display()))?;
            let m = Manifest::parse(&raw)?;
            ensure_hw_family(&m, &hw_family)?;
            let artifact = FirmwareArtifact::new(m, &firmware)
                .with_context(|| format!("failed to stat firmware: {}", firmware.display()))?;
            check_min_size(artifact.size(), min_size_kb * 1024)?;
            verify_sha256(&artifact)?;

            println!("version={}", artifact.version());
            println!("channel={}", artifact.channel());
            println!("hw_family={}", artifact.hw_family());
            println!("size_bytes={}", artifact.size());
            println!("sha256_ok=true");
        }

        Commands::Upload {
            host,
            port,
            firmware,
            password_env,
            read_timeout_secs,
        } => {
            let image = fs::read(&firmware)
                .with_context(|| format!("failed to read firmware: {}", firmware.display()))?;
            let password = std::env::var(&password_env)
                .ok()
                .filter(|v| !v.trim().is_empty());
            if password.is_none() {
                tracing::warn!(env = %password_env, "no OTA password set, uploading without auth");
            }

            let client = OtaClient::new(OtaSettings {
                port,
                read_timeout: Duration::from_secs(read_timeout_secs),
                ..OtaSettings::default()
            });
            let mut handle = client.spawn_upload(host.clone(), image, password);
            while let Some(pct) = handle.progress.recv().await {
                println!("progress={pct}");
            }
            let report = handle
                .task
                .await
                .context("upload task failed")?
                .with_context(|| format!("OTA upload to {host}:{port} failed"))?;

            println!("upload_ok=true");
            println!("compressed={}", report.compressed);
            let auth = match report.auth {
                AuthMode::None => "none",
                AuthMode::Sha256 => "sha256",
            };
            println!("auth={auth}");
            println!("firmware_bytes={}", report.firmware_bytes);
            println!("payload_bytes={}", report.payload_bytes);
        }
    }

    Ok(())
}

/// Logs go to stderr so stdout stays `key=value`.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();
}
