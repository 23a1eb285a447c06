use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;

fn write(dir: &tempfile::TempDir, name: &str, body: &str) -> String {
    let p = dir.path().join(name);
    fs::write(&p, body).unwrap();
    p.to_string_lossy().to_string()
}

fn config_hash_line(out: &[u8]) -> String {
    String::from_utf8_lossy(out)
        .lines()
        .find(|l| l.starts_with("config_hash="))
        .unwrap()
        .to_string()
}

#[test]
fn config_hash_ignores_key_order() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let a = write(&dir, "a.yaml", "flash:\n  ota_port: 3232\n  max_polls: 30\n");
    let b = write(&dir, "b.yaml", "flash:\n  max_polls: 30\n  ota_port: 3232\n");

    let out_a = Command::cargo_bin("pvo")?.args(["config-hash", &a]).output()?;
    let out_b = Command::cargo_bin("pvo")?.args(["config-hash", &b]).output()?;
    assert!(out_a.status.success());
    assert!(out_b.status.success());
    assert_eq!(config_hash_line(&out_a.stdout), config_hash_line(&out_b.stdout));
    Ok(())
}

#[test]
fn later_layer_changes_the_hash() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let base = write(&dir, "base.yaml", "artifacts:\n  channel: stable\n");
    let site = write(&dir, "site.yaml", "artifacts:\n  channel: beta\n");

    let alone = Command::cargo_bin("pvo")?.args(["config-hash", &base]).output()?;
    let layered = Command::cargo_bin("pvo")?
        .args(["config-hash", &base, &site])
        .output()?;
    assert_ne!(config_hash_line(&alone.stdout), config_hash_line(&layered.stdout));
    assert!(String::from_utf8_lossy(&layered.stdout).contains("\"channel\":\"beta\""));
    Ok(())
}

#[test]
fn literal_secret_in_config_is_refused() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let p = write(&dir, "bad.yaml", "secrets:\n  ota_password_env: ghp_abcdef123456\n");

    Command::cargo_bin("pvo")?
        .args(["config-hash", &p])
        .assert()
        .failure();
    Ok(())
}

#[test]
fn config_check_reports_unused_keys_and_effective_values() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let p = write(
        &dir,
        "site.yaml",
        "flash:\n  min_firmware_size_kb: 400\nflsh:\n  typo: 1\n",
    );

    Command::cargo_bin("pvo")?
        .args(["config-check", &p])
        .assert()
        .success()
        .stdout(predicate::str::contains("unused_key=/flsh/typo"))
        .stdout(predicate::str::contains("min_firmware_size_kb=400"))
        .stdout(predicate::str::contains("channel=stable"));

    Command::cargo_bin("pvo")?
        .args(["config-check", "--strict", &p])
        .assert()
        .failure();
    Ok(())
}

#[test]
fn config_check_rejects_out_of_range_values() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let p = write(&dir, "site.yaml", "gates:\n  freshness_minutes: 90\n");

    Command::cargo_bin("pvo")?
        .args(["config-check", &p])
        .assert()
        .failure()
        .stderr(predicate::str::contains("gates.freshness_minutes"));
    Ok(())
}
