use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn tether_cmd() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("tether"));
    cmd.env("RUST_LOG", "warn");
    cmd
}

fn write_descriptor(dir: &Path, expires_at: &str) -> String {
    let path = dir.join("endpoint.json");
    let descriptor = format!(
        r#"{{"id": "colab-1", "address": "ws://127.0.0.1:9/tty", "token": "t", "expires_at": "{expires_at}"}}"#
    );
    fs::write(&path, descriptor).expect("write descriptor");
    path.display().to_string()
}

#[test]
fn help_lists_commands() {
    tether_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("exec"))
        .stdout(contains("setup"))
        .stdout(contains("validate"));
}

#[test]
fn endpoint_flag_is_required() {
    tether_cmd()
        .arg("validate")
        .assert()
        .failure()
        .stderr(contains("--endpoint"));
}

#[test]
fn unreadable_descriptor_is_reported() {
    let dir = TempDir::new().expect("dir");
    tether_cmd()
        .args(["--endpoint", &dir.path().join("missing.json").display().to_string()])
        .arg("validate")
        .assert()
        .failure()
        .stderr(contains("failed to read endpoint descriptor"));
}

#[test]
fn expired_token_fails_exec_without_connecting() {
    let dir = TempDir::new().expect("dir");
    let endpoint = write_descriptor(dir.path(), "2000-01-01T00:00:00Z");
    tether_cmd()
        .args(["--endpoint", &endpoint, "exec", "echo", "hi"])
        .assert()
        .failure()
        .stderr(contains("expired"));
}

#[test]
fn setup_without_config_reports_not_configured() {
    let dir = TempDir::new().expect("dir");
    let endpoint = write_descriptor(dir.path(), "2999-01-01T00:00:00Z");
    let config = dir.path().join("sync.json").display().to_string();
    tether_cmd()
        .args(["--endpoint", &endpoint, "--config", &config, "setup"])
        .assert()
        .failure()
        .stderr(contains("not configured"));
}

#[test]
fn status_json_without_config() {
    let dir = TempDir::new().expect("dir");
    let endpoint = write_descriptor(dir.path(), "2999-01-01T00:00:00Z");
    let config = dir.path().join("sync.json").display().to_string();
    tether_cmd()
        .args(["--endpoint", &endpoint, "--config", &config, "status", "--json"])
        .assert()
        .success()
        .stdout(contains("\"status\": \"NOT_CONFIGURED\""))
        .stdout(contains("\"endpoint_id\": \"colab-1\""));
}
