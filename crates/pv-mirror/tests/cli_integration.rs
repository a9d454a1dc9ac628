//! CLI integration tests
//!
//! Tests the pv-mirror binary using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;

fn pv_mirror() -> Command {
    let mut cmd = Command::cargo_bin("pv-mirror")
        .expect("Failed to locate pv-mirror binary - ensure it's built before running tests");
    cmd.env_remove("SHARED_KEY")
        .env_remove("AUTH_TOKEN")
        .env_remove("PIVOT_NAME")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_help() {
    pv_mirror()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("pv-mirror"))
        .stdout(predicate::str::contains("--addr1"))
        .stdout(predicate::str::contains("--client"));
}

#[test]
fn test_cli_version() {
    pv_mirror()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_missing_config_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    pv_mirror()
        .args(["--config", &dir.path().join("none.toml").to_string_lossy()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}

#[test]
fn test_short_shared_key_is_fatal() {
    pv_mirror()
        .env("SHARED_KEY", "too-short")
        .args(["--name", "cli", "--addr1", "0", "--addr2", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Shared key must be 32 bytes, got 9"));
}

#[test]
fn test_unsupported_protocol_is_rejected() {
    pv_mirror()
        .args(["--protocol", "udp", "--addr1", "0", "--addr2", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("udp"));
}

#[test]
fn test_invalid_endpoint_is_fatal() {
    pv_mirror()
        .env("SHARED_KEY", "0123456789abcdef0123456789abcdef")
        .args(["--addr1", "not-an-endpoint", "--addr2", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not-an-endpoint"));
}

#[test]
fn test_config_file_is_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mirror.toml");
    std::fs::write(&path, "name = \"from-file\"\nendpoint_a = \"nope\"\n").unwrap();

    // The file's endpoint is used, and it is invalid
    pv_mirror()
        .env("SHARED_KEY", "0123456789abcdef0123456789abcdef")
        .args(["--config", &path.to_string_lossy()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nope"));
}
