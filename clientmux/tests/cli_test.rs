//! End-to-end tests for the clientmux binary

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use serial_test::serial;
use tempfile::TempDir;

use clientmux::config::Config;
use clientmux::{ExtraStrategy, FanOutPolicy};

/// Command isolated from the user's config and data directories
fn clientmux(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("clientmux").expect("Binary should be built");
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("XDG_DATA_HOME", home.path().join("data"))
        .env("NO_COLOR", "1");
    cmd
}

// =============================================================================
// CLI Tests
// =============================================================================

#[test]
fn test_config_prints_defaults() {
    let home = TempDir::new().unwrap();
    clientmux(&home)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("catch-timeout-ms: 60000"))
        .stdout(predicate::str::contains("listener-capacity: 1000"))
        .stdout(predicate::str::contains("mode: drop"));
}

#[test]
fn test_config_reads_local_file() {
    let home = TempDir::new().unwrap();
    fs::write(
        home.path().join(".clientmux.yml"),
        "client:\n  catch-timeout-ms: 1234\n  extra:\n    kind: sequential\n    prefix: demo-\n",
    )
    .unwrap();

    clientmux(&home)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("catch-timeout-ms: 1234"))
        .stdout(predicate::str::contains("prefix: demo-"));
}

#[test]
fn test_missing_explicit_config_fails() {
    let home = TempDir::new().unwrap();
    clientmux(&home)
        .args(["--config", "missing.yml", "config"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}

#[test]
fn test_demo_reports_every_response() {
    let home = TempDir::new().unwrap();
    clientmux(&home)
        .args(["demo", "--clients", "3", "--requests", "4", "--listeners", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("12/12 responses across 3 clients"))
        .stdout(predicate::str::contains("saw 4/4 updates"));
}

#[test]
fn test_demo_writes_log_file() {
    let home = TempDir::new().unwrap();
    clientmux(&home)
        .args(["--log-level", "debug", "demo", "--clients", "1", "--requests", "1"])
        .assert()
        .success();

    let log = fs::read_to_string(home.path().join("data").join("clientmux").join("logs").join("clientmux.log")).unwrap();
    assert!(log.contains("Receive loop started"));
    assert!(log.contains("Client started"));
}

// =============================================================================
// Config Fallback Tests
// =============================================================================

#[test]
#[serial]
fn test_load_prefers_project_local_file() {
    let home = TempDir::new().unwrap();
    fs::write(
        home.path().join(".clientmux.yml"),
        "log-level: warn\nclient:\n  fan-out:\n    mode: block\n    max-wait-ms: 250\n",
    )
    .unwrap();

    let previous = std::env::current_dir().unwrap();
    std::env::set_current_dir(home.path()).unwrap();
    let config = Config::load(None);
    std::env::set_current_dir(previous).unwrap();

    let config = config.unwrap();
    assert_eq!(config.log_level.as_deref(), Some("warn"));
    assert_eq!(config.client.fan_out, FanOutPolicy::Block { max_wait_ms: 250 });
    assert_eq!(config.client.extra, ExtraStrategy::Uuid);
}

#[test]
#[serial]
fn test_broken_local_file_is_skipped() {
    let home = TempDir::new().unwrap();
    fs::write(home.path().join(".clientmux.yml"), "client: [not, a, map]\n").unwrap();

    let previous = std::env::current_dir().unwrap();
    std::env::set_current_dir(home.path()).unwrap();
    let config = Config::load(None);
    std::env::set_current_dir(previous).unwrap();

    // Falls through to the user config or defaults rather than failing
    assert!(config.is_ok());
}
