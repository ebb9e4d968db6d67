//! CLI integration tests

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_help_describes_the_tool() {
    Command::cargo_bin("cfscout")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Discovers scrapeable application instances"))
        .stdout(predicate::str::contains("--config"));
}

#[test]
fn test_version_prints_version() {
    Command::cargo_bin("cfscout")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("cfscout"));
}

#[test]
fn test_missing_config_file_fails() {
    let dir = tempfile::TempDir::new().unwrap();
    Command::cargo_bin("cfscout")
        .unwrap()
        .arg("--config")
        .arg(dir.path().join("nope.yaml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration file not found"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(
        &path,
        "targets:\n  - org_name: o\n    org_regex: 'o.*'\n",
    )
    .unwrap();

    Command::cargo_bin("cfscout")
        .unwrap()
        .arg("--config")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid configuration"));
}
