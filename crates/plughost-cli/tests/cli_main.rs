//! Basic CLI tests for the plughost command-line interface.

use std::env::consts::{DLL_EXTENSION, DLL_PREFIX};

use assert_cmd::Command;
use predicates::prelude::*;

fn plughost() -> Command {
    let mut cmd = Command::cargo_bin("plughost").unwrap();
    cmd.env_remove("PLUGHOST_PLUGIN_PATH")
        .env_remove("PLUGHOST_HOST_VERSION")
        .env_remove("RUST_LOG");
    cmd
}

/// Test that the CLI binary exists and shows help.
#[test]
fn test_cli_help() {
    plughost()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("info"))
        .stdout(predicate::str::contains("load"));
}

#[test]
fn test_cli_version() {
    plughost()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("plughost"));
}

#[test]
fn test_no_subcommand_shows_error() {
    plughost().assert().failure();
}

#[test]
fn test_load_empty_directory() {
    let dir = tempfile::tempdir().unwrap();
    plughost()
        .arg("--path")
        .arg(dir.path())
        .arg("load")
        .assert()
        .success()
        .stdout(predicate::str::contains("No plugins."))
        .stdout(predicate::str::contains("0 loaded"));
}

#[test]
fn test_load_json_report() {
    let dir = tempfile::tempdir().unwrap();
    plughost()
        .args(["--host-version", "2.3", "--path"])
        .arg(dir.path())
        .args(["load", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"report\""))
        .stdout(predicate::str::contains("\"plugins\": []"));
}

#[test]
fn test_list_shows_candidates() {
    let dir = tempfile::tempdir().unwrap();
    let file = format!("{}acl.{}", DLL_PREFIX, DLL_EXTENSION);
    std::fs::write(dir.path().join(&file), b"").unwrap();

    plughost()
        .arg("--path")
        .arg(dir.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("acl"))
        .stdout(predicate::str::contains("Total: 1 plugin file(s)"));
}

#[test]
fn test_list_respects_name_filter() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["acl", "nat"] {
        let file = format!("{}{}.{}", DLL_PREFIX, name, DLL_EXTENSION);
        std::fs::write(dir.path().join(file), b"").unwrap();
    }

    plughost()
        .args(["--name-filter", "na", "--path"])
        .arg(dir.path())
        .args(["list", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"nat\""))
        .stdout(predicate::str::contains("\"acl\"").not());
}

#[test]
fn test_info_on_missing_file_fails() {
    plughost()
        .args(["info", "/nonexistent/libnothing.so"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load library"));
}

#[test]
fn test_invalid_host_version_fails() {
    let dir = tempfile::tempdir().unwrap();
    plughost()
        .args(["--host-version", "latest", "--path"])
        .arg(dir.path())
        .arg("load")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid host version"));
}
