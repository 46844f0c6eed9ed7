//! Integration tests for the schemasync CLI

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Get the schemasync binary, isolated from the caller's environment
#[allow(deprecated)]
fn schemasync_cmd(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("schemasync").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("SCHEMASYNC_ENV")
        .env_remove("SCHEMASYNC_DEV_DATABASE_URL")
        .env_remove("SCHEMASYNC_PROD_DATABASE_URL")
        .env_remove("SCHEMASYNC_LOG");
    cmd
}

#[test]
fn test_help_command() {
    let dir = TempDir::new().unwrap();
    schemasync_cmd(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage: schemasync"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("mark"))
        .stdout(predicate::str::contains("sync"))
        .stdout(predicate::str::contains("--env"));
}

#[test]
fn test_version_flag() {
    let dir = TempDir::new().unwrap();
    schemasync_cmd(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_sync_help() {
    let dir = TempDir::new().unwrap();
    schemasync_cmd(&dir)
        .args(["sync", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--reference"))
        .stdout(predicate::str::contains("--target"))
        .stdout(predicate::str::contains("--stdout"));
}

#[test]
fn test_unknown_environment_rejected() {
    let dir = TempDir::new().unwrap();
    schemasync_cmd(&dir)
        .args(["--env", "staging", "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("staging"));
}

#[test]
fn test_status_without_url_names_the_variable() {
    let dir = TempDir::new().unwrap();
    schemasync_cmd(&dir)
        .arg("status")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("SCHEMASYNC_DEV_DATABASE_URL"))
        .stderr(predicate::str::contains("development"));
}

#[test]
fn test_production_does_not_fall_back_to_development() {
    let dir = TempDir::new().unwrap();
    schemasync_cmd(&dir)
        .env("SCHEMASYNC_DEV_DATABASE_URL", "postgresql://dev@127.0.0.1:1/app")
        .args(["--env", "production", "run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("SCHEMASYNC_PROD_DATABASE_URL"))
        .stderr(predicate::str::contains("production"));
}

#[test]
fn test_environment_from_variable() {
    let dir = TempDir::new().unwrap();
    schemasync_cmd(&dir)
        .env("SCHEMASYNC_ENV", "production")
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("SCHEMASYNC_PROD_DATABASE_URL"));
}

#[test]
fn test_sync_refuses_identical_databases() {
    let dir = TempDir::new().unwrap();
    let url = "postgresql://app@127.0.0.1:1/app";
    schemasync_cmd(&dir)
        .env("SCHEMASYNC_DEV_DATABASE_URL", url)
        .env("SCHEMASYNC_PROD_DATABASE_URL", url)
        .arg("sync")
        .assert()
        .failure()
        .stderr(predicate::str::contains("same database"));
}

#[test]
fn test_sync_refuses_same_environment_twice() {
    let dir = TempDir::new().unwrap();
    schemasync_cmd(&dir)
        .args(["sync", "--reference", "production", "--target", "production"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("both production"));
}

#[test]
fn test_missing_explicit_config_file() {
    let dir = TempDir::new().unwrap();
    schemasync_cmd(&dir)
        .args(["--config", "missing.toml", "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing.toml"));
}

#[test]
fn test_config_file_urls_are_used() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("schemasync.toml"),
        r#"
[environments.development]
url = "postgresql://app@127.0.0.1:1/shared"

[environments.production]
url = "postgresql://app@127.0.0.1:1/shared"
"#,
    )
    .unwrap();

    schemasync_cmd(&dir)
        .arg("sync")
        .assert()
        .failure()
        .stderr(predicate::str::contains("127.0.0.1:1/shared"));
}

#[test]
fn test_invalid_url_is_reported_without_connecting() {
    let dir = TempDir::new().unwrap();
    schemasync_cmd(&dir)
        .env("SCHEMASYNC_DEV_DATABASE_URL", "mysql://localhost/app")
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid database URL"));
}
