//! Smoke tests -- verify the binary runs and the offline commands work.

use assert_cmd::Command;
use predicates::prelude::*;

fn cli() -> Command {
    let mut cmd = Command::cargo_bin("sentinel-backend").unwrap();
    cmd.env_remove("SENTINEL_CONFIG")
        .env_remove("CROWDSEC_API_URL")
        .env_remove("CROWDSEC_LOGIN")
        .env_remove("CROWDSEC_PASSWORD")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_help() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Alert ingestion"));
}

#[test]
fn test_cli_version() {
    cli()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sentinel-backend"));
}

#[test]
fn test_subcommands_exist() {
    for sub in ["serve", "sync-once", "list", "ingest"] {
        cli().args([sub, "--help"]).assert().success();
    }
}

#[test]
fn test_missing_config_file_fails() {
    cli()
        .args(["--config", "/nonexistent/sentinel.toml", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read config file"));
}

#[test]
fn test_ingest_then_list() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("alerts.db");
    let db = db.to_str().unwrap();
    let input = dir.path().join("alerts.json");
    std::fs::write(
        &input,
        r#"[
            {"uuid": "a1", "scenario": "ssh-bf", "source": {"ip": "1.2.3.4"},
             "meta": [{"key": "severity", "value": "high"}], "created_at": "2024-01-01T00:00:00Z"},
            "garbage",
            {"uuid": "a2", "scenario": "http-probing", "created_at": "2024-01-02T00:00:00Z"}
        ]"#,
    )
    .unwrap();

    cli()
        .args(["--db", db, "ingest"])
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("2 inserted, 1 rejected"));

    // Re-ingesting the same file stores nothing new.
    cli()
        .args(["--db", db, "ingest"])
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("0 inserted"));

    let output = cli()
        .args(["--db", db, "list", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let alerts: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let alerts = alerts.as_array().unwrap();
    assert_eq!(alerts.len(), 2);
    assert_eq!(alerts[0]["id"], "a2");
    assert_eq!(alerts[1]["id"], "a1");
    assert_eq!(alerts[1]["severity"], "high");
}

#[test]
fn test_list_empty_database() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("empty.db");
    cli()
        .args(["--db", db.to_str().unwrap(), "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No alerts stored."));
}

#[test]
fn test_config_fallback_warning_is_logged() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("alerts.db");
    cli()
        .env("SENTINEL_CONFIG", dir.path().join("absent.toml"))
        .args(["--db", db.to_str().unwrap(), "list"])
        .assert()
        .success()
        .stderr(predicate::str::contains("SENTINEL_CONFIG set but"));
}
