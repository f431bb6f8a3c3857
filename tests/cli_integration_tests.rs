//! CLI integration tests
//!
//! These tests run the compiled binary against temporary directories and
//! verify exit codes, human output and the report files:
//! - 0: every file valid
//! - 1: at least one file invalid
//! - 2: fatal error
//! - 3: configuration error

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const VALID_MANIFEST: &str = r#"service: user-api
replicas: 3
image: myregistry.com/user-api:1.4.2
env:
  DATABASE_URL: postgres://db:5432/users
"#;

const INVALID_MANIFEST: &str = r#"service: orders
replicas: 80
image: orders:latest
env:
  DATABASE_URL: test
"#;

fn write(dir: &Path, relative: &str, content: &str) {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

/// A project with `deploy/` holding two valid manifests
fn valid_project() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    write(temp_dir.path(), "deploy/user.yaml", VALID_MANIFEST);
    write(
        temp_dir.path(),
        "deploy/nested/worker.yml",
        &VALID_MANIFEST.replace("user-api", "worker"),
    );
    temp_dir
}

fn confguard(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("confguard").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("RUST_LOG")
        .args(["--color", "never"]);
    cmd
}

#[test]
fn test_valid_project_exits_zero() {
    let dir = valid_project();
    confguard(&dir)
        .args(["--path", "deploy"])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("Valid files: 2  Invalid files: 0"))
        .stdout(predicate::str::contains("passed: 2 files"))
        .stdout(predicate::str::contains("(local backend)"));
}

#[test]
fn test_invalid_manifest_exits_one() {
    let dir = valid_project();
    write(dir.path(), "deploy/orders.yaml", INVALID_MANIFEST);

    confguard(&dir)
        .args(["--path", "deploy"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("✗ orders.yaml"))
        .stdout(predicate::str::contains(
            "error replicas-range: replicas must be an integer between 1 and 50",
        ))
        .stdout(predicate::str::contains(
            "error forbidden-database: Database name cannot be 'test': [DATABASE_URL]",
        ))
        .stdout(predicate::str::contains("Invalid files: 1"));
}

#[test]
fn test_cli_replica_bounds_override_config() {
    let dir = valid_project();
    confguard(&dir)
        .args(["--path", "deploy", "--replicas-min", "5", "--replicas-max", "8"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("between 5 and 8"));
}

#[test]
fn test_malformed_config_exits_three() {
    let dir = valid_project();
    write(dir.path(), "confguard.toml", "[confguard\nversion = ");

    confguard(&dir)
        .args(["--path", "deploy"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn test_unknown_config_key_exits_three() {
    let dir = valid_project();
    write(dir.path(), "confguard.toml", "[confguard]\nversion = \"1\"\nspeed = 11\n");

    confguard(&dir).args(["--path", "deploy"]).assert().code(3);
}

#[test]
fn test_inverted_replica_bounds_exit_three() {
    let dir = valid_project();
    confguard(&dir)
        .args(["--path", "deploy", "--replicas-min", "9", "--replicas-max", "2"])
        .assert()
        .code(3);
}

#[test]
fn test_missing_path_is_fatal() {
    let dir = valid_project();
    confguard(&dir)
        .args(["--path", "nowhere"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("nowhere"));
}

#[test]
fn test_no_rules_is_fatal() {
    let dir = valid_project();
    write(dir.path(), "confguard.toml", "[rules]\nbuiltin = false\n");

    confguard(&dir)
        .args(["--path", "deploy"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("rule"));
}

#[test]
fn test_zero_concurrency_rejected_by_parser() {
    let dir = valid_project();
    confguard(&dir)
        .args(["--concurrency", "0"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("concurrency"));
}

#[test]
fn test_list_rules() {
    let dir = valid_project();
    confguard(&dir)
        .arg("--list-rules")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("required-keys"))
        .stdout(predicate::str::contains("replicas-range-1-10"))
        .stdout(predicate::str::contains("8 rule(s) enabled"));
}

#[test]
fn test_list_rules_respects_overrides_and_plugins() {
    let dir = valid_project();
    write(
        dir.path(),
        "confguard.toml",
        "[rules.overrides]\nenv-key-case = false\n",
    );
    write(
        dir.path(),
        "rules/owner.toml",
        "[rule]\nid = \"needs-owner\"\nseverity = \"info\"\n\n[check]\nkind = \"required-keys\"\nkeys = [\"owner\"]\n",
    );

    confguard(&dir)
        .args(["--list-rules", "--rules", "rules"])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("needs-owner"))
        .stdout(predicate::str::contains("env-key-case").not())
        .stdout(predicate::str::contains("8 rule(s) enabled"));
}

#[test]
fn test_plugin_rule_failure_reported() {
    let dir = valid_project();
    write(
        dir.path(),
        "rules/owner.toml",
        "[rule]\nid = \"needs-owner\"\nseverity = \"warning\"\n\n[check]\nkind = \"required-keys\"\nkeys = [\"owner\"]\n",
    );
    write(dir.path(), "rules/broken.toml", "this is not toml [");

    confguard(&dir)
        .args(["--path", "deploy", "--rules", "rules"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains(
            "warning needs-owner: Missing required keys: [owner]",
        ))
        .stderr(predicate::str::contains("broken.toml"));
}

#[test]
fn test_reports_written() {
    let dir = valid_project();
    write(dir.path(), "deploy/orders.yaml", INVALID_MANIFEST);

    confguard(&dir)
        .args([
            "--path",
            "deploy",
            "--report",
            "out/report.json",
            "--ndjson",
            "out/runs.ndjson",
        ])
        .assert()
        .code(1);

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("out/report.json")).unwrap())
            .unwrap();
    assert_eq!(report["totals"]["files"], 3);
    assert_eq!(report["totals"]["invalid"], 1);
    assert_eq!(report["status"], "completed");
    assert_eq!(report["backend"], "local");
    let files: Vec<&str> = report["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["file"].as_str().unwrap())
        .collect();
    assert_eq!(files, vec!["nested/worker.yml", "orders.yaml", "user.yaml"]);

    let stream = fs::read_to_string(dir.path().join("out/runs.ndjson")).unwrap();
    assert_eq!(stream.lines().count(), 4);

    // A second run appends rather than overwrites
    confguard(&dir)
        .args(["--path", "deploy", "--ndjson", "out/runs.ndjson"])
        .assert()
        .code(1);
    let stream = fs::read_to_string(dir.path().join("out/runs.ndjson")).unwrap();
    assert_eq!(stream.lines().count(), 8);
}

#[test]
fn test_config_file_include_patterns() {
    let dir = valid_project();
    write(dir.path(), "deploy/orders.yaml", INVALID_MANIFEST);
    write(
        dir.path(),
        "confguard.toml",
        "[storage]\ninclude = [\"**/*.yml\"]\n",
    );

    confguard(&dir)
        .args(["--path", "deploy"])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("passed: 1 files"));
}
