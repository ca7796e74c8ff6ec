//! Integration tests for the synthmon binary.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Helper to create a synthmon Command isolated from the caller's environment
fn synthmon(dir: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("synthmon");
    cmd.current_dir(dir)
        .env_remove("RUST_LOG")
        .env_remove("SLACK_WEBHOOK_URL")
        .env_remove("SLACK_TOKEN")
        .env("ARTIFACT_DIR", dir.join("artifacts"));
    cmd
}

fn write_check(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_synthmon_help() {
        let dir = TempDir::new().unwrap();
        synthmon(dir.path())
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("validate"))
            .stdout(predicate::str::contains("run"));
    }

    #[test]
    fn test_synthmon_version() {
        let dir = TempDir::new().unwrap();
        synthmon(dir.path()).arg("--version").assert().success();
    }

    #[test]
    fn test_unknown_subcommand_fails() {
        let dir = TempDir::new().unwrap();
        synthmon(dir.path()).arg("frobnicate").assert().failure();
    }
}

// =============================================================================
// Validate Tests
// =============================================================================

mod validate {
    use super::*;

    #[test]
    fn test_validate_reports_transports() {
        let dir = TempDir::new().unwrap();
        let check = write_check(
            dir.path(),
            "api.yml",
            r#"
name: api
steps:
  - goto: https://example.com/health
  - check:
      response: 200
"#,
        );

        synthmon(dir.path())
            .arg("validate")
            .arg(&check)
            .assert()
            .success()
            .stdout(predicate::str::contains("Transports: requests"))
            .stdout(predicate::str::contains("Check is valid."));
    }

    #[test]
    fn test_validate_browser_check() {
        let dir = TempDir::new().unwrap();
        let check = write_check(
            dir.path(),
            "login.yml",
            r#"
name: login
steps:
  - goto: https://example.com/login
  - find:
      - id: username
      - actions:
          - type: alice
"#,
        );

        synthmon(dir.path())
            .arg("validate")
            .arg(&check)
            .assert()
            .success()
            .stdout(predicate::str::contains("Transports: firefox, chrome"));
    }

    #[test]
    fn test_validate_lists_every_error() {
        let dir = TempDir::new().unwrap();
        let check = write_check(
            dir.path(),
            "bad.yml",
            r#"
name: bad
steps:
  - goto: ""
  - check:
      response: not-a-number
"#,
        );

        synthmon(dir.path())
            .arg("validate")
            .arg(&check)
            .assert()
            .failure()
            .stdout(predicate::str::contains("Root -> GoTo: Goto value must contain a URL"))
            .stdout(predicate::str::contains("Root -> Check -> CheckResponse"));
    }

    #[test]
    fn test_validate_missing_file() {
        let dir = TempDir::new().unwrap();
        synthmon(dir.path())
            .arg("validate")
            .arg("nope.yml")
            .assert()
            .failure();
    }
}

// =============================================================================
// Config Tests
// =============================================================================

mod config {
    use super::*;

    #[test]
    fn test_config_shows_defaults() {
        let dir = TempDir::new().unwrap();
        synthmon(dir.path())
            .arg("config")
            .assert()
            .success()
            .stdout(predicate::str::contains("[browser]"))
            .stdout(predicate::str::contains("teardown_on_failure = true"));
    }

    #[test]
    fn test_config_file_and_warnings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "[checks]\nmin_timeout_secs = 10\nmax_timeout_secs = 5\n").unwrap();

        synthmon(dir.path())
            .arg("--config")
            .arg(&path)
            .arg("config")
            .assert()
            .success()
            .stdout(predicate::str::contains("Warnings:"))
            .stdout(predicate::str::contains("greater than max_timeout_secs"));
    }
}

// =============================================================================
// Run Tests
// =============================================================================

mod run {
    use super::*;

    #[test]
    fn test_run_unreachable_url_fails() {
        let dir = TempDir::new().unwrap();
        let check = write_check(
            dir.path(),
            "probe.yml",
            r#"
name: probe
timeout: 10
steps:
  - goto: http://127.0.0.1:9/
  - check:
      response: 200
"#,
        );

        synthmon(dir.path())
            .arg("run")
            .arg(&check)
            .arg("--environment")
            .arg("ci")
            .assert()
            .failure()
            .stdout(predicate::str::contains("probe (ci): FAILED"));

        let runs: Vec<_> = fs::read_dir(dir.path().join("artifacts/probe/ci"))
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(runs.len(), 1);
        assert_eq!(fs::read_to_string(runs[0].join("status")).unwrap(), "FAILED");
        assert!(runs[0].join("step-data.json").exists());
        let log = fs::read_to_string(runs[0].join("artifact.log")).unwrap();
        assert!(log.contains("Root -> GoTo"));
    }

    #[test]
    fn test_run_invalid_check_fails() {
        let dir = TempDir::new().unwrap();
        let check = write_check(dir.path(), "bad.yml", "name: bad\nsteps:\n  - goto: \"\"\n");

        synthmon(dir.path())
            .arg("run")
            .arg(&check)
            .assert()
            .failure()
            .stdout(predicate::str::contains("bad (default): FAILED"));
    }
}
