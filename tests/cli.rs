//! CLI tests driving the process container through `/bin/sh`.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

const CONFIG: &str = r#"
[exam]
strategy = "per-class"
timeout_secs = 30

[container]
type = "process"
command = "case {method} in pass*) exit 0;; skip*) echo 'no db' >&2; exit 77;; *) echo 'expected 1 but was 2' >&2; exit 1;; esac"

[[classes]]
name = "Smoke"
methods = ["passes", "passes_again", "skips"]

[[classes]]
name = "Calc"
methods = ["passes", "breaks", "later"]
ignored = ["later"]
strategy = "per-method"

[classes.parameters]
passes = [[1, 2], [3, 4]]
"#;

fn exam(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("exam").unwrap();
    cmd.current_dir(dir).env_remove("RUST_LOG");
    cmd
}

fn workspace(config: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("exam.toml"), config).unwrap();
    dir
}

#[test]
fn test_init_writes_config_once() {
    let dir = tempfile::tempdir().unwrap();

    exam(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created exam.toml"));
    assert!(dir.path().join("exam.toml").exists());

    exam(dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    exam(dir.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid!"));
}

#[test]
fn test_validate_reports_errors() {
    let dir = workspace("[container]\ntype = \"process\"\ncommand = \"true\"\n");

    exam(dir.path())
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Configuration error"))
        .stderr(predicate::str::contains("No [[classes]] declared"));
}

#[test]
fn test_list_shows_classes_and_markers() {
    let dir = workspace(CONFIG);

    exam(dir.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Smoke (per-class)"))
        .stdout(predicate::str::contains("Calc (per-method)"))
        .stdout(predicate::str::contains("passes [2 parameter sets]"))
        .stdout(predicate::str::contains("later [ignored]"));
}

#[test]
fn test_list_json() {
    let dir = workspace(CONFIG);

    let output = exam(dir.path())
        .args(["list", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let classes: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(classes[0]["name"], "Smoke");
    assert_eq!(classes[1]["methods"][1], "breaks");
}

#[test]
fn test_run_with_failures_exits_nonzero_and_writes_junit() {
    let dir = workspace(CONFIG);

    exam(dir.path())
        .arg("run")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Some tests failed."))
        .stdout(predicate::str::contains("Calc.breaks"));

    let junit = std::fs::read_to_string(dir.path().join("test-results/junit.xml")).unwrap();
    assert!(junit.contains(r#"<testsuite name="Smoke" tests="3" failures="0" errors="0" skipped="1""#));
    assert!(junit.contains(r#"<testsuite name="Calc" tests="4" failures="1" errors="0" skipped="1""#));
    assert!(junit.contains(r#"message="expected 1 but was 2""#));
}

#[test]
fn test_run_filter_selects_passing_tests() {
    let dir = workspace(CONFIG);
    let junit = dir.path().join("out/filtered.xml");

    exam(dir.path())
        .args(["run", "--filter", r"^Smoke\.pass", "--junit"])
        .arg(&junit)
        .assert()
        .success()
        .stdout(predicate::str::contains("All tests passed!"));

    let xml = std::fs::read_to_string(&junit).unwrap();
    assert!(xml.contains(r#"<testsuites name="exam" tests="2" failures="0""#));
    assert!(!xml.contains("Calc"));
}

#[test]
fn test_run_strategy_override() {
    let dir = workspace(CONFIG);

    exam(dir.path())
        .args(["run", "--strategy", "all-confined", "--filter", "Smoke"])
        .assert()
        .success();
}

#[test]
fn test_run_with_no_matching_tests() {
    let dir = workspace(CONFIG);

    exam(dir.path())
        .args(["run", "--filter", "Nothing"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No tests match the filter."));
}

#[test]
fn test_run_with_invalid_filter() {
    let dir = workspace(CONFIG);

    exam(dir.path())
        .args(["run", "--filter", "("])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid --filter pattern"));
}
