use rstest::rstest;
use std::fs;
use std::path::PathBuf;
use assert_cmd::Command;
use tempfile::tempdir;

fn write_config(dir: &tempfile::TempDir, extra: &str) -> PathBuf {
    let toml = format!(
        r#"
[controller]
id = "hub"

[batch]
window_ms = 20

[visual_groups.living]
name = "Living room"
members = ["a"]

[[simulation.shades]]
id = "a"
start_raw = 32768

[[simulation.shades]]
id = "b"
start_raw = 100
connected = false
{extra}"#
    );
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

/// Validate the diagnostics JSON schema after the initial poll.
#[rstest]
fn diagnostics_schema() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "");

    let mut cmd = Command::cargo_bin("shadectl").unwrap();
    cmd.arg("--log-level")
        .arg("error")
        .arg("--config")
        .arg(&cfg)
        .arg("diagnostics");

    let out = cmd.assert().success().get_output().stdout.clone();
    let v: serde_json::Value = serde_json::from_slice(&out).unwrap();

    assert_eq!(v["controller_id"], "hub");
    assert_eq!(v["poll_healthy"], true);
    assert_eq!(v["predictive_enabled"], true);
    assert_eq!(v["cadence"]["state"], "idle");
    assert_eq!(v["cadence"]["interval_ms"], 12_000);
    assert_eq!(v["shades"]["a"]["raw"], 32_768);
    assert_eq!(v["shades"]["a"]["cohort"], "group:living");
    assert_eq!(v["shades"]["b"]["available"], false);
    assert_eq!(v["groups"][0]["id"], "living");
    assert!(v["recent_stop_outcomes"].as_array().unwrap().is_empty());
}

/// `diag` inside a script prints one JSON line including the stop it just made.
#[rstest]
fn diag_line_reflects_script_actions() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "");

    let mut cmd = Command::cargo_bin("shadectl").unwrap();
    cmd.arg("--log-level")
        .arg("error")
        .arg("--config")
        .arg(&cfg)
        .arg("run")
        .write_stdin("stop a\ndiag\n");

    let out = cmd.assert().success().get_output().stdout.clone();
    let stdout = String::from_utf8_lossy(&out);
    let line = stdout
        .lines()
        .find(|l| l.starts_with('{'))
        .unwrap_or("")
        .to_string();
    assert!(!line.is_empty(), "no JSON line found; stdout was: {stdout}");

    let v: serde_json::Value = serde_json::from_str(&line).unwrap();
    let stops = v["recent_stop_outcomes"].as_array().unwrap();
    assert_eq!(stops.len(), 1);
    assert_eq!(stops[0]["scope_name"], "Living room");
    assert_eq!(stops[0]["targets"][0]["target"], 32_768);
    assert_eq!(stops[0]["targets"][0]["source"], "frozen");
}

/// With --json, failures are reported as one JSON object on stdout.
#[rstest]
fn json_error_on_failed_script() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "");

    let mut cmd = Command::cargo_bin("shadectl").unwrap();
    cmd.arg("--json")
        .arg("--log-level")
        .arg("error")
        .arg("--config")
        .arg(&cfg)
        .arg("run")
        .write_stdin("stop-group kitchen\n");

    let out = cmd.assert().code(1).get_output().stdout.clone();
    let stdout = String::from_utf8_lossy(&out);
    let line = stdout.lines().last().unwrap_or("");
    let v: serde_json::Value = serde_json::from_str(line).unwrap();
    assert_eq!(v["reason"], "Error");
    assert!(
        v["message"]
            .as_str()
            .unwrap()
            .contains("1 script step(s) failed")
    );
}

/// A configured log file is created next to the run.
#[rstest]
fn log_file_is_created() {
    let dir = tempdir().unwrap();
    let log = dir.path().join("logs").join("shadectl.log");
    let extra = format!(
        "\n[logging]\nfile = {:?}\nlevel = \"debug\"\nrotation = \"never\"\n",
        log.to_string_lossy()
    );
    let cfg = write_config(&dir, &extra);

    let mut cmd = Command::cargo_bin("shadectl").unwrap();
    cmd.arg("--config").arg(&cfg).arg("diagnostics");
    cmd.assert().success();

    assert!(log.exists(), "expected log file at {}", log.display());
}

#[rstest]
fn unknown_rotation_is_rejected() {
    let dir = tempdir().unwrap();
    let log = dir.path().join("shadectl.log");
    let extra = format!(
        "\n[logging]\nfile = {:?}\nrotation = \"weekly\"\n",
        log.to_string_lossy()
    );
    let cfg = write_config(&dir, &extra);

    let mut cmd = Command::cargo_bin("shadectl").unwrap();
    cmd.arg("--config").arg(&cfg).arg("check-config");
    cmd.assert().code(1);
}
