use assert_cmd::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

fn write_valid_config(dir: &tempfile::TempDir) -> PathBuf {
    let toml = r#"
[device]
interface = "sim"
poll_ms = 2
wait_ms = 20

[timing]
max_blocked_ms = 100
empty_ms = 300
pause_ms = 40
max_pause_retries = 2

[payout]
default_max = 200
max_run_ms = 5000
settle_ms = 100

[sim]
mode = "normal"
pulse_period_ms = 30
pulse_width_ms = 10
"#;
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn write_empty_config(dir: &tempfile::TempDir) -> PathBuf {
    let toml = r#"
[device]
interface = "sim"
poll_ms = 2
wait_ms = 20

[timing]
max_blocked_ms = 100
empty_ms = 40
pause_ms = 30
max_pause_retries = 2

[payout]
default_max = 200
max_run_ms = 5000
settle_ms = 50

[sim]
mode = "empty"
"#;
    let path = dir.path().join("cfg_empty.toml");
    fs::write(&path, toml).unwrap();
    path
}

/// Validate the JSON result schema for a successful payout.
#[rstest]
fn json_success_schema() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let mut cmd = Command::cargo_bin("hopper").unwrap();
    cmd.arg("--json")
        .arg("--log-level")
        .arg("error")
        .arg("--config")
        .arg(&cfg)
        .arg("payout")
        .arg("--coins")
        .arg("2");

    let out = cmd.assert().success().get_output().stdout.clone();
    let stdout = String::from_utf8_lossy(&out);
    let line = stdout
        .lines()
        .find(|l| l.contains("\"paid\""))
        .unwrap_or("")
        .to_string();
    assert!(
        !line.is_empty(),
        "no JSON result line with paid found; stdout was: {stdout}"
    );

    let v: serde_json::Value = serde_json::from_str(&line).expect("valid JSON");

    // Required numeric fields
    assert!(v.get("timestamp").and_then(|x| x.as_i64()).is_some());
    assert!(v.get("duration_ms").and_then(|x| x.as_u64()).is_some());
    assert_eq!(v.get("coins").and_then(|x| x.as_u64()), Some(2));

    // Either number or null
    match v.get("paid") {
        Some(serde_json::Value::Number(n)) => assert_eq!(n.as_u64(), Some(2)),
        Some(serde_json::Value::Null) => panic!("paid should be set on success"),
        other => panic!("unexpected paid: {other:?}"),
    }
    assert_eq!(v.get("illegal").and_then(|x| x.as_u64()), Some(0));

    // Profile string
    assert_eq!(v.get("profile").and_then(|x| x.as_str()), Some("poller"));

    // Abort reason must be null on success
    assert!(v.get("abort_reason").is_some());
    assert!(v.get("abort_reason").unwrap().is_null());
}

/// Validate the JSON schema for an aborted payout, including the error line.
#[rstest]
fn json_abort_schema() {
    let dir = tempdir().unwrap();
    let cfg = write_empty_config(&dir);

    let mut cmd = Command::cargo_bin("hopper").unwrap();
    cmd.arg("--json")
        .arg("--log-level")
        .arg("error")
        .arg("--config")
        .arg(&cfg)
        .arg("payout")
        .arg("--coins")
        .arg("2");

    let out = cmd.assert().failure().get_output().stdout.clone();
    let stdout = String::from_utf8_lossy(&out);

    let result_line = stdout
        .lines()
        .find(|l| l.contains("\"paid\""))
        .unwrap_or("")
        .to_string();
    assert!(
        !result_line.is_empty(),
        "no JSON result line with paid found; stdout was: {stdout}"
    );
    let v: serde_json::Value = serde_json::from_str(&result_line).expect("valid JSON");

    // Abort reason must be a non-empty string; paid must be null on abort
    assert_eq!(v.get("abort_reason").and_then(|x| x.as_str()), Some("Empty"));
    assert!(v.get("paid").unwrap().is_null());
    assert!(v.get("illegal").unwrap().is_null());

    // The structured error line carries the effective retry limits
    let err_line = stdout
        .lines()
        .find(|l| l.contains("\"reason\""))
        .unwrap_or("")
        .to_string();
    assert!(
        !err_line.is_empty(),
        "no JSON error line with reason found; stdout was: {stdout}"
    );
    let e: serde_json::Value = serde_json::from_str(&err_line).expect("valid JSON");
    assert_eq!(e.get("reason").and_then(|x| x.as_str()), Some("Empty"));
    let details = e.get("details").expect("details present");
    assert!(details.get("pause_ms").and_then(|x| x.as_u64()).is_some());
    assert!(
        details
            .get("max_pause_retries")
            .and_then(|x| x.as_u64())
            .is_some()
    );
    let msg = e.get("message").and_then(|x| x.as_str()).unwrap_or("");
    assert!(msg.contains("ran out of coins"), "message was: {msg}");
}
