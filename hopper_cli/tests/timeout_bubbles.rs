use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

#[rstest]
fn transport_timeout_bubbles_to_cli() {
    let dir = tempdir().unwrap();
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
max_run_ms = 500
settle_ms = 50

[sim]
mode = "flaky"
"#;
    let cfg = dir.path().join("cfg.toml");
    fs::write(&cfg, toml).unwrap();

    let mut cmd = Command::cargo_bin("hopper").unwrap();
    cmd.arg("--config")
        .arg(&cfg)
        .arg("payout")
        .arg("--coins")
        .arg("2");
    cmd.assert().failure().stdout(predicate::str::contains(
        "What happened: Device read timed out",
    ));
}
