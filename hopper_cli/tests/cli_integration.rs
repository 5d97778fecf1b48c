use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

// Build a minimal valid TOML config for the sim transport
fn write_valid_config(dir: &tempfile::TempDir) -> PathBuf {
    let toml = r#"
[device]
vendor = "Aristocrat"
model = "Coin Hopper"
interface = "sim"
device_type = 2
poll_ms = 2
wait_ms = 20

[timing]
max_blocked_ms = 100
empty_ms = 300
pause_ms = 40
max_pause_retries = 2

[probe]
after_ms = 5000
debounce = 3

[payout]
default_max = 200
# Allow enough time for the sim pulse train (one coin per 30 ms)
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

// Same sim wiring but the coin path never pulses
fn write_empty_config(dir: &tempfile::TempDir) -> PathBuf {
    let toml = r#"
[device]
interface = "sim"
poll_ms = 2
wait_ms = 20

[timing]
max_blocked_ms = 100
# Short windows so the dry hopper gives up quickly
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

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["payout", "--coins", "3"], 0, "complete", "stdout")]
#[case(&["payout"], 2, "required", "stderr")]
#[case(&["payout", "--coins", "3", "--max-run-ms", "1"], 7, "max runtime", "stderr")]
#[case(&["payout", "--coins", "0"], -1, "zero coins", "stdout")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let mut cmd = Command::cargo_bin("hopper").unwrap();

    // Always include a valid config to avoid relying on default path
    cmd.arg("--config").arg(&cfg);

    for a in args {
        cmd.arg(a);
    }

    let assert = cmd.assert();

    // Check exit status in a chained manner to keep ownership
    let assert = if exit_code >= 0 {
        assert.code(exit_code)
    } else {
        assert.failure()
    };

    match stream {
        "stdout" => {
            assert.stdout(predicate::str::contains(needle));
        }
        "stderr" => {
            assert.stderr(predicate::str::contains(needle));
        }
        other => panic!("unknown stream: {other}"),
    }
}

#[rstest]
fn empty_hopper_maps_to_the_empty_exit_code() {
    let dir = tempdir().unwrap();
    let cfg = write_empty_config(&dir);

    let mut cmd = Command::cargo_bin("hopper").unwrap();
    cmd.arg("--config").arg(&cfg).arg("payout").arg("--coins").arg("2");

    cmd.assert()
        .code(3)
        .stdout(predicate::str::contains("ran out of coins"));
}

#[rstest]
fn cli_reports_bad_trace_header() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    // Write a bad-header CSV
    let bad_csv = dir.path().join("trace.csv");
    let mut f = fs::File::create(&bad_csv).unwrap();
    writeln!(f, "elapsed_ms,val").unwrap();
    writeln!(f, "10,0").unwrap();
    writeln!(f, "10,1").unwrap();

    let mut cmd = Command::cargo_bin("hopper").unwrap();
    cmd.arg("--config")
        .arg(&cfg)
        .arg("replay")
        .arg("--trace")
        .arg(&bad_csv);

    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("Invalid headers in trace CSV"));
}

#[rstest]
fn replay_decodes_a_recorded_pulse_train() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    // Two complete coin pulses as the hopper would report them
    let trace = dir.path().join("trace.csv");
    let mut f = fs::File::create(&trace).unwrap();
    writeln!(f, "elapsed_ms,value").unwrap();
    writeln!(f, "2,0").unwrap();
    writeln!(f, "40,1").unwrap();
    writeln!(f, "12,0").unwrap();
    writeln!(f, "28,1").unwrap();
    writeln!(f, "12,0").unwrap();

    let mut cmd = Command::cargo_bin("hopper").unwrap();
    cmd.arg("--config")
        .arg(&cfg)
        .arg("replay")
        .arg("--trace")
        .arg(&trace);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("coin out (legal)"))
        .stdout(predicate::str::contains("2 coin(s)"));
}

#[rstest]
fn status_runs_on_the_sim() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let mut cmd = Command::cargo_bin("hopper").unwrap();
    cmd.arg("--config").arg(&cfg).arg("status");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("connected: true"));
}

#[rstest]
fn self_check_passes_on_the_sim() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let mut cmd = Command::cargo_bin("hopper").unwrap();
    cmd.arg("--config").arg(&cfg).arg("self-check");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("self-check: ok"));
}

#[rstest]
fn self_check_fails_when_detached() {
    let dir = tempdir().unwrap();
    let toml = r#"
[device]
interface = "sim"
poll_ms = 2
wait_ms = 20

[sim]
mode = "disconnected"
"#;
    let cfg = dir.path().join("cfg_detached.toml");
    fs::write(&cfg, toml).unwrap();

    let mut cmd = Command::cargo_bin("hopper").unwrap();
    cmd.arg("--config").arg(&cfg).arg("self-check");

    cmd.assert()
        .code(1)
        .stdout(predicate::str::contains("detached"));
}
