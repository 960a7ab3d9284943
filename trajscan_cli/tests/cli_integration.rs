use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

// Short ramps keep simulated moves well under a second.
fn write_config(dir: &tempfile::TempDir, kind: &str, two_d: bool) -> PathBuf {
    let toml = format!(
        r#"
[device]
prefix = "T:TRAJ1:"
kind = "{kind}"

[motion]
acceleration_time_s = 0.05
element_count = 100

[axes]
names = ["theta", "x"]

[timeouts]
build_ms = 2000
execute_ms = 5000
read_ms = 2000
readback_ms = 5000
poll_ms = 10

[adapter]
two_d_mode = {two_d}
read_back = true

[simulation]
build_latency_ms = 1
read_latency_ms = 1
speed_factor = 20.0
"#
    );
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn trajscan() -> Command {
    Command::cargo_bin("trajscan").unwrap()
}

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["path", "--start", "0", "--end", "10", "--duration", "5", "--elements", "1500", "--accel", "1"], 0, "pulse window: elements", "stdout")]
#[case(&["path", "--start", "0", "--end", "1", "--duration", "0.1", "--elements", "4", "--accel", "5"], 2, "could not be synthesized", "stderr")]
#[case(&["path", "--start", "0", "--end", "1", "--duration", "1", "--elements", "11", "--accel", "0.2", "--oscillate", "5"], 2, "holds 5 elements but needs at least 7", "stderr")]
#[case(&["path", "--start", "0", "--end", "1", "--duration", "1", "--elements", "11", "--oscillate", "18446744073709551615"], 2, "oscillation total = 18446744073709551615 is outside the allowed range", "stderr")]
#[case(&["path", "--start", "0", "--end", "1", "--duration", "1", "--elements", "1501"], 2, "element count = 1501 is outside the allowed range", "stderr")]
#[case(&["scan", "--axis", "theta", "--start", "0", "--end", "1", "--time", "0.2", "--points", "5"], 0, "line 0: 5 positions on theta", "stdout")]
#[case(&["scan", "--axis", "nope", "--start", "0", "--end", "1", "--time", "0.2", "--points", "5"], 2, "unknown axis 'nope'", "stderr")]
#[case(&["scan", "--axis", "9", "--start", "0", "--end", "1", "--time", "0.2", "--points", "5"], 2, "Axis 9 does not exist", "stderr")]
#[case(&["scan", "--axis", "x"], 2, "required", "stderr")]
#[case(&["self-check"], 0, "self-check ok: simulated device", "stdout")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "simulated", false);

    let mut cmd = trajscan();
    // Always include a valid config to avoid relying on defaults
    cmd.arg("--log-level").arg("error").arg("--config").arg(&cfg);
    for a in args {
        cmd.arg(a);
    }

    let assert = cmd.assert().code(exit_code);
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
fn channel_device_reuses_the_build_in_two_d_mode() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "simulated-channels", true);
    trajscan()
        .args(["--log-level", "error", "--config"])
        .arg(&cfg)
        .args(["scan", "--axis", "x", "--start", "-1", "--end", "1"])
        .args(["--time", "0.2", "--points", "4", "--lines", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("line 0: 4 positions on x"))
        .stdout(predicate::str::contains("line 1: 4 positions on x, 4 pulses").and(
            predicate::str::contains("(build reused)"),
        ));
}

#[rstest]
fn self_check_over_channels() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "simulated-channels", false);
    trajscan()
        .arg("--config")
        .arg(&cfg)
        .arg("self-check")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "self-check ok: simulated-channels device T:TRAJ1:, 5 positions",
        ));
}

#[rstest]
fn invalid_config_is_reported() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[motion]\nelement_count = 2\n").unwrap();
    trajscan()
        .arg("--config")
        .arg(&path)
        .arg("self-check")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Configuration is invalid"))
        .stderr(predicate::str::contains("motion.element_count must be >= 3"));
}

#[rstest]
fn missing_config_file_is_reported() {
    let dir = tempdir().unwrap();
    trajscan()
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .arg("self-check")
        .assert()
        .failure()
        .stderr(predicate::str::contains("read config"));
}

#[rstest]
fn output_file_holds_every_line() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "simulated", true);
    let out = dir.path().join("scan.json");
    trajscan()
        .args(["--log-level", "error", "--config"])
        .arg(&cfg)
        .args(["scan", "--axis", "2", "--start", "0", "--end", "2"])
        .args(["--time", "0.2", "--points", "6", "--lines", "3", "--output"])
        .arg(&out)
        .assert()
        .success();
    let doc: serde_json::Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(doc["axis"], "x");
    assert_eq!(doc["slot"], 2);
    let lines = doc["lines"].as_array().unwrap();
    assert_eq!(lines.len(), 3);
    assert!(lines.iter().all(|l| l["positions"].as_array().unwrap().len() == 6));
    assert!(!out.with_extension("new").exists());
}
