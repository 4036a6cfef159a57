#![cfg(unix)]

use assert_cmd::Command;
use assert_fs::TempDir;
use predicates::prelude::*;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

/// Stand-in for perf_analyzer. Behaviour is driven by environment variables:
///
/// - FAKE_LOG: every invocation appends "<batch> <interval> <count> <report|warmup>"
/// - FAKE_FAIL_BATCH: batch size that fails with a fatal error
/// - FAKE_UNSTABLE_RUNS: measured runs per batch size that report an unstable
///   measurement before succeeding
/// - FAKE_SLEEP: seconds to sleep before doing anything
const FAKE_PERF_ANALYZER: &str = r#"#!/bin/sh
report=""
batch=""
interval=""
count=""
while [ $# -gt 0 ]; do
    case "$1" in
        --latency-report-file) report="$2"; shift 2 ;;
        --batch-size) batch="$2"; shift 2 ;;
        --measurement-interval) interval="$2"; shift 2 ;;
        --measurement-request-count) count="$2"; shift 2 ;;
        *) shift ;;
    esac
done

if [ -n "$report" ]; then kind=report; else kind=warmup; fi
echo "$batch $interval $count $kind" >> "$FAKE_LOG"

if [ -n "$FAKE_SLEEP" ]; then
    sleep "$FAKE_SLEEP"
fi

echo "*** Measurement Settings ***"
echo "  Batch size: $batch"

if [ "$batch" = "$FAKE_FAIL_BATCH" ]; then
    echo "error: failed to create concurrency manager: connection refused" >&2
    exit 99
fi

if [ "$kind" = report ] && [ -n "$FAKE_UNSTABLE_RUNS" ]; then
    state="$FAKE_LOG.unstable_$batch"
    seen=0
    if [ -f "$state" ]; then seen=$(cat "$state"); fi
    if [ "$seen" -lt "$FAKE_UNSTABLE_RUNS" ]; then
        echo $((seen + 1)) > "$state"
        echo "Failed to obtain stable measurement within 10 measurement windows for concurrency 1. Please try to increase the --measurement-interval."
        echo "Please use a larger time window." >&2
        exit 1
    fi
fi

if [ -n "$report" ]; then
    {
        echo "Concurrency,Inferences/Second,Client Send,Network+Server Send/Recv,Server Queue,Server Compute Input,Server Compute Infer,Server Compute Output,Client Recv,p50 latency"
        echo "1,1,900,900,900,900,900,900,900,1"
        echo "1,$((batch * 100)),$batch,2,5,1,10,1,3,4000"
    } > "$report"
fi

echo "Throughput: $((batch * 100)) infer/sec"
"#;

struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("perf_analyzer");
        fs::write(&bin, FAKE_PERF_ANALYZER).unwrap();
        fs::set_permissions(&bin, fs::Permissions::from_mode(0o755)).unwrap();
        fs::create_dir_all(dir.path().join("scratch")).unwrap();
        Sandbox { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn log(&self) -> Vec<String> {
        fs::read_to_string(self.path("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(|l| l.to_string())
            .collect()
    }

    fn cmd(&self, batch_sizes: &str, result: &str) -> Command {
        let mut cmd = Command::cargo_bin("perf-sweep").unwrap();
        cmd.env("HOME", self.dir.path())
            .env("XDG_CONFIG_HOME", self.path("config"))
            .env("NO_COLOR", "1")
            .env("FAKE_LOG", self.path("calls.log"))
            .env_remove("PERF_ANALYZER_BIN")
            .env_remove("RUST_LOG")
            .args(["--model-name", "simple"])
            .args(["--batch-sizes", batch_sizes])
            .arg("--result-path")
            .arg(self.path(result))
            .arg("--analyzer-bin")
            .arg(self.path("perf_analyzer"))
            .arg("--scratch-dir")
            .arg(self.path("scratch"));
        cmd
    }
}

// ---- Sweep tests ----

#[test]
fn sweep_report_is_sorted_by_batch_size() {
    let sb = Sandbox::new();

    sb.cmd("8,2,4", "result.csv")
        .args(["--skip-warmup", "--no-stream"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Inferences/Second"))
        .stdout(predicate::str::contains("800"));

    let csv = fs::read_to_string(sb.path("result.csv")).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert!(lines[0].starts_with("batch_size,Concurrency,Inferences/Second"));
    assert!(lines[0].ends_with("avg latency"));
    let batches: Vec<&str> = lines[1..]
        .iter()
        .map(|l| l.split(',').next().unwrap())
        .collect();
    assert_eq!(batches, vec!["2", "4", "8"]);

    // Last row of the latency report: 2 + 2 + 5 + 1 + 10 + 1 + 3
    assert!(lines[1].starts_with("2,1,200,"));
    assert!(lines[1].ends_with(",24"));

    // Batches ran in the order given.
    let order: Vec<String> = sb
        .log()
        .iter()
        .map(|l| l.split(' ').next().unwrap().to_string())
        .collect();
    assert_eq!(order, vec!["8", "2", "4"]);
}

#[test]
fn scratch_files_are_removed() {
    let sb = Sandbox::new();

    sb.cmd("4", "result.csv")
        .arg("--skip-warmup")
        .assert()
        .success();

    let leftovers: Vec<_> = fs::read_dir(sb.path("scratch")).unwrap().collect();
    assert!(leftovers.is_empty());
    assert!(sb.path("result.csv").exists());
}

#[test]
fn streamed_output_is_echoed() {
    let sb = Sandbox::new();

    sb.cmd("4", "result.csv")
        .arg("--skip-warmup")
        .assert()
        .success()
        .stdout(predicate::str::contains("Throughput: 400 infer/sec"));
}

#[test]
fn no_stream_keeps_tool_output_quiet() {
    let sb = Sandbox::new();

    sb.cmd("4", "result.csv")
        .args(["--skip-warmup", "--no-stream"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Throughput:").not());
}

#[test]
fn json_report() {
    let sb = Sandbox::new();

    sb.cmd("2,1", "result.json")
        .arg("--skip-warmup")
        .assert()
        .success();

    let text = fs::read_to_string(sb.path("result.json")).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
    let results = parsed["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["batch_size"], 1);
    assert_eq!(results[1]["batch_size"], 2);
    assert_eq!(results[1]["columns"]["Inferences/Second"], "200");
    assert!(parsed["generated_at"].is_string());
}

// ---- Retry tests ----

#[test]
fn unstable_time_window_is_widened_until_stable() {
    let sb = Sandbox::new();

    sb.cmd("16", "result.csv")
        .args(["--skip-warmup", "--measurement-mode", "time_windows"])
        .env("FAKE_UNSTABLE_RUNS", "2")
        .assert()
        .success();

    let intervals: Vec<String> = sb
        .log()
        .iter()
        .map(|l| l.split(' ').nth(1).unwrap().to_string())
        .collect();
    assert_eq!(intervals, vec!["10000", "12000", "14000"]);
}

#[test]
fn unstable_count_window_raises_request_count() {
    let sb = Sandbox::new();

    sb.cmd("4", "result.csv")
        .arg("--skip-warmup")
        .env("FAKE_UNSTABLE_RUNS", "1")
        .assert()
        .success();

    let counts: Vec<String> = sb
        .log()
        .iter()
        .map(|l| l.split(' ').nth(2).unwrap().to_string())
        .collect();
    assert_eq!(counts, vec!["50", "100"]);
}

#[test]
fn never_stable_gives_up_after_ten_attempts() {
    let sb = Sandbox::new();

    sb.cmd("1", "result.csv")
        .args(["--skip-warmup", "--measurement-mode", "time_windows"])
        .env("FAKE_UNSTABLE_RUNS", "100")
        .assert()
        .failure()
        .stderr(predicate::str::contains("10 times"));

    assert_eq!(sb.log().len(), 10);
    assert!(!sb.path("result.csv").exists());
}

// ---- Failure tests ----

#[test]
fn fatal_failure_aborts_sweep() {
    let sb = Sandbox::new();

    sb.cmd("1,2,4", "result.csv")
        .arg("--skip-warmup")
        .env("FAKE_FAIL_BATCH", "2")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("connection refused"))
        .stderr(predicate::str::contains("exit status 99"));

    let batches: Vec<String> = sb
        .log()
        .iter()
        .map(|l| l.split(' ').next().unwrap().to_string())
        .collect();
    assert_eq!(batches, vec!["1", "2"]);
    assert!(!sb.path("result.csv").exists());
}

#[test]
fn fatal_failure_is_reported_once() {
    let sb = Sandbox::new();

    sb.cmd("1,2", "result.csv")
        .args(["--skip-warmup", "--no-stream"])
        .env("FAKE_FAIL_BATCH", "2")
        .assert()
        .failure()
        .stderr(predicate::function(|err: &str| {
            err.matches("connection refused").count() == 1
        }))
        .stderr(predicate::str::contains("aborting the sweep"));
}

#[test]
fn warmup_failure_is_reported_once() {
    let sb = Sandbox::new();

    sb.cmd("1", "result.csv")
        .arg("--no-stream")
        .env("FAKE_FAIL_BATCH", "1")
        .assert()
        .failure()
        .stderr(predicate::function(|err: &str| {
            err.matches("connection refused").count() == 1
        }))
        .stderr(predicate::str::contains("Warmup failed"));
}

#[test]
fn timeout_is_fatal() {
    let sb = Sandbox::new();

    sb.cmd("1", "result.csv")
        .args(["--skip-warmup", "--timeout", "1"])
        .env("FAKE_SLEEP", "30")
        .timeout(std::time::Duration::from_secs(20))
        .assert()
        .failure()
        .stderr(predicate::str::contains("timed out"));

    assert_eq!(sb.log().len(), 1);
}

#[test]
fn missing_analyzer_binary() {
    let sb = Sandbox::new();
    fs::remove_file(sb.path("perf_analyzer")).unwrap();

    sb.cmd("1", "result.csv")
        .arg("--skip-warmup")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to launch"));
}

#[test]
fn invalid_batch_sizes() {
    let sb = Sandbox::new();

    sb.cmd("1,two", "result.csv")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid batch size list"));

    assert!(sb.log().is_empty());
}

#[test]
fn invalid_server_url() {
    let sb = Sandbox::new();

    sb.cmd("1", "result.csv")
        .args(["--server-url", "ftp://triton"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid server URL"));
}

// ---- Warmup tests ----

#[test]
fn warmup_runs_each_batch_size_once_before_sweep() {
    let sb = Sandbox::new();

    sb.cmd("2,1,2", "result.csv")
        .assert()
        .success();

    let log = sb.log();
    let kinds: Vec<&str> = log
        .iter()
        .map(|l| l.rsplit(' ').next().unwrap())
        .collect();
    assert_eq!(
        kinds,
        vec!["warmup", "warmup", "report", "report", "report"]
    );
}

#[test]
fn warmup_failure_aborts() {
    let sb = Sandbox::new();

    sb.cmd("1,2", "result.csv")
        .env("FAKE_FAIL_BATCH", "1")
        .assert()
        .failure()
        .stderr(predicate::str::contains("connection refused"));

    assert_eq!(sb.log(), vec!["1 10000 50 warmup"]);
}

// ---- Config tests ----

#[test]
fn config_file_supplies_defaults() {
    let sb = Sandbox::new();
    let config = sb.path("custom.toml");
    fs::write(&config, "measurement_window = 3000\ninstances = 2\n").unwrap();

    sb.cmd("1", "result.csv")
        .arg("--skip-warmup")
        .arg("--config")
        .arg(&config)
        .assert()
        .success();

    assert_eq!(sb.log(), vec!["1 3000 50 report"]);
}

#[test]
fn cli_flag_beats_config_file() {
    let sb = Sandbox::new();
    let config = sb.path("custom.toml");
    fs::write(&config, "measurement_window = 3000\n").unwrap();

    sb.cmd("1", "result.csv")
        .args(["--skip-warmup", "--measurement-window", "7000"])
        .arg("--config")
        .arg(&config)
        .assert()
        .success();

    assert_eq!(sb.log(), vec!["1 7000 50 report"]);
}

#[cfg(target_os = "linux")]
#[test]
fn default_config_location_is_read() {
    let sb = Sandbox::new();
    let dir = sb.path("config").join("perf-sweep");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("config.toml"), "measurement_window = 4000\n").unwrap();

    sb.cmd("1", "result.csv")
        .arg("--skip-warmup")
        .assert()
        .success();

    assert_eq!(sb.log(), vec!["1 4000 50 report"]);
}

#[test]
fn broken_config_file_fails() {
    let sb = Sandbox::new();
    let config = sb.path("custom.toml");
    fs::write(&config, "measurement_window = \"soon\"\n").unwrap();

    sb.cmd("1", "result.csv")
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));

    assert!(sb.log().is_empty());
}
