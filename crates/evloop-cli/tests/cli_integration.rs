//! Integration tests for the `evloop` binary.

use std::io::Write;
use std::process::{Command, Output};

fn evloop(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_evloop"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run evloop binary")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_batch_reports_all_tasks() {
    let output = evloop(&["--workers", "3", "batch", "--tasks", "12", "--sleep-ms", "1"]);
    assert!(output.status.success());
    assert!(
        stdout(&output).contains("12 of 12 tasks completed on 3 workers"),
        "unexpected output: {}",
        stdout(&output)
    );
}

#[test]
fn test_timers_stop_after_count() {
    let output = evloop(&[
        "--poll-ms",
        "1",
        "timers",
        "--oneshot-ms",
        "5",
        "--interval-ms",
        "3",
        "--count",
        "3",
    ]);
    assert!(output.status.success());

    let text = stdout(&output);
    assert!(text.contains("one-shot fired"));
    assert!(text.contains("interval #3"));
    assert!(!text.contains("interval #4"));
    assert!(text.contains("done after"));
}

#[test]
fn test_config_file_sets_workers() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "workers = 2\npoll_interval_ms = 1").unwrap();
    let path = file.path().to_str().unwrap();

    let output = evloop(&["--config", path, "batch", "--tasks", "4", "--sleep-ms", "1"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("4 of 4 tasks completed on 2 workers"));
}

#[test]
fn test_invalid_config_fails() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "poll_interval_ms = 999999").unwrap();
    let path = file.path().to_str().unwrap();

    let output = evloop(&["--config", path, "batch", "--tasks", "1"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("poll_interval_ms"));
}
