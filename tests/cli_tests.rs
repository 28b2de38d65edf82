//! Integration tests for the CLI interface
//!
//! Drives the real binary against small shell commands.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use std::time::{Duration, Instant};
use tempfile::{NamedTempFile, TempDir};

fn lookout() -> Command {
    let mut cmd = Command::cargo_bin("lookout").unwrap();
    cmd.timeout(Duration::from_secs(30));
    cmd
}

#[test]
fn test_cli_help_flag() {
    lookout()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("--idle-timeout"));
}

#[test]
fn test_unknown_flag_is_a_config_error() {
    lookout()
        .arg("--no-such-flag")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn test_match_exits_early_with_zero() {
    let started = Instant::now();
    lookout()
        .args(["--idle-timeout", "5s", "ERROR", "--"])
        .args(["sh", "-c", "echo step1; echo 'ERROR: disk full'; echo step3; sleep 20"])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("step1"))
        .stdout(predicate::str::contains("ERROR: disk full"));
    assert!(started.elapsed() < Duration::from_secs(15));
}

#[test]
fn test_natural_exit_without_match() {
    lookout()
        .args(["never-printed", "--", "sh", "-c", "echo hello"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("hello"))
        .stderr(predicate::str::contains("lookout: naturalExit: no match"));
}

#[test]
fn test_first_output_timeout() {
    lookout()
        .args(["--first-output-timeout", "1s", "--", "sh", "-c", "sleep 3; echo late"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("late").not())
        .stderr(predicate::str::contains("lookout: timeout:firstOutput after 1s"));
}

#[test]
fn test_stuck_output() {
    lookout()
        .args(["--stuck", "3", "--normalize-timestamps", "--"])
        .args([
            "sh",
            "-c",
            "for i in 1 2 3 4 5; do echo \"[10:00:0$i] waiting for lock\"; done; sleep 20",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("lookout: stuck on stdout: 3 identical lines"));
}

#[test]
fn test_watching_stdin() {
    lookout()
        .arg("ready")
        .write_stdin("booting\nready to serve\nignored\n")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("ready to serve"));
}

#[test]
fn test_success_failure_convention() {
    lookout()
        .args(["--success", "deployed", "--error", "rollback"])
        .args(["--exit-codes", "success-failure"])
        .write_stdin("building\nrollback: health check failed\n")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("lookout: match (error)"));
}

#[test]
fn test_invalid_pattern_is_a_config_error() {
    lookout()
        .args(["(unclosed", "--", "true"])
        .assert()
        .code(3)
        .stderr(predicate::str::starts_with("lookout: config: "));
}

#[test]
fn test_missing_command_is_a_launch_error() {
    lookout()
        .args(["x", "--", "nonexistent-command-12345"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("lookout: launch: Command not found"));
}

#[test]
fn test_quiet_suppresses_echo() {
    lookout()
        .args(["-q", "done", "--", "sh", "-c", "echo working; echo done"])
        .assert()
        .code(0)
        .stdout(predicate::str::is_empty());
}

#[test]
fn test_stderr_and_extra_descriptors_are_echoed_to_stderr() {
    lookout()
        .args(["--fd", "3", "--", "sh", "-c", "echo out; echo err >&2; echo progress >&3"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("out"))
        .stdout(predicate::str::contains("err").not())
        .stderr(predicate::str::contains("err"))
        .stderr(predicate::str::contains("[fd3] progress"));
}

#[test]
fn test_pattern_on_extra_descriptor() {
    lookout()
        .args(["--fd", "3", "--pipe", "50%", "--"])
        .args(["sh", "-c", "echo 'progress 50%' >&3; sleep 20"])
        .assert()
        .code(0);
}

#[test]
fn test_after_context_lines() {
    lookout()
        .args(["-A", "1", "FAIL", "--"])
        .args(["sh", "-c", "echo 'FAIL: test_a'; echo 'expected 1'; echo 'never'; sleep 20"])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("expected 1"))
        .stdout(predicate::str::contains("never").not());
}

#[test]
fn test_profile_supplies_options() {
    let mut profile = NamedTempFile::new().unwrap();
    writeln!(
        profile,
        r#"
command = ["sh", "-c", "echo compiling; echo 'Finished release'"]
success = "Finished"
error = "error:"
exit-codes = "success-failure"
"#
    )
    .unwrap();

    lookout()
        .arg("--profile")
        .arg(profile.path())
        .assert()
        .code(0)
        .stdout(predicate::str::contains("Finished release"));
}

#[test]
fn test_bad_profile_is_a_config_error() {
    let mut profile = NamedTempFile::new().unwrap();
    writeln!(profile, "idle-timeout = \"whenever\"").unwrap();

    lookout()
        .arg("--profile")
        .arg(profile.path())
        .assert()
        .code(3)
        .stderr(predicate::str::contains("lookout: config: Invalid profile"));
}

#[test]
fn test_log_file_records_lines_and_outcome() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("run.jsonl");

    lookout()
        .arg("--log-file")
        .arg(&log)
        .args(["two", "--", "sh", "-c", "echo one; echo two"])
        .assert()
        .code(0);

    let content = std::fs::read_to_string(&log).unwrap();
    let records: Vec<serde_json::Value> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let last = records.last().unwrap();
    assert_eq!(last["type"], "outcome");
    assert_eq!(last["cause"], "match");
    assert_eq!(last["matched"]["lineNumber"], 2);
    assert!(records
        .iter()
        .any(|r| r["type"] == "line" && r["text"] == "one"));
}

#[test]
fn test_detach_leaves_command_running() {
    let output = lookout()
        .args(["--detach", "listening", "--"])
        .args(["sh", "-c", "echo listening; exec sleep 10"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("detached pid"))
        .get_output()
        .stderr
        .clone();

    let stderr = String::from_utf8(output).unwrap();
    let pid: i32 = stderr
        .split("detached pid ")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|pid| pid.parse().ok())
        .unwrap();
    let target = nix::unistd::Pid::from_raw(pid);
    assert!(nix::sys::signal::kill(target, None).is_ok());
    let _ = nix::sys::signal::kill(target, nix::sys::signal::Signal::SIGKILL);
}

#[test]
fn test_interrupt_stops_command_and_exits_130() {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    use std::process::Stdio;

    let child = std::process::Command::new(assert_cmd::cargo::cargo_bin("lookout"))
        .args(["--", "sleep", "20"])
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    std::thread::sleep(Duration::from_secs(1));
    kill(Pid::from_raw(child.id() as i32), Signal::SIGINT).unwrap();

    let output = child.wait_with_output().unwrap();
    assert_eq!(output.status.code(), Some(130));
    assert!(String::from_utf8_lossy(&output.stderr).contains("lookout: interrupt"));
}
