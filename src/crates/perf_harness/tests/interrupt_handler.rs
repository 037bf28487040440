#![cfg(all(unix, feature = "test-support"))]

#[path = "support.rs"]
mod support;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use cmod_perf_harness::CANCELLED_EXIT_CODE;
use serde_json::json;
use support::{fake_sim_path, process_alive, wait_for_pid};
use tempfile::tempdir;

fn perftest_path() -> PathBuf {
    if let Some(path) = option_env!("CARGO_BIN_EXE_cmod_perftest") {
        return PathBuf::from(path);
    }

    let mut path = std::env::current_exe().expect("current exe");
    path.pop(); // deps
    path.pop(); // debug or release
    path.push("cmod_perftest");
    path
}

/// Start the harness binary against a fake simulator in `mode`.
fn spawn_perftest(workdir: &Path, mode: &str) -> Child {
    let config = json!({
        "simulator": fake_sim_path(),
        "working_directory": workdir,
        "rom": workdir.join("rom.vmem"),
        "flash": workdir.join("flash.vmem"),
        "otp": workdir.join("otp.vmem"),
        "results_path": workdir.join("cmod_perftest_results"),
        "poll_interval_ms": 2,
        "env": {
            "FAKE_SIM_MODE": mode,
            "FAKE_SIM_PID_FILE": workdir.join("sim.pid"),
        },
    });
    let config_path = workdir.join("perftest.json");
    fs::write(&config_path, config.to_string()).expect("write config");

    Command::new(perftest_path())
        .arg("--config")
        .arg(&config_path)
        .arg("--skip-build")
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("harness binary should start")
}

fn send_signal(pid: u32, signal: &str) {
    let status = Command::new("kill")
        .args([signal, &pid.to_string()])
        .status()
        .expect("kill should run");
    assert!(status.success(), "kill {signal} {pid} failed");
}

fn wait_with_deadline(child: &mut Child) -> ExitStatus {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(status) = child.try_wait().expect("try_wait") {
            return status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            panic!("harness did not exit after the signal");
        }
        thread::sleep(Duration::from_millis(10));
    }
}

fn wait_until_gone(pid: u32) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while process_alive(pid) {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
    true
}

#[test]
fn sigint_during_discovery_kills_simulator_and_exits_130() {
    let workdir = tempdir().expect("temp workdir");
    let mut harness = spawn_perftest(workdir.path(), "silent");
    let sim_pid = wait_for_pid(&workdir.path().join("sim.pid"));

    send_signal(harness.id(), "-INT");
    let status = wait_with_deadline(&mut harness);

    assert!(!status.success());
    assert_eq!(status.code(), Some(CANCELLED_EXIT_CODE));
    assert!(wait_until_gone(sim_pid), "simulator {sim_pid} survived the interrupt");
    assert!(!workdir.path().join("cmod_perftest_results").exists());
}

#[test]
fn sigterm_during_streaming_kills_simulator_and_exits_130() {
    let workdir = tempdir().expect("temp workdir");
    let mut harness = spawn_perftest(workdir.path(), "no-pass");
    let sim_pid = wait_for_pid(&workdir.path().join("sim.pid"));
    thread::sleep(Duration::from_millis(300));

    send_signal(harness.id(), "-TERM");
    let status = wait_with_deadline(&mut harness);

    assert_eq!(status.code(), Some(CANCELLED_EXIT_CODE));
    assert!(wait_until_gone(sim_pid), "simulator {sim_pid} survived the signal");
    assert!(!workdir.path().join("cmod_perftest_results").exists());
}

#[test]
fn passing_run_exits_zero_and_writes_results() {
    let workdir = tempdir().expect("temp workdir");
    let mut harness = spawn_perftest(workdir.path(), "pass");
    let status = wait_with_deadline(&mut harness);

    assert!(status.success());
    let results = fs::read_to_string(workdir.path().join("cmod_perftest_results"))
        .expect("results file");
    assert_eq!(results, "12345\n");
}
