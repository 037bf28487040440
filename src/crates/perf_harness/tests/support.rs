#![cfg(all(unix, feature = "test-support"))]
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use cmod_perf_harness::{
    BuildCommand, HarnessConfig, MemRegion, PerfHarness, ProcessSlot, ProcessSupervisor,
};

pub fn fake_sim_path() -> PathBuf {
    if let Some(path) = option_env!("CARGO_BIN_EXE_fake_sim") {
        return PathBuf::from(path);
    }

    // Fallback to the workspace target directory.
    let mut path = std::env::current_exe().expect("current exe");
    path.pop(); // deps
    path.pop(); // debug or release
    path.push("fake_sim");
    path
}

pub fn shell(script: &str) -> BuildCommand {
    BuildCommand::new("sh").with_arg("-c").with_arg(script)
}

/// Config for a fake simulator running in `workdir` with results written there too.
pub fn config_in(workdir: &Path) -> HarnessConfig {
    HarnessConfig::new(fake_sim_path())
        .with_build_command(shell("exit 0"))
        .with_memory_image(MemRegion::Rom, workdir.join("rom.vmem"))
        .with_memory_image(MemRegion::Flash, workdir.join("flash.vmem"))
        .with_memory_image(MemRegion::Otp, workdir.join("otp.vmem"))
        .with_working_directory(workdir)
        .with_results_path(workdir.join("cmod_perftest_results"))
        .with_poll_interval(Duration::from_millis(2))
        .with_stream_timeout(Duration::from_secs(20))
}

pub fn harness(config: HarnessConfig) -> PerfHarness {
    PerfHarness::new(config, ProcessSupervisor::new(ProcessSlot::new()))
}

/// Wait for a fake simulator to write its pid.
pub fn wait_for_pid(pid_file: &Path) -> u32 {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(pid) = fs::read_to_string(pid_file)
            .ok()
            .and_then(|text| text.trim().parse().ok())
        {
            return pid;
        }
        assert!(Instant::now() < deadline, "no pid in {}", pid_file.display());
        thread::sleep(Duration::from_millis(10));
    }
}

/// Whether `pid` still names a process, using `kill -0`.
pub fn process_alive(pid: u32) -> bool {
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}
