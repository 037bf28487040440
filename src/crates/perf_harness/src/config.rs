use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{HarnessError, HarnessResult};

/// Bazel target that produces the simulator and the perftest memory images.
pub const PERFTEST_TARGET: &str = "//sw/device/tests:cmod_perftest_sim_verilator";

/// Default name of the results artifact, relative to the harness's working directory.
pub const DEFAULT_RESULTS_FILE: &str = "cmod_perftest_results";

pub const DEFAULT_RESULT_MARKER: &str = "Result: ";
pub const DEFAULT_PASS_MARKER: &str = "PASS!";

const RUNFILES_DIR: &[&str] = &[
    "bazel-bin",
    "sw",
    "device",
    "tests",
    "cmod_perftest_sim_verilator.runfiles",
    "lowrisc_opentitan",
];
const SIMULATOR: &[&str] = &["hw", "build.verilator_real", "sim-verilator", "Vchip_sim_tb"];
const ROM_IMAGE: &[&str] = &[
    "sw",
    "device",
    "lib",
    "testing",
    "test_rom",
    "test_rom_sim_verilator.39.scr.vmem",
];
const FLASH_IMAGE: &[&str] = &[
    "sw",
    "device",
    "tests",
    "cmod_perftest_prog_sim_verilator.fake_prod_key_0.signed.64.scr.vmem",
];
const OTP_IMAGE: &[&str] = &["hw", "ip", "otp_ctrl", "data", "img_rma.24.vmem"];

fn join_all(base: &Path, parts: &[&str]) -> PathBuf {
    parts.iter().fold(base.to_path_buf(), |path, part| path.join(part))
}

/// Memory region initialised from an image file at simulator start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MemRegion {
    Rom,
    Flash,
    Otp,
}

impl MemRegion {
    pub fn as_str(self) -> &'static str {
        match self {
            MemRegion::Rom => "rom",
            MemRegion::Flash => "flash",
            MemRegion::Otp => "otp",
        }
    }
}

impl fmt::Display for MemRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A memory image passed to the simulator as `--meminit=<region>,<path>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryImage {
    pub region: MemRegion,
    pub path: PathBuf,
}

impl MemoryImage {
    pub fn new(region: MemRegion, path: impl Into<PathBuf>) -> Self {
        Self {
            region,
            path: path.into(),
        }
    }

    /// Render the simulator flag for this image.
    pub fn meminit_arg(&self) -> String {
        format!("--meminit={},{}", self.region, self.path.display())
    }
}

/// External command that builds the simulator. Only its exit status matters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_directory: Option<PathBuf>,
}

impl BuildCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_directory: None,
        }
    }

    /// The bazelisk invocation that builds the perftest target.
    pub fn bazelisk() -> Self {
        Self::new("./bazelisk.sh")
            .with_arg("build")
            .with_arg(PERFTEST_TARGET)
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn in_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }
}

/// Process-level configuration for one perftest run.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Command that produces the simulator and memory images.
    pub build: BuildCommand,
    /// Launch the existing simulator without running the build first.
    pub skip_build: bool,
    /// Path to the simulator executable.
    pub simulator_path: PathBuf,
    /// Images loaded into the simulator, in flag order.
    pub memory_images: Vec<MemoryImage>,
    /// Working directory for the simulator (the target's runfiles root).
    pub working_directory: Option<PathBuf>,
    /// Extra environment variables applied to the simulator.
    pub env: BTreeMap<String, String>,
    /// File the extracted results are written to. Overwritten on each run.
    pub results_path: PathBuf,
    /// Marker that introduces a result on a device log line.
    pub result_marker: String,
    /// Marker that ends the device log stream.
    pub pass_marker: String,
    /// Upper bound on waiting for readiness. `None` waits until cancelled.
    pub discovery_timeout: Option<Duration>,
    /// Upper bound on waiting for the pass marker. `None` waits until cancelled.
    pub stream_timeout: Option<Duration>,
    /// Delay between reads once the device log has no new content.
    pub poll_interval: Duration,
}

impl HarnessConfig {
    /// Create a config targeting a specific simulator binary with no memory images.
    pub fn new(simulator_path: impl Into<PathBuf>) -> Self {
        Self {
            build: BuildCommand::bazelisk(),
            skip_build: false,
            simulator_path: simulator_path.into(),
            memory_images: Vec::new(),
            working_directory: None,
            env: BTreeMap::new(),
            results_path: PathBuf::from(DEFAULT_RESULTS_FILE),
            result_marker: DEFAULT_RESULT_MARKER.to_string(),
            pass_marker: DEFAULT_PASS_MARKER.to_string(),
            discovery_timeout: None,
            stream_timeout: None,
            poll_interval: Duration::from_millis(10),
        }
    }

    /// Derive the standard layout from an OpenTitan checkout root.
    pub fn for_repo_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let runfiles = join_all(root, RUNFILES_DIR);

        Self::new(join_all(&runfiles, SIMULATOR))
            .with_build_command(BuildCommand::bazelisk().in_directory(root))
            .with_memory_image(MemRegion::Rom, join_all(&runfiles, ROM_IMAGE))
            .with_memory_image(MemRegion::Flash, join_all(&runfiles, FLASH_IMAGE))
            .with_memory_image(MemRegion::Otp, join_all(&runfiles, OTP_IMAGE))
            .with_working_directory(runfiles)
    }

    pub fn with_build_command(mut self, build: BuildCommand) -> Self {
        self.build = build;
        self
    }

    pub fn with_skip_build(mut self, skip: bool) -> Self {
        self.skip_build = skip;
        self
    }

    pub fn with_simulator(mut self, path: impl Into<PathBuf>) -> Self {
        self.simulator_path = path.into();
        self
    }

    /// Set the image for a region, replacing any image already configured for it.
    pub fn with_memory_image(mut self, region: MemRegion, path: impl Into<PathBuf>) -> Self {
        let image = MemoryImage::new(region, path);
        match self
            .memory_images
            .iter_mut()
            .find(|existing| existing.region == region)
        {
            Some(existing) => *existing = image,
            None => self.memory_images.push(image),
        }
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_results_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.results_path = path.into();
        self
    }

    pub fn with_result_marker(mut self, marker: impl Into<String>) -> Self {
        self.result_marker = marker.into();
        self
    }

    pub fn with_pass_marker(mut self, marker: impl Into<String>) -> Self {
        self.pass_marker = marker.into();
        self
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = Some(timeout);
        self
    }

    pub fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = Some(timeout);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Simulator arguments, one `--meminit` flag per image.
    pub fn simulator_args(&self) -> Vec<String> {
        self.memory_images
            .iter()
            .map(MemoryImage::meminit_arg)
            .collect()
    }

    /// Apply overrides from a config file on top of the current values.
    pub fn apply_file(mut self, file: ConfigFile) -> Self {
        if let Some(program) = file.build_program {
            self.build.program = program;
        }
        if let Some(args) = file.build_args {
            self.build.args = args;
        }
        if let Some(dir) = file.build_directory {
            self.build.working_directory = Some(dir);
        }
        if let Some(path) = file.simulator {
            self.simulator_path = path;
        }
        if let Some(dir) = file.working_directory {
            self.working_directory = Some(dir);
        }
        for (region, path) in [
            (MemRegion::Rom, file.rom),
            (MemRegion::Flash, file.flash),
            (MemRegion::Otp, file.otp),
        ] {
            if let Some(path) = path {
                self = self.with_memory_image(region, path);
            }
        }
        if let Some(path) = file.results_path {
            self.results_path = path;
        }
        if let Some(marker) = file.result_marker {
            self.result_marker = marker;
        }
        if let Some(marker) = file.pass_marker {
            self.pass_marker = marker;
        }
        if let Some(ms) = file.discovery_timeout_ms {
            self.discovery_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(ms) = file.stream_timeout_ms {
            self.stream_timeout = Some(Duration::from_millis(ms));
        }
        if let Some(ms) = file.poll_interval_ms {
            self.poll_interval = Duration::from_millis(ms);
        }
        self.env.extend(file.env);
        self
    }

    /// Reject configurations that could never complete a run.
    pub fn validate(&self) -> HarnessResult<()> {
        if self.result_marker.is_empty() {
            return Err(HarnessError::config("result marker must not be empty"));
        }
        if self.pass_marker.is_empty() {
            return Err(HarnessError::config("pass marker must not be empty"));
        }
        if self.poll_interval.is_zero() {
            return Err(HarnessError::config("poll interval must be non-zero"));
        }
        Ok(())
    }
}

/// Optional overrides read from a JSON config file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub build_program: Option<PathBuf>,
    pub build_args: Option<Vec<String>>,
    pub build_directory: Option<PathBuf>,
    pub simulator: Option<PathBuf>,
    pub working_directory: Option<PathBuf>,
    pub rom: Option<PathBuf>,
    pub flash: Option<PathBuf>,
    pub otp: Option<PathBuf>,
    pub results_path: Option<PathBuf>,
    pub result_marker: Option<String>,
    pub pass_marker: Option<String>,
    pub discovery_timeout_ms: Option<u64>,
    pub stream_timeout_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub env: BTreeMap<String, String>,
}

impl ConfigFile {
    pub fn load(path: impl AsRef<Path>) -> HarnessResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> HarnessResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
