use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::HarnessConfig;
use crate::discovery::{DeviceDiscovery, DiscoveryStatus};
use crate::error::{HarnessError, HarnessResult};
use crate::parser::{follow_log, open_device_log, LogParser};
use crate::sink::write_results;
use crate::supervisor::{spawn_log_collector, ProcessSupervisor, Simulator};

pub const BANNER: &str = "
/////////////////////////////////////////////////////////////////
//                                                             //
//                    CMOD Performance Test                    //
//                                                             //
/////////////////////////////////////////////////////////////////
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    NotStarted,
    Building,
    Built,
    Failed,
}

/// Where the run is in following the simulator's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No uart0 device announced yet.
    WaitingForDevice,
    /// Device known, simulator not yet ready.
    AwaitingReady,
    Streaming,
    Completed,
}

/// The single run in flight.
#[derive(Debug)]
pub struct SimulationRun {
    pub build_state: BuildState,
    /// Present from launch until teardown.
    pub simulator: Option<Simulator>,
    pub device_path: Option<PathBuf>,
    pub stream_state: StreamState,
    /// Results in emission order. Only ever appended to.
    pub results: Vec<String>,
}

impl SimulationRun {
    pub fn new() -> Self {
        Self {
            build_state: BuildState::NotStarted,
            simulator: None,
            device_path: None,
            stream_state: StreamState::WaitingForDevice,
            results: Vec::new(),
        }
    }

    /// Kill the simulator and release its handle. Safe to call more than once.
    pub fn teardown(&mut self) {
        if let Some(simulator) = self.simulator.take() {
            simulator.terminate();
        }
    }
}

impl Default for SimulationRun {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub build_state: BuildState,
    pub device_path: PathBuf,
    pub results: Vec<String>,
    pub results_path: PathBuf,
}

/// Sequences build, launch, discovery, streaming and persistence for one run.
#[derive(Debug)]
pub struct PerfHarness {
    config: HarnessConfig,
    supervisor: ProcessSupervisor,
}

impl PerfHarness {
    pub fn new(config: HarnessConfig, supervisor: ProcessSupervisor) -> Self {
        Self { config, supervisor }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Execute the run. The simulator is terminated on every exit path.
    ///
    /// Any failure after the run was cancelled is reported as `Cancelled`.
    pub fn run(&self) -> HarnessResult<RunSummary> {
        let mut run = SimulationRun::new();
        let outcome = self.drive(&mut run);
        run.teardown();
        if outcome.is_err() && self.supervisor.slot().is_cancelled() {
            return Err(HarnessError::Cancelled);
        }
        outcome?;

        let device_path = run.device_path.take().ok_or(HarnessError::DeviceNotFound)?;
        Ok(RunSummary {
            build_state: run.build_state,
            device_path,
            results: run.results,
            results_path: self.config.results_path.clone(),
        })
    }

    /// Drive `run` through every phase, recording progress as it goes.
    pub fn drive(&self, run: &mut SimulationRun) -> HarnessResult<()> {
        let config = &self.config;
        config.validate()?;

        self.build(run)?;

        println!("Starting simulation in background...");
        let mut simulator = self.supervisor.launch(
            &config.simulator_path,
            &config.simulator_args(),
            config.working_directory.as_deref(),
            &config.env,
        )?;
        let lines = simulator
            .take_status_lines()
            .ok_or_else(|| HarnessError::launch("simulator output was already taken"))?;
        run.simulator = Some(simulator);
        run.stream_state = StreamState::WaitingForDevice;

        let slot = self.supervisor.slot();
        let mut discovery = DeviceDiscovery::with_timeout(config.discovery_timeout);
        let device_path = loop {
            match discovery.step(&lines, slot)? {
                DiscoveryStatus::DeviceFound(_) => run.stream_state = StreamState::AwaitingReady,
                DiscoveryStatus::Ready(path) => break self.resolve_device(&path),
                DiscoveryStatus::Pending => {}
            }
        };
        spawn_log_collector(lines);
        run.device_path = Some(device_path.clone());
        println!("Simulation is running.\n");

        let mut reader = open_device_log(&device_path)?;
        println!("Connected to UART0 to print perftest logging.\n");
        run.stream_state = StreamState::Streaming;

        let mut parser = LogParser::with_markers(&config.result_marker, &config.pass_marker);
        follow_log(
            &mut reader,
            &mut parser,
            slot,
            config.poll_interval,
            config.stream_timeout,
            |result| {
                info!(index = run.results.len(), "result");
                println!("{result}");
                run.results.push(result.to_string());
            },
        )?;
        run.stream_state = StreamState::Completed;

        write_results(&run.results, &config.results_path)
    }

    fn build(&self, run: &mut SimulationRun) -> HarnessResult<()> {
        if self.config.skip_build {
            info!("skipping build");
            run.build_state = BuildState::Built;
            return Ok(());
        }

        println!("Building perftest...\n");
        run.build_state = BuildState::Building;
        match self.supervisor.build(&self.config.build) {
            Ok(()) => {
                run.build_state = BuildState::Built;
                println!("\nFinished building process.\n");
                Ok(())
            }
            Err(err) => {
                run.build_state = BuildState::Failed;
                Err(err)
            }
        }
    }

    /// Relative device paths are taken relative to the simulator's working directory.
    fn resolve_device(&self, path: &Path) -> PathBuf {
        match &self.config.working_directory {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}
