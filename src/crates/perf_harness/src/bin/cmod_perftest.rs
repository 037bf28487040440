use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cmod_perf_harness::{
    install_interrupt_handler, ConfigFile, HarnessConfig, HarnessError, PerfHarness, ProcessSlot,
    ProcessSupervisor, BANNER, CANCELLED_EXIT_CODE,
};

#[derive(Debug, Parser)]
#[command(author, version, about = "CMOD performance test runner")]
struct Cli {
    /// OpenTitan checkout containing `bazelisk.sh`
    #[arg(long, default_value = ".")]
    repo_root: PathBuf,

    /// JSON file with path, marker and timeout overrides
    #[arg(long)]
    config: Option<PathBuf>,

    /// Where to write the results (defaults to `cmod_perftest_results`)
    #[arg(long)]
    results: Option<PathBuf>,

    /// Run the already-built simulator without invoking the build
    #[arg(long)]
    skip_build: bool,

    /// Give up if the simulator is not ready within this many milliseconds
    #[arg(long)]
    discovery_timeout_ms: Option<u64>,

    /// Give up if the device log does not pass within this many milliseconds
    #[arg(long)]
    stream_timeout_ms: Option<u64>,

    /// Log filter used when `RUST_LOG` is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    // Registered before any child process exists.
    let slot = ProcessSlot::new();
    install_interrupt_handler(slot.clone()).context("failed to install interrupt handler")?;

    println!("{BANNER}");

    let config = load_config(&cli)?;
    let harness = PerfHarness::new(config, ProcessSupervisor::new(slot));
    let summary = match harness.run() {
        Ok(summary) => summary,
        Err(HarnessError::Cancelled) => std::process::exit(CANCELLED_EXIT_CODE),
        Err(err) => return Err(err.into()),
    };

    println!(
        "\nFinished perftest.\nResult was written to: {}",
        summary.results_path.display()
    );
    Ok(())
}

fn load_config(cli: &Cli) -> Result<HarnessConfig> {
    let mut config = HarnessConfig::for_repo_root(&cli.repo_root);

    if let Some(path) = &cli.config {
        let file = ConfigFile::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?;
        config = config.apply_file(file);
    }
    if let Some(path) = &cli.results {
        config = config.with_results_path(path);
    }
    if let Some(ms) = cli.discovery_timeout_ms {
        config = config.with_discovery_timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = cli.stream_timeout_ms {
        config = config.with_stream_timeout(Duration::from_millis(ms));
    }

    Ok(config.with_skip_build(cli.skip_build))
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
