use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

/// Result alias for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Errors that abort a perftest run. Every variant is fatal for the run.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("failed to start build command: {0}")]
    BuildStart(String),
    #[error("build failed with status {0}")]
    BuildFailure(ExitStatus),
    #[error("failed to launch simulator: {0}")]
    LaunchFailure(String),
    #[error("simulator reported readiness without creating a device for uart0")]
    DeviceNotFound,
    #[error("simulator did not report readiness within {0:?}")]
    DiscoveryTimeout(Duration),
    #[error("device log did not report a pass within {0:?}")]
    StreamTimeout(Duration),
    #[error("failed to open device log {path}: {source}")]
    DeviceOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write results to {path}: {source}")]
    ResultWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("run was cancelled")]
    Cancelled,
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to parse config file: {0}")]
    ConfigParse(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl HarnessError {
    pub(crate) fn launch(err: impl Into<String>) -> Self {
        HarnessError::LaunchFailure(err.into())
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        HarnessError::Config(message.into())
    }
}
