//! Learns the simulator's UART device path from its startup output.

use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::supervisor::{LogLine, LogStream, ProcessSlot};

pub const UART_CREATED_MARKER: &str = "UART: Created ";
pub const READY_MARKER: &str = "Simulation running";

const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// The UART whose device carries the perftest log.
pub const RESULT_UART: &str = "uart0";

/// A `UART: Created <path> for <uart>.` announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UartDevice<'a> {
    pub path: &'a str,
    pub uart: &'a str,
}

/// Classification of one line of simulator stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryEvent<'a> {
    DeviceCreated(UartDevice<'a>),
    Ready,
    Other,
}

/// Parse a device announcement. The path runs from the marker to the first ` for uart`.
pub fn parse_uart_line(line: &str) -> Option<UartDevice<'_>> {
    const FOR: &str = " for ";

    let start = line.find(UART_CREATED_MARKER)? + UART_CREATED_MARKER.len();
    let rest = &line[start..];
    let split = rest.find(" for uart")?;
    let path = &rest[..split];
    let tail = &rest[split + FOR.len()..];
    let end = tail.find('.')?;
    let uart = &tail[..end];

    if path.is_empty() || uart.is_empty() {
        return None;
    }
    Some(UartDevice { path, uart })
}

pub fn classify_status_line(line: &str) -> DiscoveryEvent<'_> {
    if line.contains(UART_CREATED_MARKER) {
        if let Some(device) = parse_uart_line(line) {
            return DiscoveryEvent::DeviceCreated(device);
        }
    }
    if line.contains(READY_MARKER) {
        return DiscoveryEvent::Ready;
    }
    DiscoveryEvent::Other
}

/// Progress of device discovery after a line has been observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryStatus {
    Pending,
    /// The uart0 device was announced. Reported once, for the first announcement.
    DeviceFound(PathBuf),
    Ready(PathBuf),
}

/// Accumulates stdout lines until the simulator reports readiness.
///
/// Without a timeout discovery never gives up on its own: a simulator that
/// exits or goes quiet before readiness is waited on until the run is
/// cancelled through its [`ProcessSlot`].
#[derive(Debug, Default)]
pub struct DeviceDiscovery {
    device: Option<String>,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    stream_closed: bool,
}

impl DeviceDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give up with `DiscoveryTimeout` once `timeout` has passed since the first read.
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    /// Device path seen so far, if any.
    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    /// Feed one line. Readiness without a uart0 device is `DeviceNotFound`.
    pub fn observe(&mut self, line: &str) -> HarnessResult<DiscoveryStatus> {
        match classify_status_line(line.trim()) {
            DiscoveryEvent::DeviceCreated(device) if device.uart == RESULT_UART => {
                if self.device.is_none() {
                    info!(path = device.path, "found uart0 device");
                    self.device = Some(device.path.to_string());
                    return Ok(DiscoveryStatus::DeviceFound(PathBuf::from(device.path)));
                }
                warn!(
                    kept = self.device.as_deref().unwrap_or_default(),
                    ignored = device.path,
                    "duplicate uart0 device announcement"
                );
                Ok(DiscoveryStatus::Pending)
            }
            DiscoveryEvent::DeviceCreated(device) => {
                debug!(uart = device.uart, path = device.path, "ignoring device");
                Ok(DiscoveryStatus::Pending)
            }
            DiscoveryEvent::Ready => match &self.device {
                Some(path) => Ok(DiscoveryStatus::Ready(PathBuf::from(path))),
                None => Err(HarnessError::DeviceNotFound),
            },
            DiscoveryEvent::Other => Ok(DiscoveryStatus::Pending),
        }
    }

    /// Block until the next change in discovery progress.
    ///
    /// Returns `DeviceFound` or `Ready`, never `Pending`. Fails with
    /// `Cancelled` once `slot` is cancelled and with `DiscoveryTimeout` when
    /// a configured timeout elapses.
    pub fn step(
        &mut self,
        lines: &mpsc::Receiver<LogLine>,
        slot: &ProcessSlot,
    ) -> HarnessResult<DiscoveryStatus> {
        if let (Some(timeout), None) = (self.timeout, self.deadline) {
            self.deadline = Some(Instant::now() + timeout);
        }

        loop {
            if slot.is_cancelled() {
                return Err(HarnessError::Cancelled);
            }
            let wait = match (self.deadline, self.timeout) {
                (Some(deadline), Some(timeout)) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(HarnessError::DiscoveryTimeout(timeout));
                    }
                    remaining.min(CANCEL_CHECK_INTERVAL)
                }
                _ => CANCEL_CHECK_INTERVAL,
            };

            let line = match lines.recv_timeout(wait) {
                Ok(line) => line,
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    if !self.stream_closed {
                        warn!("simulator closed its output before reporting readiness");
                        self.stream_closed = true;
                    }
                    thread::sleep(wait);
                    continue;
                }
            };

            if line.stream == LogStream::Stderr {
                debug!(line = %line.line, "simulator stderr");
                continue;
            }
            debug!(line = %line.line, "simulator stdout");

            match self.observe(&line.line)? {
                DiscoveryStatus::Pending => continue,
                status => return Ok(status),
            }
        }
    }

    /// Read simulator output until readiness and return the uart0 device path.
    pub fn run(
        &mut self,
        lines: &mpsc::Receiver<LogLine>,
        slot: &ProcessSlot,
    ) -> HarnessResult<PathBuf> {
        loop {
            if let DiscoveryStatus::Ready(path) = self.step(lines, slot)? {
                return Ok(path);
            }
        }
    }
}

/// Convenience wrapper around [`DeviceDiscovery::run`].
pub fn discover_device(
    lines: &mpsc::Receiver<LogLine>,
    timeout: Option<Duration>,
    slot: &ProcessSlot,
) -> HarnessResult<PathBuf> {
    DeviceDiscovery::with_timeout(timeout).run(lines, slot)
}
