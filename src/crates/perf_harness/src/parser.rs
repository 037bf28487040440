//! Line classifier for the device log written by the perftest firmware.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config::{DEFAULT_PASS_MARKER, DEFAULT_RESULT_MARKER};
use crate::error::{HarnessError, HarnessResult};
use crate::supervisor::ProcessSlot;

/// Parser state. `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    Streaming,
    Completed,
}

/// Classification of one device log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEvent<'a> {
    Result(&'a str),
    Pass,
    Ignored,
}

/// Extracts results from device log lines until the pass marker is seen.
#[derive(Debug, Clone)]
pub struct LogParser {
    result_marker: String,
    pass_marker: String,
    state: ParserState,
    results: Vec<String>,
}

impl Default for LogParser {
    fn default() -> Self {
        Self::with_markers(DEFAULT_RESULT_MARKER, DEFAULT_PASS_MARKER)
    }
}

impl LogParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_markers(result_marker: impl Into<String>, pass_marker: impl Into<String>) -> Self {
        Self {
            result_marker: result_marker.into(),
            pass_marker: pass_marker.into(),
            state: ParserState::Streaming,
            results: Vec::new(),
        }
    }

    /// Classify a line after trimming its surrounding whitespace.
    ///
    /// The pass marker wins over the result marker when a line carries both.
    pub fn classify<'a>(&self, line: &'a str) -> LogEvent<'a> {
        let line = line.trim();
        if line.contains(&self.pass_marker) {
            return LogEvent::Pass;
        }
        match line.find(&self.result_marker) {
            Some(index) => LogEvent::Result(&line[index + self.result_marker.len()..]),
            None => LogEvent::Ignored,
        }
    }

    /// Feed one line and return the result it carried, if any.
    ///
    /// Lines fed after completion are ignored.
    pub fn feed(&mut self, line: &str) -> Option<&str> {
        if self.state == ParserState::Completed {
            return None;
        }
        match self.classify(line) {
            LogEvent::Pass => {
                self.state = ParserState::Completed;
                None
            }
            LogEvent::Result(result) => {
                self.results.push(result.to_string());
                self.results.last().map(String::as_str)
            }
            LogEvent::Ignored => None,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == ParserState::Completed
    }

    /// Results in the order they were observed, duplicates included.
    pub fn results(&self) -> &[String] {
        &self.results
    }

    pub fn into_results(self) -> Vec<String> {
        self.results
    }
}

/// Open the discovered device for reading.
pub fn open_device_log(path: &Path) -> HarnessResult<BufReader<File>> {
    let file = File::open(path).map_err(|source| HarnessError::DeviceOpen {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), "connected to device log");
    Ok(BufReader::new(file))
}

/// Follow a growing log until the parser completes.
///
/// End of content is not end of stream: the reader sleeps for `poll_interval`
/// and tries again, and a line without its terminator is held back until the
/// rest of it arrives. `on_result` sees every result as it is extracted.
/// Returns `Cancelled` once `slot` is cancelled, including when the read
/// fails because the cancelled simulator took its device with it.
pub fn follow_log<R, F>(
    reader: &mut R,
    parser: &mut LogParser,
    slot: &ProcessSlot,
    poll_interval: Duration,
    timeout: Option<Duration>,
    mut on_result: F,
) -> HarnessResult<()>
where
    R: BufRead,
    F: FnMut(&str),
{
    let deadline = timeout.map(|timeout| (Instant::now() + timeout, timeout));
    let mut pending = Vec::new();

    while !parser.is_complete() {
        let read = match reader.read_until(b'\n', &mut pending) {
            Ok(read) => read,
            Err(_) if slot.is_cancelled() => return Err(HarnessError::Cancelled),
            Err(err) => return Err(err.into()),
        };
        if read == 0 || pending.last() != Some(&b'\n') {
            if slot.is_cancelled() {
                return Err(HarnessError::Cancelled);
            }
            if let Some((deadline, timeout)) = deadline {
                if Instant::now() >= deadline {
                    return Err(HarnessError::StreamTimeout(timeout));
                }
            }
            thread::sleep(poll_interval);
            continue;
        }

        let line = String::from_utf8_lossy(&pending).into_owned();
        pending.clear();

        if let Some(result) = parser.feed(&line) {
            on_result(result);
        } else {
            debug!(line = line.trim(), "device log");
        }
    }

    Ok(())
}
