use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::BuildCommand;
use crate::error::{HarnessError, HarnessResult};

const BUILD_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Origin stream for captured simulator output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// Single captured line of simulator output with its source.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub stream: LogStream,
    pub line: String,
}

/// Observed state of the process held in a [`ProcessSlot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Empty,
    Running,
    Exited(ExitStatus),
}

/// The single live child process, shared between the run and the interrupt handler.
///
/// Every access goes through the mutex and no lock is held across a blocking
/// read, so a handler on another thread can always take and kill the child
/// while the run is parked on I/O. Once cancelled, the slot refuses new
/// children and the blocked run observes the flag instead of carrying on.
#[derive(Debug, Clone, Default)]
pub struct ProcessSlot {
    inner: Arc<Mutex<Option<Child>>>,
    cancelled: Arc<AtomicBool>,
}

/// Pipes of a child spawned through [`ProcessSlot::spawn`].
#[derive(Debug)]
pub struct SpawnedChild {
    pub pid: u32,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
}

impl ProcessSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `cmd` and install the child while holding the slot lock.
    ///
    /// A cancellation can never land between the spawn and the insert: either
    /// it is seen here and nothing is spawned, or it finds the child in the slot.
    pub fn spawn(
        &self,
        cmd: &mut Command,
        on_error: impl FnOnce(io::Error) -> HarnessError,
    ) -> HarnessResult<SpawnedChild> {
        let mut guard = self.lock();
        if self.is_cancelled() {
            return Err(HarnessError::Cancelled);
        }

        let mut child = cmd.spawn().map_err(on_error)?;
        let spawned = SpawnedChild {
            pid: child.id(),
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
        };
        let previous = guard.replace(child);
        drop(guard);

        if let Some(mut previous) = previous {
            warn!(pid = previous.id(), "replacing a live process; killing it");
            kill_and_reap(&mut previous);
        }
        Ok(spawned)
    }

    /// Mark the run cancelled and kill the live process, if any.
    ///
    /// Returns whether a process was killed.
    pub fn cancel(&self) -> bool {
        self.cancelled.store(true, Ordering::SeqCst);
        self.terminate()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Install `child` as the live process. A previous occupant is killed.
    pub fn replace(&self, child: Child) {
        let previous = self.lock().replace(child);
        if let Some(mut previous) = previous {
            warn!(pid = previous.id(), "replacing a live process; killing it");
            kill_and_reap(&mut previous);
        }
    }

    /// Pid of the live process, if any.
    pub fn pid(&self) -> Option<u32> {
        self.lock().as_ref().map(Child::id)
    }

    /// Poll the slot without blocking. An exited child is removed from the slot.
    pub fn poll(&self) -> io::Result<SlotState> {
        let mut guard = self.lock();
        let status = match guard.as_mut() {
            None => return Ok(SlotState::Empty),
            Some(child) => child.try_wait()?,
        };
        match status {
            Some(status) => {
                guard.take();
                Ok(SlotState::Exited(status))
            }
            None => Ok(SlotState::Running),
        }
    }

    /// Kill and reap the live process. Returns `false` when the slot was empty.
    ///
    /// Idempotent: a second call, or a call after the child already exited, is a no-op.
    pub fn terminate(&self) -> bool {
        let child = self.lock().take();
        match child {
            Some(mut child) => {
                kill_and_reap(&mut child);
                true
            }
            None => false,
        }
    }

    /// Terminate only if the live process is still `pid`.
    pub fn terminate_pid(&self, pid: u32) -> bool {
        let child = {
            let mut guard = self.lock();
            match guard.as_ref() {
                Some(child) if child.id() == pid => guard.take(),
                _ => None,
            }
        };
        match child {
            Some(mut child) => {
                kill_and_reap(&mut child);
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Child>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn kill_and_reap(child: &mut Child) {
    let pid = child.id();
    match child.try_wait() {
        Ok(Some(status)) => debug!(pid, %status, "process already exited"),
        _ => {
            if let Err(err) = child.kill() {
                debug!(pid, error = %err, "kill failed");
            }
            info!(pid, "process killed");
        }
    }
    let _ = child.wait();
}

/// Owns the build and simulator processes for a run.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    slot: ProcessSlot,
}

impl ProcessSupervisor {
    pub fn new(slot: ProcessSlot) -> Self {
        Self { slot }
    }

    /// Slot the interrupt handler should watch.
    pub fn slot(&self) -> &ProcessSlot {
        &self.slot
    }

    /// Run the build command to completion with inherited stdio.
    ///
    /// The build child occupies the live slot while it runs, so cancellation
    /// reaches it as well.
    pub fn build(&self, command: &BuildCommand) -> HarnessResult<()> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args);
        if let Some(dir) = &command.working_directory {
            cmd.current_dir(dir);
        }

        let spawned = self.slot.spawn(&mut cmd, |err| {
            HarnessError::BuildStart(format!("{}: {err}", command.program.display()))
        })?;
        info!(pid = spawned.pid, program = %command.program.display(), "build started");

        loop {
            match self.slot.poll()? {
                SlotState::Running => thread::sleep(BUILD_POLL_INTERVAL),
                SlotState::Exited(status) if status.success() => {
                    info!("build finished");
                    return Ok(());
                }
                SlotState::Exited(status) => return Err(HarnessError::BuildFailure(status)),
                SlotState::Empty => return Err(HarnessError::Cancelled),
            }
        }
    }

    /// Start the simulator with stdout and stderr captured line by line.
    pub fn launch(
        &self,
        executable: &Path,
        args: &[String],
        working_directory: Option<&Path>,
        env: &BTreeMap<String, String>,
    ) -> HarnessResult<Simulator> {
        let mut cmd = Command::new(executable);
        cmd.args(args);
        if let Some(dir) = working_directory {
            cmd.current_dir(dir);
        }
        cmd.envs(env);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let spawned = self.slot.spawn(&mut cmd, |err| {
            HarnessError::launch(format!("{}: {err}", executable.display()))
        })?;
        let pid = spawned.pid;

        let (Some(stdout), Some(stderr)) = (spawned.stdout, spawned.stderr) else {
            self.slot.terminate_pid(pid);
            return Err(HarnessError::launch("failed to capture simulator output"));
        };

        let (tx, rx) = mpsc::channel();
        spawn_log_reader(stdout, LogStream::Stdout, tx.clone());
        spawn_log_reader(stderr, LogStream::Stderr, tx);
        info!(pid, executable = %executable.display(), "simulator started");

        Ok(Simulator {
            pid,
            slot: self.slot.clone(),
            status_rx: Some(rx),
        })
    }

    /// Kill whatever process is currently live.
    pub fn terminate(&self) -> bool {
        self.slot.terminate()
    }
}

/// Handle to a launched simulator. Dropping it terminates the process.
#[derive(Debug)]
pub struct Simulator {
    pid: u32,
    slot: ProcessSlot,
    status_rx: Option<mpsc::Receiver<LogLine>>,
}

impl Simulator {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Take the captured stdout/stderr line stream. Only the first call returns it.
    pub fn take_status_lines(&mut self) -> Option<mpsc::Receiver<LogLine>> {
        self.status_rx.take()
    }

    pub fn is_running(&self) -> bool {
        self.slot.pid() == Some(self.pid) && matches!(self.slot.poll(), Ok(SlotState::Running))
    }

    /// Kill the simulator if it is still the live process.
    pub fn terminate(&self) -> bool {
        self.slot.terminate_pid(self.pid)
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn spawn_log_reader<R: io::Read + Send + 'static>(
    reader: R,
    stream: LogStream,
    tx: mpsc::Sender<LogLine>,
) {
    thread::spawn(move || {
        let buf_reader = BufReader::new(reader);
        for line in buf_reader.lines().map_while(Result::ok) {
            let line = LogLine {
                stream,
                line: line.trim().to_string(),
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}

/// Drain simulator output after discovery so neither pipe can fill up.
pub fn spawn_log_collector(log_rx: mpsc::Receiver<LogLine>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while let Ok(line) = log_rx.recv() {
            debug!(stream = ?line.stream, line = %line.line, "simulator output");
        }
    })
}
