//! Kill-on-interrupt for the live child process.

use std::io;
use std::sync::mpsc;
use std::thread;

use tracing::warn;

use crate::supervisor::ProcessSlot;

/// Exit status used when the run is cancelled by a signal.
pub const CANCELLED_EXIT_CODE: i32 = 130;

/// Terminates the live process when a cancellation request arrives.
#[derive(Debug, Clone)]
pub struct Canceller {
    slot: ProcessSlot,
}

impl Canceller {
    pub fn new(slot: ProcessSlot) -> Self {
        Self { slot }
    }

    /// Mark the run cancelled and kill the live process, if any.
    /// Returns whether one was killed.
    pub fn cancel(&self) -> bool {
        let killed = self.slot.cancel();
        if killed {
            println!("Simulation process killed.");
        }
        killed
    }
}

/// Install the interrupt handler on a dedicated thread.
///
/// Returns once the handler is registered. On interrupt (and SIGTERM on unix)
/// the run is cancelled, the live process is killed and the harness exits
/// with [`CANCELLED_EXIT_CODE`]. The interrupted run sees `Cancelled` if it
/// wakes up before the exit.
pub fn install_interrupt_handler(slot: ProcessSlot) -> io::Result<()> {
    let canceller = Canceller::new(slot);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()?;
    let (ready_tx, ready_rx) = mpsc::channel();

    thread::Builder::new()
        .name("interrupt-handler".to_string())
        .spawn(move || {
            let outcome = runtime.block_on(async move {
                let signals = Signals::register();
                let _ = ready_tx.send(
                    signals
                        .as_ref()
                        .map(|_| ())
                        .map_err(|err| io::Error::new(err.kind(), err.to_string())),
                );
                signals?.recv().await;
                Ok::<_, io::Error>(())
            });

            if outcome.is_ok() {
                warn!("interrupt received; cancelling run");
                canceller.cancel();
                std::process::exit(CANCELLED_EXIT_CODE);
            }
        })?;

    ready_rx
        .recv()
        .map_err(|_| io::Error::other("interrupt handler thread exited"))?
}

#[cfg(unix)]
struct Signals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn register() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => {}
            _ = self.terminate.recv() => {}
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn register() -> io::Result<Self> {
        Ok(Self)
    }

    async fn recv(self) {
        let _ = tokio::signal::ctrl_c().await;
    }
}
