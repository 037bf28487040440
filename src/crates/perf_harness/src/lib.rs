//! Harness for the CMOD performance test: builds the Verilator simulator,
//! launches it with the perftest memory images, follows the uart0 log it
//! creates and writes every reported result to a file.
//!
//! Typical usage:
//! ```no_run
//! use cmod_perf_harness::{
//!     install_interrupt_handler, HarnessConfig, PerfHarness, ProcessSlot, ProcessSupervisor,
//! };
//!
//! let slot = ProcessSlot::new();
//! install_interrupt_handler(slot.clone()).expect("handler should install");
//!
//! let config = HarnessConfig::for_repo_root("/path/to/opentitan");
//! let harness = PerfHarness::new(config, ProcessSupervisor::new(slot));
//! let summary = harness.run().expect("perftest should pass");
//! for result in &summary.results {
//!     println!("{result}");
//! }
//! ```

mod config;
mod discovery;
mod error;
mod harness;
mod parser;
mod signal;
mod sink;
mod supervisor;

pub use config::{
    BuildCommand, ConfigFile, HarnessConfig, MemRegion, MemoryImage, DEFAULT_PASS_MARKER,
    DEFAULT_RESULTS_FILE, DEFAULT_RESULT_MARKER, PERFTEST_TARGET,
};
pub use discovery::{
    classify_status_line, discover_device, parse_uart_line, DeviceDiscovery, DiscoveryEvent,
    DiscoveryStatus, UartDevice, READY_MARKER, RESULT_UART, UART_CREATED_MARKER,
};
pub use error::{HarnessError, HarnessResult};
pub use harness::{BuildState, PerfHarness, RunSummary, SimulationRun, StreamState, BANNER};
pub use parser::{follow_log, open_device_log, LogEvent, LogParser, ParserState};
pub use signal::{install_interrupt_handler, Canceller, CANCELLED_EXIT_CODE};
pub use sink::write_results;
pub use supervisor::{
    spawn_log_collector, LogLine, LogStream, ProcessSlot, ProcessSupervisor, Simulator, SlotState,
    SpawnedChild,
};
