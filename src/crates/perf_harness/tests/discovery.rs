use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use cmod_perf_harness::{
    classify_status_line, discover_device, parse_uart_line, Canceller, DeviceDiscovery,
    DiscoveryEvent, DiscoveryStatus, HarnessError, LogLine, LogStream, ProcessSlot, UartDevice,
};

fn stdout(line: &str) -> LogLine {
    LogLine {
        stream: LogStream::Stdout,
        line: line.to_string(),
    }
}

fn channel_with(lines: &[LogLine]) -> (mpsc::Sender<LogLine>, mpsc::Receiver<LogLine>) {
    let (tx, rx) = mpsc::channel();
    for line in lines {
        tx.send(line.clone()).expect("receiver alive");
    }
    (tx, rx)
}

#[test]
fn parses_uart0_announcement() {
    let device = parse_uart_line(
        "UART: Created /dev/pts/7 for uart0. Connect to it with any terminal program.",
    )
    .expect("announcement should parse");
    assert_eq!(
        device,
        UartDevice {
            path: "/dev/pts/7",
            uart: "uart0"
        }
    );
}

#[test]
fn parses_other_uarts_and_rejects_malformed_lines() {
    let device = parse_uart_line("UART: Created /tmp/u1 for uart1.").expect("uart1 parses");
    assert_eq!(device.uart, "uart1");

    assert!(parse_uart_line("UART: Created /tmp/u0").is_none());
    assert!(parse_uart_line("UART: Created  for uart0.").is_none());
    assert!(parse_uart_line("SPI: Created /tmp/spi for spi0.").is_none());
}

#[test]
fn classifies_status_lines() {
    assert_eq!(classify_status_line("booting"), DiscoveryEvent::Other);
    assert_eq!(
        classify_status_line("Simulation running, end by pressing CTRL-c."),
        DiscoveryEvent::Ready
    );
    assert!(matches!(
        classify_status_line("UART: Created /tmp/dev0 for uart0."),
        DiscoveryEvent::DeviceCreated(_)
    ));
}

#[test]
fn yields_device_from_concrete_scenario() {
    let mut discovery = DeviceDiscovery::new();
    let mut status = DiscoveryStatus::Pending;
    for line in [
        "booting",
        "UART: Created /tmp/dev0 for uart0.",
        "Simulation running",
    ] {
        status = discovery.observe(line).expect("discovery should succeed");
    }
    assert_eq!(status, DiscoveryStatus::Ready(PathBuf::from("/tmp/dev0")));
}

#[test]
fn first_uart0_announcement_wins() {
    let mut discovery = DeviceDiscovery::new();
    let ignored = discovery
        .observe("UART: Created /tmp/uart1 for uart1.")
        .expect("uart1 is ignored");
    assert_eq!(ignored, DiscoveryStatus::Pending);

    let first = discovery
        .observe("UART: Created /tmp/first for uart0.")
        .expect("first uart0");
    assert_eq!(first, DiscoveryStatus::DeviceFound(PathBuf::from("/tmp/first")));

    let second = discovery
        .observe("UART: Created /tmp/second for uart0.")
        .expect("second uart0");
    assert_eq!(second, DiscoveryStatus::Pending, "device is reported once");
    assert_eq!(discovery.device(), Some("/tmp/first"));

    let status = discovery
        .observe("  Simulation running  ")
        .expect("ready with device");
    assert_eq!(status, DiscoveryStatus::Ready(PathBuf::from("/tmp/first")));
}

#[test]
fn readiness_without_uart0_is_device_not_found() {
    let mut discovery = DeviceDiscovery::new();
    discovery
        .observe("UART: Created /tmp/uart1 for uart1.")
        .expect("uart1 is ignored");
    let err = discovery
        .observe("Simulation running")
        .expect_err("no uart0 device");
    assert!(matches!(err, HarnessError::DeviceNotFound));
}

#[test]
fn discovery_skips_stderr_lines() {
    let (_tx, rx) = channel_with(&[
        LogLine {
            stream: LogStream::Stderr,
            line: "UART: Created /tmp/stderr for uart0.".to_string(),
        },
        stdout("UART: Created /tmp/stdout for uart0."),
        stdout("Simulation running"),
    ]);

    let path = discover_device(&rx, None, &ProcessSlot::new()).expect("device should be found");
    assert_eq!(path, PathBuf::from("/tmp/stdout"));
}

#[test]
fn discovery_waits_for_late_lines() {
    let (tx, rx) = channel_with(&[stdout("booting")]);
    let writer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        tx.send(stdout("UART: Created /tmp/late for uart0.")).unwrap();
        thread::sleep(Duration::from_millis(50));
        tx.send(stdout("Simulation running")).unwrap();
        tx
    });

    let path = discover_device(&rx, None, &ProcessSlot::new()).expect("device should be found");
    assert_eq!(path, PathBuf::from("/tmp/late"));
    drop(writer.join().expect("writer thread"));
}

#[test]
fn step_reports_device_before_readiness() {
    let (_tx, rx) = channel_with(&[
        stdout("booting"),
        stdout("UART: Created /tmp/dev0 for uart0."),
        stdout("UART: Created /tmp/again for uart0."),
        stdout("Simulation running"),
    ]);
    let slot = ProcessSlot::new();
    let mut discovery = DeviceDiscovery::new();

    let found = discovery.step(&rx, &slot).expect("device announced");
    assert_eq!(found, DiscoveryStatus::DeviceFound(PathBuf::from("/tmp/dev0")));
    let ready = discovery.step(&rx, &slot).expect("simulator ready");
    assert_eq!(ready, DiscoveryStatus::Ready(PathBuf::from("/tmp/dev0")));
}

#[test]
fn closed_stream_waits_until_cancelled() {
    let (tx, rx) = channel_with(&[stdout("UART: Created /tmp/dev0 for uart0.")]);
    drop(tx);

    let slot = ProcessSlot::new();
    let canceller = Canceller::new(slot.clone());
    let handler = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        canceller.cancel()
    });

    let mut discovery = DeviceDiscovery::new();
    let err = discovery.run(&rx, &slot).expect_err("run was cancelled");
    assert!(matches!(err, HarnessError::Cancelled));
    assert!(!handler.join().expect("handler thread"), "no process to kill");
    assert_eq!(discovery.device(), Some("/tmp/dev0"));
}

#[test]
fn closed_stream_with_timeout_is_a_discovery_timeout() {
    let (tx, rx) = channel_with(&[stdout("booting")]);
    drop(tx);

    let err = discover_device(&rx, Some(Duration::from_millis(100)), &ProcessSlot::new())
        .expect_err("never ready");
    assert!(matches!(err, HarnessError::DiscoveryTimeout(_)));
}

#[test]
fn cancelled_slot_stops_discovery_before_reading() {
    let (_tx, rx) = channel_with(&[
        stdout("UART: Created /tmp/dev0 for uart0."),
        stdout("Simulation running"),
    ]);
    let slot = ProcessSlot::new();
    slot.cancel();

    let err = discover_device(&rx, None, &slot).expect_err("already cancelled");
    assert!(matches!(err, HarnessError::Cancelled));
}

#[test]
fn optional_timeout_bounds_discovery() {
    let (_tx, rx) = channel_with(&[stdout("booting")]);
    let mut discovery = DeviceDiscovery::with_timeout(Some(Duration::from_millis(50)));

    let err = discovery
        .run(&rx, &ProcessSlot::new())
        .expect_err("no readiness");
    assert!(matches!(err, HarnessError::DiscoveryTimeout(_)));
    assert!(discovery.device().is_none());
}
