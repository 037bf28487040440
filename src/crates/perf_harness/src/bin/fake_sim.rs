//! Scripted stand-in for the Verilator simulator used by the integration tests.
//!
//! Behaviour is selected through environment variables:
//! - `FAKE_SIM_MODE`: `pass` (default), `no-pass`, `no-ready`,
//!   `no-device`, `silent` or `exit`
//! - `FAKE_SIM_RESULTS`: `;`-separated results to report (default `12345`)
//! - `FAKE_SIM_DEVICE`: device log file name in the working directory
//! - `FAKE_SIM_RELATIVE`: announce the device path relative to the working directory
//! - `FAKE_SIM_PID_FILE`: file to write this process's pid into

use std::env;
use std::fs::{self, File};
use std::io::Write;
use std::thread;
use std::time::Duration;

const LINE_DELAY: Duration = Duration::from_millis(5);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Ok(path) = env::var("FAKE_SIM_PID_FILE") {
        fs::write(path, std::process::id().to_string())?;
    }

    let meminit: Vec<String> = env::args()
        .skip(1)
        .filter(|arg| arg.starts_with("--meminit="))
        .collect();
    for region in ["rom", "flash", "otp"] {
        let prefix = format!("--meminit={region},");
        if !meminit.iter().any(|arg| arg.starts_with(&prefix)) {
            eprintln!("missing memory image for {region}");
            std::process::exit(2);
        }
    }

    println!("booting");
    eprintln!("verilator: loading {} memory images", meminit.len());

    let mode = env::var("FAKE_SIM_MODE").unwrap_or_else(|_| "pass".to_string());
    match mode.as_str() {
        "exit" => std::process::exit(3),
        "silent" => park(),
        "no-device" => {
            println!("Simulation running");
            park();
        }
        _ => {}
    }

    let name = env::var("FAKE_SIM_DEVICE").unwrap_or_else(|_| "uart0.log".to_string());
    let absolute = env::current_dir()?.join(&name);
    let mut device = File::create(&absolute)?;
    let announced = if env::var("FAKE_SIM_RELATIVE").is_ok() {
        name.clone()
    } else {
        absolute.display().to_string()
    };

    let decoy = env::current_dir()?.join("uart1.log");
    println!("UART: Created {} for uart1.", decoy.display());
    println!("UART: Created {announced} for uart0.");
    if mode == "no-ready" {
        park();
    }
    println!("Simulation running");

    writeln!(device, "I00000 test_rom.c:81] TestROM:6b2ca9a1")?;
    for arg in &meminit {
        writeln!(device, "meminit {arg}")?;
    }
    device.flush()?;

    let results = env::var("FAKE_SIM_RESULTS").unwrap_or_else(|_| "12345".to_string());
    for result in results.split(';').filter(|result| !result.is_empty()) {
        thread::sleep(LINE_DELAY);
        writeln!(device, "I00001 cmod_perftest.c:73] Running test")?;
        // Split the result line across two writes.
        write!(device, "Res")?;
        device.flush()?;
        thread::sleep(LINE_DELAY);
        writeln!(device, "ult: {result}")?;
        device.flush()?;
    }

    if mode == "no-pass" {
        park();
    }

    thread::sleep(LINE_DELAY);
    writeln!(device, "PASS!")?;
    writeln!(device, "Result: after-pass")?;
    device.flush()?;

    park()
}

fn park() -> ! {
    loop {
        thread::sleep(Duration::from_secs(60));
    }
}
