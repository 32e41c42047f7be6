//! DroidPerf IO - console front-end
//!
//! Connects to the first usable device reported by the local ADB server,
//! brings the on-device agent up, and streams per-tick metrics for one
//! target package to stdout until Ctrl-C.

use droidperf_io::adb::AdbClient;
use droidperf_io::config::AppConfig;
use droidperf_io::error::{Error, Result};
use droidperf_io::metrics::{MetricPoint, TelemetrySink};
use droidperf_io::services::LINK_FAILURE_THRESHOLD;
use droidperf_io::session::{self, DeviceSession};
use parking_lot::Mutex;
use std::env;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::thread;
use std::time::Duration;

/// Sink that prints each metric batch as one line per point
struct ConsoleSink;

impl TelemetrySink for ConsoleSink {
    fn add_data(&self, chart: &str, points: &[MetricPoint]) {
        for point in points {
            println!(
                "[{:>6}] {:<8} {:<14} {:.3}",
                point.tick, chart, point.series, point.value
            );
        }
    }
}

/// Parse the target package and config path from command line arguments.
///
/// Supports:
/// - `droidperf <package>` (positional)
/// - `droidperf <package> --config <path>` (flag-based)
/// - `droidperf <package> -c <path>` (short flag)
fn parse_args() -> Result<(String, Option<String>)> {
    let args: Vec<String> = env::args().collect();

    let mut package = None;
    let mut config_path = None;
    let mut i = 1;
    while i < args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            config_path = Some(args[i + 1].clone());
            i += 2;
        } else if !args[i].starts_with('-') && package.is_none() {
            package = Some(args[i].clone());
            i += 1;
        } else {
            i += 1;
        }
    }

    let package = package.ok_or(Error::InvalidState(
        "usage: droidperf <package> [--config <path>]",
    ))?;
    Ok((package, config_path))
}

fn main() -> Result<()> {
    let (package, config_path) = parse_args()?;

    let config = match &config_path {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::local_defaults(),
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.logging.level),
    )
    .init();

    log::info!("DroidPerf IO starting...");
    if let Some(path) = &config_path {
        log::info!("Using config: {}", path);
    }

    // Set up shutdown signal handler
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| Error::Adb(format!("Error setting Ctrl-C handler: {}", e)))?;

    // Pick the first usable device
    let adb = AdbClient::new(&config.adb.host, config.adb.port);
    let devices = adb.list_devices()?;
    let device = devices
        .iter()
        .find(|d| d.is_usable())
        .ok_or(Error::InvalidState("no usable device attached"))?;
    log::info!("Device: {}", device.serial);

    let interval = config.polling.interval();
    let session = Arc::new(Mutex::new(DeviceSession::new(
        adb,
        &device.serial,
        config,
    )));

    // Bring the agent up on a worker thread so Ctrl-C stays responsive
    let outcome = session::start_server_background(Arc::clone(&session));
    loop {
        match outcome.recv_timeout(Duration::from_millis(100)) {
            Ok(result) => {
                result?;
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                if !running.load(Ordering::Relaxed) {
                    session.lock().shutdown();
                    return Ok(());
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(Error::AgentStart("connect thread died".into()));
            }
        }
    }

    {
        let mut session = session.lock();
        session.set_target(&package)?;
        session.start_perf(Arc::new(ConsoleSink))?;
    }
    log::info!("DroidPerf running. Press Ctrl-C to stop.");

    // Main loop - watch for shutdown, device loss, and a dead agent
    while running.load(Ordering::Relaxed) {
        thread::sleep(interval);
        let session = session.lock();
        if session.consecutive_link_failures() >= LINK_FAILURE_THRESHOLD {
            log::error!("Agent stopped responding; ending session");
            break;
        }
        if !session.is_alive() {
            log::error!("Device disconnected; ending session");
            break;
        }
    }

    // Shutdown
    log::info!("Shutting down...");
    session.lock().shutdown();
    log::info!("DroidPerf stopped");
    Ok(())
}
