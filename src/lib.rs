//! DroidPerf IO - Android performance acquisition over ADB
//!
//! This library connects to devices through the local ADB server, installs
//! and launches a small on-device agent, and polls per-app performance
//! counters (frame rate, CPU, network traffic) at a fixed cadence.
//! Cumulative counters are converted to per-tick deltas before delivery to
//! a [`metrics::TelemetrySink`].

pub mod adb;
pub mod agent;
pub mod config;
pub mod error;
pub mod metrics;
pub mod services;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{Error, Result};
pub use session::{DeviceSession, PerfSessionState};
