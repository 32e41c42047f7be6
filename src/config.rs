//! Configuration for droidperf-io
//!
//! Loads configuration from a TOML file with the minimal parameters needed
//! to reach the ADB server and manage the on-device agent.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub adb: AdbConfig,
    pub agent: AgentConfig,
    pub polling: PollingConfig,
    pub logging: LoggingConfig,
}

/// ADB server endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdbConfig {
    /// Host the ADB server listens on
    pub host: String,
    /// ADB server port (5037 unless relocated)
    pub port: u16,
}

/// On-device agent configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    /// Local path of the agent binary pushed to the device when absent
    pub local_binary: String,
    /// Install path of the agent on the device
    pub remote_path: String,
    /// Fixed TCP port the agent listens on; forwarded to a free local port
    pub remote_port: u16,
}

/// Polling cadence and connection retry behavior
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollingConfig {
    /// Polling interval in milliseconds (also the agent read timeout)
    pub interval_ms: u64,
    /// Handshake attempts while waiting for the agent to come up
    pub connect_attempts: u32,
    /// Backoff between handshake attempts in milliseconds
    pub connect_backoff_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log output (stdout, stderr, or file path)
    pub output: String,
}

impl PollingConfig {
    /// Polling interval as a [`Duration`]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Handshake backoff as a [`Duration`]
    pub fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_ms)
    }
}

impl AppConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Default configuration for a local ADB server and a
    /// `/data/local/tmp` agent install.
    pub fn local_defaults() -> Self {
        Self {
            adb: AdbConfig {
                host: "127.0.0.1".to_string(),
                port: 5037,
            },
            agent: AgentConfig {
                local_binary: "perfagent".to_string(),
                remote_path: "/data/local/tmp/perfagent".to_string(),
                remote_port: 43212,
            },
            polling: PollingConfig {
                interval_ms: 500,
                connect_attempts: 10,
                connect_backoff_ms: 200,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                output: "stdout".to_string(),
            },
        }
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::local_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::local_defaults();
        assert_eq!(config.adb.host, "127.0.0.1");
        assert_eq!(config.adb.port, 5037);
        assert_eq!(config.agent.remote_path, "/data/local/tmp/perfagent");
        assert_eq!(config.polling.interval_ms, 500);
        assert_eq!(config.polling.interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_toml_serialization() {
        let config = AppConfig::local_defaults();
        let toml_string = toml::to_string_pretty(&config).unwrap();

        // Should contain all sections
        assert!(toml_string.contains("[adb]"));
        assert!(toml_string.contains("[agent]"));
        assert!(toml_string.contains("[polling]"));
        assert!(toml_string.contains("[logging]"));

        // Should contain key values
        assert!(toml_string.contains("port = 5037"));
        assert!(toml_string.contains("interval_ms = 500"));
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_content = r#"
[adb]
host = "10.0.0.2"
port = 5038

[agent]
local_binary = "target/perfagent"
remote_path = "/data/local/tmp/agent"
remote_port = 40000

[polling]
interval_ms = 1000
connect_attempts = 5
connect_backoff_ms = 100

[logging]
level = "debug"
output = "stdout"
"#;

        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.adb.host, "10.0.0.2");
        assert_eq!(config.agent.remote_port, 40000);
        assert_eq!(config.polling.connect_attempts, 5);
        assert_eq!(config.logging.level, "debug");
    }
}
