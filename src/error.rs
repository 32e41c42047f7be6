//! Error types for droidperf-io

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// droidperf-io error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed binary reply from the agent
    #[error("Decode error: {0}")]
    Decode(String),

    /// Agent socket closed or reset by the remote end
    #[error("Link error: {0}")]
    Link(String),

    /// Reply did not arrive within the read timeout
    #[error("Communication timeout")]
    Timeout,

    /// Agent could not be started on the device
    #[error("Agent start failed: {0}")]
    AgentStart(String),

    /// Remote shell produced no usable output
    #[error("Shell error: {0}")]
    Shell(String),

    /// ADB server rejected a request
    #[error("ADB error: {0}")]
    Adb(String),

    /// Configuration parse error
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration write error
    #[error("Config error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    /// Session is not in a state that allows the operation
    #[error("Invalid session state: {0}")]
    InvalidState(&'static str),
}

impl Error {
    /// Whether this error is evidence that the agent link is down.
    ///
    /// Link-class failures are skipped at the polling-tick boundary and
    /// counted toward the session liveness signal; everything else is a
    /// "no data this tick" condition.
    pub fn is_link_failure(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Link(_) | Error::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_failure_classification() {
        assert!(Error::Timeout.is_link_failure());
        assert!(Error::Link("reset".into()).is_link_failure());
        assert!(
            Error::Io(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "x"))
                .is_link_failure()
        );

        assert!(!Error::Shell("empty output".into()).is_link_failure());
        assert!(!Error::Decode("empty reply".into()).is_link_failure());
        assert!(!Error::AgentStart("no device".into()).is_link_failure());
    }
}
