//! Device session lifecycle
//!
//! One [`DeviceSession`] per attached device serial. It owns the agent
//! install/launch/handshake sequence, the forwarded port, the agent link,
//! and the polling scheduler. State machine:
//!
//! ```text
//! Idle -> Connecting -> Ready -> Active
//!   \________\___________\________\____ Stopped (shutdown / device loss)
//! ```
//!
//! `start_server` never leaves a half-open connection: any failure tears
//! the forwarded port down before returning. `end_perf` is idempotent and
//! guarantees that no poll tick runs after it returns.

use crate::adb::{AdbClient, AdbShell};
use crate::agent::AgentLink;
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::metrics::TelemetrySink;
use crate::services::{
    CpuPerfService, FpsPerfService, NetworkPerfService, PerfService, PollingScheduler,
};
use crate::transport::TcpTransport;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Connect timeout for the forwarded agent port
const AGENT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Session state per device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerfSessionState {
    /// No connection attempted yet
    Idle,
    /// `start_server` in progress
    Connecting,
    /// Agent reachable, no polling running
    Ready,
    /// Polling services running
    Active,
    /// Connection closed (explicit stop or device loss)
    Stopped,
}

/// Resolved target application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetApp {
    /// Package name as selected by the front-end
    pub package: String,
    /// Process UID (argument of the `network` agent command)
    pub uid: u32,
    /// Process PID (for `/proc/<pid>/stat`)
    pub pid: u32,
}

/// One device's connection lifecycle
pub struct DeviceSession {
    serial: String,
    adb: AdbClient,
    config: AppConfig,
    state: PerfSessionState,
    local_port: Option<u16>,
    link: Option<Arc<Mutex<AgentLink>>>,
    scheduler: Option<PollingScheduler>,
    target: Option<TargetApp>,
}

impl DeviceSession {
    /// Create a session for a discovered serial; no I/O happens here
    pub fn new(adb: AdbClient, serial: impl Into<String>, config: AppConfig) -> Self {
        Self {
            serial: serial.into(),
            adb,
            config,
            state: PerfSessionState::Idle,
            local_port: None,
            link: None,
            scheduler: None,
            target: None,
        }
    }

    /// Device serial id
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Current lifecycle state
    pub fn state(&self) -> PerfSessionState {
        self.state
    }

    /// Selected target application, if resolved
    pub fn target(&self) -> Option<&TargetApp> {
        self.target.as_ref()
    }

    /// Cheap liveness probe: is the serial still reported by the ADB
    /// server as a usable transport?
    ///
    /// Runs on its own ADB connection and never contends with the agent
    /// socket, so the front-end can poll it freely.
    pub fn is_alive(&self) -> bool {
        match self.adb.list_devices() {
            Ok(devices) => devices
                .iter()
                .any(|d| d.serial == self.serial && d.is_usable()),
            Err(e) => {
                log::debug!("{}: liveness probe failed: {}", self.serial, e);
                false
            }
        }
    }

    /// Install and launch the agent, forward a port, and handshake
    ///
    /// Blocking; use [`start_server_background`] from interactive callers.
    pub fn start_server(&mut self) -> Result<()> {
        if self.state == PerfSessionState::Active {
            return Err(Error::InvalidState("perf session already active"));
        }
        self.state = PerfSessionState::Connecting;
        log::info!("{}: starting agent server", self.serial);

        match self.try_start_server() {
            Ok(()) => {
                self.state = PerfSessionState::Ready;
                Ok(())
            }
            Err(e) => {
                // Never leave a half-open connection behind
                self.release_forward();
                self.link = None;
                self.state = PerfSessionState::Stopped;
                Err(Error::AgentStart(e.to_string()))
            }
        }
    }

    fn try_start_server(&mut self) -> Result<()> {
        self.ensure_agent_installed()?;

        let remote_port = self.config.agent.remote_port;
        let local_port = self.adb.forward_port(&self.serial, remote_port)?;
        log::debug!(
            "{}: forwarded tcp:{} -> device tcp:{}",
            self.serial,
            local_port,
            remote_port
        );
        self.local_port = Some(local_port);

        self.launch_agent()?;

        let attempts = self.config.polling.connect_attempts.max(1);
        let backoff = self.config.polling.connect_backoff();
        let mut last_err = Error::AgentStart("no handshake attempt made".into());

        for attempt in 1..=attempts {
            log::debug!("{}: handshake attempt {}/{}", self.serial, attempt, attempts);
            match self.try_connect(local_port) {
                Ok(link) => {
                    log::info!("{}: agent ready on local port {}", self.serial, local_port);
                    self.link = Some(Arc::new(Mutex::new(link)));
                    return Ok(());
                }
                Err(e) => {
                    last_err = e;
                    thread::sleep(backoff);
                }
            }
        }
        Err(last_err)
    }

    fn try_connect(&self, local_port: u16) -> Result<AgentLink> {
        let addr = SocketAddr::from(([127, 0, 0, 1], local_port));
        let transport = TcpTransport::connect(
            addr,
            AGENT_CONNECT_TIMEOUT,
            self.config.polling.interval(),
        )?;
        let shell = AdbShell::new(self.adb.clone(), &self.serial);
        let mut link = AgentLink::new(Box::new(transport), Box::new(shell));
        link.handshake()?;
        Ok(link)
    }

    /// Push the agent binary unless it is already installed
    fn ensure_agent_installed(&self) -> Result<()> {
        let remote_path = &self.config.agent.remote_path;
        let listing = self
            .adb
            .exec_shell(&self.serial, &format!("ls {}", remote_path))?;
        if listing.trim() == remote_path.as_str() {
            log::debug!("{}: agent already installed at {}", self.serial, remote_path);
            return Ok(());
        }

        log::info!("{}: pushing agent binary to {}", self.serial, remote_path);
        let data = std::fs::read(&self.config.agent.local_binary).map_err(|e| {
            Error::AgentStart(format!(
                "agent binary not found at {}: {}",
                self.config.agent.local_binary, e
            ))
        })?;
        self.adb.push(&self.serial, &data, remote_path)?;
        Ok(())
    }

    fn launch_agent(&self) -> Result<()> {
        let remote_path = &self.config.agent.remote_path;
        let remote_port = self.config.agent.remote_port;
        self.adb.exec_shell(
            &self.serial,
            &format!(
                "nohup {} --port {} >/dev/null 2>&1 &",
                remote_path, remote_port
            ),
        )?;
        Ok(())
    }

    /// Resolve the target package to UID and PID over the shell
    pub fn set_target(&mut self, package: &str) -> Result<()> {
        let dumpsys = self
            .adb
            .exec_shell(&self.serial, &format!("dumpsys package {}", package))?;
        let uid = parse_user_id(&dumpsys)
            .ok_or_else(|| Error::Shell(format!("no userId for package {}", package)))?;

        let pidof = self
            .adb
            .exec_shell(&self.serial, &format!("pidof {}", package))?;
        let pid = parse_pid(&pidof)
            .ok_or_else(|| Error::Shell(format!("package {} is not running", package)))?;

        log::info!("{}: target {} (uid={}, pid={})", self.serial, package, uid, pid);
        self.target = Some(TargetApp {
            package: package.to_string(),
            uid,
            pid,
        });
        Ok(())
    }

    /// Start the polling services for the resolved target
    ///
    /// Per-source state starts empty on every call, so a changed target
    /// never inherits stale baselines.
    pub fn start_perf(&mut self, sink: Arc<dyn TelemetrySink>) -> Result<()> {
        if self.state != PerfSessionState::Ready {
            return Err(Error::InvalidState("perf requires a ready session"));
        }
        let target = self
            .target
            .clone()
            .ok_or(Error::InvalidState("no target application selected"))?;
        let link = self
            .link
            .clone()
            .ok_or(Error::InvalidState("agent link not established"))?;

        let interval = self.config.polling.interval();
        let services: Vec<Box<dyn PerfService>> = vec![
            Box::new(FpsPerfService::new(target.uid, interval)),
            Box::new(CpuPerfService::new(target.pid)),
            Box::new(NetworkPerfService::new(target.uid)),
        ];

        self.scheduler = Some(PollingScheduler::start(link, services, sink, interval)?);
        self.state = PerfSessionState::Active;
        log::info!("{}: perf session started for {}", self.serial, target.package);
        Ok(())
    }

    /// Stop polling, close the agent connection, and remove the port
    /// forward
    ///
    /// Idempotent; after it returns no further poll tick executes and the
    /// per-source state is gone (it lives in the dropped services). The
    /// forward is released here so repeated start/stop cycles do not
    /// accumulate forwards on the ADB server.
    pub fn end_perf(&mut self) {
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.stop();
        }
        if let Some(link) = self.link.take() {
            link.lock().close();
            log::info!("{}: agent connection closed", self.serial);
        }
        self.release_forward();
        if self.state != PerfSessionState::Idle {
            self.state = PerfSessionState::Stopped;
        }
    }

    /// Consecutive link failures reported by the running scheduler
    pub fn consecutive_link_failures(&self) -> u32 {
        self.scheduler
            .as_ref()
            .map(|s| s.consecutive_link_failures())
            .unwrap_or(0)
    }

    fn release_forward(&mut self) {
        if let Some(port) = self.local_port.take() {
            if let Err(e) = self.adb.remove_forward(&self.serial, port) {
                log::debug!("{}: killforward tcp:{} failed: {}", self.serial, port, e);
            }
        }
    }

    /// Terminate the agent (best effort) and release the forwarded port
    ///
    /// Called once per device at application teardown.
    pub fn shutdown(&mut self) {
        log::info!("{}: shutting down session", self.serial);
        self.end_perf();
        let kill = format!("pkill -f {}", self.config.agent.remote_path);
        if let Err(e) = self.adb.exec_shell(&self.serial, &kill) {
            log::debug!("{}: agent kill failed: {}", self.serial, e);
        }
        self.release_forward();
        self.state = PerfSessionState::Stopped;
    }
}

/// Start a session's server on a worker thread
///
/// The caller can show progress while waiting and receives the outcome on
/// the returned channel; dropping the receiver leaves the attempt to
/// complete in the background.
pub fn start_server_background(
    session: Arc<Mutex<DeviceSession>>,
) -> mpsc::Receiver<Result<()>> {
    let (tx, rx) = mpsc::channel();
    let spawn_result = thread::Builder::new()
        .name("session-connect".to_string())
        .spawn(move || {
            let result = session.lock().start_server();
            let _ = tx.send(result);
        });
    if let Err(e) = spawn_result {
        // Channel already moved into the closure on success; only reachable
        // when the thread could not be spawned at all
        log::error!("Failed to spawn session-connect thread: {}", e);
    }
    rx
}

/// Pull the `userId=` value out of `dumpsys package` output
fn parse_user_id(output: &str) -> Option<u32> {
    for line in output.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("userId=") {
            let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            if !digits.is_empty() {
                return digits.parse().ok();
            }
        }
    }
    None
}

/// First PID of `pidof` output
fn parse_pid(output: &str) -> Option<u32> {
    output.split_whitespace().next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adb::ScriptedShell;
    use crate::metrics::MetricPoint;
    use crate::transport::MockTransport;

    struct NullSink;
    impl TelemetrySink for NullSink {
        fn add_data(&self, _chart: &str, _points: &[MetricPoint]) {}
    }

    fn test_session() -> DeviceSession {
        DeviceSession::new(
            AdbClient::new("127.0.0.1", 5037),
            "emulator-5554",
            AppConfig::default(),
        )
    }

    fn mock_link() -> Arc<Mutex<AgentLink>> {
        Arc::new(Mutex::new(AgentLink::new(
            Box::new(MockTransport::new()),
            Box::new(ScriptedShell::new()),
        )))
    }

    #[test]
    fn test_new_session_is_idle() {
        let session = test_session();
        assert_eq!(session.state(), PerfSessionState::Idle);
        assert_eq!(session.serial(), "emulator-5554");
        assert!(session.target().is_none());
    }

    #[test]
    fn test_end_perf_is_idempotent() {
        let mut session = test_session();
        session.link = Some(mock_link());
        session.scheduler = Some(
            PollingScheduler::start(
                mock_link(),
                Vec::new(),
                Arc::new(NullSink),
                Duration::from_millis(10),
            )
            .unwrap(),
        );
        session.state = PerfSessionState::Active;

        session.end_perf();
        assert_eq!(session.state(), PerfSessionState::Stopped);
        assert!(session.scheduler.is_none());
        assert!(session.link.is_none());

        // Second call observes the same state and does not error
        session.end_perf();
        assert_eq!(session.state(), PerfSessionState::Stopped);
        assert!(session.scheduler.is_none());
        assert!(session.link.is_none());
    }

    #[test]
    fn test_end_perf_releases_port_forward() {
        let mut session = DeviceSession::new(
            // Port 9: nothing listens there, so the killforward attempt
            // fails fast instead of leaking a forward silently
            AdbClient::new("127.0.0.1", 9),
            "emulator-5554",
            AppConfig::default(),
        );
        session.link = Some(mock_link());
        session.local_port = Some(40123);
        session.state = PerfSessionState::Ready;

        session.end_perf();
        assert!(session.local_port.is_none());
        assert_eq!(session.state(), PerfSessionState::Stopped);
    }

    #[test]
    fn test_end_perf_on_idle_session_is_a_no_op() {
        let mut session = test_session();
        session.end_perf();
        assert_eq!(session.state(), PerfSessionState::Idle);
    }

    #[test]
    fn test_start_perf_requires_ready_state() {
        let mut session = test_session();
        session.target = Some(TargetApp {
            package: "com.example.app".into(),
            uid: 10153,
            pid: 4242,
        });
        let err = session.start_perf(Arc::new(NullSink)).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn test_start_perf_requires_target() {
        let mut session = test_session();
        session.state = PerfSessionState::Ready;
        session.link = Some(mock_link());
        let err = session.start_perf(Arc::new(NullSink)).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn test_parse_user_id() {
        let output = "\
Package [com.example.app] (1234abcd):
    userId=10153
    pkg=Package{abc com.example.app}
";
        assert_eq!(parse_user_id(output), Some(10153));
    }

    #[test]
    fn test_parse_user_id_missing() {
        assert_eq!(parse_user_id("no such package"), None);
    }

    #[test]
    fn test_parse_pid() {
        assert_eq!(parse_pid("4242 4250\n"), Some(4242));
        assert_eq!(parse_pid(""), None);
    }
}
