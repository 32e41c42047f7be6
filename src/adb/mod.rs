//! ADB server client
//!
//! Talks to the local ADB server over its smart-socket protocol. Every
//! operation opens its own short-lived TCP connection, so device discovery
//! and shell commands never contend with the agent socket owned by the
//! polling loop.

use crate::error::{Error, Result};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

mod host;
mod sync;

/// Connect timeout for ADB server connections
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Read timeout for ADB server replies; shell commands stream until EOF and
/// treat a timeout as end-of-data
const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// File mode for the pushed agent binary (rwxr-xr-x)
const AGENT_FILE_MODE: u32 = 0o755;

/// One attached device as reported by `host:devices`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device serial id
    pub serial: String,
    /// Transport state (`device`, `offline`, `unauthorized`, ...)
    pub state: String,
}

impl DeviceInfo {
    /// Whether the transport is usable
    pub fn is_usable(&self) -> bool {
        self.state == "device"
    }
}

/// Client for the ADB server
#[derive(Debug, Clone)]
pub struct AdbClient {
    host: String,
    port: u16,
}

impl AdbClient {
    /// Create a client for the given server endpoint
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }

    fn connect(&self) -> Result<TcpStream> {
        let addr = self.resolve()?;
        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
        stream.set_read_timeout(Some(IO_TIMEOUT))?;
        stream.set_write_timeout(Some(IO_TIMEOUT))?;
        Ok(stream)
    }

    fn resolve(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::Adb(format!("cannot resolve {}:{}", self.host, self.port)))
    }

    /// Select a device transport on an open connection
    fn select_transport(&self, stream: &mut TcpStream, serial: &str) -> Result<()> {
        host::write_request(stream, &format!("host:transport:{}", serial))?;
        host::read_status(stream)
    }

    /// List attached devices
    pub fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let mut stream = self.connect()?;
        host::write_request(&mut stream, "host:devices")?;
        host::read_status(&mut stream)?;
        let payload = host::read_hex_payload(&mut stream)?;
        Ok(parse_device_list(&payload))
    }

    /// Forward a free local port to `remote_port` on the device
    ///
    /// Uses `tcp:0` so the server picks the local port.
    pub fn forward_port(&self, serial: &str, remote_port: u16) -> Result<u16> {
        let mut stream = self.connect()?;
        host::write_request(
            &mut stream,
            &format!("host-serial:{}:forward:tcp:0;tcp:{}", serial, remote_port),
        )?;
        read_forward_reply(&mut stream)
    }

    /// Remove a previously established forward
    pub fn remove_forward(&self, serial: &str, local_port: u16) -> Result<()> {
        let mut stream = self.connect()?;
        host::write_request(
            &mut stream,
            &format!("host-serial:{}:killforward:tcp:{}", serial, local_port),
        )?;
        // Receipt and completion are acknowledged separately
        host::read_status(&mut stream)?;
        host::read_status(&mut stream)
    }

    /// Run a shell command on the device and return its output
    ///
    /// stderr is suppressed so failures surface as empty text rather than
    /// noise mixed into counter tables.
    pub fn exec_shell(&self, serial: &str, command: &str) -> Result<String> {
        let mut stream = self.connect()?;
        self.select_transport(&mut stream, serial)?;
        host::write_request(&mut stream, &format!("shell:( {} ) 2>/dev/null", command))?;
        host::read_status(&mut stream)?;
        host::read_to_end(&mut stream)
    }

    /// Push the agent binary to the device
    pub fn push(&self, serial: &str, data: &[u8], remote_path: &str) -> Result<()> {
        let mut stream = self.connect()?;
        self.select_transport(&mut stream, serial)?;
        host::write_request(&mut stream, "sync:")?;
        host::read_status(&mut stream)?;
        sync::push(&mut stream, remote_path, AGENT_FILE_MODE, data, 0)?;
        // Best-effort sync termination; the connection is dropped either way
        let _ = stream.write_all(b"QUIT\x00\x00\x00\x00");
        Ok(())
    }
}

/// Parse the reply to a `forward:tcp:0` request
///
/// The server sends two `OKAY` words, one acknowledging the request and one
/// its completion; the allocated local port follows the second as a
/// hex-length-prefixed decimal string.
fn read_forward_reply<R: Read>(stream: &mut R) -> Result<u16> {
    host::read_status(stream)?;
    host::read_status(stream)?;
    let payload = host::read_hex_payload(stream)?;
    payload
        .trim()
        .parse::<u16>()
        .map_err(|_| Error::Adb(format!("bad forward reply {:?}", payload)))
}

fn parse_device_list(payload: &str) -> Vec<DeviceInfo> {
    payload
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?;
            let state = parts.next()?;
            Some(DeviceInfo {
                serial: serial.to_string(),
                state: state.to_string(),
            })
        })
        .collect()
}

/// Remote shell execution seam
///
/// The polling services go through this trait so they can be tested with
/// scripted output instead of a live ADB server.
pub trait RemoteShell: Send {
    /// Run a command, returning its stdout
    fn exec(&self, command: &str) -> Result<String>;
}

/// [`RemoteShell`] backed by the ADB server
pub struct AdbShell {
    client: AdbClient,
    serial: String,
}

impl AdbShell {
    /// Create a shell handle bound to one device
    pub fn new(client: AdbClient, serial: &str) -> Self {
        Self {
            client,
            serial: serial.to_string(),
        }
    }
}

impl RemoteShell for AdbShell {
    fn exec(&self, command: &str) -> Result<String> {
        self.client
            .exec_shell(&self.serial, command)
            .map_err(|e| Error::Shell(e.to_string()))
    }
}

/// Scripted [`RemoteShell`] for tests: replies are consumed in order
pub struct ScriptedShell {
    replies: std::sync::Mutex<std::collections::VecDeque<std::result::Result<String, String>>>,
}

impl ScriptedShell {
    /// Create an empty script; an exhausted script reads as a shell error
    pub fn new() -> Self {
        Self {
            replies: std::sync::Mutex::new(std::collections::VecDeque::new()),
        }
    }

    /// Queue a successful reply
    pub fn push_ok(&self, output: &str) {
        let mut replies = self.replies.lock().unwrap_or_else(|e| e.into_inner());
        replies.push_back(Ok(output.to_string()));
    }

    /// Queue a failure
    pub fn push_err(&self, message: &str) {
        let mut replies = self.replies.lock().unwrap_or_else(|e| e.into_inner());
        replies.push_back(Err(message.to_string()));
    }
}

impl Default for ScriptedShell {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteShell for ScriptedShell {
    fn exec(&self, _command: &str) -> Result<String> {
        let mut replies = self.replies.lock().unwrap_or_else(|e| e.into_inner());
        match replies.pop_front() {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(Error::Shell(message)),
            None => Err(Error::Shell("no scripted reply".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_list() {
        let payload = "emulator-5554\tdevice\nR58M1234ABC\tunauthorized\n";
        let devices = parse_device_list(payload);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].serial, "emulator-5554");
        assert!(devices[0].is_usable());
        assert_eq!(devices[1].state, "unauthorized");
        assert!(!devices[1].is_usable());
    }

    #[test]
    fn test_parse_device_list_empty() {
        assert!(parse_device_list("").is_empty());
    }

    #[test]
    fn test_read_forward_reply_double_okay() {
        let mut stream = std::io::Cursor::new(b"OKAYOKAY000512345".to_vec());
        assert_eq!(read_forward_reply(&mut stream).unwrap(), 12345);
    }

    #[test]
    fn test_read_forward_reply_fail_after_receipt() {
        let mut stream = std::io::Cursor::new(b"OKAYFAIL000dcannot rebind".to_vec());
        match read_forward_reply(&mut stream).unwrap_err() {
            Error::Adb(msg) => assert_eq!(msg, "cannot rebind"),
            other => panic!("expected Adb error, got {:?}", other),
        }
    }

    #[test]
    fn test_scripted_shell_order_and_exhaustion() {
        let shell = ScriptedShell::new();
        shell.push_ok("first");
        shell.push_err("boom");

        assert_eq!(shell.exec("a").unwrap(), "first");
        assert!(matches!(shell.exec("b"), Err(Error::Shell(_))));
        assert!(matches!(shell.exec("c"), Err(Error::Shell(_))));
    }
}
