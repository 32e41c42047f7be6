//! Agent connection handling
//!
//! One [`AgentLink`] owns the TCP connection to the forwarded agent port
//! plus a remote-shell handle. Commands are synchronous request/response
//! exchanges; the link is never used from more than one caller at a time
//! (the scheduler serializes all polls on one thread). There is no retry
//! here: a broken link surfaces to the polling tick, which decides whether
//! to skip or escalate.

pub mod wire;

use crate::adb::RemoteShell;
use crate::error::{Error, Result};
use crate::transport::Transport;

/// Largest reply the agent sends for any verb
const MAX_REPLY_LEN: usize = 512;

/// Connection to one running agent instance
pub struct AgentLink {
    transport: Box<dyn Transport>,
    shell: Box<dyn RemoteShell>,
    connected: bool,
}

impl AgentLink {
    /// Wrap an established transport and shell handle
    pub fn new(transport: Box<dyn Transport>, shell: Box<dyn RemoteShell>) -> Self {
        Self {
            transport,
            shell,
            connected: true,
        }
    }

    /// Send one command and return the raw binary reply
    ///
    /// Blocks the calling poll step until the reply arrives or the read
    /// timeout fires. A link-class failure marks the connection dead.
    pub fn send_command(&mut self, command: &str) -> Result<Vec<u8>> {
        if !self.connected {
            return Err(Error::Link("link is closed".into()));
        }
        let result = self.exchange(command);
        // A closed or reset socket is fatal; a timeout is not, so a single
        // slow tick does not force a reconnect.
        if let Err(ref e) = result
            && matches!(e, Error::Link(_) | Error::Io(_))
        {
            log::debug!("Agent link lost on {:?}: {}", command, e);
            self.connected = false;
        }
        result
    }

    fn exchange(&mut self, command: &str) -> Result<Vec<u8>> {
        let request = wire::encode_command(command, &[]);
        self.transport.write(&request)?;
        self.transport.flush()?;

        let mut buf = [0u8; MAX_REPLY_LEN];
        let n = self.transport.read(&mut buf)?;
        log::trace!("Agent: {:?} -> {} reply bytes", command, n);
        Ok(buf[..n].to_vec())
    }

    /// Run a shell command on the device
    ///
    /// Goes through a separate ADB connection, never the agent socket, so
    /// it cannot interleave with command replies.
    pub fn exec_shell(&self, command: &str) -> Result<String> {
        self.shell.exec(command)
    }

    /// Verify the agent answers at all
    pub fn handshake(&mut self) -> Result<()> {
        let reply = self.send_command("ping")?;
        if reply.is_empty() {
            return Err(Error::Link("empty handshake reply".into()));
        }
        Ok(())
    }

    /// Whether the link has seen no fatal failure yet
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Mark the link closed; the underlying socket drops with the link
    pub fn close(&mut self) {
        self.connected = false;
    }
}
