//! Mock transport for testing

use super::Transport;
use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Mock transport for unit testing
///
/// Replies are scripted as discrete frames: each `read` returns at most one
/// injected frame, matching the one-reply-per-command exchange on the agent
/// socket. An empty reply queue reads as a timeout; a downed link fails both
/// directions.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

struct MockTransportInner {
    replies: VecDeque<Vec<u8>>,
    written: Vec<u8>,
    link_down: bool,
}

impl MockTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        MockTransport {
            inner: Arc::new(Mutex::new(MockTransportInner {
                replies: VecDeque::new(),
                written: Vec::new(),
                link_down: false,
            })),
        }
    }

    /// Queue one reply frame for a future read
    pub fn inject_reply(&self, data: &[u8]) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.replies.push_back(data.to_vec());
    }

    /// Simulate the remote end closing the connection
    pub fn set_link_down(&self, down: bool) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.link_down = down;
    }

    /// Get all written data
    pub fn get_written(&self) -> Vec<u8> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.written.clone()
    }

    /// Clear written data
    pub fn clear_written(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.written.clear();
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.link_down {
            return Err(Error::Link("connection closed by agent".into()));
        }
        match inner.replies.pop_front() {
            Some(frame) => {
                let n = frame.len().min(buffer.len());
                buffer[..n].copy_from_slice(&frame[..n]);
                Ok(n)
            }
            None => Err(Error::Timeout),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.link_down {
            return Err(Error::Link("connection reset by agent".into()));
        }
        inner.written.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}
