//! Transport layer for I/O abstraction
//!
//! The agent link talks through this seam so the polling services can be
//! exercised against a scripted transport without a device attached.

use crate::error::Result;

mod tcp;
pub use tcp::TcpTransport;

mod mock;
pub use mock::MockTransport;

/// Transport trait for agent communication
pub trait Transport: Send {
    /// Read data into buffer, returns number of bytes read
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Write data from buffer, returns number of bytes written
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Flush any pending writes (blocking until complete)
    fn flush(&mut self) -> Result<()>;
}
