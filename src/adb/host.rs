//! ADB server smart-socket framing
//!
//! Request format: 4 ASCII hex digits encoding the payload length, then the
//! payload itself. The server answers with a 4-byte status (`OKAY`/`FAIL`);
//! a `FAIL` is followed by a hex-length-prefixed error message, and services
//! that return data use the same hex-length prefix for their payload.

use crate::error::{Error, Result};
use std::io::{Read, Write};

/// Write one length-prefixed request
pub fn write_request<W: Write>(stream: &mut W, request: &str) -> Result<()> {
    let payload = request.as_bytes();
    let prefix = format!("{:04x}", payload.len());
    stream.write_all(prefix.as_bytes())?;
    stream.write_all(payload)?;
    stream.flush()?;
    Ok(())
}

/// Read the 4-byte status word, turning a `FAIL` into an [`Error::Adb`]
/// carrying the server's message.
pub fn read_status<R: Read>(stream: &mut R) -> Result<()> {
    let mut status = [0u8; 4];
    stream.read_exact(&mut status)?;
    match &status {
        b"OKAY" => Ok(()),
        b"FAIL" => {
            let message = read_hex_payload(stream)
                .unwrap_or_else(|_| "unknown failure".to_string());
            Err(Error::Adb(message))
        }
        other => Err(Error::Adb(format!(
            "unexpected status {:?}",
            String::from_utf8_lossy(other)
        ))),
    }
}

/// Read one hex-length-prefixed payload as text
pub fn read_hex_payload<R: Read>(stream: &mut R) -> Result<String> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf)?;
    let len_str = std::str::from_utf8(&len_buf)
        .map_err(|_| Error::Adb("non-ASCII length prefix".into()))?;
    let len = usize::from_str_radix(len_str, 16)
        .map_err(|_| Error::Adb(format!("bad length prefix {:?}", len_str)))?;

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload)?;
    Ok(String::from_utf8_lossy(&payload).into_owned())
}

/// Read until EOF, tolerating a read timeout as end-of-data
///
/// Shell services stream their output and close the connection when the
/// command exits; a timeout mid-stream yields whatever arrived so far.
pub fn read_to_end<R: Read>(stream: &mut R) -> Result<String> {
    let mut output = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => output.extend_from_slice(&buf[..n]),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                break
            }
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(String::from_utf8_lossy(&output).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_write_request_framing() {
        let mut out = Vec::new();
        write_request(&mut out, "host:devices").unwrap();
        assert_eq!(&out, b"000chost:devices");
    }

    #[test]
    fn test_read_status_okay() {
        let mut stream = Cursor::new(b"OKAY".to_vec());
        assert!(read_status(&mut stream).is_ok());
    }

    #[test]
    fn test_read_status_fail_carries_message() {
        let mut stream = Cursor::new(b"FAIL0013device unauthorized".to_vec());
        let err = read_status(&mut stream).unwrap_err();
        match err {
            Error::Adb(msg) => assert_eq!(msg, "device unauthorized"),
            other => panic!("expected Adb error, got {:?}", other),
        }
    }

    #[test]
    fn test_read_hex_payload() {
        let mut stream = Cursor::new(b"0010emulator-5554\tde".to_vec());
        let payload = read_hex_payload(&mut stream).unwrap();
        assert_eq!(payload, "emulator-5554\tde");
    }

    #[test]
    fn test_read_hex_payload_bad_prefix() {
        let mut stream = Cursor::new(b"zzzz".to_vec());
        assert!(read_hex_payload(&mut stream).is_err());
    }
}
