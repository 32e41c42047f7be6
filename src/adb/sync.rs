//! Minimal ADB sync protocol (push only)
//!
//! Chunk format: 4-byte ASCII id + little-endian u32 length/argument.
//! A push is `SEND <path>,<mode>` followed by `DATA` chunks and a `DONE`
//! carrying the file mtime; the device answers with `OKAY` or `FAIL`.

use crate::error::{Error, Result};
use std::io::{Read, Write};

/// Maximum payload per DATA chunk
const SYNC_DATA_MAX: usize = 64 * 1024;

fn write_chunk<W: Write>(stream: &mut W, id: &[u8; 4], arg: u32) -> Result<()> {
    stream.write_all(id)?;
    stream.write_all(&arg.to_le_bytes())?;
    Ok(())
}

/// Push a file's bytes to `remote_path` over an established sync connection
pub fn push<S: Read + Write>(
    stream: &mut S,
    remote_path: &str,
    mode: u32,
    data: &[u8],
    mtime: u32,
) -> Result<()> {
    let spec = format!("{},{}", remote_path, mode);
    write_chunk(stream, b"SEND", spec.len() as u32)?;
    stream.write_all(spec.as_bytes())?;

    for chunk in data.chunks(SYNC_DATA_MAX) {
        write_chunk(stream, b"DATA", chunk.len() as u32)?;
        stream.write_all(chunk)?;
    }

    write_chunk(stream, b"DONE", mtime)?;
    stream.flush()?;

    // Device replies OKAY (arg 0) or FAIL (arg = message length)
    let mut id = [0u8; 4];
    stream.read_exact(&mut id)?;
    let mut arg = [0u8; 4];
    stream.read_exact(&mut arg)?;
    let arg = u32::from_le_bytes(arg);

    match &id {
        b"OKAY" => Ok(()),
        b"FAIL" => {
            let mut message = vec![0u8; arg as usize];
            stream.read_exact(&mut message)?;
            Err(Error::Adb(String::from_utf8_lossy(&message).into_owned()))
        }
        other => Err(Error::Adb(format!(
            "unexpected sync reply {:?}",
            String::from_utf8_lossy(other)
        ))),
    }
}
