use std::io::{ErrorKind, Read, Write};

use mailindex_core::config::framing::MAX_FRAME_BYTES;
use serde::Serialize;

use crate::{ProtocolError, ProtocolResult, RpcResponse};

/// Reads one frame payload. Returns `Ok(None)` on a clean end of stream.
pub fn read_frame<R: Read + ?Sized>(reader: &mut R) -> ProtocolResult<Option<Vec<u8>>> {
    let mut prefix = [0_u8; 4];
    let filled = read_full(reader, &mut prefix)?;
    if filled == 0 {
        return Ok(None);
    }
    if filled < prefix.len() {
        return Err(ProtocolError::TruncatedFrame {
            expected: prefix.len(),
            actual: filled,
        });
    }

    let len = u32::from_ne_bytes(prefix);
    if len > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge {
            len: u64::from(len),
            max: MAX_FRAME_BYTES,
        });
    }

    let mut payload = vec![0_u8; len as usize];
    let filled = read_full(reader, &mut payload)?;
    if filled < payload.len() {
        return Err(ProtocolError::TruncatedFrame {
            expected: payload.len(),
            actual: filled,
        });
    }
    Ok(Some(payload))
}

/// Serializes `value`, writes it with its length prefix and flushes.
pub fn write_frame<W: Write + ?Sized, T: Serialize>(writer: &mut W, value: &T) -> ProtocolResult<()> {
    write_frame_within(writer, value, MAX_FRAME_BYTES)
}

/// [`write_frame`] with an explicit payload limit. Nothing is written when the
/// value cannot be encoded within `max_bytes`.
pub fn write_frame_within<W: Write + ?Sized, T: Serialize>(
    writer: &mut W,
    value: &T,
    max_bytes: u32,
) -> ProtocolResult<()> {
    let payload = serde_json::to_vec(value)?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= max_bytes)
        .ok_or(ProtocolError::FrameTooLarge {
            len: payload.len() as u64,
            max: max_bytes,
        })?;
    writer.write_all(&len.to_ne_bytes())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

pub fn write_response<W: Write + ?Sized>(writer: &mut W, response: &RpcResponse) -> ProtocolResult<()> {
    write_frame(writer, response)
}

fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> ProtocolResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(error) if error.kind() == ErrorKind::Interrupted => continue,
            Err(error) => return Err(error.into()),
        }
    }
    Ok(filled)
}
