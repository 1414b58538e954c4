//! Minimal-length data pushes
//!
//! A push is a length prefix followed by the payload bytes. The prefix is the
//! shortest one that can express the length:
//!
//! | length          | prefix                          |
//! |-----------------|---------------------------------|
//! | 0..=75          | 1 byte, the length itself       |
//! | 76..=255        | `0x4c` + 1 byte length          |
//! | 256..=65535     | `0x4d` + 2 byte LE length       |
//! | larger          | `0x4e` + 4 byte LE length       |

use crate::protocol::error::{ProtocolError, ProtocolResult};

pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;

const MAX_DIRECT_PUSH: usize = 75;

/// Number of prefix bytes used for a payload of `len` bytes
pub fn push_prefix_len(len: usize) -> usize {
    if len <= MAX_DIRECT_PUSH {
        1
    } else if len <= u8::MAX as usize {
        2
    } else if len <= u16::MAX as usize {
        3
    } else {
        5
    }
}

/// Total encoded size of a push carrying `len` payload bytes
pub fn encoded_push_len(len: usize) -> usize {
    push_prefix_len(len) + len
}

/// Encode `data` as a single push
pub fn encode_push(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_push_len(data.len()));
    write_push(&mut out, data);
    out
}

/// Append `data` as a single push to `out`
pub fn write_push(out: &mut Vec<u8>, data: &[u8]) {
    let len = data.len();
    if len <= MAX_DIRECT_PUSH {
        out.push(len as u8);
    } else if len <= u8::MAX as usize {
        out.push(OP_PUSHDATA1);
        out.push(len as u8);
    } else if len <= u16::MAX as usize {
        out.push(OP_PUSHDATA2);
        out.extend_from_slice(&(len as u16).to_le_bytes());
    } else {
        out.push(OP_PUSHDATA4);
        out.extend_from_slice(&(len as u32).to_le_bytes());
    }
    out.extend_from_slice(data);
}

/// Decode the push starting at `offset`.
///
/// Returns the payload and the offset immediately after it.
pub fn decode_push(buf: &[u8], offset: usize) -> ProtocolResult<(&[u8], usize)> {
    let opcode = *buf
        .get(offset)
        .ok_or_else(|| ProtocolError::malformed(offset, "missing push opcode"))?;

    let (len, header) = match opcode {
        0..=0x4b => (opcode as usize, 1),
        OP_PUSHDATA1 => (read_le(buf, offset + 1, 1)?, 2),
        OP_PUSHDATA2 => (read_le(buf, offset + 1, 2)?, 3),
        OP_PUSHDATA4 => (read_le(buf, offset + 1, 4)?, 5),
        other => {
            return Err(ProtocolError::malformed(
                offset,
                format!("opcode 0x{other:02x} is not a data push"),
            ))
        }
    };

    let start = offset + header;
    let end = start
        .checked_add(len)
        .ok_or_else(|| ProtocolError::malformed(offset, "push length overflows"))?;

    let payload = buf.get(start..end).ok_or_else(|| {
        ProtocolError::malformed(
            offset,
            format!(
                "declared {len} payload bytes, {} available",
                buf.len().saturating_sub(start)
            ),
        )
    })?;

    Ok((payload, end))
}

/// Decode successive pushes from the start of `buf`.
///
/// Stops at the end of the buffer or at the first push that fails to decode;
/// the pushes decoded up to that point are returned.
pub fn read_pushes(buf: &[u8]) -> Vec<&[u8]> {
    let mut pushes = Vec::new();
    let mut offset = 0;

    while offset < buf.len() {
        match decode_push(buf, offset) {
            Ok((payload, next)) => {
                pushes.push(payload);
                offset = next;
            }
            Err(e) => {
                tracing::debug!("Stopped reading pushes: {}", e);
                break;
            }
        }
    }

    pushes
}

fn read_le(buf: &[u8], at: usize, width: usize) -> ProtocolResult<usize> {
    let bytes = buf
        .get(at..at + width)
        .ok_or_else(|| ProtocolError::malformed(at, format!("truncated {width}-byte length")))?;

    Ok(bytes
        .iter()
        .rev()
        .fold(0usize, |acc, b| (acc << 8) | *b as usize))
}
