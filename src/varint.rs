//! Variable-length integer framing: 7-bit groups, least significant group
//! first, top bit set on every byte except the last.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{EncodingError, ProtocolError};

/// A u32 never needs more than five groups.
pub const MAX_VARINT_LEN: usize = 5;

/// Bits of the fifth byte that would land above bit 31 or continue.
const LAST_GROUP_OVERFLOW: u8 = 0xf0;

/// Append the encoding of `value` to `buf`.
pub fn write(buf: &mut Vec<u8>, mut value: u32) {
    while value >= 0x80 {
        buf.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

pub fn encode(value: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(encoded_len(value));
    write(&mut buf, value);
    buf
}

/// Encode a signed value, rejecting anything outside `0..=u32::MAX`.
pub fn encode_i64(value: i64) -> Result<Vec<u8>, EncodingError> {
    if value < 0 {
        return Err(EncodingError::Negative(value));
    }
    let v = u32::try_from(value).map_err(|_| EncodingError::TooLarge(value as u64))?;
    Ok(encode(v))
}

/// Encode a length (of a string or packet body).
pub fn encode_len(len: usize) -> Result<Vec<u8>, EncodingError> {
    let v = u32::try_from(len).map_err(|_| EncodingError::TooLarge(len as u64))?;
    Ok(encode(v))
}

/// Number of bytes `encode(value)` produces.
pub fn encoded_len(value: u32) -> usize {
    match value {
        0..=0x7f => 1,
        0x80..=0x3fff => 2,
        0x4000..=0x1f_ffff => 3,
        0x20_0000..=0x0fff_ffff => 4,
        _ => 5,
    }
}

/// Read one VarInt from an async stream, one byte at a time.
///
/// Suspends on I/O. End of stream before the terminating byte is
/// `TruncatedStream`; a fifth byte carrying bits beyond 32 is
/// `VarIntTooLong`, so a sixth byte is never read.
pub async fn decode_from_stream<R>(reader: &mut R) -> Result<u32, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut result: u32 = 0;
    for i in 0..MAX_VARINT_LEN {
        let byte = match reader.read_u8().await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(ProtocolError::TruncatedStream)
            }
            Err(e) => return Err(ProtocolError::Io(e)),
        };
        if i == MAX_VARINT_LEN - 1 && byte & LAST_GROUP_OVERFLOW != 0 {
            return Err(ProtocolError::VarIntTooLong);
        }
        result |= ((byte & 0x7f) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(result);
        }
    }
    Err(ProtocolError::VarIntTooLong)
}

/// Read one VarInt from `bytes` starting at `offset`.
///
/// Returns the value and the number of bytes consumed.
pub fn decode_from_buffer(bytes: &[u8], offset: usize) -> Result<(u32, usize), ProtocolError> {
    let mut result: u32 = 0;
    for i in 0..MAX_VARINT_LEN {
        let byte = *bytes
            .get(offset + i)
            .ok_or(ProtocolError::TruncatedStream)?;
        if i == MAX_VARINT_LEN - 1 && byte & LAST_GROUP_OVERFLOW != 0 {
            return Err(ProtocolError::VarIntTooLong);
        }
        result |= ((byte & 0x7f) as u32) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
    }
    Err(ProtocolError::VarIntTooLong)
}
