use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::ProtocolError;
use crate::varint;

/// Safety ceiling on a declared packet length.
pub const MAX_PACKET_LEN: u32 = 1024 * 1024;

const RESPONSE_ID: u8 = 0x00;

/// Read one length-prefixed packet and return its embedded text payload.
///
/// Only packet id `0x00` (status response / login disconnect) is accepted.
/// The declared length is checked against `max_len` before any payload byte
/// is buffered.
pub async fn read_packet<R>(conn: &mut R, max_len: u32) -> Result<String, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let len = varint::decode_from_stream(conn).await?;
    if len == 0 || len > max_len {
        return Err(ProtocolError::OversizedPacket { len, max: max_len });
    }

    let mut data = vec![0u8; len as usize];
    let mut filled = 0;
    while filled < data.len() {
        let n = conn.read(&mut data[filled..]).await?;
        if n == 0 {
            return Err(ProtocolError::ConnectionClosed);
        }
        filled += n;
    }

    let packet_id = data[0];
    if packet_id != RESPONSE_ID {
        return Err(ProtocolError::UnexpectedPacketId(packet_id));
    }

    let (text_len, used) = varint::decode_from_buffer(&data, 1)?;
    let start = 1 + used;
    let available = data.len() - start;
    let text_len = text_len as usize;
    if text_len > available {
        return Err(ProtocolError::PayloadOutOfRange {
            declared: text_len,
            available,
        });
    }

    let text = data[start..start + text_len].to_vec();
    Ok(String::from_utf8(text)?)
}
