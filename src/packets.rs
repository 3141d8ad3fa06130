//! Outgoing packet construction. Pure functions, no I/O.
//!
//! Every packet is framed as `VarInt(len(body)) || body`.

use crate::error::EncodingError;
use crate::varint;

/// Handshake protocol version the engine claims to speak.
pub const PROTOCOL_VERSION: u32 = 759;

const HANDSHAKE_ID: u8 = 0x00;
const STATUS_REQUEST_ID: u8 = 0x00;
const LOGIN_START_ID: u8 = 0x00;

/// State the server should switch to after the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextState {
    Status = 1,
    Login = 2,
}

fn frame(body: Vec<u8>) -> Result<Vec<u8>, EncodingError> {
    let mut out = varint::encode_len(body.len())?;
    out.extend_from_slice(&body);
    Ok(out)
}

fn write_string(buf: &mut Vec<u8>, s: &str) -> Result<(), EncodingError> {
    buf.extend_from_slice(&varint::encode_len(s.len())?);
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

pub fn handshake(
    protocol_version: u32,
    address: &str,
    port: u16,
    next_state: NextState,
) -> Result<Vec<u8>, EncodingError> {
    let mut body = vec![HANDSHAKE_ID];
    varint::write(&mut body, protocol_version);
    write_string(&mut body, address)?;
    body.extend_from_slice(&port.to_be_bytes());
    varint::write(&mut body, next_state as u32);
    frame(body)
}

pub fn status_request() -> Vec<u8> {
    vec![0x01, STATUS_REQUEST_ID]
}

pub fn login_start(username: &str) -> Result<Vec<u8>, EncodingError> {
    let mut body = vec![LOGIN_START_ID];
    write_string(&mut body, username)?;
    frame(body)
}
