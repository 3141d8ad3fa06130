//! Error types for the scanning engine.
//!
//! Transport failures (refused, timed out, reset) and geolocation failures are
//! not represented here: the probe turns the former into "no server" and
//! the orchestrator turns the latter into the default location.

use thiserror::Error;

/// A value could not be written as a protocol VarInt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("value {0} is negative and cannot be encoded as a varint")]
    Negative(i64),

    #[error("value {0} does not fit in 32 bits")]
    TooLarge(u64),
}

/// Malformed, oversized or unexpected data on the wire.
///
/// Always downgrades a single probe to absence.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("truncated stream")]
    TruncatedStream,

    #[error("varint too long")]
    VarIntTooLong,

    #[error("oversized packet: declared length {len} (limit {max})")]
    OversizedPacket { len: u32, max: u32 },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("unexpected packet id 0x{0:02x}")]
    UnexpectedPacketId(u8),

    #[error("payload out of range: declared {declared} bytes, {available} available")]
    PayloadOutOfRange { declared: usize, available: usize },

    #[error("payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Bad caller-supplied parameters: CIDR strings, ports, concurrency, timeouts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid CIDR '{input}': {reason}")]
    InvalidCidr { input: String, reason: String },

    #[error("only IPv4 ranges can be scanned, got '{0}'")]
    UnsupportedFamily(String),

    #[error("invalid port {0}: ports must be in 1..=65535")]
    InvalidPort(u32),

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("refusing to scan '{range}': {reason}")]
    UnsafeRange { range: String, reason: String },

    #[error("{count} targets requested, more than the limit of {max}")]
    TooManyTargets { count: u64, max: u64 },
}

/// Outcomes of `Scanner::scan` that are not a completed scan.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("a scan is already running on this scanner")]
    AlreadyRunning,

    #[error(transparent)]
    Config(#[from] ConfigError),
}
