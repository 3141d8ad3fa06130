use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use ::time::{format_description::well_known, OffsetDateTime};
use base64::prelude::*;
use serde::{Deserialize, Serialize};

/// One probe target.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    pub address: Ipv4Addr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(address: Ipv4Addr, port: u16) -> Self {
        Self { address, port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.address, self.port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Geolocation of a server address.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Location {
    pub country: String,
    pub city: String,
    pub lat: f64,
    pub lon: f64,
}

/// One discovered server, as seen by a single successful probe.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServerRecord {
    pub endpoint: Endpoint,
    pub display_name: String,
    pub description: String,
    pub version_name: String,
    pub protocol_number: i32,
    pub players_online: i64,
    pub players_max: i64,
    #[serde(default)]
    pub sampled_player_names: Vec<String>,
    pub round_trip_millis: u64,
    /// Base64 PNG, without any `data:` URI prefix.
    #[serde(default)]
    pub favicon: Option<String>,
    /// Best-effort whitelist heuristic; `false` also means "could not tell".
    #[serde(default)]
    pub access_restricted: bool,
    pub location: Location,
    /// RFC 3339 UTC.
    pub observed_at: String,
}

impl ServerRecord {
    /// Decode the favicon into raw PNG bytes.
    pub fn favicon_png(&self) -> Option<Vec<u8>> {
        let b64 = self.favicon.as_deref()?;
        BASE64_STANDARD.decode(b64.trim()).ok()
    }

    /// Human-readable release range for `protocol_number`, when known.
    pub fn release_label(&self) -> Option<&'static str> {
        release_for_protocol(self.protocol_number)
    }
}

impl fmt::Display for ServerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {} ({}/{})",
            self.endpoint, self.display_name, self.players_online, self.players_max
        )
    }
}

/// Counters of a scan in progress or just finished.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct ScanProgress {
    pub total: u64,
    pub scanned: u64,
    pub found: u64,
    pub percent: f64,
}

impl ScanProgress {
    pub fn new(total: u64, scanned: u64, found: u64) -> Self {
        let percent = if total == 0 {
            0.0
        } else {
            100.0 * scanned as f64 / total as f64
        };
        Self {
            total,
            scanned,
            found,
            percent,
        }
    }
}

/// What `Scanner::scan` returns once its workers have drained.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ScanSummary {
    pub total_targets: u64,
    pub scanned: u64,
    pub found: u64,
    pub cancelled: bool,
    /// Worker tasks that panicked or were aborted. Counted as scanned.
    pub worker_failures: u64,
    pub elapsed_ms: u64,
}

/// Strip `§x` formatting codes and collapse whitespace.
pub fn clean_motd(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '§' {
            chars.next();
            continue;
        }
        out.push(c);
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn release_for_protocol(protocol: i32) -> Option<&'static str> {
    let label = match protocol {
        4 => "1.7.2-1.7.5",
        5 => "1.7.6-1.7.10",
        47 => "1.8-1.8.9",
        107 => "1.9",
        108 => "1.9.1",
        109 => "1.9.2",
        110 => "1.9.4",
        210 => "1.10-1.10.2",
        315 => "1.11",
        316 => "1.11.2",
        335 => "1.12",
        338 => "1.12.1",
        340 => "1.12.2",
        393 => "1.13",
        401 => "1.13.1",
        404 => "1.13.2",
        477 => "1.14",
        480 => "1.14.1",
        485 => "1.14.2",
        490 => "1.14.3",
        498 => "1.14.4",
        573 => "1.15",
        575 => "1.15.1",
        578 => "1.15.2",
        735 => "1.16",
        736 => "1.16.1",
        751 => "1.16.2",
        753 => "1.16.3",
        754 => "1.16.4-1.16.5",
        755 => "1.17",
        756 => "1.17.1",
        757 => "1.18-1.18.1",
        758 => "1.18.2",
        759 => "1.19",
        760 => "1.19.1-1.19.2",
        761 => "1.19.3",
        762 => "1.19.4",
        763 => "1.20-1.20.1",
        _ => return None,
    };
    Some(label)
}

pub(crate) fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
