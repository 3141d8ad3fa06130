//! Single-endpoint probe: status query plus the best-effort access check.
//!
//! A probe moves through `Connecting → Handshaking → AwaitingStatus →
//! ParsingStatus → AccessCheck`. Any failure before the record is built
//! aborts the probe; callers of [`Prober::probe`] only ever see "no server".

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{self, Instant};
use tracing::{debug, trace};

use crate::config::ProbeConfig;
use crate::error::{ConfigError, EncodingError, ProtocolError};
use crate::geo::LocationDefaults;
use crate::packets::{self, NextState};
use crate::reader::read_packet;
use crate::types::{clean_motd, now_rfc3339, Endpoint, ServerRecord};

const FAVICON_PREFIX: &str = "data:image/png;base64,";

/// Case-insensitive substrings in a login disconnect message that suggest
/// unknown accounts are turned away.
const RESTRICTION_MARKERS: &[&str] = &["whitelist", "white-list", "allowlist"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStage {
    Connecting,
    Handshaking,
    AwaitingStatus,
    ParsingStatus,
    AccessCheck,
}

impl fmt::Display for ProbeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProbeStage::Connecting => "connecting",
            ProbeStage::Handshaking => "handshaking",
            ProbeStage::AwaitingStatus => "awaiting status",
            ProbeStage::ParsingStatus => "parsing status",
            ProbeStage::AccessCheck => "access check",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum ProbeErrorKind {
    #[error("timed out")]
    TimedOut,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error("malformed status: {0}")]
    MalformedStatus(#[from] serde_json::Error),
}

/// Why a probe ended without a record, and where.
#[derive(Debug, Error)]
#[error("{stage} failed: {kind}")]
pub struct ProbeError {
    pub stage: ProbeStage,
    #[source]
    pub kind: ProbeErrorKind,
}

impl ProbeError {
    fn at(stage: ProbeStage) -> impl FnOnce(ProbeErrorKind) -> ProbeError {
        move |kind| ProbeError { stage, kind }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, ProbeErrorKind::TimedOut)
    }
}

/// The recognized fields of a status reply, with lenient defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusResponse {
    pub description: String,
    pub version_name: String,
    pub protocol: i32,
    pub players_online: i64,
    pub players_max: i64,
    pub sample: Vec<String>,
    pub favicon: Option<String>,
}

/// Outcome of the access heuristic, with the text it was based on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessVerdict {
    pub restricted: bool,
    pub evidence: Option<String>,
}

/// Runs probes against single endpoints with fixed settings.
#[derive(Debug, Clone)]
pub struct Prober {
    config: ProbeConfig,
    timeout: Duration,
    location_defaults: LocationDefaults,
}

impl Prober {
    pub fn new(config: ProbeConfig, timeout: Duration) -> Self {
        Self {
            config,
            timeout,
            location_defaults: LocationDefaults::default(),
        }
    }

    pub fn with_location_defaults(mut self, defaults: LocationDefaults) -> Self {
        self.location_defaults = defaults;
        self
    }

    /// Probe one endpoint. `Ok(None)` covers every transport or protocol
    /// failure; only a nonsensical endpoint is an error.
    pub async fn probe(&self, endpoint: Endpoint) -> Result<Option<ServerRecord>, ConfigError> {
        if endpoint.port == 0 {
            return Err(ConfigError::InvalidPort(0));
        }

        let attempt = self.try_probe(endpoint);
        let outcome = match self.config.probe_deadline {
            Some(deadline) => match time::timeout(deadline, attempt).await {
                Ok(res) => res,
                Err(_) => {
                    debug!(%endpoint, ?deadline, "probe exceeded its deadline");
                    return Ok(None);
                }
            },
            None => attempt.await,
        };

        match outcome {
            Ok(record) => Ok(Some(record)),
            Err(e) if e.stage == ProbeStage::Connecting => {
                trace!(%endpoint, error = %e, "no listener");
                Ok(None)
            }
            Err(e) => {
                debug!(%endpoint, error = %e, "probe aborted");
                Ok(None)
            }
        }
    }

    /// Run the status query and, if enabled, the access check, reporting the
    /// stage at which anything went wrong.
    pub async fn try_probe(&self, endpoint: Endpoint) -> Result<ServerRecord, ProbeError> {
        let address = endpoint.address.to_string();

        let mut stream = step(
            ProbeStage::Connecting,
            self.timeout,
            TcpStream::connect(endpoint.socket_addr()),
        )
        .await?;

        let handshake = packets::handshake(
            self.config.protocol_version,
            &address,
            endpoint.port,
            NextState::Status,
        )
        .map_err(|e| ProbeError::at(ProbeStage::Handshaking)(e.into()))?;
        step(
            ProbeStage::Handshaking,
            self.timeout,
            stream.write_all(&handshake),
        )
        .await?;

        let started = Instant::now();
        step(
            ProbeStage::AwaitingStatus,
            self.timeout,
            stream.write_all(&packets::status_request()),
        )
        .await?;

        let text = step(
            ProbeStage::ParsingStatus,
            self.timeout,
            read_packet(&mut stream, self.config.max_packet_len),
        )
        .await?;
        let round_trip_millis = started.elapsed().as_millis() as u64;
        drop(stream);

        let status = parse_status(&text)
            .map_err(|e| ProbeError::at(ProbeStage::ParsingStatus)(e.into()))?;

        let access = if self.config.check_access {
            self.check_access(endpoint).await
        } else {
            AccessVerdict::default()
        };

        Ok(ServerRecord {
            endpoint,
            display_name: clean_motd(&status.description),
            description: status.description,
            version_name: status.version_name,
            protocol_number: status.protocol,
            players_online: status.players_online,
            players_max: status.players_max,
            sampled_player_names: status.sample,
            round_trip_millis,
            favicon: status.favicon,
            access_restricted: access.restricted,
            location: self.location_defaults.to_location(),
            observed_at: now_rfc3339(),
        })
    }

    /// Attempt a login with the probe username on a fresh connection and
    /// apply [`assess_access`] to whatever comes back.
    ///
    /// Any failure yields "not restricted". This under-reports: a server
    /// that times out, requires authentication, or words its rejection
    /// differently is reported as open.
    pub async fn check_access(&self, endpoint: Endpoint) -> AccessVerdict {
        match self.login_reply(endpoint).await {
            Ok(text) => assess_access(&text),
            Err(e) => {
                trace!(%endpoint, error = %e, "access check inconclusive");
                AccessVerdict::default()
            }
        }
    }

    async fn login_reply(&self, endpoint: Endpoint) -> Result<String, ProbeError> {
        let stage = ProbeStage::AccessCheck;
        let limit = self.config.access_timeout;
        let address = endpoint.address.to_string();

        let mut stream = step(stage, limit, TcpStream::connect(endpoint.socket_addr())).await?;

        let mut hello = packets::handshake(
            self.config.protocol_version,
            &address,
            endpoint.port,
            NextState::Login,
        )
        .map_err(|e| ProbeError::at(stage)(e.into()))?;
        let login = packets::login_start(&self.config.probe_username)
            .map_err(|e| ProbeError::at(stage)(e.into()))?;
        hello.extend_from_slice(&login);
        step(stage, limit, stream.write_all(&hello)).await?;

        step(stage, limit, read_packet(&mut stream, self.config.max_packet_len)).await
    }
}

/// Await `fut` under `limit`, tagging any failure with `stage`.
async fn step<T, E, F>(stage: ProbeStage, limit: Duration, fut: F) -> Result<T, ProbeError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<ProbeErrorKind>,
{
    match time::timeout(limit, fut).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(ProbeError {
            stage,
            kind: e.into(),
        }),
        Err(_) => Err(ProbeError {
            stage,
            kind: ProbeErrorKind::TimedOut,
        }),
    }
}

/// Heuristic whitelist detection on a login reply.
///
/// Not a protocol signal: it only recognizes rejection messages that
/// mention a whitelist, so `restricted == false` means "no evidence".
pub fn assess_access(text: &str) -> AccessVerdict {
    let lower = text.to_lowercase();
    let restricted = RESTRICTION_MARKERS.iter().any(|m| lower.contains(m));
    AccessVerdict {
        restricted,
        evidence: Some(text.to_string()),
    }
}

/// Parse a status reply. Only text that is not a JSON object is rejected;
/// missing or mistyped fields fall back to empty/zero.
pub fn parse_status(text: &str) -> Result<StatusResponse, serde_json::Error> {
    let root: Value = serde_json::from_str(text)?;
    if !root.is_object() {
        return Err(serde::de::Error::custom("status reply is not a JSON object"));
    }

    let version = &root["version"];
    let players = &root["players"];

    let sample: Vec<String> = players["sample"]
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .filter(|p| p.is_object())
                .map(|p| p["name"].as_str().unwrap_or_default().to_string())
                .collect()
        })
        .unwrap_or_default();

    let favicon = root["favicon"]
        .as_str()
        .map(|f| f.strip_prefix(FAVICON_PREFIX).unwrap_or(f).to_string())
        .filter(|f| !f.is_empty());

    Ok(StatusResponse {
        description: description_text(&root["description"]),
        version_name: version["name"].as_str().unwrap_or_default().to_string(),
        protocol: version["protocol"]
            .as_i64()
            .and_then(|p| i32::try_from(p).ok())
            .unwrap_or(0),
        players_online: players["online"].as_i64().unwrap_or(0),
        players_max: players["max"].as_i64().unwrap_or(0),
        sample,
        favicon,
    })
}

/// Flatten a description that is either a plain string or a chat component
/// (`{"text": .., "extra": [..]}`) into plain text.
fn description_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Object(obj) => {
            let mut out = obj
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if let Some(extra) = obj.get("extra").and_then(Value::as_array) {
                for part in extra {
                    out.push_str(&description_text(part));
                }
            }
            out
        }
        Value::Array(parts) => parts.iter().map(description_text).collect(),
        _ => String::new(),
    }
}
