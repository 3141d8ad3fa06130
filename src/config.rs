use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::geo::LocationDefaults;
use crate::packets::PROTOCOL_VERSION;
use crate::ports::default_ports;
use crate::reader::MAX_PACKET_LEN;

/// Upper bound on the worker pool, mirroring the connect-scan clamp.
pub const MAX_CONCURRENCY: usize = 5_000;

/// Username sent in the login probe.
pub const PROBE_USERNAME: &str = "TestUser";

/// Per-probe settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ProbeConfig {
    pub protocol_version: u32,
    pub max_packet_len: u32,
    /// Run the login-state whitelist probe after a successful status query.
    pub check_access: bool,
    pub probe_username: String,
    #[serde(with = "millis")]
    pub access_timeout: Duration,
    /// Hard cap on one probe's wall-clock time, on top of per-operation timeouts.
    #[serde(with = "opt_millis")]
    pub probe_deadline: Option<Duration>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            max_packet_len: MAX_PACKET_LEN,
            check_access: true,
            probe_username: PROBE_USERNAME.to_string(),
            access_timeout: Duration::from_secs(2),
            probe_deadline: None,
        }
    }
}

/// Settings for one scan invocation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ScanConfig {
    pub ports: Vec<u16>,
    pub concurrency: usize,
    #[serde(with = "millis")]
    pub timeout: Duration,
    pub probe: ProbeConfig,
    pub location_defaults: LocationDefaults,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            ports: default_ports(),
            concurrency: 100,
            timeout: Duration::from_secs(3),
            probe: ProbeConfig::default(),
            location_defaults: LocationDefaults::default(),
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_concurrency(self.concurrency)?;
        validate_timeout(self.timeout)?;
        if self.ports.is_empty() {
            return Err(ConfigError::InvalidParameter {
                name: "ports",
                reason: "at least one port is required".into(),
            });
        }
        if let Some(p) = self.ports.iter().find(|p| **p == 0) {
            return Err(ConfigError::InvalidPort(*p as u32));
        }
        if self.probe.max_packet_len == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "max_packet_len",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }
}

pub fn validate_concurrency(concurrency: usize) -> Result<(), ConfigError> {
    if concurrency == 0 || concurrency > MAX_CONCURRENCY {
        return Err(ConfigError::InvalidParameter {
            name: "concurrency",
            reason: format!("must be in 1..={MAX_CONCURRENCY}, got {concurrency}"),
        });
    }
    Ok(())
}

pub fn validate_timeout(timeout: Duration) -> Result<(), ConfigError> {
    if timeout.is_zero() {
        return Err(ConfigError::InvalidParameter {
            name: "timeout",
            reason: "must be positive".into(),
        });
    }
    Ok(())
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
