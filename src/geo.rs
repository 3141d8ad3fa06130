//! Geolocation enrichment.
//!
//! The lookup service is an external collaborator: it may be slow, down, or
//! rate limited. `enrich` never fails; it falls back to `LocationDefaults`.

use std::net::Ipv4Addr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time;
use tracing::debug;

use crate::types::Location;

pub const DEFAULT_LOOKUP_URL: &str = "http://ip-api.com/json";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Upper bound on any single lookup made through `enrich`, whatever the
/// `Locator` does internally.
pub const LOOKUP_DEADLINE: Duration = Duration::from_secs(5);

/// Location used whenever a lookup fails or is not performed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LocationDefaults {
    pub country: String,
    pub city: String,
    pub lat: f64,
    pub lon: f64,
}

impl Default for LocationDefaults {
    fn default() -> Self {
        Self {
            country: "Unknown".to_string(),
            city: "Unknown".to_string(),
            lat: 0.0,
            lon: 0.0,
        }
    }
}

impl LocationDefaults {
    pub fn to_location(&self) -> Location {
        Location {
            country: self.country.clone(),
            city: self.city.clone(),
            lat: self.lat,
            lon: self.lon,
        }
    }
}

#[async_trait]
pub trait Locator: Send + Sync {
    async fn lookup(&self, ip: Ipv4Addr) -> Result<Location>;
}

/// Look `ip` up, substituting `defaults` on any failure or after
/// [`LOOKUP_DEADLINE`].
pub async fn enrich(locator: &dyn Locator, ip: Ipv4Addr, defaults: &LocationDefaults) -> Location {
    enrich_within(locator, ip, defaults, LOOKUP_DEADLINE).await
}

/// [`enrich`] with an explicit bound on the lookup.
pub async fn enrich_within(
    locator: &dyn Locator,
    ip: Ipv4Addr,
    defaults: &LocationDefaults,
    limit: Duration,
) -> Location {
    match time::timeout(limit, locator.lookup(ip)).await {
        Ok(Ok(loc)) => loc,
        Ok(Err(e)) => {
            debug!(%ip, error = %e, "geolocation lookup failed, using defaults");
            defaults.to_location()
        }
        Err(_) => {
            debug!(%ip, ?limit, "geolocation lookup timed out, using defaults");
            defaults.to_location()
        }
    }
}

/// Never looks anything up; every lookup fails so `enrich` yields defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLocator;

#[async_trait]
impl Locator for NoopLocator {
    async fn lookup(&self, _ip: Ipv4Addr) -> Result<Location> {
        bail!("geolocation disabled")
    }
}

/// Client for ip-api style JSON endpoints (`GET {base}/{ip}`).
#[derive(Debug, Clone)]
pub struct IpApiLocator {
    base_url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
}

impl IpApiLocator {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl Locator for IpApiLocator {
    async fn lookup(&self, ip: Ipv4Addr) -> Result<Location> {
        let url = format!("{}/{}", self.base_url, ip);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("geolocation request for {ip} failed"))?;

        if !response.status().is_success() {
            bail!("geolocation service returned {}", response.status());
        }

        let body: IpApiResponse = response
            .json()
            .await
            .context("failed to parse geolocation response")?;
        to_location(body)
    }
}

fn to_location(body: IpApiResponse) -> Result<Location> {
    if body.status != "success" {
        bail!(
            "geolocation lookup unsuccessful: {}",
            body.message.as_deref().unwrap_or(&body.status)
        );
    }
    Ok(Location {
        country: body.country.unwrap_or_else(|| "Unknown".to_string()),
        city: body.city.unwrap_or_else(|| "Unknown".to_string()),
        lat: body.lat.unwrap_or(0.0),
        lon: body.lon.unwrap_or(0.0),
    })
}
