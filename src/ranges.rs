use ipnet::{IpNet, Ipv4Net};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::error::ConfigError;
use crate::types::Endpoint;

/// Largest range `check_safety` accepts.
pub const MAX_SAFE_ADDRESSES: u64 = 65_536;

/// Hard ceiling on the endpoints one scan request may expand to, checked by
/// `vet` even when unsafe ranges are allowed.
pub const MAX_TARGETS: u64 = 1 << 24;

/// `expand` reserves at most this many endpoints up front.
const PREALLOC_LIMIT: u64 = 1 << 16;

/// Ranges `check_safety` refuses to scan, with the reason reported.
const SENSITIVE_RANGES: &[(&str, &str)] = &[
    ("0.0.0.0/8", "\"this network\" range"),
    ("10.0.0.0/8", "private range"),
    ("100.64.0.0/10", "shared address space (carrier-grade NAT)"),
    ("127.0.0.0/8", "loopback range"),
    ("169.254.0.0/16", "link-local range"),
    ("172.16.0.0/12", "private range"),
    ("192.168.0.0/16", "private range"),
    ("224.0.0.0/4", "multicast range"),
    ("240.0.0.0/4", "reserved range"),
];

/// Result of the advisory pre-scan check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyVerdict {
    pub safe: bool,
    pub reason: String,
}

/// Parse an IPv4 CIDR. Host bits are tolerated and cleared; a bare address
/// is treated as a /32.
pub fn parse_cidr(input: &str) -> Result<Ipv4Net, ConfigError> {
    let s = input.trim();
    let net: IpNet = if s.contains('/') {
        s.parse().map_err(|e: ipnet::AddrParseError| ConfigError::InvalidCidr {
            input: input.to_string(),
            reason: e.to_string(),
        })?
    } else {
        let ip: IpAddr = s.parse().map_err(|e: std::net::AddrParseError| {
            ConfigError::InvalidCidr {
                input: input.to_string(),
                reason: e.to_string(),
            }
        })?;
        IpNet::from(ip)
    };
    match net {
        IpNet::V4(n4) => Ok(n4.trunc()),
        IpNet::V6(_) => Err(ConfigError::UnsupportedFamily(input.to_string())),
    }
}

/// Usable host addresses of `net`, ascending. Network and broadcast addresses
/// are excluded except for /31 and /32, where every address is usable.
pub fn host_addresses(net: Ipv4Net) -> impl Iterator<Item = Ipv4Addr> {
    net.hosts()
}

pub fn host_count(net: Ipv4Net) -> u64 {
    let size = 1u64 << (32 - net.prefix_len() as u32);
    if net.prefix_len() >= 31 {
        size
    } else {
        size - 2
    }
}

/// Expand `cidr` into endpoints, address-major: every port of the first host,
/// then every port of the next.
pub fn expand(cidr: &str, ports: &[u16]) -> Result<Vec<Endpoint>, ConfigError> {
    let net = parse_cidr(cidr)?;
    if let Some(p) = ports.iter().find(|p| **p == 0) {
        return Err(ConfigError::InvalidPort(*p as u32));
    }
    let wanted = host_count(net).saturating_mul(ports.len() as u64);
    let mut out = Vec::with_capacity(wanted.min(PREALLOC_LIMIT) as usize);
    for address in host_addresses(net) {
        out.extend(ports.iter().map(|&port| Endpoint::new(address, port)));
    }
    Ok(out)
}

/// Number of endpoints `expand` would produce, without allocating them.
pub fn target_count(cidr: &str, ports: &[u16]) -> Result<u64, ConfigError> {
    let net = parse_cidr(cidr)?;
    Ok(host_count(net) * ports.len() as u64)
}

/// Advisory check: is this a public range small enough to scan in one go?
///
/// Nothing in the engine enforces the verdict.
pub fn check_safety(cidr: &str) -> Result<SafetyVerdict, ConfigError> {
    let net = parse_cidr(cidr)?;

    for (range, label) in SENSITIVE_RANGES {
        let sensitive: Ipv4Net = match range.parse() {
            Ok(n) => n,
            Err(_) => continue,
        };
        if overlaps(net, sensitive) {
            return Ok(SafetyVerdict {
                safe: false,
                reason: format!("{net} overlaps {label} {sensitive}"),
            });
        }
    }

    let addresses = 1u64 << (32 - net.prefix_len() as u32);
    if addresses > MAX_SAFE_ADDRESSES {
        return Ok(SafetyVerdict {
            safe: false,
            reason: format!(
                "{net} spans {addresses} addresses (limit {MAX_SAFE_ADDRESSES})"
            ),
        });
    }

    Ok(SafetyVerdict {
        safe: true,
        reason: format!("{net} is a public range of {addresses} addresses"),
    })
}

/// Gate a caller-supplied range before scanning it: it must parse, pass
/// `check_safety` unless `allow_unsafe`, and stay under [`MAX_TARGETS`].
/// Returns the number of endpoints it expands to.
pub fn vet(cidr: &str, ports: &[u16], allow_unsafe: bool) -> Result<u64, ConfigError> {
    let verdict = check_safety(cidr)?;
    if !verdict.safe && !allow_unsafe {
        return Err(ConfigError::UnsafeRange {
            range: cidr.to_string(),
            reason: verdict.reason,
        });
    }
    let count = target_count(cidr, ports)?;
    if count > MAX_TARGETS {
        return Err(ConfigError::TooManyTargets {
            count,
            max: MAX_TARGETS,
        });
    }
    Ok(count)
}

fn overlaps(a: Ipv4Net, b: Ipv4Net) -> bool {
    a.contains(&b.network()) || b.contains(&a.network())
}

/// Rough wall-clock estimate for a scan: most targets never answer, so a
/// probe averages about 30% of the timeout. Never below one second.
pub fn estimate_scan_time(targets: u64, concurrency: usize, timeout: Duration) -> Duration {
    let workers = concurrency.max(1) as f64;
    let per_target = timeout.as_secs_f64() * 0.3;
    Duration::from_secs_f64((targets as f64 * per_target / workers).max(1.0))
}
