use std::net::Ipv4Addr;
use std::time::Duration;

use craft_scan_rs::ranges::{check_safety, estimate_scan_time, expand, target_count};
use craft_scan_rs::{ConfigError, Endpoint};

#[test]
fn slash_24_yields_254_hosts_in_order() {
    let targets = expand("192.168.1.0/24", &[25565]).unwrap();
    assert_eq!(targets.len(), 254);
    assert_eq!(targets[0], Endpoint::new(Ipv4Addr::new(192, 168, 1, 1), 25565));
    assert_eq!(
        targets[253],
        Endpoint::new(Ipv4Addr::new(192, 168, 1, 254), 25565)
    );
    assert!(targets.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn ports_vary_fastest() {
    let targets = expand("203.0.113.0/30", &[25565, 25566]).unwrap();
    let rendered: Vec<String> = targets.iter().map(ToString::to_string).collect();
    assert_eq!(
        rendered,
        vec![
            "203.0.113.1:25565",
            "203.0.113.1:25566",
            "203.0.113.2:25565",
            "203.0.113.2:25566",
        ]
    );
    assert_eq!(target_count("203.0.113.0/30", &[25565, 25566]).unwrap(), 4);
}

#[test]
fn bad_input_is_rejected() {
    assert!(matches!(
        expand("bogus", &[25565]),
        Err(ConfigError::InvalidCidr { .. })
    ));
    assert!(matches!(
        expand("2001:db8::/64", &[25565]),
        Err(ConfigError::UnsupportedFamily(_))
    ));
    assert!(matches!(
        expand("203.0.113.0/24", &[25565, 0]),
        Err(ConfigError::InvalidPort(0))
    ));
}

#[test]
fn private_ranges_are_unsafe() {
    let v = check_safety("10.0.0.0/8").unwrap();
    assert!(!v.safe);
    assert!(v.reason.contains("private"));

    assert!(!check_safety("192.168.1.0/24").unwrap().safe);
    assert!(!check_safety("127.0.0.1").unwrap().safe);
}

#[test]
fn small_public_range_is_safe() {
    let v = check_safety("8.8.8.0/24").unwrap();
    assert!(v.safe, "{}", v.reason);
}

#[test]
fn large_public_range_is_unsafe() {
    let v = check_safety("8.0.0.0/8").unwrap();
    assert!(!v.safe);
    assert!(v.reason.contains("addresses"));
    // Exactly at the limit is still fine.
    assert!(check_safety("8.8.0.0/16").unwrap().safe);
}

#[test]
fn estimate_scales_with_concurrency() {
    let slow = estimate_scan_time(10_000, 10, Duration::from_secs(3));
    let fast = estimate_scan_time(10_000, 100, Duration::from_secs(3));
    assert!(fast < slow);
    assert_eq!(estimate_scan_time(1, 1000, Duration::from_millis(10)), Duration::from_secs(1));
}
