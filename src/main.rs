use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use craft_scan_rs::{
    geo::DEFAULT_LOOKUP_URL,
    ports, ranges, server, ConfigError, EventKind, IpApiLocator, Locator, NoopLocator, ScanConfig,
    ScanEvent, Scanner, ServerRecord,
};

/// craft-scan-rs: discover game servers speaking the server-list protocol across IPv4 ranges.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "craft-scan-rs",
    version,
    about = "Discover game servers speaking the server-list protocol across IPv4 ranges.",
    long_about = None
)]
struct Cli {
    /// CIDR ranges (e.g. 203.0.113.0/24) or single addresses to scan, in order.
    ranges: Vec<String>,

    /// Ports to probe on every host: list and/or ranges, e.g. "25565,25570-25575".
    #[arg(long, conflicts_with = "ports_file")]
    ports: Option<String>,

    /// File with one port or range per line (# comments allowed).
    #[arg(long = "ports-file")]
    ports_file: Option<PathBuf>,

    /// Max concurrent probes.
    #[arg(long, default_value_t = 100)]
    concurrency: usize,

    /// Per-operation (connect/read/write) timeout in milliseconds.
    #[arg(long = "timeout-ms", default_value_t = 3000)]
    timeout_ms: u64,

    /// Hard cap on a single probe's total time, in milliseconds.
    #[arg(long = "probe-deadline-ms")]
    probe_deadline_ms: Option<u64>,

    /// Skip the login-based whitelist probe.
    #[arg(long = "no-access-check", default_value_t = false)]
    no_access_check: bool,

    /// Skip geolocation lookups.
    #[arg(long = "no-geo", default_value_t = false)]
    no_geo: bool,

    /// Base URL of an ip-api compatible geolocation endpoint.
    #[arg(long = "geo-url", default_value = DEFAULT_LOOKUP_URL)]
    geo_url: String,

    /// Scan ranges even when the safety check flags them (private, reserved, too large).
    #[arg(long = "allow-unsafe", default_value_t = false)]
    allow_unsafe: bool,

    /// Write discovered servers as pretty JSON to this path.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Serve the JSON control API on this address (e.g. 127.0.0.1:8080).
    #[arg(long)]
    serve: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = build_config(&cli)?;
    config.validate().context("invalid scan settings")?;

    let locator: Arc<dyn Locator> = if cli.no_geo {
        Arc::new(NoopLocator)
    } else {
        Arc::new(IpApiLocator::new(cli.geo_url.clone())?)
    };
    let scanner = Arc::new(Scanner::from_config(&config).with_locator(locator));
    register_observers(&scanner);

    // Ctrl-C stops dispatching; in-flight probes drain before we exit.
    let stop = scanner.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping scan");
            stop.stop();
        }
    });

    if let Some(bind) = cli.serve.clone() {
        let state = server::AppState::new(scanner.clone(), config.clone());
        tokio::spawn(async move {
            if let Err(e) = server::spawn_server(&bind, state).await {
                tracing::error!("control API error: {e:#}");
            }
        });
    }

    if cli.ranges.is_empty() {
        if cli.serve.is_none() {
            bail!("no ranges given (pass one or more CIDRs, or --serve to wait for API requests)");
        }
        info!("waiting for scan requests, press Ctrl+C to quit");
        let _ = tokio::signal::ctrl_c().await;
        return Ok(());
    }

    let ranges = vetted_ranges(&cli.ranges, &config, cli.allow_unsafe)?;
    let outcomes = scanner
        .scan_multiple_ranges(&ranges, &config.ports, config.concurrency, config.timeout)
        .await?;

    let scanned: u64 = outcomes
        .iter()
        .filter_map(|o| o.result.as_ref().ok())
        .map(|s| s.scanned)
        .sum();
    let servers = scanner.get_servers();
    print_results_table(&servers, scanned);

    if let Some(path) = cli.output.as_deref() {
        write_results_json(path, &servers)
            .with_context(|| format!("failed to write JSON to {}", path.display()))?;
        info!("wrote {} servers to {}", servers.len(), path.display());
    }
    Ok(())
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_config(cli: &Cli) -> Result<ScanConfig> {
    let mut config = ScanConfig::default();
    if let Some(list) = cli.ports.as_deref() {
        config.ports = ports::parse_ports_str(list).context("invalid --ports")?;
    } else if let Some(path) = cli.ports_file.as_deref() {
        config.ports = ports::load_ports_from_path(path)?;
    }
    config.concurrency = cli.concurrency;
    config.timeout = Duration::from_millis(cli.timeout_ms);
    config.probe.check_access = !cli.no_access_check;
    config.probe.probe_deadline = cli.probe_deadline_ms.map(Duration::from_millis);
    Ok(config)
}

/// Apply the advisory safety check, dropping flagged ranges unless allowed.
fn vetted_ranges(input: &[String], config: &ScanConfig, allow_unsafe: bool) -> Result<Vec<String>> {
    let mut out = Vec::with_capacity(input.len());
    let mut total_targets = 0u64;
    for r in input {
        match ranges::vet(r, &config.ports, allow_unsafe) {
            Ok(n) => {
                total_targets += n;
                out.push(r.clone());
            }
            Err(e @ ConfigError::UnsafeRange { .. }) => {
                warn!("skipping: {e} (use --allow-unsafe to override)");
            }
            Err(e) => warn!("skipping {r}: {e}"),
        }
    }
    if out.is_empty() {
        bail!("no scannable ranges left after safety checks");
    }
    if total_targets > ranges::MAX_TARGETS {
        bail!(
            "{total_targets} targets across all ranges, more than the limit of {}",
            ranges::MAX_TARGETS
        );
    }
    let eta = ranges::estimate_scan_time(total_targets, config.concurrency, config.timeout);
    info!(
        ranges = out.len(),
        targets = total_targets,
        "estimated scan time ~{}s",
        eta.as_secs()
    );
    Ok(out)
}

fn register_observers(scanner: &Scanner) {
    scanner.add_callback(EventKind::ServerFound, |ev| {
        if let ScanEvent::ServerFound(r) = ev {
            println!(
                "found {} | {} | {} | {}/{} players | {}ms | {}, {}",
                r.endpoint,
                r.display_name,
                r.version_name,
                r.players_online,
                r.players_max,
                r.round_trip_millis,
                r.location.city,
                r.location.country
            );
        }
        Ok(())
    });

    // Log progress in 10% steps.
    let last_step = Arc::new(AtomicU64::new(0));
    let reset = last_step.clone();
    scanner.add_callback(EventKind::ScanStarted, move |_| {
        reset.store(0, Ordering::Relaxed);
        Ok(())
    });
    scanner.add_callback(EventKind::Progress, move |ev| {
        if let ScanEvent::Progress(p) = ev {
            let step = (p.percent / 10.0) as u64;
            if step > last_step.swap(step, Ordering::Relaxed) {
                info!(
                    "progress {:.0}% ({}/{}) - {} servers",
                    p.percent, p.scanned, p.total, p.found
                );
            }
        }
        Ok(())
    });
}

fn print_results_table(servers: &[ServerRecord], scanned: u64) {
    let mut addr_w = "address".len();
    let mut name_w = "name".len();
    let mut ver_w = "version".len();
    for s in servers {
        addr_w = addr_w.max(s.endpoint.to_string().len());
        name_w = name_w.max(s.display_name.chars().count().min(40));
        ver_w = ver_w.max(s.version_name.chars().count().min(20));
    }
    let players_w = "players".len().max(9);
    let rtt_w = "rtt_ms".len();

    println!("\nServers found: {} (probed: {})", servers.len(), scanned);
    println!(
        "{:<addr_w$}  {:<name_w$}  {:<ver_w$}  {:>players_w$}  {:>rtt_w$}  location",
        "address", "name", "version", "players", "rtt_ms",
    );
    println!(
        "{:-<addr_w$}  {:-<name_w$}  {:-<ver_w$}  {:-<players_w$}  {:-<rtt_w$}  {:-<8}",
        "", "", "", "", "", "",
    );
    for s in servers {
        let name: String = s.display_name.chars().take(40).collect();
        let version: String = s.version_name.chars().take(20).collect();
        println!(
            "{:<addr_w$}  {:<name_w$}  {:<ver_w$}  {:>players_w$}  {:>rtt_w$}  {}, {}",
            s.endpoint.to_string(),
            name,
            version,
            format!("{}/{}", s.players_online, s.players_max),
            s.round_trip_millis,
            s.location.city,
            s.location.country,
        );
    }
}

fn write_results_json(path: &Path, servers: &[ServerRecord]) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, servers)?;
    Ok(())
}
