use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{validate_concurrency, validate_timeout, ProbeConfig, ScanConfig};
use crate::error::{ConfigError, ScanError};
use crate::events::{CallbackRegistry, EventKind, ScanEvent};
use crate::geo::{self, LocationDefaults, Locator, NoopLocator};
use crate::probe::Prober;
use crate::ranges;
use crate::store::ResultStore;
use crate::types::{Endpoint, ScanProgress, ScanSummary, ServerRecord};

/// Live counters of the current (or last) scan.
#[derive(Debug, Default)]
struct ScanState {
    total: AtomicU64,
    scanned: AtomicU64,
    found: AtomicU64,
    running: AtomicBool,
}

impl ScanState {
    fn reset(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
        self.scanned.store(0, Ordering::SeqCst);
        self.found.store(0, Ordering::SeqCst);
    }

    fn snapshot(&self) -> ScanProgress {
        ScanProgress::new(
            self.total.load(Ordering::SeqCst),
            self.scanned.load(Ordering::SeqCst),
            self.found.load(Ordering::SeqCst),
        )
    }
}

/// Requests cancellation of whatever scan its scanner is running.
///
/// Safe to capture in observers: it does not keep the scanner alive.
#[derive(Debug, Clone)]
pub struct StopHandle {
    slot: Arc<Mutex<CancellationToken>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.slot.lock().cancel();
    }
}

/// Outcome of one range within `scan_multiple_ranges`.
#[derive(Debug)]
pub struct RangeOutcome {
    pub range: String,
    pub result: Result<ScanSummary, ConfigError>,
}

/// Fans probes out over a bounded worker pool and reports through observers.
///
/// One scan at a time per `Scanner`; probes can still be run directly with
/// [`Prober`].
pub struct Scanner {
    probe_config: ProbeConfig,
    location_defaults: LocationDefaults,
    locator: Arc<dyn Locator>,
    store: ResultStore,
    callbacks: CallbackRegistry,
    state: ScanState,
    cancel: Arc<Mutex<CancellationToken>>,
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("probe_config", &self.probe_config)
            .field("state", &self.state)
            .field("callbacks", &self.callbacks)
            .finish_non_exhaustive()
    }
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new(ProbeConfig::default())
    }
}

impl Scanner {
    pub fn new(probe_config: ProbeConfig) -> Self {
        Self {
            probe_config,
            location_defaults: LocationDefaults::default(),
            locator: Arc::new(NoopLocator),
            store: ResultStore::new(),
            callbacks: CallbackRegistry::new(),
            state: ScanState::default(),
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
        }
    }

    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(config.probe.clone()).with_location_defaults(config.location_defaults.clone())
    }

    pub fn with_locator(mut self, locator: Arc<dyn Locator>) -> Self {
        self.locator = locator;
        self
    }

    pub fn with_location_defaults(mut self, defaults: LocationDefaults) -> Self {
        self.location_defaults = defaults;
        self
    }

    /// Share an existing store instead of the scanner's own.
    pub fn with_store(mut self, store: ResultStore) -> Self {
        self.store = store;
        self
    }

    pub fn add_callback<F>(&self, kind: EventKind, callback: F)
    where
        F: Fn(&ScanEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.callbacks.add(kind, callback);
    }

    pub fn get_servers(&self) -> Vec<ServerRecord> {
        self.store.get_servers()
    }

    pub fn clear_servers(&self) {
        self.store.clear_servers();
    }

    pub fn progress(&self) -> ScanProgress {
        self.state.snapshot()
    }

    pub fn is_scanning(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Stop dispatching new probes. In-flight probes finish normally.
    pub fn stop(&self) {
        self.cancel.lock().cancel();
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            slot: self.cancel.clone(),
        }
    }

    /// Probe every target with at most `max_concurrency` probes in flight.
    ///
    /// Emits `ScanStarted` once, then `ServerFound` (for non-restricted
    /// servers) and `Progress` per completed probe, and finally
    /// `ScanComplete` exactly once. Invalid parameters and a concurrent scan
    /// are rejected before any event is emitted.
    pub async fn scan(
        &self,
        targets: &[Endpoint],
        max_concurrency: usize,
        per_probe_timeout: Duration,
    ) -> Result<ScanSummary, ScanError> {
        validate_concurrency(max_concurrency)?;
        validate_timeout(per_probe_timeout)?;
        let (_running, token) = self.begin()?;
        Ok(self
            .run(targets, max_concurrency, per_probe_timeout, &token)
            .await)
    }

    /// Expand `cidr` against `ports` and scan the result.
    pub async fn scan_range(
        &self,
        cidr: &str,
        ports: &[u16],
        max_concurrency: usize,
        per_probe_timeout: Duration,
    ) -> Result<ScanSummary, ScanError> {
        let targets = ranges::expand(cidr, ports)?;
        self.scan(&targets, max_concurrency, per_probe_timeout).await
    }

    /// Scan each range in order. A range that fails to parse is logged and
    /// skipped; a stop request ends the whole sequence.
    pub async fn scan_multiple_ranges<S: AsRef<str>>(
        &self,
        cidrs: &[S],
        ports: &[u16],
        max_concurrency: usize,
        per_probe_timeout: Duration,
    ) -> Result<Vec<RangeOutcome>, ScanError> {
        validate_concurrency(max_concurrency)?;
        validate_timeout(per_probe_timeout)?;
        let (_running, token) = self.begin()?;
        Ok(self
            .run_ranges(cidrs, ports, max_concurrency, per_probe_timeout, &token)
            .await)
    }

    /// Claim the run slot now and scan later, possibly from another task.
    ///
    /// The scanner reports `is_scanning()` until the returned reservation
    /// has been used or dropped.
    pub fn reserve(self: &Arc<Self>) -> Result<Reservation, ScanError> {
        let token = self.claim()?;
        Ok(Reservation {
            scanner: self.clone(),
            token,
        })
    }

    async fn run_ranges<S: AsRef<str>>(
        &self,
        cidrs: &[S],
        ports: &[u16],
        max_concurrency: usize,
        per_probe_timeout: Duration,
        token: &CancellationToken,
    ) -> Vec<RangeOutcome> {
        let mut outcomes = Vec::with_capacity(cidrs.len());
        for cidr in cidrs {
            let cidr = cidr.as_ref();
            if token.is_cancelled() {
                info!(range = cidr, "scan stopped, skipping remaining ranges");
                break;
            }
            let result = match ranges::expand(cidr, ports) {
                Ok(targets) => {
                    info!(range = cidr, targets = targets.len(), "scanning range");
                    Ok(self
                        .run(&targets, max_concurrency, per_probe_timeout, token)
                        .await)
                }
                Err(e) => {
                    warn!(range = cidr, error = %e, "skipping range");
                    Err(e)
                }
            };
            outcomes.push(RangeOutcome {
                range: cidr.to_string(),
                result,
            });
        }
        outcomes
    }

    fn begin(&self) -> Result<(RunningGuard<'_>, CancellationToken), ScanError> {
        let token = self.claim()?;
        Ok((RunningGuard { state: &self.state }, token))
    }

    /// Set the running flag and install a fresh cancellation token.
    ///
    /// Both happen under the token lock, so once `is_scanning()` reports
    /// true a `stop()` always reaches the new scan.
    fn claim(&self) -> Result<CancellationToken, ScanError> {
        let mut slot = self.cancel.lock();
        self.state
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| ScanError::AlreadyRunning)?;
        let token = CancellationToken::new();
        *slot = token.clone();
        Ok(token)
    }

    async fn run(
        &self,
        targets: &[Endpoint],
        max_concurrency: usize,
        per_probe_timeout: Duration,
        token: &CancellationToken,
    ) -> ScanSummary {
        let total = targets.len() as u64;
        self.state.reset(total);
        let _complete = CompletionGuard { scanner: self };
        self.callbacks.emit(&ScanEvent::ScanStarted {
            total_targets: total,
        });
        info!(targets = total, concurrency = max_concurrency, "scan started");

        let started = Instant::now();
        let prober = Arc::new(
            Prober::new(self.probe_config.clone(), per_probe_timeout)
                .with_location_defaults(self.location_defaults.clone()),
        );
        let mut set: JoinSet<Option<ServerRecord>> = JoinSet::new();
        let mut worker_failures = 0u64;

        for &endpoint in targets {
            if token.is_cancelled() {
                break;
            }
            while set.len() >= max_concurrency {
                match set.join_next().await {
                    Some(res) => self.finish(res, total, &mut worker_failures),
                    None => break,
                }
            }
            // An observer may have asked to stop while we waited for a slot.
            if token.is_cancelled() {
                break;
            }

            let prober = prober.clone();
            let locator = self.locator.clone();
            let defaults = self.location_defaults.clone();
            set.spawn(async move {
                let record = match prober.probe(endpoint).await {
                    Ok(record) => record,
                    Err(e) => {
                        warn!(%endpoint, error = %e, "refusing to probe endpoint");
                        None
                    }
                };
                match record {
                    Some(mut r) if !r.access_restricted => {
                        r.location = geo::enrich(locator.as_ref(), endpoint.address, &defaults).await;
                        Some(r)
                    }
                    other => other,
                }
            });

            while let Some(res) = set.try_join_next() {
                self.finish(res, total, &mut worker_failures);
            }
        }

        let cancelled = token.is_cancelled();
        if cancelled {
            info!(in_flight = set.len(), "scan stopped, draining in-flight probes");
        }
        while let Some(res) = set.join_next().await {
            self.finish(res, total, &mut worker_failures);
        }

        let progress = self.state.snapshot();
        let summary = ScanSummary {
            total_targets: total,
            scanned: progress.scanned,
            found: progress.found,
            cancelled,
            worker_failures,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            scanned = summary.scanned,
            found = summary.found,
            cancelled,
            elapsed_ms = summary.elapsed_ms,
            "scan finished"
        );
        summary
    }

    /// Account for one completed probe. Runs on the scanning task only, so
    /// counter updates and events are serialized.
    fn finish(
        &self,
        res: Result<Option<ServerRecord>, JoinError>,
        total: u64,
        worker_failures: &mut u64,
    ) {
        let record = match res {
            Ok(record) => record,
            Err(e) => {
                *worker_failures += 1;
                error!(error = %e, "probe worker failed");
                None
            }
        };

        let scanned = self.state.scanned.fetch_add(1, Ordering::SeqCst) + 1;
        match record {
            Some(record) if record.access_restricted => {
                debug!(endpoint = %record.endpoint, "skipping access-restricted server");
            }
            Some(record) => {
                self.store.push(record.clone());
                self.state.found.fetch_add(1, Ordering::SeqCst);
                info!(server = %record, rtt_ms = record.round_trip_millis, "server found");
                self.callbacks.emit(&ScanEvent::ServerFound(record));
            }
            None => {}
        }

        let found = self.state.found.load(Ordering::SeqCst);
        self.callbacks
            .emit(&ScanEvent::Progress(ScanProgress::new(total, scanned, found)));
    }
}

struct RunningGuard<'a> {
    state: &'a ScanState,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.state.running.store(false, Ordering::SeqCst);
    }
}

/// A claimed run slot, see [`Scanner::reserve`].
pub struct Reservation {
    scanner: Arc<Scanner>,
    token: CancellationToken,
}

impl Reservation {
    /// [`Scanner::scan_multiple_ranges`] on the reserved slot.
    pub async fn scan_multiple_ranges<S: AsRef<str>>(
        self,
        cidrs: &[S],
        ports: &[u16],
        max_concurrency: usize,
        per_probe_timeout: Duration,
    ) -> Result<Vec<RangeOutcome>, ScanError> {
        validate_concurrency(max_concurrency)?;
        validate_timeout(per_probe_timeout)?;
        Ok(self
            .scanner
            .run_ranges(cidrs, ports, max_concurrency, per_probe_timeout, &self.token)
            .await)
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.scanner.state.running.store(false, Ordering::SeqCst);
    }
}

/// Emits `ScanComplete` when a range run ends, however it ends.
struct CompletionGuard<'a> {
    scanner: &'a Scanner,
}

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        let total_records = self.scanner.store.len();
        self.scanner
            .callbacks
            .emit(&ScanEvent::ScanComplete { total_records });
    }
}
