use crate::store::StoreMetrics;
use crate::sync::CycleReport;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Rolling counters describing poll cycles and reconciliation outcomes.
#[derive(Default, Debug)]
pub struct Telemetry {
    cycles: AtomicU64,
    targeted_cycles: AtomicU64,
    fetch_failures: AtomicU64,
    fetch_timeouts: AtomicU64,
    fetchers_skipped: AtomicU64,
    upstreams_discovered: AtomicU64,
    records_updated: AtomicU64,
    records_unchanged: AtomicU64,
    records_missing: AtomicU64,
    update_failures: AtomicU64,
    write_conflicts: AtomicU64,
    store_events: AtomicU64,
}

impl Telemetry {
    /// Folds a finished cycle into the running totals.
    pub fn record_cycle(&self, report: &CycleReport) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        if report.targeted {
            self.targeted_cycles.fetch_add(1, Ordering::Relaxed);
        }
        add(&self.fetch_failures, report.fetchers_failed);
        add(&self.fetch_timeouts, report.fetchers_timed_out);
        add(&self.fetchers_skipped, report.fetchers_skipped);
        add(&self.upstreams_discovered, report.discovered);
        add(&self.records_updated, report.updated);
        add(&self.records_unchanged, report.unchanged);
        add(&self.records_missing, report.missing);
        add(&self.update_failures, report.failed);
        add(&self.write_conflicts, report.conflicts);
    }

    pub fn record_store_event(&self) {
        self.store_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn records_updated(&self) -> u64 {
        self.records_updated.load(Ordering::Relaxed)
    }

    pub fn store_events(&self) -> u64 {
        self.store_events.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            targeted_cycles: self.targeted_cycles.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            fetch_timeouts: self.fetch_timeouts.load(Ordering::Relaxed),
            fetchers_skipped: self.fetchers_skipped.load(Ordering::Relaxed),
            upstreams_discovered: self.upstreams_discovered.load(Ordering::Relaxed),
            records_updated: self.records_updated.load(Ordering::Relaxed),
            records_unchanged: self.records_unchanged.load(Ordering::Relaxed),
            records_missing: self.records_missing.load(Ordering::Relaxed),
            update_failures: self.update_failures.load(Ordering::Relaxed),
            write_conflicts: self.write_conflicts.load(Ordering::Relaxed),
            store_events: self.store_events.load(Ordering::Relaxed),
        }
    }
}

fn add(counter: &AtomicU64, value: usize) {
    if value == 0 {
        return;
    }
    counter.fetch_add(value as u64, Ordering::Relaxed);
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub cycles: u64,
    pub targeted_cycles: u64,
    pub fetch_failures: u64,
    pub fetch_timeouts: u64,
    pub fetchers_skipped: u64,
    pub upstreams_discovered: u64,
    pub records_updated: u64,
    pub records_unchanged: u64,
    pub records_missing: u64,
    pub update_failures: u64,
    pub write_conflicts: u64,
    pub store_events: u64,
}

/// Spawns a background task that periodically logs cycle throughput,
/// reconciliation outcomes, and store latency.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    store_metrics: Arc<StoreMetrics>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(
                        target: "upstream_discovery::metrics",
                        "metrics reporter shutting down"
                    );
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.snapshot();
                    let store = store_metrics.snapshot();
                    let updated_delta = current
                        .records_updated
                        .saturating_sub(last_snapshot.records_updated);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let update_rate = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        updated_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "upstream_discovery::metrics",
                        cycles = current.cycles,
                        targeted_cycles = current.targeted_cycles,
                        update_rate = format!("{update_rate:.2}"),
                        updated = current.records_updated,
                        unchanged = current.records_unchanged,
                        missing = current.records_missing,
                        update_failures = current.update_failures,
                        write_conflicts = current.write_conflicts,
                        fetch_failures = current.fetch_failures,
                        fetchers_skipped = current.fetchers_skipped,
                        store_events = current.store_events,
                        store_latency_ms = format!("{:.2}", store.average_latency_ms),
                        store_error_rate = format!("{:.3}", store.error_rate),
                        "runtime metrics snapshot"
                    );

                    last_snapshot = current;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
