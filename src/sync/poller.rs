//! Timer-driven discovery loop. Every cycle asks each registered fetcher for
//! its view of the world and reconciles what it reports.

use super::cycle::{collapse_by_id, fetch_all, reconcile_all, CycleReport, GuardedFetcher};
use super::reconcile::UpstreamUpdater;
use super::tracked::PollerHandle;
use crate::runtime::config::DiscoveryConfig;
use crate::runtime::telemetry::Telemetry;
use crate::source::{FetchContext, FetchScope, FetcherRegistry};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct PollerOptions {
    pub fetch_timeout: Duration,
    pub max_concurrent_updates: usize,
    pub breaker_failure_threshold: usize,
    pub breaker_cooldown: Duration,
}

impl PollerOptions {
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self {
            fetch_timeout: config.fetch_timeout(),
            max_concurrent_updates: config.max_concurrent_updates(),
            breaker_failure_threshold: config.breaker_failure_threshold(),
            breaker_cooldown: config.breaker_cooldown(),
        }
    }
}

pub struct Poller {
    fetchers: Vec<GuardedFetcher>,
    updater: Arc<dyn UpstreamUpdater>,
    handle: PollerHandle,
    telemetry: Arc<Telemetry>,
    options: PollerOptions,
    started: AtomicU64,
    completed: AtomicU64,
}

impl Poller {
    /// Takes a snapshot of the registry; fetchers added afterwards are not
    /// polled.
    pub fn new(
        registry: &FetcherRegistry,
        updater: Arc<dyn UpstreamUpdater>,
        handle: PollerHandle,
        telemetry: Arc<Telemetry>,
        options: PollerOptions,
    ) -> Self {
        let fetchers = registry
            .all()
            .iter()
            .map(|fetcher| {
                GuardedFetcher::new(
                    fetcher.clone(),
                    options.breaker_failure_threshold,
                    options.breaker_cooldown,
                )
            })
            .collect();

        Self {
            fetchers,
            updater,
            handle,
            telemetry,
            options,
            started: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        }
    }

    pub fn handle(&self) -> PollerHandle {
        self.handle.clone()
    }

    pub fn completed_cycles(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Spawns [`Poller::run`] as a background task.
    pub fn start(self: Arc<Self>, every: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(every, shutdown).await })
    }

    /// Runs a full cycle immediately and then once per `every`, until
    /// `shutdown` fires. Cancellation is only observed between cycles; a
    /// cycle that has started always completes.
    pub async fn run(&self, every: Duration, shutdown: CancellationToken) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            fetchers = self.fetchers.len(),
            interval_ms = every.as_millis() as u64,
            "poller started"
        );

        loop {
            let scope = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    // A full sweep covers anything requested so far.
                    let _ = self.handle.take_pending();
                    FetchScope::All
                }
                _ = self.handle.requested() => match self.handle.take_pending() {
                    Some(ids) => FetchScope::Only(ids),
                    None => continue,
                },
            };

            self.run_cycle(scope).await;
        }

        tracing::info!(cycles = self.completed_cycles(), "poller stopped");
    }

    /// Executes one cycle over `scope` and returns its summary.
    pub async fn run_cycle(&self, scope: FetchScope) -> CycleReport {
        let cycle = self.started.fetch_add(1, Ordering::SeqCst) + 1;
        let mut report = CycleReport::new(cycle, &scope);

        let context = FetchContext {
            cycle,
            scope,
            upstreams: self.handle.tracked(),
        };

        let batches = fetch_all(
            &self.fetchers,
            &context,
            self.options.fetch_timeout,
            &mut report,
        )
        .await;
        let upstreams = collapse_by_id(batches, &context.scope);
        reconcile_all(
            self.updater.clone(),
            upstreams,
            self.options.max_concurrent_updates,
            &mut report,
        )
        .await;

        self.telemetry.record_cycle(&report);
        self.completed.fetch_add(1, Ordering::SeqCst);
        if report.is_clean() {
            tracing::debug!(
                cycle,
                targeted = report.targeted,
                discovered = report.discovered,
                updated = report.updated,
                unchanged = report.unchanged,
                missing = report.missing,
                "poll cycle finished"
            );
        } else {
            tracing::info!(
                cycle,
                targeted = report.targeted,
                discovered = report.discovered,
                updated = report.updated,
                fetchers_failed = report.fetchers_failed,
                updates_failed = report.failed,
                "poll cycle finished with failures"
            );
        }

        report
    }
}
