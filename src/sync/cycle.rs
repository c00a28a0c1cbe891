//! One poll cycle: fan out to every fetcher, collect what they saw, and hand
//! each discovered upstream to the updater.

use super::breaker::FetcherBreaker;
use super::reconcile::{ReconcileError, UpdateOutcome, UpstreamUpdater};
use crate::source::{FetchContext, FetchScope, Fetcher, Upstream};
use futures::future::join_all;
use futures::{FutureExt, StreamExt};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Summary of a finished cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    pub targeted: bool,
    pub fetchers_succeeded: usize,
    /// Includes fetchers that timed out.
    pub fetchers_failed: usize,
    pub fetchers_timed_out: usize,
    pub fetchers_skipped: usize,
    /// Distinct upstream ids discovered in scope.
    pub discovered: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub missing: usize,
    pub failed: usize,
    pub conflicts: usize,
}

impl CycleReport {
    pub(crate) fn new(cycle: u64, scope: &FetchScope) -> Self {
        Self {
            cycle,
            targeted: scope.is_targeted(),
            ..Self::default()
        }
    }

    /// Whether every fetcher and every update in the cycle succeeded.
    pub fn is_clean(&self) -> bool {
        self.fetchers_failed == 0 && self.failed == 0
    }
}

/// A registered fetcher paired with its breaker.
pub(crate) struct GuardedFetcher {
    pub(crate) fetcher: Arc<dyn Fetcher>,
    pub(crate) breaker: FetcherBreaker,
}

impl GuardedFetcher {
    pub(crate) fn new(
        fetcher: Arc<dyn Fetcher>,
        failure_threshold: usize,
        cooldown: Duration,
    ) -> Self {
        let breaker = FetcherBreaker::new(fetcher.kind(), failure_threshold, cooldown);
        Self { fetcher, breaker }
    }
}

#[derive(Debug)]
pub(crate) enum FetchOutcome {
    Fetched(Vec<Upstream>),
    Failed,
    TimedOut,
    Skipped,
}

async fn fetch_one(
    guarded: &GuardedFetcher,
    context: &FetchContext,
    fetch_timeout: Duration,
) -> FetchOutcome {
    let kind = guarded.fetcher.kind();
    if !guarded.breaker.allow() {
        tracing::debug!(
            fetcher = kind,
            cycle = context.cycle,
            "fetcher circuit open; skipping"
        );
        return FetchOutcome::Skipped;
    }

    // `fetch` itself runs inside the guard so a panic while building the
    // future is contained too.
    let call = AssertUnwindSafe(async { guarded.fetcher.fetch(context).await }).catch_unwind();
    match timeout(fetch_timeout, call).await {
        Ok(Ok(Ok(upstreams))) => {
            guarded.breaker.record_success();
            tracing::debug!(
                fetcher = kind,
                cycle = context.cycle,
                upstreams = upstreams.len(),
                "fetcher returned upstreams"
            );
            FetchOutcome::Fetched(upstreams)
        }
        Ok(Ok(Err(err))) => {
            guarded.breaker.record_failure();
            tracing::warn!(
                fetcher = kind,
                cycle = context.cycle,
                error = %format!("{err:#}"),
                "fetcher failed"
            );
            FetchOutcome::Failed
        }
        Ok(Err(_)) => {
            guarded.breaker.record_failure();
            tracing::error!(fetcher = kind, cycle = context.cycle, "fetcher panicked");
            FetchOutcome::Failed
        }
        Err(_) => {
            guarded.breaker.record_failure();
            tracing::warn!(
                fetcher = kind,
                cycle = context.cycle,
                timeout_ms = fetch_timeout.as_millis() as u64,
                "fetcher timed out"
            );
            FetchOutcome::TimedOut
        }
    }
}

/// Runs every fetcher concurrently and returns their results in registration
/// order.
pub(crate) async fn fetch_all(
    fetchers: &[GuardedFetcher],
    context: &FetchContext,
    fetch_timeout: Duration,
    report: &mut CycleReport,
) -> Vec<Vec<Upstream>> {
    let outcomes = join_all(
        fetchers
            .iter()
            .map(|guarded| fetch_one(guarded, context, fetch_timeout)),
    )
    .await;

    let mut batches = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        match outcome {
            FetchOutcome::Fetched(upstreams) => {
                report.fetchers_succeeded += 1;
                batches.push(upstreams);
            }
            FetchOutcome::Failed => report.fetchers_failed += 1,
            FetchOutcome::TimedOut => {
                report.fetchers_failed += 1;
                report.fetchers_timed_out += 1;
            }
            FetchOutcome::Skipped => report.fetchers_skipped += 1,
        }
    }
    batches
}

/// Collapses discovered upstreams to one per id, keeping first-seen id order.
/// When several fetchers report the same id, the one registered last wins.
/// Upstreams outside `scope` are dropped.
pub(crate) fn collapse_by_id(batches: Vec<Vec<Upstream>>, scope: &FetchScope) -> Vec<Upstream> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut collapsed: Vec<Upstream> = Vec::new();

    for upstream in batches.into_iter().flatten() {
        if !scope.includes(&upstream.id) {
            tracing::trace!(upstream = %upstream.id, "discovered upstream outside cycle scope");
            continue;
        }
        match index.get(&upstream.id) {
            Some(&slot) => {
                tracing::debug!(
                    upstream = %upstream.id,
                    "upstream reported by several fetchers; keeping the later one"
                );
                collapsed[slot] = upstream;
            }
            None => {
                index.insert(upstream.id.clone(), collapsed.len());
                collapsed.push(upstream);
            }
        }
    }
    collapsed
}

/// Reconciles each upstream on its own task, at most `limit` at a time. A
/// failing or panicking update only affects its own upstream.
pub(crate) async fn reconcile_all(
    updater: Arc<dyn UpstreamUpdater>,
    upstreams: Vec<Upstream>,
    limit: usize,
    report: &mut CycleReport,
) {
    report.discovered = upstreams.len();

    let results = futures::stream::iter(upstreams)
        .map(|upstream| {
            let updater = updater.clone();
            let id = upstream.id.clone();
            async move {
                let task = tokio::spawn(async move { updater.update(upstream).await });
                (id, task.await)
            }
        })
        .buffer_unordered(limit.max(1))
        .collect::<Vec<_>>()
        .await;

    for (id, joined) in results {
        match joined {
            Ok(outcome) => tally(report, &id, outcome),
            Err(err) => {
                report.failed += 1;
                tracing::error!(upstream = %id, error = %err, "upstream update task aborted");
            }
        }
    }
}

fn tally(report: &mut CycleReport, id: &str, outcome: Result<UpdateOutcome, ReconcileError>) {
    match outcome {
        Ok(UpdateOutcome::Updated) => report.updated += 1,
        Ok(UpdateOutcome::Unchanged) => report.unchanged += 1,
        Ok(UpdateOutcome::NotFound) => report.missing += 1,
        Err(err) => {
            report.failed += 1;
            if err.is_conflict() {
                report.conflicts += 1;
            }
            tracing::warn!(
                upstream = %id,
                cycle = report.cycle,
                error = %format!("{:#}", anyhow::Error::new(err)),
                "failed to reconcile upstream"
            );
        }
    }
}
