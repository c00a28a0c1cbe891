use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::support::helpers::{
    fast_config, function, init_tracing, wait_for_functions, GatedFetcher, RecordingFetcher,
};
use anyhow::Result;
use serde_json::json;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use upstream_discovery::store::{RecordWatch, StoreFuture};
use upstream_discovery::sync::{ControllerOptions, PollerOptions};
use upstream_discovery::{
    Controller, DiscoveryService, FetchScope, FetcherRegistry, ManagedRecord, MemoryStore, Poller,
    PollerHandle, Reconciler, ResourceStore, Telemetry, Upstream,
};

/// Store where another actor edits the record between the reconciler's read
/// and its first write.
struct RacingStore {
    inner: Arc<MemoryStore>,
    raced: AtomicBool,
}

impl ResourceStore for RacingStore {
    fn get<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<ManagedRecord>> {
        self.inner.get(id)
    }

    fn update(&self, record: ManagedRecord) -> StoreFuture<'_, ManagedRecord> {
        if !self.raced.swap(true, Ordering::SeqCst) {
            if let Some(current) = self.inner.snapshot(record.id()) {
                self.inner.insert(current.with_label("owner", "someone-else"));
            }
        }
        self.inner.update(record)
    }

    fn list(&self) -> StoreFuture<'_, Vec<ManagedRecord>> {
        self.inner.list()
    }

    fn watch(&self) -> StoreFuture<'_, RecordWatch> {
        self.inner.watch()
    }
}

fn controller(store: Arc<dyn ResourceStore>, telemetry: Arc<Telemetry>) -> Arc<Controller> {
    Arc::new(Controller::new(
        store,
        ControllerOptions {
            store_timeout: Duration::from_millis(500),
            watch_initial_backoff: Duration::from_millis(10),
            watch_max_backoff: Duration::from_millis(50),
        },
        telemetry,
    ))
}

fn poller_options() -> PollerOptions {
    PollerOptions {
        fetch_timeout: Duration::from_secs(1),
        max_concurrent_updates: 4,
        breaker_failure_threshold: 5,
        breaker_cooldown: Duration::from_secs(60),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn conflicting_write_is_surfaced_and_retried_next_cycle() -> Result<()> {
    init_tracing();
    let memory = Arc::new(MemoryStore::new());
    memory.insert(ManagedRecord::new("svc-a", "aws", json!({})));
    let store = Arc::new(RacingStore {
        inner: memory.clone(),
        raced: AtomicBool::new(false),
    });

    let aws = Arc::new(RecordingFetcher::new("aws"));
    aws.set("svc-a", vec![function("f1", json!({}))]);
    let telemetry = Arc::new(Telemetry::default());
    let poller = Poller::new(
        &FetcherRegistry::new().with(aws.clone()),
        Arc::new(Reconciler::new(controller(store, telemetry.clone()))),
        PollerHandle::new(),
        telemetry.clone(),
        poller_options(),
    );

    let first = poller.run_cycle(FetchScope::All).await;
    assert_eq!(first.failed, 1);
    assert_eq!(first.conflicts, 1);
    assert!(memory.snapshot("svc-a").unwrap().functions().is_empty());

    let second = poller.run_cycle(FetchScope::All).await;
    assert_eq!(second.updated, 1);

    let record = memory.snapshot("svc-a").unwrap();
    assert_eq!(record.functions().len(), 1);
    assert_eq!(
        record.metadata.labels.get("owner").map(String::as_str),
        Some("someone-else")
    );
    assert_eq!(telemetry.snapshot().write_conflicts, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn last_registered_source_wins_for_shared_upstream() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    store.insert(ManagedRecord::new("svc-a", "openapi", json!({})));

    let first = Arc::new(RecordingFetcher::new("aws"));
    first.set("svc-a", vec![function("from-aws", json!({}))]);
    let second = Arc::new(RecordingFetcher::new("openapi"));
    second.set("svc-a", vec![function("from-openapi", json!({}))]);

    let mut service = DiscoveryService::new(
        fast_config(Duration::from_secs(3600))?,
        store.clone(),
        FetcherRegistry::new().with(first).with(second),
    );
    service.start().await?;
    wait_for_functions(&store, "svc-a", &["from-openapi"], Duration::from_secs(5)).await?;
    service.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn in_flight_cycle_completes_after_cancellation() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    store.insert(ManagedRecord::new("svc-a", "aws", json!({})));

    let gated = Arc::new(GatedFetcher::new(Upstream::new(
        "svc-a",
        vec![function("f1", json!({}))],
    )));
    let telemetry = Arc::new(Telemetry::default());
    let poller = Arc::new(Poller::new(
        &FetcherRegistry::new().with(gated.clone()),
        Arc::new(Reconciler::new(controller(store.clone(), telemetry.clone()))),
        PollerHandle::new(),
        telemetry,
        poller_options(),
    ));

    let shutdown = CancellationToken::new();
    let task = poller
        .clone()
        .start(Duration::from_millis(20), shutdown.clone());
    gated.wait_until_entered(Duration::from_secs(5)).await?;

    shutdown.cancel();
    gated.release();
    timeout(Duration::from_secs(5), task).await??;

    assert_eq!(poller.completed_cycles(), 1);
    assert_eq!(store.snapshot("svc-a").unwrap().functions().len(), 1);
    Ok(())
}
