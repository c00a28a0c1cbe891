use std::sync::Arc;
use std::time::Duration;

use crate::support::helpers::{
    fast_config, function, function_names, init_tracing, wait_for_functions, wait_until,
    FailingFetcher, RecordingFetcher,
};
use anyhow::{Context, Result};
use serde_json::json;
use upstream_discovery::{
    DiscoveryService, FetchScope, FetcherRegistry, ManagedRecord, MemoryStore, RecordFunction,
};

fn aws_record(id: &str) -> ManagedRecord {
    ManagedRecord::new(id, "aws", json!({"region": "us-east-1"})).with_label("team", "payments")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn discovered_functions_replace_only_the_function_list() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    store.insert(aws_record("svc-a").with_functions(vec![RecordFunction {
        name: "stale".into(),
        spec: json!({}),
    }]));

    let aws = Arc::new(RecordingFetcher::new("aws"));
    aws.set("svc-a", vec![function("f1", json!({"arn": "arn:aws:lambda:f1"}))]);
    let registry = FetcherRegistry::new().with(aws.clone());

    let mut service =
        DiscoveryService::new(fast_config(Duration::from_secs(60))?, store.clone(), registry);
    service.start().await?;

    let record = wait_for_functions(&store, "svc-a", &["f1"], Duration::from_secs(5)).await?;
    service.stop().await?;

    assert_eq!(
        record.metadata.labels.get("team").map(String::as_str),
        Some("payments")
    );
    assert_eq!(record.spec.config, json!({"region": "us-east-1"}));
    assert_eq!(record.functions()[0].spec, json!({"arn": "arn:aws:lambda:f1"}));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unknown_upstreams_are_never_created() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let aws = Arc::new(RecordingFetcher::new("aws"));
    aws.set("svc-missing", vec![function("f1", json!({}))]);

    let mut service = DiscoveryService::new(
        fast_config(Duration::from_millis(50))?,
        store.clone(),
        FetcherRegistry::new().with(aws.clone()),
    );
    service.start().await?;
    wait_until("three poll cycles", Duration::from_secs(5), || {
        service.completed_cycles() >= 3
    })
    .await?;
    service.stop().await?;

    assert!(store.snapshot("svc-missing").is_none());
    assert_eq!(store.update_count(), 0);
    assert!(service.telemetry().snapshot().records_missing >= 3);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unreachable_source_does_not_block_healthy_sources() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    store.insert(aws_record("svc-a"));

    let broken = Arc::new(FailingFetcher::default());
    let aws = Arc::new(RecordingFetcher::new("aws"));
    aws.set("svc-a", vec![function("f1", json!({}))]);
    let registry = FetcherRegistry::new().with(broken.clone()).with(aws.clone());

    let mut service =
        DiscoveryService::new(fast_config(Duration::from_secs(60))?, store.clone(), registry);
    service.start().await?;
    wait_for_functions(&store, "svc-a", &["f1"], Duration::from_secs(5)).await?;
    service.stop().await?;

    assert!(broken.calls() >= 1);
    assert!(service.telemetry().snapshot().fetch_failures >= 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn record_added_later_is_picked_up_by_a_targeted_cycle() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let aws = Arc::new(RecordingFetcher::new("aws"));
    aws.set("svc-a", vec![function("f1", json!({}))]);
    aws.set("svc-b", vec![function("g1", json!({}))]);

    let mut service = DiscoveryService::new(
        fast_config(Duration::from_secs(3600))?,
        store.clone(),
        FetcherRegistry::new().with(aws.clone()),
    );
    service.start().await?;
    wait_until("initial sweep", Duration::from_secs(5), || {
        service.completed_cycles() >= 1
    })
    .await?;

    store.insert(aws_record("svc-b"));
    wait_for_functions(&store, "svc-b", &["g1"], Duration::from_secs(5)).await?;
    service.stop().await?;

    let targeted = aws
        .contexts()
        .into_iter()
        .find(|context| context.scope.is_targeted())
        .context("expected a targeted fetch")?;
    assert!(targeted.scope.includes("svc-b"));
    assert!(!targeted.scope.includes("svc-a"));
    assert!(targeted
        .upstreams
        .iter()
        .any(|upstream| upstream.id == "svc-b" && upstream.upstream_type == "aws"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn catalog_changes_converge_on_following_cycles() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    store.insert(aws_record("svc-a"));
    let aws = Arc::new(RecordingFetcher::new("aws"));
    aws.set("svc-a", vec![function("f1", json!({}))]);

    let mut service = DiscoveryService::new(
        fast_config(Duration::from_millis(50))?,
        store.clone(),
        FetcherRegistry::new().with(aws.clone()),
    );
    service.start().await?;
    wait_for_functions(&store, "svc-a", &["f1"], Duration::from_secs(5)).await?;

    aws.set(
        "svc-a",
        vec![function("f1", json!({})), function("f2", json!({}))],
    );
    let record = wait_for_functions(&store, "svc-a", &["f1", "f2"], Duration::from_secs(5)).await?;

    let writes = store.update_count();
    let cycles = service.completed_cycles();
    wait_until("two more cycles", Duration::from_secs(5), || {
        service.completed_cycles() >= cycles + 2
    })
    .await?;
    service.stop().await?;

    assert_eq!(store.update_count(), writes, "steady state must not rewrite");
    assert_eq!(store.snapshot("svc-a"), Some(record));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deleted_records_stop_being_tracked() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    store.insert(aws_record("svc-a"));
    let aws = Arc::new(RecordingFetcher::new("aws"));
    aws.set("svc-a", vec![function("f1", json!({}))]);

    let mut service = DiscoveryService::new(
        fast_config(Duration::from_millis(50))?,
        store.clone(),
        FetcherRegistry::new().with(aws.clone()),
    );
    service.start().await?;
    wait_for_functions(&store, "svc-a", &["f1"], Duration::from_secs(5)).await?;
    let handle = service.poller_handle();
    assert!(handle.is_tracked("svc-a"));

    store.delete("svc-a");
    wait_until("delete event", Duration::from_secs(5), || {
        !handle.is_tracked("svc-a")
    })
    .await?;
    let cycles = service.completed_cycles();
    wait_until("another cycle", Duration::from_secs(5), || {
        service.completed_cycles() > cycles
    })
    .await?;
    service.stop().await?;

    assert!(store.snapshot("svc-a").is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn service_restarts_after_stop() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    store.insert(aws_record("svc-a"));
    let aws = Arc::new(RecordingFetcher::new("aws"));
    aws.set("svc-a", vec![function("f1", json!({}))]);

    let mut service = DiscoveryService::new(
        fast_config(Duration::from_secs(3600))?,
        store.clone(),
        FetcherRegistry::new().with(aws.clone()),
    );
    service.start().await?;
    wait_for_functions(&store, "svc-a", &["f1"], Duration::from_secs(5)).await?;
    service.stop().await?;

    aws.set("svc-a", vec![function("f2", json!({}))]);
    service.start().await?;
    let record = wait_for_functions(&store, "svc-a", &["f2"], Duration::from_secs(5)).await?;
    service.stop().await?;

    assert_eq!(function_names(&record), vec!["f2"]);
    assert!(aws
        .contexts()
        .iter()
        .all(|context| context.scope == FetchScope::All || context.scope.includes("svc-a")));
    Ok(())
}
