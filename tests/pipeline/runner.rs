use std::sync::Arc;
use std::time::Duration;

use crate::support::helpers::{
    fast_config, function, init_tracing, wait_for_functions, wait_until, RecordingFetcher,
};
use anyhow::{Context, Result};
use serde_json::json;
use tokio::time::{sleep, timeout};
use upstream_discovery::{
    DiscoveryService, FetcherRegistry, ManagedRecord, MemoryStore, Runner, SecretCache,
    SecretData, SecretSource,
};
use upstream_discovery::secrets::SecretFuture;

struct StaticSecrets;

impl SecretSource for StaticSecrets {
    fn load(&self) -> SecretFuture<'_> {
        Box::pin(async {
            let data = SecretData::from_base64([("accessKey", "QUtJQQ==")])?;
            Ok([("aws-credentials".to_string(), data)].into_iter().collect())
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_exits_when_token_is_cancelled() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    store.insert(ManagedRecord::new("svc-a", "aws", json!({})));
    let aws = Arc::new(RecordingFetcher::new("aws"));
    aws.set("svc-a", vec![function("f1", json!({}))]);

    let mut runner = Runner::new(
        fast_config(Duration::from_millis(50))?,
        store.clone(),
        FetcherRegistry::new().with(aws.clone()),
    );
    let token = runner.cancellation_token();

    let run = tokio::spawn(async move {
        runner.run_until_ctrl_c().await?;
        Ok::<_, anyhow::Error>(runner)
    });

    wait_for_functions(&store, "svc-a", &["f1"], Duration::from_secs(5)).await?;
    token.cancel();

    let runner = timeout(Duration::from_secs(5), run)
        .await
        .context("runner did not stop after cancellation")???;
    assert!(!runner.service().is_running());
    assert!(!runner.cancellation_token().is_cancelled());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_can_start_again_after_stop() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    store.insert(ManagedRecord::new("svc-a", "aws", json!({})));
    let aws = Arc::new(RecordingFetcher::new("aws"));
    aws.set("svc-a", vec![function("f1", json!({}))]);

    let mut runner = Runner::new(
        fast_config(Duration::from_secs(3600))?,
        store.clone(),
        FetcherRegistry::new().with(aws.clone()),
    );

    runner.start().await?;
    wait_for_functions(&store, "svc-a", &["f1"], Duration::from_secs(5)).await?;
    runner.stop().await?;
    let calls = aws.calls();

    aws.set("svc-a", vec![function("f2", json!({}))]);
    runner.start().await?;
    wait_for_functions(&store, "svc-a", &["f2"], Duration::from_secs(5)).await?;
    runner.stop().await?;

    assert!(aws.calls() > calls);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn secrets_are_loaded_before_the_first_cycle() -> Result<()> {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(SecretCache::new());
    let service = DiscoveryService::new(
        fast_config(Duration::from_secs(3600))?,
        store,
        FetcherRegistry::new(),
    )
    .with_secrets(Arc::new(StaticSecrets), cache.clone());

    let mut runner = Runner::with_service(service);
    runner.start().await?;
    wait_until("first cycle", Duration::from_secs(5), || {
        runner.service().completed_cycles() >= 1
    })
    .await?;

    let credentials = cache
        .get("aws-credentials")
        .context("secret should be cached")?;
    assert_eq!(credentials.get_str("accessKey"), Some("AKIA"));

    runner.stop().await?;
    sleep(Duration::from_millis(10)).await;
    assert_eq!(cache.generation(), 1);
    Ok(())
}
