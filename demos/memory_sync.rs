use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use upstream_discovery::{
    DiscoveryConfig, FetcherRegistry, Function, ManagedRecord, MemoryStore, Runner, StaticFetcher,
};

const DEFAULT_RESYNC_SECS: u64 = 10;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_CONCURRENT_UPDATES: usize = 8;
const DEFAULT_UPSTREAMS: usize = 5;
const DEFAULT_DRIFT_SECS: u64 = 3;
const DEFAULT_LOG_DIRECTIVE: &str = "info";

#[tokio::main]
async fn main() -> Result<()> {
    init_example_tracing();

    let args = ExampleArgs::from_env()?;
    let config = args.to_config()?;

    let store = Arc::new(MemoryStore::new());
    let catalog = Arc::new(StaticFetcher::new("aws"));
    for index in 0..args.upstreams {
        let id = upstream_id(index);
        store.insert(
            ManagedRecord::new(&id, "aws", json!({"region": "us-east-1"}))
                .with_label("demo", "memory-sync"),
        );
        catalog.set_upstream(&id, functions_for(index, 0));
    }
    // Discovered but never registered in the store: logged and skipped.
    catalog.set_upstream("unregistered", functions_for(0, 0));

    let registry = FetcherRegistry::new().with(catalog.clone());
    let mut runner = Runner::new(config, store.clone(), registry);

    let drift_token = CancellationToken::new();
    let drift = spawn_catalog_drift(
        catalog,
        store.clone(),
        args.upstreams,
        Duration::from_secs(args.drift_secs),
        drift_token.clone(),
    );

    let result = runner.run_until_ctrl_c().await;
    drift_token.cancel();
    let _ = drift.await;

    let telemetry = runner.service().telemetry().snapshot();
    println!(
        "cycles={} updated={} unchanged={} missing={} failed={} records={}",
        telemetry.cycles,
        telemetry.records_updated,
        telemetry.records_unchanged,
        telemetry.records_missing,
        telemetry.update_failures,
        store.len()
    );

    result
}

fn init_example_tracing() {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", DEFAULT_LOG_DIRECTIVE);
    }
    upstream_discovery::init_tracing();
}

fn upstream_id(index: usize) -> String {
    format!("svc-{index}")
}

fn functions_for(index: usize, revision: u64) -> Vec<Function> {
    (0..=revision % 3)
        .map(|n| {
            let name = format!("fn-{index}-{n}");
            let arn = format!("arn:aws:lambda:us-east-1:000000000000:function:{name}");
            Function::new(name, json!({"arn": arn, "revision": revision}))
        })
        .collect()
}

/// Changes one upstream's function list per tick and, once, registers a
/// new record so the targeted discovery path is exercised.
fn spawn_catalog_drift(
    catalog: Arc<StaticFetcher>,
    store: Arc<MemoryStore>,
    upstreams: usize,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.tick().await;
        let mut revision = 0u64;
        let mut registered_late = false;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    revision += 1;
                    let index = (revision as usize) % upstreams.max(1);
                    catalog.set_upstream(upstream_id(index), functions_for(index, revision));

                    if !registered_late {
                        store.insert(ManagedRecord::new("unregistered", "aws", json!({})));
                        registered_late = true;
                    }
                }
            }
        }
    })
}

struct ExampleArgs {
    resync_secs: u64,
    fetch_timeout_secs: u64,
    max_concurrent_updates: usize,
    upstreams: usize,
    drift_secs: u64,
}

impl ExampleArgs {
    fn from_env() -> Result<Self> {
        Ok(Self {
            resync_secs: parse_env_with_default("DISCOVERY_RESYNC_SECS", DEFAULT_RESYNC_SECS)?,
            fetch_timeout_secs: parse_env_with_default(
                "DISCOVERY_FETCH_TIMEOUT_SECS",
                DEFAULT_FETCH_TIMEOUT_SECS,
            )?,
            max_concurrent_updates: parse_env_with_default(
                "DISCOVERY_MAX_CONCURRENT_UPDATES",
                DEFAULT_MAX_CONCURRENT_UPDATES,
            )?,
            upstreams: parse_env_with_default("DISCOVERY_UPSTREAMS", DEFAULT_UPSTREAMS)?,
            drift_secs: parse_env_with_default("DISCOVERY_DRIFT_SECS", DEFAULT_DRIFT_SECS)?,
        })
    }

    fn to_config(&self) -> Result<DiscoveryConfig> {
        DiscoveryConfig::builder()
            .resync_period(Duration::from_secs(self.resync_secs))
            .fetch_timeout(Duration::from_secs(self.fetch_timeout_secs))
            .max_concurrent_updates(self.max_concurrent_updates)
            .build()
            .context("invalid discovery configuration")
    }
}

fn parse_env_with_default<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("failed to parse {key}='{value}'")),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("failed to read {key}")),
    }
}
