use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;
use upstream_discovery::{
    DiscoveryConfig, FetchContext, FetchFuture, Fetcher, Function, ManagedRecord, MemoryStore,
    Upstream,
};

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

pub fn fast_config(resync_period: Duration) -> Result<DiscoveryConfig> {
    DiscoveryConfig::builder()
        .resync_period(resync_period)
        .fetch_timeout(Duration::from_millis(500))
        .store_timeout(Duration::from_millis(500))
        .metrics_interval(Duration::from_millis(200))
        .watch_initial_backoff(Duration::from_millis(10))
        .watch_max_backoff(Duration::from_millis(50))
        .build()
}

/// Fetcher with a replaceable catalog that records every context it is
/// handed.
pub struct RecordingFetcher {
    kind: String,
    catalog: Mutex<BTreeMap<String, Vec<Function>>>,
    contexts: Mutex<Vec<FetchContext>>,
}

impl RecordingFetcher {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_owned(),
            catalog: Mutex::new(BTreeMap::new()),
            contexts: Mutex::new(Vec::new()),
        }
    }

    pub fn set(&self, upstream_id: &str, functions: Vec<Function>) {
        self.catalog
            .lock()
            .unwrap()
            .insert(upstream_id.to_owned(), functions);
    }

    pub fn calls(&self) -> usize {
        self.contexts.lock().unwrap().len()
    }

    pub fn contexts(&self) -> Vec<FetchContext> {
        self.contexts.lock().unwrap().clone()
    }
}

impl Fetcher for RecordingFetcher {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn fetch<'a>(&'a self, context: &'a FetchContext) -> FetchFuture<'a> {
        self.contexts.lock().unwrap().push(context.clone());
        let upstreams = self
            .catalog
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| context.scope.includes(id))
            .map(|(id, functions)| Upstream::new(id.clone(), functions.clone()))
            .collect();
        Box::pin(async move { Ok(upstreams) })
    }
}

/// Fetcher whose discovery API is permanently unreachable.
#[derive(Default)]
pub struct FailingFetcher {
    calls: AtomicUsize,
}

impl FailingFetcher {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetcher for FailingFetcher {
    fn kind(&self) -> &str {
        "unreachable"
    }

    fn fetch<'a>(&'a self, _context: &'a FetchContext) -> FetchFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err(anyhow::anyhow!("connection refused")) })
    }
}

/// Fetcher that parks inside `fetch` until released, so tests can act while a
/// cycle is in flight.
pub struct GatedFetcher {
    upstream: Upstream,
    gate: Notify,
    entered: Notify,
    entered_flag: AtomicBool,
}

impl GatedFetcher {
    pub fn new(upstream: Upstream) -> Self {
        Self {
            upstream,
            gate: Notify::new(),
            entered: Notify::new(),
            entered_flag: AtomicBool::new(false),
        }
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }

    pub async fn wait_until_entered(&self, timeout: Duration) -> Result<()> {
        if self.entered_flag.load(Ordering::SeqCst) {
            return Ok(());
        }
        if tokio::time::timeout(timeout, self.entered.notified())
            .await
            .is_err()
            && !self.entered_flag.load(Ordering::SeqCst)
        {
            bail!("fetch gate was not entered within {:?}", timeout);
        }
        Ok(())
    }
}

impl Fetcher for GatedFetcher {
    fn kind(&self) -> &str {
        "gated"
    }

    fn fetch<'a>(&'a self, _context: &'a FetchContext) -> FetchFuture<'a> {
        Box::pin(async move {
            self.entered_flag.store(true, Ordering::SeqCst);
            self.entered.notify_waiters();
            self.gate.notified().await;
            Ok(vec![self.upstream.clone()])
        })
    }
}

pub fn function(name: &str, spec: serde_json::Value) -> Function {
    Function::new(name, spec)
}

pub fn function_names(record: &ManagedRecord) -> Vec<String> {
    record
        .functions()
        .iter()
        .map(|function| function.name.clone())
        .collect()
}

pub async fn wait_until(
    description: &str,
    timeout: Duration,
    mut condition: impl FnMut() -> bool,
) -> Result<()> {
    let start = Instant::now();
    loop {
        if condition() {
            return Ok(());
        }
        if start.elapsed() > timeout {
            bail!("{description} did not happen within {:?}", timeout);
        }
        sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_functions(
    store: &Arc<MemoryStore>,
    id: &str,
    expected: &[&str],
    timeout: Duration,
) -> Result<ManagedRecord> {
    let start = Instant::now();
    loop {
        if let Some(record) = store.snapshot(id) {
            if function_names(&record) == expected {
                return Ok(record);
            }
        }
        if start.elapsed() > timeout {
            let seen = store
                .snapshot(id)
                .map(|record| format!("{:?}", function_names(&record)))
                .unwrap_or_else(|| "<missing>".to_owned());
            bail!(
                "record {id} did not reach functions {expected:?} within {timeout:?} \
                 (last seen: {seen})"
            );
        }
        sleep(Duration::from_millis(10)).await;
    }
}
