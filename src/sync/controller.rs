//! Owns access to the resource store for managed records: bounded get/set
//! calls for the reconciler, and the watch loop that feeds record handlers.

use super::backoff::{retry_until_cancelled, sleep_with_cancellation, RetryBackoff, RetryDecision};
use super::handler::RecordHandler;
use crate::runtime::config::DiscoveryConfig;
use crate::runtime::telemetry::Telemetry;
use crate::store::{
    ManagedRecord, RecordEvent, RecordWatch, ResourceStore, StoreError, StoreFuture, StoreMetrics,
};
use futures::StreamExt;
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct ControllerOptions {
    pub store_timeout: Duration,
    pub watch_initial_backoff: Duration,
    pub watch_max_backoff: Duration,
}

impl ControllerOptions {
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self {
            store_timeout: config.store_timeout(),
            watch_initial_backoff: config.watch_initial_backoff(),
            watch_max_backoff: config.watch_max_backoff(),
        }
    }
}

enum WatchExit {
    Cancelled,
    Interrupted,
}

pub struct Controller {
    store: Arc<dyn ResourceStore>,
    handlers: RwLock<Vec<Arc<dyn RecordHandler>>>,
    store_timeout: Duration,
    watch_backoff: RetryBackoff,
    metrics: Arc<StoreMetrics>,
    telemetry: Arc<Telemetry>,
}

impl Controller {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        options: ControllerOptions,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            store,
            handlers: RwLock::new(Vec::new()),
            store_timeout: options.store_timeout,
            watch_backoff: RetryBackoff::new(
                options.watch_initial_backoff,
                options.watch_max_backoff,
            ),
            metrics: Arc::new(StoreMetrics::default()),
            telemetry,
        }
    }

    pub fn metrics(&self) -> Arc<StoreMetrics> {
        self.metrics.clone()
    }

    /// Looks up the record for an upstream. `Ok(None)` means the record does
    /// not exist; errors are reserved for store-access failures.
    pub async fn get(&self, id: &str) -> Result<Option<ManagedRecord>, StoreError> {
        self.bounded("get", self.store.get(id)).await
    }

    /// Writes back a record that was previously read and then mutated.
    /// Conflicts from concurrent writers are returned, never swallowed.
    pub async fn set(&self, record: ManagedRecord) -> Result<ManagedRecord, StoreError> {
        self.bounded("update", self.store.update(record)).await
    }

    pub fn add_handler(&self, handler: Arc<dyn RecordHandler>) {
        self.handlers
            .write()
            .expect("controller handlers lock poisoned")
            .push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers
            .read()
            .expect("controller handlers lock poisoned")
            .len()
    }

    /// Runs the watch dispatch loop until `shutdown` fires. Failed or closed
    /// subscriptions are re-established with backoff.
    ///
    /// Every subscription is followed by a listing, and handlers are told
    /// which records exist before any event is dispatched. Deletes dropped
    /// while the previous watch was lagging are recovered this way.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(handlers = self.handler_count(), "record controller started");

        loop {
            let (watch, records) = match retry_until_cancelled(
                self.watch_backoff,
                &shutdown,
                |_| async move {
                    let watch = self.bounded("watch", self.store.watch()).await?;
                    let records = self.bounded("list", self.store.list()).await?;
                    Ok::<_, StoreError>((watch, records))
                },
                |attempt, backoff, err: &StoreError| {
                    tracing::warn!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "failed to subscribe to record changes; retrying"
                    );
                },
            )
            .await
            {
                RetryDecision::Finished(subscribed) => subscribed,
                RetryDecision::Cancelled => break,
            };
            self.resync(&records);

            match self.drain(watch, &shutdown).await {
                WatchExit::Cancelled => break,
                WatchExit::Interrupted => {
                    if !sleep_with_cancellation(self.watch_backoff.initial_delay, &shutdown).await
                    {
                        break;
                    }
                }
            }
        }

        tracing::info!("record controller stopped");
    }

    async fn drain(&self, mut watch: RecordWatch, shutdown: &CancellationToken) -> WatchExit {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return WatchExit::Cancelled,
                next = watch.next() => match next {
                    Some(Ok(event)) => self.dispatch(&event),
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "record watch failed; resubscribing");
                        return WatchExit::Interrupted;
                    }
                    None => {
                        tracing::warn!("record watch ended; resubscribing");
                        return WatchExit::Interrupted;
                    }
                },
            }
        }
    }

    fn resync(&self, records: &[ManagedRecord]) {
        let live: BTreeSet<String> = records
            .iter()
            .map(|record| record.id().to_owned())
            .collect();
        tracing::debug!(records = live.len(), "resyncing handlers with listed records");
        for handler in self.handlers() {
            handler.on_resync(&live);
        }
    }

    fn handlers(&self) -> Vec<Arc<dyn RecordHandler>> {
        self.handlers
            .read()
            .expect("controller handlers lock poisoned")
            .clone()
    }

    fn dispatch(&self, event: &RecordEvent) {
        self.telemetry.record_store_event();
        let record = event.record();
        tracing::debug!(
            upstream = %record.id(),
            event = event.kind(),
            resource_version = record.resource_version(),
            "dispatching record event"
        );

        for handler in self.handlers() {
            match event {
                RecordEvent::Added(record) => handler.on_add(record),
                RecordEvent::Modified(record) => handler.on_update(record),
                RecordEvent::Deleted(record) => handler.on_delete(record),
            }
        }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: StoreFuture<'_, T>,
    ) -> Result<T, StoreError> {
        let started = Instant::now();
        match timeout(self.store_timeout, call).await {
            Ok(Ok(value)) => {
                self.metrics.record_success(started.elapsed());
                Ok(value)
            }
            Ok(Err(err)) => {
                if err.is_conflict() {
                    self.metrics.record_conflict(started.elapsed());
                } else {
                    self.metrics.record_failure(started.elapsed());
                }
                Err(err)
            }
            Err(_) => {
                self.metrics.record_timeout(started.elapsed());
                Err(StoreError::Timeout { operation })
            }
        }
    }
}
