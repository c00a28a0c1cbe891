//! Top-level wiring: builds the controller, poller and reconciler from one
//! configuration and runs them under a shared cancellation root.

use crate::runtime::config::DiscoveryConfig;
use crate::runtime::telemetry::Telemetry;
use crate::secrets::{self, SecretCache, SecretSource};
use crate::source::FetcherRegistry;
use crate::store::ResourceStore;
use crate::sync::lifecycle::{LifecycleHandles, LifecycleSpawnParams, SecretWiring};
use crate::sync::{
    Controller, ControllerOptions, Poller, PollerHandle, PollerHandler, PollerOptions, Reconciler,
};
use anyhow::{bail, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct DiscoveryService {
    config: DiscoveryConfig,
    controller: Arc<Controller>,
    poller: Arc<Poller>,
    telemetry: Arc<Telemetry>,
    secrets: Option<SecretWiring>,
    shutdown_root: CancellationToken,
    lifecycle: Option<LifecycleHandles>,
}

impl DiscoveryService {
    pub fn new(
        config: DiscoveryConfig,
        store: Arc<dyn ResourceStore>,
        registry: FetcherRegistry,
    ) -> Self {
        Self::with_cancellation_token(config, store, registry, CancellationToken::new())
    }

    /// Like [`DiscoveryService::new`], but every run derives its tasks'
    /// cancellation from `shutdown`.
    pub fn with_cancellation_token(
        config: DiscoveryConfig,
        store: Arc<dyn ResourceStore>,
        registry: FetcherRegistry,
        shutdown: CancellationToken,
    ) -> Self {
        debug_assert!(
            config.validate().is_ok(),
            "DiscoveryConfig should have been validated at construction time"
        );

        let telemetry = Arc::new(Telemetry::default());
        let controller = Arc::new(Controller::new(
            store,
            ControllerOptions::from_config(&config),
            telemetry.clone(),
        ));
        let handle = PollerHandle::new();
        let poller = Arc::new(Poller::new(
            &registry,
            Arc::new(Reconciler::new(controller.clone())),
            handle.clone(),
            telemetry.clone(),
            PollerOptions::from_config(&config),
        ));
        controller.add_handler(Arc::new(PollerHandler::new(handle)));

        Self {
            config,
            controller,
            poller,
            telemetry,
            secrets: None,
            shutdown_root: shutdown,
            lifecycle: None,
        }
    }

    /// Keeps `cache` loaded from `source` while the service runs.
    pub fn with_secrets(mut self, source: Arc<dyn SecretSource>, cache: Arc<SecretCache>) -> Self {
        self.secrets = Some(SecretWiring { source, cache });
        self
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    pub fn controller(&self) -> Arc<Controller> {
        self.controller.clone()
    }

    /// Handle for requesting targeted discovery from outside the watch.
    pub fn poller_handle(&self) -> PollerHandle {
        self.poller.handle()
    }

    pub fn completed_cycles(&self) -> u64 {
        self.poller.completed_cycles()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_some()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown_root.clone()
    }

    /// Replaces the root shutdown token. Only valid between `stop` and `start`.
    pub fn replace_shutdown_root(&mut self, shutdown: CancellationToken) {
        debug_assert!(
            !self.is_running(),
            "shutdown token should not change while the service is running"
        );
        self.shutdown_root = shutdown;
    }

    /// Starts the controller watch loop, the poller and the supporting tasks.
    ///
    /// Returns an error if the service is already running.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            bail!("discovery service already running");
        }

        if let Some(wiring) = &self.secrets {
            match secrets::refresh_once(wiring.source.as_ref(), &wiring.cache).await {
                Ok(count) => tracing::debug!(secrets = count, "initial secrets loaded"),
                Err(err) => tracing::warn!(
                    error = %format!("{err:#}"),
                    "failed to load initial secrets; continuing until refresh succeeds"
                ),
            }
        }

        tracing::info!(
            resync_period_ms = self.config.resync_period().as_millis() as u64,
            max_concurrent_updates = self.config.max_concurrent_updates(),
            "starting discovery service"
        );

        self.lifecycle = Some(LifecycleHandles::spawn(LifecycleSpawnParams {
            shutdown_root: &self.shutdown_root,
            telemetry: self.telemetry.clone(),
            metrics_interval: self.config.metrics_interval(),
            secrets: self.secrets.clone(),
            secret_refresh_interval: self.config.secret_refresh_interval(),
            controller: self.controller.clone(),
            poller: self.poller.clone(),
            resync_period: self.config.resync_period(),
        }));

        Ok(())
    }

    /// Cancels the current run and waits for every task to finish. An
    /// in-flight poll cycle completes first.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(lifecycle) = self.lifecycle.take() else {
            return Ok(());
        };

        tracing::info!("stopping discovery service");
        if let Some(err) = lifecycle.shutdown().await {
            return Err(err.context("discovery service aborted"));
        }

        tracing::info!(cycles = self.poller.completed_cycles(), "discovery service stopped");
        Ok(())
    }

    /// Starts, waits for the root token to be cancelled, then stops.
    pub async fn run_until_cancelled(&mut self) -> Result<()> {
        self.start().await?;
        self.shutdown_root.cancelled().await;
        self.stop().await
    }
}
