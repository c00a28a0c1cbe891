use crate::runtime::config::DiscoveryConfig;
use crate::runtime::service::DiscoveryService;
use crate::source::FetcherRegistry;
use crate::store::ResourceStore;
use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Coordinates the discovery service lifecycle and handles OS signals for graceful shutdowns.
pub struct Runner {
    service: DiscoveryService,
    shutdown: CancellationToken,
    started: bool,
}

impl Runner {
    /// Builds a [`DiscoveryService`] over `store` and `registry`. Cancelling
    /// the runner's token stops the service and everything it spawned.
    pub fn new(
        config: DiscoveryConfig,
        store: Arc<dyn ResourceStore>,
        registry: FetcherRegistry,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let service =
            DiscoveryService::with_cancellation_token(config, store, registry, shutdown.clone());
        Self::from_service(service, shutdown)
    }

    /// Wraps an already configured service, e.g. one built with secrets.
    pub fn with_service(mut service: DiscoveryService) -> Self {
        let shutdown = CancellationToken::new();
        service.replace_shutdown_root(shutdown.clone());
        Self::from_service(service, shutdown)
    }

    fn from_service(service: DiscoveryService, shutdown: CancellationToken) -> Self {
        Self {
            service,
            shutdown,
            started: false,
        }
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn service(&self) -> &DiscoveryService {
        &self.service
    }

    pub async fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }

        self.service.start().await?;
        self.started = true;
        Ok(())
    }

    /// Stops the service gracefully by cancelling the root token and joining its tasks.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }

        self.shutdown.cancel();
        let result = self.service.stop().await;
        self.started = false;
        self.reinitialize_shutdown_token();
        result
    }

    /// Runs until a Ctrl-C (SIGINT) is received or the shutdown token is cancelled elsewhere.
    pub async fn run_until_ctrl_c(&mut self) -> Result<()> {
        self.start().await?;
        tracing::info!("runner started; waiting for Ctrl-C (SIGINT) to initiate shutdown");

        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; shutting down runner");
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("runner shutdown token cancelled");
            }
        }

        self.stop().await
    }

    fn reinitialize_shutdown_token(&mut self) {
        self.shutdown = CancellationToken::new();
        self.service.replace_shutdown_root(self.shutdown.clone());
    }
}
