//! Background tasks that make up one run of the discovery service.

use super::controller::Controller;
use super::poller::Poller;
use crate::runtime::telemetry::{self, Telemetry};
use crate::secrets::{self, SecretCache, SecretSource};
use anyhow::{anyhow, Error};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Secret source and the cache it keeps fresh.
#[derive(Clone)]
pub(crate) struct SecretWiring {
    pub source: Arc<dyn SecretSource>,
    pub cache: Arc<SecretCache>,
}

pub(crate) struct LifecycleHandles {
    pub run_token: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

pub(crate) struct LifecycleSpawnParams<'a> {
    pub shutdown_root: &'a CancellationToken,
    pub telemetry: Arc<Telemetry>,
    pub metrics_interval: Duration,
    pub secrets: Option<SecretWiring>,
    pub secret_refresh_interval: Duration,
    pub controller: Arc<Controller>,
    pub poller: Arc<Poller>,
    pub resync_period: Duration,
}

impl LifecycleHandles {
    /// Spawns every task under a child of `shutdown_root`, so cancelling
    /// either the root or the run token stops them all.
    pub(crate) fn spawn(params: LifecycleSpawnParams<'_>) -> Self {
        let LifecycleSpawnParams {
            shutdown_root,
            telemetry,
            metrics_interval,
            secrets,
            secret_refresh_interval,
            controller,
            poller,
            resync_period,
        } = params;

        let run_token = shutdown_root.child_token();
        let mut tasks = Vec::with_capacity(4);

        tasks.push((
            "metrics reporter",
            telemetry::spawn_metrics_reporter(
                telemetry,
                controller.metrics(),
                run_token.clone(),
                metrics_interval,
            ),
        ));

        if let Some(SecretWiring { source, cache }) = secrets {
            tasks.push((
                "secret refresher",
                secrets::spawn_refresh_loop(
                    source,
                    cache,
                    secret_refresh_interval,
                    run_token.clone(),
                ),
            ));
        }

        tasks.push(("poller", poller.start(resync_period, run_token.clone())));

        let controller_token = run_token.clone();
        tasks.push((
            "record controller",
            tokio::spawn(async move { controller.run(controller_token).await }),
        ));

        Self { run_token, tasks }
    }

    /// Cancels the run and joins every task. Returns the first task failure.
    pub(crate) async fn shutdown(self) -> Option<Error> {
        self.run_token.cancel();

        let mut first_error = None;
        for (name, handle) in self.tasks {
            if let Err(err) = handle.await {
                tracing::warn!(
                    task = name,
                    error = %err,
                    "background task terminated unexpectedly"
                );
                first_error.get_or_insert_with(|| anyhow!("{name} task failed: {err}"));
            }
        }
        first_error
    }
}
