use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use std::time::Duration;

const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STORE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_CONCURRENT_UPDATES: usize = 8;
const DEFAULT_SECRET_REFRESH_INTERVAL_SECS: u64 = 60;
const DEFAULT_BREAKER_FAILURE_THRESHOLD: usize = 5;
const DEFAULT_BREAKER_COOLDOWN_SECS: u64 = 60;
const DEFAULT_WATCH_INITIAL_BACKOFF_MS: u64 = 200;
const DEFAULT_WATCH_MAX_BACKOFF_SECS: u64 = 5;

/// Runtime configuration for the discovery service.
///
/// All instances must be constructed via [`DiscoveryConfig::builder`] or
/// [`DiscoveryConfig::new`] so invariants are validated before any consumer
/// observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    resync_period: Duration,
    fetch_timeout: Duration,
    store_timeout: Duration,
    max_concurrent_updates: usize,
    metrics_interval: Duration,
    secret_refresh_interval: Duration,
    breaker_failure_threshold: usize,
    breaker_cooldown: Duration,
    watch_initial_backoff: Duration,
    watch_max_backoff: Duration,
}

pub struct DiscoveryConfigParams {
    pub resync_period: Duration,
    pub fetch_timeout: Duration,
    pub store_timeout: Duration,
    pub max_concurrent_updates: usize,
    pub metrics_interval: Duration,
    pub secret_refresh_interval: Duration,
    pub breaker_failure_threshold: usize,
    pub breaker_cooldown: Duration,
    pub watch_initial_backoff: Duration,
    pub watch_max_backoff: Duration,
}

impl DiscoveryConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> DiscoveryConfigBuilder {
        DiscoveryConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    pub fn new(params: DiscoveryConfigParams) -> Result<Self> {
        let DiscoveryConfigParams {
            resync_period,
            fetch_timeout,
            store_timeout,
            max_concurrent_updates,
            metrics_interval,
            secret_refresh_interval,
            breaker_failure_threshold,
            breaker_cooldown,
            watch_initial_backoff,
            watch_max_backoff,
        } = params;

        let config = Self {
            resync_period,
            fetch_timeout,
            store_timeout,
            max_concurrent_updates,
            metrics_interval,
            secret_refresh_interval,
            breaker_failure_threshold,
            breaker_cooldown,
            watch_initial_backoff,
            watch_max_backoff,
        };

        config.validate()?;
        Ok(config)
    }

    /// Interval between full discovery sweeps.
    pub fn resync_period(&self) -> Duration {
        self.resync_period
    }

    /// Upper bound on a single fetcher invocation.
    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Upper bound on a single store call issued by the controller.
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    /// Number of distinct upstreams reconciled concurrently within a cycle.
    pub fn max_concurrent_updates(&self) -> usize {
        self.max_concurrent_updates
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Interval between credential reloads.
    pub fn secret_refresh_interval(&self) -> Duration {
        self.secret_refresh_interval
    }

    /// Consecutive failures after which a fetcher is skipped.
    pub fn breaker_failure_threshold(&self) -> usize {
        self.breaker_failure_threshold
    }

    /// How long a tripped fetcher stays skipped before a trial call.
    pub fn breaker_cooldown(&self) -> Duration {
        self.breaker_cooldown
    }

    pub fn watch_initial_backoff(&self) -> Duration {
        self.watch_initial_backoff
    }

    pub fn watch_max_backoff(&self) -> Duration {
        self.watch_max_backoff
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        if self.resync_period.is_zero() {
            bail!("resync_period must be greater than 0");
        }

        if self.fetch_timeout.is_zero() {
            bail!("fetch_timeout must be greater than 0");
        }

        if self.store_timeout.is_zero() {
            bail!("store_timeout must be greater than 0");
        }

        if self.max_concurrent_updates == 0 {
            bail!("max_concurrent_updates must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        if self.secret_refresh_interval.is_zero() {
            bail!("secret_refresh_interval must be greater than 0");
        }

        if self.breaker_failure_threshold == 0 {
            bail!("breaker_failure_threshold must be greater than 0");
        }

        if self.breaker_cooldown.is_zero() {
            bail!("breaker_cooldown must be greater than 0");
        }

        if self.watch_initial_backoff.is_zero() {
            bail!("watch_initial_backoff must be greater than 0");
        }

        if self.watch_max_backoff < self.watch_initial_backoff {
            bail!(
                "watch_max_backoff ({:?}) must be at least watch_initial_backoff ({:?})",
                self.watch_max_backoff,
                self.watch_initial_backoff,
            );
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct DiscoveryConfigBuilder {
    resync_period: Option<Duration>,
    fetch_timeout: Option<Duration>,
    store_timeout: Option<Duration>,
    max_concurrent_updates: Option<usize>,
    metrics_interval: Option<Duration>,
    secret_refresh_interval: Option<Duration>,
    breaker_failure_threshold: Option<usize>,
    breaker_cooldown: Option<Duration>,
    watch_initial_backoff: Option<Duration>,
    watch_max_backoff: Option<Duration>,
}

impl DiscoveryConfigBuilder {
    pub fn resync_period(mut self, period: Duration) -> Self {
        self.resync_period = Some(period);
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = Some(timeout);
        self
    }

    pub fn max_concurrent_updates(mut self, count: usize) -> Self {
        self.max_concurrent_updates = Some(count);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn secret_refresh_interval(mut self, interval: Duration) -> Self {
        self.secret_refresh_interval = Some(interval);
        self
    }

    pub fn breaker_failure_threshold(mut self, failures: usize) -> Self {
        self.breaker_failure_threshold = Some(failures);
        self
    }

    pub fn breaker_cooldown(mut self, cooldown: Duration) -> Self {
        self.breaker_cooldown = Some(cooldown);
        self
    }

    pub fn watch_initial_backoff(mut self, backoff: Duration) -> Self {
        self.watch_initial_backoff = Some(backoff);
        self
    }

    pub fn watch_max_backoff(mut self, backoff: Duration) -> Self {
        self.watch_max_backoff = Some(backoff);
        self
    }

    pub fn build(self) -> Result<DiscoveryConfig> {
        let params = DiscoveryConfigParams {
            resync_period: self.resync_period.context("resync_period is required")?,
            fetch_timeout: self
                .fetch_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS)),
            store_timeout: self
                .store_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_STORE_TIMEOUT_SECS)),
            max_concurrent_updates: self
                .max_concurrent_updates
                .unwrap_or(DEFAULT_MAX_CONCURRENT_UPDATES),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            secret_refresh_interval: self
                .secret_refresh_interval
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_SECRET_REFRESH_INTERVAL_SECS)),
            breaker_failure_threshold: self
                .breaker_failure_threshold
                .unwrap_or(DEFAULT_BREAKER_FAILURE_THRESHOLD),
            breaker_cooldown: self
                .breaker_cooldown
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_BREAKER_COOLDOWN_SECS)),
            watch_initial_backoff: self
                .watch_initial_backoff
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_WATCH_INITIAL_BACKOFF_MS)),
            watch_max_backoff: self
                .watch_max_backoff
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_WATCH_MAX_BACKOFF_SECS)),
        };

        DiscoveryConfig::new(params)
    }
}
