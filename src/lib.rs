pub mod runtime;
pub mod secrets;
pub mod source;
pub mod store;
pub mod sync;

pub use runtime::config::{DiscoveryConfig, DiscoveryConfigBuilder, DiscoveryConfigParams};
pub use runtime::runner::Runner;
pub use runtime::service::DiscoveryService;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use secrets::{SecretCache, SecretData, SecretSource};
pub use source::{
    FetchContext, FetchFuture, FetchScope, Fetcher, FetcherRegistry, Function, StaticFetcher,
    TrackedUpstream, Upstream,
};
pub use store::{
    ManagedRecord, MemoryStore, RecordEvent, RecordFunction, ResourceStore, StoreError,
};
pub use sync::{
    Controller, CycleReport, Poller, PollerHandle, PollerHandler, RecordHandler, ReconcileError,
    Reconciler, UpdateOutcome, UpstreamUpdater,
};
