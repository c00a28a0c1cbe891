//! Discovery-side model: discovered upstreams, the fetcher capability every
//! source kind implements, and the registry the poller sweeps each cycle.

pub mod fetcher;
pub mod registry;
pub mod static_source;
pub mod upstream;

pub use fetcher::{FetchContext, FetchFuture, FetchScope, Fetcher, TrackedUpstream};
pub use registry::FetcherRegistry;
pub use static_source::StaticFetcher;
pub use upstream::{Function, Upstream};
