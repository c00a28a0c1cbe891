//! Capability contract shared by every discovery source kind. Concrete
//! sources (cloud function listings, API-description crawlers) live outside
//! this crate and only need to implement [`Fetcher`].

use super::upstream::Upstream;
use anyhow::Result;
use futures::future::BoxFuture;
use std::collections::BTreeSet;

pub type FetchFuture<'a> = BoxFuture<'a, Result<Vec<Upstream>>>;

/// Which upstreams a poll cycle is interested in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchScope {
    /// Timer-driven sweep over everything the source can see.
    All,
    /// Targeted cycle for upstreams the store just announced.
    Only(BTreeSet<String>),
}

impl FetchScope {
    pub fn includes(&self, upstream_id: &str) -> bool {
        match self {
            FetchScope::All => true,
            FetchScope::Only(ids) => ids.contains(upstream_id),
        }
    }

    pub fn is_targeted(&self) -> bool {
        matches!(self, FetchScope::Only(_))
    }
}

/// Store-side view of an upstream, as last observed through the controller
/// watch. Sources use it to find per-upstream settings such as a region or a
/// document URL.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedUpstream {
    pub id: String,
    pub upstream_type: String,
    pub config: serde_json::Value,
}

/// Per-cycle input handed to every fetcher.
#[derive(Debug, Clone)]
pub struct FetchContext {
    pub cycle: u64,
    pub scope: FetchScope,
    pub upstreams: Vec<TrackedUpstream>,
}

impl FetchContext {
    /// Tracked upstreams of the given type that fall inside the cycle scope.
    pub fn upstreams_of_type<'a>(
        &'a self,
        upstream_type: &'a str,
    ) -> impl Iterator<Item = &'a TrackedUpstream> + 'a {
        self.upstreams.iter().filter(move |upstream| {
            upstream.upstream_type == upstream_type && self.scope.includes(&upstream.id)
        })
    }
}

/// Lists upstream function sets for one discovery-source kind.
///
/// Failures are reported as source-specific errors and stay isolated to the
/// fetcher that produced them.
pub trait Fetcher: Send + Sync + 'static {
    /// Short label used in logs and telemetry (e.g. `"aws"`, `"openapi"`).
    fn kind(&self) -> &str;

    fn fetch<'a>(&'a self, context: &'a FetchContext) -> FetchFuture<'a>;
}
