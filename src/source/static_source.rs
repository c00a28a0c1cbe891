//! Source kind backed by an in-memory catalog. Useful for fixed function sets
//! that are maintained by configuration rather than discovered remotely.

use super::fetcher::{FetchContext, FetchFuture, Fetcher};
use super::upstream::{Function, Upstream};
use std::collections::BTreeMap;
use std::sync::RwLock;

#[derive(Debug)]
pub struct StaticFetcher {
    kind: String,
    catalog: RwLock<BTreeMap<String, Vec<Function>>>,
}

impl StaticFetcher {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            catalog: RwLock::new(BTreeMap::new()),
        }
    }

    /// Replaces the advertised function list for `upstream_id`.
    pub fn set_upstream(&self, upstream_id: impl Into<String>, functions: Vec<Function>) {
        self.catalog
            .write()
            .expect("static catalog lock poisoned")
            .insert(upstream_id.into(), functions);
    }

    pub fn remove_upstream(&self, upstream_id: &str) -> bool {
        self.catalog
            .write()
            .expect("static catalog lock poisoned")
            .remove(upstream_id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.catalog.read().expect("static catalog lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Fetcher for StaticFetcher {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn fetch<'a>(&'a self, context: &'a FetchContext) -> FetchFuture<'a> {
        let upstreams: Vec<Upstream> = self
            .catalog
            .read()
            .expect("static catalog lock poisoned")
            .iter()
            .filter(|(id, _)| context.scope.includes(id))
            .map(|(id, functions)| Upstream::new(id.clone(), functions.clone()))
            .collect();
        Box::pin(async move { Ok(upstreams) })
    }
}
