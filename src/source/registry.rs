use super::fetcher::Fetcher;
use std::sync::Arc;

/// Append-only collection of the fetchers the poller sweeps every cycle.
///
/// The registry is populated by the process wiring and handed to the poller,
/// which takes its own snapshot; the poll loop only ever reads it.
#[derive(Default, Clone)]
pub struct FetcherRegistry {
    fetchers: Vec<Arc<dyn Fetcher>>,
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, fetcher: Arc<dyn Fetcher>) {
        tracing::info!(
            fetcher = fetcher.kind(),
            position = self.fetchers.len(),
            "registered discovery fetcher"
        );
        self.fetchers.push(fetcher);
    }

    pub fn with(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.add(fetcher);
        self
    }

    /// Registered fetchers, in registration order.
    pub fn all(&self) -> &[Arc<dyn Fetcher>] {
        &self.fetchers
    }

    pub fn len(&self) -> usize {
        self.fetchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fetchers.is_empty()
    }
}

impl std::fmt::Debug for FetcherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.fetchers.iter().map(|fetcher| fetcher.kind()))
            .finish()
    }
}
