//! Poller-side view of the records the controller has announced, plus the
//! wake-up used to request out-of-band discovery.

use crate::source::TrackedUpstream;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Result of recording a store-side upstream with the poller.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TrackChange {
    New,
    Changed,
    Unchanged,
}

/// Cloneable handle the controller's handler uses to feed the poller.
#[derive(Debug, Clone, Default)]
pub struct PollerHandle {
    shared: Arc<PollerShared>,
}

#[derive(Debug, Default)]
struct PollerShared {
    state: Mutex<TrackedState>,
    wake: Notify,
}

#[derive(Debug, Default)]
struct TrackedState {
    upstreams: BTreeMap<String, TrackedUpstream>,
    pending: BTreeSet<String>,
}

impl PollerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, upstream: TrackedUpstream) -> TrackChange {
        let mut state = self.lock();
        match state.upstreams.get(&upstream.id) {
            Some(existing) if *existing == upstream => TrackChange::Unchanged,
            Some(_) => {
                state.upstreams.insert(upstream.id.clone(), upstream);
                TrackChange::Changed
            }
            None => {
                state.upstreams.insert(upstream.id.clone(), upstream);
                TrackChange::New
            }
        }
    }

    pub fn untrack(&self, upstream_id: &str) -> bool {
        let mut state = self.lock();
        state.pending.remove(upstream_id);
        state.upstreams.remove(upstream_id).is_some()
    }

    /// Drops every tracked upstream whose id is not in `live`, along with any
    /// pending request for it. Returns the ids that were dropped.
    pub fn retain_only(&self, live: &BTreeSet<String>) -> Vec<String> {
        let mut state = self.lock();
        let stale: Vec<String> = state
            .upstreams
            .keys()
            .filter(|id| !live.contains(*id))
            .cloned()
            .collect();
        for id in &stale {
            state.upstreams.remove(id);
        }
        state.pending.retain(|id| live.contains(id));
        stale
    }

    /// Queues a targeted discovery cycle for `upstream_id`. Requests made
    /// before the poller wakes up are coalesced into one cycle.
    pub fn request_discovery(&self, upstream_id: impl Into<String>) {
        self.lock().pending.insert(upstream_id.into());
        self.shared.wake.notify_one();
    }

    pub fn is_tracked(&self, upstream_id: &str) -> bool {
        self.lock().upstreams.contains_key(upstream_id)
    }

    pub fn tracked(&self) -> Vec<TrackedUpstream> {
        self.lock().upstreams.values().cloned().collect()
    }

    pub fn tracked_len(&self) -> usize {
        self.lock().upstreams.len()
    }

    pub fn pending(&self) -> BTreeSet<String> {
        self.lock().pending.clone()
    }

    pub(crate) fn take_pending(&self) -> Option<BTreeSet<String>> {
        let pending = std::mem::take(&mut self.lock().pending);
        if pending.is_empty() {
            None
        } else {
            Some(pending)
        }
    }

    pub(crate) async fn requested(&self) {
        self.shared.wake.notified().await;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackedState> {
        self.shared.state.lock().expect("poller state mutex poisoned")
    }
}
