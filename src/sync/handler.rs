use super::tracked::{PollerHandle, TrackChange};
use crate::store::ManagedRecord;
use std::collections::BTreeSet;

/// Receives store-side change notifications from the [`Controller`](super::Controller).
///
/// Callbacks run on the controller's dispatch loop and must not block.
pub trait RecordHandler: Send + Sync + 'static {
    fn on_add(&self, record: &ManagedRecord);
    fn on_update(&self, record: &ManagedRecord);
    fn on_delete(&self, record: &ManagedRecord);

    /// Called after every (re)subscription with the ids that exist in the
    /// store at that point, before replayed events are dispatched.
    fn on_resync(&self, _live: &BTreeSet<String>) {}
}

/// Bridges record events into poller state so new upstreams are discovered
/// on the next wake-up instead of waiting for the next full sweep.
#[derive(Debug, Clone)]
pub struct PollerHandler {
    poller: PollerHandle,
}

impl PollerHandler {
    pub fn new(poller: PollerHandle) -> Self {
        Self { poller }
    }

    fn observe(&self, record: &ManagedRecord) {
        match self.poller.track(record.tracked()) {
            TrackChange::Unchanged => {}
            change => {
                tracing::debug!(
                    upstream = %record.id(),
                    change = ?change,
                    "requesting discovery for upstream"
                );
                self.poller.request_discovery(record.id());
            }
        }
    }
}

impl RecordHandler for PollerHandler {
    fn on_add(&self, record: &ManagedRecord) {
        self.observe(record);
    }

    // Function-list writes leave type and config untouched, so the
    // reconciler's own updates never retrigger discovery.
    fn on_update(&self, record: &ManagedRecord) {
        self.observe(record);
    }

    fn on_delete(&self, record: &ManagedRecord) {
        if self.poller.untrack(record.id()) {
            tracing::debug!(upstream = %record.id(), "stopped tracking deleted upstream");
        }
    }

    fn on_resync(&self, live: &BTreeSet<String>) {
        for upstream in self.poller.retain_only(live) {
            tracing::debug!(%upstream, "stopped tracking upstream missing from store");
        }
    }
}
