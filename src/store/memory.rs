//! In-process [`ResourceStore`] with optimistic concurrency and a broadcast
//! change feed. Mirrors the semantics the controller expects from a real
//! store: versioned records, conditional updates, and list-then-watch.

use super::client::{RecordEvent, RecordWatch, ResourceStore, StoreError, StoreFuture};
use super::record::ManagedRecord;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::{self, error::RecvError};

const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
    events: broadcast::Sender<RecordEvent>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    records: BTreeMap<String, ManagedRecord>,
    last_version: u64,
    updates: u64,
}

impl MemoryInner {
    fn next_version(&mut self) -> u64 {
        self.last_version = self.last_version.saturating_add(1);
        self.last_version
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_event_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Mutex::new(MemoryInner::default())),
            events,
        }
    }

    /// Creates or replaces a record unconditionally, as an external actor would.
    pub fn insert(&self, mut record: ManagedRecord) -> ManagedRecord {
        let mut inner = self.inner.lock().expect("memory store mutex poisoned");
        record.metadata.resource_version = inner.next_version();
        let previous = inner
            .records
            .insert(record.metadata.name.clone(), record.clone());
        let event = if previous.is_some() {
            RecordEvent::Modified(record.clone())
        } else {
            RecordEvent::Added(record.clone())
        };
        let _ = self.events.send(event);
        record
    }

    pub fn delete(&self, id: &str) -> Option<ManagedRecord> {
        let mut inner = self.inner.lock().expect("memory store mutex poisoned");
        let removed = inner.records.remove(id)?;
        let _ = self.events.send(RecordEvent::Deleted(removed.clone()));
        Some(removed)
    }

    /// Current stored copy of a record, bypassing the async client surface.
    pub fn snapshot(&self, id: &str) -> Option<ManagedRecord> {
        self.inner
            .lock()
            .expect("memory store mutex poisoned")
            .records
            .get(id)
            .cloned()
    }

    pub fn records(&self) -> Vec<ManagedRecord> {
        self.inner
            .lock()
            .expect("memory store mutex poisoned")
            .records
            .values()
            .cloned()
            .collect()
    }

    /// Number of successful conditional updates accepted so far.
    pub fn update_count(&self) -> u64 {
        self.inner.lock().expect("memory store mutex poisoned").updates
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("memory store mutex poisoned")
            .records
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn apply_update(&self, mut record: ManagedRecord) -> Result<ManagedRecord, StoreError> {
        let mut inner = self.inner.lock().expect("memory store mutex poisoned");
        let id = record.metadata.name.clone();
        let stored_version = match inner.records.get(&id) {
            Some(stored) => stored.metadata.resource_version,
            None => return Err(StoreError::NotFound { id }),
        };

        if stored_version != record.metadata.resource_version {
            return Err(StoreError::Conflict {
                id,
                expected: record.metadata.resource_version,
                actual: stored_version,
            });
        }

        record.metadata.resource_version = inner.next_version();
        inner.updates = inner.updates.saturating_add(1);
        inner.records.insert(id, record.clone());
        let _ = self.events.send(RecordEvent::Modified(record.clone()));
        Ok(record)
    }

    fn open_watch(&self) -> RecordWatch {
        // Subscribe under the lock so no write lands between the listing and the feed.
        let (existing, receiver) = {
            let inner = self.inner.lock().expect("memory store mutex poisoned");
            let existing: Vec<_> = inner.records.values().cloned().collect();
            (existing, self.events.subscribe())
        };

        let replay = stream::iter(
            existing
                .into_iter()
                .map(|record| Ok(RecordEvent::Added(record))),
        );
        let live = stream::unfold(receiver, |mut receiver| async move {
            match receiver.recv().await {
                Ok(event) => Some((Ok(event), receiver)),
                Err(RecvError::Lagged(skipped)) => Some((
                    Err(StoreError::Unavailable(format!(
                        "watch fell behind by {skipped} events"
                    ))),
                    receiver,
                )),
                Err(RecvError::Closed) => None,
            }
        });

        replay.chain(live).boxed()
    }
}

impl ResourceStore for MemoryStore {
    fn get<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<ManagedRecord>> {
        let record = self.snapshot(id);
        Box::pin(async move { Ok(record) })
    }

    fn update(&self, record: ManagedRecord) -> StoreFuture<'_, ManagedRecord> {
        let result = self.apply_update(record);
        Box::pin(async move { result })
    }

    fn list(&self) -> StoreFuture<'_, Vec<ManagedRecord>> {
        let records = self.records();
        Box::pin(async move { Ok(records) })
    }

    fn watch(&self) -> StoreFuture<'_, RecordWatch> {
        let watch = self.open_watch();
        Box::pin(async move { Ok(watch) })
    }
}
