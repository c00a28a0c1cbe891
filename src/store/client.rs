//! Capability contract for the external resource store, plus the error and
//! event types the controller surfaces to the rest of the crate.

use super::record::ManagedRecord;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use thiserror::Error;

pub type StoreFuture<'a, T> = BoxFuture<'a, Result<T, StoreError>>;

/// Change notifications delivered by a store watch.
pub type RecordWatch = BoxStream<'static, Result<RecordEvent, StoreError>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record {id} not found")]
    NotFound { id: String },
    #[error("record {id} was modified concurrently (expected version {expected}, found {actual})")]
    Conflict {
        id: String,
        expected: u64,
        actual: u64,
    },
    #[error("store {operation} timed out")]
    Timeout { operation: &'static str },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store watch closed")]
    WatchClosed,
}

impl StoreError {
    /// True when the store rejected a write because the record changed since it was read.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, StoreError::Timeout { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordEvent {
    Added(ManagedRecord),
    Modified(ManagedRecord),
    Deleted(ManagedRecord),
}

impl RecordEvent {
    pub fn record(&self) -> &ManagedRecord {
        match self {
            RecordEvent::Added(record)
            | RecordEvent::Modified(record)
            | RecordEvent::Deleted(record) => record,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RecordEvent::Added(_) => "added",
            RecordEvent::Modified(_) => "modified",
            RecordEvent::Deleted(_) => "deleted",
        }
    }
}

/// Client for one managed record kind.
///
/// Implementations own their transport-level timeouts; the controller adds
/// its own bound on top.
pub trait ResourceStore: Send + Sync + 'static {
    /// Returns `Ok(None)` when the record is simply absent.
    fn get<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<ManagedRecord>>;

    /// Writes the full record back, conditional on `metadata.resource_version`
    /// still matching the stored version. Returns the record as stored.
    fn update(&self, record: ManagedRecord) -> StoreFuture<'_, ManagedRecord>;

    /// Every record that currently exists.
    fn list(&self) -> StoreFuture<'_, Vec<ManagedRecord>>;

    /// Subscribes to change notifications. The stream starts with an
    /// [`RecordEvent::Added`] for every record that already exists.
    fn watch(&self) -> StoreFuture<'_, RecordWatch>;
}
