//! Resource-store plumbing: the managed record model, the store capability
//! the controller drives, an in-process store implementation, and request
//! metrics.

pub mod client;
pub mod memory;
pub mod metrics;
pub mod record;

pub use client::{RecordEvent, RecordWatch, ResourceStore, StoreError, StoreFuture};
pub use memory::MemoryStore;
pub use metrics::{StoreMetrics, StoreMetricsSnapshot};
pub use record::{to_record_functions, ManagedRecord, RecordFunction, RecordMetadata, RecordSpec};
