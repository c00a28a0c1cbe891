//! The synchronization core: the controller watching the store, the poller
//! driving discovery, and the reconciler joining the two.

mod backoff;
mod breaker;
mod controller;
mod cycle;
mod handler;
pub(crate) mod lifecycle;
mod poller;
mod reconcile;
mod tracked;

pub use breaker::{BreakerState, FetcherBreaker};
pub use controller::{Controller, ControllerOptions};
pub use cycle::CycleReport;
pub use handler::{PollerHandler, RecordHandler};
pub use poller::{Poller, PollerOptions};
pub use reconcile::{ReconcileError, Reconciler, UpdateFuture, UpdateOutcome, UpstreamUpdater};
pub use tracked::{PollerHandle, TrackChange};
