//! Read-modify-write of a managed record's function list from one
//! discovered upstream.

use super::controller::Controller;
use crate::source::Upstream;
use crate::store::{to_record_functions, StoreError};
use futures::future::BoxFuture;
use std::sync::Arc;
use thiserror::Error;

pub type UpdateFuture<'a> = BoxFuture<'a, Result<UpdateOutcome, ReconcileError>>;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The function list was replaced and written back.
    Updated,
    /// The record already carried exactly the discovered functions.
    Unchanged,
    /// No record exists for the upstream; nothing was written.
    NotFound,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("unable to look up upstream {upstream}")]
    Lookup {
        upstream: String,
        #[source]
        source: StoreError,
    },
    #[error("unable to update upstream {upstream}")]
    Write {
        upstream: String,
        #[source]
        source: StoreError,
    },
    #[error("upstream {upstream} reported function {function} more than once")]
    DuplicateFunction { upstream: String, function: String },
}

impl ReconcileError {
    pub fn upstream(&self) -> &str {
        match self {
            ReconcileError::Lookup { upstream, .. }
            | ReconcileError::Write { upstream, .. }
            | ReconcileError::DuplicateFunction { upstream, .. } => upstream,
        }
    }

    /// Write lost to a concurrent modification; the next cycle retries with fresh state.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ReconcileError::Write { source, .. } if source.is_conflict())
    }
}

/// Applies one discovered upstream to the store.
pub trait UpstreamUpdater: Send + Sync + 'static {
    fn update(&self, upstream: Upstream) -> UpdateFuture<'_>;
}

pub struct Reconciler {
    controller: Arc<Controller>,
}

impl Reconciler {
    pub fn new(controller: Arc<Controller>) -> Self {
        Self { controller }
    }

    pub async fn reconcile(&self, upstream: Upstream) -> Result<UpdateOutcome, ReconcileError> {
        if let Some(function) = upstream.duplicate_function() {
            return Err(ReconcileError::DuplicateFunction {
                upstream: upstream.id.clone(),
                function: function.to_owned(),
            });
        }

        let lookup = self
            .controller
            .get(&upstream.id)
            .await
            .map_err(|source| ReconcileError::Lookup {
                upstream: upstream.id.clone(),
                source,
            })?;

        let Some(mut record) = lookup else {
            tracing::info!(upstream = %upstream.id, "upstream not found, skipping update");
            return Ok(UpdateOutcome::NotFound);
        };

        let functions = to_record_functions(&upstream.functions);
        if record.spec.functions == functions {
            tracing::debug!(upstream = %upstream.id, "function list already current");
            return Ok(UpdateOutcome::Unchanged);
        }

        tracing::info!(
            upstream = %upstream.id,
            functions = functions.len(),
            previous = record.spec.functions.len(),
            "updating upstream functions"
        );
        record.spec.functions = functions;
        self.controller
            .set(record)
            .await
            .map_err(|source| ReconcileError::Write {
                upstream: upstream.id,
                source,
            })?;

        Ok(UpdateOutcome::Updated)
    }
}

impl UpstreamUpdater for Reconciler {
    fn update(&self, upstream: Upstream) -> UpdateFuture<'_> {
        Box::pin(self.reconcile(upstream))
    }
}
