//! Request counters for controller-issued store calls, exposed as aggregated
//! snapshots for the metrics reporter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct StoreMetrics {
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    total_conflicts: AtomicU64,
    total_timeouts: AtomicU64,
    total_latency_ns: AtomicU64,
}

impl StoreMetrics {
    pub fn record_success(&self, latency: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.add_latency(latency);
    }

    pub fn record_failure(&self, latency: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_errors.fetch_add(1, Ordering::Relaxed);
        self.add_latency(latency);
    }

    pub fn record_conflict(&self, latency: Duration) {
        self.record_failure(latency);
        self.total_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self, latency: Duration) {
        self.record_failure(latency);
        self.total_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    fn add_latency(&self, latency: Duration) {
        let nanos = latency.as_nanos().min(u128::from(u64::MAX)) as u64;
        self.total_latency_ns.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StoreMetricsSnapshot {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_errors = self.total_errors.load(Ordering::Relaxed);
        let total_latency_ns = self.total_latency_ns.load(Ordering::Relaxed);

        let (average_latency_ms, error_rate) = if total_requests == 0 {
            (0.0, 0.0)
        } else {
            (
                (total_latency_ns as f64 / total_requests as f64) / 1_000_000.0,
                total_errors as f64 / total_requests as f64,
            )
        };

        StoreMetricsSnapshot {
            total_requests,
            total_errors,
            total_conflicts: self.total_conflicts.load(Ordering::Relaxed),
            total_timeouts: self.total_timeouts.load(Ordering::Relaxed),
            average_latency_ms,
            error_rate,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct StoreMetricsSnapshot {
    pub total_requests: u64,
    pub total_errors: u64,
    pub total_conflicts: u64,
    pub total_timeouts: u64,
    pub average_latency_ms: f64,
    pub error_rate: f64,
}
