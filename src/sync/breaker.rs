//! Per-fetcher circuit breaker. A source that keeps failing is skipped for a
//! cooldown period so it cannot eat a fetch timeout every cycle; other
//! sources are never affected.

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: usize,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

#[derive(Debug)]
pub struct FetcherBreaker {
    fetcher: String,
    inner: Mutex<BreakerInner>,
    failure_threshold: usize,
    cooldown: Duration,
}

impl FetcherBreaker {
    pub fn new(fetcher: impl Into<String>, failure_threshold: usize, cooldown: Duration) -> Self {
        Self {
            fetcher: fetcher.into(),
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
            failure_threshold: failure_threshold.max(1),
            cooldown: if cooldown.is_zero() {
                Duration::from_secs(1)
            } else {
                cooldown
            },
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("fetcher breaker mutex poisoned").state
    }

    pub fn consecutive_failures(&self) -> usize {
        self.inner
            .lock()
            .expect("fetcher breaker mutex poisoned")
            .consecutive_failures
    }

    /// Whether the fetcher may run this cycle. Reserves the single half-open
    /// trial call when the cooldown has elapsed.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock().expect("fetcher breaker mutex poisoned");

        if inner.state == BreakerState::Open {
            let cooled_down = inner
                .opened_at
                .map(|opened_at| opened_at.elapsed() >= self.cooldown)
                .unwrap_or(true);
            if !cooled_down {
                return false;
            }
            self.transition(&mut inner, BreakerState::HalfOpen);
            inner.trial_in_flight = false;
        }

        if inner.state == BreakerState::HalfOpen {
            if inner.trial_in_flight {
                return false;
            }
            inner.trial_in_flight = true;
        }

        true
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("fetcher breaker mutex poisoned");
        inner.trial_in_flight = false;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        self.transition(&mut inner, BreakerState::Closed);
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("fetcher breaker mutex poisoned");
        inner.trial_in_flight = false;
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        let trip = match inner.state {
            BreakerState::HalfOpen => true,
            BreakerState::Closed => inner.consecutive_failures >= self.failure_threshold,
            BreakerState::Open => false,
        };

        if trip {
            inner.opened_at = Some(Instant::now());
            self.transition(&mut inner, BreakerState::Open);
        }
    }

    fn transition(&self, inner: &mut BreakerInner, next: BreakerState) {
        if inner.state != next {
            tracing::warn!(
                fetcher = %self.fetcher,
                previous = ?inner.state,
                next = ?next,
                consecutive_failures = inner.consecutive_failures,
                "fetcher circuit breaker state changed"
            );
            inner.state = next;
        }
    }
}
