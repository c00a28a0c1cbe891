use std::future::Future;
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryBackoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryBackoff {
    pub(crate) fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay: max_delay.max(initial_delay),
        }
    }
}

/// Outcome of an operation that can be interrupted by shutdown.
#[derive(Debug)]
pub(crate) enum RetryDecision<T> {
    Finished(T),
    Cancelled,
}

/// Retries `operation` with exponential backoff until it succeeds or the
/// token is cancelled. The first attempt runs immediately.
pub(crate) async fn retry_until_cancelled<T, E, F, Fut, L>(
    config: RetryBackoff,
    cancellation: &CancellationToken,
    mut operation: F,
    mut on_retry: L,
) -> RetryDecision<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    L: FnMut(usize, Duration, &E),
{
    let mut attempt = 0;
    let mut backoff = config.initial_delay;

    loop {
        attempt += 1;

        if cancellation.is_cancelled() {
            return RetryDecision::Cancelled;
        }

        match operation(attempt).await {
            Ok(value) => return RetryDecision::Finished(value),
            Err(err) => {
                on_retry(attempt, backoff, &err);
                if !sleep_with_cancellation(backoff, cancellation).await {
                    return RetryDecision::Cancelled;
                }
                backoff = next_backoff(backoff, config.max_delay);
            }
        }
    }
}

/// Sleeps for `delay`; returns `false` if the token fired first.
pub(crate) async fn sleep_with_cancellation(
    delay: Duration,
    cancellation: &CancellationToken,
) -> bool {
    if delay.is_zero() {
        yield_now().await;
        return !cancellation.is_cancelled();
    }

    tokio::select! {
        _ = cancellation.cancelled() => false,
        _ = sleep(delay) => true,
    }
}

fn next_backoff(current: Duration, max_backoff: Duration) -> Duration {
    if current.is_zero() {
        return max_backoff.min(Duration::from_millis(1));
    }

    current.saturating_mul(2).min(max_backoff)
}
