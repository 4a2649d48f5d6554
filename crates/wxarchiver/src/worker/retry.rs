use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::source::WebcamSource;
use crate::worker::rate_limit::RateLimiter;

/// Upper bound on a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Bounded retries with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    pub fn from_config(source: &SourceConfig) -> Self {
        Self::new(source.max_retries, source.retry_delay())
    }

    /// Sleep after the `attempt`-th failure (1-based): base, 2×base, 4×base…
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(MAX_BACKOFF)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(5))
    }
}

/// Runs `op` until it succeeds, fails permanently, or attempts run out.
///
/// Every attempt first waits on the rate limiter. A not-found answer is
/// never retried and lets the following request skip its delay.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    limiter: &mut RateLimiter,
    source: &dyn WebcamSource,
    what: &str,
    mut op: F,
) -> Result<T, SourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        limiter.wait(source).await;

        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if err.is_not_found() {
            debug!("{} no longer available: {}", what, err);
            limiter.skip_next();
            return Err(err);
        }
        if !err.is_retryable() {
            return Err(err);
        }

        warn!(
            "Attempt {}/{}: {} failed: {}",
            attempt, policy.attempts, what, err
        );
        if attempt >= policy.attempts {
            return Err(err);
        }

        let mut pause = policy.backoff(attempt);
        if let SourceError::RateLimited {
            retry_after: Some(retry_after),
            ..
        } = &err
        {
            pause = pause.max(*retry_after);
        }
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{AirportSummary, HistoryFrame, RateLimitProbe, WebcamListing};
    use crate::storage::CameraTarget;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct NoSource;

    #[async_trait]
    impl WebcamSource for NoSource {
        async fn probe_rate_limit(&self) -> Result<RateLimitProbe, SourceError> {
            Ok(RateLimitProbe::Advertised(6000))
        }
        async fn list_airports(&self) -> Result<Vec<AirportSummary>, SourceError> {
            Ok(Vec::new())
        }
        async fn list_webcams(&self, _: &str) -> Result<WebcamListing, SourceError> {
            Err(SourceError::Transport("unused".into()))
        }
        async fn list_history(&self, _: &CameraTarget) -> Result<Vec<HistoryFrame>, SourceError> {
            Ok(Vec::new())
        }
        async fn fetch_frame(&self, _: &str) -> Result<Vec<u8>, SourceError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new(4, Duration::from_secs(5));
        assert_eq!(policy.backoff(1), Duration::from_secs(5));
        assert_eq!(policy.backoff(2), Duration::from_secs(10));
        assert_eq!(policy.backoff(3), Duration::from_secs(20));
        assert_eq!(policy.backoff(40), MAX_BACKOFF);
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_errors_then_succeeds() {
        let policy = RetryPolicy::new(3, Duration::from_secs(5));
        let mut limiter = RateLimiter::fixed(Duration::from_secs(1));
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let start = tokio::time::Instant::now();

        let result = with_retry(&policy, &mut limiter, &NoSource, "frame", move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(SourceError::Transport("reset".into()))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // three rate-limit waits plus 5s and 10s of backoff
        assert_eq!(start.elapsed(), Duration::from_secs(18));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_attempts() {
        let policy = RetryPolicy::new(2, Duration::from_secs(1));
        let mut limiter = RateLimiter::fixed(Duration::ZERO);
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), _> =
            with_retry(&policy, &mut limiter, &NoSource, "frame", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(SourceError::Http {
                    status: 502,
                    url: "u".into(),
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_not_retried_and_skips_next_delay() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let mut limiter = RateLimiter::fixed(Duration::from_secs(2));
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), _> =
            with_retry(&policy, &mut limiter, &NoSource, "frame", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(SourceError::NotFound { url: "u".into() })
            })
            .await;

        assert!(result.unwrap_err().is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            limiter.delay_before_next_request(&NoSource).await,
            Duration::ZERO
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_returns_immediately() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1));
        let mut limiter = RateLimiter::fixed(Duration::ZERO);
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), _> =
            with_retry(&policy, &mut limiter, &NoSource, "frame", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(SourceError::InvalidResponse("text/html".into()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
