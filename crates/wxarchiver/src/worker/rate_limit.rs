use std::time::Duration;

use tracing::{debug, info, warn};

use crate::source::{RateLimitProbe, WebcamSource};

/// Share of the advertised budget a run is allowed to use, in percent.
const BUDGET_SHARE_PERCENT: u64 = 50;
const NANOS_PER_MINUTE: u64 = 60_000_000_000;

/// Paces requests against the source's per-minute budget.
///
/// The budget is probed once, on first use. Probe failures fall back to the
/// configured static delay; nothing here ever fails a run.
#[derive(Debug)]
pub struct RateLimiter {
    fallback: Duration,
    delay: Option<Duration>,
    skip_next: bool,
}

impl RateLimiter {
    pub fn new(fallback: Duration) -> Self {
        Self {
            fallback,
            delay: None,
            skip_next: false,
        }
    }

    /// A limiter with a known delay that never probes.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            fallback: delay,
            delay: Some(delay),
            skip_next: false,
        }
    }

    /// Delay to wait before the next request. Probes the source the first
    /// time it is called.
    pub async fn delay_before_next_request(&mut self, source: &dyn WebcamSource) -> Duration {
        if std::mem::take(&mut self.skip_next) {
            return Duration::ZERO;
        }
        match self.delay {
            Some(delay) => delay,
            None => {
                let delay = self.probe(source).await;
                self.delay = Some(delay);
                delay
            }
        }
    }

    /// Waits out the delay before the next request.
    pub async fn wait(&mut self, source: &dyn WebcamSource) {
        let delay = self.delay_before_next_request(source).await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// The next request goes out immediately. Used after a not-found, which
    /// costs the source almost nothing.
    pub fn skip_next(&mut self) {
        self.skip_next = true;
    }

    pub fn current_delay(&self) -> Option<Duration> {
        self.delay
    }

    async fn probe(&self, source: &dyn WebcamSource) -> Duration {
        match source.probe_rate_limit().await {
            Ok(probe) => {
                let limit = probe.requests_per_minute();
                let delay = delay_for_limit(limit);
                match probe {
                    RateLimitProbe::Advertised(_) => info!(
                        "Detected API limit {} req/min; using {:.2}s delay",
                        limit,
                        delay.as_secs_f64()
                    ),
                    RateLimitProbe::Anonymous { .. } => debug!(
                        "No advertised rate limit; using anonymous {:.2}s delay",
                        delay.as_secs_f64()
                    ),
                }
                delay
            }
            Err(e) => {
                warn!(
                    "Rate limit probe failed ({}); using default {:.2}s delay",
                    e,
                    self.fallback.as_secs_f64()
                );
                self.fallback
            }
        }
    }
}

/// Delay that keeps a client at half of `requests_per_minute`.
pub fn delay_for_limit(requests_per_minute: u32) -> Duration {
    let limit = u64::from(requests_per_minute.max(1));
    Duration::from_nanos(NANOS_PER_MINUTE * 100 / (limit * BUDGET_SHARE_PERCENT))
}
