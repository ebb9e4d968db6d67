//! Token-bucket gate for upstream control-plane calls
//!
//! The bucket is the single backpressure mechanism protecting the
//! control plane: every upstream call acquires a token before it is
//! issued, so queueing happens here rather than in the discovery
//! fan-out logic.

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::debug;

use super::RequestType;

/// Shared token bucket applied before every upstream call.
///
/// A configured rate of zero or below disables limiting entirely;
/// `acquire` then returns immediately.
pub struct UpstreamRateLimiter {
    limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    total_wait_ms: AtomicU64,
    waits: AtomicU64,
}

impl UpstreamRateLimiter {
    /// Create a limiter allowing `requests_per_second` steady-state
    /// upstream calls. Fractional rates of 1 and above are rounded to
    /// the nearest whole per-second quota; sub-1 rates are expressed
    /// as a per-minute quota.
    pub fn new(requests_per_second: f64) -> Self {
        let limiter = if requests_per_second <= 0.0 {
            None
        } else if requests_per_second >= 1.0 {
            let per_sec = requests_per_second.round() as u32;
            let quota =
                Quota::per_second(NonZeroU32::new(per_sec).unwrap_or(NonZeroU32::MIN));
            Some(RateLimiter::direct(quota))
        } else {
            let per_min = (requests_per_second * 60.0).round() as u32;
            let quota = Quota::per_minute(NonZeroU32::new(per_min).unwrap_or(NonZeroU32::MIN));
            Some(RateLimiter::direct(quota))
        };

        Self {
            limiter,
            total_wait_ms: AtomicU64::new(0),
            waits: AtomicU64::new(0),
        }
    }

    /// Block until a token is available, recording the wait time for
    /// observability.
    pub async fn acquire(&self, request_type: RequestType) {
        let Some(limiter) = &self.limiter else {
            return;
        };

        // Fast path: a token is available right now, nothing to record.
        if limiter.check().is_ok() {
            return;
        }

        let started = Instant::now();
        limiter.until_ready().await;
        let waited = started.elapsed();

        self.total_wait_ms
            .fetch_add(waited.as_millis() as u64, Ordering::Relaxed);
        self.waits.fetch_add(1, Ordering::Relaxed);
        debug!(
            "rate limiter delayed a {} request by {}ms",
            request_type,
            waited.as_millis()
        );
    }

    /// Accumulated time callers spent waiting for tokens.
    pub fn total_wait_time(&self) -> Duration {
        Duration::from_millis(self.total_wait_ms.load(Ordering::Relaxed))
    }

    /// Number of acquisitions that had to wait.
    pub fn delayed_acquisitions(&self) -> u64 {
        self.waits.load(Ordering::Relaxed)
    }
}
