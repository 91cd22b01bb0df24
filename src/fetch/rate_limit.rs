//! Request pacing for target sites and the language model

use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::trace;

/// Minimum spacing between requests to one host
#[derive(Clone)]
pub struct HostRateLimiter {
    inner: Arc<Mutex<HostSlot>>,
}

struct HostSlot {
    last_request: Option<Instant>,
    min_interval: Duration,
}

impl HostRateLimiter {
    pub fn new(requests_per_second: f64) -> Self {
        let min_interval = if requests_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / requests_per_second)
        } else {
            Duration::ZERO
        };

        Self {
            inner: Arc::new(Mutex::new(HostSlot {
                last_request: None,
                min_interval,
            })),
        }
    }

    /// Wait until the host may be contacted again
    pub async fn wait(&self) {
        let mut slot = self.inner.lock().await;

        if let Some(last) = slot.last_request {
            let elapsed = last.elapsed();
            if elapsed < slot.min_interval {
                let pause = slot.min_interval - elapsed;
                trace!("Host pacing: waiting {:?}", pause);
                tokio::time::sleep(pause).await;
            }
        }

        slot.last_request = Some(Instant::now());
    }
}

/// Lazily created per-host limiters
#[derive(Clone)]
pub struct HostRateLimiters {
    requests_per_second: f64,
    hosts: Arc<RwLock<HashMap<String, HostRateLimiter>>>,
}

impl HostRateLimiters {
    pub fn new(requests_per_second: f64) -> Self {
        Self {
            requests_per_second,
            hosts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn wait(&self, host: &str) {
        let limiter = {
            let mut hosts = self.hosts.write().await;
            hosts
                .entry(host.to_string())
                .or_insert_with(|| HostRateLimiter::new(self.requests_per_second))
                .clone()
        };
        limiter.wait().await;
    }
}

/// Process-wide throttle for model requests
pub struct RequestThrottle {
    limiter: RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl RequestThrottle {
    pub fn per_minute(requests_per_minute: u32) -> Self {
        let rpm = NonZeroU32::new(requests_per_minute).unwrap_or(nonzero!(1u32));
        Self {
            limiter: RateLimiter::direct(Quota::per_minute(rpm)),
        }
    }

    pub async fn wait(&self) {
        self.limiter.until_ready().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_host_rate_limiter_spacing() {
        let limiter = HostRateLimiter::new(10.0);

        let start = std::time::Instant::now();
        limiter.wait().await;
        limiter.wait().await;
        limiter.wait().await;

        assert!(start.elapsed() >= Duration::from_millis(180));
    }

    #[tokio::test]
    async fn test_hosts_are_independent() {
        let limiters = HostRateLimiters::new(1.0);

        let start = std::time::Instant::now();
        limiters.wait("a.example").await;
        limiters.wait("b.example").await;
        limiters.wait("c.example").await;

        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_request_throttle_allows_burst() {
        let throttle = RequestThrottle::per_minute(600);
        for _ in 0..5 {
            throttle.wait().await;
        }
    }
}
