//! Rate limiting (component H, step 2): a token bucket per client when a
//! client id is available, else one shared global bucket. Built on
//! `qrwc_connectors::TokenBucket`; internal errors fail open (traffic is
//! never blocked by a rate-limiter bug).

use dashmap::DashMap;
use qrwc_connectors::TokenBucket;
use qrwc_config::RateLimitSection;
use std::sync::Mutex;

pub struct RateLimiter {
    requests_per_minute: u32,
    burst_size: u32,
    per_client: bool,
    buckets: DashMap<String, Mutex<TokenBucket>>,
    global: Mutex<TokenBucket>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitOutcome {
    pub allowed: bool,
    pub retry_after_secs: f64,
}

impl RateLimiter {
    pub fn new(config: &RateLimitSection) -> Self {
        let refill_per_sec = config.requests_per_minute as f64 / 60.0;
        Self {
            requests_per_minute: config.requests_per_minute,
            burst_size: config.burst_size,
            per_client: config.per_client,
            buckets: DashMap::new(),
            global: Mutex::new(TokenBucket::new(config.burst_size, refill_per_sec)),
        }
    }

    /// `client_id` is `None` when the transport can't identify the caller
    /// (e.g. an unauthenticated stdio session); such calls always share
    /// the global bucket regardless of `per_client`.
    pub fn check(&self, client_id: Option<&str>) -> RateLimitOutcome {
        let key = match (self.per_client, client_id) {
            (true, Some(id)) => Some(id),
            _ => None,
        };

        match key {
            Some(id) => {
                let refill_per_sec = self.requests_per_minute as f64 / 60.0;
                let entry = self.buckets.entry(id.to_string()).or_insert_with(|| {
                    Mutex::new(TokenBucket::new(self.burst_size, refill_per_sec))
                });
                let mut bucket = match entry.lock() {
                    Ok(guard) => guard,
                    Err(_) => return RateLimitOutcome { allowed: true, retry_after_secs: 0.0 },
                };
                let allowed = bucket.try_acquire();
                RateLimitOutcome {
                    allowed,
                    retry_after_secs: if allowed { 0.0 } else { bucket.retry_after_secs() },
                }
            }
            None => {
                let mut bucket = match self.global.lock() {
                    Ok(guard) => guard,
                    Err(_) => return RateLimitOutcome { allowed: true, retry_after_secs: 0.0 },
                };
                let allowed = bucket.try_acquire();
                RateLimitOutcome {
                    allowed,
                    retry_after_secs: if allowed { 0.0 } else { bucket.retry_after_secs() },
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(per_client: bool) -> RateLimitSection {
        RateLimitSection {
            requests_per_minute: 60,
            burst_size: 10,
            per_client,
        }
    }

    #[test]
    fn global_bucket_allows_exactly_burst_size_then_limits() {
        let limiter = RateLimiter::new(&config(false));
        let mut allowed = 0;
        for _ in 0..20 {
            if limiter.check(None).allowed {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 10);
    }

    #[test]
    fn per_client_buckets_are_independent() {
        let limiter = RateLimiter::new(&config(true));
        for _ in 0..10 {
            assert!(limiter.check(Some("client-a")).allowed);
        }
        assert!(!limiter.check(Some("client-a")).allowed);
        assert!(limiter.check(Some("client-b")).allowed);
    }

    #[test]
    fn denied_outcome_reports_retry_after() {
        let limiter = RateLimiter::new(&config(false));
        for _ in 0..10 {
            limiter.check(None);
        }
        let outcome = limiter.check(None);
        assert!(!outcome.allowed);
        assert!(outcome.retry_after_secs > 0.0);
    }
}
