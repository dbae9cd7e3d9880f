//! §6 per-route rate limits (`/publish` 100/s global, `/subscribe` 10/s per
//! callback). The original hub relied on App Engine's quota enforcement for
//! this; there is no equivalent crate in this stack, so it's a small
//! fixed-window counter per key, in the same style as the §4.1 scorer.

use dashmap::DashMap;
use std::time::Duration;
use std::time::Instant;

pub struct RateLimiter {
    max_per_window: f64,
    window: Duration,
    buckets: DashMap<String, (Instant, u32)>,
}

impl RateLimiter {
    pub fn new(max_per_second: f64) -> Self {
        Self { max_per_window: max_per_second, window: Duration::from_secs(1), buckets: DashMap::new() }
    }

    /// Increments `key`'s counter and reports whether this call stays under
    /// the configured rate within the current one-second window.
    pub fn allow(
        &self,
        key: &str,
    ) -> bool {
        let mut entry = self.buckets.entry(key.to_string()).or_insert((Instant::now(), 0));
        if entry.0.elapsed() >= self.window {
            entry.0 = Instant::now();
            entry.1 = 0;
        }
        entry.1 += 1;
        (entry.1 as f64) <= self.max_per_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_configured_rate() {
        let limiter = RateLimiter::new(2.0);
        assert!(limiter.allow("a"));
        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new(1.0);
        assert!(limiter.allow("a"));
        assert!(limiter.allow("b"));
    }
}
