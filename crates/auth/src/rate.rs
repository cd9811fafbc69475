//! The sliding-window rate limiter.
//!
//! One window per key. Exhaustion yields [`AuthError::RateLimited`] with a
//! retry-after hint derived from the oldest event in the window.

use cortex_telemetry::auth_metrics;
use cortex_types::error::AuthError;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// A sliding-window limiter keyed by API key id (or any string key).
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    default_limit: u32,
    events: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    /// A limiter with the given window and default budget.
    pub fn new(window: Duration, default_limit: u32) -> Self {
        RateLimiter {
            window,
            default_limit,
            events: DashMap::new(),
        }
    }

    /// Records one request against the key. `limit: None` uses the default
    /// budget; keys carry their own `rate_limit` override.
    pub fn check(&self, key: &str, limit: Option<u32>) -> Result<(), AuthError> {
        let limit = limit.unwrap_or(self.default_limit).max(1) as usize;
        let now = Instant::now();
        let mut entry = self.events.entry(key.to_string()).or_default();

        while let Some(front) = entry.front() {
            if now.duration_since(*front) >= self.window {
                entry.pop_front();
            } else {
                break;
            }
        }

        if entry.len() >= limit {
            let retry_after = entry
                .front()
                .map(|oldest| {
                    self.window
                        .saturating_sub(now.duration_since(*oldest))
                        .as_secs()
                        .max(1)
                })
                .unwrap_or(1);
            auth_metrics().inc_rate_limited();
            return Err(AuthError::RateLimited {
                retry_after_secs: retry_after,
            });
        }
        entry.push_back(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_enforced_per_key() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 3);
        for _ in 0..3 {
            limiter.check("a", None).unwrap();
        }
        let err = limiter.check("a", None).unwrap_err();
        assert!(matches!(err, AuthError::RateLimited { retry_after_secs } if retry_after_secs >= 1));
        // Another key is unaffected.
        limiter.check("b", None).unwrap();
    }

    #[test]
    fn per_key_override_wins() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 100);
        limiter.check("k", Some(1)).unwrap();
        assert!(limiter.check("k", Some(1)).is_err());
    }

    #[test]
    fn window_expiry_frees_budget() {
        let limiter = RateLimiter::new(Duration::from_millis(10), 1);
        limiter.check("k", None).unwrap();
        assert!(limiter.check("k", None).is_err());
        std::thread::sleep(Duration::from_millis(15));
        limiter.check("k", None).unwrap();
    }
}
