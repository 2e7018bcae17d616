//! Send rate limiting.
//!
//! The builder asks a [`RateLimiter`] once per send, keyed by a scope (the
//! configured `scope_key`) and an identifier (the sender address).
//!
//! [`TokenBucketLimiter`] is the bundled implementation:
//!
//! ```text
//! burst_size: 5, messages_per_second: 0.5
//! - each (scope, identifier) starts with 5 tokens
//! - every send takes one token
//! - tokens come back at one every two seconds, up to 5
//! ```
//!
//! A bucket that has refilled to capacity behaves exactly like a new one,
//! so full buckets are dropped once `max_buckets` keys are tracked.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Decides whether a send may proceed.
pub trait RateLimiter: Send + Sync {
    /// Returns `true` if one more message may be sent for `identifier`.
    fn allow(&self, scope: &str, identifier: &str) -> bool;
}

/// Token bucket parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Tokens added per second.
    pub messages_per_second: f64,
    /// Bucket capacity.
    pub burst_size: u32,
    /// Number of tracked keys that triggers eviction of full buckets.
    pub max_buckets: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            messages_per_second: 1.0,
            burst_size: 10,
            max_buckets: 10_000,
        }
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(config: &RateLimitConfig, now: Instant) -> Self {
        Self {
            tokens: f64::from(config.burst_size),
            last_refill: now,
        }
    }

    fn available(&self, config: &RateLimitConfig, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        elapsed
            .mul_add(config.messages_per_second, self.tokens)
            .min(f64::from(config.burst_size))
    }

    fn is_full(&self, config: &RateLimitConfig, now: Instant) -> bool {
        self.available(config, now) >= f64::from(config.burst_size)
    }

    fn try_consume(&mut self, config: &RateLimitConfig, now: Instant) -> bool {
        self.tokens = self.available(config, now);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// In-process token bucket per `(scope, identifier)`.
///
/// Safe to share between builders behind an `Arc`. Buckets live in a
/// concurrent map with one lock each, so unrelated senders never contend.
#[derive(Debug, Default)]
pub struct TokenBucketLimiter {
    config: RateLimitConfig,
    buckets: DashMap<(String, String), Arc<Mutex<TokenBucket>>>,
}

impl TokenBucketLimiter {
    /// Creates a limiter with the given parameters.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    /// Parameters in force.
    #[must_use]
    pub const fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Number of `(scope, identifier)` keys currently tracked.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.buckets.len()
    }

    /// Same as [`RateLimiter::allow`] with an explicit clock reading.
    pub fn allow_at(&self, scope: &str, identifier: &str, now: Instant) -> bool {
        let key = (scope.to_string(), identifier.to_string());
        if self.buckets.len() >= self.config.max_buckets && !self.buckets.contains_key(&key) {
            let evicted = self.evict_full(now);
            tracing::debug!(evicted, tracked = self.buckets.len(), "Evicted full rate limit buckets");
        }

        let bucket = self
            .buckets
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::full(&self.config, now))))
            .clone();
        let allowed = bucket.lock().try_consume(&self.config, now);

        if !allowed {
            tracing::debug!(scope, identifier, "Rate limit exceeded");
        }
        allowed
    }

    /// Drops every bucket that has refilled to capacity by `now`.
    ///
    /// Returns how many were removed. A send racing with the removal may
    /// draw from the dropped bucket, which costs at most one extra token.
    pub fn evict_full(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| !bucket.lock().is_full(&self.config, now));
        before.saturating_sub(self.buckets.len())
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn allow(&self, scope: &str, identifier: &str) -> bool {
        self.allow_at(scope, identifier, Instant::now())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limiter(burst_size: u32, messages_per_second: f64) -> TokenBucketLimiter {
        TokenBucketLimiter::new(RateLimitConfig {
            messages_per_second,
            burst_size,
            ..RateLimitConfig::default()
        })
    }

    #[test]
    fn test_burst_then_refuse() {
        let limiter = limiter(3, 1.0);
        let now = Instant::now();
        assert!(limiter.allow_at("email", "a@x.com", now));
        assert!(limiter.allow_at("email", "a@x.com", now));
        assert!(limiter.allow_at("email", "a@x.com", now));
        assert!(!limiter.allow_at("email", "a@x.com", now));
    }

    #[test]
    fn test_refill_over_time() {
        let limiter = limiter(1, 0.5);
        let start = Instant::now();
        assert!(limiter.allow_at("email", "a@x.com", start));
        assert!(!limiter.allow_at("email", "a@x.com", start + Duration::from_secs(1)));
        assert!(limiter.allow_at("email", "a@x.com", start + Duration::from_secs(3)));
    }

    #[test]
    fn test_refill_capped_at_burst() {
        let limiter = limiter(2, 10.0);
        let start = Instant::now();
        assert!(limiter.allow_at("email", "a@x.com", start));
        let later = start + Duration::from_secs(3600);
        assert!(limiter.allow_at("email", "a@x.com", later));
        assert!(limiter.allow_at("email", "a@x.com", later));
        assert!(!limiter.allow_at("email", "a@x.com", later));
    }

    #[test]
    fn test_buckets_are_independent() {
        let limiter = limiter(1, 0.0);
        let now = Instant::now();
        assert!(limiter.allow_at("email", "a@x.com", now));
        assert!(!limiter.allow_at("email", "a@x.com", now));
        assert!(limiter.allow_at("email", "b@x.com", now));
        assert!(limiter.allow_at("digest", "a@x.com", now));
        assert_eq!(limiter.tracked(), 3);
    }

    #[test]
    fn test_zero_burst_refuses_everything() {
        let limiter = limiter(0, 100.0);
        assert!(!limiter.allow("email", "a@x.com"));
    }

    #[test]
    fn test_evict_full_keeps_drained_buckets() {
        let limiter = limiter(2, 1.0);
        let start = Instant::now();
        assert!(limiter.allow_at("email", "a@x.com", start));
        assert!(limiter.allow_at("email", "a@x.com", start));
        assert!(limiter.allow_at("email", "b@x.com", start));

        // b needs one second to refill, a needs two.
        let later = start + Duration::from_millis(1500);
        assert_eq!(limiter.evict_full(later), 1);
        assert_eq!(limiter.tracked(), 1);
        assert!(limiter.allow_at("email", "a@x.com", later));
        assert!(!limiter.allow_at("email", "a@x.com", later));
    }

    #[test]
    fn test_map_is_bounded_by_eviction() {
        let limiter = TokenBucketLimiter::new(RateLimitConfig {
            messages_per_second: 1.0,
            burst_size: 1,
            max_buckets: 4,
        });
        let start = Instant::now();
        for n in 0..4 {
            assert!(limiter.allow_at("email", &format!("s{n}@x.com"), start));
        }
        assert_eq!(limiter.tracked(), 4);

        // Drained buckets are kept even past the bound.
        assert!(limiter.allow_at("email", "s4@x.com", start));
        assert_eq!(limiter.tracked(), 5);

        // Once refilled they are all dropped before the new key goes in.
        let later = start + Duration::from_secs(5);
        assert!(limiter.allow_at("email", "s5@x.com", later));
        assert_eq!(limiter.tracked(), 1);
        assert!(!limiter.allow_at("email", "s5@x.com", later));
    }

    #[test]
    fn test_shared_across_threads() {
        let limiter = Arc::new(limiter(50, 0.0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..25).filter(|_| limiter.allow("email", "a@x.com")).count()
                })
            })
            .collect();
        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 50);
    }

    #[test]
    fn test_config_defaults_from_json() {
        let config: RateLimitConfig = serde_json::from_str(r#"{"burst_size": 4}"#).unwrap();
        assert_eq!(config.burst_size, 4);
        assert_eq!(config.max_buckets, 10_000);
        assert!((config.messages_per_second - 1.0).abs() < f64::EPSILON);
    }
}
