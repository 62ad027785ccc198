//! Shared types for the rate limiter family.

use std::{future::Future, pin::Pin, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Immutable limiter configuration, supplied at construction time.
///
/// `limit` is signed so that non-positive limits are representable: a
/// limiter configured with `limit <= 0` denies every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum requests per window.
    pub limit: i64,
    /// Window length in milliseconds.
    pub window_ms: u64,
    /// Key prefix namespacing this limiter's counters in shared storage.
    pub prefix: String,
}

impl RateLimitConfig {
    /// Creates a configuration for `limit` requests per `window`.
    pub fn new(limit: i64, window: Duration, prefix: impl Into<String>) -> Self {
        Self {
            limit,
            window_ms: u64::try_from(window.as_millis()).unwrap_or(u64::MAX),
            prefix: prefix.into(),
        }
    }

    /// Window length as a `Duration`.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Full storage key for an identifier under this limiter's prefix.
    pub fn key_for(&self, identifier: &str) -> String {
        format!("{}:{}", self.prefix, identifier)
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Configured limit, echoed for response headers.
    pub limit: i64,
    /// Requests remaining in the current window.
    pub remaining: i64,
    /// Requests counted in the current window, including this one when
    /// allowed.
    pub current: i64,
    /// Epoch milliseconds at which the window resets.
    pub reset_at_ms: u64,
}

impl RateLimitDecision {
    /// Seconds until the window resets, rounded up and at least 1.
    ///
    /// Used for `Retry-After`; a zero value would tell clients to retry
    /// immediately.
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        let remaining_ms = self.reset_at_ms.saturating_sub(now_ms);
        remaining_ms.div_ceil(1000).max(1)
    }

    /// Epoch seconds of the window reset, for `X-RateLimit-Reset`.
    pub fn reset_at_secs(&self) -> u64 {
        self.reset_at_ms / 1000
    }
}

/// A rate limit check backed by shared storage, which can fail.
///
/// The hybrid limiter composes over this seam so tests can inject failing
/// or canned primaries without a live coordination store.
pub trait SharedRateLimit: Send + Sync {
    /// Checks whether `identifier` may proceed under `config`.
    ///
    /// Connectivity errors must propagate: returning an allow on store
    /// failure would defeat the fallback layering.
    fn check<'a>(
        &'a self,
        identifier: &'a str,
        config: &'a RateLimitConfig,
    ) -> Pin<Box<dyn Future<Output = Result<RateLimitDecision>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_combines_prefix_and_identifier() {
        let config = RateLimitConfig::new(10, Duration::from_secs(60), "rl:api");
        assert_eq!(config.key_for("203.0.113.9"), "rl:api:203.0.113.9");
    }

    #[test]
    fn retry_after_rounds_up_and_floors_at_one() {
        let decision = RateLimitDecision {
            allowed: false,
            limit: 10,
            remaining: 0,
            current: 10,
            reset_at_ms: 10_500,
        };
        assert_eq!(decision.retry_after_secs(10_000), 1);
        assert_eq!(decision.retry_after_secs(9_000), 2);
        // Window already reset: still advise a minimum of one second.
        assert_eq!(decision.retry_after_secs(11_000), 1);
    }
}
