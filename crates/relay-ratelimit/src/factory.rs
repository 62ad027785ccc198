//! Named, pre-configured limiter construction.
//!
//! The factory owns the optional shared-store handle and the clock, and
//! stamps out [`RateLimiter`] handles, one per API surface, each exposing
//! three call shapes: async hybrid `check`, synchronous memory-only
//! `check_sync`, and the Axum middleware in [`crate::middleware`].

use std::{sync::Arc, time::Duration};

use relay_core::Clock;

use crate::{
    hybrid::HybridRateLimiter,
    memory::MemoryRateLimiter,
    types::{RateLimitConfig, RateLimitDecision, SharedRateLimit},
};

/// Builds configured limiter instances sharing one store handle.
pub struct RateLimiterFactory {
    shared: Option<Arc<dyn SharedRateLimit>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RateLimiterFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiterFactory")
            .field("shared", &self.shared.is_some())
            .finish_non_exhaustive()
    }
}

impl RateLimiterFactory {
    /// Creates a factory; `shared` is `None` when no coordination store is
    /// configured, in which case every limiter runs memory-only.
    pub fn new(shared: Option<Arc<dyn SharedRateLimit>>, clock: Arc<dyn Clock>) -> Self {
        Self { shared, clock }
    }

    /// Builds a limiter for an arbitrary configuration.
    pub fn limiter(&self, config: RateLimitConfig) -> RateLimiter {
        let memory = Arc::new(MemoryRateLimiter::new(self.clock.clone()));
        let hybrid = match &self.shared {
            Some(shared) => HybridRateLimiter::new(shared.clone(), memory),
            None => HybridRateLimiter::memory_only(memory),
        };
        RateLimiter { config, hybrid, clock: self.clock.clone() }
    }

    /// General API surface: 100 requests per minute.
    pub fn api(&self) -> RateLimiter {
        self.limiter(RateLimitConfig::new(100, Duration::from_secs(60), "rl:api"))
    }

    /// Authentication surface: 10 attempts per 15 minutes.
    pub fn auth(&self) -> RateLimiter {
        self.limiter(RateLimitConfig::new(10, Duration::from_secs(900), "rl:auth"))
    }

    /// Webhook management surface: 60 requests per minute.
    pub fn webhook(&self) -> RateLimiter {
        self.limiter(RateLimitConfig::new(60, Duration::from_secs(60), "rl:webhook"))
    }
}

/// A configured limiter instance.
///
/// Cheap to share behind an `Arc`; the middleware takes it as Axum state.
pub struct RateLimiter {
    config: RateLimitConfig,
    hybrid: HybridRateLimiter,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").field("config", &self.config).finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Hybrid check: shared store preferred, memory fallback. Never fails.
    pub async fn check(&self, identifier: &str) -> RateLimitDecision {
        self.hybrid.check(identifier, &self.config).await
    }

    /// Memory-only check for synchronous call sites.
    ///
    /// Skips the shared store entirely, so counting is per-process even
    /// when the store is healthy.
    pub fn check_sync(&self, identifier: &str) -> RateLimitDecision {
        self.hybrid.memory().check(identifier, &self.config)
    }

    /// This limiter's configuration.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Epoch milliseconds now, for computing `Retry-After`.
    pub(crate) fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }
}

#[cfg(test)]
mod tests {
    use relay_core::TestClock;

    use super::*;

    #[test]
    fn presets_carry_distinct_prefixes() {
        let factory = RateLimiterFactory::new(None, Arc::new(TestClock::new()));
        assert_eq!(factory.api().config().prefix, "rl:api");
        assert_eq!(factory.auth().config().prefix, "rl:auth");
        assert_eq!(factory.webhook().config().prefix, "rl:webhook");
    }

    #[tokio::test]
    async fn async_and_sync_shapes_share_the_window() {
        let factory = RateLimiterFactory::new(None, Arc::new(TestClock::new()));
        let limiter = factory.limiter(RateLimitConfig::new(
            2,
            Duration::from_secs(60),
            "rl:mixed",
        ));

        assert!(limiter.check("client-a").await.allowed);
        assert!(limiter.check_sync("client-a").allowed);
        assert!(!limiter.check("client-a").await.allowed);
    }
}
