//! Availability-first composition of the two limiter implementations.
//!
//! Prefers the shared sliding-window result; on *any* store error, answers
//! from the in-process fixed-window limiter instead. During an outage,
//! limits degrade from global to per-process, an intentional trade of
//! strict accuracy for availability. The fallback is transparent: the
//! caller receives exactly what the memory limiter would have returned for
//! the same call.

use std::sync::Arc;

use tracing::warn;

use crate::{
    memory::MemoryRateLimiter,
    types::{RateLimitConfig, RateLimitDecision, SharedRateLimit},
};

/// Shared-store limiter with in-process fallback.
pub struct HybridRateLimiter {
    shared: Option<Arc<dyn SharedRateLimit>>,
    memory: Arc<MemoryRateLimiter>,
}

impl std::fmt::Debug for HybridRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridRateLimiter")
            .field("shared", &self.shared.is_some())
            .finish_non_exhaustive()
    }
}

impl HybridRateLimiter {
    /// Creates a hybrid limiter over a shared store.
    pub fn new(shared: Arc<dyn SharedRateLimit>, memory: Arc<MemoryRateLimiter>) -> Self {
        Self { shared: Some(shared), memory }
    }

    /// Creates a limiter with no shared store; every check answers locally.
    pub fn memory_only(memory: Arc<MemoryRateLimiter>) -> Self {
        Self { shared: None, memory }
    }

    /// Checks whether `identifier` may proceed under `config`.
    ///
    /// Never fails: store errors are logged and absorbed by falling back to
    /// the memory limiter.
    pub async fn check(&self, identifier: &str, config: &RateLimitConfig) -> RateLimitDecision {
        if let Some(shared) = &self.shared {
            match shared.check(identifier, config).await {
                Ok(decision) => return decision,
                Err(error) => {
                    warn!(
                        identifier,
                        prefix = %config.prefix,
                        error = %error,
                        "shared rate limit check failed, falling back to in-process window"
                    );
                },
            }
        }
        self.memory.check(identifier, config)
    }

    /// The in-process fallback limiter.
    pub fn memory(&self) -> &Arc<MemoryRateLimiter> {
        &self.memory
    }
}

#[cfg(test)]
mod tests {
    use std::{future::Future, pin::Pin, time::Duration};

    use relay_core::TestClock;

    use super::*;
    use crate::error::{RateLimitError, Result};

    /// Primary that always fails, simulating a store outage.
    struct UnreachableStore;

    impl SharedRateLimit for UnreachableStore {
        fn check<'a>(
            &'a self,
            _identifier: &'a str,
            _config: &'a RateLimitConfig,
        ) -> Pin<Box<dyn Future<Output = Result<RateLimitDecision>> + Send + 'a>> {
            Box::pin(async { Err(RateLimitError::store_unavailable("connection refused")) })
        }
    }

    /// Primary that always allows with a recognizable decision.
    struct CannedStore;

    impl SharedRateLimit for CannedStore {
        fn check<'a>(
            &'a self,
            _identifier: &'a str,
            config: &'a RateLimitConfig,
        ) -> Pin<Box<dyn Future<Output = Result<RateLimitDecision>> + Send + 'a>> {
            let limit = config.limit;
            Box::pin(async move {
                Ok(RateLimitDecision {
                    allowed: true,
                    limit,
                    remaining: limit - 1,
                    current: 1,
                    reset_at_ms: 42,
                })
            })
        }
    }

    fn config() -> RateLimitConfig {
        RateLimitConfig::new(3, Duration::from_secs(60), "rl:test")
    }

    #[tokio::test]
    async fn prefers_shared_result_when_available() {
        let clock = Arc::new(TestClock::new());
        let memory = Arc::new(MemoryRateLimiter::new(clock));
        let hybrid = HybridRateLimiter::new(Arc::new(CannedStore), memory);

        let decision = hybrid.check("client-a", &config()).await;
        assert_eq!(decision.reset_at_ms, 42);
    }

    #[tokio::test]
    async fn fallback_matches_memory_limiter_exactly() {
        let clock = Arc::new(TestClock::new());
        let config = config();

        // Reference limiter fed the same sequence of calls.
        let reference = MemoryRateLimiter::new(clock.clone());

        let memory = Arc::new(MemoryRateLimiter::new(clock));
        let hybrid = HybridRateLimiter::new(Arc::new(UnreachableStore), memory);

        for _ in 0..5 {
            let expected = reference.check("client-a", &config);
            let actual = hybrid.check("client-a", &config).await;
            assert_eq!(actual, expected);
        }
    }

    #[tokio::test]
    async fn memory_only_mode_answers_locally() {
        let clock = Arc::new(TestClock::new());
        let memory = Arc::new(MemoryRateLimiter::new(clock));
        let hybrid = HybridRateLimiter::memory_only(memory);

        let decision = hybrid.check("client-a", &config()).await;
        assert!(decision.allowed);
        assert_eq!(decision.current, 1);
    }
}
