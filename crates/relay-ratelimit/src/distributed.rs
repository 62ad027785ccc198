//! Sliding-window rate limiter backed by the shared coordination store.
//!
//! Each identifier maps to a sorted set of attempt timestamps. One Lua
//! script prunes, counts, and conditionally inserts in a single atomic
//! round-trip, so concurrent callers can never both observe `current <
//! limit` and sneak past the limit together. Store errors propagate to the
//! caller; the hybrid layer owns the fallback decision.

use std::{future::Future, pin::Pin, sync::Arc};

use redis::{aio::ConnectionManager, Script};
use relay_core::Clock;
use uuid::Uuid;

use crate::{
    error::{RateLimitError, Result},
    types::{RateLimitConfig, RateLimitDecision, SharedRateLimit},
};

/// Atomic sliding-window check.
///
/// KEYS[1]  per-identifier sorted set
/// ARGV[1]  now (epoch ms), ARGV[2] window ms, ARGV[3] limit, ARGV[4] member
///
/// Returns `{allowed, remaining, current, reset_at_ms}`. When denied,
/// `reset_at_ms` derives from the oldest surviving entry so callers learn
/// when capacity opens up, falling back to a full window from now if the
/// set emptied between prune and read.
const SLIDING_WINDOW_SCRIPT: &str = r"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local member = ARGV[4]

redis.call('ZREMRANGEBYSCORE', key, 0, now - window)
local current = redis.call('ZCARD', key)

if current < limit then
  redis.call('ZADD', key, now, member)
  redis.call('PEXPIRE', key, window)
  return {1, limit - current - 1, current + 1, now + window}
end

local reset_at = now + window
local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
if oldest[2] then
  reset_at = tonumber(oldest[2]) + window
end
return {0, 0, current, reset_at}
";

/// Sliding-log limiter over the shared coordination store.
///
/// Source of truth for rate decisions while the store is reachable. A
/// "not connected" or transport failure is an error, never an allow.
#[derive(Clone)]
pub struct DistributedRateLimiter {
    conn: ConnectionManager,
    script: Arc<Script>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for DistributedRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedRateLimiter").finish_non_exhaustive()
    }
}

impl DistributedRateLimiter {
    /// Creates a limiter over an established connection.
    pub fn new(conn: ConnectionManager, clock: Arc<dyn Clock>) -> Self {
        Self { conn, script: Arc::new(Script::new(SLIDING_WINDOW_SCRIPT)), clock }
    }

    /// Connects to the coordination store at `url`.
    pub async fn connect(url: &str, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn, clock))
    }

    /// Checks whether `identifier` may proceed under `config`.
    pub async fn check(
        &self,
        identifier: &str,
        config: &RateLimitConfig,
    ) -> Result<RateLimitDecision> {
        let now_ms = self.clock.now_millis();

        // Non-positive limits deny without a round-trip, matching the
        // memory limiter so fallback behavior is identical for this case.
        if config.limit <= 0 {
            return Ok(RateLimitDecision {
                allowed: false,
                limit: config.limit,
                remaining: 0,
                current: 0,
                reset_at_ms: now_ms + config.window_ms,
            });
        }

        // Uniquified member: two callers in the same millisecond must not
        // collapse into one set entry.
        let member = format!("{now_ms}-{}", Uuid::new_v4());

        let mut conn = self.conn.clone();
        let reply: Vec<i64> = self
            .script
            .key(config.key_for(identifier))
            .arg(now_ms)
            .arg(config.window_ms)
            .arg(config.limit)
            .arg(member)
            .invoke_async(&mut conn)
            .await?;

        decision_from_reply(&reply, config, now_ms)
    }
}

fn decision_from_reply(
    reply: &[i64],
    config: &RateLimitConfig,
    now_ms: u64,
) -> Result<RateLimitDecision> {
    let [allowed, remaining, current, reset_at_ms] = reply else {
        return Err(RateLimitError::store_unavailable(format!(
            "unexpected script reply of length {}",
            reply.len()
        )));
    };

    Ok(RateLimitDecision {
        allowed: *allowed == 1,
        limit: config.limit,
        remaining: *remaining,
        current: *current,
        reset_at_ms: u64::try_from(*reset_at_ms).unwrap_or(now_ms + config.window_ms),
    })
}

impl SharedRateLimit for DistributedRateLimiter {
    fn check<'a>(
        &'a self,
        identifier: &'a str,
        config: &'a RateLimitConfig,
    ) -> Pin<Box<dyn Future<Output = Result<RateLimitDecision>> + Send + 'a>> {
        Box::pin(self.check(identifier, config))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn config(limit: i64) -> RateLimitConfig {
        RateLimitConfig::new(limit, Duration::from_secs(60), "rl:test")
    }

    #[test]
    fn reply_maps_to_decision() {
        let decision =
            decision_from_reply(&[1, 4, 6, 1_060_000], &config(10), 1_000_000).expect("valid");
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
        assert_eq!(decision.current, 6);
        assert_eq!(decision.reset_at_ms, 1_060_000);
    }

    #[test]
    fn short_reply_is_a_store_error() {
        let result = decision_from_reply(&[1, 4], &config(10), 1_000_000);
        assert!(matches!(result, Err(RateLimitError::StoreUnavailable { .. })));
    }
}
