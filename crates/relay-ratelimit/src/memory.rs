//! Process-local fixed-window rate limiter.
//!
//! The cheap half of the limiter family: one counter per identifier that
//! resets at discrete window boundaries. Bursts straddling a boundary can
//! briefly exceed the configured rate, an accepted approximation of the
//! sliding log kept by the distributed limiter. Storage is bounded: expired
//! records are swept periodically and, past a hard ceiling, the
//! oldest-resetting entries are evicted first.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use relay_core::Clock;

use crate::types::{RateLimitConfig, RateLimitDecision};

/// How often expired records are swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Hard ceiling on tracked identifiers.
const MAX_ENTRIES: usize = 10_000;

/// Per-identifier fixed-window counter state.
#[derive(Debug, Clone, Copy)]
struct RateLimitState {
    count: i64,
    reset_at_ms: u64,
}

#[derive(Debug)]
struct Shard {
    entries: HashMap<String, RateLimitState>,
    last_sweep_ms: u64,
}

/// Local fixed-window counter with periodic eviction.
///
/// Checks are synchronous and infallible, which is what makes this usable
/// both stand-alone (the `check_sync` call shape) and as the always-available
/// fallback behind [`crate::HybridRateLimiter`].
#[derive(Debug)]
pub struct MemoryRateLimiter {
    clock: Arc<dyn Clock>,
    shard: Mutex<Shard>,
}

impl MemoryRateLimiter {
    /// Creates a limiter using the given clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let now_ms = clock.now_millis();
        Self {
            clock,
            shard: Mutex::new(Shard { entries: HashMap::new(), last_sweep_ms: now_ms }),
        }
    }

    /// Checks whether `identifier` may proceed under `config`.
    ///
    /// Fixed-window: the first request in a window creates a counter that
    /// resets `window_ms` later; subsequent requests increment it. A
    /// non-positive limit always denies.
    pub fn check(&self, identifier: &str, config: &RateLimitConfig) -> RateLimitDecision {
        let now_ms = self.clock.now_millis();

        let mut shard = match self.shard.lock() {
            Ok(shard) => shard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if now_ms.saturating_sub(shard.last_sweep_ms) >= sweep_interval_ms() {
            shard.entries.retain(|_, state| state.reset_at_ms > now_ms);
            shard.last_sweep_ms = now_ms;
        }

        if config.limit <= 0 {
            return RateLimitDecision {
                allowed: false,
                limit: config.limit,
                remaining: 0,
                current: 0,
                reset_at_ms: now_ms + config.window_ms,
            };
        }

        let key = config.key_for(identifier);
        let live = match shard.entries.get_mut(&key) {
            Some(state) if state.reset_at_ms > now_ms => {
                state.count += 1;
                Some(*state)
            },
            _ => None,
        };

        let state = match live {
            Some(state) => state,
            None => {
                if shard.entries.len() >= MAX_ENTRIES && !shard.entries.contains_key(&key) {
                    let excess = shard.entries.len() - MAX_ENTRIES + 1;
                    evict_oldest(&mut shard.entries, excess);
                }
                let fresh =
                    RateLimitState { count: 1, reset_at_ms: now_ms + config.window_ms };
                shard.entries.insert(key, fresh);
                fresh
            },
        };

        RateLimitDecision {
            allowed: state.count <= config.limit,
            limit: config.limit,
            remaining: (config.limit - state.count).max(0),
            current: state.count,
            reset_at_ms: state.reset_at_ms,
        }
    }

    /// Number of identifiers currently tracked.
    pub fn tracked_identifiers(&self) -> usize {
        match self.shard.lock() {
            Ok(shard) => shard.entries.len(),
            Err(poisoned) => poisoned.into_inner().entries.len(),
        }
    }
}

fn sweep_interval_ms() -> u64 {
    u64::try_from(SWEEP_INTERVAL.as_millis()).unwrap_or(60_000)
}

/// Evicts the `count` entries with the earliest reset times.
///
/// Approximate LRU-by-expiry: the soonest-to-reset records carry the least
/// information, so they go first.
fn evict_oldest(entries: &mut HashMap<String, RateLimitState>, count: usize) {
    let mut by_reset: Vec<(String, u64)> =
        entries.iter().map(|(key, state)| (key.clone(), state.reset_at_ms)).collect();
    by_reset.sort_by_key(|(_, reset_at_ms)| *reset_at_ms);
    for (key, _) in by_reset.into_iter().take(count) {
        entries.remove(&key);
    }
}
