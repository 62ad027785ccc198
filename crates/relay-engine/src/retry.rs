//! Backoff schedule and terminal-failure decisions.
//!
//! Failed attempts are re-enqueued with a delay from a fixed schedule
//! rather than slept through in a worker. The schedule escalates from one
//! minute to thirty; attempts past the end of the schedule reuse its last
//! (largest) delay.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Backoff schedule applied between delivery attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before attempt `n + 1`, indexed by `n - 1`; clamped to the
    /// last entry.
    schedule: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            schedule: vec![
                Duration::from_secs(60),
                Duration::from_secs(300),
                Duration::from_secs(1_800),
            ],
        }
    }
}

/// Outcome of a retry decision for a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue the job after the given delay.
    Retry {
        /// Backoff delay before the next attempt.
        delay: Duration,
    },
    /// Budget exhausted; the delivery fails terminally.
    GiveUp {
        /// Why no further attempt is made.
        reason: String,
    },
}

impl RetryPolicy {
    /// Creates a policy with a custom schedule.
    pub fn with_schedule(schedule: Vec<Duration>) -> Result<Self> {
        if schedule.is_empty() {
            return Err(EngineError::configuration("retry schedule must not be empty"));
        }
        Ok(Self { schedule })
    }

    /// Delay before the attempt following failed attempt `attempt` (1-based).
    ///
    /// Attempts beyond the schedule reuse the largest delay; an attempt
    /// number of zero is treated as the first.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let index = usize::try_from(attempt.max(1) - 1).unwrap_or(usize::MAX);
        let clamped = index.min(self.schedule.len() - 1);
        self.schedule[clamped]
    }

    /// Whether a delivery with `attempts` completed attempts is out of
    /// budget.
    pub fn is_terminal(&self, attempts: u32, max_retries: u32) -> bool {
        attempts >= max_retries
    }

    /// Decides between re-enqueueing and giving up after a failed attempt.
    ///
    /// `attempts` is the number of attempts completed so far, including the
    /// one that just failed.
    pub fn decide(&self, attempts: u32, max_retries: u32) -> RetryDecision {
        if self.is_terminal(attempts, max_retries) {
            RetryDecision::GiveUp {
                reason: format!("retry budget exhausted after {attempts} attempts"),
            }
        } else {
            RetryDecision::Retry { delay: self.next_delay(attempts) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_matches_fixed_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(1), Duration::from_secs(60));
        assert_eq!(policy.next_delay(2), Duration::from_secs(300));
        assert_eq!(policy.next_delay(3), Duration::from_secs(1_800));
    }

    #[test]
    fn attempts_past_schedule_reuse_largest_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(4), Duration::from_secs(1_800));
        assert_eq!(policy.next_delay(10), Duration::from_secs(1_800));
    }

    #[test]
    fn attempt_zero_is_treated_as_first() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(0), Duration::from_secs(60));
    }

    #[test]
    fn terminal_once_attempts_reach_budget() {
        let policy = RetryPolicy::default();
        assert!(!policy.is_terminal(2, 3));
        assert!(policy.is_terminal(3, 3));
        assert!(policy.is_terminal(4, 3));
        assert!(policy.is_terminal(0, 0));
    }

    #[test]
    fn decide_walks_schedule_then_gives_up() {
        let policy = RetryPolicy::default();

        assert_eq!(
            policy.decide(1, 3),
            RetryDecision::Retry { delay: Duration::from_secs(60) }
        );
        assert_eq!(
            policy.decide(2, 3),
            RetryDecision::Retry { delay: Duration::from_secs(300) }
        );
        assert!(matches!(policy.decide(3, 3), RetryDecision::GiveUp { .. }));
    }

    #[test]
    fn empty_schedule_is_rejected() {
        assert!(RetryPolicy::with_schedule(vec![]).is_err());
    }
}
