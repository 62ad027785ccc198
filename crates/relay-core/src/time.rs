//! Clock abstraction for testable timing.
//!
//! Rate-limit windows, retry schedules, and queue retention all reason about
//! wall-clock time. Injecting a [`Clock`] instead of calling the system
//! clock directly lets tests drive windows and backoff delays
//! deterministically.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

/// Time source used throughout the engine.
///
/// Production code uses [`RealClock`]; tests inject [`TestClock`] and
/// advance it explicitly.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current instant for duration measurement.
    fn now(&self) -> Instant;

    /// Current system time for timestamps.
    fn now_system(&self) -> SystemTime;

    /// Sleeps for the given duration.
    ///
    /// Maps to `tokio::time::sleep` in production; test clocks advance
    /// virtual time and yield instead.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Milliseconds since the Unix epoch.
    ///
    /// Rate-limit windows and broker delay scheduling are expressed in epoch
    /// milliseconds, matching the wire format of the coordination store.
    fn now_millis(&self) -> u64 {
        self.now_system()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}

/// System-clock implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Virtual clock for deterministic tests.
///
/// Starts at the current system time and only moves when advanced. Sleeping
/// advances the clock immediately and yields to the scheduler, so delayed
/// jobs and window expiries can be driven without real waiting.
#[derive(Debug, Clone)]
pub struct TestClock {
    elapsed_ns: Arc<AtomicU64>,
    epoch_ns: Arc<AtomicU64>,
    base_instant: Instant,
}

impl TestClock {
    /// Creates a test clock anchored at the current system time.
    pub fn new() -> Self {
        let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        Self::starting_at_epoch_nanos(
            u64::try_from(since_epoch.as_nanos().min(u128::from(u64::MAX))).unwrap_or(0),
        )
    }

    /// Creates a test clock anchored at a specific system time.
    pub fn starting_at(start: SystemTime) -> Self {
        let since_epoch = start.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self::starting_at_epoch_nanos(
            u64::try_from(since_epoch.as_nanos().min(u128::from(u64::MAX))).unwrap_or(0),
        )
    }

    fn starting_at_epoch_nanos(epoch_ns: u64) -> Self {
        Self {
            elapsed_ns: Arc::new(AtomicU64::new(0)),
            epoch_ns: Arc::new(AtomicU64::new(epoch_ns)),
            base_instant: Instant::now(),
        }
    }

    /// Advances the clock by the given duration.
    pub fn advance(&self, duration: Duration) {
        let duration_ns =
            u64::try_from(duration.as_nanos().min(u128::from(u64::MAX))).unwrap_or(0);
        self.elapsed_ns.fetch_add(duration_ns, Ordering::AcqRel);
        self.epoch_ns.fetch_add(duration_ns, Ordering::AcqRel);
    }

    /// Time advanced since creation.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.load(Ordering::Acquire))
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base_instant + Duration::from_nanos(self.elapsed_ns.load(Ordering::Acquire))
    }

    fn now_system(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.epoch_ns.load(Ordering::Acquire))
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_moves_both_time_views() {
        let clock = TestClock::starting_at(UNIX_EPOCH + Duration::from_secs(1_000));
        let start_instant = clock.now();

        clock.advance(Duration::from_secs(90));

        assert_eq!(clock.now().duration_since(start_instant), Duration::from_secs(90));
        assert_eq!(clock.now_system(), UNIX_EPOCH + Duration::from_secs(1_090));
        assert_eq!(clock.now_millis(), 1_090_000);
    }

    #[tokio::test]
    async fn sleep_advances_virtual_time() {
        let clock = TestClock::new();
        let before = clock.now_millis();

        clock.sleep(Duration::from_secs(5)).await;

        assert_eq!(clock.now_millis(), before + 5_000);
    }

    #[test]
    fn real_clock_reports_epoch_millis() {
        let clock = RealClock::new();
        // Sanity bound: after 2020, before 2100.
        let millis = clock.now_millis();
        assert!(millis > 1_577_836_800_000);
        assert!(millis < 4_102_444_800_000);
    }
}
