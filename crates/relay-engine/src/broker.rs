//! Job broker abstraction and the bundled in-memory implementation.
//!
//! The engine assumes *some* durable job-queue broker exists; this module
//! specifies the operations performed against it and ships an in-process
//! implementation with the same semantics for embedded use and tests.
//! Production deployments can put a durable broker behind the same trait.
//!
//! Enqueueing is idempotent with respect to the job id: a second enqueue of
//! a live job returns the existing id and creates no new unit of work.
//! Dispatch order is priority first, then FIFO within a priority. This is
//! not a strict global order.

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use relay_core::{Clock, DeliveryJob, JobId, TargetId};

use crate::error::{EngineError, Result};

/// Boxed future returned by broker operations.
pub type BrokerFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Broker-side lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Ready for dispatch.
    Waiting,
    /// Scheduled for dispatch at a later instant (initial delay or retry
    /// backoff).
    Delayed,
    /// Claimed by a worker.
    Active,
    /// Finished successfully.
    Completed,
    /// Finished after exhausting its retry budget.
    Failed,
}

impl JobState {
    /// Whether the job still represents dispatchable or running work.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Waiting | Self::Delayed | Self::Active)
    }

    /// Lowercase name for logs and admin output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Delayed => "delayed",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job as the broker sees it.
#[derive(Debug, Clone)]
pub struct BrokeredJob {
    /// The unit of work.
    pub job: DeliveryJob,
    /// Current broker-side state.
    pub state: JobState,
    /// When the job was first enqueued, epoch milliseconds.
    pub enqueued_at_ms: u64,
    /// For delayed jobs, when they become dispatchable.
    pub ready_at_ms: Option<u64>,
    /// When the job reached a terminal state.
    pub finished_at_ms: Option<u64>,
    /// Error recorded by the most recent failed attempt.
    pub last_error: Option<String>,
}

/// Per-state job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    /// Jobs ready for dispatch.
    pub waiting: u64,
    /// Jobs scheduled for later dispatch.
    pub delayed: u64,
    /// Jobs claimed by workers.
    pub active: u64,
    /// Jobs finished successfully.
    pub completed: u64,
    /// Jobs finished in failure.
    pub failed: u64,
}

impl JobCounts {
    /// Total jobs across all states.
    pub fn total(&self) -> u64 {
        self.waiting + self.delayed + self.active + self.completed + self.failed
    }
}

/// Operations the engine performs against a job-queue broker.
///
/// Implementations must keep `enqueue` idempotent on the job id and make
/// `claim` safe under concurrent callers: a job is handed to at most one
/// worker at a time.
pub trait JobBroker: Send + Sync + 'static {
    /// Enqueues a job, optionally delayed.
    ///
    /// The explicit `delay` wins over the job's own `delay_ms`. If a live
    /// job with the same id exists, returns its id without creating new
    /// work; a terminal job with the same id is replaced.
    fn enqueue(&self, job: DeliveryJob, delay: Option<Duration>) -> BrokerFuture<'_, Result<JobId>>;

    /// Looks up a job by id.
    fn find(&self, job_id: JobId) -> BrokerFuture<'_, Result<Option<BrokeredJob>>>;

    /// Jobs in `state` at positions `[start, end)` in enqueue order.
    fn list(
        &self,
        state: JobState,
        start: usize,
        end: usize,
    ) -> BrokerFuture<'_, Result<Vec<BrokeredJob>>>;

    /// Jobs belonging to `target_id`, optionally filtered by state.
    fn list_by_owner(
        &self,
        target_id: TargetId,
        state: Option<JobState>,
    ) -> BrokerFuture<'_, Result<Vec<BrokeredJob>>>;

    /// Removes a job. Returns `false` if absent or currently active.
    fn remove(&self, job_id: JobId) -> BrokerFuture<'_, Result<bool>>;

    /// Re-dispatches an existing job immediately.
    ///
    /// Returns `false` if the job is absent or active; waiting, delayed,
    /// and failed jobs become immediately dispatchable.
    fn promote(&self, job_id: JobId) -> BrokerFuture<'_, Result<bool>>;

    /// Removes all waiting/delayed jobs for an owner; in-flight jobs are
    /// not interrupted. Returns the number removed.
    fn cancel_by_owner(&self, target_id: TargetId) -> BrokerFuture<'_, Result<u64>>;

    /// Claims up to `limit` ready jobs, marking them active.
    ///
    /// Returns nothing while the broker is paused. Ready means waiting, or
    /// delayed with a due ready time. High priority dispatches first, FIFO
    /// within a priority.
    fn claim(&self, limit: usize) -> BrokerFuture<'_, Result<Vec<DeliveryJob>>>;

    /// Marks an active job completed.
    fn complete(&self, job_id: JobId) -> BrokerFuture<'_, Result<()>>;

    /// Records a failed attempt on an active job.
    ///
    /// With `retry_delay`, the job returns to the delayed set with its
    /// attempt counter advanced (retry-as-requeue). Without, it fails
    /// terminally.
    fn fail(
        &self,
        job_id: JobId,
        error: String,
        retry_delay: Option<Duration>,
    ) -> BrokerFuture<'_, Result<()>>;

    /// Per-state job counts.
    fn counts(&self) -> BrokerFuture<'_, Result<JobCounts>>;

    /// Stops dispatching new jobs; in-flight jobs are unaffected.
    fn pause(&self) -> BrokerFuture<'_, Result<()>>;

    /// Resumes dispatch after a pause.
    fn resume(&self) -> BrokerFuture<'_, Result<()>>;

    /// Whether dispatch is currently paused.
    fn is_paused(&self) -> BrokerFuture<'_, Result<bool>>;

    /// Removes all not-yet-started (waiting and delayed) jobs.
    fn drain(&self) -> BrokerFuture<'_, Result<u64>>;

    /// Removes up to `limit` jobs in `state` older than `grace`, oldest
    /// first. Returns the removed ids.
    fn clean(
        &self,
        grace: Duration,
        limit: usize,
        state: JobState,
    ) -> BrokerFuture<'_, Result<Vec<JobId>>>;

    /// Lightweight connectivity probe; returns the total job count.
    fn ping(&self) -> BrokerFuture<'_, Result<u64>>;

    /// Releases broker resources at process shutdown.
    fn close(&self) -> BrokerFuture<'_, Result<()>>;
}

struct Entry {
    brokered: BrokeredJob,
    seq: u64,
}

struct Inner {
    jobs: HashMap<JobId, Entry>,
    next_seq: u64,
}

/// In-process broker with the full dispatch semantics.
///
/// State lives in one mutex-guarded map; no lock is held across an await
/// point. Durability is explicitly out of scope: a restart loses queued
/// work, which is why the delivery record store is separate.
pub struct InMemoryBroker {
    clock: Arc<dyn Clock>,
    paused: AtomicBool,
    closed: AtomicBool,
    inner: Mutex<Inner>,
}

impl InMemoryBroker {
    /// Creates an empty broker using the given clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            inner: Mutex::new(Inner { jobs: HashMap::new(), next_seq: 0 }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(EngineError::broker("broker is closed"))
        } else {
            Ok(())
        }
    }

    fn delay_ms(delay: Option<Duration>, job: &DeliveryJob) -> Option<u64> {
        delay
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .or(job.delay_ms)
            .filter(|&ms| ms > 0)
    }
}

impl JobBroker for InMemoryBroker {
    fn enqueue(&self, job: DeliveryJob, delay: Option<Duration>) -> BrokerFuture<'_, Result<JobId>> {
        Box::pin(async move {
            self.ensure_open()?;
            let now_ms = self.clock.now_millis();
            let mut inner = self.lock();

            if let Some(existing) = inner.jobs.get(&job.job_id) {
                if existing.brokered.state.is_live() {
                    return Ok(job.job_id);
                }
            }

            let delay_ms = Self::delay_ms(delay, &job);
            let (state, ready_at_ms) = match delay_ms {
                Some(ms) => (JobState::Delayed, Some(now_ms + ms)),
                None => (JobState::Waiting, None),
            };

            let job_id = job.job_id.clone();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.jobs.insert(
                job_id.clone(),
                Entry {
                    brokered: BrokeredJob {
                        job,
                        state,
                        enqueued_at_ms: now_ms,
                        ready_at_ms,
                        finished_at_ms: None,
                        last_error: None,
                    },
                    seq,
                },
            );
            Ok(job_id)
        })
    }

    fn find(&self, job_id: JobId) -> BrokerFuture<'_, Result<Option<BrokeredJob>>> {
        Box::pin(async move {
            let inner = self.lock();
            Ok(inner.jobs.get(&job_id).map(|entry| entry.brokered.clone()))
        })
    }

    fn list(
        &self,
        state: JobState,
        start: usize,
        end: usize,
    ) -> BrokerFuture<'_, Result<Vec<BrokeredJob>>> {
        Box::pin(async move {
            let inner = self.lock();
            let mut matching: Vec<&Entry> =
                inner.jobs.values().filter(|entry| entry.brokered.state == state).collect();
            matching.sort_by_key(|entry| entry.seq);
            Ok(matching
                .into_iter()
                .skip(start)
                .take(end.saturating_sub(start))
                .map(|entry| entry.brokered.clone())
                .collect())
        })
    }

    fn list_by_owner(
        &self,
        target_id: TargetId,
        state: Option<JobState>,
    ) -> BrokerFuture<'_, Result<Vec<BrokeredJob>>> {
        Box::pin(async move {
            let inner = self.lock();
            let mut matching: Vec<&Entry> = inner
                .jobs
                .values()
                .filter(|entry| entry.brokered.job.target_id == target_id)
                .filter(|entry| state.is_none_or(|s| entry.brokered.state == s))
                .collect();
            matching.sort_by_key(|entry| entry.seq);
            Ok(matching.into_iter().map(|entry| entry.brokered.clone()).collect())
        })
    }

    fn remove(&self, job_id: JobId) -> BrokerFuture<'_, Result<bool>> {
        Box::pin(async move {
            let mut inner = self.lock();
            let removable = inner
                .jobs
                .get(&job_id)
                .is_some_and(|entry| entry.brokered.state != JobState::Active);
            if removable {
                inner.jobs.remove(&job_id);
            }
            Ok(removable)
        })
    }

    fn promote(&self, job_id: JobId) -> BrokerFuture<'_, Result<bool>> {
        Box::pin(async move {
            let mut inner = self.lock();
            match inner.jobs.get_mut(&job_id) {
                Some(entry)
                    if matches!(
                        entry.brokered.state,
                        JobState::Waiting | JobState::Delayed | JobState::Failed
                    ) =>
                {
                    entry.brokered.state = JobState::Waiting;
                    entry.brokered.ready_at_ms = None;
                    entry.brokered.finished_at_ms = None;
                    Ok(true)
                },
                _ => Ok(false),
            }
        })
    }

    fn cancel_by_owner(&self, target_id: TargetId) -> BrokerFuture<'_, Result<u64>> {
        Box::pin(async move {
            let mut inner = self.lock();
            let before = inner.jobs.len();
            inner.jobs.retain(|_, entry| {
                entry.brokered.job.target_id != target_id
                    || !matches!(entry.brokered.state, JobState::Waiting | JobState::Delayed)
            });
            Ok(u64::try_from(before - inner.jobs.len()).unwrap_or(0))
        })
    }

    fn claim(&self, limit: usize) -> BrokerFuture<'_, Result<Vec<DeliveryJob>>> {
        Box::pin(async move {
            self.ensure_open()?;
            if self.paused.load(Ordering::Acquire) {
                return Ok(Vec::new());
            }

            let now_ms = self.clock.now_millis();
            let mut inner = self.lock();

            let mut ready: Vec<(u8, u64, JobId)> = inner
                .jobs
                .iter()
                .filter(|(_, entry)| match entry.brokered.state {
                    JobState::Waiting => true,
                    JobState::Delayed => {
                        entry.brokered.ready_at_ms.is_none_or(|ready| ready <= now_ms)
                    },
                    _ => false,
                })
                .map(|(id, entry)| (entry.brokered.job.priority.rank(), entry.seq, id.clone()))
                .collect();
            ready.sort();

            let mut claimed = Vec::with_capacity(limit.min(ready.len()));
            for (_, _, job_id) in ready.into_iter().take(limit) {
                if let Some(entry) = inner.jobs.get_mut(&job_id) {
                    entry.brokered.state = JobState::Active;
                    entry.brokered.ready_at_ms = None;
                    claimed.push(entry.brokered.job.clone());
                }
            }
            Ok(claimed)
        })
    }

    fn complete(&self, job_id: JobId) -> BrokerFuture<'_, Result<()>> {
        Box::pin(async move {
            let now_ms = self.clock.now_millis();
            let mut inner = self.lock();
            let entry = inner
                .jobs
                .get_mut(&job_id)
                .ok_or_else(|| EngineError::broker(format!("unknown job {job_id}")))?;
            if entry.brokered.state != JobState::Active {
                return Err(EngineError::broker(format!(
                    "cannot complete job {job_id} in state {}",
                    entry.brokered.state
                )));
            }
            entry.brokered.state = JobState::Completed;
            entry.brokered.finished_at_ms = Some(now_ms);
            entry.brokered.last_error = None;
            Ok(())
        })
    }

    fn fail(
        &self,
        job_id: JobId,
        error: String,
        retry_delay: Option<Duration>,
    ) -> BrokerFuture<'_, Result<()>> {
        Box::pin(async move {
            let now_ms = self.clock.now_millis();
            let mut inner = self.lock();
            let entry = inner
                .jobs
                .get_mut(&job_id)
                .ok_or_else(|| EngineError::broker(format!("unknown job {job_id}")))?;
            if entry.brokered.state != JobState::Active {
                return Err(EngineError::broker(format!(
                    "cannot fail job {job_id} in state {}",
                    entry.brokered.state
                )));
            }

            entry.brokered.last_error = Some(error);
            match retry_delay {
                Some(delay) => {
                    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                    entry.brokered.state = JobState::Delayed;
                    entry.brokered.ready_at_ms = Some(now_ms + delay_ms);
                    entry.brokered.job.attempt += 1;
                },
                None => {
                    entry.brokered.state = JobState::Failed;
                    entry.brokered.finished_at_ms = Some(now_ms);
                },
            }
            Ok(())
        })
    }

    fn counts(&self) -> BrokerFuture<'_, Result<JobCounts>> {
        Box::pin(async move {
            let inner = self.lock();
            let mut counts = JobCounts::default();
            for entry in inner.jobs.values() {
                match entry.brokered.state {
                    JobState::Waiting => counts.waiting += 1,
                    JobState::Delayed => counts.delayed += 1,
                    JobState::Active => counts.active += 1,
                    JobState::Completed => counts.completed += 1,
                    JobState::Failed => counts.failed += 1,
                }
            }
            Ok(counts)
        })
    }

    fn pause(&self) -> BrokerFuture<'_, Result<()>> {
        Box::pin(async move {
            self.paused.store(true, Ordering::Release);
            Ok(())
        })
    }

    fn resume(&self) -> BrokerFuture<'_, Result<()>> {
        Box::pin(async move {
            self.paused.store(false, Ordering::Release);
            Ok(())
        })
    }

    fn is_paused(&self) -> BrokerFuture<'_, Result<bool>> {
        Box::pin(async move { Ok(self.paused.load(Ordering::Acquire)) })
    }

    fn drain(&self) -> BrokerFuture<'_, Result<u64>> {
        Box::pin(async move {
            let mut inner = self.lock();
            let before = inner.jobs.len();
            inner.jobs.retain(|_, entry| {
                !matches!(entry.brokered.state, JobState::Waiting | JobState::Delayed)
            });
            Ok(u64::try_from(before - inner.jobs.len()).unwrap_or(0))
        })
    }

    fn clean(
        &self,
        grace: Duration,
        limit: usize,
        state: JobState,
    ) -> BrokerFuture<'_, Result<Vec<JobId>>> {
        Box::pin(async move {
            let now_ms = self.clock.now_millis();
            let grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
            let cutoff_ms = now_ms.saturating_sub(grace_ms);

            let mut inner = self.lock();
            let mut candidates: Vec<(u64, JobId)> = inner
                .jobs
                .iter()
                .filter(|(_, entry)| entry.brokered.state == state)
                .filter_map(|(id, entry)| {
                    let reference_ms =
                        entry.brokered.finished_at_ms.unwrap_or(entry.brokered.enqueued_at_ms);
                    (reference_ms <= cutoff_ms).then(|| (reference_ms, id.clone()))
                })
                .collect();
            candidates.sort();

            let removed: Vec<JobId> =
                candidates.into_iter().take(limit).map(|(_, id)| id).collect();
            for id in &removed {
                inner.jobs.remove(id);
            }
            Ok(removed)
        })
    }

    fn ping(&self) -> BrokerFuture<'_, Result<u64>> {
        Box::pin(async move {
            self.ensure_open()?;
            let inner = self.lock();
            Ok(u64::try_from(inner.jobs.len()).unwrap_or(u64::MAX))
        })
    }

    fn close(&self) -> BrokerFuture<'_, Result<()>> {
        Box::pin(async move {
            self.closed.store(true, Ordering::Release);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use relay_core::{DeliveryId, EventPayload, JobPriority, TestClock};

    use super::*;

    fn job_for(target_id: TargetId) -> DeliveryJob {
        DeliveryJob::new(
            target_id,
            DeliveryId::new(),
            "https://example.com/hook",
            EventPayload::new("test.event", Utc::now(), serde_json::json!({})),
        )
    }

    fn broker_with_clock() -> (InMemoryBroker, TestClock) {
        let clock = TestClock::new();
        (InMemoryBroker::new(Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_for_live_jobs() {
        let (broker, _clock) = broker_with_clock();
        let job = job_for(TargetId::new());

        let first = broker.enqueue(job.clone(), None).await.expect("enqueue succeeds");
        let second = broker.enqueue(job, None).await.expect("enqueue succeeds");

        assert_eq!(first, second);
        let counts = broker.counts().await.expect("counts");
        assert_eq!(counts.waiting, 1);
        assert_eq!(counts.total(), 1);
    }

    #[tokio::test]
    async fn claim_orders_by_priority_then_fifo() {
        let (broker, _clock) = broker_with_clock();
        let target = TargetId::new();

        let low = job_for(target).with_priority(JobPriority::Low);
        let normal_first = job_for(target);
        let normal_second = job_for(target);
        let high = job_for(target).with_priority(JobPriority::High);

        for job in [&low, &normal_first, &normal_second, &high] {
            broker.enqueue(job.clone(), None).await.expect("enqueue succeeds");
        }

        let claimed = broker.claim(10).await.expect("claim succeeds");
        let ids: Vec<_> = claimed.iter().map(|j| j.job_id.clone()).collect();
        assert_eq!(
            ids,
            vec![
                high.job_id.clone(),
                normal_first.job_id.clone(),
                normal_second.job_id.clone(),
                low.job_id.clone()
            ]
        );
    }

    #[tokio::test]
    async fn delayed_jobs_become_ready_when_due() {
        let (broker, clock) = broker_with_clock();
        let job = job_for(TargetId::new());
        broker
            .enqueue(job, Some(Duration::from_secs(60)))
            .await
            .expect("enqueue succeeds");

        assert!(broker.claim(10).await.expect("claim").is_empty());

        clock.advance(Duration::from_secs(61));
        assert_eq!(broker.claim(10).await.expect("claim").len(), 1);
    }

    #[tokio::test]
    async fn pause_gates_dispatch_without_touching_active_jobs() {
        let (broker, _clock) = broker_with_clock();
        broker.enqueue(job_for(TargetId::new()), None).await.expect("enqueue succeeds");
        broker.enqueue(job_for(TargetId::new()), None).await.expect("enqueue succeeds");

        let first = broker.claim(1).await.expect("claim");
        assert_eq!(first.len(), 1);

        broker.pause().await.expect("pause");
        assert!(broker.claim(10).await.expect("claim").is_empty());
        assert_eq!(broker.counts().await.expect("counts").active, 1);

        broker.resume().await.expect("resume");
        assert_eq!(broker.claim(10).await.expect("claim").len(), 1);
    }

    #[tokio::test]
    async fn fail_with_delay_requeues_with_advanced_attempt() {
        let (broker, clock) = broker_with_clock();
        let job = job_for(TargetId::new());
        let job_id = job.job_id.clone();
        broker.enqueue(job, None).await.expect("enqueue succeeds");

        let claimed = broker.claim(1).await.expect("claim");
        assert_eq!(claimed[0].attempt, 1);

        broker
            .fail(job_id.clone(), "503".into(), Some(Duration::from_secs(60)))
            .await
            .expect("fail succeeds");

        let brokered = broker.find(job_id).await.expect("find").expect("job exists");
        assert_eq!(brokered.state, JobState::Delayed);
        assert_eq!(brokered.job.attempt, 2);
        assert_eq!(brokered.last_error.as_deref(), Some("503"));

        clock.advance(Duration::from_secs(61));
        let reclaimed = broker.claim(1).await.expect("claim");
        assert_eq!(reclaimed[0].attempt, 2);
    }

    #[tokio::test]
    async fn terminal_fail_keeps_job_for_inspection() {
        let (broker, _clock) = broker_with_clock();
        let job = job_for(TargetId::new());
        let job_id = job.job_id.clone();
        broker.enqueue(job, None).await.expect("enqueue succeeds");
        broker.claim(1).await.expect("claim");

        broker.fail(job_id.clone(), "gave up".into(), None).await.expect("fail succeeds");

        let brokered = broker.find(job_id).await.expect("find").expect("job exists");
        assert_eq!(brokered.state, JobState::Failed);
        assert!(brokered.finished_at_ms.is_some());
    }

    #[tokio::test]
    async fn cancel_by_owner_spares_active_and_foreign_jobs() {
        let (broker, _clock) = broker_with_clock();
        let owner = TargetId::new();
        let other = TargetId::new();

        let active = job_for(owner).with_priority(JobPriority::High);
        broker.enqueue(active.clone(), None).await.expect("enqueue");
        broker.enqueue(job_for(owner), None).await.expect("enqueue");
        broker.enqueue(job_for(owner), Some(Duration::from_secs(60))).await.expect("enqueue");
        broker.enqueue(job_for(other), None).await.expect("enqueue");

        // High priority guarantees the owner's first job is the one claimed.
        let claimed = broker.claim(1).await.expect("claim");
        assert_eq!(claimed[0].job_id, active.job_id);

        let cancelled = broker.cancel_by_owner(owner).await.expect("cancel");
        assert_eq!(cancelled, 2);

        let counts = broker.counts().await.expect("counts");
        assert_eq!(counts.active, 1);
        assert_eq!(counts.waiting, 1);
    }

    #[tokio::test]
    async fn promote_redispatches_failed_and_delayed_jobs() {
        let (broker, _clock) = broker_with_clock();
        let delayed = job_for(TargetId::new());
        broker
            .enqueue(delayed.clone(), Some(Duration::from_secs(600)))
            .await
            .expect("enqueue");

        assert!(broker.promote(delayed.job_id.clone()).await.expect("promote"));
        assert_eq!(broker.claim(1).await.expect("claim").len(), 1);

        assert!(!broker.promote(delayed.job_id.clone()).await.expect("promote on active"));

        let missing = JobId::for_delivery(DeliveryId::new());
        assert!(!broker.promote(missing).await.expect("promote missing"));
    }

    #[tokio::test]
    async fn remove_refuses_active_jobs() {
        let (broker, _clock) = broker_with_clock();
        let job = job_for(TargetId::new());
        let job_id = job.job_id.clone();
        broker.enqueue(job, None).await.expect("enqueue");
        broker.claim(1).await.expect("claim");

        assert!(!broker.remove(job_id.clone()).await.expect("remove"));
        broker.complete(job_id.clone()).await.expect("complete");
        assert!(broker.remove(job_id).await.expect("remove"));
    }

    #[tokio::test]
    async fn drain_discards_not_yet_started_work() {
        let (broker, _clock) = broker_with_clock();
        broker.enqueue(job_for(TargetId::new()), None).await.expect("enqueue");
        broker
            .enqueue(job_for(TargetId::new()), Some(Duration::from_secs(60)))
            .await
            .expect("enqueue");
        let active = job_for(TargetId::new()).with_priority(JobPriority::High);
        broker.enqueue(active, None).await.expect("enqueue");
        broker.claim(1).await.expect("claim");

        assert_eq!(broker.drain().await.expect("drain"), 2);
        assert_eq!(broker.counts().await.expect("counts").active, 1);
    }

    #[tokio::test]
    async fn clean_honors_grace_limit_and_state() {
        let (broker, clock) = broker_with_clock();

        let mut completed_ids = Vec::new();
        for _ in 0..3 {
            let job = job_for(TargetId::new());
            let job_id = job.job_id.clone();
            broker.enqueue(job, None).await.expect("enqueue");
            broker.claim(1).await.expect("claim");
            broker.complete(job_id.clone()).await.expect("complete");
            completed_ids.push(job_id);
            clock.advance(Duration::from_secs(10));
        }

        // Young completed job stays; only jobs older than the grace go.
        clock.advance(Duration::from_secs(40));
        let removed = broker
            .clean(Duration::from_secs(55), 10, JobState::Completed)
            .await
            .expect("clean");
        assert_eq!(removed, completed_ids[..2].to_vec());

        let counts = broker.counts().await.expect("counts");
        assert_eq!(counts.completed, 1);
    }

    #[tokio::test]
    async fn close_fails_the_health_probe() {
        let (broker, _clock) = broker_with_clock();
        assert!(broker.ping().await.is_ok());

        broker.close().await.expect("close");
        assert!(broker.ping().await.is_err());
        assert!(broker.enqueue(job_for(TargetId::new()), None).await.is_err());
    }
}
