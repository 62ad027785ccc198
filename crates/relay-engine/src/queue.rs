//! Producer-facing queue surface.
//!
//! Layers delivery semantics over the broker: the SSRF gate runs before
//! anything is enqueued (fail closed), the lifecycle record is created
//! alongside the job, and job ids derived from delivery ids make every
//! enqueue idempotent.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use relay_core::{Clock, DeliveryJob, JobId, TargetId};
use tracing::{debug, info};

use crate::{
    broker::{BrokeredJob, JobBroker, JobState},
    error::{EngineError, Result},
    guard::UrlGuard,
    store::{record_for_job, DeliveryStore},
};

/// Default start of a listing range.
pub const DEFAULT_LIST_START: usize = 0;

/// Default end of a listing range.
pub const DEFAULT_LIST_END: usize = 100;

/// Enqueue and job-accessor operations for producers.
pub struct DeliveryQueue {
    broker: Arc<dyn JobBroker>,
    store: Arc<dyn DeliveryStore>,
    guard: Arc<dyn UrlGuard>,
    clock: Arc<dyn Clock>,
}

impl DeliveryQueue {
    /// Creates a queue over the given broker, record store, and URL guard.
    pub fn new(
        broker: Arc<dyn JobBroker>,
        store: Arc<dyn DeliveryStore>,
        guard: Arc<dyn UrlGuard>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { broker, store, guard, clock }
    }

    fn now(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.clock.now_system())
    }

    async fn check_url(&self, url: &str) -> Result<()> {
        let verdict = self.guard.validate(url).await;
        if verdict.safe {
            Ok(())
        } else {
            Err(EngineError::unsafe_url(
                verdict.reason.unwrap_or_else(|| "target url rejected".to_string()),
            ))
        }
    }

    /// Enqueues a job after screening its target URL.
    ///
    /// Creates the delivery record if this is the first enqueue for the
    /// delivery; an explicit `delay` overrides the job's own `delay_ms`.
    /// Re-enqueueing a live delivery returns the existing job id.
    pub async fn enqueue(&self, job: DeliveryJob, delay: Option<Duration>) -> Result<JobId> {
        self.check_url(&job.url).await?;

        self.store.create_if_absent(record_for_job(&job, self.now())).await?;
        let job_id = self.broker.enqueue(job, delay).await?;

        debug!(job_id = %job_id, "delivery job enqueued");
        Ok(job_id)
    }

    /// Enqueues a batch of jobs.
    ///
    /// Every URL is screened before anything is enqueued, so a batch with
    /// one unsafe target fails closed as a whole rather than partially
    /// dispatching.
    pub async fn enqueue_bulk(&self, jobs: Vec<DeliveryJob>) -> Result<Vec<JobId>> {
        for job in &jobs {
            self.check_url(&job.url).await?;
        }

        let mut job_ids = Vec::with_capacity(jobs.len());
        for job in jobs {
            self.store.create_if_absent(record_for_job(&job, self.now())).await?;
            job_ids.push(self.broker.enqueue(job, None).await?);
        }

        info!(count = job_ids.len(), "bulk enqueue completed");
        Ok(job_ids)
    }

    /// Looks up a job by id.
    pub async fn job(&self, job_id: JobId) -> Result<Option<BrokeredJob>> {
        self.broker.find(job_id).await
    }

    /// Jobs in `state` at positions `[start, end)`.
    pub async fn list_by_state(
        &self,
        state: JobState,
        start: usize,
        end: usize,
    ) -> Result<Vec<BrokeredJob>> {
        self.broker.list(state, start, end).await
    }

    /// Removes a job; `false` when absent or in flight.
    pub async fn remove_job(&self, job_id: JobId) -> Result<bool> {
        self.broker.remove(job_id).await
    }

    /// Re-dispatches an existing job immediately; `false` when absent or in
    /// flight.
    pub async fn retry_job(&self, job_id: JobId) -> Result<bool> {
        self.broker.promote(job_id).await
    }

    /// Jobs belonging to an owner, optionally filtered by state.
    pub async fn list_by_owner(
        &self,
        target_id: TargetId,
        state: Option<JobState>,
    ) -> Result<Vec<BrokeredJob>> {
        self.broker.list_by_owner(target_id, state).await
    }

    /// Cancels an owner's not-yet-started jobs; in-flight jobs keep running.
    pub async fn cancel_by_owner(&self, target_id: TargetId) -> Result<u64> {
        let cancelled = self.broker.cancel_by_owner(target_id).await?;
        info!(target_id = %target_id, cancelled, "cancelled owner's queued jobs");
        Ok(cancelled)
    }

    /// Operator-initiated retry of a terminally failed delivery.
    ///
    /// Resets the record to `Pending` with a fresh retry budget and
    /// enqueues a fresh job. Conflicts unless the record is `Failed`, which
    /// also makes concurrent manual retries safe: exactly one caller wins
    /// the reset.
    pub async fn retry_failed(&self, job: DeliveryJob) -> Result<JobId> {
        self.check_url(&job.url).await?;
        self.store.reset_for_retry(job.delivery_id).await?;

        // The terminal broker job, if still retained, makes way for the
        // fresh unit of work.
        let _ = self.broker.remove(job.job_id.clone()).await?;

        let mut job = job;
        job.attempt = 1;
        job.delay_ms = None;
        let job_id = self.broker.enqueue(job, None).await?;

        info!(job_id = %job_id, "manual retry enqueued");
        Ok(job_id)
    }
}
