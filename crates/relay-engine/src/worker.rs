//! Delivery workers and the engine facade.
//!
//! Each worker claims a batch of ready jobs from the broker and processes
//! one job to completion at a time: transition the record to `Processing`,
//! perform the HTTP attempt under the job's timeout, then either mark it
//! delivered or hand it back to the broker, delayed with backoff, until
//! the retry budget runs out. Rate limiting happens on the producer side;
//! workers only shape retries.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use relay_core::{Clock, DeliveryJob};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    broker::JobBroker,
    client::{ClientConfig, DeliveryClient, DeliveryResponse},
    error::{EngineError, Result},
    retry::{RetryDecision, RetryPolicy},
    store::DeliveryStore,
    worker_pool::WorkerPool,
    DEFAULT_BATCH_SIZE, DEFAULT_POLL_INTERVAL_MS, DEFAULT_WORKER_COUNT,
};

/// Configuration for the delivery engine.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Number of concurrent delivery workers.
    pub worker_count: usize,
    /// Maximum jobs a worker claims per batch.
    pub batch_size: usize,
    /// How often workers poll when no work is ready.
    pub poll_interval: Duration,
    /// HTTP client configuration.
    pub client_config: ClientConfig,
    /// Backoff schedule applied between attempts.
    pub retry_policy: RetryPolicy,
    /// Maximum time to wait for workers during shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            client_config: ClientConfig::default(),
            retry_policy: RetryPolicy::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Statistics for engine monitoring.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Number of running workers.
    pub active_workers: usize,
    /// Jobs processed since startup, regardless of outcome.
    pub jobs_processed: u64,
    /// Successful deliveries.
    pub delivered: u64,
    /// Failed attempts that were re-enqueued with backoff.
    pub retried: u64,
    /// Deliveries that exhausted their budget.
    pub failed_permanently: u64,
    /// Attempts currently in flight.
    pub in_flight: u64,
}

/// Coordinates the delivery worker pool.
pub struct DeliveryEngine {
    broker: Arc<dyn JobBroker>,
    store: Arc<dyn DeliveryStore>,
    config: DeliveryConfig,
    client: Arc<DeliveryClient>,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    worker_pool: Option<WorkerPool>,
    clock: Arc<dyn Clock>,
}

impl DeliveryEngine {
    /// Creates an engine over the given broker and record store.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        broker: Arc<dyn JobBroker>,
        store: Arc<dyn DeliveryStore>,
        config: DeliveryConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let client = Arc::new(DeliveryClient::new(&config.client_config)?);
        Ok(Self {
            broker,
            store,
            config,
            client,
            stats: Arc::new(RwLock::new(EngineStats::default())),
            cancellation_token: CancellationToken::new(),
            worker_pool: None,
            clock,
        })
    }

    /// Spawns the worker pool and returns immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if workers fail to spawn.
    pub async fn start(&mut self) -> Result<()> {
        info!(
            worker_count = self.config.worker_count,
            batch_size = self.config.batch_size,
            "starting delivery engine"
        );

        let mut pool = WorkerPool::new(
            self.broker.clone(),
            self.store.clone(),
            self.config.clone(),
            self.client.clone(),
            self.stats.clone(),
            self.cancellation_token.clone(),
            self.clock.clone(),
        );
        pool.spawn_workers().await?;
        self.worker_pool = Some(pool);

        info!("delivery engine started");
        Ok(())
    }

    /// Signals workers to stop and waits for in-flight deliveries.
    ///
    /// # Errors
    ///
    /// Returns an error if shutdown exceeds the configured timeout.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("shutting down delivery engine");
        if let Some(pool) = self.worker_pool.take() {
            pool.shutdown_graceful(self.config.shutdown_timeout).await?;
        } else {
            info!("delivery engine was never started, nothing to shut down");
        }
        Ok(())
    }

    /// Current engine statistics.
    pub async fn stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }

    /// Claims and processes exactly one batch synchronously.
    ///
    /// Intended for tests and controlled batch processing: no background
    /// workers are started and the call returns once the batch is done.
    ///
    /// # Errors
    ///
    /// Returns an error if claiming from the broker fails.
    pub async fn process_batch(&self) -> Result<usize> {
        let worker = DeliveryWorker::new(
            0,
            self.broker.clone(),
            self.store.clone(),
            self.config.clone(),
            self.client.clone(),
            self.stats.clone(),
            self.cancellation_token.clone(),
            self.clock.clone(),
        );
        worker.process_batch().await
    }
}

/// A single delivery worker.
pub struct DeliveryWorker {
    id: usize,
    broker: Arc<dyn JobBroker>,
    store: Arc<dyn DeliveryStore>,
    config: DeliveryConfig,
    client: Arc<DeliveryClient>,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    clock: Arc<dyn Clock>,
}

impl DeliveryWorker {
    /// Creates a worker.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        broker: Arc<dyn JobBroker>,
        store: Arc<dyn DeliveryStore>,
        config: DeliveryConfig,
        client: Arc<DeliveryClient>,
        stats: Arc<RwLock<EngineStats>>,
        cancellation_token: CancellationToken,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { id, broker, store, config, client, stats, cancellation_token, clock }
    }

    /// Main loop: claim and process batches until cancelled.
    ///
    /// # Errors
    ///
    /// Batch errors are logged and retried after a pause; the loop itself
    /// only ends on cancellation.
    pub async fn run(&self) -> Result<()> {
        info!(worker_id = self.id, "delivery worker starting");

        loop {
            if self.cancellation_token.is_cancelled() {
                info!(worker_id = self.id, "delivery worker received shutdown signal");
                break;
            }

            match self.process_batch().await {
                Ok(0) => {
                    tokio::select! {
                        () = self.clock.sleep(self.config.poll_interval) => {}
                        () = self.cancellation_token.cancelled() => break,
                    }
                },
                Ok(_) => {},
                Err(error) => {
                    error!(
                        worker_id = self.id,
                        error = %error,
                        "worker batch processing failed"
                    );
                    // Back off before retrying to avoid a tight error loop.
                    tokio::select! {
                        () = self.clock.sleep(Duration::from_secs(5)) => {}
                        () = self.cancellation_token.cancelled() => break,
                    }
                },
            }
        }

        info!(worker_id = self.id, "delivery worker stopped");
        Ok(())
    }

    /// Claims and processes one batch of ready jobs.
    ///
    /// # Errors
    ///
    /// Returns an error if claiming from the broker fails; per-job failures
    /// are absorbed into the delivery state machine.
    pub async fn process_batch(&self) -> Result<usize> {
        let jobs = self.broker.claim(self.config.batch_size).await?;
        let batch_size = jobs.len();

        debug!(worker_id = self.id, batch_size, "processing job batch");

        for job in jobs {
            if self.cancellation_token.is_cancelled() {
                break;
            }
            if let Err(error) = self.process_job(job).await {
                error!(
                    worker_id = self.id,
                    error = %error,
                    "job processing failed"
                );
            }
        }

        Ok(batch_size)
    }

    async fn process_job(&self, job: DeliveryJob) -> Result<()> {
        {
            let mut stats = self.stats.write().await;
            stats.in_flight += 1;
        }

        let result = self.execute_attempt(&job).await;

        {
            let mut stats = self.stats.write().await;
            stats.in_flight -= 1;
            stats.jobs_processed += 1;
        }

        result
    }

    /// Runs one attempt for a claimed job and records its outcome.
    async fn execute_attempt(&self, job: &DeliveryJob) -> Result<()> {
        // Claiming the record enforces the single-writer rule; failure here
        // means the record is gone or another writer holds it, and the job
        // must not loop.
        let record = match self.store.mark_processing(job.delivery_id).await {
            Ok(record) => record,
            Err(store_error) => {
                error!(
                    worker_id = self.id,
                    delivery_id = %job.delivery_id,
                    error = %store_error,
                    "cannot claim delivery record, parking job"
                );
                self.broker
                    .fail(job.job_id.clone(), store_error.to_string(), None)
                    .await?;
                return Err(store_error);
            },
        };
        let attempts_after = record.attempts + 1;

        debug!(
            worker_id = self.id,
            delivery_id = %job.delivery_id,
            attempt = attempts_after,
            url = %job.url,
            "attempting delivery"
        );

        // The client applies the same budget per request; the outer timeout
        // additionally caps anything the transport cannot account for.
        let outcome = match tokio::time::timeout(job.timeout(), self.client.deliver(job)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(EngineError::timeout(job.timeout_ms)),
        };

        match outcome {
            Ok(response) if response.is_success => {
                self.finish_delivered(job, &response, attempts_after).await
            },
            Ok(response) => {
                let error = classify_response(&response);
                self.finish_failed_attempt(job, attempts_after, &error).await
            },
            Err(error) if error.is_retryable() => {
                self.finish_failed_attempt(job, attempts_after, &error).await
            },
            Err(error) => {
                // Engine-internal failure: retrying cannot change the outcome.
                self.store
                    .record_failed(job.delivery_id, None, error.to_string())
                    .await?;
                self.broker.fail(job.job_id.clone(), error.to_string(), None).await?;
                {
                    let mut stats = self.stats.write().await;
                    stats.failed_permanently += 1;
                }
                error!(
                    worker_id = self.id,
                    delivery_id = %job.delivery_id,
                    error = %error,
                    "delivery failed with non-retryable error"
                );
                Ok(())
            },
        }
    }

    async fn finish_delivered(
        &self,
        job: &DeliveryJob,
        response: &DeliveryResponse,
        attempts_after: u32,
    ) -> Result<()> {
        let delivered_at = DateTime::<Utc>::from(self.clock.now_system());
        self.store
            .record_delivered(job.delivery_id, response.status_code, delivered_at)
            .await?;
        self.broker.complete(job.job_id.clone()).await?;

        {
            let mut stats = self.stats.write().await;
            stats.delivered += 1;
        }

        info!(
            worker_id = self.id,
            delivery_id = %job.delivery_id,
            status = response.status_code,
            attempt = attempts_after,
            duration_ms = response.duration.as_millis(),
            "delivery succeeded"
        );
        Ok(())
    }

    async fn finish_failed_attempt(
        &self,
        job: &DeliveryJob,
        attempts_after: u32,
        error: &EngineError,
    ) -> Result<()> {
        let status = error.status_code();

        match self.config.retry_policy.decide(attempts_after, job.max_retries) {
            RetryDecision::Retry { delay } => {
                self.store
                    .record_retrying(job.delivery_id, status, error.to_string())
                    .await?;
                self.broker
                    .fail(job.job_id.clone(), error.to_string(), Some(delay))
                    .await?;

                {
                    let mut stats = self.stats.write().await;
                    stats.retried += 1;
                }

                warn!(
                    worker_id = self.id,
                    delivery_id = %job.delivery_id,
                    attempt = attempts_after,
                    retry_in_secs = delay.as_secs(),
                    error = %error,
                    "delivery failed, retry scheduled"
                );
            },
            RetryDecision::GiveUp { reason } => {
                self.store
                    .record_failed(job.delivery_id, status, error.to_string())
                    .await?;
                self.broker.fail(job.job_id.clone(), error.to_string(), None).await?;

                {
                    let mut stats = self.stats.write().await;
                    stats.failed_permanently += 1;
                }

                error!(
                    worker_id = self.id,
                    delivery_id = %job.delivery_id,
                    attempt = attempts_after,
                    reason = %reason,
                    error = %error,
                    "delivery permanently failed"
                );
            },
        }
        Ok(())
    }
}

/// Maps a non-2xx response to the delivery error taxonomy.
fn classify_response(response: &DeliveryResponse) -> EngineError {
    match response.status_code {
        429 => {
            let retry_after = response
                .headers
                .get("retry-after")
                .and_then(|value| value.parse::<u64>().ok())
                .unwrap_or(60);
            EngineError::rate_limited(retry_after)
        },
        status @ 400..=499 => EngineError::client_error(status, response.body.clone()),
        status => EngineError::server_error(status, response.body.clone()),
    }
}
