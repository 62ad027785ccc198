//! Worker pool lifecycle management.
//!
//! Supervises the delivery worker tasks: spawning, collective shutdown with
//! a bounded timeout, and a drop guard that cancels orphaned workers if the
//! pool is dropped without a graceful shutdown.

use std::{sync::Arc, time::Duration};

use relay_core::Clock;
use tokio::{sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    broker::JobBroker,
    client::DeliveryClient,
    error::{EngineError, Result},
    store::DeliveryStore,
    worker::{DeliveryConfig, DeliveryWorker, EngineStats},
};

/// Supervised pool of delivery workers.
pub struct WorkerPool {
    broker: Arc<dyn JobBroker>,
    store: Arc<dyn DeliveryStore>,
    config: DeliveryConfig,
    client: Arc<DeliveryClient>,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    worker_handles: Vec<JoinHandle<Result<()>>>,
    clock: Arc<dyn Clock>,
}

impl WorkerPool {
    /// Creates an empty pool.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        broker: Arc<dyn JobBroker>,
        store: Arc<dyn DeliveryStore>,
        config: DeliveryConfig,
        client: Arc<DeliveryClient>,
        stats: Arc<RwLock<EngineStats>>,
        cancellation_token: CancellationToken,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            broker,
            store,
            config,
            client,
            stats,
            cancellation_token,
            worker_handles: Vec::new(),
            clock,
        }
    }

    /// Spawns the configured number of workers and returns immediately.
    ///
    /// # Errors
    ///
    /// Currently infallible; the signature allows future validation.
    pub async fn spawn_workers(&mut self) -> Result<()> {
        info!(worker_count = self.config.worker_count, "spawning delivery workers");

        {
            let mut stats = self.stats.write().await;
            stats.active_workers = self.config.worker_count;
        }

        for worker_id in 0..self.config.worker_count {
            let worker = DeliveryWorker::new(
                worker_id,
                self.broker.clone(),
                self.store.clone(),
                self.config.clone(),
                self.client.clone(),
                self.stats.clone(),
                self.cancellation_token.clone(),
                self.clock.clone(),
            );

            let handle = tokio::spawn(async move {
                let result = worker.run().await;
                if let Err(ref worker_error) = result {
                    error!(
                        worker_id,
                        error = %worker_error,
                        "delivery worker terminated with error"
                    );
                }
                result
            });
            self.worker_handles.push(handle);
        }

        info!(spawned = self.worker_handles.len(), "delivery workers spawned");
        Ok(())
    }

    /// Signals cancellation and waits for workers within `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ShutdownTimeout`] if workers do not finish in
    /// time; panicked workers are reported but do not fail the shutdown.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            worker_count = self.worker_handles.len(),
            timeout_secs = timeout.as_secs(),
            "initiating graceful worker shutdown"
        );

        self.cancellation_token.cancel();

        let stats = self.stats.clone();
        let join_all = async {
            let mut panics = 0usize;
            for (worker_id, handle) in
                std::mem::take(&mut self.worker_handles).into_iter().enumerate()
            {
                match handle.await {
                    Ok(Ok(())) => {},
                    Ok(Err(worker_error)) => {
                        warn!(
                            worker_id,
                            error = %worker_error,
                            "worker finished with error during shutdown"
                        );
                    },
                    Err(join_error) => {
                        panics += 1;
                        error!(
                            worker_id,
                            error = %join_error,
                            "worker task panicked"
                        );
                    },
                }
            }

            {
                let mut stats = stats.write().await;
                stats.active_workers = 0;
            }
            panics
        };

        match tokio::time::timeout(timeout, join_all).await {
            Ok(panics) => {
                if panics > 0 {
                    warn!(panics, "some workers panicked before shutdown");
                }
                info!("worker pool shutdown complete");
                Ok(())
            },
            Err(_) => {
                error!(
                    timeout_secs = timeout.as_secs(),
                    "worker shutdown timed out, workers may still be running"
                );
                Err(EngineError::ShutdownTimeout { timeout })
            },
        }
    }

    /// Whether any worker task is still running.
    pub fn has_active_workers(&self) -> bool {
        self.worker_handles.iter().any(|handle| !handle.is_finished())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let active = self.worker_handles.iter().filter(|h| !h.is_finished()).count();
        if active > 0 && !self.cancellation_token.is_cancelled() {
            self.cancellation_token.cancel();
            warn!(
                active_workers = active,
                "worker pool dropped without graceful shutdown, cancelling workers"
            );
        }
    }
}
