//! Operational controls and aggregate statistics.
//!
//! Thin layer over the broker for operational tooling: pause/resume are
//! control-plane switches that never touch in-flight work, `drain` and
//! `clean` manage retention, and `health_check` is deliberately the only
//! operation that swallows errors; every other control propagates them,
//! because there is no safe automatic fallback for a failed pause or clean.

use std::{sync::Arc, time::Duration};

use relay_core::QueueStats;
use tracing::{info, warn};

use crate::{
    broker::{JobBroker, JobState},
    error::Result,
    COMPLETED_RETENTION_LIMIT, COMPLETED_RETENTION_MS, FAILED_RETENTION_MS,
};

/// Queue control and observability operations.
pub struct QueueAdmin {
    broker: Arc<dyn JobBroker>,
}

impl QueueAdmin {
    /// Creates an admin surface over the given broker.
    pub fn new(broker: Arc<dyn JobBroker>) -> Self {
        Self { broker }
    }

    /// Aggregate queue statistics.
    pub async fn stats(&self) -> Result<QueueStats> {
        let counts = self.broker.counts().await?;
        Ok(QueueStats::from_counts(
            counts.waiting,
            counts.active,
            counts.completed,
            counts.failed,
            counts.delayed,
        ))
    }

    /// Stops new dispatch immediately; workers mid-delivery are unaffected.
    pub async fn pause(&self) -> Result<()> {
        self.broker.pause().await?;
        info!("queue paused");
        Ok(())
    }

    /// Restarts dispatch after a pause.
    pub async fn resume(&self) -> Result<()> {
        self.broker.resume().await?;
        info!("queue resumed");
        Ok(())
    }

    /// Whether dispatch is currently paused.
    pub async fn is_paused(&self) -> Result<bool> {
        self.broker.is_paused().await
    }

    /// Removes all not-yet-started jobs. Returns how many were removed.
    pub async fn drain(&self) -> Result<u64> {
        let removed = self.broker.drain().await?;
        info!(removed, "queue drained");
        Ok(removed)
    }

    /// Removes up to `limit` jobs in `state` older than `grace`, returning
    /// the removed job ids.
    pub async fn clean(
        &self,
        grace: Duration,
        limit: usize,
        state: JobState,
    ) -> Result<Vec<relay_core::JobId>> {
        let removed = self.broker.clean(grace, limit, state).await?;
        info!(removed = removed.len(), state = %state, "queue cleaned");
        Ok(removed)
    }

    /// Removes completed jobs past the default retention (24h, up to 1000).
    pub async fn clean_completed(&self) -> Result<Vec<relay_core::JobId>> {
        self.clean(
            Duration::from_millis(COMPLETED_RETENTION_MS),
            COMPLETED_RETENTION_LIMIT,
            JobState::Completed,
        )
        .await
    }

    /// Removes failed jobs past the default retention (7 days, up to 1000).
    ///
    /// Failed jobs are kept longer than completed ones so operators have
    /// time to inspect and manually retry them.
    pub async fn clean_failed(&self) -> Result<Vec<relay_core::JobId>> {
        self.clean(
            Duration::from_millis(FAILED_RETENTION_MS),
            COMPLETED_RETENTION_LIMIT,
            JobState::Failed,
        )
        .await
    }

    /// Lightweight connectivity probe.
    ///
    /// Returns `false` on any broker error instead of propagating it: the
    /// caller is a health endpoint, not an operator who can react.
    pub async fn health_check(&self) -> bool {
        match self.broker.ping().await {
            Ok(_) => true,
            Err(error) => {
                warn!(error = %error, "queue health check failed");
                false
            },
        }
    }

    /// Releases broker resources at process shutdown.
    pub async fn close(&self) -> Result<()> {
        self.broker.close().await?;
        info!("queue closed");
        Ok(())
    }
}
