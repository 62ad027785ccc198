//! Persisted delivery record storage.
//!
//! The `WebhookDelivery` record is the durable view of a delivery's
//! lifecycle, separate from the broker's transient job state. Stores
//! enforce the single-writer rule with conditional transitions: a worker
//! can only advance a record it legitimately holds, and a manual retry
//! only succeeds against a terminally failed record.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Mutex};

use chrono::{DateTime, Utc};
use relay_core::{DeliveryId, DeliveryStatus, TargetId, WebhookDelivery};
use sqlx::{postgres::PgRow, PgPool, Row};

use crate::error::{EngineError, Result};

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Storage operations the delivery engine performs on lifecycle records.
pub trait DeliveryStore: Send + Sync + 'static {
    /// Inserts a record unless one already exists for the delivery.
    ///
    /// Idempotent so that re-enqueueing a delivery never resets an existing
    /// record's progress.
    fn create_if_absent(&self, delivery: WebhookDelivery) -> StoreFuture<'_, Result<()>>;

    /// Looks up a record by delivery id.
    fn find(&self, id: DeliveryId) -> StoreFuture<'_, Result<Option<WebhookDelivery>>>;

    /// Transitions a record to `Processing` and returns the updated record.
    ///
    /// Fails with a conflict unless the record is `Pending` or `Retrying`,
    /// the states a freshly claimed job can legitimately be in.
    fn mark_processing(&self, id: DeliveryId) -> StoreFuture<'_, Result<WebhookDelivery>>;

    /// Records a successful attempt: terminal `Delivered`.
    fn record_delivered(
        &self,
        id: DeliveryId,
        status_code: u16,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Result<()>>;

    /// Records a failed attempt with budget remaining: `Retrying`.
    fn record_retrying(
        &self,
        id: DeliveryId,
        status_code: Option<u16>,
        error: String,
    ) -> StoreFuture<'_, Result<()>>;

    /// Records a final failed attempt: terminal `Failed`.
    fn record_failed(
        &self,
        id: DeliveryId,
        status_code: Option<u16>,
        error: String,
    ) -> StoreFuture<'_, Result<()>>;

    /// Operator-initiated reset of a failed record to `Pending` with a
    /// fresh budget. Conflicts unless the record is `Failed`.
    fn reset_for_retry(&self, id: DeliveryId) -> StoreFuture<'_, Result<WebhookDelivery>>;
}

/// In-memory record store.
///
/// Backs tests and embedded deployments; transitions go through the model
/// methods so the state machine is enforced identically to the SQL paths.
#[derive(Default)]
pub struct InMemoryDeliveryStore {
    records: Mutex<HashMap<DeliveryId, WebhookDelivery>>,
}

impl InMemoryDeliveryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<DeliveryId, WebhookDelivery>> {
        match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn with_record<T>(
        &self,
        id: DeliveryId,
        apply: impl FnOnce(&mut WebhookDelivery) -> Result<T>,
    ) -> Result<T> {
        let mut records = self.lock();
        let record = records
            .get_mut(&id)
            .ok_or_else(|| EngineError::store(format!("delivery {id} not found")))?;
        apply(record)
    }
}

impl DeliveryStore for InMemoryDeliveryStore {
    fn create_if_absent(&self, delivery: WebhookDelivery) -> StoreFuture<'_, Result<()>> {
        Box::pin(async move {
            self.lock().entry(delivery.id).or_insert(delivery);
            Ok(())
        })
    }

    fn find(&self, id: DeliveryId) -> StoreFuture<'_, Result<Option<WebhookDelivery>>> {
        Box::pin(async move { Ok(self.lock().get(&id).cloned()) })
    }

    fn mark_processing(&self, id: DeliveryId) -> StoreFuture<'_, Result<WebhookDelivery>> {
        Box::pin(async move {
            self.with_record(id, |record| {
                record.begin_attempt()?;
                Ok(record.clone())
            })
        })
    }

    fn record_delivered(
        &self,
        id: DeliveryId,
        status_code: u16,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Result<()>> {
        Box::pin(async move {
            self.with_record(id, |record| {
                record.record_delivered(status_code, at)?;
                Ok(())
            })
        })
    }

    fn record_retrying(
        &self,
        id: DeliveryId,
        status_code: Option<u16>,
        error: String,
    ) -> StoreFuture<'_, Result<()>> {
        Box::pin(async move {
            self.with_record(id, |record| {
                record.record_retrying(status_code, error)?;
                Ok(())
            })
        })
    }

    fn record_failed(
        &self,
        id: DeliveryId,
        status_code: Option<u16>,
        error: String,
    ) -> StoreFuture<'_, Result<()>> {
        Box::pin(async move {
            self.with_record(id, |record| {
                record.record_failed(status_code, error)?;
                Ok(())
            })
        })
    }

    fn reset_for_retry(&self, id: DeliveryId) -> StoreFuture<'_, Result<WebhookDelivery>> {
        Box::pin(async move {
            self.with_record(id, |record| {
                record.reset_for_retry()?;
                Ok(record.clone())
            })
        })
    }
}

/// PostgreSQL-backed record store.
///
/// Transitions are conditional UPDATEs keyed on the current status, so the
/// single-writer rule holds even with several engine processes sharing the
/// table.
pub struct PostgresDeliveryStore {
    pool: PgPool,
}

const DELIVERY_COLUMNS: &str =
    "id, target_id, event, payload, status, status_code, error, attempts, delivered_at, created_at";

impl PostgresDeliveryStore {
    /// Creates a store over an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the delivery table and indexes if they do not exist.
    pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS webhook_deliveries (
                id UUID PRIMARY KEY,
                target_id UUID NOT NULL,
                event TEXT NOT NULL,
                payload JSONB NOT NULL,
                status TEXT NOT NULL,
                status_code INTEGER,
                error TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                delivered_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            ",
        )
        .execute(pool)
        .await
        .map_err(|e| EngineError::store(format!("failed to create webhook_deliveries: {e}")))?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_webhook_deliveries_status
            ON webhook_deliveries(status, created_at)
            ",
        )
        .execute(pool)
        .await
        .map_err(|e| EngineError::store(format!("failed to create status index: {e}")))?;

        Ok(())
    }

    fn parse_row(row: &PgRow) -> Result<WebhookDelivery> {
        let status_str: String = row
            .try_get("status")
            .map_err(|e| EngineError::store(format!("failed to read status: {e}")))?;
        let status = DeliveryStatus::parse(&status_str)
            .map_err(|e| EngineError::store(e.to_string()))?;

        let status_code: Option<i32> = row
            .try_get("status_code")
            .map_err(|e| EngineError::store(format!("failed to read status_code: {e}")))?;
        let attempts: i32 = row
            .try_get("attempts")
            .map_err(|e| EngineError::store(format!("failed to read attempts: {e}")))?;

        Ok(WebhookDelivery {
            id: DeliveryId(
                row.try_get("id")
                    .map_err(|e| EngineError::store(format!("failed to read id: {e}")))?,
            ),
            target_id: TargetId(
                row.try_get("target_id")
                    .map_err(|e| EngineError::store(format!("failed to read target_id: {e}")))?,
            ),
            event: row
                .try_get("event")
                .map_err(|e| EngineError::store(format!("failed to read event: {e}")))?,
            payload: row
                .try_get("payload")
                .map_err(|e| EngineError::store(format!("failed to read payload: {e}")))?,
            status,
            status_code: status_code.and_then(|code| u16::try_from(code).ok()),
            error: row
                .try_get("error")
                .map_err(|e| EngineError::store(format!("failed to read error: {e}")))?,
            attempts: u32::try_from(attempts).unwrap_or(0),
            delivered_at: row
                .try_get("delivered_at")
                .map_err(|e| EngineError::store(format!("failed to read delivered_at: {e}")))?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| EngineError::store(format!("failed to read created_at: {e}")))?,
        })
    }

    async fn conflict_for(&self, id: DeliveryId, operation: &str) -> EngineError {
        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM webhook_deliveries WHERE id = $1")
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await
                .ok()
                .flatten();

        match current {
            Some(status) => EngineError::conflict(format!(
                "{operation} rejected for delivery {id} in status {status}"
            )),
            None => EngineError::store(format!("delivery {id} not found")),
        }
    }
}

impl DeliveryStore for PostgresDeliveryStore {
    fn create_if_absent(&self, delivery: WebhookDelivery) -> StoreFuture<'_, Result<()>> {
        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO webhook_deliveries
                    (id, target_id, event, payload, status, status_code, error,
                     attempts, delivered_at, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (id) DO NOTHING
                ",
            )
            .bind(delivery.id.0)
            .bind(delivery.target_id.0)
            .bind(&delivery.event)
            .bind(&delivery.payload)
            .bind(delivery.status.as_str())
            .bind(delivery.status_code.map(i32::from))
            .bind(&delivery.error)
            .bind(i32::try_from(delivery.attempts).unwrap_or(i32::MAX))
            .bind(delivery.delivered_at)
            .bind(delivery.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::store(format!("failed to insert delivery: {e}")))?;
            Ok(())
        })
    }

    fn find(&self, id: DeliveryId) -> StoreFuture<'_, Result<Option<WebhookDelivery>>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries WHERE id = $1"
            ))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| EngineError::store(format!("failed to fetch delivery: {e}")))?;

            row.as_ref().map(Self::parse_row).transpose()
        })
    }

    fn mark_processing(&self, id: DeliveryId) -> StoreFuture<'_, Result<WebhookDelivery>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                r"
                UPDATE webhook_deliveries
                SET status = 'processing'
                WHERE id = $1 AND status IN ('pending', 'retrying')
                RETURNING {DELIVERY_COLUMNS}
                ",
            ))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| EngineError::store(format!("failed to mark processing: {e}")))?;

            match row {
                Some(row) => Self::parse_row(&row),
                None => Err(self.conflict_for(id, "mark_processing").await),
            }
        })
    }

    fn record_delivered(
        &self,
        id: DeliveryId,
        status_code: u16,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Result<()>> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE webhook_deliveries
                SET status = 'delivered', status_code = $2, error = NULL,
                    attempts = attempts + 1, delivered_at = $3
                WHERE id = $1 AND status = 'processing'
                ",
            )
            .bind(id.0)
            .bind(i32::from(status_code))
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::store(format!("failed to record delivery: {e}")))?;

            if result.rows_affected() == 0 {
                return Err(self.conflict_for(id, "record_delivered").await);
            }
            Ok(())
        })
    }

    fn record_retrying(
        &self,
        id: DeliveryId,
        status_code: Option<u16>,
        error: String,
    ) -> StoreFuture<'_, Result<()>> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE webhook_deliveries
                SET status = 'retrying', status_code = $2, error = $3,
                    attempts = attempts + 1
                WHERE id = $1 AND status = 'processing'
                ",
            )
            .bind(id.0)
            .bind(status_code.map(i32::from))
            .bind(&error)
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::store(format!("failed to record retry: {e}")))?;

            if result.rows_affected() == 0 {
                return Err(self.conflict_for(id, "record_retrying").await);
            }
            Ok(())
        })
    }

    fn record_failed(
        &self,
        id: DeliveryId,
        status_code: Option<u16>,
        error: String,
    ) -> StoreFuture<'_, Result<()>> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE webhook_deliveries
                SET status = 'failed', status_code = $2, error = $3,
                    attempts = attempts + 1
                WHERE id = $1 AND status = 'processing'
                ",
            )
            .bind(id.0)
            .bind(status_code.map(i32::from))
            .bind(&error)
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::store(format!("failed to record failure: {e}")))?;

            if result.rows_affected() == 0 {
                return Err(self.conflict_for(id, "record_failed").await);
            }
            Ok(())
        })
    }

    fn reset_for_retry(&self, id: DeliveryId) -> StoreFuture<'_, Result<WebhookDelivery>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                r"
                UPDATE webhook_deliveries
                SET status = 'pending', status_code = NULL, error = NULL, attempts = 0
                WHERE id = $1 AND status = 'failed'
                RETURNING {DELIVERY_COLUMNS}
                ",
            ))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| EngineError::store(format!("failed to reset delivery: {e}")))?;

            match row {
                Some(row) => Self::parse_row(&row),
                None => Err(self.conflict_for(id, "reset_for_retry").await),
            }
        })
    }
}

/// Builds the pending record an enqueue creates for a job.
pub(crate) fn record_for_job(
    job: &relay_core::DeliveryJob,
    created_at: DateTime<Utc>,
) -> WebhookDelivery {
    WebhookDelivery::new(
        job.delivery_id,
        job.target_id,
        job.payload.event_type.clone(),
        job.payload.data.clone(),
        created_at,
    )
}
