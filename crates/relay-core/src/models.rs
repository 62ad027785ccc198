//! Domain models and strongly-typed identifiers.
//!
//! Defines delivery jobs, the persisted delivery lifecycle record, outbound
//! authentication configuration, and newtype ID wrappers for compile-time
//! type safety. The lifecycle state machine lives here as transition methods
//! on [`WebhookDelivery`] so every store implementation enforces the same
//! rules.

use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// Strongly-typed delivery identifier.
///
/// One `DeliveryId` exists per logical delivery attempt chain. The broker
/// job id is derived from it, which is what makes re-enqueueing the same
/// delivery idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryId(pub Uuid);

impl DeliveryId {
    /// Creates a new random delivery ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DeliveryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for DeliveryId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Strongly-typed identifier for the owner of outbound work.
///
/// A target is the configured destination a delivery belongs to (a webhook
/// endpoint registration, a campaign batch). Owner-scoped queue operations
/// such as `cancel_by_owner` are keyed by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetId(pub Uuid);

impl TargetId {
    /// Creates a new random target ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TargetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TargetId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Broker-level job identifier, derived deterministically from the delivery.
///
/// Two enqueue calls for the same delivery produce the same `JobId`, so the
/// broker can collapse them into a single unit of work.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Derives the job id for a delivery: `delivery-{id}`.
    pub fn for_delivery(delivery_id: DeliveryId) -> Self {
        Self(format!("delivery-{delivery_id}"))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Advisory dispatch priority for queued jobs.
///
/// High-priority jobs are handed to workers ahead of normal and low ones
/// when several are ready at the same instant. This is not a strict global
/// order; jobs of equal priority dispatch in roughly FIFO order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobPriority {
    /// Dispatched ahead of other ready work.
    High,
    /// Default priority.
    Normal,
    /// Dispatched after other ready work.
    Low,
}

impl JobPriority {
    /// Numeric rank used for dispatch ordering; lower dispatches first.
    pub fn rank(self) -> u8 {
        match self {
            Self::High => 1,
            Self::Normal => 2,
            Self::Low => 3,
        }
    }
}

impl Default for JobPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Normal => write!(f, "normal"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// Event payload carried by a delivery job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    /// Event type identifier, e.g. `invoice.paid`.
    pub event_type: String,
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
    /// Event body, opaque to the engine.
    pub data: serde_json::Value,
}

impl EventPayload {
    /// Creates a payload stamped with the given emission time.
    pub fn new(
        event_type: impl Into<String>,
        timestamp: DateTime<Utc>,
        data: serde_json::Value,
    ) -> Self {
        Self { event_type: event_type.into(), timestamp, data }
    }
}

/// Outbound authentication configuration for a target.
///
/// Validation happens when the target configuration is created, via the
/// constructors here, not at delivery time. Deserialized configurations
/// should be re-checked with [`AuthConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthConfig {
    /// No authentication headers.
    None,
    /// `Authorization: Basic {value}` with pre-encoded credentials.
    Basic {
        /// Pre-encoded `user:pass` credential string.
        value: String,
    },
    /// `Authorization: Bearer {token}`.
    Bearer {
        /// Bearer token.
        token: String,
    },
    /// Arbitrary header/value pair.
    ApiKey {
        /// Header name to send the key under.
        header: String,
        /// Key value.
        value: String,
    },
    /// HMAC-SHA256 signature of the payload body.
    Hmac {
        /// Shared signing secret.
        secret: String,
    },
}

impl AuthConfig {
    /// Basic auth with pre-encoded credentials.
    pub fn basic(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(CoreError::invalid_input("basic auth requires a credential value"));
        }
        Ok(Self::Basic { value })
    }

    /// Bearer token auth.
    pub fn bearer(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.is_empty() {
            return Err(CoreError::invalid_input("bearer auth requires a token"));
        }
        Ok(Self::Bearer { token })
    }

    /// API-key auth under a caller-chosen header.
    pub fn api_key(header: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        let header = header.into();
        let value = value.into();
        if header.is_empty() || value.is_empty() {
            return Err(CoreError::invalid_input("api key auth requires both header and value"));
        }
        Ok(Self::ApiKey { header, value })
    }

    /// HMAC payload signing.
    pub fn hmac(secret: impl Into<String>) -> Result<Self> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(CoreError::invalid_input("hmac auth requires a secret"));
        }
        Ok(Self::Hmac { secret })
    }

    /// Re-validates a configuration that bypassed the constructors.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::None => Ok(()),
            Self::Basic { value } if value.is_empty() => {
                Err(CoreError::invalid_input("basic auth requires a credential value"))
            },
            Self::Bearer { token } if token.is_empty() => {
                Err(CoreError::invalid_input("bearer auth requires a token"))
            },
            Self::ApiKey { header, value } if header.is_empty() || value.is_empty() => {
                Err(CoreError::invalid_input("api key auth requires both header and value"))
            },
            Self::Hmac { secret } if secret.is_empty() => {
                Err(CoreError::invalid_input("hmac auth requires a secret"))
            },
            _ => Ok(()),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::None
    }
}

/// Default per-attempt delivery timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default retry budget per delivery.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Unit of outbound work handed to the broker.
///
/// The `job_id` is derived from `delivery_id`, so enqueueing the same
/// delivery twice yields at most one live unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryJob {
    /// Idempotent broker job id.
    pub job_id: JobId,
    /// Owner of this work.
    pub target_id: TargetId,
    /// Delivery record this job drives.
    pub delivery_id: DeliveryId,
    /// Destination URL.
    pub url: String,
    /// Payload to deliver.
    pub payload: EventPayload,
    /// Outbound authentication.
    pub auth: AuthConfig,
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
    /// 1-based attempt number of the next execution.
    pub attempt: u32,
    /// Retry budget; the delivery fails terminally once `attempts` reaches it.
    pub max_retries: u32,
    /// Advisory dispatch priority.
    pub priority: JobPriority,
    /// Initial dispatch delay in milliseconds, if any.
    pub delay_ms: Option<u64>,
}

impl DeliveryJob {
    /// Creates a job with default timeout, retry budget, and priority.
    pub fn new(
        target_id: TargetId,
        delivery_id: DeliveryId,
        url: impl Into<String>,
        payload: EventPayload,
    ) -> Self {
        Self {
            job_id: JobId::for_delivery(delivery_id),
            target_id,
            delivery_id,
            url: url.into(),
            payload,
            auth: AuthConfig::None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            attempt: 1,
            max_retries: DEFAULT_MAX_RETRIES,
            priority: JobPriority::Normal,
            delay_ms: None,
        }
    }

    /// Sets the outbound authentication configuration.
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    /// Sets the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the dispatch priority.
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets an initial dispatch delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = Some(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Per-attempt timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Initial dispatch delay as a `Duration`, if configured.
    pub fn delay(&self) -> Option<Duration> {
        self.delay_ms.map(Duration::from_millis)
    }
}

/// Delivery lifecycle status.
///
/// ```text
/// Pending -> Processing -> Delivered
///                       -> Retrying -> Processing -> ...
///                       -> Failed
/// ```
///
/// `Delivered` and `Failed` are terminal; a `Failed` record may be reset to
/// `Pending` by an operator-initiated retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    /// Created, waiting for a worker.
    Pending,
    /// A worker is executing an attempt.
    Processing,
    /// Terminal success after a 2xx response.
    Delivered,
    /// Failed attempt with budget remaining; re-enqueued with backoff.
    Retrying,
    /// Terminal failure after the retry budget is exhausted.
    Failed,
}

impl DeliveryStatus {
    /// Whether no further automatic transition occurs from this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }

    /// Lowercase string form, used by record stores.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Delivered => "delivered",
            Self::Retrying => "retrying",
            Self::Failed => "failed",
        }
    }

    /// Parses the lowercase string form.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "delivered" => Ok(Self::Delivered),
            "retrying" => Ok(Self::Retrying),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::invalid_input(format!("unknown delivery status: {other}"))),
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted delivery lifecycle record.
///
/// Mutated only by the worker handling the current attempt and, exclusively
/// for records in terminal `Failed` state, by an operator-initiated manual
/// retry. The transition methods enforce that single-writer rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookDelivery {
    /// Unique identifier for this delivery.
    pub id: DeliveryId,
    /// Owner of the delivery.
    pub target_id: TargetId,
    /// Event type being delivered.
    pub event: String,
    /// Event body.
    pub payload: serde_json::Value,
    /// Current lifecycle state.
    pub status: DeliveryStatus,
    /// HTTP status of the most recent attempt, when one was received.
    pub status_code: Option<u16>,
    /// Error description of the most recent failed attempt.
    pub error: Option<String>,
    /// Number of completed attempts.
    pub attempts: u32,
    /// When the delivery succeeded.
    pub delivered_at: Option<DateTime<Utc>>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl WebhookDelivery {
    /// Creates a new record in `Pending` state.
    pub fn new(
        id: DeliveryId,
        target_id: TargetId,
        event: impl Into<String>,
        payload: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            target_id,
            event: event.into(),
            payload,
            status: DeliveryStatus::Pending,
            status_code: None,
            error: None,
            attempts: 0,
            delivered_at: None,
            created_at,
        }
    }

    /// Transitions to `Processing` when a worker picks up the delivery.
    ///
    /// Allowed from `Pending` and `Retrying` only.
    pub fn begin_attempt(&mut self) -> Result<()> {
        match self.status {
            DeliveryStatus::Pending | DeliveryStatus::Retrying => {
                self.status = DeliveryStatus::Processing;
                Ok(())
            },
            from => {
                Err(CoreError::InvalidTransition { from, to: DeliveryStatus::Processing })
            },
        }
    }

    /// Records a successful attempt and transitions to terminal `Delivered`.
    pub fn record_delivered(&mut self, status_code: u16, at: DateTime<Utc>) -> Result<()> {
        if self.status != DeliveryStatus::Processing {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to: DeliveryStatus::Delivered,
            });
        }
        self.status = DeliveryStatus::Delivered;
        self.status_code = Some(status_code);
        self.error = None;
        self.attempts += 1;
        self.delivered_at = Some(at);
        Ok(())
    }

    /// Records a failed attempt with budget remaining; the job is expected
    /// to be re-enqueued with backoff.
    pub fn record_retrying(
        &mut self,
        status_code: Option<u16>,
        error: impl Into<String>,
    ) -> Result<()> {
        if self.status != DeliveryStatus::Processing {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to: DeliveryStatus::Retrying,
            });
        }
        self.status = DeliveryStatus::Retrying;
        self.status_code = status_code;
        self.error = Some(error.into());
        self.attempts += 1;
        Ok(())
    }

    /// Records a final failed attempt and transitions to terminal `Failed`.
    pub fn record_failed(
        &mut self,
        status_code: Option<u16>,
        error: impl Into<String>,
    ) -> Result<()> {
        if self.status != DeliveryStatus::Processing {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to: DeliveryStatus::Failed,
            });
        }
        self.status = DeliveryStatus::Failed;
        self.status_code = status_code;
        self.error = Some(error.into());
        self.attempts += 1;
        Ok(())
    }

    /// Operator-initiated reset of a terminally failed delivery.
    ///
    /// Grants a fresh retry budget: `attempts` returns to 0 and the error is
    /// cleared. Rejected with a conflict for records in any other state,
    /// since those still have a writer.
    pub fn reset_for_retry(&mut self) -> Result<()> {
        if self.status != DeliveryStatus::Failed {
            return Err(CoreError::conflict(format!(
                "manual retry requires a failed delivery, found {}",
                self.status
            )));
        }
        self.status = DeliveryStatus::Pending;
        self.status_code = None;
        self.error = None;
        self.attempts = 0;
        Ok(())
    }
}

/// Read-only aggregate of queue state for operational tooling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Jobs waiting for dispatch.
    pub waiting: u64,
    /// Jobs currently being processed.
    pub active: u64,
    /// Terminally delivered jobs.
    pub delivered: u64,
    /// Terminally failed jobs.
    pub failed: u64,
    /// Jobs scheduled for a delayed retry.
    pub retrying: u64,
    /// Total jobs across all states.
    pub total: u64,
    /// `delivered / total * 100`; 0 when the queue has seen no jobs.
    pub success_rate: f64,
}

impl QueueStats {
    /// Computes the aggregate from per-state counts.
    #[allow(clippy::cast_precision_loss)]
    pub fn from_counts(waiting: u64, active: u64, delivered: u64, failed: u64, retrying: u64) -> Self {
        let total = waiting + active + delivered + failed + retrying;
        let success_rate =
            if total == 0 { 0.0 } else { delivered as f64 / total as f64 * 100.0 };
        Self { waiting, active, delivered, failed, retrying, total, success_rate }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_delivery() -> WebhookDelivery {
        WebhookDelivery::new(
            DeliveryId::new(),
            TargetId::new(),
            "invoice.paid",
            serde_json::json!({"amount": 1200}),
            Utc::now(),
        )
    }

    #[test]
    fn job_id_is_deterministic_per_delivery() {
        let delivery_id = DeliveryId::new();
        assert_eq!(JobId::for_delivery(delivery_id), JobId::for_delivery(delivery_id));
        assert_eq!(
            JobId::for_delivery(delivery_id).as_str(),
            format!("delivery-{delivery_id}")
        );
    }

    #[test]
    fn lifecycle_exhausts_budget_after_three_failures() {
        let mut delivery = sample_delivery();

        for expected_attempts in 1..=2u32 {
            delivery.begin_attempt().expect("attempt should start");
            delivery.record_retrying(Some(503), "upstream unavailable").expect("retry recorded");
            assert_eq!(delivery.status, DeliveryStatus::Retrying);
            assert_eq!(delivery.attempts, expected_attempts);
        }

        delivery.begin_attempt().expect("final attempt should start");
        delivery.record_failed(Some(503), "upstream unavailable").expect("failure recorded");
        assert_eq!(delivery.status, DeliveryStatus::Failed);
        assert_eq!(delivery.attempts, 3);
    }

    #[test]
    fn successful_attempt_is_terminal() {
        let mut delivery = sample_delivery();
        delivery.begin_attempt().expect("attempt should start");
        delivery.record_delivered(200, Utc::now()).expect("success recorded");

        assert_eq!(delivery.status, DeliveryStatus::Delivered);
        assert!(delivery.delivered_at.is_some());
        assert!(delivery.begin_attempt().is_err());
    }

    #[test]
    fn manual_retry_resets_failed_record() {
        let mut delivery = sample_delivery();
        delivery.begin_attempt().expect("attempt should start");
        delivery.record_failed(Some(500), "boom").expect("failure recorded");

        delivery.reset_for_retry().expect("manual retry should succeed");
        assert_eq!(delivery.status, DeliveryStatus::Pending);
        assert_eq!(delivery.attempts, 0);
        assert_eq!(delivery.error, None);
    }

    #[test]
    fn manual_retry_conflicts_unless_failed() {
        let mut delivery = sample_delivery();
        assert!(matches!(delivery.reset_for_retry(), Err(CoreError::Conflict(_))));

        delivery.begin_attempt().expect("attempt should start");
        assert!(matches!(delivery.reset_for_retry(), Err(CoreError::Conflict(_))));
    }

    #[test]
    fn processing_requires_pending_or_retrying() {
        let mut delivery = sample_delivery();
        delivery.begin_attempt().expect("first transition allowed");
        assert!(matches!(
            delivery.begin_attempt(),
            Err(CoreError::InvalidTransition { from: DeliveryStatus::Processing, .. })
        ));
    }

    #[test]
    fn auth_constructors_enforce_required_fields() {
        assert!(AuthConfig::bearer("").is_err());
        assert!(AuthConfig::api_key("", "value").is_err());
        assert!(AuthConfig::api_key("X-Api-Key", "").is_err());
        assert!(AuthConfig::hmac("").is_err());
        assert!(AuthConfig::basic("").is_err());

        let auth = AuthConfig::api_key("X-Api-Key", "s3cret").expect("valid config");
        assert!(auth.validate().is_ok());
    }

    #[test]
    fn auth_config_serializes_with_type_tag() {
        let auth = AuthConfig::bearer("token-123").expect("valid config");
        let json = serde_json::to_value(&auth).expect("serializes");
        assert_eq!(json["type"], "BEARER");
    }

    #[test]
    fn queue_stats_success_rate() {
        let stats = QueueStats::from_counts(5, 2, 100, 3, 10);
        assert_eq!(stats.total, 120);
        assert!((stats.success_rate - 83.33).abs() < 0.01);

        let empty = QueueStats::from_counts(0, 0, 0, 0, 0);
        assert_eq!(empty.success_rate, 0.0);
    }

    #[test]
    fn priority_rank_orders_dispatch() {
        assert!(JobPriority::High.rank() < JobPriority::Normal.rank());
        assert!(JobPriority::Normal.rank() < JobPriority::Low.rank());
    }
}
