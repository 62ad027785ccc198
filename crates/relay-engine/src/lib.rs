//! Reliable outbound delivery engine.
//!
//! Producers hand [`relay_core::DeliveryJob`]s to the [`DeliveryQueue`]; a
//! pool of async workers claims ready jobs from the [`broker::JobBroker`],
//! performs the outbound HTTP request, and drives the persisted
//! [`relay_core::WebhookDelivery`] record through its lifecycle. Failed
//! attempts are re-enqueued with backoff rather than retried in-line, so a
//! worker is freed the moment an attempt finishes and the broker's delay
//! scheduling absorbs the wait.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ Producer │──▶│ DeliveryQueue │──▶│  JobBroker  │──▶│ Worker Pool  │
//! └──────────┘   └───────────────┘   └─────────────┘   └──────┬───────┘
//!                        │                  ▲                 │
//!                   SSRF gate          retry with             ▼
//!                  (fail closed)        backoff        ┌──────────────┐
//!                                                      │ HTTP client  │
//! ┌────────────┐   ┌───────────────┐                   └──────────────┘
//! │ QueueAdmin │──▶│ pause/drain/  │
//! └────────────┘   │ clean/stats   │
//!                  └───────────────┘
//! ```
//!
//! Delivery is at-least-once: job identifiers are derived from delivery
//! identifiers, so re-enqueueing the same delivery never creates a second
//! live unit of work, but a crash between delivery and acknowledgement can
//! replay an attempt.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod admin;
pub mod broker;
pub mod client;
pub mod error;
pub mod guard;
pub mod queue;
pub mod retry;
pub mod store;
pub mod worker;
pub mod worker_pool;

pub use admin::QueueAdmin;
pub use broker::{BrokeredJob, InMemoryBroker, JobBroker, JobCounts, JobState};
pub use client::{ClientConfig, DeliveryClient, DeliveryResponse};
pub use error::{EngineError, Result};
pub use guard::{AllowAllGuard, UrlGuard, UrlVerdict};
pub use queue::DeliveryQueue;
pub use retry::{RetryDecision, RetryPolicy};
pub use store::{DeliveryStore, InMemoryDeliveryStore, PostgresDeliveryStore};
pub use worker::{DeliveryConfig, DeliveryEngine, DeliveryWorker, EngineStats};
pub use worker_pool::WorkerPool;

/// Default number of concurrent delivery workers.
pub const DEFAULT_WORKER_COUNT: usize = 5;

/// Default number of jobs a worker claims per batch.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default interval between broker polls when no work is ready.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Retention grace period for completed jobs before `clean` removes them.
pub const COMPLETED_RETENTION_MS: u64 = 24 * 60 * 60 * 1000;

/// Maximum completed jobs removed per `clean` pass.
pub const COMPLETED_RETENTION_LIMIT: usize = 1000;

/// Retention grace period for failed jobs.
pub const FAILED_RETENTION_MS: u64 = 7 * 24 * 60 * 60 * 1000;
