//! Core domain models for the relay delivery engine.
//!
//! Provides strongly-typed identifiers, the delivery job and lifecycle
//! record types, outbound authentication configuration, the per-provider
//! send-rate table, and the clock abstraction the rest of the workspace
//! depends on for deterministic time handling.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod providers;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{
    AuthConfig, DeliveryId, DeliveryJob, DeliveryStatus, EventPayload, JobId, JobPriority,
    QueueStats, TargetId, WebhookDelivery,
};
pub use providers::Provider;
pub use time::{Clock, RealClock, TestClock};
