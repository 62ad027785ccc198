//! Error types and result handling for core domain operations.
//!
//! Covers validation failures, missing entities, and illegal lifecycle
//! transitions. Infrastructure failures (broker, record store, HTTP) have
//! their own taxonomy in the engine crate.

use thiserror::Error;

use crate::models::DeliveryStatus;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for domain operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Entity not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid input supplied at construction time.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Requested lifecycle transition is not allowed from the current state.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        /// State the record is currently in.
        from: DeliveryStatus,
        /// State the transition attempted to reach.
        to: DeliveryStatus,
    },

    /// Operation conflicts with the single-writer rule for delivery records.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl CoreError {
    /// Creates an invalid-input error from a message.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Creates a not-found error from a message.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Creates a conflict error from a message.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }
}
