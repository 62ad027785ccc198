//! Error types for rate limiting operations.
//!
//! Only the shared-store path can fail; the in-process limiter is
//! infallible. Store failures must surface to the caller so the hybrid
//! layer can decide on fallback; a limiter never silently answers
//! "allowed" because its store is down.

use thiserror::Error;

/// Result type alias using `RateLimitError`.
pub type Result<T> = std::result::Result<T, RateLimitError>;

/// Errors from the shared rate limit store.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// The coordination store rejected or dropped the request.
    #[error("coordination store unavailable: {message}")]
    StoreUnavailable {
        /// Underlying failure description.
        message: String,
    },

    /// No shared store is configured for this limiter.
    #[error("no coordination store configured")]
    NotConfigured,
}

impl RateLimitError {
    /// Creates a store-unavailable error from a message.
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable { message: message.into() }
    }
}

impl From<redis::RedisError> for RateLimitError {
    fn from(err: redis::RedisError) -> Self {
        Self::StoreUnavailable { message: err.to_string() }
    }
}
