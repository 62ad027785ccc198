//! Error types for delivery engine operations.
//!
//! Delivery failures (network, timeout, HTTP status) are recoverable via
//! the retry policy and are the only retryable class. Engine-internal
//! failures (broker, record store, configuration, unsafe URLs, lifecycle
//! conflicts) are not: retrying them without intervention would repeat the
//! same outcome.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Error taxonomy for the delivery engine.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Network-level connectivity failure reaching the target.
    #[error("network error: {message}")]
    Network {
        /// Underlying failure description.
        message: String,
    },

    /// Delivery attempt exceeded the per-job timeout.
    #[error("delivery timed out after {timeout_ms}ms")]
    Timeout {
        /// The budget that was exceeded, in milliseconds.
        timeout_ms: u64,
    },

    /// Target answered with a 4xx status.
    #[error("client error: HTTP {status}")]
    ClientError {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// Target answered with a 5xx status.
    #[error("server error: HTTP {status}")]
    ServerError {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// Target answered 429 with retry guidance.
    #[error("rate limited by target: retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds the target asked us to wait.
        retry_after_secs: u64,
    },

    /// The SSRF gate refused the target URL; the job was never enqueued.
    #[error("unsafe target url: {reason}")]
    UnsafeUrl {
        /// Why the gate refused.
        reason: String,
    },

    /// Operation conflicts with the record's lifecycle state.
    #[error("conflict: {message}")]
    Conflict {
        /// Conflict description.
        message: String,
    },

    /// Broker operation failed.
    #[error("broker error: {message}")]
    Broker {
        /// Underlying failure description.
        message: String,
    },

    /// Record store operation failed.
    #[error("record store error: {message}")]
    Store {
        /// Underlying failure description.
        message: String,
    },

    /// Invalid engine or job configuration.
    #[error("configuration error: {message}")]
    Configuration {
        /// What was misconfigured.
        message: String,
    },

    /// A worker task panicked.
    #[error("worker {worker_id} panicked: {message}")]
    WorkerPanic {
        /// Worker identifier.
        worker_id: usize,
        /// Panic description.
        message: String,
    },

    /// Graceful shutdown did not complete within the timeout.
    #[error("shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// The timeout that elapsed.
        timeout: Duration,
    },
}

impl EngineError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Creates a client error from an HTTP response.
    pub fn client_error(status: u16, body: impl Into<String>) -> Self {
        Self::ClientError { status, body: body.into() }
    }

    /// Creates a server error from an HTTP response.
    pub fn server_error(status: u16, body: impl Into<String>) -> Self {
        Self::ServerError { status, body: body.into() }
    }

    /// Creates a rate-limited error with retry guidance.
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::RateLimited { retry_after_secs }
    }

    /// Creates an unsafe-URL error.
    pub fn unsafe_url(reason: impl Into<String>) -> Self {
        Self::UnsafeUrl { reason: reason.into() }
    }

    /// Creates a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict { message: message.into() }
    }

    /// Creates a broker error.
    pub fn broker(message: impl Into<String>) -> Self {
        Self::Broker { message: message.into() }
    }

    /// Creates a record store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Whether this is a delivery failure the retry policy may recover.
    ///
    /// Every failed delivery attempt (non-2xx response, timeout, network
    /// error) is retryable up to the job's budget. Engine-internal errors
    /// are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network { .. }
                | Self::Timeout { .. }
                | Self::ClientError { .. }
                | Self::ServerError { .. }
                | Self::RateLimited { .. }
        )
    }

    /// HTTP status carried by this error, when one was received.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ClientError { status, .. } | Self::ServerError { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}

impl From<relay_core::CoreError> for EngineError {
    fn from(err: relay_core::CoreError) -> Self {
        match err {
            relay_core::CoreError::Conflict(message) => Self::Conflict { message },
            relay_core::CoreError::InvalidTransition { from, to } => {
                Self::Conflict { message: format!("invalid transition: {from} -> {to}") }
            },
            other => Self::Store { message: other.to_string() },
        }
    }
}
