//! Rate limiting for the relay delivery engine.
//!
//! Two window algorithms coexist deliberately. The
//! [`DistributedRateLimiter`] keeps a precise sliding log in the shared
//! coordination store and is the source of truth while that store is
//! reachable. The [`MemoryRateLimiter`] is a cheaper fixed-window counter,
//! bounded and process-local, used stand-alone or as the fallback the
//! [`HybridRateLimiter`] switches to when the store errors. Under fallback,
//! limits become per-process rather than global: availability is chosen
//! over strict accuracy, and burst behavior at window boundaries differs
//! from the primary path. Do not unify the algorithms; the difference is a
//! documented approximation.
//!
//! [`RateLimiterFactory`] builds named, pre-configured limiter handles
//! exposing async, sync (memory-only), and HTTP-middleware call shapes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod distributed;
pub mod error;
pub mod factory;
pub mod hybrid;
pub mod memory;
pub mod middleware;
pub mod types;

pub use distributed::DistributedRateLimiter;
pub use error::{RateLimitError, Result};
pub use factory::{RateLimiter, RateLimiterFactory};
pub use hybrid::HybridRateLimiter;
pub use memory::MemoryRateLimiter;
pub use middleware::rate_limit_middleware;
pub use types::{RateLimitConfig, RateLimitDecision, SharedRateLimit};
