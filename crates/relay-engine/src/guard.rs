//! SSRF gate interface.
//!
//! Target URLs can be attacker-influenced, so every enqueue passes the URL
//! through a guard first and fails closed on refusal. The screening logic
//! itself is an external collaborator; this module only defines the seam
//! and a pass-through implementation for deployments that screen upstream.

use std::{future::Future, pin::Pin};

/// Verdict returned by a URL guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlVerdict {
    /// Whether the URL may be used as a delivery target.
    pub safe: bool,
    /// Why the guard refused, when it did.
    pub reason: Option<String>,
}

impl UrlVerdict {
    /// An approving verdict.
    pub fn safe() -> Self {
        Self { safe: true, reason: None }
    }

    /// A refusing verdict with the given reason.
    pub fn unsafe_because(reason: impl Into<String>) -> Self {
        Self { safe: false, reason: Some(reason.into()) }
    }
}

/// Screens target URLs before jobs are enqueued.
pub trait UrlGuard: Send + Sync + 'static {
    /// Validates a target URL. A refusal prevents the job from ever being
    /// enqueued.
    fn validate<'a>(&'a self, url: &'a str) -> Pin<Box<dyn Future<Output = UrlVerdict> + Send + 'a>>;
}

/// Pass-through guard for deployments where screening happens upstream.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllGuard;

impl UrlGuard for AllowAllGuard {
    fn validate<'a>(
        &'a self,
        _url: &'a str,
    ) -> Pin<Box<dyn Future<Output = UrlVerdict> + Send + 'a>> {
        Box::pin(async { UrlVerdict::safe() })
    }
}
