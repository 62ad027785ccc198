//! Axum middleware call shape for a configured limiter.
//!
//! Derives the client identifier from the forwarded-address header, runs
//! the hybrid check, and either continues the request or answers 429 with
//! the standard rate-limit headers and a JSON body.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{factory::RateLimiter, types::RateLimitDecision};

/// Identifier used when no forwarded-address header is present.
const ANONYMOUS: &str = "anonymous";

/// Axum middleware enforcing a rate limit per forwarded client address.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let identifier = client_identifier(req.headers());
    let decision = limiter.check(&identifier).await;

    if decision.allowed {
        next.run(req).await
    } else {
        too_many_requests(&decision, limiter.now_millis())
    }
}

/// First forwarded-for value, trimmed; `"anonymous"` when absent or empty.
fn client_identifier(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map_or_else(|| ANONYMOUS.to_string(), str::to_string)
}

/// Structured 429 response with retry guidance headers.
fn too_many_requests(decision: &RateLimitDecision, now_ms: u64) -> Response {
    let retry_after = decision.retry_after_secs(now_ms);

    let body = serde_json::json!({
        "error": "Too many requests",
        "retryAfter": retry_after,
    });

    let mut response = (StatusCode::TOO_MANY_REQUESTS, axum::Json(body)).into_response();
    let headers = response.headers_mut();
    insert_numeric(headers, "Retry-After", retry_after);
    insert_numeric(headers, "X-RateLimit-Limit", decision.limit.max(0).unsigned_abs());
    insert_numeric(headers, "X-RateLimit-Remaining", decision.remaining.max(0).unsigned_abs());
    insert_numeric(headers, "X-RateLimit-Reset", decision.reset_at_secs());
    response
}

fn insert_numeric(headers: &mut HeaderMap, name: &'static str, value: u64) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_takes_first_forwarded_value_trimmed() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static(" 203.0.113.9 , 198.51.100.2"),
        );
        assert_eq!(client_identifier(&headers), "203.0.113.9");
    }

    #[test]
    fn identifier_defaults_to_anonymous() {
        assert_eq!(client_identifier(&HeaderMap::new()), "anonymous");

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("  "));
        assert_eq!(client_identifier(&headers), "anonymous");
    }

    #[test]
    fn denial_response_carries_rate_limit_headers() {
        let decision = RateLimitDecision {
            allowed: false,
            limit: 10,
            remaining: 0,
            current: 10,
            reset_at_ms: 90_000,
        };
        let response = too_many_requests(&decision, 60_000);

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        assert_eq!(headers.get("Retry-After").and_then(|v| v.to_str().ok()), Some("30"));
        assert_eq!(headers.get("X-RateLimit-Limit").and_then(|v| v.to_str().ok()), Some("10"));
        assert_eq!(
            headers.get("X-RateLimit-Remaining").and_then(|v| v.to_str().ok()),
            Some("0")
        );
        assert_eq!(headers.get("X-RateLimit-Reset").and_then(|v| v.to_str().ok()), Some("90"));
    }
}
