//! Outbound HTTP delivery with auth-header derivation.
//!
//! Builds the delivery request from a job (serialized payload, metadata
//! headers, and headers derived from the target's `AuthConfig`, including
//! the HMAC-SHA256 payload signature) and categorizes transport failures
//! for the retry policy.

use std::{collections::HashMap, time::Duration};

use hmac::{Hmac, Mac};
use relay_core::{AuthConfig, DeliveryJob};
use reqwest::header::HeaderMap;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Response bodies beyond this size are truncated before storage.
const MAX_RESPONSE_BODY_BYTES: usize = 64 * 1024;

/// Configuration for the delivery HTTP client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// User agent for outbound requests.
    pub user_agent: String,
    /// Maximum redirects to follow.
    pub max_redirects: u32,
    /// Whether to verify TLS certificates.
    pub verify_tls: bool,
    /// Fallback timeout when a job carries none.
    pub default_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: "Relay-Delivery/1.0".to_string(),
            max_redirects: 3,
            verify_tls: true,
            default_timeout: Duration::from_secs(30),
        }
    }
}

/// Response from a delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// Response body, truncated to a bounded size.
    pub body: String,
    /// Wall-clock duration of the attempt.
    pub duration: Duration,
    /// Whether the status was 2xx.
    pub is_success: bool,
}

/// HTTP client for webhook delivery.
///
/// Connection pooling comes from the underlying client; each call applies
/// the job's own timeout so one slow target cannot eat another job's
/// budget.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
}

impl DeliveryClient {
    /// Creates a client with the given configuration.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.default_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| {
                EngineError::configuration(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self { client })
    }

    /// Creates a client with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(&ClientConfig::default())
    }

    /// Performs one delivery attempt for the job.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Timeout`] when the per-job budget elapses
    /// - [`EngineError::Network`] for connection-level failures
    /// - [`EngineError::Configuration`] when the payload cannot be encoded
    ///
    /// Non-2xx responses are *not* errors here; the worker decides how to
    /// classify them against the retry policy.
    pub async fn deliver(&self, job: &DeliveryJob) -> Result<DeliveryResponse> {
        let start = std::time::Instant::now();

        let body = serde_json::to_vec(&job.payload).map_err(|e| {
            EngineError::configuration(format!("failed to encode payload: {e}"))
        })?;

        let mut request = self
            .client
            .post(&job.url)
            .timeout(job.timeout())
            .header("content-type", "application/json")
            .header("X-Relay-Delivery-Id", job.delivery_id.to_string())
            .header("X-Relay-Event", &job.payload.event_type)
            .header("X-Relay-Attempt", job.attempt.to_string())
            .header("X-Relay-Timestamp", job.payload.timestamp.to_rfc3339());

        for (name, value) in auth_headers(&job.auth, &body) {
            request = request.header(name.as_str(), value);
        }

        debug!(
            delivery_id = %job.delivery_id,
            url = %job.url,
            attempt = job.attempt,
            "sending delivery request"
        );

        let response = match request.body(body).send().await {
            Ok(response) => response,
            Err(e) => {
                let duration = start.elapsed();
                warn!(
                    delivery_id = %job.delivery_id,
                    duration_ms = duration.as_millis(),
                    error = %e,
                    "delivery request failed"
                );
                if e.is_timeout() {
                    return Err(EngineError::timeout(job.timeout_ms));
                }
                if e.is_connect() {
                    return Err(EngineError::network(format!("connection failed: {e}")));
                }
                return Err(EngineError::network(e.to_string()));
            },
        };

        let duration = start.elapsed();
        let status_code = response.status().as_u16();
        let is_success = response.status().is_success();
        let headers = extract_headers(response.headers());

        let body = match response.bytes().await {
            Ok(bytes) if bytes.len() > MAX_RESPONSE_BODY_BYTES => {
                let mut truncated =
                    String::from_utf8_lossy(&bytes[..MAX_RESPONSE_BODY_BYTES]).into_owned();
                truncated.push_str("... (truncated)");
                truncated
            },
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => format!("[failed to read response body: {e}]"),
        };

        debug!(
            delivery_id = %job.delivery_id,
            status = status_code,
            duration_ms = duration.as_millis(),
            "received delivery response"
        );

        Ok(DeliveryResponse { status_code, headers, body, duration, is_success })
    }
}

/// Headers derived from the target's authentication configuration.
///
/// The HMAC variant signs the exact serialized request body, so signing
/// happens here rather than at configuration time.
fn auth_headers(auth: &AuthConfig, body: &[u8]) -> Vec<(String, String)> {
    match auth {
        AuthConfig::None => Vec::new(),
        AuthConfig::Basic { value } => {
            vec![("authorization".to_string(), format!("Basic {value}"))]
        },
        AuthConfig::Bearer { token } => {
            vec![("authorization".to_string(), format!("Bearer {token}"))]
        },
        AuthConfig::ApiKey { header, value } => vec![(header.clone(), value.clone())],
        AuthConfig::Hmac { secret } => vec![(
            "X-Relay-Signature".to_string(),
            format!("sha256={}", sign_payload(secret, body)),
        )],
    }
}

/// HMAC-SHA256 of the payload as lowercase hex.
fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        // HMAC accepts keys of any length; this branch is unreachable for
        // string secrets but keeps the signature infallible.
        Err(_) => return String::new(),
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Copies response headers into a plain map, skipping non-UTF-8 values.
fn extract_headers(header_map: &HeaderMap) -> HashMap<String, String> {
    header_map
        .iter()
        .filter_map(|(name, value)| {
            value.to_str().ok().map(|v| (name.to_string(), v.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use relay_core::{DeliveryId, EventPayload, TargetId};
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn job_against(url: String) -> DeliveryJob {
        DeliveryJob::new(
            TargetId::new(),
            DeliveryId::new(),
            url,
            EventPayload::new("order.created", Utc::now(), serde_json::json!({"n": 7})),
        )
    }

    #[tokio::test]
    async fn successful_delivery_reports_2xx() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/hook"))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .mount(&server)
            .await;

        let client = DeliveryClient::with_defaults().expect("client builds");
        let response = client
            .deliver(&job_against(format!("{}/hook", server.uri())))
            .await
            .expect("delivery succeeds");

        assert_eq!(response.status_code, 200);
        assert!(response.is_success);
        assert_eq!(response.body, "OK");
    }

    #[tokio::test]
    async fn non_2xx_is_a_response_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let client = DeliveryClient::with_defaults().expect("client builds");
        let response = client
            .deliver(&job_against(format!("{}/hook", server.uri())))
            .await
            .expect("delivery call completes");

        assert_eq!(response.status_code, 503);
        assert!(!response.is_success);
    }

    #[tokio::test]
    async fn metadata_headers_accompany_every_attempt() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::header_exists("X-Relay-Delivery-Id"))
            .and(matchers::header_exists("X-Relay-Event"))
            .and(matchers::header_exists("X-Relay-Attempt"))
            .and(matchers::header_exists("X-Relay-Timestamp"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = DeliveryClient::with_defaults().expect("client builds");
        client
            .deliver(&job_against(format!("{}/hook", server.uri())))
            .await
            .expect("delivery succeeds");

        server.verify().await;
    }

    #[tokio::test]
    async fn bearer_and_api_key_headers_are_applied() {
        let server = MockServer::start().await;
        Mock::given(matchers::header("authorization", "Bearer token-123"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = DeliveryClient::with_defaults().expect("client builds");
        let job = job_against(format!("{}/hook", server.uri()))
            .with_auth(AuthConfig::bearer("token-123").expect("valid auth"));
        client.deliver(&job).await.expect("delivery succeeds");
        server.verify().await;

        let server = MockServer::start().await;
        Mock::given(matchers::header("X-Api-Key", "s3cret"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let job = job_against(format!("{}/hook", server.uri()))
            .with_auth(AuthConfig::api_key("X-Api-Key", "s3cret").expect("valid auth"));
        client.deliver(&job).await.expect("delivery succeeds");
        server.verify().await;
    }

    #[tokio::test]
    async fn hmac_signature_matches_request_body() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = DeliveryClient::with_defaults().expect("client builds");
        let job = job_against(format!("{}/hook", server.uri()))
            .with_auth(AuthConfig::hmac("signing-secret").expect("valid auth"));
        client.deliver(&job).await.expect("delivery succeeds");

        let requests = server.received_requests().await.expect("requests recorded");
        let request = &requests[0];
        let signature = request
            .headers
            .get("X-Relay-Signature")
            .and_then(|v| v.to_str().ok())
            .expect("signature header present");

        let expected = format!("sha256={}", sign_payload("signing-secret", &request.body));
        assert_eq!(signature, expected);
    }

    #[tokio::test]
    async fn per_job_timeout_is_enforced() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let client = DeliveryClient::with_defaults().expect("client builds");
        let job = job_against(format!("{}/hook", server.uri()))
            .with_timeout(Duration::from_millis(100));

        let result = client.deliver(&job).await;
        assert!(matches!(result, Err(EngineError::Timeout { timeout_ms: 100 })));
    }

    #[tokio::test]
    async fn connection_refused_is_a_network_error() {
        let client = DeliveryClient::with_defaults().expect("client builds");
        // Reserved port with nothing listening.
        let job = job_against("http://127.0.0.1:9/hook".to_string());

        let result = client.deliver(&job).await;
        assert!(matches!(result, Err(EngineError::Network { .. })));
    }

    #[test]
    fn signature_is_stable_hex() {
        let signature = sign_payload("secret", b"payload");
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(signature, sign_payload("secret", b"payload"));
        assert_ne!(signature, sign_payload("other", b"payload"));
    }
}
