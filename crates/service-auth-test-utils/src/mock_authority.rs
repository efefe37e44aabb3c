//! Mock token authority for tests
//!
//! Wraps a `wiremock::MockServer` that plays both authority roles:
//! - the issuance endpoint (`POST /recipe/jwt`)
//! - the published key set (`GET /auth/jwt/jwks.json`)
//!
//! Use the server URI as both the core URL and the API domain; with the
//! default base path `auth` the key set URL lines up with [`JWKS_PATH`].

use crate::crypto_fixtures::TestRsaKey;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Issuance endpoint path.
pub const ISSUANCE_PATH: &str = "/recipe/jwt";

/// Published key set path under the default base path.
pub const JWKS_PATH: &str = "/auth/jwt/jwks.json";

/// Responds to issuance requests by signing the requested payload.
///
/// The token carries the request's `payload` fields plus an `exp` of
/// now + `validity` seconds, signed by the configured key. `iat` is set to
/// now unless the payload already carries one.
struct SigningResponder {
    key: TestRsaKey,
    delay: Option<Duration>,
}

impl Respond for SigningResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = match request.body_json() {
            Ok(body) => body,
            Err(e) => {
                return ResponseTemplate::new(400)
                    .set_body_json(json!({ "message": format!("invalid body: {e}") }))
            }
        };

        let mut claims = body
            .get("payload")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_else(Map::new);
        let validity = body.get("validity").and_then(Value::as_i64).unwrap_or(0);
        let now = Utc::now().timestamp();
        claims
            .entry("iat".to_string())
            .or_insert_with(|| Value::from(now));
        claims.insert("exp".to_string(), Value::from(now + validity));

        let jwt = self.key.sign(&Value::Object(claims));
        let template = ResponseTemplate::new(200).set_body_json(json!({
            "status": "OK",
            "jwt": jwt,
        }));

        match self.delay {
            Some(delay) => template.set_delay(delay),
            None => template,
        }
    }
}

/// A running mock authority.
///
/// # Example
/// ```rust,ignore
/// let key = TestRsaKey::primary("s-static");
/// let authority = MockAuthority::start().await;
/// authority.mount_jwks(&[&key]).await;
/// authority.mount_issuance(&key).await;
///
/// let config = Config::new(authority.uri(), authority.uri());
/// ```
pub struct MockAuthority {
    server: MockServer,
}

impl MockAuthority {
    /// Start a mock authority on a random local port.
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Base URI of the mock server (no trailing slash).
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Full key set URL.
    pub fn jwks_url(&self) -> String {
        format!("{}{JWKS_PATH}", self.server.uri())
    }

    /// The underlying server, for custom mounts.
    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// Publish `keys` in the given order.
    pub async fn mount_jwks(&self, keys: &[&TestRsaKey]) {
        let keys: Vec<Value> = keys.iter().map(|k| k.jwk_json()).collect();
        self.mount_jwks_json(json!({ "keys": keys })).await;
    }

    /// Publish an arbitrary key set document.
    pub async fn mount_jwks_json(&self, body: Value) {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Make the key set endpoint fail with `status`.
    pub async fn mount_jwks_failure(&self, status: u16) {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Sign every issuance request with `key`.
    pub async fn mount_issuance(&self, key: &TestRsaKey) {
        self.mount_signing(key, None, None).await;
    }

    /// Sign issuance requests with `key`, verifying on drop that exactly
    /// `expected_calls` arrived.
    pub async fn mount_issuance_expecting(&self, key: &TestRsaKey, expected_calls: u64) {
        self.mount_signing(key, None, Some(expected_calls)).await;
    }

    /// Sign issuance requests with `key` after `delay`.
    pub async fn mount_slow_issuance(
        &self,
        key: &TestRsaKey,
        delay: Duration,
        expected_calls: u64,
    ) {
        self.mount_signing(key, Some(delay), Some(expected_calls))
            .await;
    }

    /// Answer issuance requests with a fixed status and body.
    pub async fn mount_issuance_response(&self, status: u16, body: Value) {
        Mock::given(method("POST"))
            .and(path(ISSUANCE_PATH))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    async fn mount_signing(
        &self,
        key: &TestRsaKey,
        delay: Option<Duration>,
        expected_calls: Option<u64>,
    ) {
        let mock = Mock::given(method("POST"))
            .and(path(ISSUANCE_PATH))
            .and(header("rid", "jwt"))
            .respond_with(SigningResponder {
                key: key.clone(),
                delay,
            });
        let mock = match expected_calls {
            Some(n) => mock.expect(n),
            None => mock,
        };
        mock.mount(&self.server).await;
    }

    /// JSON bodies of every issuance request received so far.
    pub async fn issuance_requests(&self) -> Vec<Value> {
        self.requests_to(ISSUANCE_PATH)
            .await
            .iter()
            .filter_map(|r| r.body_json().ok())
            .collect()
    }

    /// Number of issuance requests received so far.
    pub async fn issuance_request_count(&self) -> usize {
        self.requests_to(ISSUANCE_PATH).await.len()
    }

    /// Number of key set requests received so far.
    pub async fn jwks_request_count(&self) -> usize {
        self.requests_to(JWKS_PATH).await.len()
    }

    async fn requests_to(&self, request_path: &str) -> Vec<Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.url.path() == request_path)
            .collect()
    }
}
