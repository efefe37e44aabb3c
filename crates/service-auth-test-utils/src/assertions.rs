//! Custom test assertions for expressive tests
//!
//! Provides trait-based assertions over the unverified contents of a token.
//! Signature checks belong to the code under test, not to these helpers.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use serde_json::{Map, Value};

/// JWT header structure
#[derive(Debug, Deserialize)]
struct JwtHeader {
    pub alg: String,
    #[serde(default)]
    pub typ: Option<String>,
    #[serde(default)]
    pub kid: Option<String>,
}

fn segment(token: &str, index: usize) -> Vec<u8> {
    let part = token
        .split('.')
        .nth(index)
        .unwrap_or_else(|| panic!("JWT has no segment {index}"));
    URL_SAFE_NO_PAD
        .decode(part)
        .unwrap_or_else(|e| panic!("Failed to base64 decode JWT segment {index}: {e}"))
}

fn header_of(token: &str) -> JwtHeader {
    serde_json::from_slice(&segment(token, 0)).expect("Failed to parse JWT header JSON")
}

fn claims_of(token: &str) -> Map<String, Value> {
    serde_json::from_slice(&segment(token, 1)).expect("Failed to parse JWT claims JSON")
}

/// Custom assertions for issued tokens
///
/// # Example
/// ```rust,ignore
/// token
///     .assert_valid_jwt()
///     .assert_from_issuer()
///     .assert_signed_by("s-static")
///     .assert_has_claim("userId", &json!("u-42"));
/// ```
pub trait TokenAssertions {
    /// Assert that the token is an RS256 JWT with an `exp` claim
    fn assert_valid_jwt(&self) -> &Self;

    /// Assert that the token header names the specified key
    fn assert_signed_by(&self, key_id: &str) -> &Self;

    /// Assert that a payload field has the given value
    fn assert_has_claim(&self, key: &str, expected: &Value) -> &Self;

    /// Assert that the token carries `source: "microservice"`
    fn assert_from_issuer(&self) -> &Self;

    /// Assert that the token expires within the specified seconds
    fn assert_expires_in(&self, seconds: u64) -> &Self;
}

impl TokenAssertions for String {
    fn assert_valid_jwt(&self) -> &Self {
        let parts = self.split('.').count();
        assert_eq!(
            parts, 3,
            "JWT must have 3 parts (header.payload.signature), got {parts}"
        );

        let header = header_of(self);
        assert_eq!(header.alg, "RS256", "Expected RS256 algorithm");
        if let Some(typ) = &header.typ {
            assert_eq!(typ, "JWT", "Expected JWT type");
        }

        let claims = claims_of(self);
        assert!(
            claims.get("exp").and_then(Value::as_i64).is_some(),
            "JWT claims must carry a numeric exp"
        );

        self
    }

    fn assert_signed_by(&self, key_id: &str) -> &Self {
        let header = header_of(self);
        assert_eq!(
            header.kid.as_deref(),
            Some(key_id),
            "Expected key_id '{key_id}', got {:?}",
            header.kid
        );

        self
    }

    fn assert_has_claim(&self, key: &str, expected: &Value) -> &Self {
        let claims = claims_of(self);
        assert_eq!(
            claims.get(key),
            Some(expected),
            "Expected claim '{key}' to be {expected}. Available claims: {:?}",
            claims.keys().collect::<Vec<_>>()
        );

        self
    }

    fn assert_from_issuer(&self) -> &Self {
        self.assert_has_claim("source", &Value::from("microservice"))
    }

    fn assert_expires_in(&self, seconds: u64) -> &Self {
        let claims = claims_of(self);
        let exp = claims
            .get("exp")
            .and_then(Value::as_i64)
            .expect("JWT claims must carry a numeric exp");

        let expires_in = exp - chrono::Utc::now().timestamp();

        // Allow 5-second tolerance for clock skew
        assert!(
            (expires_in - seconds as i64).abs() <= 5,
            "Expected token to expire in {seconds} seconds, but expires in {expires_in} seconds"
        );

        self
    }
}
