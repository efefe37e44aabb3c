//! Builder patterns for test data construction
//!
//! Provides a fluent API for creating authority-style tokens: the caller's
//! payload at the top level, the `source` provenance tag, and `exp`/`iat`.

use crate::crypto_fixtures::TestRsaKey;
use chrono::{Duration, Utc};
use jsonwebtoken::Algorithm;
use serde_json::{Map, Value};

/// Builder for creating test JWT claims and signed tokens
///
/// # Example
/// ```rust,ignore
/// let token = TestTokenBuilder::new()
///     .with_claim("userId", "u-42")
///     .expires_in(3600)
///     .sign(&TestRsaKey::primary("s-static"));
/// ```
pub struct TestTokenBuilder {
    payload: Map<String, Value>,
    source: Option<String>,
    exp: i64,
    iat: i64,
    algorithm: Algorithm,
    include_kid: bool,
}

impl TestTokenBuilder {
    /// Create a new token builder with defaults
    ///
    /// Defaults: no payload fields, `source: "microservice"`, expiry one hour
    /// from now, RS256 with the signing key's `kid` in the header.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            payload: Map::new(),
            source: Some("microservice".to_string()),
            exp: (now + Duration::seconds(3600)).timestamp(),
            iat: now.timestamp(),
            algorithm: Algorithm::RS256,
            include_kid: true,
        }
    }

    /// Add a payload field
    pub fn with_claim(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    /// Drop the `source` provenance tag
    pub fn without_source(mut self) -> Self {
        self.source = None;
        self
    }

    /// Set expiration in seconds from now (negative for already expired)
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self
    }

    /// Set issued-at timestamp
    pub fn issued_at(mut self, timestamp: i64) -> Self {
        self.iat = timestamp;
        self
    }

    /// Sign with a different header algorithm
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Leave `kid` out of the header
    pub fn without_kid(mut self) -> Self {
        self.include_kid = false;
        self
    }

    /// Build the claims as a JSON value
    pub fn build(&self) -> Value {
        let mut claims = self.payload.clone();
        if let Some(source) = &self.source {
            claims.insert("source".to_string(), Value::from(source.as_str()));
        }
        claims.insert("exp".to_string(), Value::from(self.exp));
        claims.insert("iat".to_string(), Value::from(self.iat));
        Value::Object(claims)
    }

    /// Build and sign the token with `key`
    pub fn sign(self, key: &TestRsaKey) -> String {
        key.sign_with(self.algorithm, self.include_kid, &self.build())
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}
