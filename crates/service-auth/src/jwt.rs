//! JWT structure helpers shared by the issuer and the verifier.
//!
//! This module provides:
//! - Size limit applied before any parsing
//! - Key ID extraction from the unverified JWT header
//! - The decoded claims structure (`TokenClaims`)
//!
//! Nothing here checks a signature. `extract_kid` only tells the verifier
//! which published key to fetch; the token must still be verified with it.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum accepted JWT size in bytes (8KB).
///
/// Tokens above this size are rejected before base64 decoding or any
/// cryptographic work. Authority tokens carrying a modest payload and an
/// RS256 signature are well under 1KB.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Provenance tag the issuer merges into every payload as the `source` claim.
pub const PROVENANCE_SOURCE: &str = "microservice";

// =============================================================================
// Error Types
// =============================================================================

/// Reasons the unverified header of a token could not be read.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    /// Token size exceeds `MAX_JWT_SIZE_BYTES`.
    #[error("Token exceeds maximum size")]
    TokenTooLarge,

    /// Token is not three dot-separated segments with a JSON header.
    #[error("Token is malformed")]
    MalformedToken,

    /// Header has no non-empty string `kid`.
    #[error("Token header has no key id")]
    MissingKid,
}

// =============================================================================
// Claims Types
// =============================================================================

/// Claims decoded from a verified token.
///
/// The authority embeds the caller payload at the top level of the claims,
/// next to the standard fields. Only `exp` is typed, because verification
/// depends on it. Every other field, registered names such as `sub`, `iss`
/// and `iat` included, is kept as raw JSON in `custom`, so any payload the
/// authority signs round-trips unchanged.
///
/// The `sub` value is redacted in Debug output.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// All other claims, exactly as issued.
    #[serde(flatten)]
    pub custom: Map<String, Value>,
}

impl fmt::Debug for TokenClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenClaims")
            .field("source", &self.source())
            .field("exp", &self.exp)
            .field("iat", &self.issued_at())
            .field("sub", &self.get("sub").map(|_| "[REDACTED]"))
            .field("claim_keys", &self.custom.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TokenClaims {
    /// Look up a claim by name. `exp` is read from the typed field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.custom.get(key)
    }

    /// The `source` claim, when present and a string.
    #[must_use]
    pub fn source(&self) -> Option<&str> {
        self.get("source").and_then(Value::as_str)
    }

    /// The `iat` claim, when present and an integer.
    #[must_use]
    pub fn issued_at(&self) -> Option<i64> {
        self.get("iat").and_then(Value::as_i64)
    }

    /// Whether the token carries the issuer's provenance tag.
    #[must_use]
    pub fn is_from_issuer(&self) -> bool {
        self.source() == Some(PROVENANCE_SOURCE)
    }
}

// =============================================================================
// Functions
// =============================================================================

/// Extract the `kid` (key ID) from a JWT header without verifying the token.
///
/// # Errors
///
/// - `TokenTooLarge` - token exceeds `MAX_JWT_SIZE_BYTES` (checked first)
/// - `MalformedToken` - wrong segment count, bad base64, or non-JSON header
/// - `MissingKid` - header has no `kid`, or it is empty or not a string
pub fn extract_kid(token: &str) -> Result<String, HeaderError> {
    let header = decode_header_json(token)?;

    header
        .get("kid")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .ok_or(HeaderError::MissingKid)
}

/// Check size and structure of a token and return its decoded header JSON.
///
/// # Errors
///
/// Returns `TokenTooLarge` or `MalformedToken`.
pub fn decode_header_json(token: &str) -> Result<Map<String, Value>, HeaderError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "service_auth.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(HeaderError::TokenTooLarge);
    }

    let mut parts = token.split('.');
    let (Some(header_part), Some(_), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        tracing::debug!(target: "service_auth.jwt", "Token rejected: invalid JWT format");
        return Err(HeaderError::MalformedToken);
    };

    let header_bytes = URL_SAFE_NO_PAD.decode(header_part).map_err(|e| {
        tracing::debug!(target: "service_auth.jwt", error = %e, "Failed to decode JWT header base64");
        HeaderError::MalformedToken
    })?;

    serde_json::from_slice::<Map<String, Value>>(&header_bytes).map_err(|e| {
        tracing::debug!(target: "service_auth.jwt", error = %e, "Failed to parse JWT header JSON");
        HeaderError::MalformedToken
    })
}

// =============================================================================
// Tests
// =============================================================================
