//! Signature and claim verification for authority-issued tokens.
//!
//! Verification separates two kinds of failure:
//! - the token is bad (expired, tampered, malformed, wrong algorithm): a
//!   normal [`Verification::Invalid`] value
//! - the verifier cannot work (key set unreachable, no matching key, broken
//!   key record): an [`AuthError`] that propagates to the caller
//!
//! Callers decide to reissue on the first kind only.

use crate::config::Config;
use crate::error::Result;
use crate::jwks::JwksClient;
use crate::jwt::{extract_kid, HeaderError, TokenClaims};
use crate::key_material::{to_verification_key, VerificationKey};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Validation};
use std::sync::Arc;
use tracing::instrument;

/// Why a token was judged invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    /// Not a structurally valid JWT, or claims failed to parse.
    Malformed,
    /// Larger than the accepted maximum.
    TooLarge,
    /// Header carries no key ID to look up.
    MissingKid,
    /// `exp` is in the past (beyond the configured leeway).
    Expired,
    /// Signature does not match the key.
    BadSignature,
    /// Header algorithm differs from the key's algorithm.
    AlgorithmMismatch,
    /// Any other rejection reported by the JWT library.
    Rejected,
}

impl From<HeaderError> for InvalidReason {
    fn from(err: HeaderError) -> Self {
        match err {
            HeaderError::TokenTooLarge => InvalidReason::TooLarge,
            HeaderError::MalformedToken => InvalidReason::Malformed,
            HeaderError::MissingKid => InvalidReason::MissingKid,
        }
    }
}

/// Outcome of verifying one token.
#[derive(Debug, Clone, PartialEq)]
pub enum Verification {
    /// Signature and claims check out.
    Valid(TokenClaims),
    /// The token must not be used.
    Invalid(InvalidReason),
}

impl Verification {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Verification::Valid(_))
    }

    /// Decoded claims, if valid.
    #[must_use]
    pub fn claims(&self) -> Option<&TokenClaims> {
        match self {
            Verification::Valid(claims) => Some(claims),
            Verification::Invalid(_) => None,
        }
    }

    /// Consume into the decoded claims, if valid.
    #[must_use]
    pub fn into_claims(self) -> Option<TokenClaims> {
        match self {
            Verification::Valid(claims) => Some(claims),
            Verification::Invalid(_) => None,
        }
    }
}

/// Check a token's signature, algorithm and expiry against a resolved key.
///
/// Never fails: every problem with the token itself becomes
/// `Verification::Invalid`.
pub fn verify_signature(token: &str, key: &VerificationKey, leeway_seconds: u64) -> Verification {
    let mut validation = Validation::new(key.algorithm());
    validation.leeway = leeway_seconds;
    validation.validate_exp = true;
    validation.validate_aud = false;
    validation.set_required_spec_claims(&["exp"]);

    match decode::<TokenClaims>(token, key.decoding_key(), &validation) {
        Ok(data) => {
            tracing::debug!(target: "service_auth.verifier", kid = %key.kid(), "Token signature verified");
            Verification::Valid(data.claims)
        }
        Err(e) => {
            let reason = match e.kind() {
                ErrorKind::ExpiredSignature => InvalidReason::Expired,
                ErrorKind::InvalidSignature => InvalidReason::BadSignature,
                ErrorKind::InvalidAlgorithm => InvalidReason::AlgorithmMismatch,
                ErrorKind::InvalidToken
                | ErrorKind::Base64(_)
                | ErrorKind::Json(_)
                | ErrorKind::Utf8(_)
                | ErrorKind::MissingRequiredClaim(_) => InvalidReason::Malformed,
                _ => InvalidReason::Rejected,
            };
            tracing::debug!(
                target: "service_auth.verifier",
                kid = %key.kid(),
                error = %e,
                reason = ?reason,
                "Token verification failed"
            );
            Verification::Invalid(reason)
        }
    }
}

/// Decodes tokens, distinguishing invalid tokens from verifier failures.
#[async_trait::async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Verify `token` and return its claims if valid.
    ///
    /// # Errors
    ///
    /// Returns `AuthError` only when verification could not be performed
    /// (key set fetch, key lookup, or key conversion failure).
    async fn decode(&self, token: &str) -> Result<Verification>;
}

/// Verifier backed by the authority's published key set.
#[derive(Debug)]
pub struct JwtVerifier {
    jwks: Arc<JwksClient>,
    leeway_seconds: u64,
}

impl JwtVerifier {
    #[must_use]
    pub fn new(jwks: Arc<JwksClient>, leeway_seconds: u64) -> Self {
        Self {
            jwks,
            leeway_seconds,
        }
    }

    /// Create a verifier from configuration.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let jwks = JwksClient::from_config(config)?;
        Ok(Self::new(Arc::new(jwks), config.leeway_seconds))
    }

    /// The key set client used for lookups.
    #[must_use]
    pub fn jwks(&self) -> &Arc<JwksClient> {
        &self.jwks
    }
}

#[async_trait::async_trait]
impl TokenVerifier for JwtVerifier {
    #[instrument(skip_all)]
    async fn decode(&self, token: &str) -> Result<Verification> {
        let kid = match extract_kid(token) {
            Ok(kid) => Some(kid),
            Err(HeaderError::MissingKid) => None,
            Err(e) => return Ok(Verification::Invalid(e.into())),
        };

        let Some(criterion) = self.jwks.criterion_for(kid.as_deref()) else {
            tracing::debug!(target: "service_auth.verifier", "Token has no kid to look up");
            return Ok(Verification::Invalid(InvalidReason::MissingKid));
        };

        let jwk = self.jwks.resolve(&criterion).await?;
        let key = to_verification_key(&jwk, None)?;

        Ok(verify_signature(token, &key, self.leeway_seconds))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::error::AuthError;
    use crate::jwks::{Jwk, KeySelection};
    use crate::key_material::verification_key_from_pem;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use jsonwebtoken::Algorithm;
    use service_auth_test_utils::{MockAuthority, TestRsaKey, TestTokenBuilder};

    fn verification_key(key: &TestRsaKey) -> VerificationKey {
        let jwk: Jwk = serde_json::from_value(key.jwk_json()).unwrap();
        to_verification_key(&jwk, None).unwrap()
    }

    fn verifier_for(authority: &MockAuthority) -> JwtVerifier {
        let jwks = JwksClient::new(authority.jwks_url(), reqwest::Client::new());
        JwtVerifier::new(Arc::new(jwks), 0)
    }

    // =========================================================================
    // verify_signature
    // =========================================================================

    #[test]
    fn test_verify_signature_valid_token() {
        let key = TestRsaKey::primary("s-primary");
        let token = TestTokenBuilder::new()
            .with_claim("userId", "u-42")
            .sign(&key);

        let result = verify_signature(&token, &verification_key(&key), 0);

        let claims = result.claims().expect("token should verify");
        assert!(claims.is_from_issuer());
        assert_eq!(claims.get("userId"), Some(&serde_json::json!("u-42")));
    }

    #[test]
    fn test_verify_signature_non_string_registered_claims_are_valid() {
        let key = TestRsaKey::primary("s-primary");
        let token = TestTokenBuilder::new()
            .with_claim("sub", 42)
            .with_claim("iss", serde_json::json!({"org": "acme"}))
            .sign(&key);

        let result = verify_signature(&token, &verification_key(&key), 0);

        let claims = result.claims().expect("token should verify");
        assert_eq!(claims.get("sub"), Some(&serde_json::json!(42)));
        assert_eq!(claims.get("iss"), Some(&serde_json::json!({"org": "acme"})));
    }

    #[test]
    fn test_verify_signature_expired_token() {
        let key = TestRsaKey::primary("s-primary");
        let token = TestTokenBuilder::new().expires_in(-3600).sign(&key);

        let result = verify_signature(&token, &verification_key(&key), 0);
        assert_eq!(result, Verification::Invalid(InvalidReason::Expired));
    }

    #[test]
    fn test_verify_signature_leeway_accepts_recently_expired() {
        let key = TestRsaKey::primary("s-primary");
        let token = TestTokenBuilder::new().expires_in(-30).sign(&key);

        let result = verify_signature(&token, &verification_key(&key), 120);
        assert!(result.is_valid());
    }

    #[test]
    fn test_verify_signature_wrong_key() {
        let signer = TestRsaKey::primary("s-primary");
        let other = TestRsaKey::secondary("s-primary");
        let token = TestTokenBuilder::new().sign(&signer);

        let result = verify_signature(&token, &verification_key(&other), 0);
        assert_eq!(result, Verification::Invalid(InvalidReason::BadSignature));
    }

    #[test]
    fn test_verify_signature_tampered_payload() {
        let key = TestRsaKey::primary("s-primary");
        let token = TestTokenBuilder::new().with_claim("role", "reader").sign(&key);

        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&serde_json::json!({
                "role": "admin",
                "source": "microservice",
                "exp": chrono::Utc::now().timestamp() + 3600,
            }))
            .unwrap(),
        );
        parts[1] = forged.as_str();
        let tampered = parts.join(".");

        let result = verify_signature(&tampered, &verification_key(&key), 0);
        assert_eq!(result, Verification::Invalid(InvalidReason::BadSignature));
    }

    #[test]
    fn test_verify_signature_algorithm_mismatch() {
        let key = TestRsaKey::primary("s-primary");
        let token = TestTokenBuilder::new()
            .with_algorithm(Algorithm::RS512)
            .sign(&key);

        let result = verify_signature(&token, &verification_key(&key), 0);
        assert_eq!(result, Verification::Invalid(InvalidReason::AlgorithmMismatch));
    }

    #[test]
    fn test_verify_signature_malformed_token() {
        let key = TestRsaKey::primary("s-primary");

        let result = verify_signature("abc.def.ghi", &verification_key(&key), 0);
        assert_eq!(result, Verification::Invalid(InvalidReason::Malformed));
    }

    #[test]
    fn test_verify_signature_through_pem_path() {
        let key = TestRsaKey::primary("s-primary");
        let jwk: Jwk = serde_json::from_value(key.jwk_json()).unwrap();
        let pem = crate::key_material::to_pem(&jwk).unwrap();
        let vk = verification_key_from_pem(&jwk.kid, &pem, Algorithm::RS256).unwrap();

        let token = TestTokenBuilder::new().sign(&key);
        assert!(verify_signature(&token, &vk, 0).is_valid());
    }

    // =========================================================================
    // JwtVerifier::decode
    // =========================================================================

    #[tokio::test]
    async fn test_decode_valid_token() {
        let key = TestRsaKey::primary("s-primary");
        let authority = MockAuthority::start().await;
        authority.mount_jwks(&[&key]).await;

        let token = TestTokenBuilder::new().with_claim("team", "payments").sign(&key);
        let result = verifier_for(&authority).decode(&token).await.unwrap();

        let claims = result.into_claims().unwrap();
        assert_eq!(claims.get("team"), Some(&serde_json::json!("payments")));
    }

    #[tokio::test]
    async fn test_decode_selects_by_kid_not_position() {
        let first = TestRsaKey::secondary("d-legacy");
        let signer = TestRsaKey::primary("s-static");
        let authority = MockAuthority::start().await;
        authority.mount_jwks(&[&first, &signer]).await;

        let token = TestTokenBuilder::new().sign(&signer);
        let result = verifier_for(&authority).decode(&token).await.unwrap();

        assert!(result.is_valid());
    }

    #[tokio::test]
    async fn test_decode_unknown_kid_is_error_not_invalid() {
        let published = TestRsaKey::secondary("s-published");
        let signer = TestRsaKey::primary("s-unpublished");
        let authority = MockAuthority::start().await;
        authority.mount_jwks(&[&published]).await;

        let token = TestTokenBuilder::new().sign(&signer);
        let result = verifier_for(&authority).decode(&token).await;

        assert!(
            matches!(result, Err(AuthError::KeyNotFound(ref msg)) if msg.contains("s-unpublished")),
            "expected KeyNotFound, got {result:?}"
        );
    }

    #[tokio::test]
    async fn test_decode_key_set_unavailable_is_error() {
        let key = TestRsaKey::primary("s-primary");
        let authority = MockAuthority::start().await;
        authority.mount_jwks_failure(500).await;

        let token = TestTokenBuilder::new().sign(&key);
        let result = verifier_for(&authority).decode(&token).await;

        assert!(matches!(result, Err(AuthError::KeySetFetch(_))));
    }

    #[tokio::test]
    async fn test_decode_broken_key_record_is_error() {
        let key = TestRsaKey::primary("s-primary");
        let authority = MockAuthority::start().await;
        authority
            .mount_jwks_json(serde_json::json!({
                "keys": [{"kty": "RSA", "kid": "s-primary", "alg": "RS256"}]
            }))
            .await;

        let token = TestTokenBuilder::new().sign(&key);
        let result = verifier_for(&authority).decode(&token).await;

        assert!(matches!(result, Err(AuthError::KeyConversion(_))));
    }

    #[tokio::test]
    async fn test_decode_malformed_token_skips_key_fetch() {
        let authority = MockAuthority::start().await;

        let result = verifier_for(&authority).decode("abc.def.ghi").await.unwrap();

        assert_eq!(result, Verification::Invalid(InvalidReason::Malformed));
        assert_eq!(authority.jwks_request_count().await, 0);
    }

    #[tokio::test]
    async fn test_decode_token_without_kid_is_invalid() {
        let key = TestRsaKey::primary("s-primary");
        let authority = MockAuthority::start().await;
        authority.mount_jwks(&[&key]).await;

        let token = TestTokenBuilder::new().without_kid().sign(&key);
        let result = verifier_for(&authority).decode(&token).await.unwrap();

        assert_eq!(result, Verification::Invalid(InvalidReason::MissingKid));
    }

    #[tokio::test]
    async fn test_decode_legacy_position_ignores_kid() {
        let first = TestRsaKey::secondary("d-legacy");
        let second = TestRsaKey::primary("s-static");
        let authority = MockAuthority::start().await;
        authority.mount_jwks(&[&first, &second]).await;

        let jwks = JwksClient::new(authority.jwks_url(), reqwest::Client::new())
            .with_selection(KeySelection::LegacyIndex(1));
        let verifier = JwtVerifier::new(Arc::new(jwks), 0);

        let token = TestTokenBuilder::new().without_kid().sign(&second);
        assert!(verifier.decode(&token).await.unwrap().is_valid());

        // Position 1 is the wrong key for a token signed by the first key.
        let token = TestTokenBuilder::new().sign(&first);
        assert_eq!(
            verifier.decode(&token).await.unwrap(),
            Verification::Invalid(InvalidReason::BadSignature)
        );
    }

    #[tokio::test]
    async fn test_decode_expired_token_is_invalid() {
        let key = TestRsaKey::primary("s-primary");
        let authority = MockAuthority::start().await;
        authority.mount_jwks(&[&key]).await;

        let token = TestTokenBuilder::new().expires_in(-3600).sign(&key);
        let result = verifier_for(&authority).decode(&token).await.unwrap();

        assert_eq!(result, Verification::Invalid(InvalidReason::Expired));
    }
}
