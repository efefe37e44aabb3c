//! Token issuance against the authority's JWT recipe endpoint.
//!
//! Each call asks the authority to mint a fresh RS256 token signed with its
//! static key. The caller's payload is embedded as-is, with the provenance
//! tag `source: "microservice"` merged over it. Nothing is cached here.

use crate::config::Config;
use crate::error::{AuthError, Result};
use crate::jwt::PROVENANCE_SOURCE;
use crate::secret::{ExposeSecret, SecretString};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::{debug, instrument, trace, warn};

/// Seconds per validity day.
const SECONDS_PER_DAY: u64 = 86_400;

/// Signing algorithm requested from the authority.
const ISSUANCE_ALGORITHM: &str = "RS256";

/// Status string the authority returns on success.
const STATUS_OK: &str = "OK";

/// Mints new tokens.
#[async_trait::async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Request a token carrying `payload`, valid for `validity_days`.
    ///
    /// # Errors
    ///
    /// - `AuthError::InvalidRequest` - `validity_days` is zero
    /// - `AuthError::Issuance` - the authority rejected the request or could
    ///   not be reached
    async fn issue(&self, payload: &Map<String, Value>, validity_days: u32)
        -> Result<SecretString>;
}

/// Issuance request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateJwtRequest<'a> {
    payload: Map<String, Value>,
    use_static_signing_key: bool,
    algorithm: &'a str,
    jwks_domain: &'a str,
    validity: u64,
}

/// Issuance response body.
///
/// Custom Debug implementation redacts the token.
#[derive(Deserialize)]
struct CreateJwtResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    jwt: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl fmt::Debug for CreateJwtResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateJwtResponse")
            .field("status", &self.status)
            .field("jwt", &self.jwt.as_ref().map(|_| "[REDACTED]"))
            .field("message", &self.message)
            .finish()
    }
}

/// Issuer backed by the authority's HTTP API.
pub struct JwtIssuer {
    issuance_url: String,
    jwks_domain: String,
    api_key: Option<SecretString>,
    http_client: reqwest::Client,
}

impl JwtIssuer {
    /// Create an issuer posting to `issuance_url`.
    ///
    /// `jwks_domain` is the public domain the authority advertises for the
    /// key set of the tokens it mints.
    #[must_use]
    pub fn new(issuance_url: String, jwks_domain: String, http_client: reqwest::Client) -> Self {
        Self {
            issuance_url,
            jwks_domain,
            api_key: None,
            http_client,
        }
    }

    /// Create an issuer from configuration.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut issuer = Self::new(
            config.issuance_url(),
            config.api_domain.clone(),
            config.http_client()?,
        );
        if let Some(key) = &config.core_api_key {
            issuer = issuer.with_api_key(key.clone());
        }
        Ok(issuer)
    }

    /// Send `api-key` with every issuance request.
    #[must_use]
    pub fn with_api_key(mut self, api_key: SecretString) -> Self {
        self.api_key = Some(api_key);
        self
    }

    /// Endpoint this issuer posts to.
    #[must_use]
    pub fn issuance_url(&self) -> &str {
        &self.issuance_url
    }
}

impl fmt::Debug for JwtIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtIssuer")
            .field("issuance_url", &self.issuance_url)
            .field("jwks_domain", &self.jwks_domain)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl TokenIssuer for JwtIssuer {
    #[instrument(skip_all, fields(validity_days = validity_days))]
    async fn issue(
        &self,
        payload: &Map<String, Value>,
        validity_days: u32,
    ) -> Result<SecretString> {
        if validity_days == 0 {
            return Err(AuthError::InvalidRequest(
                "validity_days must be greater than zero".to_string(),
            ));
        }

        let mut claims = payload.clone();
        claims.insert("source".to_string(), Value::from(PROVENANCE_SOURCE));

        let body = CreateJwtRequest {
            payload: claims,
            use_static_signing_key: true,
            algorithm: ISSUANCE_ALGORITHM,
            jwks_domain: &self.jwks_domain,
            validity: u64::from(validity_days) * SECONDS_PER_DAY,
        };

        debug!(
            target: "service_auth.issuer",
            url = %self.issuance_url,
            payload_keys = payload.len(),
            "Requesting token from authority"
        );

        let mut request = self
            .http_client
            .post(&self.issuance_url)
            .header("rid", "jwt")
            .header(CONTENT_TYPE, "application/json; charset=utf-8");
        if let Some(key) = &self.api_key {
            request = request.header("api-key", key.expose_secret());
        }

        let response = request.json(&body).send().await.map_err(|e| {
            warn!(target: "service_auth.issuer", error = %e, "Issuance request failed");
            AuthError::Issuance {
                http_status: None,
                detail: format!("request failed: {e}"),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_else(|e| {
                trace!(target: "service_auth.issuer", error = %e, "Failed to read error response body");
                String::new()
            });
            warn!(
                target: "service_auth.issuer",
                status = %status,
                "Authority rejected issuance request"
            );
            trace!(target: "service_auth.issuer", body = %text, "Issuance rejection body");
            return Err(AuthError::Issuance {
                http_status: Some(status.as_u16()),
                detail: format!("Status {status}"),
            });
        }

        let parsed: CreateJwtResponse = response.json().await.map_err(|e| {
            warn!(target: "service_auth.issuer", error = %e, "Failed to parse issuance response");
            AuthError::Issuance {
                http_status: Some(status.as_u16()),
                detail: format!("invalid response body: {e}"),
            }
        })?;

        if let Some(reported) = parsed.status.as_deref().filter(|s| *s != STATUS_OK) {
            warn!(
                target: "service_auth.issuer",
                authority_status = %reported,
                message = ?parsed.message,
                "Authority reported issuance failure"
            );
            return Err(AuthError::Issuance {
                http_status: Some(status.as_u16()),
                detail: reported.to_string(),
            });
        }

        let Some(jwt) = parsed.jwt.filter(|t| !t.is_empty()) else {
            warn!(target: "service_auth.issuer", "Issuance response carried no token");
            return Err(AuthError::Issuance {
                http_status: Some(status.as_u16()),
                detail: "response missing jwt".to_string(),
            });
        };

        debug!(target: "service_auth.issuer", "Token issued");
        Ok(SecretString::from(jwt))
    }
}
