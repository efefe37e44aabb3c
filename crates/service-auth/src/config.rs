//! Connection settings for the authority and its key set endpoint.
//!
//! Configuration is loaded once from environment variables and then passed by
//! reference to the components that need it. The authority API key is
//! redacted in Debug output.

use crate::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default base path under which the API domain serves the JWKS document.
pub const DEFAULT_API_BASE_PATH: &str = "auth";

/// Default token validity requested from the authority, in days.
pub const DEFAULT_VALIDITY_DAYS: u32 = 7;

/// Maximum JWKS cache TTL (1 hour).
pub const MAX_JWKS_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Maximum clock leeway applied to `exp` checks (10 minutes).
pub const MAX_LEEWAY: Duration = Duration::from_secs(600);

/// Settings shared by the issuer, the key set resolver and the verifier.
#[derive(Clone)]
pub struct Config {
    /// Authority base URL (the core exposing `/recipe/jwt`).
    pub core_url: String,

    /// Optional API key sent to the authority as the `api-key` header.
    pub core_api_key: Option<SecretString>,

    /// Domain the authority publishes keys under (`jwksDomain`).
    pub api_domain: String,

    /// Path segment between the API domain and `/jwt/jwks.json`.
    pub api_base_path: String,

    /// Explicit JWKS URL, overriding the one derived from domain and path.
    pub jwks_url_override: Option<String>,

    /// Key set cache TTL. `None` fetches the key set on every verification.
    pub jwks_cache_ttl: Option<Duration>,

    /// Deprecated positional key selection. `None` selects by `kid`.
    pub legacy_key_index: Option<usize>,

    /// Clock leeway for `exp` validation, in seconds.
    pub leeway_seconds: u64,

    /// Validity requested for new tokens, in days.
    pub validity_days: u32,

    /// Per-request HTTP timeout. `None` leaves deadlines to the caller.
    pub http_timeout: Option<Duration>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("core_url", &self.core_url)
            .field(
                "core_api_key",
                &self.core_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("api_domain", &self.api_domain)
            .field("api_base_path", &self.api_base_path)
            .field("jwks_url_override", &self.jwks_url_override)
            .field("jwks_cache_ttl", &self.jwks_cache_ttl)
            .field("legacy_key_index", &self.legacy_key_index)
            .field("leeway_seconds", &self.leeway_seconds)
            .field("validity_days", &self.validity_days)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
}

impl Config {
    /// Create a configuration with defaults for everything but the two URLs.
    #[must_use]
    pub fn new(core_url: String, api_domain: String) -> Self {
        Self {
            core_url,
            core_api_key: None,
            api_domain,
            api_base_path: DEFAULT_API_BASE_PATH.to_string(),
            jwks_url_override: None,
            jwks_cache_ttl: None,
            legacy_key_index: None,
            leeway_seconds: 0,
            validity_days: DEFAULT_VALIDITY_DAYS,
            http_timeout: None,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or a value
    /// fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or a value
    /// fails validation.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let core_url = required(vars, "AUTH_CORE_URL")?;
        let api_domain = required(vars, "API_DOMAIN")?;

        let core_api_key = vars
            .get("AUTH_CORE_API_KEY")
            .filter(|v| !v.is_empty())
            .map(|v| SecretString::from(v.clone()));

        let api_base_path = vars
            .get("API_BASE_PATH")
            .cloned()
            .unwrap_or_else(|| DEFAULT_API_BASE_PATH.to_string());

        let jwks_url_override = vars.get("JWKS_URL").filter(|v| !v.is_empty()).cloned();

        let jwks_cache_ttl = match parse_u64(vars, "JWKS_CACHE_TTL_SECONDS")? {
            None | Some(0) => None,
            Some(secs) if secs > MAX_JWKS_CACHE_TTL.as_secs() => {
                return Err(invalid(
                    "JWKS_CACHE_TTL_SECONDS",
                    format!(
                        "must not exceed {} seconds, got {secs}",
                        MAX_JWKS_CACHE_TTL.as_secs()
                    ),
                ));
            }
            Some(secs) => Some(Duration::from_secs(secs)),
        };

        let legacy_key_index = parse_u64(vars, "JWKS_LEGACY_KEY_INDEX")?
            .map(|idx| {
                usize::try_from(idx).map_err(|e| invalid("JWKS_LEGACY_KEY_INDEX", e.to_string()))
            })
            .transpose()?;

        let leeway_seconds = parse_u64(vars, "JWT_LEEWAY_SECONDS")?.unwrap_or(0);
        if leeway_seconds > MAX_LEEWAY.as_secs() {
            return Err(invalid(
                "JWT_LEEWAY_SECONDS",
                format!(
                    "must not exceed {} seconds, got {leeway_seconds}",
                    MAX_LEEWAY.as_secs()
                ),
            ));
        }

        let validity_days = match parse_u64(vars, "JWT_VALIDITY_DAYS")? {
            None => DEFAULT_VALIDITY_DAYS,
            Some(0) => return Err(invalid("JWT_VALIDITY_DAYS", "must be positive".into())),
            Some(days) => {
                u32::try_from(days).map_err(|e| invalid("JWT_VALIDITY_DAYS", e.to_string()))?
            }
        };

        let http_timeout = match parse_u64(vars, "HTTP_TIMEOUT_SECONDS")? {
            None => None,
            Some(0) => return Err(invalid("HTTP_TIMEOUT_SECONDS", "must be positive".into())),
            Some(secs) => Some(Duration::from_secs(secs)),
        };

        Ok(Self {
            core_url,
            core_api_key,
            api_domain,
            api_base_path,
            jwks_url_override,
            jwks_cache_ttl,
            legacy_key_index,
            leeway_seconds,
            validity_days,
            http_timeout,
        })
    }

    /// URL of the published key set.
    ///
    /// `{api_domain}/{api_base_path}/jwt/jwks.json` unless overridden by
    /// `JWKS_URL`. Redundant slashes between the parts are dropped.
    #[must_use]
    pub fn jwks_url(&self) -> String {
        if let Some(url) = &self.jwks_url_override {
            return url.clone();
        }

        let domain = self.api_domain.trim_end_matches('/');
        let base_path = self.api_base_path.trim_matches('/');
        if base_path.is_empty() {
            format!("{domain}/jwt/jwks.json")
        } else {
            format!("{domain}/{base_path}/jwt/jwks.json")
        }
    }

    /// URL of the authority's token minting endpoint.
    #[must_use]
    pub fn issuance_url(&self) -> String {
        format!("{}/recipe/jwt", self.core_url.trim_end_matches('/'))
    }

    /// Build the shared HTTP client honouring `http_timeout`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the client cannot be built.
    pub fn http_client(&self) -> crate::error::Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = self.http_timeout {
            builder = builder.timeout(timeout);
        }
        builder.build().map_err(|e| {
            crate::error::AuthError::Configuration(format!("Failed to build HTTP client: {e}"))
        })
    }
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn parse_u64(vars: &HashMap<String, String>, name: &str) -> Result<Option<u64>, ConfigError> {
    vars.get(name)
        .map(|value| {
            value.trim().parse::<u64>().map_err(|e| {
                invalid(
                    name,
                    format!("must be a non-negative integer, got '{value}': {e}"),
                )
            })
        })
        .transpose()
}

fn invalid(name: &str, reason: String) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        reason,
    }
}
