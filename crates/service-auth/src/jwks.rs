//! Key set resolver for the authority's published JWKS document.
//!
//! The key set is fetched fresh on every resolution unless a TTL cache is
//! configured. Keys are selected by the `kid` carried in the token header.
//! Positional selection (a fixed index into the published array) is kept
//! only as a deprecated compatibility mode: it silently picks the wrong key
//! when the authority reorders or adds keys.
//!
//! When the TTL cache is enabled and a `kid` is missing from the cached set,
//! the set is refetched once before reporting `KeyNotFound`, so a key rotation
//! never causes a rejection that a fresh fetch would have avoided.

use crate::config::Config;
use crate::error::{AuthError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::instrument;

/// JSON Web Key as published by the authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key ID - matched against the token header's `kid`.
    pub kid: String,

    /// Key type (`"RSA"` for the authority's static signing keys).
    pub kty: String,

    /// Signing algorithm (e.g. `"RS256"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    /// Key use (`"sig"`).
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,

    /// RSA modulus (base64url, no padding).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA public exponent (base64url, no padding).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
}

/// Published key set, in the order the authority returned it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    /// Key IDs in published order.
    #[must_use]
    pub fn kids(&self) -> Vec<&str> {
        self.keys.iter().map(|k| k.kid.as_str()).collect()
    }
}

/// How a key is chosen from the published set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeySelection {
    /// Match the `kid` from the token header exactly.
    #[default]
    ByKid,

    /// Deprecated: take the key at a fixed position in the published array.
    LegacyIndex(usize),
}

/// A single lookup against a key set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCriterion<'a> {
    /// Exact key ID match.
    Kid(&'a str),

    /// Position in the published array (deprecated compatibility mode).
    Position(usize),
}

impl fmt::Display for KeyCriterion<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyCriterion::Kid(kid) => write!(f, "kid '{kid}'"),
            KeyCriterion::Position(idx) => write!(f, "position {idx}"),
        }
    }
}

/// Pick one key from a set.
///
/// # Errors
///
/// Returns `AuthError::KeyNotFound` when nothing matches the criterion.
pub fn select_key<'s>(set: &'s JwkSet, criterion: &KeyCriterion<'_>) -> Result<&'s Jwk> {
    let found = match criterion {
        KeyCriterion::Kid(kid) => set.keys.iter().find(|k| k.kid == *kid),
        KeyCriterion::Position(idx) => set.keys.get(*idx),
    };

    found.ok_or_else(|| {
        tracing::debug!(
            target: "service_auth.jwks",
            criterion = %criterion,
            available = ?set.kids(),
            "No key matches criterion"
        );
        AuthError::KeyNotFound(criterion.to_string())
    })
}

/// Key set with the instant it stops being reusable.
///
/// `None` means the TTL is too large to represent; the set never expires.
struct CachedJwkSet {
    set: JwkSet,
    expires_at: Option<Instant>,
}

/// Client for the authority's JWKS endpoint.
pub struct JwksClient {
    /// URL to the JWKS endpoint.
    jwks_url: String,

    /// HTTP client for fetching JWKS.
    http_client: reqwest::Client,

    /// Key selection policy.
    selection: KeySelection,

    /// Cache TTL; `None` disables caching.
    cache_ttl: Option<Duration>,

    /// Last fetched key set, only populated when caching is enabled.
    cache: RwLock<Option<CachedJwkSet>>,
}

impl JwksClient {
    /// Create a client that fetches on every call and selects by `kid`.
    #[must_use]
    pub fn new(jwks_url: String, http_client: reqwest::Client) -> Self {
        Self {
            jwks_url,
            http_client,
            selection: KeySelection::ByKid,
            cache_ttl: None,
            cache: RwLock::new(None),
        }
    }

    /// Create a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if the HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut client = Self::new(config.jwks_url(), config.http_client()?);
        if let Some(ttl) = config.jwks_cache_ttl {
            client = client.with_cache_ttl(ttl);
        }
        if let Some(idx) = config.legacy_key_index {
            client = client.with_selection(KeySelection::LegacyIndex(idx));
        }
        Ok(client)
    }

    /// Cache fetched key sets for `ttl`.
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Set the key selection policy.
    #[must_use]
    pub fn with_selection(mut self, selection: KeySelection) -> Self {
        if let KeySelection::LegacyIndex(idx) = selection {
            tracing::warn!(
                target: "service_auth.jwks",
                index = idx,
                "Deprecated positional key selection enabled; keys will not be matched by kid"
            );
        }
        self.selection = selection;
        self
    }

    /// URL this client fetches from.
    #[must_use]
    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// Active key selection policy.
    #[must_use]
    pub fn selection(&self) -> KeySelection {
        self.selection
    }

    /// Fetch the published key set, bypassing the cache.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::KeySetFetch` on transport failure, non-2xx status,
    /// or an unparseable document.
    #[instrument(skip(self))]
    pub async fn fetch_key_set(&self) -> Result<JwkSet> {
        tracing::debug!(target: "service_auth.jwks", url = %self.jwks_url, "Fetching JWKS");

        let response = self
            .http_client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(target: "service_auth.jwks", error = %e, "Failed to fetch JWKS");
                AuthError::KeySetFetch(format!("request failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(
                target: "service_auth.jwks",
                status = %status,
                "JWKS endpoint returned error"
            );
            return Err(AuthError::KeySetFetch(format!("Status {status}")));
        }

        let set: JwkSet = response.json().await.map_err(|e| {
            tracing::error!(target: "service_auth.jwks", error = %e, "Failed to parse JWKS response");
            AuthError::KeySetFetch(format!("invalid key set document: {e}"))
        })?;

        tracing::debug!(
            target: "service_auth.jwks",
            key_count = set.keys.len(),
            "JWKS fetched"
        );

        if let Some(ttl) = self.cache_ttl {
            let mut cache = self.cache.write().await;
            *cache = Some(CachedJwkSet {
                set: set.clone(),
                expires_at: Instant::now().checked_add(ttl),
            });
        }

        Ok(set)
    }

    /// Resolve one key for `criterion`.
    ///
    /// Uses the cached key set when one is live, refetching once if the
    /// cached set has no match.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::KeySetFetch` if the set cannot be fetched, or
    /// `AuthError::KeyNotFound` if no key matches after a fresh fetch.
    #[instrument(skip(self), fields(criterion = %criterion))]
    pub async fn resolve(&self, criterion: &KeyCriterion<'_>) -> Result<Jwk> {
        if let Some(cached) = self.cached_set().await {
            if let Ok(key) = select_key(&cached, criterion) {
                tracing::debug!(target: "service_auth.jwks", "JWKS cache hit");
                return Ok(key.clone());
            }
            tracing::debug!(
                target: "service_auth.jwks",
                "Key not in cached JWKS, refetching"
            );
        }

        let set = self.fetch_key_set().await?;
        select_key(&set, criterion).cloned().inspect_err(|_| {
            tracing::warn!(
                target: "service_auth.jwks",
                criterion = %criterion,
                "Key not found in freshly fetched JWKS"
            );
        })
    }

    /// Criterion for a token, per the selection policy.
    ///
    /// `kid` is the key ID from the token header, if it had one.
    #[must_use]
    pub fn criterion_for<'a>(&self, kid: Option<&'a str>) -> Option<KeyCriterion<'a>> {
        match self.selection {
            KeySelection::ByKid => kid.map(KeyCriterion::Kid),
            KeySelection::LegacyIndex(idx) => Some(KeyCriterion::Position(idx)),
        }
    }

    async fn cached_set(&self) -> Option<JwkSet> {
        self.cache_ttl?;
        let cache = self.cache.read().await;
        cache
            .as_ref()
            .filter(|c| !matches!(c.expires_at, Some(at) if at <= Instant::now()))
            .map(|c| c.set.clone())
    }

    /// Drop any cached key set.
    pub async fn clear_cache(&self) {
        let mut cache = self.cache.write().await;
        *cache = None;
    }
}

impl fmt::Debug for JwksClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwksClient")
            .field("jwks_url", &self.jwks_url)
            .field("selection", &self.selection)
            .field("cache_ttl", &self.cache_ttl)
            .finish_non_exhaustive()
    }
}
