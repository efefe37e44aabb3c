//! Token lifecycle manager with a single cached slot.
//!
//! Holds at most one issued token and hands it out while it still verifies.
//! When the slot is empty, or the held token no longer verifies (expired,
//! bad signature, malformed), a fresh token is issued and replaces it.
//!
//! # Concurrency
//!
//! The slot lock is held across the whole check-then-reissue sequence,
//! including the verification and issuance network calls. Concurrent callers
//! queue behind it, so a burst of first calls produces exactly one issuance
//! and every caller receives the same token.
//!
//! # Errors
//!
//! A held token that fails verification is not an error; it triggers a
//! reissue. Any `AuthError` from the verifier or the issuer propagates
//! unchanged and leaves the slot as it was. There is no retry.
//!
//! # Example
//!
//! ```rust,ignore
//! use service_auth::config::Config;
//! use service_auth::token_manager::TokenLifecycleManager;
//!
//! let config = Config::from_env()?;
//! let manager = TokenLifecycleManager::from_config(&config)?;
//!
//! let payload = serde_json::Map::new();
//! let verified = manager.get_verified_token(&payload, 7).await?;
//! let header = verified.authorization_header();
//! ```

use crate::config::Config;
use crate::error::Result;
use crate::issuer::{JwtIssuer, TokenIssuer};
use crate::secret::{ExposeSecret, SecretString};
use crate::verifier::{JwtVerifier, TokenVerifier, Verification};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

/// A token handed out by the manager, with how it was obtained.
#[derive(Clone)]
pub struct VerifiedToken {
    /// The bearer token.
    pub token: SecretString,

    /// The token was minted during this call.
    pub freshly_issued: bool,

    /// The token was already cached and verified without reissuing.
    pub was_already_valid: bool,
}

impl VerifiedToken {
    /// `Bearer <token>`, for an `Authorization` header.
    #[must_use]
    pub fn authorization_header(&self) -> SecretString {
        SecretString::from(format!("Bearer {}", self.token.expose_secret()))
    }
}

impl fmt::Debug for VerifiedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifiedToken")
            .field("token", &"[REDACTED]")
            .field("freshly_issued", &self.freshly_issued)
            .field("was_already_valid", &self.was_already_valid)
            .finish()
    }
}

/// Reuse-or-reissue manager for one service identity.
///
/// Construct once and share (e.g. behind an `Arc`).
pub struct TokenLifecycleManager {
    issuer: Arc<dyn TokenIssuer>,
    verifier: Arc<dyn TokenVerifier>,
    slot: Mutex<Option<SecretString>>,
}

impl TokenLifecycleManager {
    /// Create a manager over any issuer and verifier.
    #[must_use]
    pub fn new(issuer: Arc<dyn TokenIssuer>, verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            issuer,
            verifier,
            slot: Mutex::new(None),
        }
    }

    /// Create a manager talking to the configured authority.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` if an HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let issuer = JwtIssuer::from_config(config)?;
        let verifier = JwtVerifier::from_config(config)?;
        Ok(Self::new(Arc::new(issuer), Arc::new(verifier)))
    }

    /// Return a token that verifies, issuing a new one only when needed.
    ///
    /// - empty slot: issue and cache; `freshly_issued`
    /// - cached token verifies: return it unchanged; `was_already_valid`
    /// - cached token invalid: issue and replace; `freshly_issued`
    ///
    /// # Errors
    ///
    /// Propagates any `AuthError` from verification or issuance. The slot is
    /// left untouched when that happens.
    #[instrument(skip_all, fields(validity_days = validity_days))]
    pub async fn get_verified_token(
        &self,
        payload: &Map<String, Value>,
        validity_days: u32,
    ) -> Result<VerifiedToken> {
        let mut slot = self.slot.lock().await;

        if let Some(current) = slot.as_ref() {
            match self.verifier.decode(current.expose_secret()).await? {
                Verification::Valid(_) => {
                    debug!(target: "service_auth.token_manager", "Cached token still valid");
                    return Ok(VerifiedToken {
                        token: current.clone(),
                        freshly_issued: false,
                        was_already_valid: true,
                    });
                }
                Verification::Invalid(reason) => {
                    info!(
                        target: "service_auth.token_manager",
                        reason = ?reason,
                        "Cached token no longer valid, reissuing"
                    );
                }
            }
        } else {
            debug!(target: "service_auth.token_manager", "No cached token, issuing");
        }

        let token = self.issuer.issue(payload, validity_days).await?;
        *slot = Some(token.clone());

        info!(target: "service_auth.token_manager", "Token issued and cached");

        Ok(VerifiedToken {
            token,
            freshly_issued: true,
            was_already_valid: false,
        })
    }

    /// Issue a new token unconditionally and cache it.
    ///
    /// # Errors
    ///
    /// Propagates any `AuthError` from issuance; the slot is unchanged then.
    #[instrument(skip_all, fields(validity_days = validity_days))]
    pub async fn reissue(
        &self,
        payload: &Map<String, Value>,
        validity_days: u32,
    ) -> Result<SecretString> {
        let mut slot = self.slot.lock().await;
        let token = self.issuer.issue(payload, validity_days).await?;
        *slot = Some(token.clone());

        info!(target: "service_auth.token_manager", "Token reissued");
        Ok(token)
    }

    /// Verify any token, independent of the cached slot.
    ///
    /// # Errors
    ///
    /// Returns `AuthError` only when the verifier itself fails.
    pub async fn decode(&self, token: &str) -> Result<Verification> {
        self.verifier.decode(token).await
    }

    /// The currently cached token, if any.
    pub async fn cached_token(&self) -> Option<SecretString> {
        self.slot.lock().await.clone()
    }

    /// Drop the cached token so the next call issues a new one.
    ///
    /// Useful after a downstream service rejects the token.
    pub async fn invalidate(&self) {
        let previous = self.slot.lock().await.take();
        if previous.is_some() {
            info!(target: "service_auth.token_manager", "Cached token invalidated");
        }
    }
}

impl fmt::Debug for TokenLifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenLifecycleManager")
            .field("slot", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

/// Mock issuer and verifier for testing.
///
/// This module provides trait doubles with call counters, so manager
/// behavior can be tested without an authority.
pub mod mock {
    use super::*;
    use crate::error::AuthError;
    use crate::jwt::{TokenClaims, PROVENANCE_SOURCE};
    use crate::verifier::InvalidReason;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Mock issuer that mints `mock-token-<n>` values.
    pub struct MockIssuer {
        /// Error to return instead of a token.
        error: Option<AuthError>,
        /// Delay before answering.
        delay: Option<Duration>,
        /// Number of calls made.
        call_count: AtomicUsize,
    }

    impl MockIssuer {
        /// Create a mock that always issues.
        pub fn issuing() -> Self {
            Self {
                error: None,
                delay: None,
                call_count: AtomicUsize::new(0),
            }
        }

        /// Create a mock that always fails with `error`.
        pub fn failing(error: AuthError) -> Self {
            Self {
                error: Some(error),
                delay: None,
                call_count: AtomicUsize::new(0),
            }
        }

        /// Answer after `delay`.
        #[must_use]
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        /// Get the number of calls made.
        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl TokenIssuer for MockIssuer {
        async fn issue(
            &self,
            _payload: &Map<String, Value>,
            _validity_days: u32,
        ) -> Result<SecretString> {
            let count = self.call_count.fetch_add(1, Ordering::SeqCst);

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            match &self.error {
                Some(error) => Err(error.clone()),
                None => Ok(SecretString::from(format!("mock-token-{count}"))),
            }
        }
    }

    enum Outcome {
        Accept,
        Reject(InvalidReason),
        Fail(AuthError),
    }

    /// Mock verifier with a fixed outcome.
    pub struct MockVerifier {
        outcome: Outcome,
        /// Number of calls made.
        call_count: AtomicUsize,
    }

    impl MockVerifier {
        /// Create a mock that accepts every token.
        pub fn accepting() -> Self {
            Self::with_outcome(Outcome::Accept)
        }

        /// Create a mock that judges every token invalid.
        pub fn rejecting(reason: InvalidReason) -> Self {
            Self::with_outcome(Outcome::Reject(reason))
        }

        /// Create a mock whose verification always fails with `error`.
        pub fn failing(error: AuthError) -> Self {
            Self::with_outcome(Outcome::Fail(error))
        }

        fn with_outcome(outcome: Outcome) -> Self {
            Self {
                outcome,
                call_count: AtomicUsize::new(0),
            }
        }

        /// Get the number of calls made.
        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl TokenVerifier for MockVerifier {
        async fn decode(&self, _token: &str) -> Result<Verification> {
            self.call_count.fetch_add(1, Ordering::SeqCst);

            match &self.outcome {
                Outcome::Accept => {
                    let mut custom = Map::new();
                    custom.insert("source".to_string(), Value::from(PROVENANCE_SOURCE));
                    Ok(Verification::Valid(TokenClaims {
                        exp: chrono::Utc::now().timestamp() + 3600,
                        custom,
                    }))
                }
                Outcome::Reject(reason) => Ok(Verification::Invalid(*reason)),
                Outcome::Fail(error) => Err(error.clone()),
            }
        }
    }
}
