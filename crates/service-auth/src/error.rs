//! Error types for token issuance, key resolution, and verification.
//!
//! A token that fails verification is NOT an error: it is reported as
//! [`Verification::Invalid`](crate::verifier::Verification::Invalid). The
//! variants here mean the issuer or the verifier itself could not do its job,
//! and they always propagate to the caller unchanged.

use thiserror::Error;

/// Errors raised by the token lifecycle components.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The authority rejected the issuance request or could not be reached.
    ///
    /// `http_status` is `None` when no response was received at all.
    #[error("Token issuance failed: {detail}")]
    Issuance {
        /// HTTP status returned by the authority, if any.
        http_status: Option<u16>,
        /// Authority status string or transport error description.
        detail: String,
    },

    /// The key set endpoint was unreachable, returned non-2xx, or sent an
    /// unparseable document.
    #[error("Key set fetch failed: {0}")]
    KeySetFetch(String),

    /// No published key matched the selection criterion.
    #[error("No matching key in key set: {0}")]
    KeyNotFound(String),

    /// A published key record was malformed or used an unsupported algorithm.
    #[error("Key conversion failed: {0}")]
    KeyConversion(String),

    /// Caller input was rejected before any network call.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Component could not be constructed from its configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result type alias using `AuthError`
pub type Result<T> = std::result::Result<T, AuthError>;
