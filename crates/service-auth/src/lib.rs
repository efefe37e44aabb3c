//! Service-to-service token lifecycle: issuance, key resolution, and
//! verification of authority-signed JWTs, with a single cached token reused
//! while it remains valid.

#![warn(clippy::pedantic)]

/// Module for environment-driven configuration
pub mod config;

/// Module for the shared error type
pub mod error;

/// Module for token issuance against the authority
pub mod issuer;

/// Module for fetching and selecting published keys
pub mod jwks;

/// Module for JWT structure helpers (size limit, kid extraction, claims)
pub mod jwt;

/// Module for converting published keys into verification keys
pub mod key_material;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for the reuse-or-reissue token manager
pub mod token_manager;

/// Module for signature and claim verification
pub mod verifier;
