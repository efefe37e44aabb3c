//! # Service Auth Test Utilities
//!
//! Shared test utilities for the `service-auth` crate.
//!
//! This crate provides:
//! - Deterministic crypto fixtures (fixed RSA keys for reproducible tests)
//! - Test data builders (TestTokenBuilder)
//! - A mock authority (issuance and JWKS endpoints on a wiremock server)
//! - Custom assertions (TokenAssertions trait)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use service_auth_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let key = TestRsaKey::primary("s-static");
//!     let authority = MockAuthority::start().await;
//!     authority.mount_jwks(&[&key]).await;
//!     authority.mount_issuance(&key).await;
//!
//!     let token = TestTokenBuilder::new()
//!         .with_claim("userId", "u-42")
//!         .sign(&key);
//!
//!     token.assert_valid_jwt().assert_signed_by("s-static");
//! }
//! ```

pub mod assertions;
pub mod crypto_fixtures;
pub mod mock_authority;
pub mod token_builders;

// Re-export commonly used items
pub use assertions::*;
pub use crypto_fixtures::*;
pub use mock_authority::*;
pub use token_builders::*;
