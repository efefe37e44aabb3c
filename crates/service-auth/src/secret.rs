//! Secret types for tokens and API keys.
//!
//! Re-exports [`secrecy`] so the rest of the crate holds bearer tokens and the
//! authority API key as `SecretString`. `Debug` output of anything that
//! contains one is redacted, and the value is zeroized on drop. Reading the
//! value requires an explicit `expose_secret()` call.
//!
//! # Example
//!
//! ```rust
//! use service_auth::secret::{ExposeSecret, SecretString};
//!
//! let token = SecretString::from("header.payload.signature");
//! assert!(!format!("{token:?}").contains("payload"));
//! assert_eq!(token.expose_secret(), "header.payload.signature");
//! ```

pub use secrecy::{ExposeSecret, SecretString};
