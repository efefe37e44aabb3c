//! Conversion of published key records into usable verification keys.
//!
//! Two paths are supported:
//! - JWK components straight into a `jsonwebtoken` decoding key
//! - JWK into SPKI PEM text, for libraries that only accept textual keys,
//!   and PEM back into a verification key
//!
//! Only RSA keys are accepted, since the authority signs with RS256.

use crate::error::{AuthError, Result};
use crate::jwks::Jwk;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{Algorithm, DecodingKey};
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{BigUint, RsaPublicKey};
use std::fmt;
use std::str::FromStr;

/// Algorithm assumed when neither the caller nor the JWK names one.
pub const DEFAULT_ALGORITHM: Algorithm = Algorithm::RS256;

/// A key ready to check token signatures.
#[derive(Clone)]
pub struct VerificationKey {
    kid: String,
    algorithm: Algorithm,
    decoding_key: DecodingKey,
}

impl VerificationKey {
    /// Key ID of the record this key was built from.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Algorithm tokens must be signed with to verify against this key.
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Build a verification key from a published JWK.
///
/// The algorithm is `alg_hint` if given, else the JWK's `alg`, else RS256.
///
/// # Errors
///
/// Returns `AuthError::KeyConversion` when the key type is not RSA, the
/// algorithm is unknown or not an RSA algorithm, or `n`/`e` are missing or
/// not valid base64url.
pub fn to_verification_key(jwk: &Jwk, alg_hint: Option<Algorithm>) -> Result<VerificationKey> {
    let algorithm = resolve_algorithm(jwk, alg_hint)?;
    let (n, e) = rsa_components(jwk)?;

    let decoding_key = DecodingKey::from_rsa_components(n, e).map_err(|err| {
        tracing::warn!(
            target: "service_auth.key_material",
            kid = %jwk.kid,
            error = %err,
            "Invalid RSA components in JWK"
        );
        AuthError::KeyConversion(format!("key '{}': invalid RSA components", jwk.kid))
    })?;

    Ok(VerificationKey {
        kid: jwk.kid.clone(),
        algorithm,
        decoding_key,
    })
}

/// Encode a published RSA JWK as an SPKI PEM public key.
///
/// # Errors
///
/// Returns `AuthError::KeyConversion` when the record is not a well-formed
/// RSA public key.
pub fn to_pem(jwk: &Jwk) -> Result<String> {
    if jwk.kty != "RSA" {
        return Err(unsupported_kty(jwk));
    }
    let (n, e) = rsa_components(jwk)?;

    let decode = |field: &str, value: &str| {
        URL_SAFE_NO_PAD.decode(value).map_err(|err| {
            AuthError::KeyConversion(format!(
                "key '{}': field '{field}' is not base64url: {err}",
                jwk.kid
            ))
        })
    };
    let modulus = BigUint::from_bytes_be(&decode("n", n)?);
    let exponent = BigUint::from_bytes_be(&decode("e", e)?);

    let public_key = RsaPublicKey::new(modulus, exponent).map_err(|err| {
        AuthError::KeyConversion(format!("key '{}': {err}", jwk.kid))
    })?;

    public_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|err| AuthError::KeyConversion(format!("key '{}': {err}", jwk.kid)))
}

/// Build a verification key from an RSA public key in PEM form.
///
/// Accepts both SPKI (`BEGIN PUBLIC KEY`) and PKCS#1 (`BEGIN RSA PUBLIC KEY`).
///
/// # Errors
///
/// Returns `AuthError::KeyConversion` if the PEM cannot be parsed or the
/// algorithm is not an RSA algorithm.
pub fn verification_key_from_pem(
    kid: &str,
    pem: &str,
    algorithm: Algorithm,
) -> Result<VerificationKey> {
    ensure_rsa_algorithm(kid, algorithm)?;

    let decoding_key = DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(|err| {
        AuthError::KeyConversion(format!("key '{kid}': invalid PEM: {err}"))
    })?;

    Ok(VerificationKey {
        kid: kid.to_string(),
        algorithm,
        decoding_key,
    })
}

fn resolve_algorithm(jwk: &Jwk, alg_hint: Option<Algorithm>) -> Result<Algorithm> {
    if jwk.kty != "RSA" {
        return Err(unsupported_kty(jwk));
    }

    let algorithm = match (alg_hint, jwk.alg.as_deref()) {
        (Some(hint), _) => hint,
        (None, Some(alg)) => Algorithm::from_str(alg).map_err(|_| {
            AuthError::KeyConversion(format!("key '{}': unsupported algorithm '{alg}'", jwk.kid))
        })?,
        (None, None) => DEFAULT_ALGORITHM,
    };

    ensure_rsa_algorithm(&jwk.kid, algorithm)?;
    Ok(algorithm)
}

fn ensure_rsa_algorithm(kid: &str, algorithm: Algorithm) -> Result<()> {
    match algorithm {
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => Ok(()),
        other => Err(AuthError::KeyConversion(format!(
            "key '{kid}': algorithm {other:?} is not an RSA algorithm"
        ))),
    }
}

fn rsa_components(jwk: &Jwk) -> Result<(&str, &str)> {
    match (jwk.n.as_deref(), jwk.e.as_deref()) {
        (Some(n), Some(e)) if !n.is_empty() && !e.is_empty() => Ok((n, e)),
        _ => Err(AuthError::KeyConversion(format!(
            "key '{}': missing RSA modulus or exponent",
            jwk.kid
        ))),
    }
}

fn unsupported_kty(jwk: &Jwk) -> AuthError {
    tracing::warn!(
        target: "service_auth.key_material",
        kid = %jwk.kid,
        kty = %jwk.kty,
        "Unsupported JWK key type"
    );
    AuthError::KeyConversion(format!("key '{}': unsupported key type '{}'", jwk.kid, jwk.kty))
}
