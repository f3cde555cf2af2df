//! Signed compact tokens.
//!
//! ID tokens and the optional session claim-set are signed through the
//! [`TokenSigner`] trait. [`JwtSigner`] implements it with `jsonwebtoken`
//! for HMAC and RSA algorithms.

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::config::SigningConfig;
use crate::error::{AuthError, AuthResult};

/// Produces a signed compact token from a claim set.
pub trait TokenSigner: Send + Sync {
    /// Signs `claims` and returns the compact serialization.
    fn sign(&self, claims: &serde_json::Value) -> AuthResult<String>;
}

/// `jsonwebtoken`-backed signer.
pub struct JwtSigner {
    algorithm: Algorithm,
    key: EncodingKey,
    kid: Option<String>,
}

impl std::fmt::Debug for JwtSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtSigner")
            .field("algorithm", &self.algorithm)
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

impl JwtSigner {
    /// Creates an HMAC signer.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if `algorithm` is not an HMAC algorithm.
    pub fn hmac(algorithm: Algorithm, secret: &[u8]) -> AuthResult<Self> {
        if !matches!(
            algorithm,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(AuthError::configuration(format!(
                "{algorithm:?} is not an HMAC algorithm"
            )));
        }
        Ok(Self {
            algorithm,
            key: EncodingKey::from_secret(secret),
            kid: None,
        })
    }

    /// Creates an RSA signer from a PEM private key.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the key cannot be parsed.
    pub fn rsa_pem(algorithm: Algorithm, pem: &str) -> AuthResult<Self> {
        let key = EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| AuthError::configuration(format!("invalid RSA private key: {e}")))?;
        Ok(Self {
            algorithm,
            key,
            kid: None,
        })
    }

    /// Builds a signer from configuration.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for unknown algorithms or missing key material.
    pub fn from_config(config: &SigningConfig) -> AuthResult<Self> {
        let algorithm = Algorithm::from_str(&config.algorithm).map_err(|_| {
            AuthError::configuration(format!("unknown signing algorithm {}", config.algorithm))
        })?;

        let signer = if config.is_hmac() {
            let secret = config
                .secret
                .as_deref()
                .ok_or_else(|| AuthError::configuration("signing.secret is not set"))?;
            Self::hmac(algorithm, secret.as_bytes())?
        } else {
            let pem = config
                .private_key_pem
                .as_deref()
                .ok_or_else(|| AuthError::configuration("signing.private_key_pem is not set"))?;
            Self::rsa_pem(algorithm, pem)?
        };

        Ok(signer.with_kid(config.key_id.clone()))
    }

    /// Sets the `kid` header.
    #[must_use]
    pub fn with_kid(mut self, kid: Option<String>) -> Self {
        self.kid = kid;
        self
    }
}

impl TokenSigner for JwtSigner {
    fn sign(&self, claims: &serde_json::Value) -> AuthResult<String> {
        let mut header = Header::new(self.algorithm);
        header.kid = self.kid.clone();

        encode(&header, claims, &self.key).map_err(|e| AuthError::signing(e.to_string()))
    }
}

/// ID token claims for OpenID Connect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdTokenClaims {
    /// Issuer.
    pub iss: String,

    /// Subject (user ID, or client ID for client credentials).
    pub sub: String,

    /// Audience (client ID).
    pub aud: String,

    /// Expiration time (Unix timestamp).
    pub exp: i64,

    /// Issued at (Unix timestamp).
    pub iat: i64,

    /// Authentication time (Unix timestamp).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,

    /// Nonce from authorization request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// Authentication context class.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acr: Option<String>,

    /// Session id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,

    /// Resource-owner claims released in legacy mode.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}
