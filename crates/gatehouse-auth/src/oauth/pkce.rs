//! PKCE (Proof Key for Code Exchange, RFC 7636) verification.
//!
//! The challenge and method are recorded on the authorization grant when the
//! code is issued. At redemption the supplied verifier is transformed with the
//! recorded method and compared in constant time.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during PKCE verification.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PkceError {
    /// A challenge was recorded but no verifier was supplied.
    #[error("code_verifier is required")]
    MissingVerifier,

    /// A verifier was supplied for a grant that recorded no challenge.
    #[error("code_verifier supplied but no code_challenge was recorded")]
    UnexpectedVerifier,

    /// The recorded challenge method is not supported.
    #[error("Unsupported challenge method: {0}")]
    UnsupportedMethod(String),

    /// The verifier does not match the challenge.
    #[error("PKCE verification failed: verifier does not match challenge")]
    VerificationFailed,
}

// =============================================================================
// Challenge Method
// =============================================================================

/// PKCE code challenge method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PkceChallengeMethod {
    /// `BASE64URL(SHA256(verifier))`.
    #[default]
    S256,
    /// Verifier compared as-is.
    Plain,
}

impl PkceChallengeMethod {
    /// Parses a challenge method. A missing method means `plain` (RFC 7636 §4.3).
    ///
    /// # Errors
    ///
    /// Returns `PkceError::UnsupportedMethod` for anything but `S256`/`plain`.
    pub fn parse(method: Option<&str>) -> Result<Self, PkceError> {
        match method.map(str::trim) {
            None | Some("") | Some("plain") => Ok(Self::Plain),
            Some("S256") => Ok(Self::S256),
            Some(other) => Err(PkceError::UnsupportedMethod(other.to_string())),
        }
    }

    /// Wire value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S256 => "S256",
            Self::Plain => "plain",
        }
    }

    /// Transforms a verifier into the challenge this method expects.
    #[must_use]
    pub fn challenge_for(&self, verifier: &str) -> String {
        match self {
            Self::S256 => s256_challenge(verifier),
            Self::Plain => verifier.to_string(),
        }
    }
}

impl std::fmt::Display for PkceChallengeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Computes `BASE64URL(SHA256(ASCII(verifier)))`.
#[must_use]
pub fn s256_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Checks a redemption against the recorded challenge.
///
/// No challenge and no verifier passes: PKCE was not in effect for the code.
///
/// # Errors
///
/// Any other combination that does not match yields a [`PkceError`].
pub fn verify(
    challenge: Option<&str>,
    method: Option<&str>,
    verifier: Option<&str>,
) -> Result<(), PkceError> {
    let challenge = challenge.filter(|c| !c.is_empty());
    let verifier = verifier.filter(|v| !v.is_empty());

    match (challenge, verifier) {
        (None, None) => Ok(()),
        (None, Some(_)) => Err(PkceError::UnexpectedVerifier),
        (Some(_), None) => Err(PkceError::MissingVerifier),
        (Some(challenge), Some(verifier)) => {
            let expected = PkceChallengeMethod::parse(method)?.challenge_for(verifier);
            if constant_time_eq(expected.as_bytes(), challenge.as_bytes()) {
                Ok(())
            } else {
                Err(PkceError::VerificationFailed)
            }
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc7636_appendix_b_test_vector() {
        assert_eq!(
            s256_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_s256_verification() {
        let challenge = s256_challenge("verifier123");
        assert!(verify(Some(&challenge), Some("S256"), Some("verifier123")).is_ok());
        assert_eq!(
            verify(Some(&challenge), Some("S256"), Some("wrongverifier")),
            Err(PkceError::VerificationFailed)
        );
    }

    #[test]
    fn test_plain_verification() {
        assert!(verify(Some("verifier123"), Some("plain"), Some("verifier123")).is_ok());
        assert!(verify(Some("verifier123"), None, Some("verifier123")).is_ok());
        assert!(verify(Some("verifier123"), None, Some("other")).is_err());
    }

    #[test]
    fn test_absent_pkce_passes() {
        assert!(verify(None, None, None).is_ok());
        assert!(verify(Some(""), None, Some("")).is_ok());
    }

    #[test]
    fn test_one_sided_pkce_fails() {
        assert_eq!(
            verify(Some("abc"), Some("S256"), None),
            Err(PkceError::MissingVerifier)
        );
        assert_eq!(
            verify(None, None, Some("verifier123")),
            Err(PkceError::UnexpectedVerifier)
        );
    }

    #[test]
    fn test_unknown_method() {
        assert_eq!(
            verify(Some("abc"), Some("S512"), Some("abc")),
            Err(PkceError::UnsupportedMethod("S512".to_string()))
        );
    }
}
