//! Protocol-core configuration.
//!
//! Sessions, cookies, token issuance, end-session and signing are configured
//! through one [`AuthConfig`] tree. Every section deserializes with defaults so
//! a partial TOML file is enough.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::GrantType;

/// Idle limit value that disables the limit.
pub const UNLIMITED: i64 = -1;

/// Root configuration.
///
/// # Example (TOML)
///
/// ```toml
/// [auth]
/// issuer = "https://idp.example.com"
///
/// [auth.session]
/// unused_lifetime = 86400
/// unauthenticated_unused_lifetime = 120
/// session_lifetime = "24h"
///
/// [auth.token]
/// access_token_lifetime = "1h"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Issuer URL placed in the `iss` claim of ID tokens.
    pub issuer: String,

    /// Session lifetimes and persistence.
    pub session: SessionConfig,

    /// Session cookie attributes.
    pub cookie: CookieConfig,

    /// Token issuance.
    pub token: TokenConfig,

    /// End-session behavior.
    pub end_session: EndSessionConfig,

    /// Token signing.
    pub signing: SigningConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: "http://localhost:8080".to_string(),
            session: SessionConfig::default(),
            cookie: CookieConfig::default(),
            token: TokenConfig::default(),
            end_session: EndSessionConfig::default(),
            signing: SigningConfig::default(),
        }
    }
}

/// Session lifetimes and persistence.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle limit in seconds for authenticated sessions. `-1` disables it.
    pub unused_lifetime: i64,

    /// Idle limit in seconds for unauthenticated sessions. `-1` disables it.
    pub unauthenticated_unused_lifetime: i64,

    /// Absolute lifetime measured from authentication time.
    /// Also drives the session cookie `Expires` attribute.
    #[serde(with = "humantime_serde")]
    pub session_lifetime: Duration,

    /// Persist sessions created by `prompt=none` requests.
    pub persist_on_prompt_none: bool,

    /// Attach a signed claim-set to every newly created session.
    pub session_as_jwt: bool,

    /// Total write attempts when the store reports a conflict.
    pub max_write_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            unused_lifetime: 86_400,
            unauthenticated_unused_lifetime: 120,
            session_lifetime: Duration::from_secs(24 * 3600),
            persist_on_prompt_none: false,
            session_as_jwt: false,
            max_write_attempts: 3,
        }
    }
}

impl SessionConfig {
    /// Authenticated idle limit, `None` when unlimited.
    #[must_use]
    pub fn authenticated_idle_limit(&self) -> Option<Duration> {
        idle_limit(self.unused_lifetime)
    }

    /// Unauthenticated idle limit, `None` when unlimited.
    #[must_use]
    pub fn unauthenticated_idle_limit(&self) -> Option<Duration> {
        idle_limit(self.unauthenticated_unused_lifetime)
    }
}

fn idle_limit(secs: i64) -> Option<Duration> {
    u64::try_from(secs).ok().map(Duration::from_secs)
}

/// Session cookie attributes.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CookieConfig {
    /// Mark session cookies `HttpOnly`.
    /// Off by default so the check-session iframe can read the cookie.
    pub http_only: bool,
}

/// Token issuance.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Grant types the server accepts at all. Clients narrow this further.
    pub grant_types_supported: Vec<GrantType>,

    /// Authorization code lifetime.
    #[serde(with = "humantime_serde")]
    pub authorization_code_lifetime: Duration,

    /// Access token lifetime.
    #[serde(with = "humantime_serde")]
    pub access_token_lifetime: Duration,

    /// Refresh token lifetime.
    #[serde(with = "humantime_serde")]
    pub refresh_token_lifetime: Duration,

    /// ID token lifetime.
    #[serde(with = "humantime_serde")]
    pub id_token_lifetime: Duration,

    /// Copy resource-owner claims into ID tokens.
    pub legacy_id_token_claims: bool,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            grant_types_supported: vec![
                GrantType::AuthorizationCode,
                GrantType::RefreshToken,
                GrantType::ClientCredentials,
                GrantType::Password,
            ],
            authorization_code_lifetime: Duration::from_secs(600),
            access_token_lifetime: Duration::from_secs(3600),
            refresh_token_lifetime: Duration::from_secs(30 * 24 * 3600),
            id_token_lifetime: Duration::from_secs(3600),
            legacy_id_token_claims: false,
        }
    }
}

/// End-session behavior.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EndSessionConfig {
    /// Accept an access token in `id_token_hint` when no ID token matches.
    pub with_access_token: bool,
}

/// Token signing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Signing algorithm.
    /// Supported: "HS256", "HS384", "HS512", "RS256", "RS384", "RS512"
    pub algorithm: String,

    /// Shared secret for HMAC algorithms.
    pub secret: Option<String>,

    /// PEM-encoded RSA private key for RSA algorithms.
    pub private_key_pem: Option<String>,

    /// Key id placed in the JWT header.
    pub key_id: Option<String>,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            algorithm: "HS256".to_string(),
            secret: None,
            private_key_pem: None,
            key_id: None,
        }
    }
}

impl SigningConfig {
    /// Returns `true` for HMAC algorithms.
    #[must_use]
    pub fn is_hmac(&self) -> bool {
        self.algorithm.starts_with("HS")
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl AuthConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - The issuer URL is empty
    /// - An idle limit is below `-1`
    /// - The absolute session lifetime or a token lifetime is zero
    /// - The signing algorithm is unknown or its key material is missing
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.is_empty() {
            return Err(ConfigError::InvalidValue(
                "issuer cannot be empty".to_string(),
            ));
        }

        for (name, value) in [
            ("session.unused_lifetime", self.session.unused_lifetime),
            (
                "session.unauthenticated_unused_lifetime",
                self.session.unauthenticated_unused_lifetime,
            ),
        ] {
            if value < UNLIMITED {
                return Err(ConfigError::InvalidValue(format!(
                    "{name} must be -1 (unlimited) or a non-negative number of seconds"
                )));
            }
        }

        if self.session.session_lifetime.is_zero() {
            return Err(ConfigError::InvalidValue(
                "session.session_lifetime must be > 0".to_string(),
            ));
        }

        if self.session.max_write_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "session.max_write_attempts must be > 0".to_string(),
            ));
        }

        for (name, value) in [
            (
                "token.authorization_code_lifetime",
                self.token.authorization_code_lifetime,
            ),
            ("token.access_token_lifetime", self.token.access_token_lifetime),
            ("token.refresh_token_lifetime", self.token.refresh_token_lifetime),
            ("token.id_token_lifetime", self.token.id_token_lifetime),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue(format!("{name} must be > 0")));
            }
        }

        match self.signing.algorithm.as_str() {
            "HS256" | "HS384" | "HS512" => {
                if self.signing.secret.as_deref().is_none_or(str::is_empty) {
                    return Err(ConfigError::Missing(
                        "signing.secret is required for HMAC algorithms".to_string(),
                    ));
                }
            }
            "RS256" | "RS384" | "RS512" => {
                if self.signing.private_key_pem.is_none() {
                    return Err(ConfigError::Missing(
                        "signing.private_key_pem is required for RSA algorithms".to_string(),
                    ));
                }
            }
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "Invalid signing algorithm: '{other}'. Must be HS256, HS384, HS512, RS256, RS384, or RS512"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AuthConfig {
        let mut config = AuthConfig::default();
        config.signing.secret = Some("test-secret".to_string());
        config
    }

    #[test]
    fn test_default_config() {
        let config = AuthConfig::default();
        assert_eq!(config.issuer, "http://localhost:8080");
        assert_eq!(config.session.unused_lifetime, 86_400);
        assert_eq!(config.session.unauthenticated_unused_lifetime, 120);
        assert_eq!(config.session.max_write_attempts, 3);
        assert!(!config.cookie.http_only);
        assert!(!config.end_session.with_access_token);
        assert_eq!(config.signing.algorithm, "HS256");
    }

    #[test]
    fn test_default_config_requires_secret() {
        let err = AuthConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_empty_issuer_fails_validation() {
        let mut config = valid_config();
        config.issuer = String::new();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("issuer"));
    }

    #[test]
    fn test_idle_limit_below_unlimited_fails() {
        let mut config = valid_config();
        config.session.unused_lifetime = -5;
        assert!(config.validate().is_err());

        config.session.unused_lifetime = UNLIMITED;
        assert!(config.validate().is_ok());
        assert!(config.session.authenticated_idle_limit().is_none());
    }

    #[test]
    fn test_rsa_requires_key() {
        let mut config = valid_config();
        config.signing.algorithm = "RS256".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Missing(_))));
    }

    #[test]
    fn test_unknown_algorithm_fails() {
        let mut config = valid_config();
        config.signing.algorithm = "none".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("signing algorithm"));
    }

    #[test]
    fn test_deserialize_partial_toml() {
        let toml = r#"
            issuer = "https://idp.example.com"

            [session]
            unused_lifetime = -1
            session_lifetime = "8h"
            persist_on_prompt_none = true

            [token]
            grant_types_supported = ["authorization_code", "refresh_token"]
            access_token_lifetime = "15m"

            [signing]
            secret = "s3cret"
        "#;
        let config: AuthConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.issuer, "https://idp.example.com");
        assert_eq!(config.session.unused_lifetime, -1);
        assert_eq!(config.session.unauthenticated_unused_lifetime, 120);
        assert_eq!(config.session.session_lifetime, Duration::from_secs(8 * 3600));
        assert!(config.session.persist_on_prompt_none);
        assert_eq!(
            config.token.grant_types_supported,
            vec![GrantType::AuthorizationCode, GrantType::RefreshToken]
        );
        assert_eq!(config.token.access_token_lifetime, Duration::from_secs(900));
        assert!(config.validate().is_ok());
    }
}
