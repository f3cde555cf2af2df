//! Grants and the token records minted from them.
//!
//! A grant is the server-side authorization a client holds. Every token the
//! dispatcher mints (authorization code, access, refresh, ID) is persisted as a
//! [`TokenRecord`] carrying a snapshot of its grant. Only the SHA-256 digest of
//! the token value is kept.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use time::OffsetDateTime;

use super::client::GrantType;

/// Scope value that triggers ID token issuance.
pub const OPENID_SCOPE: &str = "openid";

/// An authenticated end-user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceOwner {
    /// Stable user identifier, used as `sub`.
    pub id: String,
    /// Login name.
    pub username: String,
    /// Additional claims released into ID tokens in legacy mode.
    #[serde(default)]
    pub claims: BTreeMap<String, serde_json::Value>,
}

impl ResourceOwner {
    /// Creates a resource owner without extra claims.
    #[must_use]
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            claims: BTreeMap::new(),
        }
    }
}

/// Server-side authorization bound to exactly one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationGrant {
    /// Grant identifier shared by all tokens minted from it.
    pub grant_id: String,
    /// How the grant was obtained.
    pub grant_type: GrantType,
    /// Owning client.
    pub client_id: String,
    /// End-user, absent for client credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<ResourceOwner>,
    /// Authorized scopes.
    #[serde(default)]
    pub scopes: BTreeSet<String>,
    /// OIDC nonce from the authorization request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// PKCE code challenge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    /// PKCE code challenge method (`S256` or `plain`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,
    /// Session the grant was issued under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Authorization code the grant was redeemed from. Links every token back
    /// to its code for replay purging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_code: Option<String>,
    /// End-user authentication time.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub auth_time: Option<OffsetDateTime>,
    /// ACR the end-user authenticated with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acr: Option<String>,
}

impl AuthorizationGrant {
    /// Creates a grant with a fresh identifier.
    #[must_use]
    pub fn new(grant_type: GrantType, client_id: impl Into<String>) -> Self {
        Self {
            grant_id: uuid::Uuid::new_v4().to_string(),
            grant_type,
            client_id: client_id.into(),
            user: None,
            scopes: BTreeSet::new(),
            nonce: None,
            code_challenge: None,
            code_challenge_method: None,
            session_id: None,
            authorization_code: None,
            auth_time: None,
            acr: None,
        }
    }

    /// Sets the end-user.
    #[must_use]
    pub fn with_user(mut self, user: ResourceOwner) -> Self {
        self.user = Some(user);
        self
    }

    /// Sets the authorized scopes.
    #[must_use]
    pub fn with_scopes<S: Into<String>>(mut self, scopes: impl IntoIterator<Item = S>) -> Self {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the PKCE challenge and method.
    #[must_use]
    pub fn with_code_challenge(
        mut self,
        challenge: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        self.code_challenge = Some(challenge.into());
        self.code_challenge_method = Some(method.into());
        self
    }

    /// Binds the grant to a session.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Sets the OIDC nonce.
    #[must_use]
    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    /// Returns `true` when `openid` was authorized.
    #[must_use]
    pub fn is_openid(&self) -> bool {
        self.scopes.contains(OPENID_SCOPE)
    }

    /// Space-delimited scope string.
    #[must_use]
    pub fn scope_string(&self) -> String {
        join_scopes(&self.scopes)
    }

    /// Username of the end-user, if any.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.username.as_str())
    }
}

/// Kind of a minted token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Single-use authorization code.
    AuthorizationCode,
    /// Bearer access token.
    AccessToken,
    /// Refresh token.
    RefreshToken,
    /// OIDC ID token.
    IdToken,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AuthorizationCode => "authorization_code",
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
            Self::IdToken => "id_token",
        };
        f.write_str(s)
    }
}

/// Persisted token, keyed by the SHA-256 digest of its value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// SHA-256 digest of the token value (hex).
    pub token_hash: String,
    /// Token kind.
    pub kind: TokenKind,
    /// Grant the token was minted from.
    pub grant: AuthorizationGrant,
    /// Scopes this particular token carries.
    #[serde(default)]
    pub scopes: BTreeSet<String>,
    /// When the token was minted.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the token stops being valid.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl TokenRecord {
    /// Creates a record for a plaintext token value.
    #[must_use]
    pub fn new(
        token: &str,
        kind: TokenKind,
        grant: AuthorizationGrant,
        created_at: OffsetDateTime,
        lifetime: std::time::Duration,
    ) -> Self {
        let scopes = grant.scopes.clone();
        Self {
            token_hash: hash_token(token),
            kind,
            grant,
            scopes,
            created_at,
            expires_at: created_at + lifetime,
        }
    }

    /// Overrides the token's scope set.
    #[must_use]
    pub fn with_scopes(mut self, scopes: BTreeSet<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Returns `true` once `now` is past the expiry.
    #[must_use]
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now >= self.expires_at
    }

    /// Returns `true` for an unexpired token of `kind` issued to `client_id`.
    #[must_use]
    pub fn is_live_for(&self, kind: TokenKind, client_id: &str, now: OffsetDateTime) -> bool {
        self.kind == kind && self.grant.client_id == client_id && !self.is_expired(now)
    }
}

/// Hash a token value using SHA-256.
#[must_use]
pub fn hash_token(token: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a cryptographically secure random token.
///
/// Returns a 256-bit random value encoded as base64url (43 characters).
#[must_use]
pub fn generate_token() -> String {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    let mut bytes = [0u8; 32];
    rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Splits a space-delimited scope parameter. Blank entries are dropped.
#[must_use]
pub fn parse_scopes(scope: &str) -> BTreeSet<String> {
    scope.split_whitespace().map(str::to_string).collect()
}

/// Joins scopes with single spaces.
#[must_use]
pub fn join_scopes(scopes: &BTreeSet<String>) -> String {
    scopes.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
}
