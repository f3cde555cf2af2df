//! OAuth 2.0 client registrations.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::AuthError;

// =============================================================================
// Grant Type
// =============================================================================

/// OAuth 2.0 grant types accepted at the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// Authorization Code flow.
    AuthorizationCode,
    /// Refresh Token flow.
    RefreshToken,
    /// Client Credentials flow.
    ClientCredentials,
    /// Resource Owner Password Credentials flow.
    Password,
}

impl GrantType {
    /// Returns the OAuth 2.0 grant_type parameter value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::RefreshToken => "refresh_token",
            Self::ClientCredentials => "client_credentials",
            Self::Password => "password",
        }
    }
}

impl std::fmt::Display for GrantType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GrantType {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorization_code" => Ok(Self::AuthorizationCode),
            "refresh_token" => Ok(Self::RefreshToken),
            "client_credentials" => Ok(Self::ClientCredentials),
            "password" => Ok(Self::Password),
            other => Err(AuthError::unsupported_grant_type(other)),
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// A registered relying party.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    /// Unique client identifier used in OAuth flows.
    pub client_id: String,

    /// Argon2 hash of the client secret. `None` for public clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Human-readable display name.
    #[serde(default)]
    pub name: String,

    /// Grant types this client may use.
    #[serde(default)]
    pub grant_types: Vec<GrantType>,

    /// Scopes this client may request. Empty means unrestricted.
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Registered redirect URIs.
    #[serde(default)]
    pub redirect_uris: Vec<String>,

    /// Registered post-logout redirect URIs.
    #[serde(default)]
    pub post_logout_redirect_uris: Vec<String>,

    /// Front-channel logout URIs loaded in hidden frames on logout.
    #[serde(default)]
    pub frontchannel_logout_uris: Vec<String>,

    /// Append `sid=<session id>` to front-channel logout URIs.
    #[serde(default)]
    pub frontchannel_logout_session_required: bool,

    /// Whether this client is currently active.
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Client {
    /// Creates an active public client with no grants.
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            name: String::new(),
            grant_types: Vec::new(),
            scopes: Vec::new(),
            redirect_uris: Vec::new(),
            post_logout_redirect_uris: Vec::new(),
            frontchannel_logout_uris: Vec::new(),
            frontchannel_logout_session_required: false,
            active: true,
        }
    }

    /// Sets the allowed grant types.
    #[must_use]
    pub fn with_grant_types(mut self, grant_types: impl IntoIterator<Item = GrantType>) -> Self {
        self.grant_types = grant_types.into_iter().collect();
        self
    }

    /// Sets the allowed scopes.
    #[must_use]
    pub fn with_scopes<S: Into<String>>(mut self, scopes: impl IntoIterator<Item = S>) -> Self {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a front-channel logout URI.
    #[must_use]
    pub fn with_frontchannel_logout_uri(mut self, uri: impl Into<String>) -> Self {
        self.frontchannel_logout_uris.push(uri.into());
        self
    }

    /// Requires `sid` propagation on front-channel logout.
    #[must_use]
    pub fn with_session_required(mut self, required: bool) -> Self {
        self.frontchannel_logout_session_required = required;
        self
    }

    /// Adds a post-logout redirect URI.
    #[must_use]
    pub fn with_post_logout_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.post_logout_redirect_uris.push(uri.into());
        self
    }

    /// Returns `true` when the client is allowed to use `grant_type`.
    #[must_use]
    pub fn supports_grant(&self, grant_type: GrantType) -> bool {
        self.grant_types.contains(&grant_type)
    }

    /// Returns `true` for clients registered with a secret.
    #[must_use]
    pub fn is_confidential(&self) -> bool {
        self.client_secret.is_some()
    }

    /// Checks if the given post-logout redirect URI is registered.
    ///
    /// The comparison ignores query parameters on both sides.
    #[must_use]
    pub fn is_post_logout_redirect_uri_allowed(&self, uri: &str) -> bool {
        let uri_without_query = uri.split('?').next().unwrap_or(uri);

        self.post_logout_redirect_uris.iter().any(|allowed| {
            let allowed_without_query = allowed.split('?').next().unwrap_or(allowed);
            allowed_without_query == uri_without_query
        })
    }

    /// Checks if the given scope is allowed for this client.
    ///
    /// An empty scopes list means all scopes are allowed.
    #[must_use]
    pub fn is_scope_allowed(&self, scope: &str) -> bool {
        self.scopes.is_empty() || self.scopes.iter().any(|allowed| allowed == scope)
    }
}
