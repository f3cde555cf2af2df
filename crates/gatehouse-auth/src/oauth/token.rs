//! Token endpoint request, response and error types.
//!
//! # Supported Grant Types
//!
//! - `authorization_code` - Exchange authorization code for tokens
//! - `refresh_token` - Refresh an access token
//! - `client_credentials` - Machine-to-machine authentication
//! - `password` - Resource owner password credentials
//!
//! A request carrying an UMA `ticket` (or the UMA grant type) is handed to
//! the configured RPT issuer instead.

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};
use crate::types::GrantType;

/// UMA 2.0 grant type URN.
pub const UMA_TICKET_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:uma-ticket";

/// Token request parameters.
///
/// Different fields are required depending on the `grant_type`:
///
/// - `authorization_code`: code, (optional) code_verifier
/// - `refresh_token`: refresh_token, (optional) scope
/// - `client_credentials`: (optional) scope
/// - `password`: username, password, (optional) scope
///
/// Client credentials may also arrive in the `Authorization` header; that is
/// resolved by the HTTP layer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    /// OAuth 2.0 grant type.
    #[serde(default)]
    pub grant_type: String,

    /// Authorization code (for authorization_code grant).
    #[serde(default)]
    pub code: Option<String>,

    /// Redirect URI used in the authorization request.
    #[serde(default)]
    pub redirect_uri: Option<String>,

    /// PKCE code verifier (for authorization_code grant).
    #[serde(default)]
    pub code_verifier: Option<String>,

    /// Client ID (for public clients or client_secret_post).
    #[serde(default)]
    pub client_id: Option<String>,

    /// Client secret (for client_secret_post authentication).
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Refresh token (for refresh_token grant).
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Requested scope. Never widens what the grant authorized.
    #[serde(default)]
    pub scope: Option<String>,

    /// Username (for password grant).
    #[serde(default)]
    pub username: Option<String>,

    /// Password (for password grant).
    #[serde(default)]
    pub password: Option<String>,

    /// Assertion for assertion-based grants.
    #[serde(default)]
    pub assertion: Option<String>,

    /// UMA permission ticket.
    #[serde(default)]
    pub ticket: Option<String>,

    /// UMA claim token.
    #[serde(default)]
    pub claim_token: Option<String>,

    /// UMA claim token format.
    #[serde(default)]
    pub claim_token_format: Option<String>,

    /// UMA persisted claims token.
    #[serde(default)]
    pub pct: Option<String>,

    /// Previously issued RPT to upgrade.
    #[serde(default)]
    pub rpt: Option<String>,
}

impl TokenRequest {
    /// Creates a request for `grant_type` with every other field empty.
    #[must_use]
    pub fn new(grant_type: impl Into<String>) -> Self {
        Self {
            grant_type: grant_type.into(),
            ..Self::default()
        }
    }

    /// Returns `true` when the request targets the UMA RPT flow.
    #[must_use]
    pub fn is_uma(&self) -> bool {
        self.grant_type == UMA_TICKET_GRANT_TYPE || non_blank(&self.ticket).is_some()
    }
}

/// What a structurally valid token request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedGrant {
    /// One of the core OAuth 2.0 grants.
    Standard(GrantType),
    /// UMA ticket exchange for an RPT.
    UmaTicket,
}

/// Checks that the parameters required by the grant type are present.
///
/// # Errors
///
/// - `InvalidRequest` for a blank grant type or a missing required parameter
/// - `UnsupportedGrantType` for grant types this server does not know
pub fn validate_request(request: &TokenRequest) -> AuthResult<RequestedGrant> {
    if request.is_uma() {
        if non_blank(&request.ticket).is_none() {
            return Err(AuthError::invalid_request("ticket is required"));
        }
        return Ok(RequestedGrant::UmaTicket);
    }

    let grant_type = request.grant_type.trim();
    if grant_type.is_empty() {
        return Err(AuthError::invalid_request("grant_type is required"));
    }
    let grant_type: GrantType = grant_type.parse()?;

    let missing = match grant_type {
        GrantType::AuthorizationCode => non_blank(&request.code).is_none().then_some("code"),
        GrantType::RefreshToken => non_blank(&request.refresh_token)
            .is_none()
            .then_some("refresh_token"),
        GrantType::Password => {
            if non_blank(&request.username).is_none() {
                Some("username")
            } else if request.password.is_none() {
                Some("password")
            } else {
                None
            }
        }
        GrantType::ClientCredentials => None,
    };

    match missing {
        Some(param) => Err(AuthError::invalid_request(format!(
            "{param} is required for {grant_type}"
        ))),
        None => Ok(RequestedGrant::Standard(grant_type)),
    }
}

pub(crate) fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

// =============================================================================
// Responses
// =============================================================================

/// Successful token response.
///
/// # Example Response
///
/// ```json
/// {
///   "access_token": "SlAV32hkKG",
///   "token_type": "Bearer",
///   "expires_in": 3600,
///   "refresh_token": "8xLOxBtZp8",
///   "scope": "openid profile",
///   "id_token": "eyJhbG..."
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// The access token.
    pub access_token: String,

    /// Token type, always "Bearer".
    pub token_type: String,

    /// Access token lifetime in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,

    /// Refresh token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Granted scopes (space-separated).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// ID token (if openid scope was granted).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl TokenResponse {
    /// Creates a bearer token response.
    #[must_use]
    pub fn bearer(access_token: String) -> Self {
        Self {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: None,
            refresh_token: None,
            scope: None,
            id_token: None,
        }
    }

    /// Sets the lifetime in seconds.
    #[must_use]
    pub fn with_expires_in(mut self, seconds: u64) -> Self {
        self.expires_in = Some(seconds);
        self
    }

    /// Adds a refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, token: String) -> Self {
        self.refresh_token = Some(token);
        self
    }

    /// Sets the granted scope. Empty scope strings are omitted.
    #[must_use]
    pub fn with_scope(mut self, scope: String) -> Self {
        self.scope = (!scope.is_empty()).then_some(scope);
        self
    }

    /// Adds an ID token.
    #[must_use]
    pub fn with_id_token(mut self, token: String) -> Self {
        self.id_token = Some(token);
        self
    }
}

/// OAuth 2.0 error response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenError {
    /// OAuth 2.0 error code.
    pub error: String,

    /// Human-readable error description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl From<&AuthError> for TokenError {
    fn from(err: &AuthError) -> Self {
        Self {
            error: err.oauth_error_code().to_string(),
            error_description: err.public_description(),
        }
    }
}
