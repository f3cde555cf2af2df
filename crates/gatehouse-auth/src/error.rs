//! Error types for the session engine, grant dispatcher and end-session flow.
//!
//! Every failure the protocol core can report maps to one [`AuthError`]
//! variant. Store adapters report [`StoreError`] with a closed set of kinds so
//! retry decisions never depend on a particular backend.

use std::fmt;

/// HTTP 400.
pub const STATUS_BAD_REQUEST: u16 = 400;
/// HTTP 401.
pub const STATUS_UNAUTHORIZED: u16 = 401;

/// Errors that can occur while serving sessions, grants and logout.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Malformed or missing request parameters.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of why the request is invalid.
        message: String,
    },

    /// The authorization grant is unknown, consumed, bound to another client,
    /// or failed PKCE verification.
    #[error("Invalid grant: {message}")]
    InvalidGrant {
        /// Description of why the grant is invalid.
        message: String,
        /// Either 400 or 401, chosen by the grant flow that raised it.
        status: u16,
    },

    /// The client or resource owner could not be authenticated.
    #[error("Invalid client: {message}")]
    InvalidClient {
        /// Description of why the client is invalid.
        message: String,
    },

    /// The requested grant type is not known to the server.
    #[error("Unsupported grant type: {grant_type}")]
    UnsupportedGrantType {
        /// The unsupported grant type.
        grant_type: String,
    },

    /// End-session could resolve neither a grant nor a session.
    #[error("Invalid grant and session: {message}")]
    InvalidGrantAndSession {
        /// Description of the failed resolution.
        message: String,
    },

    /// The post-logout redirect URI is not registered for the client.
    #[error("Post logout URI not associated with client: {uri}")]
    PostLogoutUriNotAssociated {
        /// The rejected URI.
        uri: String,
    },

    /// The requested ACR demands a stronger authentication than the session
    /// carries. Callers restart the login flow.
    #[error("ACR changed from {session_acr} to {requested_acr}")]
    AcrChanged {
        /// ACR recorded in the session.
        session_acr: String,
        /// ACR requested by the client.
        requested_acr: String,
    },

    /// A store adapter failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Producing a signed token failed.
    #[error("Signing error: {message}")]
    Signing {
        /// Description of the signing failure.
        message: String,
    },

    /// The configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidGrant` error answered with 400.
    #[must_use]
    pub fn invalid_grant(message: impl Into<String>) -> Self {
        Self::InvalidGrant {
            message: message.into(),
            status: STATUS_BAD_REQUEST,
        }
    }

    /// Creates a new `InvalidGrant` error answered with 401.
    #[must_use]
    pub fn invalid_grant_unauthorized(message: impl Into<String>) -> Self {
        Self::InvalidGrant {
            message: message.into(),
            status: STATUS_UNAUTHORIZED,
        }
    }

    /// Creates a new `InvalidClient` error.
    #[must_use]
    pub fn invalid_client(message: impl Into<String>) -> Self {
        Self::InvalidClient {
            message: message.into(),
        }
    }

    /// Creates a new `UnsupportedGrantType` error.
    #[must_use]
    pub fn unsupported_grant_type(grant_type: impl Into<String>) -> Self {
        Self::UnsupportedGrantType {
            grant_type: grant_type.into(),
        }
    }

    /// Creates a new `InvalidGrantAndSession` error.
    #[must_use]
    pub fn invalid_grant_and_session(message: impl Into<String>) -> Self {
        Self::InvalidGrantAndSession {
            message: message.into(),
        }
    }

    /// Creates a new `PostLogoutUriNotAssociated` error.
    #[must_use]
    pub fn post_logout_uri_not_associated(uri: impl Into<String>) -> Self {
        Self::PostLogoutUriNotAssociated { uri: uri.into() }
    }

    /// Creates a new `AcrChanged` signal.
    #[must_use]
    pub fn acr_changed(session_acr: impl Into<String>, requested_acr: impl Into<String>) -> Self {
        Self::AcrChanged {
            session_acr: session_acr.into(),
            requested_acr: requested_acr.into(),
        }
    }

    /// Creates a new `Signing` error.
    #[must_use]
    pub fn signing(message: impl Into<String>) -> Self {
        Self::Signing {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a client error (4xx category).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest { .. }
                | Self::InvalidGrant { .. }
                | Self::InvalidClient { .. }
                | Self::UnsupportedGrantType { .. }
                | Self::InvalidGrantAndSession { .. }
                | Self::PostLogoutUriNotAssociated { .. }
                | Self::AcrChanged { .. }
        )
    }

    /// Returns `true` if this is a server error (5xx category).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// HTTP status used when this error is rendered as a response.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidGrant { status, .. } => *status,
            Self::InvalidClient { .. } | Self::InvalidGrantAndSession { .. } => {
                STATUS_UNAUTHORIZED
            }
            Self::InvalidRequest { .. }
            | Self::UnsupportedGrantType { .. }
            | Self::PostLogoutUriNotAssociated { .. }
            | Self::AcrChanged { .. } => STATUS_BAD_REQUEST,
            Self::Store(_)
            | Self::Signing { .. }
            | Self::Configuration { .. }
            | Self::Internal { .. } => 500,
        }
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidRequest { .. } | Self::UnsupportedGrantType { .. } => {
                ErrorCategory::Validation
            }
            Self::InvalidGrant { .. }
            | Self::InvalidGrantAndSession { .. }
            | Self::PostLogoutUriNotAssociated { .. } => ErrorCategory::GrantState,
            Self::InvalidClient { .. } => ErrorCategory::Authentication,
            Self::AcrChanged { .. } => ErrorCategory::StepUp,
            Self::Store(_) => ErrorCategory::Infrastructure,
            Self::Signing { .. } | Self::Internal { .. } => ErrorCategory::Internal,
            Self::Configuration { .. } => ErrorCategory::Configuration,
        }
    }

    /// Returns the OAuth 2.0 error code for this error.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request",
            Self::InvalidGrant { .. } => "invalid_grant",
            Self::InvalidClient { .. } => "invalid_client",
            Self::UnsupportedGrantType { .. } => "unsupported_grant_type",
            Self::InvalidGrantAndSession { .. } => "invalid_grant_and_session",
            Self::PostLogoutUriNotAssociated { .. } => {
                "post_logout_uri_not_associated_with_client"
            }
            Self::AcrChanged { .. } => "acr_changed",
            Self::Store(_)
            | Self::Signing { .. }
            | Self::Configuration { .. }
            | Self::Internal { .. } => "server_error",
        }
    }

    /// Description safe to put on the wire. Server errors never leak detail.
    #[must_use]
    pub fn public_description(&self) -> Option<String> {
        if self.is_server_error() {
            None
        } else {
            Some(self.to_string())
        }
    }
}

/// Result type for protocol-core operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Categories of errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed input.
    Validation,
    /// Unknown, consumed or mismatched grants and sessions.
    GrantState,
    /// Client or user authentication failures.
    Authentication,
    /// Step-up restart signal.
    StepUp,
    /// Store failures.
    Infrastructure,
    /// Configuration errors.
    Configuration,
    /// Internal server errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::GrantState => write!(f, "grant_state"),
            Self::Authentication => write!(f, "authentication"),
            Self::StepUp => write!(f, "step_up"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

// =============================================================================
// Store errors
// =============================================================================

/// Closed classification of store adapter failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreErrorKind {
    /// The entry does not exist.
    NotFound,
    /// Stale or duplicate write. The only retryable kind.
    Conflict,
    /// The backend cannot be reached.
    Unavailable,
    /// Anything else.
    Other,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::Conflict => write!(f, "conflict"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Error reported by a store adapter.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Store error ({kind}): {message}")]
pub struct StoreError {
    /// Classification used for retry decisions.
    pub kind: StoreErrorKind,
    /// Backend-specific detail.
    pub message: String,
}

impl StoreError {
    /// Creates a store error of the given kind.
    #[must_use]
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a `NotFound` store error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::NotFound, message)
    }

    /// Creates a `Conflict` store error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Conflict, message)
    }

    /// Creates an `Unavailable` store error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Unavailable, message)
    }

    /// Creates an `Other` store error.
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Other, message)
    }

    /// Returns `true` for conflict-class failures.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.kind == StoreErrorKind::Conflict
    }
}
