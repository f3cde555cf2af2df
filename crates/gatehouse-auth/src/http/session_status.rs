//! Session status endpoint.
//!
//! Lets relying parties poll whether the browser still has a live session
//! without triggering a login.

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use super::{AuthState, no_store};
use crate::session::{SESSION_STATE_COOKIE, Session, extract_cookie};

/// `state` value reported when no live session exists.
pub const UNKNOWN_STATE: &str = "unknown";

/// Response body of `GET /session/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    /// `authenticated`, `unauthenticated` or `unknown`.
    pub state: String,
    /// Deployment-defined state, empty when unset.
    pub custom_state: String,
    /// Authentication time in seconds since the epoch.
    pub auth_time: Option<i64>,
}

impl SessionStatus {
    /// Status for a missing or expired session.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            state: UNKNOWN_STATE.to_string(),
            custom_state: String::new(),
            auth_time: None,
        }
    }
}

impl From<&Session> for SessionStatus {
    fn from(session: &Session) -> Self {
        Self {
            state: session.state.as_str().to_string(),
            custom_state: session
                .attributes
                .custom_state()
                .unwrap_or_default()
                .to_string(),
            auth_time: session.authentication_time.map(|t| t.unix_timestamp()),
        }
    }
}

/// Handler for `GET /session/status`.
pub async fn session_status_handler(
    State(state): State<AuthState>,
    headers: HeaderMap,
) -> Response {
    let cookie = extract_cookie(&headers, SESSION_STATE_COOKIE);
    let status = state
        .sessions
        .resolve_session(cookie.as_deref())
        .await
        .as_ref()
        .map_or_else(SessionStatus::unknown, SessionStatus::from);

    no_store((StatusCode::OK, Json(status)).into_response())
}
