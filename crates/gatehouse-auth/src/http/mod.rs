//! Axum handlers for the token, end-session and session-status endpoints.
//!
//! # Available Handlers
//!
//! - [`token_handler`] - `POST /token`
//! - [`end_session_get_handler`] / [`end_session_post_handler`] - `GET|POST /end_session`
//! - [`session_status_handler`] - `GET /session/status`
//!
//! Every response carries `Cache-Control: no-store` and `Pragma: no-cache`.

pub mod end_session;
pub mod session_status;
pub mod token;

pub use end_session::{end_session_get_handler, end_session_post_handler};
pub use session_status::{SessionStatus, session_status_handler};
pub use token::token_handler;

use axum::{
    Json, Router,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::AuthError;
use crate::oauth::token::TokenError;
use crate::oauth::{EndSessionCoordinator, GrantDispatcher};
use crate::session::SessionService;
use crate::storage::ClientStore;

/// Shared state for the protocol endpoints.
#[derive(Clone)]
pub struct AuthState {
    /// Token endpoint core.
    pub dispatcher: Arc<GrantDispatcher>,
    /// End-session core.
    pub end_session: Arc<EndSessionCoordinator>,
    /// Session engine.
    pub sessions: Arc<SessionService>,
    /// Client registrations for client authentication.
    pub clients: Arc<dyn ClientStore>,
}

/// Routes for the protocol endpoints, without any middleware.
pub fn router(state: AuthState) -> Router {
    Router::new()
        .route("/token", post(token_handler))
        .route(
            "/end_session",
            get(end_session_get_handler).post(end_session_post_handler),
        )
        .route("/session/status", get(session_status_handler))
        .with_state(state)
}

/// Builds the request context from headers. The client address is the first
/// `X-Forwarded-For` hop.
#[must_use]
pub fn request_context(headers: &HeaderMap) -> RequestContext {
    let ip_address = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    RequestContext { ip_address }
}

pub(crate) fn no_store(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

/// Renders an error as an OAuth 2.0 JSON error body.
pub(crate) fn error_response(error: &AuthError) -> Response {
    if error.is_server_error() {
        tracing::error!(error = %error, category = %error.category(), "request failed");
    }
    let status =
        StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    no_store((status, Json(TokenError::from(error))).into_response())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_context_from_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(
            request_context(&headers).ip_address.as_deref(),
            Some("203.0.113.7")
        );
        assert!(request_context(&HeaderMap::new()).ip_address.is_none());
    }

    #[test]
    fn test_error_response_status_and_headers() {
        let response = error_response(&AuthError::invalid_grant_unauthorized("bad verifier"));
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
        assert_eq!(response.headers()[header::PRAGMA], "no-cache");

        let response = error_response(&AuthError::internal("boom"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
