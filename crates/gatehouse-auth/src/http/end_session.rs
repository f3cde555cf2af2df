//! End-session endpoint handlers.
//!
//! Both `GET` (query string) and `POST` (form body) are accepted, per
//! OpenID Connect RP-Initiated Logout 1.0. The confirmation page is HTML;
//! errors are JSON. Cookie removal headers are attached either way once the
//! request passed validation.

use axum::{
    Form,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use tracing::warn;

use super::{AuthState, error_response, no_store, request_context};
use crate::oauth::end_session::{EndSessionParams, EndSessionResponse};
use crate::session::{SESSION_STATE_COOKIE, extract_cookie};

/// Handler for `GET /end_session`.
pub async fn end_session_get_handler(
    State(state): State<AuthState>,
    headers: HeaderMap,
    Query(params): Query<EndSessionParams>,
) -> Response {
    end_session(&state, &headers, &params).await
}

/// Handler for `POST /end_session`.
pub async fn end_session_post_handler(
    State(state): State<AuthState>,
    headers: HeaderMap,
    Form(params): Form<EndSessionParams>,
) -> Response {
    end_session(&state, &headers, &params).await
}

async fn end_session(state: &AuthState, headers: &HeaderMap, params: &EndSessionParams) -> Response {
    let cookie = extract_cookie(headers, SESSION_STATE_COOKIE);
    let ctx = request_context(headers);

    let EndSessionResponse {
        set_cookies,
        outcome,
    } = state
        .end_session
        .end_session(params, cookie.as_deref(), &ctx)
        .await;

    let mut response = match outcome {
        Ok(page) => no_store((StatusCode::OK, Html(page.html)).into_response()),
        Err(e) => error_response(&e),
    };

    for cookie in set_cookies {
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => warn!(error = %e, "dropping malformed Set-Cookie value"),
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use crate::context::RequestContext;
    use crate::http::test_support::{app, body_json, body_text};
    use crate::session::{SessionAttributes, SessionState};
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_end_session_without_identifiers() {
        let app = app();
        let response = app
            .router
            .oneshot(
                Request::builder()
                    .uri("/end_session")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
        let json = body_json(response.into_body()).await;
        assert_eq!(json["error"], "invalid_request");
    }

    #[tokio::test]
    async fn test_end_session_unknown_cookie() {
        let app = app();
        let response = app
            .router
            .oneshot(
                Request::builder()
                    .uri("/end_session")
                    .header(header::COOKIE, "session_state=gone")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers().get_all(header::SET_COOKIE).iter().count(), 2);
        let json = body_json(response.into_body()).await;
        assert_eq!(json["error"], "invalid_grant_and_session");
    }

    #[tokio::test]
    async fn test_end_session_post_renders_page() {
        let app = app();
        let session = app
            .sessions
            .create(
                Some("alice"),
                SessionAttributes::new(),
                SessionState::Authenticated,
                true,
                &RequestContext::default(),
            )
            .await
            .unwrap();

        let response = app
            .router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/end_session")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from(format!("session_state={}", session.id)))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
        assert_eq!(response.headers().get_all(header::SET_COOKIE).iter().count(), 2);
        let html = body_text(response.into_body()).await;
        assert!(html.contains("You have been logged out."));
        assert!(app.sessions.resolve_session(Some(&session.id)).await.is_none());
    }
}
