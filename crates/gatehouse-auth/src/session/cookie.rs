//! Session cookies.
//!
//! The cookie value is the session id. `Secure` and `Path=/` are always set,
//! `HttpOnly` follows configuration, and `Expires` is now plus the absolute
//! session lifetime.

use axum::http::HeaderMap;
use axum::http::header::COOKIE;
use cookie::Cookie;
use time::OffsetDateTime;

use crate::config::{CookieConfig, SessionConfig};

/// Cookie carrying the OP session id.
pub const SESSION_STATE_COOKIE: &str = "session_state";
/// Cookie carrying the UMA claims-gathering session id.
pub const UMA_SESSION_STATE_COOKIE: &str = "uma_session_state";

/// Builds a `Set-Cookie` value for `session_id`.
#[must_use]
pub fn session_cookie(
    name: &str,
    session_id: &str,
    cookie: &CookieConfig,
    session: &SessionConfig,
    now: OffsetDateTime,
) -> String {
    Cookie::build((name.to_string(), session_id.to_string()))
        .path("/")
        .secure(true)
        .http_only(cookie.http_only)
        .expires(now + session.session_lifetime)
        .build()
        .to_string()
}

/// Builds a `Set-Cookie` value that deletes `name`.
#[must_use]
pub fn removal_cookie(name: &str) -> String {
    Cookie::build((name.to_string(), String::new()))
        .path("/")
        .secure(true)
        .max_age(time::Duration::ZERO)
        .build()
        .to_string()
}

/// Reads a cookie value from request headers. Empty values count as absent.
#[must_use]
pub fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|c| c.name() == name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}
