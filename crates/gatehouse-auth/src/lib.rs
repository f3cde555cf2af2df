//! # gatehouse-auth
//!
//! OAuth 2.0 / OpenID Connect protocol core for the Gatehouse authorization
//! server.
//!
//! This crate provides:
//! - Browser session engine with step-up authentication and idle expiry
//! - Token endpoint grant dispatcher (authorization code, refresh token,
//!   client credentials, password, UMA ticket)
//! - RP-initiated logout with front-channel notification
//! - Audit logging for token and session events
//!
//! ## Modules
//!
//! - [`config`] - Protocol configuration
//! - [`session`] - Session model, cookies and the session service
//! - [`oauth`] - Grant dispatcher, PKCE and end-session coordinator
//! - [`token`] - JWT signing
//! - [`storage`] - Store adapter traits and in-memory adapters
//! - [`audit`] - Security event audit logging
//! - [`http`] - Axum HTTP handlers

pub mod audit;
pub mod clock;
pub mod config;
pub mod context;
pub mod credentials;
pub mod error;
pub mod http;
pub mod oauth;
pub mod session;
pub mod storage;
pub mod token;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{AuthConfig, ConfigError};
pub use context::RequestContext;
pub use error::{AuthError, AuthResult, ErrorCategory, StoreError, StoreErrorKind};
pub use http::{AuthState, router};
pub use oauth::{
    EndSessionCoordinator, EndSessionParams, GrantDispatcher, TokenRequest, TokenResponse,
};
pub use session::{Session, SessionService, SessionState};
pub use types::{AuthorizationGrant, Client, GrantType, ResourceOwner};
