//! OAuth 2.0 / OpenID Connect protocol flows.
//!
//! - [`token`] - Token endpoint request/response types and validation
//! - [`grants`] - Grant dispatcher for the token endpoint
//! - [`pkce`] - PKCE challenge verification (RFC 7636)
//! - [`end_session`] - RP-initiated logout coordinator
//!
//! # Example
//!
//! ```ignore
//! use gatehouse_auth::oauth::{GrantDispatcher, TokenRequest};
//!
//! let dispatcher = GrantDispatcher::new(grants, users, signer, config.token, issuer);
//! let response = dispatcher.dispatch(&request, client.as_ref(), &ctx).await?;
//! ```

pub mod end_session;
pub mod grants;
pub mod pkce;
pub mod token;

pub use end_session::{
    CallerIdentity, EndSessionCoordinator, EndSessionParams, EndSessionResponse,
    ExternalLogoutHook, LogoutPage, append_query_param,
};
pub use grants::{AuthenticationFilter, GrantDispatcher, RptIssuer};
pub use pkce::{PkceChallengeMethod, PkceError};
pub use token::{
    RequestedGrant, TokenError, TokenRequest, TokenResponse, UMA_TICKET_GRANT_TYPE,
    validate_request,
};
