//! Domain types shared by the grant dispatcher and end-session flow.

mod client;
mod grant;

pub use client::{Client, GrantType};
pub use grant::{
    AuthorizationGrant, OPENID_SCOPE, ResourceOwner, TokenKind, TokenRecord, generate_token,
    hash_token, join_scopes, parse_scopes,
};
