//! Token signing.

pub mod jwt;

pub use jwt::{IdTokenClaims, JwtSigner, TokenSigner};
