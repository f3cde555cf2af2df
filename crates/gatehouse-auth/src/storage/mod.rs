//! Store adapter traits.
//!
//! The protocol core never talks to a backend directly. It goes through:
//!
//! - [`SessionStore`] - TTL-aware put/get/remove of sessions
//! - [`GrantStore`] - token records keyed by token digest
//! - [`ClientStore`] - client registrations
//! - [`UserAuthenticator`] - resource-owner credential checks
//!
//! Adapters report failures as [`StoreError`] so the engine can tell
//! conflicts (retried) from everything else (propagated).
//!
//! In-memory implementations live in [`memory`].

pub mod memory;

use async_trait::async_trait;
use std::time::Duration;

use crate::AuthResult;
use crate::error::StoreError;
use crate::session::Session;
use crate::types::{Client, ResourceOwner, TokenRecord};

/// Result type for store adapters.
pub type StoreResult<T> = Result<T, StoreError>;

/// Session cache.
///
/// # Implementation Notes
///
/// - `put` with `ttl = None` keeps the entry until removed.
/// - A concurrent modification of the same entry must be reported as
///   [`StoreErrorKind::Conflict`](crate::error::StoreErrorKind::Conflict).
/// - Expired entries must not be returned by `get`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Writes the session, replacing any existing entry.
    async fn put(&self, session: &Session, ttl: Option<Duration>) -> StoreResult<()>;

    /// Reads a session by id.
    async fn get(&self, id: &str) -> StoreResult<Option<Session>>;

    /// Deletes a session. Returns `true` if an entry was removed.
    async fn remove(&self, id: &str) -> StoreResult<bool>;
}

/// Grant and token records.
///
/// Records are addressed by the SHA-256 digest of the token value.
///
/// # Security Considerations
///
/// - `remove_by_code` must be an atomic compare-and-delete: when two callers
///   race on the same record, exactly one sees `true`.
/// - Never log token values.
#[async_trait]
pub trait GrantStore: Send + Sync {
    /// Stores a token record.
    async fn put(&self, record: &TokenRecord) -> StoreResult<()>;

    /// Looks up a record by token digest.
    async fn find(&self, token_hash: &str) -> StoreResult<Option<TokenRecord>>;

    /// Deletes the record for `token_hash` if it belongs to `client_id`.
    /// Returns `true` only for the caller that actually removed it.
    async fn remove_by_code(&self, token_hash: &str, client_id: &str) -> StoreResult<bool>;

    /// Deletes the authorization code record and every token minted from it.
    async fn remove_all_by_authorization_code(&self, code_hash: &str) -> StoreResult<u64>;

    /// Deletes every token bound to a session.
    async fn remove_all_by_session(&self, session_id: &str) -> StoreResult<u64>;
}

/// Client registrations.
#[async_trait]
pub trait ClientStore: Send + Sync {
    /// Finds an active or inactive client by id.
    async fn find_by_client_id(&self, client_id: &str) -> AuthResult<Option<Client>>;

    /// Verifies a client secret against the stored hash.
    async fn verify_secret(&self, client_id: &str, secret: &str) -> AuthResult<bool>;
}

/// Resource-owner credential verification.
#[async_trait]
pub trait UserAuthenticator: Send + Sync {
    /// Returns the user when the credentials are valid.
    async fn authenticate(&self, username: &str, password: &str)
    -> AuthResult<Option<ResourceOwner>>;
}
