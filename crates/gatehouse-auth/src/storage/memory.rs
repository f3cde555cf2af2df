//! In-memory store adapters backed by `DashMap`.
//!
//! Suitable for single-node deployments and tests. Nothing survives a restart.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

use super::{ClientStore, GrantStore, SessionStore, StoreResult, UserAuthenticator};
use crate::clock::{Clock, SystemClock};
use crate::credentials;
use crate::error::AuthError;
use crate::session::Session;
use crate::types::{Client, ResourceOwner, TokenRecord};
use crate::AuthResult;

// =============================================================================
// Sessions
// =============================================================================

#[derive(Debug, Clone)]
struct SessionEntry {
    session: Session,
    expires_at: Option<OffsetDateTime>,
}

/// Session cache honoring per-entry TTL. Expiry is checked on read.
pub struct MemorySessionStore {
    entries: DashMap<String, SessionEntry>,
    clock: Arc<dyn Clock>,
}

impl MemorySessionStore {
    /// Creates an empty store using the wall clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty store reading time from `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Number of entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn put(&self, session: &Session, ttl: Option<Duration>) -> StoreResult<()> {
        let expires_at = ttl.map(|ttl| self.clock.now() + ttl);
        self.entries.insert(
            session.id.clone(),
            SessionEntry {
                session: session.clone(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Session>> {
        let now = self.clock.now();
        let expired = match self.entries.get(id) {
            None => return Ok(None),
            Some(entry) => match entry.expires_at {
                Some(at) if now >= at => true,
                _ => {
                    let mut session = entry.session.clone();
                    session.persisted = true;
                    return Ok(Some(session));
                }
            },
        };
        if expired {
            self.entries.remove(id);
        }
        Ok(None)
    }

    async fn remove(&self, id: &str) -> StoreResult<bool> {
        Ok(self.entries.remove(id).is_some())
    }
}

// =============================================================================
// Grants
// =============================================================================

/// Token records keyed by digest.
#[derive(Default)]
pub struct MemoryGrantStore {
    records: DashMap<String, TokenRecord>,
}

impl MemoryGrantStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` when the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl GrantStore for MemoryGrantStore {
    async fn put(&self, record: &TokenRecord) -> StoreResult<()> {
        self.records
            .insert(record.token_hash.clone(), record.clone());
        Ok(())
    }

    async fn find(&self, token_hash: &str) -> StoreResult<Option<TokenRecord>> {
        Ok(self.records.get(token_hash).map(|r| r.value().clone()))
    }

    async fn remove_by_code(&self, token_hash: &str, client_id: &str) -> StoreResult<bool> {
        Ok(self
            .records
            .remove_if(token_hash, |_, record| record.grant.client_id == client_id)
            .is_some())
    }

    async fn remove_all_by_authorization_code(&self, code_hash: &str) -> StoreResult<u64> {
        let before = self.records.len();
        self.records.retain(|key, record| {
            key != code_hash && record.grant.authorization_code.as_deref() != Some(code_hash)
        });
        Ok(before.saturating_sub(self.records.len()) as u64)
    }

    async fn remove_all_by_session(&self, session_id: &str) -> StoreResult<u64> {
        let before = self.records.len();
        self.records
            .retain(|_, record| record.grant.session_id.as_deref() != Some(session_id));
        Ok(before.saturating_sub(self.records.len()) as u64)
    }
}

// =============================================================================
// Clients
// =============================================================================

/// Client registrations held in memory.
#[derive(Default)]
pub struct MemoryClientStore {
    clients: DashMap<String, Client>,
}

impl MemoryClientStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a client.
    pub fn insert(&self, client: Client) {
        self.clients.insert(client.client_id.clone(), client);
    }
}

impl FromIterator<Client> for MemoryClientStore {
    fn from_iter<T: IntoIterator<Item = Client>>(iter: T) -> Self {
        let store = Self::new();
        for client in iter {
            store.insert(client);
        }
        store
    }
}

#[async_trait]
impl ClientStore for MemoryClientStore {
    async fn find_by_client_id(&self, client_id: &str) -> AuthResult<Option<Client>> {
        Ok(self.clients.get(client_id).map(|c| c.value().clone()))
    }

    async fn verify_secret(&self, client_id: &str, secret: &str) -> AuthResult<bool> {
        let Some(hash) = self
            .clients
            .get(client_id)
            .and_then(|c| c.client_secret.clone())
        else {
            return Ok(false);
        };
        credentials::verify_secret(secret, &hash)
            .map_err(|e| AuthError::internal(format!("stored client secret is malformed: {e}")))
    }
}

// =============================================================================
// Users
// =============================================================================

/// Resource owners with Argon2 password hashes.
#[derive(Default)]
pub struct MemoryUserStore {
    users: DashMap<String, (ResourceOwner, String)>,
}

impl MemoryUserStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a user with an Argon2 password hash.
    pub fn insert(&self, owner: ResourceOwner, password_hash: impl Into<String>) {
        self.users
            .insert(owner.username.clone(), (owner, password_hash.into()));
    }
}

#[async_trait]
impl UserAuthenticator for MemoryUserStore {
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> AuthResult<Option<ResourceOwner>> {
        let Some((owner, hash)) = self.users.get(username).map(|e| e.value().clone()) else {
            return Ok(None);
        };
        let valid = credentials::verify_secret(password, &hash)
            .map_err(|e| AuthError::internal(format!("stored password hash is malformed: {e}")))?;
        Ok(valid.then_some(owner))
    }
}
