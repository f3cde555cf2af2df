//! Session engine.
//!
//! Owns the session lifecycle: creation, lookup with lazy idle expiry, step-up
//! reconciliation, and persistence with bounded retry on write conflicts.

use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

use super::acr::AcrLevelResolver;
use super::cookie::session_cookie;
use super::model::{Session, SessionAttributes, SessionState, allowed_parameters};
use crate::audit::{AuditAction, AuditEntry, AuditSink, TracingAuditSink};
use crate::clock::{Clock, SystemClock};
use crate::config::{CookieConfig, SessionConfig};
use crate::context::RequestContext;
use crate::error::{AuthError, AuthResult, StoreError, StoreErrorKind};
use crate::storage::SessionStore;
use crate::token::TokenSigner;

/// `lastUsedAt` is only bumped when it is older than this.
pub const LAST_USED_AT_DEBOUNCE: time::Duration = time::Duration::milliseconds(500);

/// Session engine.
pub struct SessionService {
    store: Arc<dyn SessionStore>,
    acr_levels: Arc<dyn AcrLevelResolver>,
    signer: Option<Arc<dyn TokenSigner>>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    cookie: CookieConfig,
}

impl SessionService {
    /// Creates an engine with the wall clock and tracing audit sink.
    pub fn new(
        store: Arc<dyn SessionStore>,
        acr_levels: Arc<dyn AcrLevelResolver>,
        config: SessionConfig,
    ) -> Self {
        Self {
            store,
            acr_levels,
            signer: None,
            audit: Arc::new(TracingAuditSink),
            clock: Arc::new(SystemClock),
            config,
            cookie: CookieConfig::default(),
        }
    }

    /// Sets the signer used for session claim-sets.
    #[must_use]
    pub fn with_signer(mut self, signer: Arc<dyn TokenSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Sets the audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Sets the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the session cookie attributes.
    #[must_use]
    pub fn with_cookie_config(mut self, cookie: CookieConfig) -> Self {
        self.cookie = cookie;
        self
    }

    /// `Set-Cookie` value binding the browser to `session` under `name`,
    /// `session_state` or `uma_session_state`. Expires after the absolute
    /// session lifetime.
    #[must_use]
    pub fn cookie_for(&self, name: &str, session: &Session) -> String {
        session_cookie(name, &session.id, &self.cookie, &self.config, self.clock.now())
    }

    /// Session configuration in effect.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Loads a live session by id.
    ///
    /// Missing, blank and idle-expired ids resolve to `None`. Expired sessions
    /// are removed on the way out. Store failures are logged, never returned.
    pub async fn resolve_session(&self, id: Option<&str>) -> Option<Session> {
        let id = id.map(str::trim).filter(|id| !id.is_empty())?;

        let session = match self.store.get(id).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                debug!(session_id = %id, "session not found");
                return None;
            }
            Err(e) => {
                warn!(session_id = %id, error = %e, "failed to load session");
                return None;
            }
        };

        if self.is_valid(&session, self.clock.now()) {
            Some(session)
        } else {
            debug!(session_id = %id, state = %session.state, "session idle limit exceeded");
            self.remove(&session).await;
            None
        }
    }

    /// Returns `false` once idle time exceeds the limit for the session's state.
    #[must_use]
    pub fn is_valid(&self, session: &Session, now: time::OffsetDateTime) -> bool {
        let limit = match session.state {
            SessionState::Authenticated => self.config.authenticated_idle_limit(),
            SessionState::Unauthenticated => self.config.unauthenticated_idle_limit(),
        };
        match limit {
            Some(limit) => now - session.last_used_at <= limit,
            None => true,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Creates a session.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` for an authenticated session without a user
    /// - `Signing` when the claim-set cannot be signed
    #[instrument(skip(self, attributes, ctx))]
    pub async fn create(
        &self,
        user_ref: Option<&str>,
        attributes: SessionAttributes,
        state: SessionState,
        persist: bool,
        ctx: &RequestContext,
    ) -> AuthResult<Session> {
        let user_ref = user_ref.map(str::trim).filter(|u| !u.is_empty());
        if state == SessionState::Authenticated && user_ref.is_none() {
            return Err(AuthError::invalid_request(
                "authenticated session requires a user",
            ));
        }

        let now = self.clock.now();
        let mut session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            state,
            user_ref: user_ref.map(str::to_string),
            authentication_time: (state == SessionState::Authenticated).then_some(now),
            last_used_at: now,
            attributes,
            permission_granted: None,
            permission_granted_map: Default::default(),
            involved_clients: Default::default(),
            jwt: None,
            persisted: false,
        };

        if self.config.session_as_jwt {
            match &self.signer {
                Some(signer) => session.jwt = Some(signer.sign(&session_claims(&session))?),
                None => warn!("session_as_jwt is enabled but no signer is configured"),
            }
        }

        let written = if persist {
            self.persist(&mut session, false).await
        } else {
            true
        };

        let action = match state {
            SessionState::Authenticated => AuditAction::SessionAuthenticated,
            SessionState::Unauthenticated => AuditAction::SessionUnauthenticated,
        };
        self.audit.record(
            AuditEntry::new(action, now)
                .username(session.user_ref.as_deref())
                .session_id(Some(session.id.as_str()))
                .ip_address(ctx.ip_address.as_deref())
                .success(written),
        );

        debug!(session_id = %session.id, persisted = session.persisted, "session created");
        Ok(session)
    }

    /// Completes primary authentication: Unauthenticated → Authenticated.
    ///
    /// Returns whether the forced write succeeded.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` when `user_ref` is blank.
    pub async fn authenticate(
        &self,
        session: &mut Session,
        user_ref: &str,
        ctx: &RequestContext,
    ) -> AuthResult<bool> {
        let user_ref = user_ref.trim();
        if user_ref.is_empty() {
            return Err(AuthError::invalid_request(
                "authenticated session requires a user",
            ));
        }

        let now = self.clock.now();
        session.state = SessionState::Authenticated;
        session.user_ref = Some(user_ref.to_string());
        session.authentication_time = Some(now);

        let written = self.update(session, true, true, true).await;

        self.audit.record(
            AuditEntry::new(AuditAction::SessionAuthenticated, now)
                .username(Some(user_ref))
                .session_id(Some(session.id.as_str()))
                .ip_address(ctx.ip_address.as_deref())
                .success(written),
        );
        Ok(written)
    }

    // =========================================================================
    // Step-up
    // =========================================================================

    /// Reconciles an authenticated session with the ACR a client requests.
    ///
    /// - Requested ACR stronger than the recorded one: `AcrChanged`, the
    ///   caller restarts login.
    /// - Requested ACR different but not stronger: the session is returned
    ///   unchanged.
    /// - Same ACR (or none requested): request parameters are merged in and
    ///   the login flow is re-initialized.
    ///
    /// Unknown ACR labels on either side are treated as a step-up.
    ///
    /// # Errors
    ///
    /// Returns `AcrChanged` as described above.
    #[instrument(skip(self, session, request_params), fields(session_id = %session.id))]
    pub async fn reconcile_step_up(
        &self,
        mut session: Session,
        requested_acr: Option<&str>,
        request_params: &IndexMap<String, String>,
    ) -> AuthResult<Session> {
        if !session.is_authenticated() || session.attributes.is_empty() {
            return Ok(session);
        }

        let Some(session_acr) = session.attributes.acr().map(str::to_string) else {
            error!("failed to read acr from session attributes");
            return Ok(session);
        };

        let requested_acr = requested_acr
            .map(str::trim)
            .filter(|a| !a.is_empty() && *a != session_acr);
        if let Some(requested) = requested_acr {
            let current_level = self.acr_levels.level(&session_acr);
            let requested_level = self.acr_levels.level(requested);
            return match (current_level, requested_level) {
                (Some(current), Some(wanted)) if wanted <= current => {
                    debug!(
                        session_acr = %session_acr,
                        requested_acr = %requested,
                        "requested acr is not stronger, keeping session"
                    );
                    Ok(session)
                }
                _ => {
                    debug!(
                        session_acr = %session_acr,
                        requested_acr = %requested,
                        ?current_level,
                        ?requested_level,
                        "step-up required"
                    );
                    Err(AuthError::acr_changed(session_acr, requested))
                }
            };
        }

        self.reinit_login(&mut session, request_params, true).await;
        Ok(session)
    }

    /// Merges the allowed request parameters into the session and restarts
    /// the step sequence. Parameters outside
    /// [`ALLOWED_PARAMETERS`](super::model::ALLOWED_PARAMETERS) are
    /// dropped.
    ///
    /// Without `force` nothing happens when the merge changes no attribute.
    /// Returns whether a write happened and succeeded.
    pub async fn reinit_login(
        &self,
        session: &mut Session,
        request_params: &IndexMap<String, String>,
        force: bool,
    ) -> bool {
        let mut merged = session.attributes.clone();
        merged.merge_request(&allowed_parameters(request_params));

        if !force && merged == session.attributes {
            return false;
        }

        merged.clear_all_steps_passed();
        merged.set_reinit_marker();
        session.attributes = merged;

        self.update(session, true, true, true).await
    }

    /// Rewinds the step sequence to `target_step`.
    pub async fn reset_to_step(&self, session: &mut Session, target_step: u32) -> bool {
        let current = session.attributes.auth_step();
        for step in target_step..=current {
            session.attributes.clear_step_passed(step);
        }
        session.attributes.set_auth_step(target_step);

        self.update(session, true, true, true).await
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Writes the session through to the store.
    ///
    /// `prompt=none` sessions are skipped unless configuration allows them
    /// or `force` is set. Returns whether the session was written.
    pub async fn persist(&self, session: &mut Session, force: bool) -> bool {
        if !force && !self.is_persistable(session) {
            debug!(session_id = %session.id, "skipping persistence of prompt=none session");
            return false;
        }

        session.last_used_at = self.clock.now();
        session.persisted = true;

        match self.store.put(session, self.ttl_for(session)).await {
            Ok(()) => true,
            Err(e) => {
                error!(session_id = %session.id, error = %e, "failed to persist session");
                false
            }
        }
    }

    /// Writes pending session changes.
    ///
    /// Sessions past their absolute lifetime are deleted instead. Returns
    /// `false` only when the store fails with something other than a
    /// missing entry.
    pub async fn update(
        &self,
        session: &mut Session,
        update_last_used_at: bool,
        force_update: bool,
        modified: bool,
    ) -> bool {
        if !force_update && !self.is_persistable(session) {
            return true;
        }

        let now = self.clock.now();
        let mut write = modified;

        if update_last_used_at && now - session.last_used_at > LAST_USED_AT_DEBOUNCE {
            session.last_used_at = now;
            write = true;
        }

        if !session.persisted {
            session.persisted = true;
            write = true;
        }

        let lifetime_exceeded = session
            .authentication_time
            .is_some_and(|auth_time| now - auth_time > self.config.session_lifetime);
        if lifetime_exceeded {
            debug!(session_id = %session.id, "absolute session lifetime exceeded, removing");
            self.remove(session).await;
            return true;
        }

        if !write {
            return true;
        }

        match self
            .retry_write(session, self.config.max_write_attempts)
            .await
        {
            Ok(()) => true,
            Err(e) if e.kind == StoreErrorKind::NotFound => {
                warn!(session_id = %session.id, error = %e, "session vanished during update");
                true
            }
            Err(e) => {
                error!(session_id = %session.id, error = %e, "failed to update session");
                false
            }
        }
    }

    /// Writes the session, retrying conflict-class failures.
    ///
    /// At most `max_attempts` writes are issued. Non-conflict errors return
    /// immediately; exhausting the attempts returns the last conflict.
    pub async fn retry_write(&self, session: &Session, max_attempts: u32) -> Result<(), StoreError> {
        let max_attempts = max_attempts.max(1);
        let ttl = self.ttl_for(session);
        let mut attempt = 1;

        loop {
            match self.store.put(session, ttl).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_conflict() && attempt < max_attempts => {
                    debug!(
                        session_id = %session.id,
                        attempt,
                        max_attempts,
                        error = %e,
                        "session write conflict, retrying"
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Deletes a session. Returns `true` when an entry was removed.
    pub async fn remove(&self, session: &Session) -> bool {
        match self.store.remove(&session.id).await {
            Ok(removed) => removed,
            Err(e) => {
                error!(session_id = %session.id, error = %e, "failed to remove session");
                false
            }
        }
    }

    /// Deletes several sessions. Failures are logged and skipped.
    /// Returns how many were removed.
    pub async fn remove_all(&self, sessions: &[Session]) -> usize {
        let mut removed = 0;
        for session in sessions {
            if self.remove(session).await {
                removed += 1;
            }
        }
        removed
    }

    fn is_persistable(&self, session: &Session) -> bool {
        self.config.persist_on_prompt_none || !session.attributes.has_prompt_none()
    }

    fn ttl_for(&self, session: &Session) -> Option<Duration> {
        match session.state {
            SessionState::Unauthenticated => self.config.unauthenticated_idle_limit(),
            SessionState::Authenticated => Some(self.config.session_lifetime),
        }
    }
}

/// Claim set signed into `Session::jwt`.
#[must_use]
pub fn session_claims(session: &Session) -> serde_json::Value {
    serde_json::json!({
        "id": session.id,
        "authentication_time": session.authentication_time.map(|t| t.unix_timestamp()),
        "user_dn": session.user_ref,
        "state": session.state,
        "session_attributes": session.attributes,
        "last_used_at": session.last_used_at.unix_timestamp(),
        "permission_granted": session.permission_granted,
        "permission_granted_map": session.permission_granted_map,
        "involved_clients_map": session.involved_clients,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::session::StaticAcrLevels;
    use crate::session::model::{AUTH_STEP, REINIT_LOGIN};
    use crate::storage::StoreResult;
    use crate::storage::memory::MemorySessionStore;
    use crate::testing::{RecordingAuditSink, TEST_EPOCH, test_clock};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store that counts writes and replays scripted failures before
    /// delegating to memory.
    struct ScriptedStore {
        inner: MemorySessionStore,
        failures: Mutex<VecDeque<StoreError>>,
        puts: AtomicUsize,
    }

    impl ScriptedStore {
        fn new(failures: Vec<StoreError>) -> Self {
            Self {
                inner: MemorySessionStore::new(),
                failures: Mutex::new(failures.into()),
                puts: AtomicUsize::new(0),
            }
        }

        fn puts(&self) -> usize {
            self.puts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SessionStore for ScriptedStore {
        async fn put(&self, session: &Session, ttl: Option<Duration>) -> StoreResult<()> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.failures.lock().unwrap().pop_front() {
                return Err(err);
            }
            self.inner.put(session, ttl).await
        }

        async fn get(&self, id: &str) -> StoreResult<Option<Session>> {
            self.inner.get(id).await
        }

        async fn remove(&self, id: &str) -> StoreResult<bool> {
            self.inner.remove(id).await
        }
    }

    fn levels() -> Arc<StaticAcrLevels> {
        Arc::new(
            [("basic", 5), ("pwd", 10), ("otp", 20)]
                .into_iter()
                .collect(),
        )
    }

    fn service_with(
        store: Arc<dyn SessionStore>,
        config: SessionConfig,
    ) -> (SessionService, Arc<crate::clock::ManualClock>) {
        let clock = test_clock();
        let service = SessionService::new(store, levels(), config).with_clock(clock.clone());
        (service, clock)
    }

    fn authenticated(acr: &str) -> Session {
        Session {
            id: "sess-1".to_string(),
            state: SessionState::Authenticated,
            user_ref: Some("alice".to_string()),
            authentication_time: Some(TEST_EPOCH),
            last_used_at: TEST_EPOCH,
            attributes: [("acr", acr), ("auth_step", "2"), ("auth_step_passed_1", "true")]
                .into_iter()
                .collect(),
            permission_granted: None,
            permission_granted_map: Default::default(),
            involved_clients: Default::default(),
            jwt: None,
            persisted: true,
        }
    }

    // -------------------------------------------------------------------------
    // Validity
    // -------------------------------------------------------------------------

    #[test]
    fn test_is_valid_uses_limit_for_state() {
        let config = SessionConfig {
            unused_lifetime: 100,
            unauthenticated_unused_lifetime: 10,
            ..SessionConfig::default()
        };
        let (service, _) = service_with(Arc::new(MemorySessionStore::new()), config);

        let mut session = authenticated("pwd");
        assert!(service.is_valid(&session, TEST_EPOCH + time::Duration::seconds(100)));
        assert!(!service.is_valid(&session, TEST_EPOCH + time::Duration::seconds(101)));

        session.state = SessionState::Unauthenticated;
        assert!(service.is_valid(&session, TEST_EPOCH + time::Duration::seconds(10)));
        assert!(!service.is_valid(&session, TEST_EPOCH + time::Duration::seconds(11)));
    }

    #[test]
    fn test_is_valid_unlimited() {
        let config = SessionConfig {
            unused_lifetime: -1,
            unauthenticated_unused_lifetime: -1,
            ..SessionConfig::default()
        };
        let (service, _) = service_with(Arc::new(MemorySessionStore::new()), config);
        let session = authenticated("pwd");
        assert!(service.is_valid(&session, TEST_EPOCH + time::Duration::days(3650)));
    }

    #[tokio::test]
    async fn test_resolve_session_drops_idle_sessions() {
        let store = Arc::new(MemorySessionStore::new());
        let config = SessionConfig {
            unused_lifetime: 60,
            ..SessionConfig::default()
        };
        let (service, clock) = service_with(store.clone(), config);

        let mut session = authenticated("pwd");
        assert!(service.persist(&mut session, true).await);

        assert!(service.resolve_session(Some("sess-1")).await.is_some());
        assert!(service.resolve_session(Some("  ")).await.is_none());
        assert!(service.resolve_session(None).await.is_none());
        assert!(service.resolve_session(Some("missing")).await.is_none());

        clock.advance(time::Duration::seconds(61));
        assert!(service.resolve_session(Some("sess-1")).await.is_none());
        assert!(store.is_empty());
    }

    // -------------------------------------------------------------------------
    // Creation
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_create_audits_resulting_state() {
        let audit = Arc::new(RecordingAuditSink::default());
        let store = Arc::new(MemorySessionStore::new());
        let (service, _) = service_with(store.clone(), SessionConfig::default());
        let service = service.with_audit(audit.clone());

        let ctx = RequestContext::with_ip("10.0.0.1");
        let session = service
            .create(None, SessionAttributes::new(), SessionState::Unauthenticated, true, &ctx)
            .await
            .unwrap();
        assert!(session.persisted);
        assert_eq!(session.last_used_at, TEST_EPOCH);
        assert!(session.authentication_time.is_none());
        assert!(store.get(&session.id).await.unwrap().is_some());

        let session = service
            .create(Some("alice"), SessionAttributes::new(), SessionState::Authenticated, false, &ctx)
            .await
            .unwrap();
        assert!(!session.persisted);
        assert_eq!(session.authentication_time, Some(TEST_EPOCH));

        let entries = audit.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, AuditAction::SessionUnauthenticated);
        assert_eq!(entries[1].action, AuditAction::SessionAuthenticated);
        assert_eq!(entries[1].username.as_deref(), Some("alice"));
        assert_eq!(entries[1].ip_address.as_deref(), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_create_authenticated_requires_user() {
        let (service, _) = service_with(Arc::new(MemorySessionStore::new()), SessionConfig::default());
        let err = service
            .create(Some(" "), SessionAttributes::new(), SessionState::Authenticated, false, &RequestContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_create_signs_claims_when_enabled() {
        let config = SessionConfig {
            session_as_jwt: true,
            ..SessionConfig::default()
        };
        let signer = Arc::new(
            crate::token::JwtSigner::hmac(jsonwebtoken::Algorithm::HS256, b"secret").unwrap(),
        );
        let (service, _) = service_with(Arc::new(MemorySessionStore::new()), config);
        let service = service.with_signer(signer);

        let session = service
            .create(Some("alice"), SessionAttributes::new(), SessionState::Authenticated, false, &RequestContext::default())
            .await
            .unwrap();
        assert_eq!(session.jwt.as_deref().map(|j| j.split('.').count()), Some(3));

        let claims = session_claims(&session);
        assert_eq!(claims["user_dn"], "alice");
        assert_eq!(claims["state"], "authenticated");
        assert_eq!(claims["authentication_time"], TEST_EPOCH.unix_timestamp());
    }

    #[tokio::test]
    async fn test_authenticate_transitions_state() {
        let store = Arc::new(MemorySessionStore::new());
        let audit = Arc::new(RecordingAuditSink::default());
        let (service, clock) = service_with(store.clone(), SessionConfig::default());
        let service = service.with_audit(audit.clone());

        let mut session = service
            .create(None, SessionAttributes::new(), SessionState::Unauthenticated, true, &RequestContext::default())
            .await
            .unwrap();
        clock.advance(time::Duration::seconds(5));

        assert!(service.authenticate(&mut session, "alice", &RequestContext::default()).await.unwrap());
        let stored = store.get(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.state, SessionState::Authenticated);
        assert_eq!(stored.user_ref.as_deref(), Some("alice"));
        assert_eq!(stored.authentication_time, Some(clock.now()));
        assert_eq!(audit.entries().last().map(|e| e.action), Some(AuditAction::SessionAuthenticated));

        assert!(service.authenticate(&mut session, "", &RequestContext::default()).await.is_err());
    }

    #[test]
    fn test_cookie_for_session() {
        let config = SessionConfig {
            session_lifetime: Duration::from_secs(3600),
            ..SessionConfig::default()
        };
        let (service, _) = service_with(Arc::new(MemorySessionStore::new()), config);
        let service = service.with_cookie_config(CookieConfig { http_only: true });

        let value = service.cookie_for(
            crate::session::cookie::SESSION_STATE_COOKIE,
            &authenticated("pwd"),
        );
        assert!(value.starts_with("session_state=sess-1"));
        assert!(value.contains("HttpOnly"));
        assert!(value.contains("Secure"));
        assert!(value.contains("Expires=Mon, 01 Jan 2024 01:00:00 GMT"));
    }

    // -------------------------------------------------------------------------
    // Step-up
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_step_up_to_stronger_acr_fails() {
        let (service, _) = service_with(Arc::new(MemorySessionStore::new()), SessionConfig::default());
        let err = service
            .reconcile_step_up(authenticated("pwd"), Some("otp"), &IndexMap::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthError::AcrChanged { ref session_acr, ref requested_acr }
                if session_acr == "pwd" && requested_acr == "otp"
        ));
    }

    #[tokio::test]
    async fn test_step_down_keeps_session_unchanged() {
        let store = Arc::new(ScriptedStore::new(vec![]));
        let (service, _) = service_with(store.clone(), SessionConfig::default());
        let original = authenticated("pwd");

        let session = service
            .reconcile_step_up(original.clone(), Some("basic"), &IndexMap::new())
            .await
            .unwrap();
        assert_eq!(session, original);
        assert_eq!(session.attributes.acr(), Some("pwd"));
        assert_eq!(store.puts(), 0);
    }

    #[tokio::test]
    async fn test_unknown_requested_acr_requires_step_up() {
        let (service, _) = service_with(Arc::new(MemorySessionStore::new()), SessionConfig::default());
        let result = service
            .reconcile_step_up(authenticated("pwd"), Some("hardware-key"), &IndexMap::new())
            .await;
        assert!(matches!(result, Err(AuthError::AcrChanged { .. })));
    }

    #[tokio::test]
    async fn test_same_acr_reinitializes_login() {
        let store = Arc::new(ScriptedStore::new(vec![]));
        let (service, _) = service_with(store.clone(), SessionConfig::default());

        let mut params = IndexMap::new();
        params.insert("scope".to_string(), "openid".to_string());
        params.insert(AUTH_STEP.to_string(), "9".to_string());

        let session = service
            .reconcile_step_up(authenticated("pwd"), Some("pwd"), &params)
            .await
            .unwrap();

        assert_eq!(session.attributes.get("scope"), Some("openid"));
        assert_eq!(session.attributes.auth_step(), 2);
        assert!(!session.attributes.is_step_passed(1));
        assert_eq!(session.attributes.get(REINIT_LOGIN), Some("1"));
        assert_eq!(store.puts(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_merges_only_allowed_parameters() {
        let store = Arc::new(ScriptedStore::new(vec![]));
        let (service, _) = service_with(store.clone(), SessionConfig::default());

        let mut params = IndexMap::new();
        params.insert("scope".to_string(), "openid".to_string());
        params.insert("acr_values".to_string(), "otp".to_string());
        params.insert("acr".to_string(), "otp".to_string());
        params.insert("password".to_string(), "s3cret".to_string());

        let session = service
            .reconcile_step_up(authenticated("pwd"), Some("pwd"), &params)
            .await
            .unwrap();

        assert_eq!(session.attributes.get("acr"), Some("pwd"));
        assert_eq!(session.attributes.get("password"), None);
        assert_eq!(session.attributes.get("acr_values"), Some("otp"));
        assert_eq!(session.attributes.get("scope"), Some("openid"));

        // The recorded acr still drives the next step-up decision.
        let result = service
            .reconcile_step_up(session, Some("otp"), &IndexMap::new())
            .await;
        assert!(matches!(result, Err(AuthError::AcrChanged { .. })));
    }

    #[tokio::test]
    async fn test_step_up_ignores_unauthenticated_and_blank_acr() {
        let store = Arc::new(ScriptedStore::new(vec![]));
        let (service, _) = service_with(store.clone(), SessionConfig::default());

        let mut session = authenticated("pwd");
        session.state = SessionState::Unauthenticated;
        let out = service
            .reconcile_step_up(session.clone(), Some("otp"), &IndexMap::new())
            .await
            .unwrap();
        assert_eq!(out, session);

        let mut session = authenticated("");
        session.attributes.remove("acr");
        let out = service
            .reconcile_step_up(session.clone(), Some("otp"), &IndexMap::new())
            .await
            .unwrap();
        assert_eq!(out, session);
        assert_eq!(store.puts(), 0);
    }

    #[tokio::test]
    async fn test_reinit_login_without_force_skips_noop() {
        let store = Arc::new(ScriptedStore::new(vec![]));
        let (service, _) = service_with(store.clone(), SessionConfig::default());
        let mut session = authenticated("pwd");

        let mut params = IndexMap::new();
        params.insert("acr".to_string(), "pwd".to_string());
        assert!(!service.reinit_login(&mut session, &params, false).await);
        assert_eq!(store.puts(), 0);
        assert!(session.attributes.is_step_passed(1));
    }

    #[tokio::test]
    async fn test_reset_to_step() {
        let store = Arc::new(ScriptedStore::new(vec![]));
        let (service, _) = service_with(store.clone(), SessionConfig::default());
        let mut session = authenticated("pwd");
        session.attributes.set_auth_step(3);
        session.attributes.mark_step_passed(2);
        session.attributes.mark_step_passed(3);

        assert!(service.reset_to_step(&mut session, 2).await);
        assert_eq!(session.attributes.auth_step(), 2);
        assert!(session.attributes.is_step_passed(1));
        assert!(!session.attributes.is_step_passed(2));
        assert!(!session.attributes.is_step_passed(3));
        assert_eq!(store.puts(), 1);
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_persist_skips_prompt_none_unless_forced() {
        let store = Arc::new(ScriptedStore::new(vec![]));
        let (service, _) = service_with(store.clone(), SessionConfig::default());
        let mut session = authenticated("pwd");
        session.persisted = false;
        session.attributes.insert("prompt", "none");

        assert!(!service.persist(&mut session, false).await);
        assert!(!session.persisted);
        assert_eq!(store.puts(), 0);

        assert!(service.persist(&mut session, true).await);
        assert!(session.persisted);
        assert_eq!(store.puts(), 1);
    }

    #[tokio::test]
    async fn test_persist_prompt_none_when_configured() {
        let store = Arc::new(ScriptedStore::new(vec![]));
        let config = SessionConfig {
            persist_on_prompt_none: true,
            ..SessionConfig::default()
        };
        let (service, _) = service_with(store.clone(), config);
        let mut session = authenticated("pwd");
        session.attributes.insert("prompt", "none");
        assert!(service.persist(&mut session, false).await);
        assert_eq!(store.puts(), 1);
    }

    #[tokio::test]
    async fn test_update_debounces_last_used_at() {
        let store = Arc::new(ScriptedStore::new(vec![]));
        let (service, clock) = service_with(store.clone(), SessionConfig::default());
        let mut session = authenticated("pwd");

        clock.advance(time::Duration::milliseconds(600));
        assert!(service.update(&mut session, true, false, false).await);
        let bumped = session.last_used_at;
        assert_eq!(bumped, clock.now());

        clock.advance(time::Duration::milliseconds(200));
        assert!(service.update(&mut session, true, false, false).await);
        assert_eq!(session.last_used_at, bumped);

        assert_eq!(store.puts(), 1);
    }

    #[tokio::test]
    async fn test_update_writes_unpersisted_session() {
        let store = Arc::new(ScriptedStore::new(vec![]));
        let (service, _) = service_with(store.clone(), SessionConfig::default());
        let mut session = authenticated("pwd");
        session.persisted = false;

        assert!(service.update(&mut session, false, false, false).await);
        assert!(session.persisted);
        assert_eq!(store.puts(), 1);
    }

    #[tokio::test]
    async fn test_update_evicts_past_absolute_lifetime() {
        let store = Arc::new(ScriptedStore::new(vec![]));
        let config = SessionConfig {
            session_lifetime: Duration::from_secs(3600),
            unused_lifetime: -1,
            ..SessionConfig::default()
        };
        let (service, clock) = service_with(store.clone(), config);
        let mut session = authenticated("pwd");
        assert!(service.persist(&mut session, true).await);
        assert_eq!(store.puts(), 1);

        clock.advance(time::Duration::seconds(3601));
        assert!(service.update(&mut session, true, true, true).await);
        assert_eq!(store.puts(), 1);
        assert!(store.get("sess-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_reports_unclassified_failure() {
        let store = Arc::new(ScriptedStore::new(vec![StoreError::unavailable("down")]));
        let (service, _) = service_with(store.clone(), SessionConfig::default());
        let mut session = authenticated("pwd");
        assert!(!service.update(&mut session, false, true, true).await);
    }

    #[tokio::test]
    async fn test_update_tolerates_missing_entry() {
        let store = Arc::new(ScriptedStore::new(vec![StoreError::not_found("gone")]));
        let (service, _) = service_with(store.clone(), SessionConfig::default());
        let mut session = authenticated("pwd");
        assert!(service.update(&mut session, false, true, true).await);
    }

    #[tokio::test]
    async fn test_retry_write_recovers_from_conflicts() {
        let store = Arc::new(ScriptedStore::new(vec![
            StoreError::conflict("stale"),
            StoreError::conflict("stale"),
        ]));
        let (service, _) = service_with(store.clone(), SessionConfig::default());

        service.retry_write(&authenticated("pwd"), 3).await.unwrap();
        assert_eq!(store.puts(), 3);
        assert!(store.get("sess-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_retry_write_surfaces_last_conflict() {
        let store = Arc::new(ScriptedStore::new(vec![
            StoreError::conflict("first"),
            StoreError::conflict("second"),
            StoreError::conflict("third"),
            StoreError::conflict("never reached"),
        ]));
        let (service, _) = service_with(store.clone(), SessionConfig::default());

        let err = service.retry_write(&authenticated("pwd"), 3).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(err.message, "third");
        assert_eq!(store.puts(), 3);
    }

    #[tokio::test]
    async fn test_retry_write_propagates_other_errors_immediately() {
        let store = Arc::new(ScriptedStore::new(vec![
            StoreError::unavailable("down"),
            StoreError::conflict("unused"),
        ]));
        let (service, _) = service_with(store.clone(), SessionConfig::default());

        let err = service.retry_write(&authenticated("pwd"), 3).await.unwrap_err();
        assert_eq!(err.kind, StoreErrorKind::Unavailable);
        assert_eq!(store.puts(), 1);
    }

    #[tokio::test]
    async fn test_unauthenticated_ttl_follows_idle_limit() {
        let store = Arc::new(MemorySessionStore::with_clock(test_clock()));
        let config = SessionConfig {
            unauthenticated_unused_lifetime: 30,
            ..SessionConfig::default()
        };
        let (service, _) = service_with(store.clone(), config);
        assert_eq!(
            service.ttl_for(&Session {
                state: SessionState::Unauthenticated,
                ..authenticated("pwd")
            }),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            service.ttl_for(&authenticated("pwd")),
            Some(service.config().session_lifetime)
        );
    }

    #[tokio::test]
    async fn test_remove_all_continues_past_failures() {
        let store = Arc::new(MemorySessionStore::new());
        let (service, _) = service_with(store.clone(), SessionConfig::default());

        let mut a = authenticated("pwd");
        a.id = "a".to_string();
        let mut b = authenticated("pwd");
        b.id = "b".to_string();
        service.persist(&mut a, true).await;
        service.persist(&mut b, true).await;

        let mut missing = authenticated("pwd");
        missing.id = "missing".to_string();
        assert_eq!(service.remove_all(&[a, missing, b]).await, 2);
        assert!(store.is_empty());
    }
}
