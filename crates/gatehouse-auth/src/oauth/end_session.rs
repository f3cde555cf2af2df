//! End-session coordinator (OpenID Connect RP-Initiated Logout).
//!
//! Resolves the grant named by `id_token_hint` and the session named by the
//! `session_state` parameter or cookie, revokes the session and every token
//! bound to it, computes the front-channel logout URIs of the relying parties
//! that took part in the session and renders the confirmation page.
//!
//! Session cookies are cleared on every path past request validation, even
//! when a later step fails.

use async_trait::async_trait;
use indexmap::IndexSet;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use url::form_urlencoded;

use super::token::non_blank;
use crate::audit::{AuditAction, AuditEntry, AuditSink, TracingAuditSink};
use crate::clock::{Clock, SystemClock};
use crate::config::EndSessionConfig;
use crate::context::RequestContext;
use crate::error::{AuthError, AuthResult};
use crate::session::{
    SESSION_STATE_COOKIE, Session, SessionService, UMA_SESSION_STATE_COOKIE, removal_cookie,
};
use crate::storage::{ClientStore, GrantStore};
use crate::types::{AuthorizationGrant, TokenKind, hash_token};

// =============================================================================
// Collaborators
// =============================================================================

/// Per-deployment logic run before a session is torn down.
#[async_trait]
pub trait ExternalLogoutHook: Send + Sync {
    /// Returns `false` to report failure. Revocation still happens.
    async fn on_logout(&self, session: &Session, grant: Option<&AuthorizationGrant>) -> bool;
}

/// The caller's security identity in the hosting application.
pub trait CallerIdentity: Send + Sync {
    /// Drops whatever identity the caller is currently bound to.
    fn logout(&self, ctx: &RequestContext, session: Option<&Session>);
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// End-session request parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndSessionParams {
    /// ID token previously issued to the relying party.
    #[serde(default)]
    pub id_token_hint: Option<String>,

    /// Where to send the user agent after logout.
    #[serde(default)]
    pub post_logout_redirect_uri: Option<String>,

    /// Opaque value appended to the post-logout redirect.
    #[serde(default)]
    pub state: Option<String>,

    /// Session to end. Takes precedence over the session cookie.
    #[serde(default)]
    pub session_state: Option<String>,
}

/// Successful logout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutPage {
    /// Relying-party URIs loaded in hidden frames.
    pub frontchannel_uris: Vec<String>,
    /// Validated post-logout redirect, with `state` appended.
    pub redirect_uri: Option<String>,
    /// Rendered confirmation document.
    pub html: String,
}

/// Outcome of an end-session request.
///
/// `set_cookies` must be sent whatever `outcome` holds.
#[derive(Debug)]
pub struct EndSessionResponse {
    /// `Set-Cookie` header values.
    pub set_cookies: Vec<String>,
    /// Page to render, or the error to report.
    pub outcome: AuthResult<LogoutPage>,
}

impl EndSessionResponse {
    fn rejected(err: AuthError) -> Self {
        Self {
            set_cookies: Vec::new(),
            outcome: Err(err),
        }
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// End-session coordinator.
pub struct EndSessionCoordinator {
    grants: Arc<dyn GrantStore>,
    clients: Arc<dyn ClientStore>,
    sessions: Arc<SessionService>,
    hook: Option<Arc<dyn ExternalLogoutHook>>,
    identity: Option<Arc<dyn CallerIdentity>>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    config: EndSessionConfig,
}

impl EndSessionCoordinator {
    /// Creates a coordinator with the wall clock and tracing audit sink.
    pub fn new(
        grants: Arc<dyn GrantStore>,
        clients: Arc<dyn ClientStore>,
        sessions: Arc<SessionService>,
        config: EndSessionConfig,
    ) -> Self {
        Self {
            grants,
            clients,
            sessions,
            hook: None,
            identity: None,
            audit: Arc::new(TracingAuditSink),
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// Registers the external logout hook.
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn ExternalLogoutHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Registers the caller identity to log out.
    #[must_use]
    pub fn with_identity(mut self, identity: Arc<dyn CallerIdentity>) -> Self {
        self.identity = Some(identity);
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

    /// Ends a session.
    ///
    /// `cookie_session_id` is the value of the `session_state` cookie.
    pub async fn end_session(
        &self,
        params: &EndSessionParams,
        cookie_session_id: Option<&str>,
        ctx: &RequestContext,
    ) -> EndSessionResponse {
        let id_token_hint = non_blank(&params.id_token_hint);
        let session_id = non_blank(&params.session_state)
            .or_else(|| cookie_session_id.map(str::trim).filter(|s| !s.is_empty()));

        if id_token_hint.is_none() && session_id.is_none() {
            return EndSessionResponse::rejected(AuthError::invalid_request(
                "id_token_hint or session_state is required",
            ));
        }

        let grant = match id_token_hint {
            Some(hint) => self.resolve_grant(hint).await,
            None => None,
        };
        let session = self.sessions.resolve_session(session_id).await;

        let outcome = self.terminate(params, grant.as_ref(), session.as_ref(), ctx).await;

        // Without a grant the record describes the session instead.
        let (client_id, username, scope) = match (grant.as_ref(), session.as_ref()) {
            (Some(g), s) => (
                Some(g.client_id.clone()),
                g.username()
                    .or_else(|| s.and_then(|s| s.user_ref.as_deref()))
                    .map(str::to_string),
                Some(g.scope_string()),
            ),
            (None, Some(s)) => {
                let granted = s.granted_client_ids().collect::<Vec<_>>().join(",");
                (
                    Some(granted).filter(|ids| !ids.is_empty()),
                    s.user_ref.clone(),
                    s.attributes.get("scope").map(str::to_string),
                )
            }
            (None, None) => (None, None, None),
        };

        self.audit.record(
            AuditEntry::new(AuditAction::SessionDestroyed, self.clock.now())
                .client_id(client_id)
                .username(username)
                .scope(scope)
                .session_id(session.as_ref().map(|s| s.id.as_str()).or(session_id))
                .ip_address(ctx.ip_address.as_deref())
                .success(outcome.is_ok()),
        );

        if let Err(e) = &outcome {
            debug!(error = %e, "end-session request failed");
        }

        EndSessionResponse {
            set_cookies: vec![
                removal_cookie(SESSION_STATE_COOKIE),
                removal_cookie(UMA_SESSION_STATE_COOKIE),
            ],
            outcome,
        }
    }

    async fn terminate(
        &self,
        params: &EndSessionParams,
        grant: Option<&AuthorizationGrant>,
        session: Option<&Session>,
        ctx: &RequestContext,
    ) -> AuthResult<LogoutPage> {
        if grant.is_none() && session.is_none() {
            return Err(AuthError::invalid_grant_and_session(
                "neither the id_token_hint nor the session could be resolved",
            ));
        }

        let mut hook_failed = false;
        if let (Some(hook), Some(session)) = (&self.hook, session) {
            if !hook.on_logout(session, grant).await {
                warn!(session_id = %session.id, "external logout hook reported failure");
                hook_failed = true;
            }
        }

        if let Some(session) = session {
            self.revoke(session).await;
        }

        if let Some(identity) = &self.identity {
            identity.logout(ctx, session);
        }

        if hook_failed {
            return Err(AuthError::invalid_grant_unauthorized(
                "external logout failed",
            ));
        }

        let frontchannel_uris = self.frontchannel_uris(grant, session).await?;
        let redirect_uri = self.validate_redirect(params, grant, session).await?;
        let html = render_logout_page(&frontchannel_uris, redirect_uri.as_deref());

        info!(
            session_id = ?session.map(|s| s.id.as_str()),
            client_id = ?grant.map(|g| g.client_id.as_str()),
            frontchannel = frontchannel_uris.len(),
            "session ended"
        );

        Ok(LogoutPage {
            frontchannel_uris,
            redirect_uri,
            html,
        })
    }

    async fn resolve_grant(&self, hint: &str) -> Option<AuthorizationGrant> {
        let record = match self.grants.find(&hash_token(hint)).await {
            Ok(record) => record?,
            Err(e) => {
                error!(error = %e, "failed to look up id_token_hint");
                return None;
            }
        };

        let accepted = match record.kind {
            TokenKind::IdToken => true,
            TokenKind::AccessToken => self.config.with_access_token,
            _ => false,
        };
        if accepted {
            Some(record.grant)
        } else {
            debug!(kind = %record.kind, "id_token_hint does not name an ID token");
            None
        }
    }

    async fn revoke(&self, session: &Session) {
        match self.grants.remove_all_by_session(&session.id).await {
            Ok(revoked) => debug!(session_id = %session.id, revoked, "session tokens revoked"),
            Err(e) => error!(session_id = %session.id, error = %e, "failed to revoke session tokens"),
        }
        self.sessions.remove(session).await;
    }

    /// Front-channel logout URIs of every relying party in the session.
    ///
    /// Clients the user granted permission to come first, then the hinted
    /// grant's client. Duplicates and blanks are dropped.
    async fn frontchannel_uris(
        &self,
        grant: Option<&AuthorizationGrant>,
        session: Option<&Session>,
    ) -> AuthResult<Vec<String>> {
        let client_ids: IndexSet<&str> = session
            .into_iter()
            .flat_map(Session::granted_client_ids)
            .chain(grant.map(|g| g.client_id.as_str()))
            .collect();

        let mut uris = IndexSet::new();
        for client_id in client_ids {
            let Some(client) = self.clients.find_by_client_id(client_id).await? else {
                debug!(client_id = %client_id, "client in session is no longer registered");
                continue;
            };

            for uri in client
                .frontchannel_logout_uris
                .iter()
                .map(|u| u.trim())
                .filter(|u| !u.is_empty())
            {
                let uri = match session {
                    Some(session) if client.frontchannel_logout_session_required => {
                        append_query_param(uri, "sid", &session.id)
                    }
                    _ => uri.to_string(),
                };
                uris.insert(uri);
            }
        }

        Ok(uris.into_iter().collect())
    }

    async fn validate_redirect(
        &self,
        params: &EndSessionParams,
        grant: Option<&AuthorizationGrant>,
        session: Option<&Session>,
    ) -> AuthResult<Option<String>> {
        let Some(uri) = non_blank(&params.post_logout_redirect_uri) else {
            return Ok(None);
        };

        let candidates: IndexSet<&str> = match grant {
            Some(grant) => IndexSet::from([grant.client_id.as_str()]),
            None => session
                .into_iter()
                .flat_map(Session::granted_client_ids)
                .collect(),
        };

        for client_id in candidates {
            if let Some(client) = self.clients.find_by_client_id(client_id).await? {
                if client.is_post_logout_redirect_uri_allowed(uri) {
                    let redirect = match non_blank(&params.state) {
                        Some(state) => append_query_param(uri, "state", state),
                        None => uri.to_string(),
                    };
                    return Ok(Some(redirect));
                }
            }
        }

        Err(AuthError::post_logout_uri_not_associated(uri))
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Appends `name=value` to `uri`, starting a query string when there is none.
#[must_use]
pub fn append_query_param(uri: &str, name: &str, value: &str) -> String {
    let value: String = form_urlencoded::byte_serialize(value.as_bytes()).collect();
    let separator = if uri.ends_with('?') || uri.ends_with('&') {
        ""
    } else if uri.contains('?') {
        "&"
    } else {
        "?"
    };
    format!("{uri}{separator}{name}={value}")
}

/// Escape HTML special characters.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// JavaScript string literal that cannot close the surrounding script element.
fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string())
        .to_string()
        .replace("</", "<\\/")
}

fn render_logout_page(frontchannel_uris: &[String], redirect_uri: Option<&str>) -> String {
    let frames: String = frontchannel_uris
        .iter()
        .map(|uri| {
            format!(
                r#"    <iframe src="{}" width="0" height="0" style="display:none;border:0"></iframe>
"#,
                html_escape(uri)
            )
        })
        .collect();

    let script = redirect_uri
        .map(|uri| {
            format!(
                r#"    <script>window.onload = function() {{ window.location.href = {}; }};</script>
"#,
                js_string(uri)
            )
        })
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Logged out</title>
{script}</head>
<body>
    <p>You have been logged out.</p>
{frames}</body>
</html>
"#
    )
}
