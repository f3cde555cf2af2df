//! Grant dispatcher.
//!
//! Routes token requests to the grant flow named by `grant_type`, enforces
//! per-client eligibility, verifies PKCE, consumes single-use artifacts and
//! mints tokens. Every request produces exactly one `TOKEN_REQUEST` audit
//! record, whatever the outcome.
//!
//! # Authorization code redemption
//!
//! Redemption runs lookup, PKCE check, consume, mint in that order. Consuming
//! is an atomic compare-and-delete at the store, so of two concurrent
//! redemptions exactly one wins. The loser, like any later replay, revokes
//! every token issued from the code.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, error, warn};

use super::pkce;
use super::token::{RequestedGrant, TokenRequest, TokenResponse, non_blank, validate_request};
use crate::audit::{AuditAction, AuditEntry, AuditSink, TracingAuditSink};
use crate::clock::{Clock, SystemClock};
use crate::config::TokenConfig;
use crate::context::RequestContext;
use crate::error::{AuthError, AuthResult};
use crate::storage::{GrantStore, UserAuthenticator};
use crate::token::{IdTokenClaims, TokenSigner};
use crate::types::{
    AuthorizationGrant, Client, GrantType, ResourceOwner, TokenKind, TokenRecord,
    generate_token, hash_token, parse_scopes,
};

// =============================================================================
// Collaborators
// =============================================================================

/// Deployment hook that resolves resource owners for the password grant
/// before the direct credential check runs.
#[async_trait]
pub trait AuthenticationFilter: Send + Sync {
    /// Returns the resource owner, or `None` to fall through to the
    /// credential check.
    async fn resolve_user(
        &self,
        client: &Client,
        username: &str,
        password: &str,
    ) -> AuthResult<Option<ResourceOwner>>;
}

/// Issues UMA requesting party tokens for ticket exchanges.
#[async_trait]
pub trait RptIssuer: Send + Sync {
    /// Exchanges the request's permission ticket for an RPT.
    async fn issue(&self, request: &TokenRequest, client: Option<&Client>)
    -> AuthResult<TokenResponse>;
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Token endpoint core.
pub struct GrantDispatcher {
    grants: Arc<dyn GrantStore>,
    users: Arc<dyn UserAuthenticator>,
    signer: Arc<dyn TokenSigner>,
    filter: Option<Arc<dyn AuthenticationFilter>>,
    rpt_issuer: Option<Arc<dyn RptIssuer>>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    config: TokenConfig,
    issuer: String,
}

struct Issued {
    response: TokenResponse,
    username: Option<String>,
}

enum Ineligible {
    Missing,
    Unsupported,
}

impl GrantDispatcher {
    /// Creates a dispatcher with the wall clock and tracing audit sink.
    pub fn new(
        grants: Arc<dyn GrantStore>,
        users: Arc<dyn UserAuthenticator>,
        signer: Arc<dyn TokenSigner>,
        config: TokenConfig,
        issuer: impl Into<String>,
    ) -> Self {
        Self {
            grants,
            users,
            signer,
            filter: None,
            rpt_issuer: None,
            audit: Arc::new(TracingAuditSink),
            clock: Arc::new(SystemClock),
            config,
            issuer: issuer.into(),
        }
    }

    /// Sets the password-grant authentication filter.
    #[must_use]
    pub fn with_filter(mut self, filter: Arc<dyn AuthenticationFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Enables UMA ticket exchange.
    #[must_use]
    pub fn with_rpt_issuer(mut self, issuer: Arc<dyn RptIssuer>) -> Self {
        self.rpt_issuer = Some(issuer);
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

    /// Stores an authorization code for `grant` and returns its value.
    ///
    /// Called by the authorization endpoint once the user has consented.
    ///
    /// # Errors
    ///
    /// Returns `Store` if the record cannot be written.
    pub async fn issue_authorization_code(&self, grant: AuthorizationGrant) -> AuthResult<String> {
        let code = generate_token();
        let record = TokenRecord::new(
            &code,
            TokenKind::AuthorizationCode,
            grant,
            self.clock.now(),
            self.config.authorization_code_lifetime,
        );
        self.grants.put(&record).await?;
        debug!(client_id = %record.grant.client_id, "authorization code issued");
        Ok(code)
    }

    /// Handles a token request.
    ///
    /// `client` is the authenticated client, or `None` when client
    /// authentication failed or was absent. The status of the resulting
    /// error depends on the grant type.
    ///
    /// # Errors
    ///
    /// Any [`AuthError`]; see the grant flows for which status each failure
    /// carries.
    pub async fn dispatch(
        &self,
        request: &TokenRequest,
        client: Option<&Client>,
        ctx: &RequestContext,
    ) -> AuthResult<TokenResponse> {
        let result = self.execute(request, client).await;

        let (username, success) = match &result {
            Ok(issued) => (issued.username.clone(), true),
            Err(_) => (non_blank(&request.username).map(str::to_string), false),
        };
        let client_id = client
            .map(|c| c.client_id.as_str())
            .or_else(|| non_blank(&request.client_id));
        self.audit_request(request, client_id, username, success, ctx);

        match result {
            Ok(issued) => Ok(issued.response),
            Err(e) => {
                if e.is_server_error() {
                    error!(
                        client_id = ?client_id,
                        grant_type = %request.grant_type,
                        error = %e,
                        "token request failed"
                    );
                } else {
                    debug!(
                        client_id = ?client_id,
                        grant_type = %request.grant_type,
                        error = %e,
                        "token request rejected"
                    );
                }
                Err(e)
            }
        }
    }

    /// Records a token request that failed before reaching a grant flow,
    /// such as a client store outage during client authentication, and hands
    /// the error back.
    pub fn reject(&self, request: &TokenRequest, error: AuthError, ctx: &RequestContext) -> AuthError {
        error!(
            client_id = ?request.client_id,
            grant_type = %request.grant_type,
            error = %error,
            "token request failed before dispatch"
        );
        self.audit_request(
            request,
            non_blank(&request.client_id),
            non_blank(&request.username).map(str::to_string),
            false,
            ctx,
        );
        error
    }

    fn audit_request(
        &self,
        request: &TokenRequest,
        client_id: Option<&str>,
        username: Option<String>,
        success: bool,
        ctx: &RequestContext,
    ) {
        self.audit.record(
            AuditEntry::new(AuditAction::TokenRequest, self.clock.now())
                .client_id(client_id)
                .username(username)
                .scope(non_blank(&request.scope))
                .ip_address(ctx.ip_address.as_deref())
                .success(success),
        );
    }

    async fn execute(&self, request: &TokenRequest, client: Option<&Client>) -> AuthResult<Issued> {
        let grant_type = match validate_request(request)? {
            RequestedGrant::UmaTicket => {
                let issuer = self
                    .rpt_issuer
                    .as_ref()
                    .ok_or_else(|| AuthError::invalid_request("UMA ticket exchange is not enabled"))?;
                let response = issuer.issue(request, client).await?;
                return Ok(Issued {
                    response,
                    username: None,
                });
            }
            RequestedGrant::Standard(grant_type) => grant_type,
        };

        if !self.config.grant_types_supported.contains(&grant_type) {
            return Err(AuthError::unsupported_grant_type(grant_type.as_str()));
        }

        match grant_type {
            GrantType::AuthorizationCode => self.exchange_code(request, client).await,
            GrantType::RefreshToken => self.refresh(request, client).await,
            GrantType::ClientCredentials => self.client_credentials(request, client).await,
            GrantType::Password => self.password(request, client).await,
        }
    }

    // =========================================================================
    // Grant flows
    // =========================================================================

    async fn exchange_code(
        &self,
        request: &TokenRequest,
        client: Option<&Client>,
    ) -> AuthResult<Issued> {
        let client = eligible(client, GrantType::AuthorizationCode).map_err(|e| match e {
            Ineligible::Missing => AuthError::invalid_grant("client authentication failed"),
            Ineligible::Unsupported => {
                AuthError::invalid_grant("client is not allowed to use the authorization_code grant")
            }
        })?;
        let code = non_blank(&request.code)
            .ok_or_else(|| AuthError::invalid_request("code is required"))?;

        let code_hash = hash_token(code);
        let now = self.clock.now();

        let record = self
            .grants
            .find(&code_hash)
            .await?
            .filter(|r| r.is_live_for(TokenKind::AuthorizationCode, &client.client_id, now));
        let Some(record) = record else {
            self.purge_code(&code_hash, &client.client_id).await;
            return Err(AuthError::invalid_grant(
                "authorization code is invalid, expired or already used",
            ));
        };

        pkce::verify(
            record.grant.code_challenge.as_deref(),
            record.grant.code_challenge_method.as_deref(),
            non_blank(&request.code_verifier),
        )
        .map_err(|e| {
            debug!(client_id = %client.client_id, error = %e, "PKCE verification failed");
            AuthError::invalid_grant_unauthorized(e.to_string())
        })?;

        if !self.grants.remove_by_code(&code_hash, &client.client_id).await? {
            self.purge_code(&code_hash, &client.client_id).await;
            return Err(AuthError::invalid_grant("authorization code was already used"));
        }

        let mut grant = record.grant;
        grant.scopes = narrow_scopes(non_blank(&request.scope), &grant.scopes);
        grant.authorization_code = Some(code_hash);

        let response = self.mint(&grant, true, now).await?;
        Ok(Issued {
            response,
            username: grant.username().map(str::to_string),
        })
    }

    async fn refresh(&self, request: &TokenRequest, client: Option<&Client>) -> AuthResult<Issued> {
        let client = eligible(client, GrantType::RefreshToken).map_err(|e| match e {
            Ineligible::Missing => {
                AuthError::invalid_grant_unauthorized("client authentication failed")
            }
            Ineligible::Unsupported => {
                AuthError::invalid_grant("client is not allowed to use the refresh_token grant")
            }
        })?;
        let token = non_blank(&request.refresh_token)
            .ok_or_else(|| AuthError::invalid_request("refresh_token is required"))?;

        let token_hash = hash_token(token);
        let now = self.clock.now();

        let record = self
            .grants
            .find(&token_hash)
            .await?
            .filter(|r| r.is_live_for(TokenKind::RefreshToken, &client.client_id, now))
            .ok_or_else(|| {
                AuthError::invalid_grant_unauthorized("refresh token is invalid or expired")
            })?;

        let scopes = narrow_scopes(non_blank(&request.scope), &record.scopes);

        if !self.grants.remove_by_code(&token_hash, &client.client_id).await? {
            return Err(AuthError::invalid_grant_unauthorized(
                "refresh token was already used",
            ));
        }

        let mut grant = record.grant;
        grant.scopes = scopes;

        let response = self.mint(&grant, true, now).await?;
        Ok(Issued {
            response,
            username: grant.username().map(str::to_string),
        })
    }

    async fn client_credentials(
        &self,
        request: &TokenRequest,
        client: Option<&Client>,
    ) -> AuthResult<Issued> {
        let client = eligible(client, GrantType::ClientCredentials)
            .and_then(|c| {
                if c.is_confidential() {
                    Ok(c)
                } else {
                    Err(Ineligible::Missing)
                }
            })
            .map_err(|e| match e {
                Ineligible::Missing => {
                    AuthError::invalid_grant_unauthorized("client authentication failed")
                }
                Ineligible::Unsupported => AuthError::invalid_grant(
                    "client is not allowed to use the client_credentials grant",
                ),
            })?;

        let grant = AuthorizationGrant::new(GrantType::ClientCredentials, &client.client_id)
            .with_scopes(client_scopes(client, non_blank(&request.scope)));

        let response = self.mint(&grant, false, self.clock.now()).await?;
        Ok(Issued {
            response,
            username: None,
        })
    }

    async fn password(&self, request: &TokenRequest, client: Option<&Client>) -> AuthResult<Issued> {
        let client = eligible(client, GrantType::Password).map_err(|e| match e {
            Ineligible::Missing => AuthError::invalid_client("client authentication failed"),
            Ineligible::Unsupported => {
                AuthError::invalid_client("client is not allowed to use the password grant")
            }
        })?;
        let username = non_blank(&request.username)
            .ok_or_else(|| AuthError::invalid_request("username is required"))?;
        let password = request
            .password
            .as_deref()
            .ok_or_else(|| AuthError::invalid_request("password is required"))?;

        let user = self
            .resolve_user(client, username, password)
            .await?
            .ok_or_else(|| AuthError::invalid_client("invalid resource owner credentials"))?;

        let now = self.clock.now();
        let mut grant = AuthorizationGrant::new(GrantType::Password, &client.client_id)
            .with_user(user)
            .with_scopes(client_scopes(client, non_blank(&request.scope)));
        grant.auth_time = Some(now);

        let response = self.mint(&grant, true, now).await?;
        Ok(Issued {
            response,
            username: grant.username().map(str::to_string),
        })
    }

    async fn resolve_user(
        &self,
        client: &Client,
        username: &str,
        password: &str,
    ) -> AuthResult<Option<ResourceOwner>> {
        if let Some(filter) = &self.filter {
            if let Some(user) = filter.resolve_user(client, username, password).await? {
                debug!(client_id = %client.client_id, username = %username, "user resolved by filter");
                return Ok(Some(user));
            }
        }
        self.users.authenticate(username, password).await
    }

    // =========================================================================
    // Minting
    // =========================================================================

    async fn mint(
        &self,
        grant: &AuthorizationGrant,
        with_refresh: bool,
        now: OffsetDateTime,
    ) -> AuthResult<TokenResponse> {
        let access_token = generate_token();
        self.grants
            .put(&TokenRecord::new(
                &access_token,
                TokenKind::AccessToken,
                grant.clone(),
                now,
                self.config.access_token_lifetime,
            ))
            .await?;

        let mut response = TokenResponse::bearer(access_token)
            .with_expires_in(self.config.access_token_lifetime.as_secs())
            .with_scope(grant.scope_string());

        if with_refresh {
            let refresh_token = generate_token();
            self.grants
                .put(&TokenRecord::new(
                    &refresh_token,
                    TokenKind::RefreshToken,
                    grant.clone(),
                    now,
                    self.config.refresh_token_lifetime,
                ))
                .await?;
            response = response.with_refresh_token(refresh_token);
        }

        if grant.is_openid() {
            let id_token = self.sign_id_token(grant, now)?;
            self.grants
                .put(&TokenRecord::new(
                    &id_token,
                    TokenKind::IdToken,
                    grant.clone(),
                    now,
                    self.config.id_token_lifetime,
                ))
                .await?;
            response = response.with_id_token(id_token);
        }

        debug!(
            client_id = %grant.client_id,
            grant_type = %grant.grant_type,
            scope = %grant.scope_string(),
            refresh = response.refresh_token.is_some(),
            id_token = response.id_token.is_some(),
            "tokens issued"
        );
        Ok(response)
    }

    fn sign_id_token(&self, grant: &AuthorizationGrant, now: OffsetDateTime) -> AuthResult<String> {
        let extra = match (&grant.user, self.config.legacy_id_token_claims) {
            (Some(user), true) => user.claims.clone(),
            _ => BTreeMap::new(),
        };
        let claims = IdTokenClaims {
            iss: self.issuer.clone(),
            sub: grant
                .user
                .as_ref()
                .map_or_else(|| grant.client_id.clone(), |u| u.id.clone()),
            aud: grant.client_id.clone(),
            exp: (now + self.config.id_token_lifetime).unix_timestamp(),
            iat: now.unix_timestamp(),
            auth_time: grant.auth_time.map(OffsetDateTime::unix_timestamp),
            nonce: grant.nonce.clone(),
            acr: grant.acr.clone(),
            sid: grant.session_id.clone(),
            extra,
        };
        let claims = serde_json::to_value(&claims)
            .map_err(|e| AuthError::internal(format!("failed to serialize ID token claims: {e}")))?;
        self.signer.sign(&claims)
    }

    async fn purge_code(&self, code_hash: &str, client_id: &str) {
        match self.grants.remove_all_by_authorization_code(code_hash).await {
            Ok(removed) => warn!(
                client_id = %client_id,
                removed,
                "invalid or replayed authorization code, revoked tokens issued from it"
            ),
            Err(e) => error!(
                client_id = %client_id,
                error = %e,
                "failed to revoke tokens issued from replayed authorization code"
            ),
        }
    }
}

fn eligible(client: Option<&Client>, grant_type: GrantType) -> Result<&Client, Ineligible> {
    match client {
        Some(client) if client.active => {
            if client.supports_grant(grant_type) {
                Ok(client)
            } else {
                Err(Ineligible::Unsupported)
            }
        }
        _ => Err(Ineligible::Missing),
    }
}

/// Intersects the requested scope with what the grant authorized.
/// No request keeps the authorized set.
fn narrow_scopes(requested: Option<&str>, authorized: &BTreeSet<String>) -> BTreeSet<String> {
    match requested {
        Some(requested) => parse_scopes(requested)
            .into_iter()
            .filter(|s| authorized.contains(s))
            .collect(),
        None => authorized.clone(),
    }
}

/// Requested scopes the client may use. No request yields the client's full set.
fn client_scopes(client: &Client, requested: Option<&str>) -> BTreeSet<String> {
    match requested {
        Some(requested) => parse_scopes(requested)
            .into_iter()
            .filter(|s| client.is_scope_allowed(s))
            .collect(),
        None => client.scopes.iter().cloned().collect(),
    }
}
