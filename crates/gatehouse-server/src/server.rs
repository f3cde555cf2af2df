use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use axum::{Router, http::StatusCode, routing::get};
use tower_http::trace::TraceLayer;

use gatehouse_auth::credentials::hash_secret;
use gatehouse_auth::oauth::{EndSessionCoordinator, GrantDispatcher};
use gatehouse_auth::session::{SessionService, StaticAcrLevels};
use gatehouse_auth::storage::memory::{
    MemoryClientStore, MemoryGrantStore, MemorySessionStore, MemoryUserStore,
};
use gatehouse_auth::token::JwtSigner;
use gatehouse_auth::{AuthState, router};

use crate::config::AppConfig;

pub struct GatehouseServer {
    addr: SocketAddr,
    app: Router,
}

/// Wires the protocol core onto the in-memory adapters and seeds clients and
/// users from configuration.
pub fn build_state(cfg: &AppConfig) -> anyhow::Result<AuthState> {
    let signer = Arc::new(JwtSigner::from_config(&cfg.auth.signing).context("token signer")?);

    let clients = Arc::new(MemoryClientStore::new());
    for seed in &cfg.clients {
        let mut client = seed.client.clone();
        if let Some(secret) = seed.secret.as_deref() {
            client.client_secret = Some(
                hash_secret(secret)
                    .map_err(|e| anyhow!("hashing secret of client {}: {e}", client.client_id))?,
            );
        }
        tracing::debug!(client_id = %client.client_id, "registered client");
        clients.insert(client);
    }

    let users = Arc::new(MemoryUserStore::new());
    for seed in &cfg.users {
        let hash = hash_secret(&seed.password)
            .map_err(|e| anyhow!("hashing password of user {}: {e}", seed.username))?;
        users.insert(seed.owner(), hash);
    }

    let acr_levels: StaticAcrLevels = cfg
        .acr_levels
        .iter()
        .map(|(acr, level)| (acr.clone(), *level))
        .collect();

    let grants = Arc::new(MemoryGrantStore::new());
    let sessions = Arc::new(
        SessionService::new(
            Arc::new(MemorySessionStore::new()),
            Arc::new(acr_levels),
            cfg.auth.session.clone(),
        )
        .with_signer(signer.clone())
        .with_cookie_config(cfg.auth.cookie.clone()),
    );
    let dispatcher = Arc::new(GrantDispatcher::new(
        grants.clone(),
        users,
        signer,
        cfg.auth.token.clone(),
        cfg.auth.issuer.clone(),
    ));
    let end_session = Arc::new(EndSessionCoordinator::new(
        grants,
        clients.clone(),
        sessions.clone(),
        cfg.auth.end_session.clone(),
    ));

    tracing::info!(
        clients = cfg.clients.len(),
        users = cfg.users.len(),
        acr_levels = cfg.acr_levels.len(),
        "protocol core initialized"
    );

    Ok(AuthState {
        dispatcher,
        end_session,
        sessions,
        clients,
    })
}

pub fn build_app(cfg: &AppConfig, state: AuthState) -> Router {
    let body_limit = cfg.server.body_limit_bytes;
    Router::new()
        .route("/healthz", get(healthz))
        .merge(router(state))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri().path(),
                        http.status_code = tracing::field::Empty,
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

pub struct ServerBuilder {
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    pub fn build(self) -> anyhow::Result<GatehouseServer> {
        let state = build_state(&self.config)?;
        Ok(GatehouseServer {
            addr: self.config.addr(),
            app: build_app(&self.config, state),
        })
    }
}

impl GatehouseServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientSeed, UserSeed};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use gatehouse_auth::types::{Client, GrantType};
    use tower::ServiceExt;

    fn test_config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.auth.signing.secret = Some("server-test-secret".into());
        cfg.clients.push(ClientSeed {
            client: Client::new("cli")
                .with_grant_types([GrantType::Password])
                .with_scopes(["openid"]),
            secret: Some("cli-secret".into()),
        });
        cfg.users.push(UserSeed {
            id: Some("u-1".into()),
            username: "alice".into(),
            password: "wonderland".into(),
            claims: Default::default(),
        });
        cfg
    }

    fn app(cfg: &AppConfig) -> Router {
        build_app(cfg, build_state(cfg).unwrap())
    }

    #[tokio::test]
    async fn test_healthz() {
        let response = app(&test_config())
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_password_grant_with_seeded_client_and_user() {
        let response = app(&test_config())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/token")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from(
                        "grant_type=password&client_id=cli&client_secret=cli-secret\
                         &username=alice&password=wonderland&scope=openid",
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["token_type"], "Bearer");
        assert!(json["id_token"].is_string());
    }

    #[test]
    fn test_build_state_requires_signing_key() {
        let cfg = AppConfig::default();
        assert!(build_state(&cfg).is_err());
    }
}
