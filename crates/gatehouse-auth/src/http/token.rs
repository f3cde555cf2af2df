//! OAuth 2.0 token endpoint handler.
//!
//! ```text
//! POST /token
//! Content-Type: application/x-www-form-urlencoded
//! Authorization: Basic <base64(client_id:client_secret)>
//!
//! grant_type=client_credentials&scope=openid
//! ```
//!
//! Client authentication failures do not short-circuit here. The dispatcher
//! receives `None` and answers with the error its grant flow prescribes.
//! A client store failure is audited through the dispatcher and answered
//! with `server_error`.

use axum::{
    Form, Json,
    extract::State,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
};
use base64::Engine;
use tracing::{debug, warn};

use super::{AuthState, error_response, no_store, request_context};
use crate::error::AuthResult;
use crate::oauth::token::TokenRequest;
use crate::storage::ClientStore;
use crate::types::Client;

/// Handler for `POST /token`.
pub async fn token_handler(
    State(state): State<AuthState>,
    headers: HeaderMap,
    Form(request): Form<TokenRequest>,
) -> Response {
    debug!(
        grant_type = %request.grant_type,
        client_id = ?request.client_id,
        "processing token request"
    );

    let ctx = request_context(&headers);
    let auth = extract_client_auth(&headers, &request);

    let client = match authenticate_client(state.clients.as_ref(), auth).await {
        Ok(client) => client,
        Err(e) => return error_response(&state.dispatcher.reject(&request, e, &ctx)),
    };

    match state
        .dispatcher
        .dispatch(&request, client.as_ref(), &ctx)
        .await
    {
        Ok(response) => no_store((StatusCode::OK, Json(response)).into_response()),
        Err(e) => error_response(&e),
    }
}

/// Client authentication credentials extracted from the request.
#[derive(Debug, PartialEq, Eq)]
enum ClientAuth {
    /// HTTP Basic authentication.
    Basic {
        client_id: String,
        client_secret: String,
    },
    /// Client credentials in request body.
    Body {
        client_id: String,
        client_secret: String,
    },
    /// Public client (no secret).
    Public { client_id: String },
    /// No client credentials provided.
    None,
}

/// Extract client authentication from headers and request.
fn extract_client_auth(headers: &HeaderMap, request: &TokenRequest) -> ClientAuth {
    let basic = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        .and_then(|v| {
            base64::engine::general_purpose::STANDARD
                .decode(v.trim())
                .ok()
        })
        .and_then(|decoded| String::from_utf8(decoded).ok());
    if let Some((client_id, client_secret)) = basic.as_deref().and_then(|c| c.split_once(':')) {
        return ClientAuth::Basic {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        };
    }

    match (request.client_id.as_ref(), request.client_secret.as_ref()) {
        (Some(client_id), Some(client_secret)) => ClientAuth::Body {
            client_id: client_id.clone(),
            client_secret: client_secret.clone(),
        },
        (Some(client_id), None) => ClientAuth::Public {
            client_id: client_id.clone(),
        },
        _ => ClientAuth::None,
    }
}

/// Resolves the authenticated client.
///
/// Unknown clients, inactive clients and bad secrets yield `Ok(None)`.
/// Only store failures are returned as errors.
async fn authenticate_client(
    clients: &dyn ClientStore,
    auth: ClientAuth,
) -> AuthResult<Option<Client>> {
    let (client_id, secret) = match auth {
        ClientAuth::Basic {
            client_id,
            client_secret,
        }
        | ClientAuth::Body {
            client_id,
            client_secret,
        } => (client_id, Some(client_secret)),
        ClientAuth::Public { client_id } => (client_id, None),
        ClientAuth::None => {
            debug!("no client credentials provided");
            return Ok(None);
        }
    };

    let Some(client) = clients.find_by_client_id(&client_id).await? else {
        warn!(client_id = %client_id, "unknown client");
        return Ok(None);
    };

    if !client.active {
        warn!(client_id = %client_id, "client is inactive");
        return Ok(None);
    }

    if client.is_confidential() {
        let Some(secret) = secret else {
            warn!(client_id = %client_id, "client secret required for confidential client");
            return Ok(None);
        };
        if !clients.verify_secret(&client_id, &secret).await? {
            warn!(client_id = %client_id, "invalid client secret");
            return Ok(None);
        }
    }

    Ok(Some(client))
}
