//! Security audit records.
//!
//! Session creation, authentication and destruction, plus every token request,
//! produce exactly one [`AuditEntry`] handed to an [`AuditSink`].

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    /// A token endpoint request.
    TokenRequest,
    /// A session created before primary authentication.
    SessionUnauthenticated,
    /// A session that completed primary authentication.
    SessionAuthenticated,
    /// A session ended by logout.
    SessionDestroyed,
}

impl AuditAction {
    /// Stable action name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TokenRequest => "TOKEN_REQUEST",
            Self::SessionUnauthenticated => "SESSION_UNAUTHENTICATED",
            Self::SessionAuthenticated => "SESSION_AUTHENTICATED",
            Self::SessionDestroyed => "SESSION_DESTROYED",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// What happened.
    pub action: AuditAction,
    /// Client involved, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// End-user involved, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Requested or granted scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Session involved, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Caller address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    /// Outcome.
    pub success: bool,
    /// When the action completed.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl AuditEntry {
    /// Creates a successful entry for `action` at `timestamp`.
    #[must_use]
    pub fn new(action: AuditAction, timestamp: OffsetDateTime) -> Self {
        Self {
            action,
            client_id: None,
            username: None,
            scope: None,
            session_id: None,
            ip_address: None,
            success: true,
            timestamp,
        }
    }

    /// Sets the client id.
    #[must_use]
    pub fn client_id(mut self, client_id: Option<impl Into<String>>) -> Self {
        self.client_id = client_id.map(Into::into);
        self
    }

    /// Sets the username.
    #[must_use]
    pub fn username(mut self, username: Option<impl Into<String>>) -> Self {
        self.username = username.map(Into::into);
        self
    }

    /// Sets the scope.
    #[must_use]
    pub fn scope(mut self, scope: Option<impl Into<String>>) -> Self {
        self.scope = scope.map(Into::into);
        self
    }

    /// Sets the session id.
    #[must_use]
    pub fn session_id(mut self, session_id: Option<impl Into<String>>) -> Self {
        self.session_id = session_id.map(Into::into);
        self
    }

    /// Sets the caller address.
    #[must_use]
    pub fn ip_address(mut self, ip: Option<impl Into<String>>) -> Self {
        self.ip_address = ip.map(Into::into);
        self
    }

    /// Sets the outcome.
    #[must_use]
    pub fn success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }
}

/// Receives audit records.
pub trait AuditSink: Send + Sync {
    /// Records one entry. Must not fail the calling request.
    fn record(&self, entry: AuditEntry);
}

/// Sink that writes audit records to the `gatehouse::audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: AuditEntry) {
        tracing::info!(
            target: "gatehouse::audit",
            action = %entry.action,
            client_id = entry.client_id.as_deref().unwrap_or(""),
            username = entry.username.as_deref().unwrap_or(""),
            scope = entry.scope.as_deref().unwrap_or(""),
            session_id = entry.session_id.as_deref().unwrap_or(""),
            ip = entry.ip_address.as_deref().unwrap_or(""),
            success = entry.success,
            "audit"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_builder() {
        let entry = AuditEntry::new(AuditAction::TokenRequest, OffsetDateTime::UNIX_EPOCH)
            .client_id(Some("rp"))
            .username(None::<String>)
            .scope(Some("openid"))
            .success(false);
        assert_eq!(entry.client_id.as_deref(), Some("rp"));
        assert!(entry.username.is_none());
        assert!(!entry.success);

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["action"], "TOKEN_REQUEST");
        assert!(json.get("username").is_none());
    }

    #[test]
    fn test_tracing_sink_does_not_panic() {
        TracingAuditSink.record(AuditEntry::new(
            AuditAction::SessionDestroyed,
            OffsetDateTime::UNIX_EPOCH,
        ));
    }
}
