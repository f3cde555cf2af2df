//! Session entity and its attribute map.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Attribute holding the ACR the session authenticated with.
pub const ACR: &str = "acr";
/// Attribute holding the requested ACR values.
pub const ACR_VALUES: &str = "acr_values";
/// Attribute holding the current authentication step.
pub const AUTH_STEP: &str = "auth_step";
/// Prefix of per-step completion markers (`auth_step_passed_<n>`).
pub const AUTH_STEP_PASSED_PREFIX: &str = "auth_step_passed_";
/// Attribute holding the space-delimited `prompt` parameter.
pub const PROMPT: &str = "prompt";
/// Attribute holding deployment-defined state exposed by the status endpoint.
pub const CUSTOM_STATE: &str = "session_custom_state";
/// Marker set when the login flow is re-initialized.
pub const REINIT_LOGIN: &str = "c";

/// Authorization request parameters that may be copied into a session.
pub const ALLOWED_PARAMETERS: &[&str] = &[
    "scope",
    "response_type",
    "client_id",
    "redirect_uri",
    "state",
    "response_mode",
    "nonce",
    "display",
    "prompt",
    "max_age",
    "ui_locales",
    "id_token_hint",
    "login_hint",
    "acr_values",
    "amr_values",
    "session_state",
    "request",
    "request_uri",
    "code_challenge",
    "code_challenge_method",
    "claims",
    "custom_response_headers",
    AUTH_STEP,
];

/// Keeps only the allowed authorization request parameters.
#[must_use]
pub fn allowed_parameters<'a, I>(params: I) -> IndexMap<String, String>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    params
        .into_iter()
        .filter(|(k, _)| ALLOWED_PARAMETERS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Created on first contact, before primary authentication completes.
    Unauthenticated,
    /// Primary authentication succeeded.
    Authenticated,
}

impl SessionState {
    /// Wire value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticated => "authenticated",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered string map carried by a session.
///
/// Deployments may store arbitrary keys. Keys the engine relies on have
/// dedicated accessors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionAttributes(IndexMap<String, String>);

impl SessionAttributes {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the raw value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Inserts or replaces a value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Removes a value, keeping the order of the remaining entries.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.shift_remove(key)
    }

    /// Returns `true` when no attribute is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Recorded ACR: the `acr` attribute, else `acr_values`. Blank values are ignored.
    #[must_use]
    pub fn acr(&self) -> Option<&str> {
        self.non_blank(ACR).or_else(|| self.non_blank(ACR_VALUES))
    }

    /// Current authentication step. Missing or unparsable values read as 1.
    #[must_use]
    pub fn auth_step(&self) -> u32 {
        self.get(AUTH_STEP)
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(1)
    }

    /// Sets the current authentication step.
    pub fn set_auth_step(&mut self, step: u32) {
        self.insert(AUTH_STEP, step.to_string());
    }

    /// Records that step `n` completed.
    pub fn mark_step_passed(&mut self, n: u32) {
        self.insert(step_passed_key(n), "true");
    }

    /// Returns `true` if step `n` completed.
    #[must_use]
    pub fn is_step_passed(&self, n: u32) -> bool {
        self.get(&step_passed_key(n)) == Some("true")
    }

    /// Clears the completion marker for step `n`.
    pub fn clear_step_passed(&mut self, n: u32) {
        self.remove(&step_passed_key(n));
    }

    /// Clears every step completion marker.
    pub fn clear_all_steps_passed(&mut self) {
        self.0.retain(|k, _| !k.starts_with(AUTH_STEP_PASSED_PREFIX));
    }

    /// Individual `prompt` values.
    #[must_use]
    pub fn prompts(&self) -> Vec<&str> {
        self.get(PROMPT)
            .map(|p| p.split_whitespace().collect())
            .unwrap_or_default()
    }

    /// Returns `true` when the request carried `prompt=none`.
    #[must_use]
    pub fn has_prompt_none(&self) -> bool {
        self.prompts().contains(&"none")
    }

    /// Deployment-defined custom state.
    #[must_use]
    pub fn custom_state(&self) -> Option<&str> {
        self.get(CUSTOM_STATE)
    }

    /// Sets the deployment-defined custom state.
    pub fn set_custom_state(&mut self, value: impl Into<String>) {
        self.insert(CUSTOM_STATE, value);
    }

    /// Flags the login flow as re-initialized.
    pub fn set_reinit_marker(&mut self) {
        self.insert(REINIT_LOGIN, "1");
    }

    /// Returns `true` once the login flow was re-initialized.
    #[must_use]
    pub fn is_reinitialized(&self) -> bool {
        self.get(REINIT_LOGIN) == Some("1")
    }

    /// Copies request parameters in, except `auth_step`.
    pub fn merge_request(&mut self, params: &IndexMap<String, String>) {
        for (k, v) in params {
            if k != AUTH_STEP {
                self.insert(k.clone(), v.clone());
            }
        }
    }

    fn non_blank(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.trim().is_empty())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SessionAttributes {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

fn step_passed_key(n: u32) -> String {
    format!("{AUTH_STEP_PASSED_PREFIX}{n}")
}

/// A browser session with the authorization server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque identifier, also the cookie value.
    pub id: String,

    /// Lifecycle state.
    pub state: SessionState,

    /// Authenticated user. Always set for `Authenticated` sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_ref: Option<String>,

    /// When primary authentication completed.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub authentication_time: Option<OffsetDateTime>,

    /// Last time the session was touched.
    #[serde(with = "time::serde::rfc3339")]
    pub last_used_at: OffsetDateTime,

    /// Request and flow attributes.
    #[serde(default)]
    pub attributes: SessionAttributes,

    /// Whether the user approved the last consent screen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_granted: Option<bool>,

    /// Consent decisions per client.
    #[serde(default)]
    pub permission_granted_map: BTreeMap<String, bool>,

    /// Clients that took part in this session.
    #[serde(default)]
    pub involved_clients: BTreeMap<String, bool>,

    /// Signed claim-set representation, when enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt: Option<String>,

    /// Whether the session has been written to the store.
    #[serde(skip)]
    pub persisted: bool,
}

impl Session {
    /// Returns `true` for authenticated sessions.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    /// Records a consent decision for `client_id`.
    pub fn set_permission(&mut self, client_id: impl Into<String>, granted: bool) {
        let client_id = client_id.into();
        self.involved_clients.insert(client_id.clone(), true);
        self.permission_granted_map.insert(client_id, granted);
    }

    /// Client ids the user granted permission to, in map order.
    pub fn granted_client_ids(&self) -> impl Iterator<Item = &str> {
        self.permission_granted_map
            .iter()
            .filter(|(_, granted)| **granted)
            .map(|(id, _)| id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acr_prefers_explicit_claim() {
        let attrs: SessionAttributes = [("acr_values", "otp"), ("acr", "pwd")].into_iter().collect();
        assert_eq!(attrs.acr(), Some("pwd"));

        let attrs: SessionAttributes = [("acr", "  "), ("acr_values", "otp")].into_iter().collect();
        assert_eq!(attrs.acr(), Some("otp"));

        assert_eq!(SessionAttributes::new().acr(), None);
    }

    #[test]
    fn test_auth_step_defaults_to_one() {
        let mut attrs = SessionAttributes::new();
        assert_eq!(attrs.auth_step(), 1);
        attrs.insert(AUTH_STEP, "garbage");
        assert_eq!(attrs.auth_step(), 1);
        attrs.set_auth_step(3);
        assert_eq!(attrs.auth_step(), 3);
    }

    #[test]
    fn test_step_markers() {
        let mut attrs = SessionAttributes::new();
        attrs.insert("acr", "pwd");
        attrs.mark_step_passed(1);
        attrs.mark_step_passed(2);
        assert!(attrs.is_step_passed(2));

        attrs.clear_step_passed(2);
        assert!(!attrs.is_step_passed(2));
        assert!(attrs.is_step_passed(1));

        attrs.clear_all_steps_passed();
        assert!(!attrs.is_step_passed(1));
        assert_eq!(attrs.len(), 1);
    }

    #[test]
    fn test_prompt_none() {
        let attrs: SessionAttributes = [("prompt", "login none")].into_iter().collect();
        assert!(attrs.has_prompt_none());
        let attrs: SessionAttributes = [("prompt", "consent")].into_iter().collect();
        assert!(!attrs.has_prompt_none());
    }

    #[test]
    fn test_merge_request_skips_auth_step() {
        let mut attrs: SessionAttributes = [("auth_step", "2"), ("scope", "openid")].into_iter().collect();
        let mut params = IndexMap::new();
        params.insert("auth_step".to_string(), "5".to_string());
        params.insert("scope".to_string(), "openid email".to_string());
        attrs.merge_request(&params);
        assert_eq!(attrs.get("auth_step"), Some("2"));
        assert_eq!(attrs.get("scope"), Some("openid email"));
    }

    #[test]
    fn test_allowed_parameters_filter() {
        let mut raw = std::collections::HashMap::new();
        raw.insert("scope".to_string(), "openid".to_string());
        raw.insert("password".to_string(), "secret".to_string());
        let allowed = allowed_parameters(&raw);
        assert_eq!(allowed.len(), 1);
        assert!(allowed.contains_key("scope"));
    }

    #[test]
    fn test_granted_client_ids() {
        let mut session = Session {
            id: "s".into(),
            state: SessionState::Authenticated,
            user_ref: Some("u".into()),
            authentication_time: None,
            last_used_at: OffsetDateTime::UNIX_EPOCH,
            attributes: SessionAttributes::new(),
            permission_granted: None,
            permission_granted_map: BTreeMap::new(),
            involved_clients: BTreeMap::new(),
            jwt: None,
            persisted: false,
        };
        session.set_permission("b", true);
        session.set_permission("a", false);
        session.set_permission("c", true);
        assert_eq!(session.granted_client_ids().collect::<Vec<_>>(), ["b", "c"]);
        assert_eq!(session.involved_clients.len(), 3);
    }

    #[test]
    fn test_session_json_skips_persisted_flag() {
        let session = Session {
            id: "s".into(),
            state: SessionState::Unauthenticated,
            user_ref: None,
            authentication_time: None,
            last_used_at: OffsetDateTime::UNIX_EPOCH,
            attributes: SessionAttributes::new(),
            permission_granted: None,
            permission_granted_map: BTreeMap::new(),
            involved_clients: BTreeMap::new(),
            jwt: None,
            persisted: true,
        };
        let json = serde_json::to_value(&session).unwrap();
        assert!(json.get("persisted").is_none());
        assert_eq!(json["state"], "unauthenticated");
        let back: Session = serde_json::from_value(json).unwrap();
        assert!(!back.persisted);
    }
}
