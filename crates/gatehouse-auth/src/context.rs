//! Per-request values passed explicitly into core operations.

/// Caller details recorded in audit entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Client address, usually the first `X-Forwarded-For` hop.
    pub ip_address: Option<String>,
}

impl RequestContext {
    /// Creates a context for `ip`.
    #[must_use]
    pub fn with_ip(ip: impl Into<String>) -> Self {
        Self {
            ip_address: Some(ip.into()),
        }
    }
}
