use gatehouse_auth::config::AuthConfig;
use gatehouse_auth::types::{Client, ResourceOwner};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Protocol core configuration
    #[serde(default)]
    pub auth: AuthConfig,
    /// ACR label to numeric strength. Higher is stronger.
    #[serde(default)]
    pub acr_levels: HashMap<String, i32>,
    /// Clients registered at startup
    #[serde(default)]
    pub clients: Vec<ClientSeed>,
    /// Users registered at startup
    #[serde(default)]
    pub users: Vec<UserSeed>,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        self.auth.validate().map_err(|e| format!("auth: {e}"))?;
        for seed in &self.clients {
            if seed.client.client_id.is_empty() {
                return Err("clients[].client_id cannot be empty".into());
            }
        }
        for seed in &self.users {
            if seed.username.is_empty() || seed.password.is_empty() {
                return Err("users[] require username and password".into());
            }
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        let ip: std::net::IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(std::net::IpAddr::from([0, 0, 0, 0]));
        SocketAddr::from((ip, self.server.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_body_limit() -> usize {
    64 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Client registration loaded from configuration.
///
/// `secret` is plain text and hashed at startup. A pre-hashed Argon2 value
/// may be given as `client_secret` instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSeed {
    #[serde(flatten)]
    pub client: Client,
    #[serde(default, skip_serializing)]
    pub secret: Option<String>,
}

/// Resource owner loaded from configuration.
///
/// Prefer `GATEHOUSE__USERS__0__PASSWORD` over a plain-text password in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSeed {
    /// Stable identifier. Defaults to the username.
    #[serde(default)]
    pub id: Option<String>,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    #[serde(default)]
    pub claims: BTreeMap<String, serde_json::Value>,
}

impl UserSeed {
    pub fn owner(&self) -> ResourceOwner {
        let mut owner = ResourceOwner::new(
            self.id.clone().unwrap_or_else(|| self.username.clone()),
            self.username.clone(),
        );
        owner.claims = self.claims.clone();
        owner
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_PATH: &str = "gatehouse.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        } else if path.is_some() {
            return Err(format!("config file not found: {}", pathbuf.display()));
        }
        // Environment variable overrides, e.g., GATEHOUSE__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("GATEHOUSE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::loader::load_config;
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_full_config() {
        let file = write_config(
            r#"
[server]
port = 9191

[logging]
level = "debug"

[auth]
issuer = "https://idp.example.com"

[auth.session]
unused_lifetime = -1
session_lifetime = "8h"

[auth.signing]
algorithm = "HS256"
secret = "file-secret"

[acr_levels]
password = 10
otp = 20

[[clients]]
client_id = "rp"
secret = "rp-secret"
grant_types = ["authorization_code", "refresh_token"]
scopes = ["openid", "profile"]
frontchannel_logout_uris = ["https://rp.example.com/logout"]

[[users]]
username = "alice"
password = "wonderland"
"#,
        );

        let cfg = load_config(file.path().to_str()).unwrap();
        assert_eq!(cfg.server.port, 9191);
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.auth.issuer, "https://idp.example.com");
        assert_eq!(cfg.auth.session.unused_lifetime, -1);
        assert_eq!(
            cfg.auth.session.session_lifetime,
            std::time::Duration::from_secs(8 * 3600)
        );
        assert_eq!(cfg.acr_levels.get("otp"), Some(&20));

        assert_eq!(cfg.clients.len(), 1);
        let seed = &cfg.clients[0];
        assert_eq!(seed.client.client_id, "rp");
        assert_eq!(seed.secret.as_deref(), Some("rp-secret"));
        assert!(seed.client.active);
        assert_eq!(seed.client.frontchannel_logout_uris.len(), 1);

        let owner = cfg.users[0].owner();
        assert_eq!(owner.id, "alice");
        assert_eq!(owner.username, "alice");
    }

    #[test]
    fn test_missing_signing_secret_is_rejected() {
        let file = write_config(
            r#"
[auth]
issuer = "https://idp.example.com"
"#,
        );
        let err = load_config(file.path().to_str()).unwrap_err();
        assert!(err.contains("signing.secret"), "{err}");
    }

    #[test]
    fn test_invalid_log_level() {
        let mut cfg = AppConfig::default();
        cfg.auth.signing.secret = Some("s".into());
        assert!(cfg.validate().is_ok());

        cfg.logging.level = "loud".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_missing_explicit_path() {
        let err = load_config(Some("/nonexistent/gatehouse.toml")).unwrap_err();
        assert!(err.contains("not found"));
    }
}
