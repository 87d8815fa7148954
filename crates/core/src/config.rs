use config::{Config, ConfigError, Environment, File};
use secrecy::Secret;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub authority: AuthorityConfig,
    pub notifier: NotifierConfig,
    pub enforcement: EnforcementConfig,
    pub governance: GovernanceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthorityConfig {
    /// Identity recorded as creator of engine-generated infractions.
    pub admin_user: String,
    /// Period of the trigger sweep, and how long an untouched key stays in it.
    pub alert_update_interval_secs: u64,
    pub infraction_retention_days: u64,
    pub purge_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotifierConfig {
    pub connect_timeout_ms: u64,
    pub queue_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnforcementConfig {
    pub authority_url: String,
    pub policy_source: Option<String>,
    pub callback_host: String,
    pub callback_port: u16,
    pub principal_header: String,
    pub authority_timeout_ms: u64,
    pub flush_interval_secs: u64,
    pub username: Option<String>,
    pub password: Option<Secret<String>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GovernanceConfig {
    pub json_logs: bool,
    pub enable_metrics: bool,
}

impl AppConfig {
    /// Load from `./config`, then `WARDEN__*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load `default`, `{WARDEN_ENV}` and `local` from `dir`. Only `default`
    /// is required. Any parse or type error fails the whole load.
    pub fn load_from(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let dir = dir.as_ref();
        let env = std::env::var("WARDEN_ENV").unwrap_or_else(|_| "development".into());
        let layer = |name: &str| dir.join(name).to_string_lossy().into_owned();

        let s = Config::builder()
            .add_source(File::with_name(&layer("default")))
            .add_source(File::with_name(&layer(&env)).required(false))
            .add_source(File::with_name(&layer("local")).required(false))
            // Map WARDEN__SERVER__PORT=3000 to server.port
            .add_source(Environment::with_prefix("WARDEN").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".into(),
                port: 8080,
            },
            authority: AuthorityConfig {
                admin_user: "admin".into(),
                alert_update_interval_secs: 15 * 60,
                infraction_retention_days: 30,
                purge_interval_secs: 24 * 60 * 60,
            },
            notifier: NotifierConfig {
                connect_timeout_ms: 5000,
                queue_capacity: 1024,
            },
            enforcement: EnforcementConfig {
                authority_url: "http://127.0.0.1:8080".into(),
                policy_source: None,
                callback_host: "127.0.0.1".into(),
                callback_port: 9080,
                principal_header: "x-warden-user".into(),
                authority_timeout_ms: 2000,
                flush_interval_secs: 60,
                username: None,
                password: None,
            },
            governance: GovernanceConfig {
                json_logs: false,
                enable_metrics: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT: &str = include_str!("../../../config/default.toml");

    fn dir_with(default: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("default.toml"), default).unwrap();
        dir
    }

    #[test]
    fn test_load_shipped_defaults() {
        let dir = dir_with(DEFAULT);
        let config = AppConfig::load_from(dir.path()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.authority.admin_user, "admin");
        assert_eq!(config.enforcement.authority_timeout_ms, 2000);
    }

    #[test]
    fn test_missing_default_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AppConfig::load_from(dir.path()).is_err());
    }

    #[test]
    fn test_malformed_file_fails() {
        let dir = dir_with("[server\nhost = ");
        assert!(AppConfig::load_from(dir.path()).is_err());
    }

    #[test]
    fn test_wrong_type_fails() {
        let dir = dir_with(&DEFAULT.replace("port = 8080", "port = \"eighty\""));
        assert!(AppConfig::load_from(dir.path()).is_err());
    }
}
