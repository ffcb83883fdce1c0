//! Configuration management for Slated

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub x: Option<XAppConfig>,
    pub threads: Option<ThreadsAppConfig>,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

/// OAuth app credentials for X (Twitter).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XAppConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

/// OAuth app credentials for Threads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadsAppConfig {
    pub app_id: String,
    pub app_secret: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Seconds between dispatch polls.
    pub poll_interval: u64,
    /// Maximum due items processed per poll.
    pub batch_limit: i64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: 60,
            batch_limit: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Seconds between token-refresh passes.
    pub interval: u64,
    /// Refresh credentials expiring within this many days.
    pub lookahead_days: i64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: 24 * 3600,
            lookahead_days: 7,
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/slated/slated.db".to_string(),
            },
            x: None,
            threads: None,
            dispatch: DispatchConfig::default(),
            refresh: RefreshConfig::default(),
        }
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("SLATED_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("slated").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [database]
            path = "/tmp/slated.db"

            [x]
            client_id = "cid"
            client_secret = "secret"
            redirect_uri = "https://app.example.com/oauth/x"

            [threads]
            app_id = "aid"
            app_secret = "asecret"
            redirect_uri = "https://app.example.com/oauth/threads"

            [dispatch]
            poll_interval = 30
            batch_limit = 10

            [refresh]
            interval = 3600
            lookahead_days = 3
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.database.path, "/tmp/slated.db");
        assert_eq!(config.x.as_ref().unwrap().client_id, "cid");
        assert_eq!(config.threads.as_ref().unwrap().app_id, "aid");
        assert_eq!(config.dispatch.poll_interval, 30);
        assert_eq!(config.dispatch.batch_limit, 10);
        assert_eq!(config.refresh.lookahead_days, 3);
    }

    #[test]
    #[serial_test::serial]
    fn test_env_var_overrides_config_path() {
        std::env::set_var("SLATED_CONFIG", "/tmp/custom-slated.toml");
        let path = resolve_config_path().unwrap();
        std::env::remove_var("SLATED_CONFIG");
        assert_eq!(path, PathBuf::from("/tmp/custom-slated.toml"));
    }

    #[test]
    fn test_parse_minimal_config_uses_defaults() {
        let toml = r#"
            [database]
            path = "/tmp/slated.db"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.x.is_none());
        assert!(config.threads.is_none());
        assert_eq!(config.dispatch.poll_interval, 60);
        assert_eq!(config.dispatch.batch_limit, 50);
        assert_eq!(config.refresh.lookahead_days, 7);
    }
}
