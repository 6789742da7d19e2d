//! Configuration management for the report server
//!
//! TOML file with serde defaults for every field, environment variable
//! overrides on top, and a `validate` pass before anything starts.
//!
//! Lookup order: the file named by `REPORTS_CONFIG`, then `./reports.toml`,
//! then built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::Role;
use crate::error::{Error, Result};
use crate::report::EngineConfig;
use crate::types::Id;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "REPORTS_CONFIG";

/// Config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "reports.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ApplicationConfig {
    /// HTTP server
    #[serde(default)]
    pub server: ServerConfig,

    /// Engine limits
    #[serde(default)]
    pub engine: EngineSection,

    /// Dataset source
    #[serde(default)]
    pub data: DataConfig,

    /// Caller identity
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Log filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Allowed CORS origins; empty allows any
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

/// Engine limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineSection {
    /// Concurrent store calls per request
    #[serde(default = "default_max_concurrent_queries")]
    pub max_concurrent_queries: usize,

    /// Deadline for each store call in milliseconds
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Drill-down page size when the caller sends none
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    /// Largest drill-down page
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
}

/// Dataset source
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DataConfig {
    /// JSON dataset to serve
    #[serde(default)]
    pub fixture_path: Option<PathBuf>,

    /// Serve the generated demo dataset when no fixture is set
    #[serde(default = "default_true")]
    pub seed_demo: bool,
}

/// Caller identity
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Requests without a token act as an anonymous project-level user
    #[serde(default)]
    pub allow_anonymous: bool,

    /// Known bearer tokens
    #[serde(default)]
    pub tokens: Vec<TokenEntry>,
}

/// One bearer token
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenEntry {
    /// Token value
    pub token: String,
    /// User the token belongs to
    pub user_id: Id,
    /// Role granted
    pub role: Role,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_concurrent_queries() -> usize {
    8
}
fn default_query_timeout_ms() -> u64 {
    30_000
}
fn default_page_size() -> usize {
    50
}
fn default_max_page_size() -> usize {
    500
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            log_level: default_log_level(),
            cors_allowed_origins: Vec::new(),
        }
    }
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_concurrent_queries: default_max_concurrent_queries(),
            query_timeout_ms: default_query_timeout_ms(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            fixture_path: None,
            seed_demo: default_true(),
        }
    }
}

impl EngineSection {
    /// Engine config for these limits
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::new()
            .with_concurrency(self.max_concurrent_queries)
            .with_timeout(Duration::from_millis(self.query_timeout_ms))
            .with_page_sizes(self.default_page_size, self.max_page_size)
    }
}

impl ApplicationConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml(&contents)
            .map_err(|e| Error::Configuration(format!("{}: {}", path.display(), e)))
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| Error::Configuration(format!("Failed to parse config: {}", e)))
    }

    /// Load following the lookup order, then apply environment overrides
    ///
    /// Returns the config and the file it came from, if any.
    pub fn load() -> Result<(Self, Option<PathBuf>)> {
        let (mut config, source) = match std::env::var(CONFIG_ENV) {
            Ok(path) => {
                let path = PathBuf::from(path);
                (Self::from_file(&path)?, Some(path))
            }
            Err(_) => {
                let path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    (Self::from_file(&path)?, Some(path))
                } else {
                    (Self::default(), None)
                }
            }
        };
        config.apply_env_overrides();
        Ok((config, source))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("REPORTS_LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }
        if let Some(timeout) = lookup("REPORTS_QUERY_TIMEOUT_MS") {
            match timeout.parse() {
                Ok(ms) => self.engine.query_timeout_ms = ms,
                Err(_) => warn!(value = %timeout, "Ignoring invalid REPORTS_QUERY_TIMEOUT_MS"),
            }
        }
        if let Some(limit) = lookup("REPORTS_MAX_CONCURRENT_QUERIES") {
            match limit.parse() {
                Ok(n) => self.engine.max_concurrent_queries = n,
                Err(_) => warn!(value = %limit, "Ignoring invalid REPORTS_MAX_CONCURRENT_QUERIES"),
            }
        }
        if let Some(level) = lookup("RUST_LOG") {
            self.server.log_level = level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(Error::Configuration(format!(
                "Invalid listen address: {}",
                self.server.listen_addr
            )));
        }
        if self.engine.max_concurrent_queries == 0 {
            return Err(Error::Configuration(
                "max_concurrent_queries must be > 0".to_string(),
            ));
        }
        if self.engine.query_timeout_ms == 0 {
            return Err(Error::Configuration("query_timeout_ms must be > 0".to_string()));
        }
        if self.engine.default_page_size == 0 || self.engine.max_page_size == 0 {
            return Err(Error::Configuration("page sizes must be > 0".to_string()));
        }
        if self.engine.default_page_size > self.engine.max_page_size {
            return Err(Error::Configuration(
                "default_page_size cannot exceed max_page_size".to_string(),
            ));
        }
        if self.data.fixture_path.is_none() && !self.data.seed_demo {
            return Err(Error::Configuration(
                "no dataset: set data.fixture_path or data.seed_demo".to_string(),
            ));
        }
        if self.auth.tokens.iter().any(|t| t.token.is_empty()) {
            return Err(Error::Configuration("auth tokens cannot be empty".to_string()));
        }
        Ok(())
    }

    /// Log a summary of the effective configuration
    pub fn log_summary(&self, source: Option<&Path>) {
        info!(
            source = %source.map(|p| p.display().to_string()).unwrap_or_else(|| "defaults".into()),
            listen_addr = %self.server.listen_addr,
            max_concurrent_queries = self.engine.max_concurrent_queries,
            query_timeout_ms = self.engine.query_timeout_ms,
            tokens = self.auth.tokens.len(),
            "Configuration loaded"
        );
    }

    /// Save configuration to a TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Configuration(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = ApplicationConfig::default();
        assert_eq!(config.server.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.engine.query_timeout_ms, 30_000);
        assert!(config.data.seed_demo);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = ApplicationConfig::from_toml(
            r#"
            [engine]
            query_timeout_ms = 500

            [[auth.tokens]]
            token = "secret"
            user_id = 1
            role = "admin"
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.query_timeout_ms, 500);
        assert_eq!(config.engine.max_concurrent_queries, 8);
        assert_eq!(config.auth.tokens[0].role, Role::Admin);
        assert_eq!(
            config.engine.engine_config().query_timeout,
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_validation() {
        let mut config = ApplicationConfig::default();
        config.engine.max_concurrent_queries = 0;
        assert!(config.validate().is_err());

        let mut config = ApplicationConfig::default();
        config.server.listen_addr = "not an address".into();
        assert!(config.validate().is_err());

        let mut config = ApplicationConfig::default();
        config.data.seed_demo = false;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("REPORTS_LISTEN_ADDR", "127.0.0.1:9000"),
            ("REPORTS_QUERY_TIMEOUT_MS", "250"),
            ("REPORTS_MAX_CONCURRENT_QUERIES", "nope"),
        ]
        .into_iter()
        .collect();
        let mut config = ApplicationConfig::default();
        config.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.server.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.engine.query_timeout_ms, 250);
        // invalid values are ignored
        assert_eq!(config.engine.max_concurrent_queries, 8);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports.toml");
        let mut config = ApplicationConfig::default();
        config.engine.max_page_size = 42;
        config.engine.default_page_size = 10;
        config.save_to_file(&path).unwrap();
        let loaded = ApplicationConfig::from_file(&path).unwrap();
        assert_eq!(loaded.engine.max_page_size, 42);
        assert!(ApplicationConfig::from_file(dir.path().join("missing.toml")).is_err());
    }
}
