//! Gateway server configuration

use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::{CacheConfig, EngineConfig};
use crate::error::{AuthzError, Result};

/// Header the upstream identity service fills with the caller's groups
pub const DEFAULT_GROUPS_HEADER: &str = "x-auth-groups";

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server bind address
    pub host: String,

    /// HTTP server port
    pub port: u16,

    /// Metrics server port
    pub metrics_port: u16,

    /// Cache aggregated profiles between requests
    pub cache_enabled: bool,

    /// Profile cache capacity
    pub cache_size: usize,

    /// Profile cache TTL in seconds
    pub cache_ttl_secs: u64,

    /// JSON rules file seeding the in-memory store
    pub rules_file: Option<PathBuf>,

    /// PostgreSQL connection string; takes precedence over `rules_file`
    pub database_url: Option<String>,

    /// Header carrying caller groups
    pub groups_header: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            metrics_port: 9090,
            cache_enabled: true,
            cache_size: 10_000,
            cache_ttl_secs: 60,
            rules_file: None,
            database_url: None,
            groups_header: DEFAULT_GROUPS_HEADER.to_string(),
        }
    }
}

impl ServerConfig {
    /// Load from process environment
    ///
    /// `HOST`, `PORT`, `METRICS_PORT`, `CACHE_ENABLED`, `CACHE_SIZE`,
    /// `CACHE_TTL`, `RULES_FILE`, `DATABASE_URL`, `GROUPS_HEADER`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key lookup, unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("HOST") {
            config.host = host;
        }
        if let Some(port) = parse_var(&lookup, "PORT")? {
            config.port = port;
        }
        if let Some(port) = parse_var(&lookup, "METRICS_PORT")? {
            config.metrics_port = port;
        }
        if let Some(enabled) = parse_var(&lookup, "CACHE_ENABLED")? {
            config.cache_enabled = enabled;
        }
        if let Some(size) = parse_var(&lookup, "CACHE_SIZE")? {
            config.cache_size = size;
        }
        if let Some(ttl) = parse_var(&lookup, "CACHE_TTL")? {
            config.cache_ttl_secs = ttl;
        }

        config.rules_file = lookup("RULES_FILE")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        config.database_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());

        if let Some(header) = lookup("GROUPS_HEADER") {
            config.groups_header = header.trim().to_ascii_lowercase();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.port == self.metrics_port {
            return Err(AuthzError::ConfigError(format!(
                "PORT and METRICS_PORT must differ (both {})",
                self.port
            )));
        }

        if axum::http::HeaderName::from_str(&self.groups_header).is_err() {
            return Err(AuthzError::ConfigError(format!(
                "invalid GROUPS_HEADER: {:?}",
                self.groups_header
            )));
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn metrics_bind_address(&self) -> String {
        format!("{}:{}", self.host, self.metrics_port)
    }

    /// Resolver settings derived from this configuration
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            enable_cache: self.cache_enabled,
            cache_config: CacheConfig {
                capacity: self.cache_size,
                ttl: Duration::from_secs(self.cache_ttl_secs),
            },
            ..Default::default()
        }
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| AuthzError::ConfigError(format!("invalid {}={:?}: {}", key, raw, e))),
    }
}
