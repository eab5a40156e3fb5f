//! Runtime configuration.
//!
//! Loaded from an optional TOML file (default `config.toml`), then
//! overridden by `HLS_RELAY_*` environment variables, then by CLI flags —
//! file, then env, then CLI, highest precedence last.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::pool::PoolConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub cache: CacheSettings,
    pub pool: PoolSettings,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// This proxy's own externally visible base URL, e.g.
    /// `https://relay.example.com`, used as `P` in rewritten manifest
    /// URLs when it cannot be inferred from the inbound request.
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    pub max_entries: usize,
    pub max_memory_bytes: usize,
    pub expiry_seconds: u64,
    pub sweep_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    pub max_connections_per_origin: usize,
    pub max_pipelined_per_connection: usize,
    pub keep_alive_idle_ms: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                base_url: "http://localhost:8080".to_string(),
            },
            cache: CacheSettings {
                max_entries: 2000,
                max_memory_bytes: 500 * 1024 * 1024,
                expiry_seconds: 2 * 60 * 60,
                sweep_interval_seconds: 30 * 60,
            },
            pool: PoolSettings {
                max_connections_per_origin: 10,
                max_pipelined_per_connection: 5,
                keep_alive_idle_ms: 30_000,
            },
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from `path` (if it exists) layered under
    /// defaults, then apply `HLS_RELAY_*` environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?);

        if std::path::Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        let settled = builder
            .add_source(config::Environment::with_prefix("HLS_RELAY").separator("__"))
            .build()?;

        Ok(settled.try_deserialize()?)
    }
}

impl CacheSettings {
    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_entries: self.max_entries,
            max_memory_bytes: self.max_memory_bytes,
            expiry: Duration::from_secs(self.expiry_seconds),
        }
    }
}

impl PoolSettings {
    pub fn to_pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_connections: self.max_connections_per_origin,
            max_pipelined_per_connection: self.max_pipelined_per_connection,
            keep_alive_idle: Duration::from_millis(self.keep_alive_idle_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_production_values() {
        let config = Config::default();
        assert_eq!(config.cache.max_entries, 2000);
        assert_eq!(config.cache.max_memory_bytes, 500 * 1024 * 1024);
        assert_eq!(config.cache.expiry_seconds, 7200);
        assert_eq!(config.pool.max_connections_per_origin, 10);
        assert_eq!(config.pool.max_pipelined_per_connection, 5);
        assert_eq!(config.pool.keep_alive_idle_ms, 30_000);
    }

    #[test]
    fn load_falls_back_to_defaults_when_file_missing() {
        let config = Config::load("/nonexistent/config.toml").unwrap();
        assert_eq!(config.server.port, 8080);
    }
}
