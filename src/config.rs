//! Configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. Environment variables prefixed with `GRAPH_MIGRATE_`, nested keys separated by
//!    a double underscore (e.g. `GRAPH_MIGRATE_APPLICATION__LOG_LEVEL=debug`)
//!
//! Every section and field has a default, so a file only needs what it overrides.
//!
//! # Example
//! ```no_run
//! use graph_migrate::config::Config;
//!
//! let config = Config::load_from("config/graph.toml")?;
//! config.validate()?;
//! println!("Migration enabled: {}", config.migrate.enabled);
//! # Ok::<(), graph_migrate::error::MigrateError>(())
//! ```

use crate::error::{MigrateError, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "GRAPH_MIGRATE_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Application settings
    pub application: ApplicationConfig,
    /// Graph RPC settings
    pub rpc: RpcConfig,
    /// Local RRD storage
    pub rrd: RrdConfig,
    /// Cluster migration settings
    pub migrate: MigrateConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Graph RPC configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Address the local graph RPC server listens on
    pub listen: String,
    /// Timeout of every outbound call in milliseconds
    pub call_timeout_ms: u64,
}

/// RRD storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RrdConfig {
    /// Root directory of RRD files
    pub storage: PathBuf,
}

/// Cluster migration configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrateConfig {
    /// Whether this node migrates data from the cluster at all
    pub enabled: bool,
    /// Persistent connections (and workers) per node
    pub concurrency: usize,
    /// Ring points per node
    pub replicas: usize,
    /// Delay between reconnection attempts in milliseconds
    pub reconnect_delay_ms: u64,
    /// How often `serve` queues keys still waiting for their RRD file, in milliseconds
    pub sweep_interval_ms: u64,
    /// Node name to address
    pub cluster: BTreeMap<String, String>,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "graph-migrate".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:6071".to_string(),
            call_timeout_ms: 5000,
        }
    }
}

impl Default for RrdConfig {
    fn default() -> Self {
        Self {
            storage: PathBuf::from("data/6070"),
        }
    }
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            concurrency: 2,
            replicas: 500,
            reconnect_delay_ms: 500,
            sweep_interval_ms: 1000,
            cluster: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from a specific file path plus environment overrides
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::figment(path.as_ref()).extract().map_err(MigrateError::from)
    }

    /// The provider stack used by [`Config::load_from`].
    pub fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Timeout of every outbound call.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc.call_timeout_ms)
    }

    /// Delay between reconnection attempts.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.migrate.reconnect_delay_ms)
    }

    /// Period of the pending-migration sweep.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.migrate.sweep_interval_ms)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(MigrateError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.rpc.call_timeout_ms == 0 {
            return Err(MigrateError::Configuration(
                "rpc.call_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if !self.migrate.enabled {
            return Ok(());
        }

        if self.migrate.concurrency == 0 {
            return Err(MigrateError::Configuration(
                "migrate.concurrency must be greater than 0".to_string(),
            ));
        }
        if self.migrate.replicas == 0 {
            return Err(MigrateError::Configuration(
                "migrate.replicas must be greater than 0".to_string(),
            ));
        }
        if self.migrate.sweep_interval_ms == 0 {
            return Err(MigrateError::Configuration(
                "migrate.sweep_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.migrate.cluster.is_empty() {
            return Err(MigrateError::Configuration(
                "migrate.cluster must list at least one node when migration is enabled"
                    .to_string(),
            ));
        }
        for (node, addr) in &self.migrate.cluster {
            if addr.parse::<SocketAddr>().is_err() && addr.rsplit_once(':').is_none() {
                return Err(MigrateError::Configuration(format!(
                    "Invalid address '{addr}' for node {node}"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_config() -> Config {
        let mut config = Config::default();
        config.migrate.enabled = true;
        config
            .migrate
            .cluster
            .insert("graph-00".to_string(), "127.0.0.1:6070".to_string());
        config
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.call_timeout(), Duration::from_secs(5));
        assert_eq!(config.reconnect_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = Config::default();
        config.application.log_level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_enabled_requires_cluster() {
        let mut config = enabled_config();
        assert!(config.validate().is_ok());
        config.migrate.cluster.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = enabled_config();
        config.migrate.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        let mut config = enabled_config();
        assert_eq!(config.sweep_interval(), Duration::from_secs(1));
        config.migrate.sweep_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_address_rejected() {
        let mut config = enabled_config();
        config
            .migrate
            .cluster
            .insert("graph-01".to_string(), "not-an-address".to_string());
        assert!(config.validate().is_err());
    }
}
