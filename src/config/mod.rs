//! Configuration management.
//!
//! blockflow configuration can come from:
//! - Environment variables (BLOCKFLOW_*)
//! - Config file (~/.config/blockflow/config.toml)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// blockflow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Orchestrator limits
    #[serde(default)]
    pub engine: EngineSettings,

    /// Outbound HTTP client
    #[serde(default)]
    pub outbound: OutboundSettings,

    /// Datastore backend
    #[serde(default)]
    pub datastore: DatastoreSettings,
}

/// Orchestrator limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Deadline for a single block (seconds)
    #[serde(default = "default_block_timeout")]
    pub block_timeout_seconds: u64,

    /// Maximum blocks running at once within one level
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Compiled plans kept in memory; 0 disables the cache
    #[serde(default = "default_plan_cache_capacity")]
    pub plan_cache_capacity: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            block_timeout_seconds: default_block_timeout(),
            max_concurrency: default_max_concurrency(),
            plan_cache_capacity: default_plan_cache_capacity(),
        }
    }
}

impl EngineSettings {
    pub fn block_timeout(&self) -> Duration {
        Duration::from_secs(self.block_timeout_seconds.max(1))
    }
}

fn default_block_timeout() -> u64 {
    60
}

fn default_max_concurrency() -> usize {
    8
}

fn default_plan_cache_capacity() -> u64 {
    100
}

/// Outbound HTTP client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundSettings {
    /// Request timeout when a block does not set one (seconds)
    #[serde(default = "default_outbound_timeout")]
    pub default_timeout_seconds: u64,

    /// TCP connect timeout (seconds)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// Allow loopback, private and metadata hosts
    #[serde(default)]
    pub allow_internal_urls: bool,
}

impl Default for OutboundSettings {
    fn default() -> Self {
        Self {
            default_timeout_seconds: default_outbound_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
            allow_internal_urls: false,
        }
    }
}

fn default_outbound_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

/// Datastore configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatastoreSettings {
    /// Path to SQLite database; in-memory store when absent
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Connection pool size
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Wait for a pooled connection (seconds)
    #[serde(default = "default_pool_timeout")]
    pub pool_timeout_seconds: u64,

    /// `find` limit when a block does not set one
    #[serde(default = "default_find_limit")]
    pub default_find_limit: usize,

    /// Upper bound applied to every `find` limit
    #[serde(default = "default_max_find_limit")]
    pub max_find_limit: usize,
}

impl Default for DatastoreSettings {
    fn default() -> Self {
        Self {
            path: None,
            pool_size: default_pool_size(),
            pool_timeout_seconds: default_pool_timeout(),
            default_find_limit: default_find_limit(),
            max_find_limit: default_max_find_limit(),
        }
    }
}

fn default_pool_size() -> u32 {
    4
}

fn default_pool_timeout() -> u64 {
    30
}

fn default_find_limit() -> usize {
    100
}

fn default_max_find_limit() -> usize {
    1000
}

impl Config {
    /// Load configuration from default locations.
    pub fn load() -> Self {
        let mut config = Self::default();

        let primary_path = Self::config_dir().join("config.toml");
        match Self::load_partial_from_path(&primary_path) {
            Ok(Some(partial)) => config.apply_partial(partial),
            Ok(None) => {}
            Err(e) => warn!(
                path = %primary_path.display(),
                "Ignoring config file: {}",
                e
            ),
        }

        config.apply_env_overrides();
        config
    }

    /// Load configuration from an explicit file, then apply env overrides.
    pub fn load_from(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let partial: PartialConfig = toml::from_str(&content)
            .map_err(|e| crate::error::EngineError::Config(e.to_string()))?;
        let mut config = Self::default();
        config.apply_partial(partial);
        config.apply_env_overrides();
        Ok(config)
    }

    /// Get the config directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("blockflow"))
            .unwrap_or_else(|| PathBuf::from(".blockflow"))
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<u64>("BLOCKFLOW_BLOCK_TIMEOUT_SECONDS") {
            self.engine.block_timeout_seconds = v;
        }
        if let Some(v) = env_parse::<usize>("BLOCKFLOW_MAX_CONCURRENCY") {
            self.engine.max_concurrency = v;
        }
        if let Some(v) = env_parse::<u64>("BLOCKFLOW_PLAN_CACHE_CAPACITY") {
            self.engine.plan_cache_capacity = v;
        }
        if let Some(v) = env_parse::<u64>("BLOCKFLOW_OUTBOUND_TIMEOUT_SECONDS") {
            self.outbound.default_timeout_seconds = v;
        }
        if let Some(v) = env_parse::<u64>("BLOCKFLOW_CONNECT_TIMEOUT_SECONDS") {
            self.outbound.connect_timeout_seconds = v;
        }
        if let Ok(v) = std::env::var("BLOCKFLOW_ALLOW_INTERNAL_URLS") {
            self.outbound.allow_internal_urls = v == "true" || v == "1";
        }
        if let Ok(path) = std::env::var("BLOCKFLOW_DATASTORE_PATH") {
            self.datastore.path = Some(PathBuf::from(path));
        }
        if let Some(v) = env_parse::<u32>("BLOCKFLOW_DATASTORE_POOL_SIZE") {
            self.datastore.pool_size = v;
        }
        if let Some(v) = env_parse::<usize>("BLOCKFLOW_MAX_FIND_LIMIT") {
            self.datastore.max_find_limit = v;
        }
    }

    /// A missing file is `Ok(None)`; an unreadable or malformed one is an error.
    fn load_partial_from_path(path: &Path) -> std::result::Result<Option<PartialConfig>, String> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(format!("failed to read: {}", e)),
        };
        toml::from_str(&content)
            .map(Some)
            .map_err(|e| format!("invalid TOML: {}", e))
    }

    fn apply_partial(&mut self, partial: PartialConfig) {
        if let Some(engine) = partial.engine {
            self.engine = engine;
        }
        if let Some(outbound) = partial.outbound {
            self.outbound = outbound;
        }
        if let Some(datastore) = partial.datastore {
            self.datastore = datastore;
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    engine: Option<EngineSettings>,
    outbound: Option<OutboundSettings>,
    datastore: Option<DatastoreSettings>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.engine.block_timeout_seconds, 60);
        assert_eq!(config.engine.max_concurrency, 8);
        assert_eq!(config.outbound.default_timeout_seconds, 30);
        assert!(!config.outbound.allow_internal_urls);
        assert!(config.datastore.path.is_none());
        assert_eq!(config.datastore.default_find_limit, 100);
        assert_eq!(config.datastore.max_find_limit, 1000);
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[engine]\nmax_concurrency = 2\n\n[datastore]\npath = \"/tmp/blocks.db\""
        )
        .unwrap();

        let partial = Config::load_partial_from_path(file.path()).unwrap().unwrap();
        let mut config = Config::default();
        config.apply_partial(partial);

        assert_eq!(config.engine.max_concurrency, 2);
        assert_eq!(config.engine.block_timeout_seconds, 60);
        assert_eq!(
            config.datastore.path.as_deref(),
            Some(Path::new("/tmp/blocks.db"))
        );
        assert_eq!(config.datastore.pool_size, 4);
        assert_eq!(config.outbound.connect_timeout_seconds, 10);
    }

    #[test]
    fn test_invalid_toml_is_reported_by_partial_loader() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[engine\nbroken").unwrap();
        let err = Config::load_partial_from_path(file.path()).unwrap_err();
        assert!(err.contains("invalid TOML"), "{}", err);
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("config.toml");
        assert!(Config::load_partial_from_path(&missing).unwrap().is_none());
    }
}
