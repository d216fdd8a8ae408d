//! Configuration loading and config file resolution
//!
//! Config file priority order:
//! 1. Command-line argument (highest priority)
//! 2. `PHENOFRONT_CONFIG` environment variable
//! 3. User config directory (`<config_dir>/phenofront/config.toml`)
//! 4. System config (`/etc/phenofront/config.toml`)
//!
//! A missing file is not an error: compiled defaults are used and the
//! service starts with no experiments. A file that fails to parse is.

use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "PHENOFRONT_CONFIG";

/// Complete service configuration as read from TOML
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub downloads: DownloadsConfig,
    /// Experiment tables, kept raw and validated when an experiment is resolved
    pub experiments: BTreeMap<String, toml::Value>,
    pub users: BTreeMap<String, UserEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5780".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Bulk download settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadsConfig {
    /// Lifetime of an issued download key
    pub token_ttl_secs: u64,
    /// Upper bound on live download keys
    pub max_tokens: usize,
    /// Snapshots shown on the results view
    pub recent_limit: u32,
    /// Barcodes offered as examples on the query builder view
    pub example_barcodes: u32,
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: 3600,
            max_tokens: 10_000,
            recent_limit: 50,
            example_barcodes: 20,
        }
    }
}

/// Per-user access list
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UserEntry {
    pub experiments: Vec<String>,
}

impl TomlConfig {
    /// Parse configuration text
    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a config file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&text)
    }

    /// Names of every configured experiment, sorted
    pub fn experiment_names(&self) -> Vec<String> {
        self.experiments.keys().cloned().collect()
    }

    /// Raw table for one experiment, if configured
    pub fn experiment_table(&self, name: &str) -> Option<&toml::Value> {
        self.experiments.get(name)
    }

    /// Experiments the identity may query
    ///
    /// Users without an entry in `[users]` may query every experiment.
    /// Listed names that are not configured are dropped.
    pub fn allowed_experiments(&self, identity: &str) -> Vec<String> {
        match self.users.get(identity) {
            Some(entry) => {
                let mut allowed: Vec<String> = entry
                    .experiments
                    .iter()
                    .filter(|name| self.experiments.contains_key(name.as_str()))
                    .cloned()
                    .collect();
                allowed.sort();
                allowed.dedup();
                allowed
            }
            None => self.experiment_names(),
        }
    }

    pub fn is_allowed(&self, identity: &str, experiment: &str) -> bool {
        self.allowed_experiments(identity)
            .iter()
            .any(|name| name == experiment)
    }
}

/// Locates and loads the service config file
pub struct ConfigResolver {
    cli_arg: Option<PathBuf>,
}

impl ConfigResolver {
    pub fn new(cli_arg: Option<PathBuf>) -> Self {
        Self { cli_arg }
    }

    /// First config path found in priority order
    ///
    /// CLI and environment paths are returned even if the file is missing,
    /// so an explicit but wrong path surfaces as an error in `load`.
    pub fn resolve_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.cli_arg {
            return Some(path.clone());
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.is_empty() {
                return Some(PathBuf::from(path));
            }
        }

        if let Some(user_config) = dirs::config_dir().map(|d| d.join("phenofront").join("config.toml")) {
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/phenofront/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load the resolved config, or compiled defaults when no file is found
    pub fn load(&self) -> Result<TomlConfig> {
        self.load_with_source().map(|(config, _)| config)
    }

    /// Load the config along with where it came from
    ///
    /// Nothing is logged here: the log level is itself configuration, so the
    /// caller reports the source once its subscriber is installed.
    pub fn load_with_source(&self) -> Result<(TomlConfig, ConfigSource)> {
        match self.resolve_path() {
            Some(path) => {
                let config = TomlConfig::load(&path)?;
                Ok((config, ConfigSource::File(path)))
            }
            None => Ok((TomlConfig::default(), ConfigSource::Defaults)),
        }
    }
}

/// Where the running configuration was read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    /// No file found; the service runs with no experiments
    Defaults,
}

impl ConfigSource {
    pub fn log(&self) {
        match self {
            ConfigSource::File(path) => info!("Loaded configuration from {}", path.display()),
            ConfigSource::Defaults => {
                warn!("No configuration file found, using compiled defaults (no experiments)")
            }
        }
    }
}
