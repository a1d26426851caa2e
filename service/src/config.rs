//! Layered service configuration.
//!
//! Precedence, lowest first:
//! 1. built-in defaults
//! 2. a TOML file (`--config`, `./milestone.toml`, or
//!    `$XDG_CONFIG_HOME/milestone/config.toml`)
//! 3. `MILESTONE_*` environment variables, `__` between nested keys,
//!    e.g. `MILESTONE_POLICY__ADMIN_SIGNS_FOR_PARTIES=true`

use std::path::{Path, PathBuf};
use std::time::Duration;

use ::config::{Config, Environment, File};
use milestone_core::PermissionGate;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Configuration file not found at path: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

impl From<::config::ConfigError> for ConfigError {
    fn from(err: ::config::ConfigError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

/// Root service configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Socket to listen on; `None` means [`crate::default_socket_path`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,

    #[serde(default)]
    pub policy: PolicyConfig,

    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// How long a writer waits on SQLite's lock before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Let administrators sign in either party's slot.
    #[serde(default)]
    pub admin_signs_for_parties: bool,
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("milestone")
        .join("signoff.db")
}
fn default_pool_size() -> u32 {
    8
}
fn default_busy_timeout_ms() -> u64 {
    5000
}
fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            pool_size: default_pool_size(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            socket_path: None,
            policy: PolicyConfig::default(),
            log_filter: default_log_filter(),
        }
    }
}

impl ServiceConfig {
    pub fn gate(&self) -> PermissionGate {
        PermissionGate::new(self.policy.admin_signs_for_parties)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.database.busy_timeout_ms)
    }

    pub fn socket_path(&self) -> PathBuf {
        self.socket_path
            .clone()
            .unwrap_or_else(crate::default_socket_path)
    }

    fn validate(&self) -> Result<()> {
        if self.database.pool_size == 0 {
            return Err(ConfigError::ValidationError(
                "database.pool_size must be at least 1".to_string(),
            ));
        }
        if self.database.path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "database.path must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration loader with layered merging.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn load(&self) -> Result<ServiceConfig> {
        let defaults_json = serde_json::to_string(&ServiceConfig::default())?;
        let mut builder = Config::builder().add_source(File::from_str(
            &defaults_json,
            ::config::FileFormat::Json,
        ));

        if let Some(ref path) = self.config_path {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
            builder = builder.add_source(File::from(path.as_path()));
        }

        builder = builder.add_source(
            Environment::with_prefix("MILESTONE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: ServiceConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Locate a config file in the standard locations:
    /// 1. `./milestone.toml`
    /// 2. `$XDG_CONFIG_HOME/milestone/config.toml`
    pub fn find_config_file() -> Option<PathBuf> {
        let cwd_config = PathBuf::from("./milestone.toml");
        if cwd_config.exists() {
            return Some(cwd_config);
        }

        dirs::config_dir()
            .map(|dir| dir.join("milestone").join("config.toml"))
            .filter(|path| path.exists())
    }

    pub fn load_default() -> Result<ServiceConfig> {
        match Self::find_config_file() {
            Some(path) => ConfigLoader::new().with_file(path).load(),
            None => ConfigLoader::new().load(),
        }
    }
}
