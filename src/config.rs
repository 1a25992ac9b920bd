use crate::core::{BgsqlError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Top-level configuration structure parsed from a TOML file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionDefaults,
    pub sqlite: SqliteConfig,
}

/// Defaults applied by `Api::create_connection_with_defaults`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionDefaults {
    /// Milliseconds an operation may stay incomplete before polling reports it expired (0 = unbounded)
    pub async_timeout_ms: u32,
    /// Milliseconds a blocking wait may last
    pub blocking_timeout_ms: u32,
    /// Worker threads per connection
    pub thread_limit: u32,
}

impl Default for ConnectionDefaults {
    fn default() -> Self {
        ConnectionDefaults {
            async_timeout_ms: 5000,
            blocking_timeout_ms: 2000,
            thread_limit: 4,
        }
    }
}

/// SQLite driver configuration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SqliteConfig {
    pub busy_timeout_ms: u32,
    /// Statements run on every freshly opened handle
    pub pragmas: Vec<String>,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        SqliteConfig {
            busy_timeout_ms: 5000,
            pragmas: vec!["PRAGMA foreign_keys = ON".to_string()],
        }
    }
}

impl Config {
    /// Parses configuration from TOML text. Missing sections keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| BgsqlError::InvalidArgument(e.to_string()))
    }
}

/// Loads configuration from a TOML file at the given path.
///
/// # Arguments
///
/// * `path` - The file path to the TOML configuration file.
///
/// # Example
///
/// ```no_run
/// let config = bgsql::config::load_config("bgsql.toml").expect("Failed to load config");
/// println!("{:?}", config);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = fs::read_to_string(path).map_err(|e| BgsqlError::InvalidArgument(e.to_string()))?;
    Config::from_toml_str(&content)
}
