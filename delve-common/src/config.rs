//! Bootstrap configuration loading
//!
//! Configuration sources, highest priority first:
//! 1. Command-line arguments (applied by the binary on top of the loaded file)
//! 2. Environment variables (`DELVE_CONFIG` selects the file)
//! 3. TOML config file
//! 4. Built-in defaults (code constants)
//!
//! Plan definitions, research costs and credit packages are static code
//! tables, never part of this file.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "DELVE_CONFIG";

/// Bootstrap configuration loaded from TOML
///
/// Every field has a default so a missing or partial file is valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Interface to bind the HTTP server to
    pub host: String,

    /// HTTP server port
    pub port: u16,

    /// SQLite database file; defaults to `<data dir>/delve/delve.db`
    pub database_path: Option<PathBuf>,

    pub logging: LoggingConfig,
    pub research: ResearchConfig,
    pub payments: PaymentsConfig,
    pub database: DatabaseConfig,
    pub events: EventsConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5780,
            database_path: None,
            logging: LoggingConfig::default(),
            research: ResearchConfig::default(),
            payments: PaymentsConfig::default(),
            database: DatabaseConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (trace, debug, info, warn, error); `RUST_LOG` wins
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Research orchestration settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    /// Stream gateway polling interval
    pub poll_interval_ms: u64,

    /// Upper bound on one background generation run
    pub generation_timeout_secs: u64,

    /// External generator executable; unset means generation always fails
    pub agent_command: Option<String>,

    /// Arguments for the generator; `{prompt}` is replaced by the research prompt
    pub agent_args: Vec<String>,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            generation_timeout_secs: 1800,
            agent_command: None,
            agent_args: vec!["-p".to_string(), "{prompt}".to_string()],
        }
    }
}

/// Payment stub settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaymentsConfig {
    /// Development-only: allow `mock-confirm` to credit orders without a provider callback
    pub mock_confirm_enabled: bool,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            mock_confirm_enabled: true,
        }
    }
}

/// Database tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Maximum total time a write retries on SQLite lock contention
    pub max_lock_wait_ms: u64,

    /// Pool size
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_lock_wait_ms: 5000,
            max_connections: 10,
        }
    }
}

/// Event bus sizing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load configuration following the priority order in the module docs
    ///
    /// An explicitly named file (CLI or env) must exist; the implicit
    /// locations are optional and fall back to defaults.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = cli_path {
            return Self::load_from(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::load_from(Path::new(&path));
        }

        match find_config_file() {
            Some(path) => Self::load_from(&path),
            None => {
                debug!("No config file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Database file path, falling back to the platform data directory
    pub fn resolved_database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| default_data_folder().join("delve.db"))
    }
}

/// Locate an implicit config file (user config dir, then /etc on Linux)
fn find_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("delve").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/delve/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Get OS-dependent default data folder
pub fn default_data_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("delve"))
        .unwrap_or_else(|| PathBuf::from("./delve_data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_file_is_empty() {
        let config = TomlConfig::from_toml_str("").unwrap();
        assert_eq!(config.port, 5780);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.research.poll_interval_ms, 1000);
        assert!(config.payments.mock_confirm_enabled);
        assert!(config.research.agent_command.is_none());
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = TomlConfig::from_toml_str(
            r#"
            port = 6000

            [research]
            agent_command = "claude"
            generation_timeout_secs = 60
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 6000);
        assert_eq!(config.research.agent_command.as_deref(), Some("claude"));
        assert_eq!(config.research.generation_timeout_secs, 60);
        assert_eq!(config.research.poll_interval_ms, 1000);
        assert_eq!(config.research.agent_args, vec!["-p", "{prompt}"]);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = TomlConfig::from_toml_str("port = \"not a number\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_explicit_database_path_wins() {
        let config = TomlConfig::from_toml_str("database_path = \"/tmp/x.db\"").unwrap();
        assert_eq!(config.resolved_database_path(), PathBuf::from("/tmp/x.db"));
    }
}
