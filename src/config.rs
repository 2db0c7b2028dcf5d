//! Configuration for the ptysh console.
//!
//! TOML-based configuration file loading and saving. The default
//! configuration path is `~/.config/ptysh/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("terminal cols must be between 1 and 1000, got {0}")]
    InvalidCols(u16),

    #[error("terminal rows must be between 1 and 1000, got {0}")]
    InvalidRows(u16),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the ptysh console.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Initial terminal geometry.
    pub terminal: TerminalConfig,

    /// Logging configuration.
    pub log: LogConfig,
}

/// Initial terminal geometry for new sessions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TerminalConfig {
    /// Terminal width in columns.
    pub cols: u16,

    /// Terminal height in rows.
    pub rows: u16,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub level: String,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ptysh")
            .join("config.toml")
    }

    /// Loads and validates the configuration from the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the configuration from `path`, or the default path when
    /// `path` is `None`, falling back to defaults when no file exists.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Serializes the configuration to the given path, creating parent
    /// directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config dir: {}", parent.display()))?;
        }
        let raw = toml::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(path, raw)
            .with_context(|| format!("failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validates all configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.terminal.cols == 0 || self.terminal.cols > 1000 {
            return Err(ConfigError::InvalidCols(self.terminal.cols));
        }
        if self.terminal.rows == 0 || self.terminal.rows > 1000 {
            return Err(ConfigError::InvalidRows(self.terminal.rows));
        }
        if !VALID_LOG_LEVELS.contains(&self.log.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.log.level.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.terminal.cols, 80);
        assert_eq!(config.terminal.rows, 24);
        assert_eq!(config.log.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn toml_roundtrip() {
        let mut config = Config::default();
        config.terminal.cols = 132;
        config.log.level = "debug".to_string();

        let raw = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&raw).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let parsed: Config = toml::from_str("[terminal]\ncols = 120\n").unwrap();
        assert_eq!(parsed.terminal.cols, 120);
        assert_eq!(parsed.terminal.rows, 24);
        assert_eq!(parsed.log.level, "info");
    }

    #[test]
    fn validate_rejects_zero_cols() {
        let mut config = Config::default();
        config.terminal.cols = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidCols(0)));
    }

    #[test]
    fn validate_rejects_oversized_rows() {
        let mut config = Config::default();
        config.terminal.rows = 5000;
        assert_eq!(config.validate(), Err(ConfigError::InvalidRows(5000)));
    }

    #[test]
    fn validate_rejects_unknown_log_level() {
        let mut config = Config::default();
        config.log.level = "loud".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("loud".to_string()))
        );
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.terminal.rows = 50;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[terminal]\ncols = 0\n").unwrap();

        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn load_or_default_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");

        let config = Config::load_or_default(Some(&path)).unwrap();
        assert_eq!(config, Config::default());
    }
}
