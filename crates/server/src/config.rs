//! Configuration management for the CoShell server.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/coshell/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("default_shell must not be empty")]
    EmptyShell,

    #[error("term must not be empty")]
    EmptyTerm,

    #[error("pty size must be non-zero, got {0}x{1}")]
    InvalidPtySize(u16, u16),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the CoShell server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General server configuration.
    pub server: ServerConfig,

    /// Session management configuration.
    pub session: SessionConfig,
}

/// General server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Session management configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Shell launched for new sessions.
    pub default_shell: String,

    /// Terminal type advertised to the shell (`$TERM`).
    pub term: String,

    /// Width of freshly allocated terminals, in columns.
    pub cols: u16,

    /// Height of freshly allocated terminals, in rows.
    pub rows: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_shell: default_shell(),
            term: "xterm".to_string(),
            cols: 80,
            rows: 24,
        }
    }
}

impl Config {
    /// Loads and validates configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration to a TOML file, creating parent directories
    /// as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config dir: {}", parent.display()))?;
        }
        let contents = toml::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Loads configuration from the default path, falling back to defaults
    /// when no file exists yet.
    pub fn load_or_default() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// The default configuration file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("coshell")
            .join("config.toml")
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !VALID_LOG_LEVELS.contains(&self.server.log_level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.server.log_level.clone()));
        }
        if self.session.default_shell.is_empty() {
            return Err(ConfigError::EmptyShell);
        }
        if self.session.term.is_empty() {
            return Err(ConfigError::EmptyTerm);
        }
        if self.session.cols == 0 || self.session.rows == 0 {
            return Err(ConfigError::InvalidPtySize(
                self.session.cols,
                self.session.rows,
            ));
        }
        Ok(())
    }
}

/// Default shell: `$SHELL`, falling back to `/bin/sh`.
pub fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}
