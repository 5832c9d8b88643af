//! Client configuration at `~/.panepilot/cli.toml`.
//!
//! CLI flags always override config file values.

use anyhow::{Context, Result};
use panepilot_core::DEFAULT_SOCKET_NAME;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub default: DefaultConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultConfig {
    /// Control socket path (empty = `~/.panepilot.sock`).
    #[serde(default)]
    pub socket: String,

    /// Agent label sent with `ask` and `send`.
    #[serde(default)]
    pub from: String,
}

impl Config {
    /// Load configuration from a TOML file, returning defaults if the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;

        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Socket to dial: the flag, then the config file, then the default.
    pub fn socket_path(&self, flag: Option<&str>) -> PathBuf {
        match flag.filter(|s| !s.is_empty()) {
            Some(socket) => expand_tilde(socket),
            None if !self.default.socket.is_empty() => expand_tilde(&self.default.socket),
            None => home().join(DEFAULT_SOCKET_NAME),
        }
    }

    /// Agent label: the flag, then the config file.
    pub fn from_label(&self, flag: Option<&str>) -> Option<String> {
        flag.filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| Some(self.default.from.clone()).filter(|s| !s.is_empty()))
    }
}

/// Default config location.
pub fn default_path() -> PathBuf {
    home().join(".panepilot").join("cli.toml")
}

fn home() -> PathBuf {
    dirs::home_dir().unwrap_or_default()
}

pub fn expand_tilde(s: &str) -> PathBuf {
    match s.strip_prefix("~/") {
        Some(rest) => home().join(rest),
        None => PathBuf::from(s),
    }
}
