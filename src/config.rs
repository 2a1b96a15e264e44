use crate::error::{ConfigError, Error, IoError, Result};
use crate::hooks::HOOK_DIRECTORY;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the user configuration inside the config directory
pub const CONFIG_FILENAME: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Remote whose tracking branches are merged and whose default branch is main
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub hooks: HooksConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HooksConfig {
    /// Hook directory, relative to the repository root
    #[serde(default = "default_hook_directory")]
    pub directory: PathBuf,
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_hook_directory() -> PathBuf {
    PathBuf::from(HOOK_DIRECTORY)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote: default_remote(),
            log_level: default_log_level(),
            hooks: HooksConfig::default(),
        }
    }
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            directory: default_hook_directory(),
        }
    }
}

impl Config {
    /// Default config directory, `~/.config/pila` on Linux
    pub fn default_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pila"))
    }

    /// Load `config.toml` from `dir`; a missing file yields defaults
    ///
    /// `PILA_REMOTE` and `PILA_LOG_LEVEL` override the file.
    pub fn load(dir: Option<&Path>) -> Result<Self> {
        let mut config = match dir.map(|dir| dir.join(CONFIG_FILENAME)) {
            Some(path) if path.is_file() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| env::var(key).ok());
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|source| {
            Error::Io(IoError::ReadFailed {
                path: path.display().to_string(),
                source,
            })
        })?;

        toml::from_str(&contents).map_err(|e| {
            Error::Config(ConfigError::Parse {
                path: path.display().to_string(),
                details: e.to_string(),
            })
        })
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(remote) = lookup("PILA_REMOTE").filter(|v| !v.is_empty()) {
            self.remote = remote;
        }
        if let Some(level) = lookup("PILA_LOG_LEVEL").filter(|v| !v.is_empty()) {
            self.log_level = level;
        }
    }
}
