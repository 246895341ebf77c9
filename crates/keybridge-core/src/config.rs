use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::BaseDirs;
use serde::Deserialize;
use tracing::{debug, warn};

pub const DEFAULT_TIMEOUT_MS: u64 = 120_000;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BridgeConfig {
    /// Key identifier handed to the authority unchanged.
    pub ssh_key: Option<String>,
    /// Program and arguments of the command authority.
    pub authority_command: Option<Vec<String>>,
    /// `0` waits forever.
    pub connect_timeout_ms: Option<u64>,
    /// `0` waits forever.
    pub request_timeout_ms: Option<u64>,
}

/// Deadlines applied to authority round trips. `None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Option<Duration>,
    pub request: Option<Duration>,
}

impl Timeouts {
    pub fn unbounded() -> Self {
        Self {
            connect: None,
            request: None,
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Some(Duration::from_millis(DEFAULT_TIMEOUT_MS)),
            request: Some(Duration::from_millis(DEFAULT_TIMEOUT_MS)),
        }
    }
}

impl BridgeConfig {
    /// Loads the config from `override_path`, `KEYBRIDGE_CONFIG`, or the
    /// per-user config directory, in that order. A missing or unreadable
    /// file yields defaults. `KEYBRIDGE_SSH_KEY` overrides the key id.
    pub fn load(override_path: Option<PathBuf>) -> Self {
        let mut config = match resolve_config_path(override_path) {
            Some(path) => match Self::from_path(&path) {
                Ok(config) => config,
                Err(ConfigError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "no config file, using defaults");
                    Self::default()
                }
                Err(err) => {
                    warn!(?err, path = %path.display(), "failed to load config, using defaults");
                    Self::default()
                }
            },
            None => Self::default(),
        };
        if let Ok(key) = std::env::var("KEYBRIDGE_SSH_KEY") {
            config.ssh_key = Some(key);
        }
        config
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(contents)?)
    }

    /// The configured key identifier, empty if unset.
    pub fn key_id(&self) -> String {
        self.ssh_key.clone().unwrap_or_default()
    }

    pub fn timeouts(&self) -> Timeouts {
        let defaults = Timeouts::default();
        Timeouts {
            connect: self.connect_timeout_ms.map_or(defaults.connect, millis),
            request: self.request_timeout_ms.map_or(defaults.request, millis),
        }
    }
}

fn millis(value: u64) -> Option<Duration> {
    if value == 0 {
        None
    } else {
        Some(Duration::from_millis(value))
    }
}

fn resolve_config_path(override_path: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = override_path {
        return Some(path);
    }
    if let Ok(path) = std::env::var("KEYBRIDGE_CONFIG") {
        return Some(PathBuf::from(path));
    }
    BaseDirs::new().map(|base_dirs| base_dirs.config_dir().join("keybridge").join("config.json"))
}
