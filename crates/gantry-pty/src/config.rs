//! Bridge configuration, read from a JSON file next to the app's other state.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::pty::TermSize;

/// Default cap on undelivered output per session (1 MiB).
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024 * 1024;
/// Default size of a single blocking read from the PTY master.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 64 * 1024;

/// Errors from loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "failed to read config: {err}"),
            ConfigError::Parse(err) => write!(f, "failed to parse config: {err}"),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(err) => Some(err),
            ConfigError::Parse(err) => Some(err),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Shell for interactive sessions. `None` uses `$SHELL`, then `/bin/sh`.
    pub shell: Option<String>,
    /// Size used when the frontend opens a session without measuring first.
    pub default_size: TermSize,
    /// Maximum bytes of undelivered output kept per session.
    pub buffer_capacity: usize,
    pub read_chunk_size: usize,
    /// Value of `TERM` for spawned children.
    pub term: String,
    /// Extra environment for spawned children.
    pub env: BTreeMap<String, String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            shell: None,
            default_size: TermSize::default(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            term: "xterm-256color".to_string(),
            env: BTreeMap::new(),
        }
    }
}

impl BridgeConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        // Defaulted fields would otherwise let `[]` or `null` pass as an
        // empty config.
        let value: serde_json::Value = serde_json::from_str(json)?;
        if !value.is_object() {
            return Err(ConfigError::Invalid("config must be a JSON object".into()));
        }
        let config = BridgeConfig::deserialize(value)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Load `path`, falling back to defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("no config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            other => other,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_size.validate().is_err() {
            return Err(ConfigError::Invalid(format!(
                "default_size must be non-zero, got {}x{}",
                self.default_size.cols, self.default_size.rows
            )));
        }
        if self.buffer_capacity == 0 {
            return Err(ConfigError::Invalid("buffer_capacity must be non-zero".into()));
        }
        if self.read_chunk_size == 0 {
            return Err(ConfigError::Invalid("read_chunk_size must be non-zero".into()));
        }
        if matches!(&self.shell, Some(s) if s.trim().is_empty()) {
            return Err(ConfigError::Invalid("shell must not be empty".into()));
        }
        Ok(())
    }
}
