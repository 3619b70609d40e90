//! TOML Configuration File Support
//!
//! Centralized configuration loading for the relay, supporting a TOML file at
//! `~/.config/deep-chat/relay.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (applied by the daemon)
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [backend]
//! host = "localhost"
//! port = 11434
//! model = "deepseek-r1:8b"
//! connect_timeout_ms = 5000
//!
//! [server]
//! bind_address = "127.0.0.1:8765"
//! max_connections = 32
//! channel_capacity = 256
//! max_message_size = 262144
//! page_title = "Deep Code Assistant"
//!
//! [relay]
//! update_mode = "cumulative"
//! overlap_policy = "cancel-previous"
//! max_prompt_bytes = 32768
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::BackendConfig;
use crate::relay::{OverlapPolicy, RelayConfig, UpdateMode};

/// Worst-case JSON growth per prompt byte (`\u0001`)
const JSON_ESCAPE_FACTOR: usize = 6;

/// Room for the `chat` envelope around the escaped prompt
const CHAT_ENVELOPE_BYTES: usize = 1024;

/// Smallest inbound frame limit that still carries every accepted prompt
#[must_use]
pub fn min_message_size(max_prompt_bytes: usize) -> usize {
    max_prompt_bytes
        .saturating_mul(JSON_ESCAPE_FACTOR)
        .saturating_add(CHAT_ENVELOPE_BYTES)
}

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where the file layer of the configuration came from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigSource {
    /// Loaded from this file
    File(PathBuf),
    /// No file found, defaults used
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "config file {}", path.display()),
            Self::Default => write!(f, "defaults"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Backend section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendToml {
    /// Ollama host
    pub host: Option<String>,
    /// Ollama port
    pub port: Option<u16>,
    /// Model identifier
    pub model: Option<String>,
    /// Connect timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,
}

/// Server section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Address the HTTP/WebSocket listener binds to
    pub bind_address: Option<String>,
    /// Maximum simultaneous connections
    pub max_connections: Option<usize>,
    /// Per-panel outbound channel capacity
    pub channel_capacity: Option<usize>,
    /// Maximum inbound WebSocket message size in bytes
    pub max_message_size: Option<usize>,
    /// Title shown on the panel page
    pub page_title: Option<String>,
}

/// Relay section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayToml {
    /// Text appended to every prompt
    pub disclaimer: Option<String>,
    /// Full resend or deltas
    pub update_mode: Option<UpdateMode>,
    /// What a second prompt does while one is streaming
    pub overlap_policy: Option<OverlapPolicy>,
    /// Maximum prompt size in bytes
    pub max_prompt_bytes: Option<usize>,
}

/// Root of the TOML configuration file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// `[backend]`
    pub backend: BackendToml,
    /// `[server]`
    pub server: ServerToml,
    /// `[relay]`
    pub relay: RelayToml,
}

// =============================================================================
// Resolved Settings
// =============================================================================

/// Resolved settings for the HTTP/WebSocket listener
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerSettings {
    /// Address to bind
    pub bind_address: String,
    /// Maximum simultaneous connections
    pub max_connections: usize,
    /// Per-panel outbound channel capacity
    pub channel_capacity: usize,
    /// Maximum inbound message size in bytes
    pub max_message_size: usize,
    /// Title shown on the panel page
    pub page_title: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8765".to_string(),
            max_connections: 32,
            channel_capacity: 256,
            max_message_size: 256 * 1024,
            page_title: crate::ui::DEFAULT_TITLE.to_string(),
        }
    }
}

/// Everything the daemon needs, after layering defaults, file and environment
#[derive(Clone, Debug, Default)]
pub struct Settings {
    /// Backend connection
    pub backend: BackendConfig,
    /// Relay behaviour
    pub relay: RelayConfig,
    /// Listener
    pub server: ServerSettings,
}

impl Settings {
    /// Load settings: defaults, then the config file, then the process environment
    ///
    /// With `path = None` the default location is used if it exists.
    ///
    /// # Errors
    ///
    /// Fails if an explicitly given file cannot be read, or any file cannot be
    /// parsed, or the result does not validate.
    pub fn load(path: Option<&Path>) -> Result<(Self, ConfigSource), ConfigError> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Same as [`Settings::load`] with an explicit environment lookup
    ///
    /// # Errors
    ///
    /// See [`Settings::load`].
    pub fn load_with<F>(path: Option<&Path>, env: F) -> Result<(Self, ConfigSource), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (file, source) = match path {
            Some(path) => (load_config_from_path(path)?, ConfigSource::File(path.to_path_buf())),
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => {
                    let file = load_config_from_path(&path)?;
                    (file, ConfigSource::File(path))
                }
                None => (ConfigFile::default(), ConfigSource::Default),
            },
        };

        let mut settings = Self::default();
        settings.apply_file(&file);
        settings.apply_env(env)?;
        settings.validate()?;
        Ok((settings, source))
    }

    /// Overlay values present in a config file
    pub fn apply_file(&mut self, file: &ConfigFile) {
        let backend = &file.backend;
        if let Some(ref host) = backend.host {
            self.backend.host.clone_from(host);
        }
        if let Some(port) = backend.port {
            self.backend.port = port;
        }
        if let Some(ms) = backend.connect_timeout_ms {
            self.backend.connect_timeout_ms = ms;
        }
        if let Some(ref model) = backend.model {
            self.relay.model.clone_from(model);
        }

        let server = &file.server;
        if let Some(ref bind) = server.bind_address {
            self.server.bind_address.clone_from(bind);
        }
        if let Some(max) = server.max_connections {
            self.server.max_connections = max;
        }
        if let Some(cap) = server.channel_capacity {
            self.server.channel_capacity = cap;
        }
        if let Some(size) = server.max_message_size {
            self.server.max_message_size = size;
        }
        if let Some(ref title) = server.page_title {
            self.server.page_title.clone_from(title);
        }

        let relay = &file.relay;
        if let Some(ref disclaimer) = relay.disclaimer {
            self.relay.disclaimer.clone_from(disclaimer);
        }
        if let Some(mode) = relay.update_mode {
            self.relay.update_mode = mode;
        }
        if let Some(policy) = relay.overlap_policy {
            self.relay.overlap_policy = policy;
        }
        if let Some(max) = relay.max_prompt_bytes {
            self.relay.max_prompt_bytes = max;
        }
    }

    /// Overlay values from environment variables
    ///
    /// `lookup` abstracts the environment so tests need not mutate it.
    ///
    /// # Errors
    ///
    /// Fails if a variable is set to an unparsable value.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("OLLAMA_HOST") {
            self.backend.host = host;
        }
        if let Some(port) = lookup("OLLAMA_PORT") {
            self.backend.port = parse_env("OLLAMA_PORT", &port)?;
        }
        if let Some(model) = lookup("RELAY_MODEL") {
            self.relay.model = model;
        }
        if let Some(bind) = lookup("RELAY_BIND") {
            self.server.bind_address = bind;
        }
        if let Some(mode) = lookup("RELAY_UPDATE_MODE") {
            self.relay.update_mode = parse_env("RELAY_UPDATE_MODE", &mode)?;
        }
        if let Some(policy) = lookup("RELAY_OVERLAP_POLICY") {
            self.relay.overlap_policy = parse_env("RELAY_OVERLAP_POLICY", &policy)?;
        }
        if let Some(disclaimer) = lookup("RELAY_DISCLAIMER") {
            self.relay.disclaimer = disclaimer;
        }
        Ok(())
    }

    /// Check invariants the rest of the relay relies on
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relay.model.trim().is_empty() {
            return Err(ConfigError::ValidationError("model must not be empty".into()));
        }
        if self.server.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "max_connections must be at least 1".into(),
            ));
        }
        if self.server.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "channel_capacity must be at least 1".into(),
            ));
        }
        if self.relay.max_prompt_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "max_prompt_bytes must be at least 1".into(),
            ));
        }
        let needed = min_message_size(self.relay.max_prompt_bytes);
        if self.server.max_message_size < needed {
            return Err(ConfigError::ValidationError(format!(
                "max_message_size ({}) cannot carry a max_prompt_bytes ({}) prompt once \
                 JSON-escaped; use at least {needed}",
                self.server.max_message_size, self.relay.max_prompt_bytes
            )));
        }
        Ok(())
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| ConfigError::ValidationError(format!("{key}={value}: {e}")))
}

/// Default config file location (`$XDG_CONFIG_HOME/deep-chat/relay.toml`)
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("deep-chat").join("relay.toml"))
}

/// Read and parse a config file
///
/// # Errors
///
/// Fails if the file cannot be read or is not valid TOML for [`ConfigFile`].
pub fn load_config_from_path(path: &Path) -> Result<ConfigFile, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&contents)?)
}
