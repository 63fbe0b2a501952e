//! Configuration management for the courier.
//!
//! This module provides TOML-based configuration with support for multiple
//! configuration sources (default, file-based, environment variables) and
//! validation of configuration parameters.

use crate::crypto::SharedKey;
use crate::messaging::FRAME_OVERHEAD;
use crate::utils::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "courier.toml";

/// Environment variable prefix for configuration
pub const ENV_PREFIX: &str = "COURIER";

/// Complete configuration for the courier
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    /// Signaling relay configuration
    pub signaling: SignalingConfig,
    /// Cryptographic configuration
    pub crypto: CryptoConfig,
    /// Peer session configuration
    pub session: SessionConfig,
    /// Message framing configuration
    pub messaging: MessagingConfig,
    /// Storage configuration
    pub storage: StorageConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Signaling relay endpoint and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Relay URL all signaling requests are posted to
    pub url: String,
    /// Relay account name
    pub username: String,
    /// Relay account password
    pub password: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

/// Cryptographic configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Pre-shared key, URL-safe base64
    pub shared_key: Option<String>,
    /// Reject tokens older than this many seconds (unset = never expire)
    pub max_token_age_secs: Option<u64>,
}

/// Peer session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Label of the data channel opened towards the peer
    pub channel_label: String,
    /// Seconds to wait for the data channel to open
    pub channel_open_timeout_secs: u64,
    /// STUN servers handed to the peer-connection engine
    pub stun_servers: Vec<String>,
}

/// Message framing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Largest encrypted frame put on the channel, in bytes
    pub max_frame_size: usize,
    /// Partial messages held for reassembly at once
    pub max_pending_messages: usize,
    /// Largest reassembled message accepted, in bytes
    pub max_message_size: usize,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory received files are written to
    pub download_dir: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080/signal".to_string(),
            username: String::new(),
            password: String::new(),
            request_timeout_secs: crate::defaults::DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            channel_label: crate::defaults::DEFAULT_CHANNEL_LABEL.to_string(),
            channel_open_timeout_secs: crate::defaults::DEFAULT_CHANNEL_OPEN_TIMEOUT,
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
        }
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            max_frame_size: crate::defaults::DEFAULT_MAX_FRAME_SIZE,
            max_pending_messages: crate::defaults::DEFAULT_MAX_PENDING_MESSAGES,
            max_message_size: crate::MAX_MESSAGE_SIZE,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let download_dir = dirs::download_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("p2p-courier");

        Self { download_dir }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl SignalingConfig {
    /// Per-request timeout as a [`Duration`]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl SessionConfig {
    /// Channel-open bound as a [`Duration`]
    pub fn channel_open_timeout(&self) -> Duration {
        Duration::from_secs(self.channel_open_timeout_secs)
    }
}

impl CourierConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
            path: path.display().to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with multiple sources (default, file, environment)
    ///
    /// An explicit `config_file` must exist; otherwise `courier.toml` in the
    /// working directory and then the per-user config directory are tried.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = config_file {
            config = Self::from_file(path)?;
        } else {
            let default_locations = [
                PathBuf::from(DEFAULT_CONFIG_FILE),
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("p2p-courier")
                    .join(DEFAULT_CONFIG_FILE),
            ];

            for location in &default_locations {
                if location.exists() {
                    config = Self::from_file(location)?;
                    break;
                }
            }
        }

        config = config.merge_from_env()?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = self.to_toml_string()?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `COURIER_*` environment overrides
    fn merge_from_env(mut self) -> Result<Self> {
        if let Ok(url) = std::env::var(format!("{ENV_PREFIX}_SIGNALING_URL")) {
            self.signaling.url = url;
        }

        if let Ok(username) = std::env::var(format!("{ENV_PREFIX}_SIGNALING_USERNAME")) {
            self.signaling.username = username;
        }

        if let Ok(password) = std::env::var(format!("{ENV_PREFIX}_SIGNALING_PASSWORD")) {
            self.signaling.password = password;
        }

        if let Ok(key) = std::env::var(format!("{ENV_PREFIX}_CRYPTO_SHARED_KEY")) {
            self.crypto.shared_key = Some(key);
        }

        if let Ok(timeout) = std::env::var(format!("{ENV_PREFIX}_SESSION_CHANNEL_OPEN_TIMEOUT_SECS")) {
            self.session.channel_open_timeout_secs =
                timeout.parse().map_err(|_| ConfigError::InvalidValue {
                    field: format!("{ENV_PREFIX}_SESSION_CHANNEL_OPEN_TIMEOUT_SECS"),
                    value: timeout,
                })?;
        }

        if let Ok(level) = std::env::var(format!("{ENV_PREFIX}_LOGGING_LEVEL")) {
            self.logging.level = level;
        }

        Ok(self)
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<()> {
        if url::Url::parse(&self.signaling.url).is_err() {
            return Err(invalid("signaling.url", &self.signaling.url));
        }

        if self.signaling.request_timeout_secs == 0 {
            return Err(invalid("signaling.request_timeout_secs", "0"));
        }

        if let Some(key) = &self.crypto.shared_key {
            SharedKey::from_base64(key)
                .map_err(|_| invalid("crypto.shared_key", "<not a 32-byte base64 key>"))?;
        }

        if self.session.channel_label.is_empty() {
            return Err(invalid("session.channel_label", ""));
        }

        if self.session.channel_open_timeout_secs == 0 {
            return Err(invalid("session.channel_open_timeout_secs", "0"));
        }

        if self.messaging.max_frame_size <= FRAME_OVERHEAD {
            return Err(invalid(
                "messaging.max_frame_size",
                &self.messaging.max_frame_size.to_string(),
            ));
        }

        if self.messaging.max_pending_messages == 0 {
            return Err(invalid("messaging.max_pending_messages", "0"));
        }

        if self.messaging.max_message_size == 0 {
            return Err(invalid("messaging.max_message_size", "0"));
        }

        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => return Err(invalid("logging.level", &self.logging.level)),
        }

        Ok(())
    }

    /// Parse the configured shared key
    ///
    /// # Errors
    ///
    /// `ConfigError::MissingField` when no key is configured
    pub fn shared_key(&self) -> Result<SharedKey> {
        let encoded = self
            .crypto
            .shared_key
            .as_deref()
            .ok_or_else(|| ConfigError::MissingField {
                field: "crypto.shared_key".to_string(),
            })?;
        SharedKey::from_base64(encoded)
    }

    /// Ensure the download directory exists
    pub fn ensure_directories(&self) -> Result<()> {
        let dir = &self.storage.download_dir;
        if !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|_| ConfigError::DirectoryCreation {
                path: dir.display().to_string(),
            })?;
        }
        Ok(())
    }

    /// Get the configuration as a pretty-printed TOML string
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| {
            ConfigError::ParseError {
                reason: e.to_string(),
            }
            .into()
        })
    }
}

fn invalid(field: &str, value: &str) -> crate::utils::CourierError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
    .into()
}
