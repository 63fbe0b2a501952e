//! Error types and handling for the courier.
//!
//! Every component reports through one [`CourierError`] so that callers of
//! `connect()`, the send calls and the receive loop see a single type, while
//! each layer keeps its own narrowly scoped error enum.

use thiserror::Error;

/// Result type alias for the courier library
pub type Result<T> = std::result::Result<T, CourierError>;

/// Top-level error type for all courier operations
#[derive(Error, Debug, Clone)]
pub enum CourierError {
    /// Cryptographic operation errors
    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptoError),

    /// Signaling relay errors
    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    /// Session and state machine errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Frame and chunking protocol errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(String),
}

/// Cryptographic operation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Invalid key format or size
    #[error("Invalid key: {reason}")]
    InvalidKey { reason: String },

    /// Key derivation failure
    #[error("Key derivation failed: {reason}")]
    KeyDerivation { reason: String },

    /// Encryption operation failure
    #[error("Encryption failed: {reason}")]
    Encryption { reason: String },

    /// Token failed authentication or is malformed
    #[error("Authentication tag verification failed: {reason}")]
    AuthenticationTag { reason: String },

    /// Token is authentic but outside the permitted staleness window
    #[error("Token expired: issued {age_secs}s ago (max {max_age_secs}s)")]
    TokenExpired { age_secs: i64, max_age_secs: u64 },
}

/// Signaling relay errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    /// Relay refused the credentials
    #[error("Authentication rejected by relay (status {status}): {body}")]
    Authentication { status: u16, body: String },

    /// Relay answered with a non-success status
    #[error("Relay returned status {status}: {body}")]
    Http { status: u16, body: String },

    /// Request never produced a response
    #[error("Relay unreachable: {reason}")]
    Network { reason: String },

    /// Remote session description missing or unparsable
    #[error("Malformed remote description: {reason}")]
    MalformedDescription { reason: String },

    /// Request abandoned because the session was closed
    #[error("Signaling request cancelled")]
    Cancelled,
}

/// Session and state machine errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Operation requires an open channel
    #[error("Not connected (session is {state})")]
    NotConnected { state: String },

    /// Operation not permitted in the current state
    #[error("Invalid session state: {state}")]
    InvalidState { state: String },

    /// Data channel did not open in time
    #[error("Data channel did not open within {secs}s")]
    ChannelTimeout { secs: u64 },

    /// Peer-connection engine failure
    #[error("Peer connection failed: {reason}")]
    Peer { reason: String },
}

/// Configuration and setup errors
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    /// Missing required configuration
    #[error("Missing configuration: {field}")]
    MissingField { field: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// Configuration parsing error
    #[error("Configuration parse error: {reason}")]
    ParseError { reason: String },

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Directory creation failure
    #[error("Failed to create directory: {path}")]
    DirectoryCreation { path: String },
}

/// Frame and chunking protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Decrypted frame could not be decoded
    #[error("Invalid frame: {reason}")]
    InvalidFrame { reason: String },

    /// Chunk index outside the announced total
    #[error("Chunk {index} out of range for message {message_id} ({total} chunks)")]
    ChunkOutOfRange {
        message_id: String,
        index: u32,
        total: u32,
    },

    /// Chunks of one message disagree about the chunk count
    #[error("Chunk count mismatch for message {message_id}: expected {expected}, got {actual}")]
    ChunkTotalMismatch {
        message_id: String,
        expected: u32,
        actual: u32,
    },

    /// Message exceeds the configured reassembly limit
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

impl CourierError {
    /// Returns true if this error ends the session
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Signaling(
                SignalingError::Authentication { .. }
                    | SignalingError::Http { .. }
                    | SignalingError::Network { .. }
                    | SignalingError::MalformedDescription { .. }
            ) | Self::Session(SessionError::ChannelTimeout { .. })
                | Self::Session(SessionError::Peer { .. })
        )
    }

    /// Returns true if this error indicates a tampered or forged payload
    pub fn is_security_violation(&self) -> bool {
        matches!(
            self,
            Self::Crypto(CryptoError::AuthenticationTag { .. })
                | Self::Crypto(CryptoError::TokenExpired { .. })
        )
    }
}

impl From<std::io::Error> for CourierError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<bincode::Error> for CourierError {
    fn from(err: bincode::Error) -> Self {
        Self::Protocol(ProtocolError::InvalidFrame {
            reason: err.to_string(),
        })
    }
}

impl From<webrtc::Error> for CourierError {
    fn from(err: webrtc::Error) -> Self {
        Self::Session(SessionError::Peer {
            reason: err.to_string(),
        })
    }
}

impl From<reqwest::Error> for SignalingError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::Http {
                status: status.as_u16(),
                body: err.to_string(),
            },
            None => Self::Network {
                reason: err.to_string(),
            },
        }
    }
}
